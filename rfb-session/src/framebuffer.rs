//! Framebuffer model: screen image, cursor image/hotspot, and cursor-path image.
//!
//! This mirrors the teacher's decoder-dispatch shape - a registry of
//! [`Decoder`] implementations keyed by encoding type, with a handful of
//! pseudo-encodings special-cased above the registry - but synchronous, and
//! without the teacher's cache-protocol extensions (`ContentCache`,
//! bandwidth tracking): a replay decoder has no live connection to
//! negotiate those against.

use crate::config::ReplayConfig;
use crate::errors::ReplayError;
use rfb_capture::reader::{ByteReader, ChunkSource};
use rfb_common::Rect;
use rfb_encodings::{
    CopyRectDecoder, Decoder, RawDecoder, StubDecoder, ZRLEDecoder, ZlibDecoder, ENCODING_CORRE,
    ENCODING_COPY_RECT, ENCODING_HEXTILE, ENCODING_JPEG, ENCODING_OPEN_H264, ENCODING_RAW,
    ENCODING_RRE, ENCODING_TIGHT, ENCODING_TIGHT_PNG, ENCODING_ZLIB, ENCODING_ZLIBHEX,
    ENCODING_ZRLE,
};
use rfb_pixelbuffer::{
    ManagedPixelBuffer, MutablePixelBuffer, PixelBuffer, PixelFormat as LocalPixelFormat,
};
use rfb_protocol::messages::types::{PixelFormat as WirePixelFormat, Rectangle};
use std::collections::HashMap;

/// Pseudo-encoding: last rectangle marker in a framebuffer update.
pub const ENCODING_LAST_RECT: i32 = rfb_encodings::ENCODING_LAST_RECT;
/// Pseudo-encoding: desktop size change notification.
pub const ENCODING_DESKTOP_SIZE: i32 = rfb_encodings::ENCODING_DESKTOP_SIZE;
/// Pseudo-encoding: RGBA cursor shape update.
pub const ENCODING_PSEUDO_CURSOR_WITH_ALPHA: i32 = rfb_encodings::ENCODING_PSEUDO_CURSOR_WITH_ALPHA;

/// A cursor shape: RGBA pixels (row-major, no padding) plus the hotspot
/// offset within them.
#[derive(Debug, Clone, PartialEq)]
pub struct CursorImage {
    pub pixels: Vec<u8>,
    pub width: u16,
    pub height: u16,
    pub hotspot_x: u16,
    pub hotspot_y: u16,
}

enum DecoderEntry {
    Raw(RawDecoder),
    CopyRect(CopyRectDecoder),
    Zlib(ZlibDecoder),
    ZRLE(ZRLEDecoder),
    Stub(StubDecoder),
}

impl DecoderEntry {
    fn decode<S: ChunkSource>(
        &self,
        stream: &mut ByteReader<S>,
        rect: &Rectangle,
        pixel_format: &WirePixelFormat,
        buffer: &mut dyn MutablePixelBuffer,
    ) -> anyhow::Result<()> {
        match self {
            DecoderEntry::Raw(d) => d.decode(stream, rect, pixel_format, buffer),
            DecoderEntry::CopyRect(d) => d.decode(stream, rect, pixel_format, buffer),
            DecoderEntry::Zlib(d) => d.decode(stream, rect, pixel_format, buffer),
            DecoderEntry::ZRLE(d) => d.decode(stream, rect, pixel_format, buffer),
            DecoderEntry::Stub(d) => d.decode(stream, rect, pixel_format, buffer),
        }
    }

    fn is_stub(&self) -> bool {
        matches!(self, DecoderEntry::Stub(_))
    }
}

/// Registered pixel-data decoders, keyed by encoding type.
///
/// `Zlib`/`ZRLE` carry session-persistent inflate state: the registry (and
/// therefore its decoders) is built once per replayed session and never
/// reset mid-stream. Recognized-but-unreconstructed encodings resolve to
/// [`StubDecoder`].
struct DecoderRegistry {
    decoders: HashMap<i32, DecoderEntry>,
}

impl DecoderRegistry {
    fn with_standard() -> Self {
        let mut decoders = HashMap::new();
        decoders.insert(ENCODING_RAW, DecoderEntry::Raw(RawDecoder));
        decoders.insert(ENCODING_COPY_RECT, DecoderEntry::CopyRect(CopyRectDecoder));
        decoders.insert(ENCODING_ZLIB, DecoderEntry::Zlib(ZlibDecoder::new()));
        decoders.insert(ENCODING_ZRLE, DecoderEntry::ZRLE(ZRLEDecoder::new()));
        for &encoding in &[
            ENCODING_RRE,
            ENCODING_CORRE,
            ENCODING_HEXTILE,
            ENCODING_TIGHT,
            ENCODING_ZLIBHEX,
            ENCODING_JPEG,
            ENCODING_OPEN_H264,
            ENCODING_TIGHT_PNG,
        ] {
            decoders.insert(encoding, DecoderEntry::Stub(StubDecoder::new(encoding)));
        }
        Self { decoders }
    }

    fn get(&self, encoding: i32) -> Option<&DecoderEntry> {
        self.decoders.get(&encoding)
    }
}

/// The replayed session's framebuffer model: a screen image, an optional
/// cursor shape, and an RGBA trail of where the cursor has moved.
pub struct Framebuffer {
    screen: ManagedPixelBuffer,
    server_pixel_format: WirePixelFormat,
    cursor: Option<CursorImage>,
    cursor_path: ManagedPixelBuffer,
    cursor_position: Option<(u16, u16)>,
    registry: DecoderRegistry,
}

impl Framebuffer {
    /// Builds a framebuffer sized from `ServerInit`, with an empty cursor
    /// and cursor-path image of the same dimensions.
    pub fn new(width: u16, height: u16, server_pixel_format: WirePixelFormat) -> Self {
        let storage_format = LocalPixelFormat::rgb888();
        Self {
            screen: ManagedPixelBuffer::new(width as u32, height as u32, storage_format),
            server_pixel_format,
            cursor: None,
            cursor_path: ManagedPixelBuffer::new(width as u32, height as u32, storage_format),
            cursor_position: None,
            registry: DecoderRegistry::with_standard(),
        }
    }

    pub fn screen(&self) -> &ManagedPixelBuffer {
        &self.screen
    }

    pub fn cursor(&self) -> Option<&CursorImage> {
        self.cursor.as_ref()
    }

    pub fn cursor_path(&self) -> &ManagedPixelBuffer {
        &self.cursor_path
    }

    pub fn cursor_position(&self) -> Option<(u16, u16)> {
        self.cursor_position
    }

    pub fn server_pixel_format(&self) -> &WirePixelFormat {
        &self.server_pixel_format
    }

    /// A client `SetPixelFormat` replaces the format subsequent Raw/Zlib/ZRLE
    /// rectangles are read in; it does not touch already-decoded pixels.
    pub fn set_server_pixel_format(&mut self, format: WirePixelFormat) {
        self.server_pixel_format = format;
    }

    /// Direct crop of the screen image, as used by CopyRect's source side.
    pub fn get_screen_rectangle(&self, rect: Rect) -> Option<Vec<u8>> {
        let mut stride = 0;
        self.screen.get_buffer(rect, &mut stride).map(<[u8]>::to_vec)
    }

    /// Applies one FramebufferUpdate rectangle, reading its payload from
    /// `stream`. Returns the damaged screen rectangle for ordinary pixel
    /// rectangles, or `None` for pseudo-encodings that don't paint the
    /// screen image directly (last-rect, desktop-size, cursor shape).
    pub fn apply_rectangle<S: ChunkSource>(
        &mut self,
        stream: &mut ByteReader<S>,
        rect: &Rectangle,
        config: &ReplayConfig,
    ) -> Result<Option<Rect>, ReplayError> {
        match rect.encoding {
            ENCODING_LAST_RECT => {
                tracing::debug!(target: "rfb_session::framebuffer", "last-rect marker");
                Ok(None)
            }
            ENCODING_DESKTOP_SIZE => {
                tracing::info!(
                    target: "rfb_session::framebuffer",
                    width = rect.width,
                    height = rect.height,
                    "desktop size changed"
                );
                self.screen.resize(rect.width as u32, rect.height as u32);
                self.cursor_path.resize(rect.width as u32, rect.height as u32);
                Ok(None)
            }
            ENCODING_PSEUDO_CURSOR_WITH_ALPHA => {
                self.apply_cursor_with_alpha(stream, rect)?;
                Ok(None)
            }
            encoding => {
                let Framebuffer {
                    registry,
                    screen,
                    server_pixel_format,
                    ..
                } = self;
                let Some(decoder_entry) = registry.get(encoding) else {
                    return Err(ReplayError::UnsupportedEncoding {
                        encoding,
                        message: format!(
                            "rectangle at ({}, {}) {}x{} uses an unrecognized encoding",
                            rect.x, rect.y, rect.width, rect.height
                        ),
                    });
                };

                tracing::debug!(
                    target: "rfb_session::framebuffer",
                    encoding,
                    x = rect.x, y = rect.y, w = rect.width, h = rect.height,
                    "decoding rectangle"
                );

                match decoder_entry.decode(stream, rect, server_pixel_format, screen) {
                    Ok(()) => Ok(Some(Rect::new(
                        rect.x as i32,
                        rect.y as i32,
                        rect.width as u32,
                        rect.height as u32,
                    ))),
                    Err(e) if decoder_entry.is_stub() => {
                        let message = e.to_string();
                        if config.abort_on_unsupported_encoding {
                            Err(ReplayError::UnsupportedEncoding { encoding, message })
                        } else {
                            tracing::warn!(
                                target: "rfb_session::framebuffer",
                                encoding, %message,
                                "skipping unsupported rectangle"
                            );
                            Ok(None)
                        }
                    }
                    Err(e) => Err(ReplayError::DecodeError {
                        offset: stream.tell() as u64,
                        message: e.to_string(),
                    }),
                }
            }
        }
    }

    /// PSEUDO_CURSOR_WITH_ALPHA: an inner encoding type, then that encoding's
    /// payload, forced to [`WirePixelFormat::rgba_32`] regardless of the
    /// negotiated pixel format. `rect.x`/`rect.y` carry the hotspot, not a
    /// screen position.
    ///
    /// The temporary buffer is built with a storage format that is the exact
    /// converted equivalent of `rgba_32`, so `convert_pixels_to_buffer_format`
    /// takes its identity fast path and the true alpha byte (which
    /// `PixelFormat::to_rgb888`/`from_rgb888` cannot round-trip, since they
    /// hardcode alpha to 255) survives untouched.
    fn apply_cursor_with_alpha<S: ChunkSource>(
        &mut self,
        stream: &mut ByteReader<S>,
        rect: &Rectangle,
    ) -> Result<(), ReplayError> {
        let inner_encoding = stream.read_i32().map_err(|e| ReplayError::DecodeError {
            offset: stream.tell() as u64,
            message: e.to_string(),
        })?;

        let decoder_entry = self.registry.get(inner_encoding).ok_or_else(|| {
            ReplayError::UnsupportedEncoding {
                encoding: inner_encoding,
                message: format!(
                    "cursor-with-alpha inner encoding {inner_encoding} is not recognized"
                ),
            }
        })?;

        let rgba_format = WirePixelFormat::rgba_32();
        let storage_format: LocalPixelFormat = rgba_format.clone().into();
        let mut shape =
            ManagedPixelBuffer::new(rect.width as u32, rect.height as u32, storage_format);
        let inner_rect = Rectangle {
            x: 0,
            y: 0,
            width: rect.width,
            height: rect.height,
            encoding: inner_encoding,
        };

        decoder_entry
            .decode(stream, &inner_rect, &rgba_format, &mut shape)
            .map_err(|e| ReplayError::DecodeError {
                offset: stream.tell() as u64,
                message: e.to_string(),
            })?;

        // Stored bytes are [B, G, R, A] per pixel; swap to hand out [R, G, B, A].
        let mut pixels = shape.data().to_vec();
        for px in pixels.chunks_exact_mut(4) {
            px.swap(0, 2);
        }

        tracing::info!(
            target: "rfb_session::framebuffer",
            width = rect.width, height = rect.height,
            hotspot_x = rect.x, hotspot_y = rect.y,
            "cursor shape updated"
        );

        self.cursor = Some(CursorImage {
            pixels,
            width: rect.width,
            height: rect.height,
            hotspot_x: rect.x,
            hotspot_y: rect.y,
        });
        Ok(())
    }

    /// Updates the tracked cursor position and marks the corresponding pixel
    /// of the cursor-path image red. Positions outside the framebuffer are
    /// silently dropped - a pointer event can reference stale coordinates
    /// after a desktop-size change mid-capture.
    ///
    /// Returns whether the position was in range.
    pub fn update_cursor_position(&mut self, x: u16, y: u16) -> bool {
        self.cursor_position = Some((x, y));
        let (width, height) = self.cursor_path.dimensions();
        if x as u32 >= width || y as u32 >= height {
            tracing::debug!(
                target: "rfb_session::framebuffer",
                x, y, "cursor position out of range, not marking cursor path"
            );
            return false;
        }
        let red = self.cursor_path.format().from_rgb888([255, 0, 0, 255]);
        self.cursor_path
            .fill_rect(Rect::new(x as i32, y as i32, 1, 1), &red)
            .expect("position already range-checked against cursor_path dimensions");
        true
    }
}
