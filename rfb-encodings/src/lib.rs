//! Pixel-data decoders for RFB (VNC) encodings.
//!
//! This crate defines the [`Decoder`] trait that encoding implementations
//! implement. A decoder reads a single framebuffer update rectangle (as
//! recorded by the server using a specific encoding) from the session's
//! server-directed byte stream, converts it to the client's pixel format,
//! and writes pixels into a [`MutablePixelBuffer`].
//!
//! # Key Concepts
//!
//! - **Synchronous decoding**: a replayed capture is read back in one pass,
//!   so decoders read from a [`ByteReader`] over whatever bytes the session
//!   driver has already reassembled - no async, no live socket.
//! - **Rectangle-based**: decoders operate on a single rectangle at a time.
//! - **Fail-fast policy**: decoders must not perform defensive fallbacks;
//!   fail with clear errors.
//! - **Encoding types**: each decoder handles one RFB encoding type (i32
//!   identifier from the protocol).
//!
//! # Mandatory vs. Stubbed Encodings
//!
//! Only [`ENCODING_RAW`], [`ENCODING_COPY_RECT`], [`ENCODING_ZLIB`], and
//! [`ENCODING_ZRLE`] decode real pixel data. The remaining encodings this
//! crate recognizes - [`ENCODING_RRE`], [`ENCODING_CORRE`],
//! [`ENCODING_HEXTILE`], [`ENCODING_TIGHT`], [`ENCODING_ZLIBHEX`],
//! [`ENCODING_JPEG`], [`ENCODING_OPEN_H264`], [`ENCODING_TIGHT_PNG`] - are
//! stubbed: their registry entry consumes the declared-length payload (when
//! the wire format makes the length self-describing) or otherwise treats
//! the rectangle as a no-op, without attempting to reconstruct pixels.
//!
//! Pseudo-encodings (negative values) indicate special operations rather
//! than pixel data:
//!
//! - [`ENCODING_LAST_RECT`] (-224): last rectangle in this update
//! - [`ENCODING_DESKTOP_SIZE`] (-223): desktop resolution change
//! - [`ENCODING_CURSOR`] (-239): cursor shape update
//! - [`ENCODING_X_CURSOR`] (-240): X11-style two-color cursor shape update
//! - [`ENCODING_PSEUDO_CURSOR_WITH_ALPHA`] (-314): RGBA cursor shape update

use anyhow::Result;
use rfb_capture::reader::{ByteReader, ChunkSource};

pub use rfb_pixelbuffer::MutablePixelBuffer;
pub use rfb_protocol::messages::types::{PixelFormat, Rectangle};

pub mod raw;
pub use raw::RawDecoder;

pub mod copyrect;
pub use copyrect::CopyRectDecoder;

pub mod zlib;
pub use zlib::ZlibDecoder;

pub mod zrle;
pub use zrle::ZRLEDecoder;

pub mod stub;
pub use stub::StubDecoder;

/// Converts a row-major run of pixels from the wire `pixel_format` to the
/// destination buffer's own pixel storage format.
///
/// Every mandatory decoder (Raw, Zlib, ZRLE) receives pixels in the
/// server's negotiated [`PixelFormat`], which need not match the layout
/// [`MutablePixelBuffer::pixel_format`] actually stores. Conversion goes
/// through RGBA8888 as the common intermediate, per
/// [`rfb_pixelbuffer::PixelFormat::to_rgb888`]/`from_rgb888`. When the two
/// formats are identical this is a plain copy.
///
/// `pixels` must hold a whole number of source pixels (its length must be
/// a multiple of `pixel_format.bytes_per_pixel()`); a short trailing
/// remainder is dropped by `chunks_exact`, which would indicate a caller
/// bug rather than legitimate input.
pub fn convert_pixels_to_buffer_format(
    pixels: &[u8],
    pixel_format: &PixelFormat,
    dest_format: &rfb_pixelbuffer::PixelFormat,
) -> Vec<u8> {
    let src_format: rfb_pixelbuffer::PixelFormat = pixel_format.clone().into();

    if src_format == *dest_format {
        return pixels.to_vec();
    }

    let src_bpp = src_format.bytes_per_pixel() as usize;
    let dest_bpp = dest_format.bytes_per_pixel() as usize;
    let count = pixels.len() / src_bpp;

    let mut out = Vec::with_capacity(count * dest_bpp);
    for chunk in pixels.chunks_exact(src_bpp) {
        let rgba = src_format.to_rgb888(chunk);
        out.extend_from_slice(&dest_format.from_rgb888(rgba));
    }
    out
}

/// Raw encoding: uncompressed pixel data (simplest encoding).
pub const ENCODING_RAW: i32 = 0;

/// CopyRect encoding: copy rectangle from another screen location.
pub const ENCODING_COPY_RECT: i32 = 1;

/// RRE (Rise-and-Run-length Encoding): background color + sub-rectangles.
pub const ENCODING_RRE: i32 = 2;

/// CoRRE encoding: RRE variant bounded to 255x255 sub-rectangles.
pub const ENCODING_CORRE: i32 = 4;

/// Hextile encoding: 16x16 tiles with multiple sub-encodings.
pub const ENCODING_HEXTILE: i32 = 5;

/// Zlib encoding: zlib-compressed raw pixels.
pub const ENCODING_ZLIB: i32 = 6;

/// Tight encoding: JPEG or zlib compression with palette mode.
pub const ENCODING_TIGHT: i32 = 7;

/// ZlibHex encoding: Hextile tiles with zlib-compressed raw/mono runs.
pub const ENCODING_ZLIBHEX: i32 = 8;

/// TRLE (Tiled Run-Length Encoding): 16x16 tiles with RLE.
pub const ENCODING_TRLE: i32 = 15;

/// ZRLE (Zlib Run-Length Encoding): zlib + RLE in 64x64 tiles.
pub const ENCODING_ZRLE: i32 = 16;

/// JPEG-encoded rectangle (as used by Tight-family JPEG quality modes).
pub const ENCODING_JPEG: i32 = 21;

/// TightPNG encoding: Tight framing with a PNG-encoded payload.
pub const ENCODING_TIGHT_PNG: i32 = -260;

/// OpenH264-encoded rectangle.
pub const ENCODING_OPEN_H264: i32 = 50;

/// Pseudo-encoding: last rectangle marker in framebuffer update.
pub const ENCODING_LAST_RECT: i32 = -224;

/// Pseudo-encoding: desktop size change notification.
pub const ENCODING_DESKTOP_SIZE: i32 = -223;

/// Pseudo-encoding: cursor shape update (RGB + bitmask).
pub const ENCODING_CURSOR: i32 = -239;

/// Pseudo-encoding: X11-style two-color cursor shape update.
pub const ENCODING_X_CURSOR: i32 = -240;

/// Pseudo-encoding: RGBA cursor shape update.
pub const ENCODING_PSEUDO_CURSOR_WITH_ALPHA: i32 = -314;

/// Core trait for all RFB encoding/decoding implementations.
///
/// Implementations read encoded rectangle data from the session's
/// server-directed byte stream, convert pixels to the client's pixel
/// format, and write them to the buffer.
///
/// # Contract
///
/// Implementors must:
/// - Read exactly the bytes for the rectangle as defined by their encoding
/// - Handle pixel format conversions correctly
/// - Write pixels to the buffer using appropriate methods
/// - Fail fast with clear error messages (no defensive fallbacks)
///
/// This trait is generic over the byte source and is therefore not
/// object-safe; callers dispatch across concrete decoders with a
/// hand-written enum keyed on [`Decoder::encoding_type`] rather than
/// `Box<dyn Decoder>`.
pub trait Decoder {
    /// Returns the RFB encoding type this decoder handles.
    fn encoding_type(&self) -> i32;

    /// Decode a single rectangle from the stream into the pixel buffer.
    ///
    /// # Errors
    ///
    /// Returns an error if the input bytes are malformed or insufficient,
    /// pixel format conversion fails, or writing to the buffer fails.
    fn decode<S: ChunkSource>(
        &self,
        stream: &mut ByteReader<S>,
        rect: &Rectangle,
        pixel_format: &PixelFormat,
        buffer: &mut dyn MutablePixelBuffer,
    ) -> Result<()>;
}
