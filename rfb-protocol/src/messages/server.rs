//! Server-to-client RFB messages.
//!
//! This module defines the messages a replayed RFB server sends, as parsed
//! off the server-directed byte stream.

use super::types::{PixelFormat, Rectangle};
use rfb_capture::reader::{ByteReader, ChunkSource};
use std::io::Result;

fn decode_latin1(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| b as char).collect()
}

/// ServerInit message - initial server parameters.
///
/// # Wire Format
///
/// - 2 bytes: framebuffer width
/// - 2 bytes: framebuffer height
/// - 16 bytes: PixelFormat
/// - 4 bytes: name length
/// - N bytes: name string (UTF-8)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerInit {
    pub framebuffer_width: u16,
    pub framebuffer_height: u16,
    pub pixel_format: PixelFormat,
    pub name: String,
}

impl ServerInit {
    pub fn read_from<S: ChunkSource>(stream: &mut ByteReader<S>) -> Result<Self> {
        let framebuffer_width = stream.read_u16()?;
        let framebuffer_height = stream.read_u16()?;
        let pixel_format = PixelFormat::read_from(stream)?;
        let name_length = stream.read_u32()? as usize;
        let name_bytes = stream.read(name_length)?;
        let name = String::from_utf8_lossy(&name_bytes).into_owned();
        Ok(Self {
            framebuffer_width,
            framebuffer_height,
            pixel_format,
            name,
        })
    }
}

/// FramebufferUpdate message - rectangle headers only.
///
/// The encoding-specific pixel data that follows each rectangle header is
/// decoded separately by `rfb-encodings`, rectangle by rectangle, as each is
/// applied to the framebuffer.
///
/// # Wire Format
///
/// - 1 byte: padding (message type already consumed by the caller)
/// - 2 bytes: number of rectangles
/// - For each rectangle: 12-byte Rectangle header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FramebufferUpdateHeader {
    pub rect_count: u16,
}

impl FramebufferUpdateHeader {
    pub fn read_from<S: ChunkSource>(stream: &mut ByteReader<S>) -> Result<Self> {
        stream.skip(1)?;
        Ok(Self {
            rect_count: stream.read_u16()?,
        })
    }
}

/// Color map entry (RGB triplet).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColorMapEntry {
    pub red: u16,
    pub green: u16,
    pub blue: u16,
}

/// SetColorMapEntries message (opcode 1).
///
/// # Wire Format
///
/// - 1 byte: padding
/// - 2 bytes: first color index
/// - 2 bytes: number of colors
/// - For each color: 6 bytes (red u16, green u16, blue u16)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetColorMapEntries {
    pub first_color: u16,
    pub colors: Vec<ColorMapEntry>,
}

impl SetColorMapEntries {
    pub fn read_from<S: ChunkSource>(stream: &mut ByteReader<S>) -> Result<Self> {
        stream.skip(1)?;
        let first_color = stream.read_u16()?;
        let num_colors = stream.read_u16()? as usize;
        let mut colors = Vec::with_capacity(num_colors);
        for _ in 0..num_colors {
            colors.push(ColorMapEntry {
                red: stream.read_u16()?,
                green: stream.read_u16()?,
                blue: stream.read_u16()?,
            });
        }
        Ok(Self {
            first_color,
            colors,
        })
    }
}

/// Bell message (opcode 2) - no payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Bell;

impl Bell {
    pub fn read_from<S: ChunkSource>(_stream: &mut ByteReader<S>) -> Result<Self> {
        Ok(Self)
    }
}

/// ServerCutText message (opcode 3) - clipboard update from server.
///
/// # Wire Format
///
/// - 3 bytes: padding
/// - 4 bytes: text length
/// - N bytes: text (Latin-1 encoding)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerCutText {
    pub text: String,
}

impl ServerCutText {
    pub fn read_from<S: ChunkSource>(stream: &mut ByteReader<S>) -> Result<Self> {
        stream.skip(3)?;
        let length = stream.read_u32()? as usize;
        let text_bytes = stream.read(length)?;
        Ok(Self {
            text: decode_latin1(&text_bytes),
        })
    }
}
