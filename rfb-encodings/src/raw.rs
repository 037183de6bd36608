//! Raw encoding decoder - uncompressed pixel data.
//!
//! Raw encoding (type 0) is the simplest VNC encoding. It transmits pixels as
//! uncompressed data in the server's pixel format. The decoder reads
//! `width * height * bytes_per_pixel` bytes from the stream and writes them
//! directly to the pixel buffer.
//!
//! # Wire Format
//!
//! ```text
//! +-------------+
//! | Pixel data  |  width * height * bytes_per_pixel bytes
//! +-------------+
//! ```
//!
//! Each pixel is transmitted in the server's pixel format (as negotiated during
//! the ServerInit handshake). No compression or encoding is applied.
//!
//! # Example
//!
//! ```no_run
//! use rfb_encodings::{Decoder, RawDecoder, ENCODING_RAW};
//!
//! let decoder = RawDecoder;
//! assert_eq!(decoder.encoding_type(), ENCODING_RAW);
//! ```

use crate::{Decoder, MutablePixelBuffer, PixelFormat, Rectangle, ENCODING_RAW};
use anyhow::{Context, Result};
use rfb_capture::reader::{ByteReader, ChunkSource};
use rfb_common::Rect;

/// Decoder for raw (uncompressed) pixel data.
///
/// This is the simplest VNC encoding - pixels are transmitted without any
/// compression or transformation. The decoder reads `width * height *
/// bytes_per_pixel` bytes from the stream and writes them to the buffer.
pub struct RawDecoder;

impl Decoder for RawDecoder {
    fn encoding_type(&self) -> i32 {
        ENCODING_RAW
    }

    fn decode<S: ChunkSource>(
        &self,
        stream: &mut ByteReader<S>,
        rect: &Rectangle,
        pixel_format: &PixelFormat,
        buffer: &mut dyn MutablePixelBuffer,
    ) -> Result<()> {
        let width = rect.width as usize;
        let height = rect.height as usize;

        if width == 0 || height == 0 {
            return Ok(());
        }

        let bytes_per_pixel = pixel_format.bytes_per_pixel() as usize;
        let total_bytes = width * height * bytes_per_pixel;

        let pixel_data = stream
            .read(total_bytes)
            .context("failed to read raw pixel data from stream")?;

        let dest_rect = Rect::new(
            rect.x as i32,
            rect.y as i32,
            rect.width as u32,
            rect.height as u32,
        );

        let converted =
            crate::convert_pixels_to_buffer_format(&pixel_data, pixel_format, buffer.pixel_format());

        // Stride equals width since the data is tightly packed.
        buffer
            .image_rect(dest_rect, &converted, width)
            .context("failed to write raw pixel data to buffer")?;

        Ok(())
    }
}
