//! CopyRect encoding decoder - copy rectangle from another screen location.
//!
//! CopyRect encoding (type 1) is a pseudo-encoding that instructs the client to copy
//! a rectangle from one location on the screen to another. This is highly efficient
//! for operations like window dragging or scrolling, where the content doesn't change
//! but its position does.
//!
//! # Wire Format
//!
//! ```text
//! +----------+----------+
//! | src_x    | src_y    |  2 bytes each (u16, network byte order)
//! +----------+----------+
//! ```
//!
//! The rectangle's `x`, `y`, `width`, and `height` fields specify the **destination**
//! rectangle. The `src_x` and `src_y` fields (read from the stream) specify the
//! **source** location to copy from.
//!
//! # Overlapping Rectangles
//!
//! The decoder supports overlapping source and destination rectangles. The
//! `MutablePixelBuffer::copy_rect()` implementation is required to handle
//! overlaps correctly (typically by using `memmove` semantics).

use crate::{Decoder, MutablePixelBuffer, PixelFormat, Rectangle, ENCODING_COPY_RECT};
use anyhow::{Context, Result};
use rfb_capture::reader::{ByteReader, ChunkSource};
use rfb_common::{Point, Rect};

/// Decoder for CopyRect encoding - copy pixels from another screen location.
///
/// This encoding transmits only the source coordinates (4 bytes) and instructs
/// the client to copy a rectangle from the source position to the destination
/// position within the existing framebuffer.
pub struct CopyRectDecoder;

impl Decoder for CopyRectDecoder {
    fn encoding_type(&self) -> i32 {
        ENCODING_COPY_RECT
    }

    fn decode<S: ChunkSource>(
        &self,
        stream: &mut ByteReader<S>,
        rect: &Rectangle,
        _pixel_format: &PixelFormat,
        buffer: &mut dyn MutablePixelBuffer,
    ) -> Result<()> {
        if rect.width == 0 || rect.height == 0 {
            return Ok(());
        }

        let src_x = stream
            .read_u16()
            .context("failed to read CopyRect src_x")?;
        let src_y = stream
            .read_u16()
            .context("failed to read CopyRect src_y")?;

        let dest = Rect::new(
            rect.x as i32,
            rect.y as i32,
            rect.width as u32,
            rect.height as u32,
        );

        let src_offset = Point::new(src_x as i32 - rect.x as i32, src_y as i32 - rect.y as i32);

        buffer
            .copy_rect(dest, src_offset)
            .context("failed to copy rectangle within buffer")?;

        Ok(())
    }
}
