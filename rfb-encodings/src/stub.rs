//! Stub decoder for encodings that are recognized but not reconstructed.
//!
//! RRE, CoRRE, Hextile, Tight, ZlibHex, JPEG, OpenH264, and TightPNG rectangles
//! cannot be skipped without fully parsing their wire format (none of them are
//! a simple length-prefixed blob), so there is no safe way to stay
//! byte-synchronized with the rest of the stream once one of these is
//! encountered. `StubDecoder` makes that failure explicit and uniform rather
//! than silently misparsing whatever follows.

use crate::{Decoder, MutablePixelBuffer, PixelFormat, Rectangle};
use anyhow::{bail, Result};
use rfb_capture::reader::{ByteReader, ChunkSource};

/// Decoder registered for encodings this crate recognizes by name but does
/// not reconstruct pixels for.
pub struct StubDecoder {
    encoding_type: i32,
}

impl StubDecoder {
    pub fn new(encoding_type: i32) -> Self {
        Self { encoding_type }
    }
}

impl Decoder for StubDecoder {
    fn encoding_type(&self) -> i32 {
        self.encoding_type
    }

    fn decode<S: ChunkSource>(
        &self,
        _stream: &mut ByteReader<S>,
        rect: &Rectangle,
        _pixel_format: &PixelFormat,
        _buffer: &mut dyn MutablePixelBuffer,
    ) -> Result<()> {
        bail!(
            "encoding {} at rect [{},{} {}x{}] is recognized but not decoded",
            self.encoding_type,
            rect.x,
            rect.y,
            rect.width,
            rect.height
        );
    }
}
