//! Zlib encoding decoder - zlib-compressed raw pixel data.
//!
//! Zlib encoding (type 6) transmits a rectangle's pixels in the same raster
//! layout as Raw encoding, but the whole rectangle is compressed as a single
//! zlib stream. Unlike [`crate::zrle`], there is no tiling or palette/RLE
//! sub-encoding - decompression alone recovers the raw pixel bytes.
//!
//! # Wire Format
//!
//! ```text
//! +------------------+
//! | length           |  4 bytes (u32 big-endian)
//! +------------------+
//! | zlib_data        |  'length' bytes of zlib-compressed data
//! +------------------+
//! ```
//!
//! Decompressing `zlib_data` yields exactly `width * height * bytes_per_pixel`
//! raw pixel bytes, in the same row-major layout as Raw encoding.
//!
//! # Session-persistent Zlib Stream
//!
//! As with ZRLE, the zlib stream is continuous for the life of the session:
//! only the first Zlib rectangle carries a zlib header, every later one is a
//! continuation against the same inflater. `ZlibDecoder` must be kept alive
//! (and never reset) for the lifetime of the session being replayed.

use crate::{Decoder, MutablePixelBuffer, PixelFormat, Rectangle, ENCODING_ZLIB};
use anyhow::{bail, Context, Result};
use flate2::{Decompress, FlushDecompress};
use rfb_capture::reader::{ByteReader, ChunkSource};
use rfb_common::Rect;
use std::sync::Mutex;

/// Decoder for Zlib encoding.
///
/// The zlib inflater is a member of this decoder and persists across every
/// rectangle decoded through it - one instance per replayed session, never
/// reset.
pub struct ZlibDecoder {
    inflater: Mutex<Decompress>,
}

impl Default for ZlibDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl ZlibDecoder {
    /// Create a new Zlib decoder with a fresh zlib inflater.
    pub fn new() -> Self {
        Self {
            inflater: Mutex::new(Decompress::new(true)),
        }
    }

    fn decompress(&self, compressed: &[u8], expected_len: usize) -> Result<Vec<u8>> {
        let mut decompressed = Vec::with_capacity(expected_len);
        let mut inflater = self.inflater.lock().unwrap();

        let mut in_pos = 0;
        let mut out_buf = vec![0u8; 64 * 1024];

        while decompressed.len() < expected_len {
            let before_in = inflater.total_in();
            let before_out = inflater.total_out();

            let status = inflater
                .decompress(&compressed[in_pos..], &mut out_buf, FlushDecompress::Sync)
                .with_context(|| {
                    format!(
                        "zlib decompression failed (input {} bytes at offset {})",
                        compressed.len(),
                        in_pos,
                    )
                })?;

            let consumed = (inflater.total_in() - before_in) as usize;
            let produced = (inflater.total_out() - before_out) as usize;

            in_pos += consumed;
            decompressed.extend_from_slice(&out_buf[..produced]);

            if in_pos >= compressed.len() && produced == 0 {
                break;
            }

            if status == flate2::Status::StreamEnd {
                break;
            }
        }

        if decompressed.len() != expected_len {
            bail!(
                "zlib stream produced {} bytes, expected {}",
                decompressed.len(),
                expected_len
            );
        }

        Ok(decompressed)
    }
}

impl Decoder for ZlibDecoder {
    fn encoding_type(&self) -> i32 {
        ENCODING_ZLIB
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
            // Still consume the (empty-payload) length-prefixed chunk.
            let compressed_len = stream
                .read_u32()
                .context("Zlib: failed to read compressed data length")?;
            if compressed_len > 0 {
                stream
                    .read(compressed_len as usize)
                    .context("Zlib: failed to read compressed data")?;
            }
            return Ok(());
        }

        let bytes_per_pixel = pixel_format.bytes_per_pixel() as usize;
        let expected_len = width * height * bytes_per_pixel;

        let compressed_len = stream
            .read_u32()
            .context("Zlib: failed to read compressed data length")?;
        let compressed_data = stream
            .read(compressed_len as usize)
            .context("Zlib: failed to read compressed data")?;

        let pixel_data = self
            .decompress(&compressed_data, expected_len)
            .context("Zlib: decompression failed")?;

        let dest_rect = Rect::new(
            rect.x as i32,
            rect.y as i32,
            rect.width as u32,
            rect.height as u32,
        );

        let converted =
            crate::convert_pixels_to_buffer_format(&pixel_data, pixel_format, buffer.pixel_format());

        buffer
            .image_rect(dest_rect, &converted, width)
            .context("Zlib: failed to write pixel data to buffer")?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::ZlibEncoder;
    use flate2::{Compress, Compression, FlushCompress};
    use rfb_pixelbuffer::{ManagedPixelBuffer, PixelBuffer};
    use std::io::Write;

    fn test_pixel_format() -> PixelFormat {
        PixelFormat {
            bits_per_pixel: 32,
            depth: 24,
            big_endian: 0,
            true_color: 1,
            red_max: 255,
            green_max: 255,
            blue_max: 255,
            red_shift: 16,
            green_shift: 8,
            blue_shift: 0,
        }
    }

    fn reader_for_payload(payload: &[u8]) -> ByteReader<std::vec::IntoIter<Vec<u8>>> {
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(payload).unwrap();
        let compressed = encoder.finish().unwrap();

        let mut bytes = Vec::new();
        bytes.extend_from_slice(&(compressed.len() as u32).to_be_bytes());
        bytes.extend_from_slice(&compressed);
        ByteReader::new(vec![bytes].into_iter())
    }

    fn reader_for_chunk(chunk: &[u8]) -> ByteReader<std::vec::IntoIter<Vec<u8>>> {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&(chunk.len() as u32).to_be_bytes());
        bytes.extend_from_slice(chunk);
        ByteReader::new(vec![bytes].into_iter())
    }

    /// Compresses each payload in turn through one ongoing deflate stream,
    /// `Z_SYNC_FLUSH`ing after every payload but the last so each chunk is
    /// independently decodable - the same framing the server uses to split
    /// one continuous zlib stream across separate rectangles.
    fn compress_as_continuation(payloads: &[&[u8]]) -> Vec<Vec<u8>> {
        let mut compressor = Compress::new(Compression::default(), true);
        payloads
            .iter()
            .enumerate()
            .map(|(i, payload)| {
                let flush = if i + 1 == payloads.len() {
                    FlushCompress::Finish
                } else {
                    FlushCompress::Sync
                };
                let mut out = Vec::new();
                compressor.compress_vec(payload, &mut out, flush).unwrap();
                out
            })
            .collect()
    }

    #[test]
    fn decoder_type() {
        let decoder = ZlibDecoder::default();
        assert_eq!(decoder.encoding_type(), ENCODING_ZLIB);
    }

    #[test]
    fn decode_single_pixel() {
        let decoder = ZlibDecoder::default();
        let pf = test_pixel_format();
        let pb_pf = rfb_pixelbuffer::PixelFormat::rgb888();
        let mut buffer = ManagedPixelBuffer::new(10, 10, pb_pf);

        let rect = Rectangle {
            x: 2,
            y: 2,
            width: 1,
            height: 1,
            encoding: ENCODING_ZLIB,
        };

        let mut stream = reader_for_payload(&[0x00, 0x00, 0xFF, 0xFF]);

        decoder.decode(&mut stream, &rect, &pf, &mut buffer).unwrap();

        let mut stride = 0;
        let data = buffer.get_buffer(Rect::new(2, 2, 1, 1), &mut stride).unwrap();
        assert_eq!(&data[0..4], &[0x00, 0x00, 0xFF, 0xFF]);
    }

    #[test]
    fn decode_rectangle() {
        let decoder = ZlibDecoder::default();
        let pf = test_pixel_format();
        let pb_pf = rfb_pixelbuffer::PixelFormat::rgb888();
        let mut buffer = ManagedPixelBuffer::new(4, 4, pb_pf);

        let rect = Rectangle {
            x: 0,
            y: 0,
            width: 2,
            height: 2,
            encoding: ENCODING_ZLIB,
        };

        let payload = vec![
            0xFF, 0x00, 0x00, 0x00, 0x00, 0xFF, 0x00, 0x00, 0x00, 0x00, 0xFF, 0x00, 0xFF, 0xFF,
            0xFF, 0x00,
        ];
        let mut stream = reader_for_payload(&payload);

        decoder.decode(&mut stream, &rect, &pf, &mut buffer).unwrap();

        let mut stride = 0;
        let data = buffer.get_buffer(Rect::new(0, 0, 2, 2), &mut stride).unwrap();
        assert_eq!(&data[0..4], &[0xFF, 0x00, 0x00, 0x00]);
        assert_eq!(&data[4..8], &[0x00, 0xFF, 0x00, 0x00]);
    }

    #[test]
    fn empty_rectangle_consumes_length_prefixed_chunk() {
        let decoder = ZlibDecoder::default();
        let pf = test_pixel_format();
        let pb_pf = rfb_pixelbuffer::PixelFormat::rgb888();
        let mut buffer = ManagedPixelBuffer::new(10, 10, pb_pf);

        let rect = Rectangle {
            x: 0,
            y: 0,
            width: 0,
            height: 5,
            encoding: ENCODING_ZLIB,
        };

        let mut stream = reader_for_payload(&[]);
        decoder.decode(&mut stream, &rect, &pf, &mut buffer).unwrap();
        assert!(stream.at_eof());
    }

    #[test]
    fn stream_persists_across_decode_calls() {
        let decoder = ZlibDecoder::default();
        let pf = test_pixel_format();
        let pb_pf = rfb_pixelbuffer::PixelFormat::rgb888();
        let mut buffer = ManagedPixelBuffer::new(10, 10, pb_pf);
        let rect = Rectangle {
            x: 0,
            y: 0,
            width: 1,
            height: 1,
            encoding: ENCODING_ZLIB,
        };

        let chunks = compress_as_continuation(&[&[0xFF, 0x00, 0x00, 0x00], &[0x00, 0xFF, 0x00, 0x00]]);

        let mut first = reader_for_chunk(&chunks[0]);
        decoder.decode(&mut first, &rect, &pf, &mut buffer).unwrap();

        let mut second = reader_for_chunk(&chunks[1]);
        decoder.decode(&mut second, &rect, &pf, &mut buffer).unwrap();

        let mut stride = 0;
        let data = buffer.get_buffer(Rect::new(0, 0, 1, 1), &mut stride).unwrap();
        assert_eq!(&data[0..4], &[0x00, 0xFF, 0x00, 0x00]);
    }

    #[test]
    fn error_on_truncated_stream() {
        let decoder = ZlibDecoder::default();
        let pf = test_pixel_format();
        let pb_pf = rfb_pixelbuffer::PixelFormat::rgb888();
        let mut buffer = ManagedPixelBuffer::new(10, 10, pb_pf);

        let rect = Rectangle {
            x: 0,
            y: 0,
            width: 2,
            height: 2,
            encoding: ENCODING_ZLIB,
        };

        // Only 4 of the 16 bytes a 2x2 rect needs.
        let mut stream = reader_for_payload(&[0xFF, 0x00, 0x00, 0x00]);
        let result = decoder.decode(&mut stream, &rect, &pf, &mut buffer);
        assert!(result.is_err());
    }
}
