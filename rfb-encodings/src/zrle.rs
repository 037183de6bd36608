//! ZRLE encoding decoder - Zlib-compressed RLE with 64x64 tiling.
//!
//! ZRLE (Zlib Run-Length Encoding, type 16) combines zlib compression with run-length
//! encoding to achieve excellent compression ratios. It divides rectangles into 64x64
//! pixel tiles (smaller at edges) and uses multiple sub-encoding schemes per tile
//! for optimal efficiency.
//!
//! # Wire Format
//!
//! ```text
//! +------------------+
//! | length           |  4 bytes (u32 big-endian) - length of zlib stream
//! +------------------+
//! | zlib_data        |  'length' bytes of zlib-compressed tile data
//! +------------------+
//! ```
//!
//! After zlib decompression, the data contains tiles in row-major order:
//!
//! ```text
//! For each 64x64 tile (smaller at rectangle edges):
//! +------------------+
//! | subencoding      |  1 byte: bit 7 = RLE flag, bits 0-6 = palette size
//! +------------------+
//! | [tile data]      |  Varies by subencoding (see below)
//! +------------------+
//! ```
//!
//! # 64x64 Tile Grid
//!
//! ```text
//! Rectangle divided into 64x64 tiles:
//!
//!     0    64   128  192  ...
//!   0 +----+----+----+----+
//!     |    |    |    |    |
//!  64 +----+----+----+----+
//!     |    |    |    |    |
//! 128 +----+----+----+----+
//!     |    |    | edge    |
//! ... +----+----+----+----+
//!          edge  tiles
//! ```
//!
//! # Subencoding Byte
//!
//! - **Bit 7**: RLE flag (0 = packed/raw, 1 = RLE)
//! - **Bits 0-6**: Palette size (0-127)
//!   - 0 = no palette (raw or plain RLE)
//!   - 1 = solid tile (single color fill)
//!   - 2-127 = palette with N colors
//!
//! # Seven Tile Modes
//!
//! 1. **Solid (palSize=1)**: Single pixel fills entire tile
//! 2. **Raw (palSize=0, RLE=0)**: Uncompressed pixel data in raster order
//! 3. **Plain RLE (palSize=0, RLE=1)**: RLE without palette
//! 4. **Packed Palette (palSize=2-16, RLE=0)**: 1/2/4-bit indices into palette
//! 5. **Byte-indexed Palette (palSize=17-127, RLE=0)**: 8-bit palette indices
//! 6. **Palette RLE (palSize=2-127, RLE=1)**: RLE with palette indices
//!
//! # CPixel Optimization (24-bit)
//!
//! When pixel format is 32bpp with depth <= 24, ZRLE transmits only 3 bytes per pixel:
//!
//! - **isLowCPixel** (little-endian): RGB in bytes [0,1,2], byte [3] = 0
//! - **isHighCPixel** (big-endian): RGB in bytes [1,2,3], byte [0] = 0
//!
//! This optimization saves 25% bandwidth for common TrueColor displays.
//!
//! # RLE Length Encoding
//!
//! Run lengths are encoded as 1 + sum of continuation bytes:
//!
//! ```text
//! Length = 1 + byte0 + byte1 + ... + byteN
//!   where bytes = [255, 255, ..., final]
//!   and final < 255 terminates the sequence
//!
//! Examples:
//!   [10]          -> length = 1 + 10 = 11
//!   [255, 100]    -> length = 1 + 255 + 100 = 356
//!   [255, 255, 0] -> length = 1 + 255 + 255 + 0 = 511
//! ```
//!
//! # Packed Palette Bit Order
//!
//! Indices are packed MSB-first within each byte.
//!
//! # Session-persistent Zlib Stream
//!
//! ZRLE's zlib stream is continuous for the entire session, not just one
//! FramebufferUpdate or one rectangle: only the very first ZRLE rectangle
//! ever seen on a connection starts with a zlib header (0x78); every
//! rectangle after that is raw deflate continuation data against the same
//! inflater. `ZRLEDecoder` must therefore be kept alive (and never reset)
//! for the lifetime of the session being replayed.

use crate::{Decoder, MutablePixelBuffer, PixelFormat, Rectangle, ENCODING_ZRLE};
use anyhow::{anyhow, bail, Context, Result};
use flate2::{Decompress, FlushDecompress};
use rfb_capture::reader::{ByteReader, ChunkSource};
use rfb_common::Rect;
use std::sync::Mutex;

/// ZRLE tile size (64x64 pixels, smaller at rectangle edges).
const TILE_SIZE: u16 = 64;

/// Maximum valid palette size (bit 7 reserved for RLE flag).
const MAX_PALETTE_SIZE: u8 = 127;

/// Decoder for ZRLE encoding.
///
/// This encoding uses zlib compression combined with run-length encoding and palette
/// modes to achieve excellent compression ratios. Rectangles are divided into 64x64
/// tiles, with each tile using one of seven sub-encodings optimized for different
/// content types.
///
/// # Zlib Stream
///
/// The zlib inflater is a member of this decoder and persists across every
/// rectangle decoded through it for as long as it lives - one instance per
/// replayed session, never reset, mirroring the server's own single
/// `rdr::ZlibInStream` for the connection's lifetime.
pub struct ZRLEDecoder {
    /// Zlib decompressor state, persistent across every rectangle this
    /// decoder ever processes. Uses a `Mutex` for interior mutability since
    /// `Decoder::decode` takes `&self`.
    inflater: Mutex<Decompress>,
}

impl Default for ZRLEDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl ZRLEDecoder {
    /// Create a new ZRLE decoder with a fresh zlib inflater.
    pub fn new() -> Self {
        Self {
            inflater: Mutex::new(Decompress::new(true)), // true = zlib wrapper
        }
    }
}

impl Decoder for ZRLEDecoder {
    fn encoding_type(&self) -> i32 {
        ENCODING_ZRLE
    }

    fn decode<S: ChunkSource>(
        &self,
        stream: &mut ByteReader<S>,
        rect: &Rectangle,
        pixel_format: &PixelFormat,
        buffer: &mut dyn MutablePixelBuffer,
    ) -> Result<()> {
        // Empty rectangle - nothing to decode
        if rect.width == 0 || rect.height == 0 {
            return Ok(());
        }

        let bytes_per_pixel = pixel_format.bits_per_pixel / 8;
        if bytes_per_pixel == 0 || bytes_per_pixel > 4 {
            bail!(
                "ZRLE: invalid bits_per_pixel {} (bytes_per_pixel must be 1-4)",
                pixel_format.bits_per_pixel
            );
        }

        // Read compressed data length (u32 big-endian)
        let compressed_len = stream
            .read_u32()
            .context("ZRLE: failed to read compressed data length")?;

        // Read compressed data
        let compressed_data = stream
            .read(compressed_len as usize)
            .context("ZRLE: failed to read compressed data")?;

        // Decompress the zlib stream
        let decompressed = self
            .decompress_zlib(&compressed_data)
            .context("ZRLE: zlib decompression failed")?;

        // Decode tiles from decompressed data
        let mut cursor = DataCursor::new(&decompressed);
        self.decode_tiles(&mut cursor, rect, pixel_format, buffer, bytes_per_pixel)
            .context("ZRLE: tile decoding failed")?;

        // Verify all data consumed (no trailing bytes)
        let remaining = cursor.remaining();
        if remaining > 0 {
            bail!(
                "ZRLE: {} trailing bytes after decoding rectangle",
                remaining
            );
        }

        Ok(())
    }
}

impl ZRLEDecoder {
    /// Decompress zlib-compressed data using the persistent inflater.
    fn decompress_zlib(&self, compressed: &[u8]) -> Result<Vec<u8>> {
        let mut decompressed = Vec::new();
        let mut inflater = self.inflater.lock().unwrap();

        let mut in_pos = 0;
        let mut out_buf = vec![0u8; 64 * 1024]; // 64KB output buffer

        loop {
            let before_in = inflater.total_in();
            let before_out = inflater.total_out();

            let status = inflater
                .decompress(&compressed[in_pos..], &mut out_buf, FlushDecompress::Sync)
                .with_context(|| {
                    format!(
                        "ZRLE: zlib decompression failed (input {} bytes at offset {})",
                        compressed.len(),
                        in_pos,
                    )
                })?;

            let consumed = (inflater.total_in() - before_in) as usize;
            let produced = (inflater.total_out() - before_out) as usize;

            in_pos += consumed;
            decompressed.extend_from_slice(&out_buf[..produced]);

            if in_pos >= compressed.len() {
                break;
            }

            match status {
                flate2::Status::Ok => continue,
                flate2::Status::BufError => continue,
                flate2::Status::StreamEnd => {
                    tracing::warn!(
                        "ZRLE: zlib stream ended early, consumed {}/{} bytes",
                        in_pos,
                        compressed.len()
                    );
                    break;
                }
            }
        }

        Ok(decompressed)
    }

    /// Decode all tiles in the rectangle from decompressed data.
    fn decode_tiles(
        &self,
        cursor: &mut DataCursor,
        rect: &Rectangle,
        pixel_format: &PixelFormat,
        buffer: &mut dyn MutablePixelBuffer,
        bytes_per_pixel: u8,
    ) -> Result<()> {
        let cpixel_mode = CPixelMode::detect(pixel_format, bytes_per_pixel);

        let mut ty = 0u16;
        while ty < rect.height {
            let tile_h = std::cmp::min(TILE_SIZE, rect.height - ty);

            let mut tx = 0u16;
            while tx < rect.width {
                let tile_w = std::cmp::min(TILE_SIZE, rect.width - tx);

                let abs_x = rect
                    .x
                    .checked_add(tx)
                    .ok_or_else(|| anyhow!("ZRLE: tile x coordinate overflows"))?;
                let abs_y = rect
                    .y
                    .checked_add(ty)
                    .ok_or_else(|| anyhow!("ZRLE: tile y coordinate overflows"))?;

                self.decode_tile(
                    cursor,
                    (abs_x, abs_y),
                    (tile_w, tile_h),
                    pixel_format,
                    buffer,
                    bytes_per_pixel,
                    &cpixel_mode,
                )
                .with_context(|| {
                    format!(
                        "ZRLE: failed to decode tile at ({}, {}) size {}x{}",
                        tx, ty, tile_w, tile_h
                    )
                })?;

                tx += TILE_SIZE;
            }
            ty += TILE_SIZE;
        }

        Ok(())
    }

    /// Decode a single 64x64 (or smaller) tile.
    #[allow(clippy::too_many_arguments)]
    fn decode_tile(
        &self,
        cursor: &mut DataCursor,
        tile_pos: (u16, u16),
        tile_size: (u16, u16),
        pixel_format: &PixelFormat,
        buffer: &mut dyn MutablePixelBuffer,
        bytes_per_pixel: u8,
        cpixel_mode: &CPixelMode,
    ) -> Result<()> {
        let subencoding = cursor
            .read_u8()
            .context("failed to read subencoding byte")?;
        let rle = (subencoding & 0x80) != 0;
        let pal_size = (subencoding & 0x7F) as usize;

        if pal_size as u8 > MAX_PALETTE_SIZE {
            bail!(
                "invalid palette size: {} (max {})",
                pal_size,
                MAX_PALETTE_SIZE
            );
        }

        match (pal_size, rle) {
            (1, _) => self.decode_solid_tile(
                cursor,
                tile_pos,
                tile_size,
                pixel_format,
                buffer,
                bytes_per_pixel,
                cpixel_mode,
            ),
            (0, false) => self.decode_raw_tile(
                cursor,
                tile_pos,
                tile_size,
                pixel_format,
                buffer,
                bytes_per_pixel,
                cpixel_mode,
            ),
            (0, true) => self.decode_plain_rle_tile(
                cursor,
                tile_pos,
                tile_size,
                pixel_format,
                buffer,
                bytes_per_pixel,
                cpixel_mode,
            ),
            (2..=16, false) => self.decode_packed_palette_tile(
                cursor,
                tile_pos,
                tile_size,
                pixel_format,
                buffer,
                pal_size,
                bytes_per_pixel,
                cpixel_mode,
            ),
            (17..=127, false) => self.decode_byte_palette_tile(
                cursor,
                tile_pos,
                tile_size,
                pixel_format,
                buffer,
                pal_size,
                bytes_per_pixel,
                cpixel_mode,
            ),
            (2..=127, true) => self.decode_palette_rle_tile(
                cursor,
                tile_pos,
                tile_size,
                pixel_format,
                buffer,
                pal_size,
                bytes_per_pixel,
                cpixel_mode,
            ),
            _ => bail!(
                "ZRLE: invalid subencoding combination (pal_size={}, rle={})",
                pal_size,
                rle
            ),
        }
    }

    /// Mode 1: Decode solid tile (single color fill).
    #[allow(clippy::too_many_arguments)]
    fn decode_solid_tile(
        &self,
        cursor: &mut DataCursor,
        tile_pos: (u16, u16),
        tile_size: (u16, u16),
        pixel_format: &PixelFormat,
        buffer: &mut dyn MutablePixelBuffer,
        bytes_per_pixel: u8,
        cpixel_mode: &CPixelMode,
    ) -> Result<()> {
        let (tile_x, tile_y) = tile_pos;
        let (tile_w, tile_h) = tile_size;

        let mut pixel = read_cpixel(cursor, bytes_per_pixel, cpixel_mode)?;

        if bytes_per_pixel == 4 {
            pixel.bytes[3] = 0xFF;
        }

        let pixel_bytes = pixel_to_buffer_format(&pixel, pixel_format, bytes_per_pixel, buffer)?;

        let tile_rect = Rect::new(tile_x as i32, tile_y as i32, tile_w as u32, tile_h as u32);
        buffer.fill_rect(tile_rect, &pixel_bytes)?;

        Ok(())
    }

    /// Mode 2: Decode raw tile (uncompressed pixel data).
    #[allow(clippy::too_many_arguments)]
    fn decode_raw_tile(
        &self,
        cursor: &mut DataCursor,
        tile_pos: (u16, u16),
        tile_size: (u16, u16),
        pixel_format: &PixelFormat,
        buffer: &mut dyn MutablePixelBuffer,
        bytes_per_pixel: u8,
        cpixel_mode: &CPixelMode,
    ) -> Result<()> {
        let (tile_w, tile_h) = tile_size;

        let tile_area = (tile_w as usize)
            .checked_mul(tile_h as usize)
            .ok_or_else(|| anyhow!("tile area overflow"))?;

        let mut pixels = Vec::with_capacity(tile_area);
        for _ in 0..tile_area {
            let pixel = read_cpixel(cursor, bytes_per_pixel, cpixel_mode)?;
            pixels.push(pixel);
        }

        write_pixels_to_buffer(
            &pixels,
            tile_pos,
            tile_size,
            pixel_format,
            buffer,
            bytes_per_pixel,
        )?;

        Ok(())
    }

    /// Mode 3: Decode plain RLE tile (RLE without palette).
    #[allow(clippy::too_many_arguments)]
    fn decode_plain_rle_tile(
        &self,
        cursor: &mut DataCursor,
        tile_pos: (u16, u16),
        tile_size: (u16, u16),
        pixel_format: &PixelFormat,
        buffer: &mut dyn MutablePixelBuffer,
        bytes_per_pixel: u8,
        cpixel_mode: &CPixelMode,
    ) -> Result<()> {
        let (tile_w, tile_h) = tile_size;
        let tile_area = (tile_w as usize)
            .checked_mul(tile_h as usize)
            .ok_or_else(|| anyhow!("tile area overflow"))?;

        let mut pixels = Vec::with_capacity(tile_area);
        let mut count = 0;

        while count < tile_area {
            let pixel = read_cpixel(cursor, bytes_per_pixel, cpixel_mode)?;
            let run_len = read_rle_length(cursor)?;

            if count + run_len > tile_area {
                bail!(
                    "RLE run length {} exceeds remaining pixels {} (tile area {})",
                    run_len,
                    tile_area - count,
                    tile_area
                );
            }

            for _ in 0..run_len {
                pixels.push(pixel.clone());
            }
            count += run_len;
        }

        write_pixels_to_buffer(
            &pixels,
            tile_pos,
            tile_size,
            pixel_format,
            buffer,
            bytes_per_pixel,
        )?;

        Ok(())
    }

    /// Mode 4: Decode packed palette tile (1/2/4-bit indices).
    #[allow(clippy::too_many_arguments)]
    fn decode_packed_palette_tile(
        &self,
        cursor: &mut DataCursor,
        tile_pos: (u16, u16),
        tile_size: (u16, u16),
        pixel_format: &PixelFormat,
        buffer: &mut dyn MutablePixelBuffer,
        pal_size: usize,
        bytes_per_pixel: u8,
        cpixel_mode: &CPixelMode,
    ) -> Result<()> {
        let (tile_w, tile_h) = tile_size;

        let palette = read_palette(cursor, pal_size, bytes_per_pixel, cpixel_mode)?;

        let bpp = if pal_size <= 2 {
            1
        } else if pal_size <= 4 {
            2
        } else {
            4 // pal_size <= 16
        };

        let tile_area = (tile_w as usize)
            .checked_mul(tile_h as usize)
            .ok_or_else(|| anyhow!("tile area overflow"))?;
        let mut pixels = Vec::with_capacity(tile_area);

        for _ in 0..tile_h {
            let row_bits = (tile_w as usize)
                .checked_mul(bpp)
                .ok_or_else(|| anyhow!("row bits overflow"))?;
            let row_bytes = row_bits.div_ceil(8);

            let packed = cursor
                .read_exact(row_bytes)
                .context("failed to read packed palette row")?;

            let mut bit_offset = 0;
            for _ in 0..tile_w {
                let byte_idx = bit_offset / 8;
                let bit_idx = 7 - (bit_offset % 8);
                let mask = ((1 << bpp) - 1) << (bit_idx - (bpp - 1));
                let index = ((packed[byte_idx] & mask) >> (bit_idx - (bpp - 1))) as usize;

                if index >= pal_size {
                    bail!(
                        "packed palette index {} out of range (pal_size {})",
                        index,
                        pal_size
                    );
                }

                pixels.push(palette[index].clone());
                bit_offset += bpp;
            }
        }

        write_pixels_to_buffer(
            &pixels,
            tile_pos,
            tile_size,
            pixel_format,
            buffer,
            bytes_per_pixel,
        )?;

        Ok(())
    }

    /// Mode 5: Decode byte-indexed palette tile (8-bit indices).
    #[allow(clippy::too_many_arguments)]
    fn decode_byte_palette_tile(
        &self,
        cursor: &mut DataCursor,
        tile_pos: (u16, u16),
        tile_size: (u16, u16),
        pixel_format: &PixelFormat,
        buffer: &mut dyn MutablePixelBuffer,
        pal_size: usize,
        bytes_per_pixel: u8,
        cpixel_mode: &CPixelMode,
    ) -> Result<()> {
        let (tile_w, tile_h) = tile_size;
        let tile_area = (tile_w as usize)
            .checked_mul(tile_h as usize)
            .ok_or_else(|| anyhow!("tile area overflow"))?;

        let palette = read_palette(cursor, pal_size, bytes_per_pixel, cpixel_mode)?;

        let indices = cursor
            .read_exact(tile_area)
            .context("failed to read byte palette indices")?;

        let mut pixels = Vec::with_capacity(tile_area);
        for &index in indices {
            let idx = index as usize;
            if idx >= pal_size {
                bail!(
                    "byte palette index {} out of range (pal_size {})",
                    idx,
                    pal_size
                );
            }
            pixels.push(palette[idx].clone());
        }

        write_pixels_to_buffer(
            &pixels,
            tile_pos,
            tile_size,
            pixel_format,
            buffer,
            bytes_per_pixel,
        )?;

        Ok(())
    }

    /// Mode 6: Decode palette RLE tile.
    #[allow(clippy::too_many_arguments)]
    fn decode_palette_rle_tile(
        &self,
        cursor: &mut DataCursor,
        tile_pos: (u16, u16),
        tile_size: (u16, u16),
        pixel_format: &PixelFormat,
        buffer: &mut dyn MutablePixelBuffer,
        pal_size: usize,
        bytes_per_pixel: u8,
        cpixel_mode: &CPixelMode,
    ) -> Result<()> {
        let (tile_w, tile_h) = tile_size;
        let tile_area = (tile_w as usize)
            .checked_mul(tile_h as usize)
            .ok_or_else(|| anyhow!("tile area overflow"))?;

        let palette = read_palette(cursor, pal_size, bytes_per_pixel, cpixel_mode)?;

        let mut pixels = Vec::with_capacity(tile_area);
        let mut count = 0;

        while count < tile_area {
            let code = cursor
                .read_u8()
                .context("failed to read palette RLE code")?;

            let (index, run_len) = if (code & 0x80) == 0 {
                (code as usize, 1)
            } else {
                let index = (code & 0x7F) as usize;
                let run_len = read_rle_length(cursor)?;
                (index, run_len)
            };

            if index >= pal_size {
                bail!(
                    "palette RLE index {} out of range (pal_size {})",
                    index,
                    pal_size
                );
            }

            if count + run_len > tile_area {
                bail!(
                    "RLE run length {} exceeds remaining pixels {} (tile area {})",
                    run_len,
                    tile_area - count,
                    tile_area
                );
            }

            for _ in 0..run_len {
                pixels.push(palette[index].clone());
            }
            count += run_len;
        }

        write_pixels_to_buffer(
            &pixels,
            tile_pos,
            tile_size,
            pixel_format,
            buffer,
            bytes_per_pixel,
        )?;

        Ok(())
    }
}

/// Byte cursor for reading from decompressed data.
struct DataCursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> DataCursor<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    fn read_u8(&mut self) -> Result<u8> {
        if self.pos >= self.data.len() {
            bail!("cursor EOF: need 1 byte, have {}", self.remaining());
        }
        let val = self.data[self.pos];
        self.pos += 1;
        Ok(val)
    }

    fn read_exact(&mut self, count: usize) -> Result<&'a [u8]> {
        if self.pos + count > self.data.len() {
            bail!(
                "cursor EOF: need {} bytes, have {}",
                count,
                self.remaining()
            );
        }
        let slice = &self.data[self.pos..self.pos + count];
        self.pos += count;
        Ok(slice)
    }
}

/// CPixel optimization mode for 24-bit pixels in 32bpp format.
#[derive(Debug, Clone, Copy)]
enum CPixelMode {
    /// No optimization: use full bytes_per_pixel
    None,
    /// Little-endian 32bpp, depth <= 24: RGB in bytes [0,1,2]
    LowC,
    /// Big-endian 32bpp, depth <= 24: RGB in bytes [1,2,3]
    HighC,
}

impl CPixelMode {
    fn detect(pf: &PixelFormat, bpp: u8) -> Self {
        if bpp != 4 || pf.depth > 24 {
            return Self::None;
        }

        let r = ((0xFFFFu32 * pf.red_max as u32) / 0xFFFF) << pf.red_shift;
        let g = ((0xFFFFu32 * pf.green_max as u32) / 0xFFFF) << pf.green_shift;
        let b = ((0xFFFFu32 * pf.blue_max as u32) / 0xFFFF) << pf.blue_shift;
        let max_pixel = r | g | b;

        let fits_low_3 = max_pixel < (1 << 24);
        let fits_high_3 = (max_pixel & 0xFF) == 0;

        if fits_low_3 && pf.big_endian == 0 {
            Self::LowC
        } else if fits_high_3 && pf.big_endian != 0 {
            Self::HighC
        } else {
            Self::None
        }
    }
}

/// Internal pixel representation (up to 4 bytes).
#[derive(Debug, Clone)]
struct CPixel {
    bytes: [u8; 4],
}

impl CPixel {
    fn new(bytes: [u8; 4], _len: u8) -> Self {
        Self { bytes }
    }
}

/// Read a single CPixel from the cursor.
fn read_cpixel(cursor: &mut DataCursor, bytes_per_pixel: u8, mode: &CPixelMode) -> Result<CPixel> {
    match mode {
        CPixelMode::LowC => {
            let data = cursor.read_exact(3)?;
            Ok(CPixel::new([data[0], data[1], data[2], 0], 4))
        }
        CPixelMode::HighC => {
            let data = cursor.read_exact(3)?;
            Ok(CPixel::new([0, data[0], data[1], data[2]], 4))
        }
        CPixelMode::None => {
            let data = cursor.read_exact(bytes_per_pixel as usize)?;
            let mut bytes = [0u8; 4];
            bytes[..bytes_per_pixel as usize].copy_from_slice(data);
            Ok(CPixel::new(bytes, bytes_per_pixel))
        }
    }
}

/// Read a palette of CPixels.
fn read_palette(
    cursor: &mut DataCursor,
    pal_size: usize,
    bytes_per_pixel: u8,
    mode: &CPixelMode,
) -> Result<Vec<CPixel>> {
    let mut palette = Vec::with_capacity(pal_size);
    for _ in 0..pal_size {
        palette.push(read_cpixel(cursor, bytes_per_pixel, mode)?);
    }
    Ok(palette)
}

/// Read RLE run length (1 + sum of continuation bytes).
fn read_rle_length(cursor: &mut DataCursor) -> Result<usize> {
    let mut length = 1usize;
    loop {
        let byte = cursor.read_u8().context("failed to read RLE length byte")?;
        length = length
            .checked_add(byte as usize)
            .ok_or_else(|| anyhow!("RLE length overflow"))?;
        if byte != 255 {
            break;
        }
    }
    Ok(length)
}

/// Convert a CPixel, carried in the server's negotiated pixel format, to the
/// buffer's own pixel storage format.
fn pixel_to_buffer_format(
    cpixel: &CPixel,
    pixel_format: &PixelFormat,
    bytes_per_pixel: u8,
    buffer: &dyn MutablePixelBuffer,
) -> Result<Vec<u8>> {
    let raw = &cpixel.bytes[..bytes_per_pixel as usize];
    Ok(crate::convert_pixels_to_buffer_format(
        raw,
        pixel_format,
        buffer.pixel_format(),
    ))
}

/// Write pixels to buffer row by row, converting from the server's
/// negotiated pixel format to the buffer's own storage format.
fn write_pixels_to_buffer(
    pixels: &[CPixel],
    tile_pos: (u16, u16),
    tile_size: (u16, u16),
    pixel_format: &PixelFormat,
    buffer: &mut dyn MutablePixelBuffer,
    bytes_per_pixel: u8,
) -> Result<()> {
    let (tile_x, tile_y) = tile_pos;
    let (tile_w, tile_h) = tile_size;

    let mut raw = Vec::with_capacity(pixels.len() * bytes_per_pixel as usize);
    for pixel in pixels {
        raw.extend_from_slice(&pixel.bytes[..bytes_per_pixel as usize]);
    }

    let pixel_data = crate::convert_pixels_to_buffer_format(&raw, pixel_format, buffer.pixel_format());

    let tile_rect = Rect::new(tile_x as i32, tile_y as i32, tile_w as u32, tile_h as u32);
    buffer.image_rect(tile_rect, &pixel_data, tile_w as usize)?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::ZlibEncoder;
    use flate2::{Compress, Compression, FlushCompress};
    use rfb_pixelbuffer::{ManagedPixelBuffer, PixelBuffer, PixelFormat as PBPixelFormat};
    use std::io::Write;

    fn test_pixel_format() -> PixelFormat {
        PixelFormat {
            bits_per_pixel: 32,
            depth: 32, // depth=32 disables the CPixel 3-byte optimization
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

    fn make_zrle_reader(payload: &[u8]) -> ByteReader<std::vec::IntoIter<Vec<u8>>> {
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(payload).unwrap();
        let compressed = encoder.finish().unwrap();

        let mut result = Vec::new();
        result.extend_from_slice(&(compressed.len() as u32).to_be_bytes());
        result.extend_from_slice(&compressed);
        ByteReader::new(vec![result].into_iter())
    }

    fn zrle_reader_for_chunk(chunk: &[u8]) -> ByteReader<std::vec::IntoIter<Vec<u8>>> {
        let mut result = Vec::new();
        result.extend_from_slice(&(chunk.len() as u32).to_be_bytes());
        result.extend_from_slice(chunk);
        ByteReader::new(vec![result].into_iter())
    }

    /// Compresses each tile payload in turn through one ongoing deflate
    /// stream, `Z_SYNC_FLUSH`ing after every payload but the last, so each
    /// chunk is independently decodable - the framing ZRLE actually uses to
    /// split one continuous zlib stream across separate rectangles.
    fn compress_tiles_as_continuation(payloads: &[&[u8]]) -> Vec<Vec<u8>> {
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
    fn solid_tile_1x1() {
        let decoder = ZRLEDecoder::default();
        let pf = test_pixel_format();

        let tile_data = vec![1, 0xFF, 0x00, 0x00, 0x00];
        let mut stream = make_zrle_reader(&tile_data);
        let rect = Rectangle {
            x: 0,
            y: 0,
            width: 1,
            height: 1,
            encoding: ENCODING_ZRLE,
        };

        let pb_pf = PBPixelFormat::rgb888();
        let mut buffer = ManagedPixelBuffer::new(1, 1, pb_pf);

        decoder.decode(&mut stream, &rect, &pf, &mut buffer).unwrap();

        let mut stride = 0;
        let data = buffer
            .get_buffer(Rect::new(0, 0, 1, 1), &mut stride)
            .unwrap();
        assert_eq!(&data[0..4], &[0xFF, 0x00, 0x00, 0xFF]);
    }

    #[test]
    fn raw_tile_2x2() {
        let decoder = ZRLEDecoder::default();
        let pf = test_pixel_format();

        let tile_data = vec![
            0, 0xFF, 0x00, 0x00, 0x00, 0x00, 0xFF, 0x00, 0x00, 0x00, 0x00, 0xFF, 0x00, 0x00, 0x00,
            0x00, 0x00,
        ];
        let mut stream = make_zrle_reader(&tile_data);
        let rect = Rectangle {
            x: 0,
            y: 0,
            width: 2,
            height: 2,
            encoding: ENCODING_ZRLE,
        };

        let pb_pf = PBPixelFormat::rgb888();
        let mut buffer = ManagedPixelBuffer::new(2, 2, pb_pf);

        decoder.decode(&mut stream, &rect, &pf, &mut buffer).unwrap();

        let mut stride = 0;
        let data = buffer
            .get_buffer(Rect::new(0, 0, 2, 2), &mut stride)
            .unwrap();
        assert_eq!(stride, 2);
        assert_eq!(&data[0..4], &[0xFF, 0x00, 0x00, 0xFF]);
        assert_eq!(&data[4..8], &[0x00, 0xFF, 0x00, 0xFF]);
        assert_eq!(&data[8..12], &[0x00, 0x00, 0xFF, 0xFF]);
        assert_eq!(&data[12..16], &[0x00, 0x00, 0x00, 0xFF]);
    }

    #[test]
    fn plain_rle_with_runs() {
        let decoder = ZRLEDecoder::default();
        let pf = test_pixel_format();

        let tile_data = vec![
            0x80, 0xFF, 0x00, 0x00, 0x00, 4, 0x00, 0x00, 0xFF, 0x00, 3,
        ];
        let mut stream = make_zrle_reader(&tile_data);
        let rect = Rectangle {
            x: 0,
            y: 0,
            width: 3,
            height: 3,
            encoding: ENCODING_ZRLE,
        };

        let pb_pf = PBPixelFormat::rgb888();
        let mut buffer = ManagedPixelBuffer::new(3, 3, pb_pf);

        decoder.decode(&mut stream, &rect, &pf, &mut buffer).unwrap();

        let mut stride = 0;
        let data = buffer
            .get_buffer(Rect::new(0, 0, 3, 3), &mut stride)
            .unwrap();
        for i in 0..5 {
            let offset = i * 4;
            assert_eq!(&data[offset..offset + 3], &[0xFF, 0x00, 0x00]);
        }
        for i in 5..9 {
            let offset = i * 4;
            assert_eq!(&data[offset..offset + 3], &[0x00, 0x00, 0xFF]);
        }
    }

    #[test]
    fn packed_palette_2bit() {
        let decoder = ZRLEDecoder::default();
        let pf = test_pixel_format();

        let tile_data = vec![
            4, 0xFF, 0x00, 0x00, 0x00, 0x00, 0xFF, 0x00, 0x00, 0x00, 0x00, 0xFF, 0x00, 0xFF, 0xFF,
            0xFF, 0x00, 0x1B,
        ];
        let mut stream = make_zrle_reader(&tile_data);
        let rect = Rectangle {
            x: 0,
            y: 0,
            width: 4,
            height: 1,
            encoding: ENCODING_ZRLE,
        };

        let pb_pf = PBPixelFormat::rgb888();
        let mut buffer = ManagedPixelBuffer::new(4, 1, pb_pf);

        decoder.decode(&mut stream, &rect, &pf, &mut buffer).unwrap();

        let mut stride = 0;
        let data = buffer
            .get_buffer(Rect::new(0, 0, 4, 1), &mut stride)
            .unwrap();
        assert_eq!(&data[0..4], &[0xFF, 0x00, 0x00, 0xFF]);
        assert_eq!(&data[4..8], &[0x00, 0xFF, 0x00, 0xFF]);
        assert_eq!(&data[8..12], &[0x00, 0x00, 0xFF, 0xFF]);
        assert_eq!(&data[12..16], &[0xFF, 0xFF, 0xFF, 0xFF]);
    }

    #[test]
    fn byte_palette() {
        let decoder = ZRLEDecoder::default();
        let pf = test_pixel_format();

        let mut tile_data = vec![17];
        tile_data.extend_from_slice(&[0xFF, 0x00, 0x00, 0x00]);
        tile_data.extend_from_slice(&[0x00, 0xFF, 0x00, 0x00]);
        for _ in 0..15 {
            tile_data.extend_from_slice(&[0x00, 0x00, 0x00, 0x00]);
        }
        tile_data.extend_from_slice(&[0, 1]);

        let mut stream = make_zrle_reader(&tile_data);
        let rect = Rectangle {
            x: 0,
            y: 0,
            width: 2,
            height: 1,
            encoding: ENCODING_ZRLE,
        };

        let pb_pf = PBPixelFormat::rgb888();
        let mut buffer = ManagedPixelBuffer::new(2, 1, pb_pf);

        decoder.decode(&mut stream, &rect, &pf, &mut buffer).unwrap();

        let mut stride = 0;
        let data = buffer
            .get_buffer(Rect::new(0, 0, 2, 1), &mut stride)
            .unwrap();
        assert_eq!(&data[0..4], &[0xFF, 0x00, 0x00, 0xFF]);
        assert_eq!(&data[4..8], &[0x00, 0xFF, 0x00, 0xFF]);
    }

    #[test]
    fn palette_rle() {
        let decoder = ZRLEDecoder::default();
        let pf = test_pixel_format();

        let tile_data = vec![
            0x82, 0xFF, 0x00, 0x00, 0x00, 0x00, 0x00, 0xFF, 0x00, 0, 0x81, 3, 0,
        ];
        let mut stream = make_zrle_reader(&tile_data);
        let rect = Rectangle {
            x: 0,
            y: 0,
            width: 6,
            height: 1,
            encoding: ENCODING_ZRLE,
        };

        let pb_pf = PBPixelFormat::rgb888();
        let mut buffer = ManagedPixelBuffer::new(6, 1, pb_pf);

        decoder.decode(&mut stream, &rect, &pf, &mut buffer).unwrap();

        let mut stride = 0;
        let data = buffer
            .get_buffer(Rect::new(0, 0, 6, 1), &mut stride)
            .unwrap();
        assert_eq!(&data[0..4], &[0xFF, 0x00, 0x00, 0xFF]);
        assert_eq!(&data[4..8], &[0x00, 0x00, 0xFF, 0xFF]);
        assert_eq!(&data[8..12], &[0x00, 0x00, 0xFF, 0xFF]);
        assert_eq!(&data[12..16], &[0x00, 0x00, 0xFF, 0xFF]);
        assert_eq!(&data[16..20], &[0x00, 0x00, 0xFF, 0xFF]);
        assert_eq!(&data[20..24], &[0xFF, 0x00, 0x00, 0xFF]);
    }

    #[test]
    fn empty_rectangle() {
        let decoder = ZRLEDecoder::default();
        let pf = test_pixel_format();
        let pb_pf = PBPixelFormat::rgb888();
        let mut buffer = ManagedPixelBuffer::new(10, 10, pb_pf);

        let mut stream = make_zrle_reader(&[]);
        let rect = Rectangle {
            x: 0,
            y: 0,
            width: 0,
            height: 10,
            encoding: ENCODING_ZRLE,
        };

        decoder.decode(&mut stream, &rect, &pf, &mut buffer).unwrap();
    }

    #[test]
    fn error_eof_reading_pixel() {
        let decoder = ZRLEDecoder::default();
        let pf = test_pixel_format();

        let tile_data = vec![128];
        let mut stream = make_zrle_reader(&tile_data);
        let rect = Rectangle {
            x: 0,
            y: 0,
            width: 1,
            height: 1,
            encoding: ENCODING_ZRLE,
        };

        let pb_pf = PBPixelFormat::rgb888();
        let mut buffer = ManagedPixelBuffer::new(1, 1, pb_pf);

        let result = decoder.decode(&mut stream, &rect, &pf, &mut buffer);
        assert!(result.is_err());
    }

    #[test]
    fn error_rle_run_exceeds_tile() {
        let decoder = ZRLEDecoder::default();
        let pf = test_pixel_format();

        let tile_data = vec![0x80, 0xFF, 0x00, 0x00, 0x00, 4];
        let mut stream = make_zrle_reader(&tile_data);
        let rect = Rectangle {
            x: 0,
            y: 0,
            width: 1,
            height: 1,
            encoding: ENCODING_ZRLE,
        };

        let pb_pf = PBPixelFormat::rgb888();
        let mut buffer = ManagedPixelBuffer::new(1, 1, pb_pf);

        let result = decoder.decode(&mut stream, &rect, &pf, &mut buffer);
        assert!(result.is_err());
        let err_str = format!("{:?}", result.unwrap_err());
        assert!(err_str.contains("exceeds remaining pixels"));
    }

    #[test]
    fn multiple_tiles() {
        let decoder = ZRLEDecoder::default();
        let pf = test_pixel_format();

        let mut tile_data = Vec::new();
        tile_data.push(1);
        tile_data.extend_from_slice(&[0xFF, 0x00, 0x00, 0x00]);
        tile_data.push(1);
        tile_data.extend_from_slice(&[0x00, 0x00, 0xFF, 0x00]);

        let mut stream = make_zrle_reader(&tile_data);
        let rect = Rectangle {
            x: 0,
            y: 0,
            width: 128,
            height: 1,
            encoding: ENCODING_ZRLE,
        };

        let pb_pf = PBPixelFormat::rgb888();
        let mut buffer = ManagedPixelBuffer::new(128, 1, pb_pf);

        decoder.decode(&mut stream, &rect, &pf, &mut buffer).unwrap();

        let mut stride = 0;
        let data = buffer
            .get_buffer(Rect::new(0, 0, 128, 1), &mut stride)
            .unwrap();
        for i in 0..64 {
            let offset = i * 4;
            assert_eq!(&data[offset..offset + 3], &[0xFF, 0x00, 0x00]);
        }
        for i in 64..128 {
            let offset = i * 4;
            assert_eq!(&data[offset..offset + 3], &[0x00, 0x00, 0xFF]);
        }
    }

    #[test]
    fn zlib_stream_persists_across_decode_calls() {
        // Two decode() calls on the same decoder instance, fed consecutive
        // Z_SYNC_FLUSH-delimited chunks of one ongoing deflate stream - no
        // chunk after the first carries its own zlib header, so this only
        // passes if the inflater is shared and never reset between calls.
        let decoder = ZRLEDecoder::default();
        let pf = test_pixel_format();
        let pb_pf = PBPixelFormat::rgb888();
        let mut buffer = ManagedPixelBuffer::new(1, 1, pb_pf);
        let rect = Rectangle {
            x: 0,
            y: 0,
            width: 1,
            height: 1,
            encoding: ENCODING_ZRLE,
        };

        let chunks = compress_tiles_as_continuation(&[
            &[1, 0xFF, 0x00, 0x00, 0x00],
            &[1, 0x00, 0x00, 0xFF, 0x00],
        ]);

        let mut first = zrle_reader_for_chunk(&chunks[0]);
        decoder.decode(&mut first, &rect, &pf, &mut buffer).unwrap();

        let mut second = zrle_reader_for_chunk(&chunks[1]);
        decoder.decode(&mut second, &rect, &pf, &mut buffer).unwrap();

        let mut stride = 0;
        let data = buffer
            .get_buffer(Rect::new(0, 0, 1, 1), &mut stride)
            .unwrap();
        assert_eq!(&data[0..4], &[0x00, 0x00, 0xFF, 0xFF]);
    }
}
