//! Seekable byte-stream reader over a lazily produced sequence of payload chunks.
//!
//! Unlike the live-socket [`RfbInStream`](https://docs.rs/rfb-protocol) this reader
//! never discards bytes once they have been pulled from the source: every byte it
//! has ever seen stays in `buffer`, so seeking backward is always legal and cheap.
//! Seeking forward, or peeking past what has been buffered so far, pulls additional
//! chunks from the source on demand.

use std::io::{Error, ErrorKind, Result, SeekFrom};

/// A source of payload chunks, pulled lazily as the reader needs more bytes.
///
/// This is deliberately just an `Iterator`; a [`DirectionalStream`](crate::DirectionalStream)
/// adapts its packet queue into one.
pub trait ChunkSource: Iterator<Item = Vec<u8>> {}
impl<T: Iterator<Item = Vec<u8>>> ChunkSource for T {}

/// A seek-capable, peek-capable reader over the concatenation of a chunk source.
pub struct ByteReader<S: ChunkSource> {
    source: Option<S>,
    buffer: Vec<u8>,
    pos: usize,
}

impl<S: ChunkSource> ByteReader<S> {
    /// Create a reader that will pull chunks from `source` as needed.
    pub fn new(source: S) -> Self {
        Self {
            source: Some(source),
            buffer: Vec::new(),
            pos: 0,
        }
    }

    /// Pull chunks until at least `n` bytes are available from the current
    /// position, or the source is exhausted.
    fn fill(&mut self, n: usize) {
        while self.buffer.len() - self.pos.min(self.buffer.len()) < n {
            let Some(source) = self.source.as_mut() else {
                break;
            };
            match source.next() {
                Some(chunk) => self.buffer.extend_from_slice(&chunk),
                None => {
                    self.source = None;
                    break;
                }
            }
        }
    }

    /// Pull every remaining chunk from the source.
    fn drain(&mut self) {
        if let Some(source) = self.source.as_mut() {
            for chunk in source.by_ref() {
                self.buffer.extend_from_slice(&chunk);
            }
            self.source = None;
        }
    }

    /// Current read position, as a byte offset from the start of the stream.
    pub fn tell(&self) -> usize {
        self.pos
    }

    /// Read up to `n` bytes without advancing the position.
    pub fn peek(&mut self, n: usize) -> &[u8] {
        self.fill(n);
        let end = (self.pos + n).min(self.buffer.len());
        &self.buffer[self.pos..end]
    }

    /// Read exactly `n` bytes, advancing the position. Errors with
    /// `UnexpectedEof` if the source is exhausted before `n` bytes are
    /// available.
    pub fn read(&mut self, n: usize) -> Result<Vec<u8>> {
        self.fill(n);
        let available = self.buffer.len() - self.pos;
        if available < n {
            return Err(Error::new(
                ErrorKind::UnexpectedEof,
                format!("expected {n} bytes, got {available}"),
            ));
        }
        let out = self.buffer[self.pos..self.pos + n].to_vec();
        self.pos += n;
        Ok(out)
    }

    /// Read and discard `n` bytes.
    pub fn skip(&mut self, n: usize) -> Result<()> {
        self.read(n).map(|_| ())
    }

    /// Read every remaining byte, draining the source fully.
    pub fn read_all(&mut self) -> Vec<u8> {
        self.drain();
        let out = self.buffer[self.pos..].to_vec();
        self.pos = self.buffer.len();
        out
    }

    /// Read a single big-endian `u8`.
    pub fn read_u8(&mut self) -> Result<u8> {
        Ok(self.read(1)?[0])
    }

    /// Read a big-endian `u16`.
    pub fn read_u16(&mut self) -> Result<u16> {
        let b = self.read(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    /// Read a big-endian `u32`.
    pub fn read_u32(&mut self) -> Result<u32> {
        let b = self.read(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    /// Read a big-endian `i32`.
    pub fn read_i32(&mut self) -> Result<i32> {
        let b = self.read(4)?;
        Ok(i32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    /// Whether the reader has reached the end of the source (no more bytes
    /// are currently peekable).
    pub fn at_eof(&mut self) -> bool {
        self.peek(1).is_empty()
    }

    /// Seek within the stream. Forward seeks pull more chunks from the
    /// source as needed; `SeekFrom::End` drains the source fully to resolve
    /// the absolute position. Negative offsets are clamped at 0.
    pub fn seek(&mut self, pos: SeekFrom) -> Result<usize> {
        let target = match pos {
            SeekFrom::Start(offset) => offset as i64,
            SeekFrom::Current(offset) => self.pos as i64 + offset,
            SeekFrom::End(offset) => {
                self.drain();
                self.buffer.len() as i64 + offset
            }
        };
        let target = target.max(0) as usize;
        if target > self.buffer.len() {
            self.fill(target - self.buffer.len());
        }
        self.pos = target.min(self.buffer.len());
        Ok(self.pos)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reader_of(chunks: Vec<Vec<u8>>) -> ByteReader<std::vec::IntoIter<Vec<u8>>> {
        ByteReader::new(chunks.into_iter())
    }

    #[test]
    fn read_across_chunk_boundaries() {
        let mut r = reader_of(vec![vec![1, 2], vec![3, 4, 5]]);
        assert_eq!(r.read(3).unwrap(), vec![1, 2, 3]);
        assert_eq!(r.read(2).unwrap(), vec![4, 5]);
    }

    #[test]
    fn peek_does_not_advance() {
        let mut r = reader_of(vec![vec![1, 2, 3]]);
        assert_eq!(r.peek(2), &[1, 2]);
        assert_eq!(r.tell(), 0);
        assert_eq!(r.read(1).unwrap(), vec![1]);
    }

    #[test]
    fn eof_on_short_read() {
        let mut r = reader_of(vec![vec![1, 2]]);
        assert!(r.read(5).is_err());
    }

    #[test]
    fn seek_backward_after_forward_read() {
        let mut r = reader_of(vec![vec![1, 2, 3, 4]]);
        r.read(4).unwrap();
        r.seek(SeekFrom::Start(1)).unwrap();
        assert_eq!(r.read(2).unwrap(), vec![2, 3]);
    }

    #[test]
    fn seek_negative_clamps_to_zero() {
        let mut r = reader_of(vec![vec![1, 2, 3]]);
        r.read(2).unwrap();
        r.seek(SeekFrom::Current(-10)).unwrap();
        assert_eq!(r.tell(), 0);
    }

    #[test]
    fn at_eof_reports_exhaustion() {
        let mut r = reader_of(vec![vec![1]]);
        assert!(!r.at_eof());
        r.read(1).unwrap();
        assert!(r.at_eof());
    }

    #[test]
    fn read_all_drains_every_remaining_chunk() {
        let mut r = reader_of(vec![vec![1], vec![2, 3], vec![4]]);
        r.read(1).unwrap();
        assert_eq!(r.read_all(), vec![2, 3, 4]);
    }
}
