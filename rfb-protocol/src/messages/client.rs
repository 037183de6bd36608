//! Client-to-server RFB messages.
//!
//! This module defines the messages a replayed RFB client sends, as parsed
//! off the client-directed byte stream. Only reading is needed: a replay
//! never drives a live connection, it only re-derives what a recorded
//! client already sent.

use super::types::PixelFormat;
use rfb_capture::reader::{ByteReader, ChunkSource};
use std::io::{Error, ErrorKind, Result};

/// Decodes a length-prefixed-less Latin-1 byte slice into a `String`.
///
/// RFB cut-text payloads are Latin-1, not UTF-8; every byte maps directly to
/// the Unicode code point of the same value, so this never fails.
fn decode_latin1(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| b as char).collect()
}

/// ClientInit message - client initialization.
///
/// # Wire Format
///
/// - 1 byte: shared flag (0 = exclusive, 1 = shared)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientInit {
    pub shared: bool,
}

impl ClientInit {
    pub fn read_from<S: ChunkSource>(stream: &mut ByteReader<S>) -> Result<Self> {
        let shared_flag = stream.read_u8()?;
        if shared_flag > 1 {
            return Err(Error::new(
                ErrorKind::InvalidData,
                format!("shared flag must be 0 or 1, got {shared_flag}"),
            ));
        }
        Ok(Self {
            shared: shared_flag == 1,
        })
    }
}

/// SetPixelFormat message (opcode 0).
///
/// # Wire Format
///
/// - 3 bytes: padding
/// - 16 bytes: PixelFormat
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetPixelFormat {
    pub pixel_format: PixelFormat,
}

impl SetPixelFormat {
    pub fn read_from<S: ChunkSource>(stream: &mut ByteReader<S>) -> Result<Self> {
        stream.skip(3)?;
        let pixel_format = PixelFormat::read_from(stream)?;
        Ok(Self { pixel_format })
    }
}

/// SetEncodings message (opcode 2).
///
/// # Wire Format
///
/// - 1 byte: padding
/// - 2 bytes: number of encodings
/// - N * 4 bytes: encoding types (signed i32 each)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetEncodings {
    pub encodings: Vec<i32>,
}

impl SetEncodings {
    pub fn read_from<S: ChunkSource>(stream: &mut ByteReader<S>) -> Result<Self> {
        stream.skip(1)?;
        let num_encodings = stream.read_u16()? as usize;
        let mut encodings = Vec::with_capacity(num_encodings);
        for _ in 0..num_encodings {
            encodings.push(stream.read_i32()?);
        }
        Ok(Self { encodings })
    }
}

/// FramebufferUpdateRequest message (opcode 3).
///
/// # Wire Format
///
/// - 1 byte: incremental (0 = full update, 1 = incremental)
/// - 2 bytes: x, 2 bytes: y, 2 bytes: width, 2 bytes: height
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FramebufferUpdateRequest {
    pub incremental: bool,
    pub x: u16,
    pub y: u16,
    pub width: u16,
    pub height: u16,
}

impl FramebufferUpdateRequest {
    pub fn read_from<S: ChunkSource>(stream: &mut ByteReader<S>) -> Result<Self> {
        let incremental_flag = stream.read_u8()?;
        if incremental_flag > 1 {
            return Err(Error::new(
                ErrorKind::InvalidData,
                format!("incremental flag must be 0 or 1, got {incremental_flag}"),
            ));
        }
        Ok(Self {
            incremental: incremental_flag == 1,
            x: stream.read_u16()?,
            y: stream.read_u16()?,
            width: stream.read_u16()?,
            height: stream.read_u16()?,
        })
    }
}

/// KeyEvent message (opcode 4).
///
/// # Wire Format
///
/// - 1 byte: down flag (0 = up, 1 = down)
/// - 2 bytes: padding
/// - 4 bytes: keysym (X11 keysym value)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyEvent {
    pub down: bool,
    pub key: u32,
}

impl KeyEvent {
    pub fn read_from<S: ChunkSource>(stream: &mut ByteReader<S>) -> Result<Self> {
        let down_flag = stream.read_u8()?;
        if down_flag > 1 {
            return Err(Error::new(
                ErrorKind::InvalidData,
                format!("down flag must be 0 or 1, got {down_flag}"),
            ));
        }
        stream.skip(2)?;
        Ok(Self {
            down: down_flag == 1,
            key: stream.read_u32()?,
        })
    }
}

/// PointerEvent message (opcode 5).
///
/// # Wire Format
///
/// - 1 byte: button mask, 2 bytes: x, 2 bytes: y
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PointerEvent {
    pub button_mask: u8,
    pub x: u16,
    pub y: u16,
}

impl PointerEvent {
    pub fn read_from<S: ChunkSource>(stream: &mut ByteReader<S>) -> Result<Self> {
        Ok(Self {
            button_mask: stream.read_u8()?,
            x: stream.read_u16()?,
            y: stream.read_u16()?,
        })
    }
}

/// ClientCutText message (opcode 6) - clipboard update from client.
///
/// # Wire Format
///
/// - 3 bytes: padding
/// - 4 bytes: text length
/// - N bytes: text (Latin-1 encoding)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientCutText {
    pub text: String,
}

impl ClientCutText {
    pub fn read_from<S: ChunkSource>(stream: &mut ByteReader<S>) -> Result<Self> {
        stream.skip(3)?;
        let length = stream.read_u32()? as usize;
        let text_bytes = stream.read(length)?;
        Ok(Self {
            text: decode_latin1(&text_bytes),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reader_of(bytes: &[u8]) -> ByteReader<std::vec::IntoIter<Vec<u8>>> {
        ByteReader::new(vec![bytes.to_vec()].into_iter())
    }

    #[test]
    fn client_init_shared() {
        let mut stream = reader_of(&[1]);
        assert_eq!(ClientInit::read_from(&mut stream).unwrap(), ClientInit { shared: true });
    }

    #[test]
    fn client_init_rejects_invalid_flag() {
        let mut stream = reader_of(&[2]);
        assert!(ClientInit::read_from(&mut stream).is_err());
    }

    #[test]
    fn key_event_down() {
        let mut bytes = vec![1, 0, 0];
        bytes.extend_from_slice(&0x0061u32.to_be_bytes());
        let mut stream = reader_of(&bytes);
        let event = KeyEvent::read_from(&mut stream).unwrap();
        assert_eq!(event, KeyEvent { down: true, key: 0x0061 });
    }

    #[test]
    fn pointer_event_reads_coordinates() {
        let mut bytes = vec![1u8];
        bytes.extend_from_slice(&3u16.to_be_bytes());
        bytes.extend_from_slice(&5u16.to_be_bytes());
        let mut stream = reader_of(&bytes);
        let event = PointerEvent::read_from(&mut stream).unwrap();
        assert_eq!(
            event,
            PointerEvent {
                button_mask: 1,
                x: 3,
                y: 5
            }
        );
    }

    #[test]
    fn client_cut_text_decodes_latin1() {
        let mut bytes = vec![0, 0, 0];
        bytes.extend_from_slice(&5u32.to_be_bytes());
        bytes.extend_from_slice(b"hello");
        let mut stream = reader_of(&bytes);
        let event = ClientCutText::read_from(&mut stream).unwrap();
        assert_eq!(event.text, "hello");
    }

    #[test]
    fn client_cut_text_preserves_high_latin1_bytes() {
        let mut bytes = vec![0, 0, 0];
        bytes.extend_from_slice(&1u32.to_be_bytes());
        bytes.push(0xE9); // 'e' with acute accent in Latin-1
        let mut stream = reader_of(&bytes);
        let event = ClientCutText::read_from(&mut stream).unwrap();
        assert_eq!(event.text.chars().next().unwrap() as u32, 0xE9);
    }

    #[test]
    fn set_encodings_reads_list() {
        let mut bytes = vec![0u8];
        bytes.extend_from_slice(&2u16.to_be_bytes());
        bytes.extend_from_slice(&0i32.to_be_bytes());
        bytes.extend_from_slice(&16i32.to_be_bytes());
        let mut stream = reader_of(&bytes);
        let msg = SetEncodings::read_from(&mut stream).unwrap();
        assert_eq!(msg.encodings, vec![0, 16]);
    }
}
