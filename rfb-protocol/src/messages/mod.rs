//! RFB protocol message types.
//!
//! Messages are categorized into:
//!
//! - **Core types** ([`types`]) - PixelFormat, Rectangle, and protocol/encoding constants
//! - **Server messages** ([`server`]) - messages sent from server to client
//! - **Client messages** ([`client`]) - messages sent from client to server
//!
//! # Wire Format Rules
//!
//! 1. Big-endian byte order for all multi-byte integers.
//! 2. Boolean fields must be exactly 0 or 1; any other value is an error.
//! 3. Padding bytes must be zero where validated explicitly.
//! 4. No defensive fallbacks: invalid data is a parse error.
//!
//! `FramebufferUpdate` only exposes its rectangle-count header here
//! ([`server::FramebufferUpdateHeader`]); the rectangles that follow are
//! decoded and applied to the framebuffer one at a time by the session's
//! event loop, since doing so requires the pixel-data decoders and the live
//! framebuffer state that this crate does not own.

pub mod client;
pub mod server;
pub mod types;

pub use types::{
    PixelFormat, Rectangle, ENCODING_COPY_RECT, ENCODING_CORRE, ENCODING_DESKTOP_SIZE,
    ENCODING_HEXTILE, ENCODING_JPEG, ENCODING_LAST_RECT, ENCODING_OPEN_H264,
    ENCODING_PSEUDO_CURSOR_WITH_ALPHA, ENCODING_RAW, ENCODING_RRE, ENCODING_TIGHT,
    ENCODING_TIGHT_PNG, ENCODING_TRLE, ENCODING_ZLIB, ENCODING_ZLIBHEX, ENCODING_ZRLE,
    SECURITY_RESULT_FAILED, SECURITY_RESULT_OK, SECURITY_TYPE_NONE, SECURITY_TYPE_VNC_AUTH,
};

pub use server::{
    Bell, ColorMapEntry, FramebufferUpdateHeader, ServerCutText, ServerInit, SetColorMapEntries,
};

pub use client::{
    ClientCutText, ClientInit, FramebufferUpdateRequest, KeyEvent, PointerEvent, SetEncodings,
    SetPixelFormat,
};

use rfb_capture::reader::{ByteReader, ChunkSource};
use std::io::{Error, ErrorKind, Result};

/// All client-to-server RFB message types (opcodes 0, 2, 3, 4, 5, 6).
#[derive(Debug, Clone, PartialEq)]
pub enum ClientMessage {
    SetPixelFormat(SetPixelFormat),
    SetEncodings(SetEncodings),
    FramebufferUpdateRequest(FramebufferUpdateRequest),
    KeyEvent(KeyEvent),
    PointerEvent(PointerEvent),
    ClientCutText(ClientCutText),
}

impl ClientMessage {
    /// Read one client message, dispatching on its opcode byte.
    pub fn read_from<S: ChunkSource>(stream: &mut ByteReader<S>) -> Result<Self> {
        let msg_type = stream.read_u8()?;
        match msg_type {
            0 => Ok(ClientMessage::SetPixelFormat(SetPixelFormat::read_from(
                stream,
            )?)),
            2 => Ok(ClientMessage::SetEncodings(SetEncodings::read_from(
                stream,
            )?)),
            3 => Ok(ClientMessage::FramebufferUpdateRequest(
                FramebufferUpdateRequest::read_from(stream)?,
            )),
            4 => Ok(ClientMessage::KeyEvent(KeyEvent::read_from(stream)?)),
            5 => Ok(ClientMessage::PointerEvent(PointerEvent::read_from(
                stream,
            )?)),
            6 => Ok(ClientMessage::ClientCutText(ClientCutText::read_from(
                stream,
            )?)),
            other => Err(Error::new(
                ErrorKind::InvalidData,
                format!("unknown client message type: {other}"),
            )),
        }
    }
}

/// All server-to-client RFB message types (opcodes 0, 1, 2, 3).
///
/// `FramebufferUpdate` only carries the rect-count header; the rectangles
/// themselves are decoded by the caller immediately after receiving this
/// variant.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerMessage {
    FramebufferUpdate(FramebufferUpdateHeader),
    SetColorMapEntries(SetColorMapEntries),
    Bell,
    ServerCutText(ServerCutText),
}

impl ServerMessage {
    /// Read one server message, dispatching on its opcode byte.
    pub fn read_from<S: ChunkSource>(stream: &mut ByteReader<S>) -> Result<Self> {
        let msg_type = stream.read_u8()?;
        match msg_type {
            0 => Ok(ServerMessage::FramebufferUpdate(
                FramebufferUpdateHeader::read_from(stream)?,
            )),
            1 => Ok(ServerMessage::SetColorMapEntries(
                SetColorMapEntries::read_from(stream)?,
            )),
            2 => {
                Bell::read_from(stream)?;
                Ok(ServerMessage::Bell)
            }
            3 => Ok(ServerMessage::ServerCutText(ServerCutText::read_from(
                stream,
            )?)),
            other => Err(Error::new(
                ErrorKind::InvalidData,
                format!("unknown server message type: {other}"),
            )),
        }
    }
}
