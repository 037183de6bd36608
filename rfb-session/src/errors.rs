//! Error taxonomy for replaying a captured RFB session.
//!
//! Four kinds, matching the failure points of the decoder: a capture that
//! never yields an RFB flow, a malformed handshake, a malformed or
//! undecodable event/rectangle, and a recognized-but-unimplemented encoding.
//! `thiserror` carries the typed variants here; callers that need narrative
//! context (which rectangle, which tile) wrap with `anyhow::Context` at the
//! boundary between this crate and its caller, per the lineage's convention
//! of `thiserror` for library errors and `anyhow` for the contextual chain
//! an application reports.

use std::io;
use thiserror::Error;

/// Errors that can occur while replaying a captured RFB session.
#[derive(Debug, Error)]
pub enum ReplayError {
    /// No TCP flow in the capture looked like an RFB session.
    #[error("no RFB session found in capture: {0}")]
    CaptureInputError(String),

    /// Malformed or unexpected bytes during the handshake, an unsupported
    /// security type, or a non-OK security result.
    #[error("protocol error: {0}")]
    ProtocolError(String),

    /// A short read mid-message, an invalid sub-encoding, or a compressed
    /// stream failure.
    #[error("decode error at offset {offset}: {message}")]
    DecodeError { offset: u64, message: String },

    /// A rectangle arrived with an encoding this decoder recognizes but
    /// does not reconstruct pixels for.
    #[error("unsupported encoding {encoding}: {message}")]
    UnsupportedEncoding { encoding: i32, message: String },

    /// I/O failure reading from a directional stream's byte reader.
    #[error("stream I/O error: {0}")]
    Io(#[from] io::Error),
}
