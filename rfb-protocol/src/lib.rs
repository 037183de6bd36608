//! RFB (Remote Framebuffer) protocol grammar.
//!
//! This crate provides the wire-level grammar for the RFB protocol used to
//! replay a recorded VNC session: the version/security handshake sequence
//! and the client- and server-message tables. It has no notion of a live
//! connection; everything here reads from the byte streams reconstructed by
//! `rfb-capture`.
//!
//! # Modules
//!
//! - [`handshake`] - version negotiation, security negotiation, ClientInit/ServerInit
//! - [`messages`] - client- and server-message tables, PixelFormat, Rectangle

pub mod handshake;
pub mod messages;

pub use handshake::{negotiate_security, negotiate_version, HandshakeResult, NegotiatedVersion};
pub use messages::{
    ClientMessage, PixelFormat, Rectangle, ServerMessage, SECURITY_TYPE_NONE,
    SECURITY_TYPE_VNC_AUTH,
};
