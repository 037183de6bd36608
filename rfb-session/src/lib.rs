//! Synchronous RFB session replay.
//!
//! This crate turns two directional byte streams - already reassembled from
//! a packet capture by `rfb-capture` - into a fully replayed RFB session: it
//! runs the handshake, then drains the merged client/server event stream,
//! maintaining a framebuffer model and firing synchronous callbacks for
//! screen damage, cursor shape/position, typed keys, and clipboard changes.
//!
//! # Architecture
//!
//! Replay is single-threaded and synchronous: there is no live connection,
//! no reconnection, and no background task. [`SessionContext::handshake`]
//! builds the context, and [`SessionContext::run`] drains it to completion.
//! [`replay_capture`] composes session location, handshake, and draining for
//! the common case of starting from a capture's candidate flows.
//!
//! # Error Handling
//!
//! This crate follows a **fail-fast policy**: [`ReplayError`] categorizes
//! every failure mode (no session found, malformed handshake, malformed
//! event, unsupported encoding), and there are no silent fallbacks except
//! where the specification explicitly calls for one (an out-of-range cursor
//! position is dropped, not clamped).
//!
//! # Safety
//!
//! This crate is `#![forbid(unsafe_code)]` and uses only safe Rust.

#![forbid(unsafe_code)]
#![deny(missing_docs, clippy::all, clippy::pedantic, clippy::cargo)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod errors;
pub mod framebuffer;
pub mod session;

pub use config::{ReplayConfig, ReplayConfigBuilder};
pub use errors::ReplayError;
pub use framebuffer::{CursorImage, Framebuffer};
pub use session::{replay_capture, Callbacks, SessionContext};
