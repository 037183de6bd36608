//! Packet-capture session reassembly for RFB replay.
//!
//! This crate turns a captured TCP conversation into the inputs the protocol
//! and session layers need: a pair of directional, timestamped byte streams
//! and a deterministic merge of the two for event-loop replay.
//!
//! # Modules
//!
//! - [`reader`] - seekable byte-stream reader over a lazy sequence of payload chunks
//! - [`directional`] - one direction of a TCP conversation, with a current timestamp
//! - [`merge`] - deterministic interleaving of the two directions
//! - [`locator`] - finds the RFB session among a capture's candidate flows

pub mod directional;
pub mod locator;
pub mod merge;
pub mod reader;

pub use directional::{DirectionalStream, Packet};
pub use locator::{locate_session, CaptureError};
pub use merge::{MergedStream, Origin};
pub use reader::ByteReader;
