//! One direction of a replayed TCP conversation.

use crate::reader::ByteReader;
use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::Rc;

/// A single captured payload, with the timestamp it was captured at.
///
/// Timestamps are seconds since an arbitrary epoch fixed by the capture; only
/// relative ordering between packets matters to this crate.
#[derive(Debug, Clone, PartialEq)]
pub struct Packet {
    pub timestamp: f64,
    pub payload: Vec<u8>,
}

/// Iterator adapter that pops payloads off a directional stream's queue,
/// updating the stream's current timestamp as it yields each one.
///
/// This is the lazy source the stream's [`ByteReader`] pulls from; it is
/// never constructed directly outside this module.
pub struct PacketFeed {
    queue: Rc<RefCell<VecDeque<Packet>>>,
    current_timestamp: Rc<Cell<f64>>,
}

impl Iterator for PacketFeed {
    type Item = Vec<u8>;

    fn next(&mut self) -> Option<Vec<u8>> {
        let packet = self.queue.borrow_mut().pop_front()?;
        self.current_timestamp.set(packet.timestamp);
        Some(packet.payload)
    }
}

/// One half of a TCP conversation: an ordered queue of timestamped payloads,
/// exposed as a seekable byte reader.
///
/// The reader retains every byte it has ever consumed, so rewinding into
/// already-parsed data (as the handshake driver and event decoders sometimes
/// need to, e.g. to re-derive a message's wire size) is always legal.
pub struct DirectionalStream {
    queue: Rc<RefCell<VecDeque<Packet>>>,
    current_timestamp: Rc<Cell<f64>>,
    reader: ByteReader<PacketFeed>,
}

impl DirectionalStream {
    /// Build a stream from packets already in arrival order.
    pub fn new(packets: Vec<Packet>) -> Self {
        let queue = Rc::new(RefCell::new(VecDeque::from(packets)));
        let current_timestamp = Rc::new(Cell::new(0.0));
        let feed = PacketFeed {
            queue: Rc::clone(&queue),
            current_timestamp: Rc::clone(&current_timestamp),
        };
        Self {
            queue,
            current_timestamp,
            reader: ByteReader::new(feed),
        }
    }

    /// Timestamp of the next packet to be consumed, if any is pending.
    pub fn next_timestamp(&self) -> Option<f64> {
        self.queue.borrow().front().map(|p| p.timestamp)
    }

    /// Timestamp of the most recently consumed packet (0.0 before the first).
    pub fn current_timestamp(&self) -> f64 {
        self.current_timestamp.get()
    }

    /// Whether any packet remains unconsumed.
    pub fn has_pending(&self) -> bool {
        !self.queue.borrow().is_empty()
    }

    /// The byte-stream reader bound to this direction's payloads.
    pub fn reader(&mut self) -> &mut ByteReader<PacketFeed> {
        &mut self.reader
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn packet(ts: f64, bytes: &[u8]) -> Packet {
        Packet {
            timestamp: ts,
            payload: bytes.to_vec(),
        }
    }

    #[test]
    fn reads_concatenate_across_packets() {
        let mut s = DirectionalStream::new(vec![packet(1.0, &[1, 2]), packet(2.0, &[3, 4])]);
        assert_eq!(s.reader().read(3).unwrap(), vec![1, 2, 3]);
        assert_eq!(s.current_timestamp(), 2.0);
    }

    #[test]
    fn next_timestamp_reflects_unconsumed_head() {
        let mut s = DirectionalStream::new(vec![packet(1.0, &[1]), packet(2.0, &[2])]);
        assert_eq!(s.next_timestamp(), Some(1.0));
        s.reader().read(1).unwrap();
        assert_eq!(s.next_timestamp(), Some(2.0));
        s.reader().read(1).unwrap();
        assert_eq!(s.next_timestamp(), None);
        assert!(!s.has_pending());
    }
}
