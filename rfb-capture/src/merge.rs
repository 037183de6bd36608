//! Deterministic interleaving of the client and server directional streams.

use crate::directional::DirectionalStream;

/// Which side the merged stream's next packet comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    Client,
    Server,
    /// Both streams are exhausted.
    None,
}

/// Presents a client stream and a server stream as a single ordered sequence.
///
/// Delivery order is by ascending packet timestamp. On a tie the server
/// stream is favoured: the client only goes first when its next timestamp is
/// strictly earlier than the server's. When one side has no pending packet
/// the other is drained unconditionally.
pub struct MergedStream {
    pub client: DirectionalStream,
    pub server: DirectionalStream,
}

impl MergedStream {
    pub fn new(client: DirectionalStream, server: DirectionalStream) -> Self {
        Self { client, server }
    }

    /// Which side holds the next packet to be parsed, without consuming it.
    pub fn next_origin(&self) -> Origin {
        match (self.client.next_timestamp(), self.server.next_timestamp()) {
            (None, None) => Origin::None,
            (Some(_), None) => Origin::Client,
            (None, Some(_)) => Origin::Server,
            (Some(c), Some(s)) => {
                if c < s {
                    Origin::Client
                } else {
                    Origin::Server
                }
            }
        }
    }
}
