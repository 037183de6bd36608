//! Finds the RFB conversation among a capture's candidate TCP flows.

use crate::directional::{DirectionalStream, Packet};
use thiserror::Error;

/// One TCP flow, as a pair of unlabeled half-flows. Which side is the RFB
/// server and which is the client is determined by [`locate_session`], not
/// by the caller.
pub struct CandidateFlow {
    pub side_a: Vec<Packet>,
    pub side_b: Vec<Packet>,
}

/// Failure to find an RFB session in a capture.
#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("no TCP flow in the capture begins with an RFB protocol version banner")]
    NoSessionFound,
}

const BANNER_LEN: usize = 12;
const BANNER_PREFIX: &[u8] = b"RFB ";

fn is_version_banner(payload: &[u8]) -> bool {
    payload.len() == BANNER_LEN && payload.starts_with(BANNER_PREFIX) && payload.ends_with(b"\n")
}

/// Scan `flows` in order and return the first one whose earliest packet (by
/// timestamp, across both directions) is an RFB version banner — the server
/// always sends that banner first. Returns `(server, client)` streams.
pub fn locate_session(
    flows: Vec<CandidateFlow>,
) -> Result<(DirectionalStream, DirectionalStream), CaptureError> {
    for flow in flows {
        let CandidateFlow { side_a, side_b } = flow;
        if side_a.is_empty() || side_b.is_empty() {
            continue;
        }
        let a_first_ts = side_a[0].timestamp;
        let b_first_ts = side_b[0].timestamp;
        let (server_packets, client_packets) = if a_first_ts <= b_first_ts {
            (side_a, side_b)
        } else {
            (side_b, side_a)
        };
        if is_version_banner(&server_packets[0].payload) {
            return Ok((
                DirectionalStream::new(server_packets),
                DirectionalStream::new(client_packets),
            ));
        }
    }
    Err(CaptureError::NoSessionFound)
}
