//! RFB protocol handshake replay.
//!
//! This module replays the three-phase RFB handshake from two already
//! reconstructed byte streams - the bytes the server sent and the bytes the
//! client sent - instead of driving a live connection:
//!
//! 1. **Protocol Version Negotiation** - both sides' version banners are read
//! 2. **Security Handshake** - security type negotiation is read; `None` and
//!    `VncAuth` exchanges are recorded, not validated, since a replay has no
//!    way to check a VNC password and no need to
//! 3. **Initialization** - ClientInit/ServerInit are read
//!
//! # Wire Format
//!
//! All multi-byte integers use big-endian (network byte order).
//!
//! # Error Handling
//!
//! Invalid protocol versions, unparseable security negotiation, and
//! malformed messages are all hard errors - a replay that cannot follow the
//! handshake cannot trust anything that follows it.

use crate::messages::{ClientInit, ServerInit, SECURITY_TYPE_NONE, SECURITY_TYPE_VNC_AUTH};
use rfb_capture::reader::{ByteReader, ChunkSource};
use std::io::{Error, ErrorKind, Result};

const CLIENT_VERSION_BYTES: &[u8; 12] = b"RFB 003.008\n";

/// Negotiated RFB protocol version after handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegotiatedVersion {
    /// RFB 3.3-3.6 - single mandated security type, no explicit SecurityResult for `None`.
    V3_3,
    /// RFB 3.7/3.8 - server offers a list of security types; client picks one.
    V3_8,
}

/// Outcome of a full handshake replay.
#[derive(Debug, Clone)]
pub struct HandshakeResult {
    pub version: NegotiatedVersion,
    pub security_type: u8,
    pub client_init: ClientInit,
    pub server_init: ServerInit,
}

fn parse_version_banner(banner: &[u8; 12]) -> Result<(u32, u32)> {
    if &banner[0..4] != b"RFB " || banner[11] != b'\n' || banner[7] != b'.' {
        return Err(Error::new(
            ErrorKind::InvalidData,
            format!(
                "invalid RFB version string: expected 'RFB xxx.yyy\\n', got {:?}",
                String::from_utf8_lossy(banner)
            ),
        ));
    }
    let major_str = std::str::from_utf8(&banner[4..7])
        .map_err(|e| Error::new(ErrorKind::InvalidData, format!("invalid major version digits: {e}")))?;
    let minor_str = std::str::from_utf8(&banner[8..11])
        .map_err(|e| Error::new(ErrorKind::InvalidData, format!("invalid minor version digits: {e}")))?;
    let major: u32 = major_str
        .parse()
        .map_err(|e| Error::new(ErrorKind::InvalidData, format!("invalid major version number: {e}")))?;
    let minor: u32 = minor_str
        .parse()
        .map_err(|e| Error::new(ErrorKind::InvalidData, format!("invalid minor version number: {e}")))?;
    Ok((major, minor))
}

/// Read the server's and client's RFB version banners and determine which
/// negotiated version governs the rest of the handshake.
///
/// The effective version is the component-wise minimum of the two banners,
/// matching the original decoder's `min(server_version, client_version)`:
/// a server offering 3.8 against a client that only sent 3.3 still runs the
/// 3.3 security branch.
pub fn negotiate_version<S: ChunkSource, C: ChunkSource>(
    server: &mut ByteReader<S>,
    client: &mut ByteReader<C>,
) -> Result<NegotiatedVersion> {
    let server_banner: [u8; 12] = server
        .read(12)?
        .try_into()
        .map_err(|_| Error::new(ErrorKind::UnexpectedEof, "short read on server version banner"))?;
    let (major, minor) = parse_version_banner(&server_banner)?;

    if major < 3 || (major == 3 && minor < 3) {
        return Err(Error::new(
            ErrorKind::Unsupported,
            format!("unsupported RFB version {major}.{minor} (< 003.003)"),
        ));
    }

    let client_banner: [u8; 12] = client
        .read(12)?
        .try_into()
        .map_err(|_| Error::new(ErrorKind::UnexpectedEof, "short read on client version banner"))?;
    let (client_major, client_minor) = parse_version_banner(&client_banner)?;
    if &client_banner != CLIENT_VERSION_BYTES {
        tracing::debug!(
            banner = %String::from_utf8_lossy(&client_banner),
            "client sent a version banner other than RFB 003.008"
        );
    }

    let (eff_major, eff_minor) = (client_major, client_minor).min((major, minor));

    Ok(if eff_major == 3 && eff_minor < 7 {
        NegotiatedVersion::V3_3
    } else {
        NegotiatedVersion::V3_8
    })
}

fn read_reason<S: ChunkSource>(server: &mut ByteReader<S>) -> Result<String> {
    let len = server.read_u32()? as usize;
    let bytes = server.read(len)?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

/// Read the security handshake, returning the negotiated security type.
///
/// `None` and `VncAuth` exchanges are both read through without validating
/// credentials: a replay records what happened, it does not re-authenticate.
pub fn negotiate_security<S: ChunkSource, C: ChunkSource>(
    server: &mut ByteReader<S>,
    client: &mut ByteReader<C>,
    version: NegotiatedVersion,
) -> Result<u8> {
    match version {
        NegotiatedVersion::V3_8 => negotiate_security_3_8(server, client),
        NegotiatedVersion::V3_3 => negotiate_security_3_3(server, client),
    }
}

fn read_auth_exchange<S: ChunkSource, C: ChunkSource>(
    server: &mut ByteReader<S>,
    client: &mut ByteReader<C>,
    security_type: u8,
) -> Result<()> {
    if security_type == SECURITY_TYPE_VNC_AUTH {
        server.read(16)?; // challenge
        client.read(16)?; // response
    }
    Ok(())
}

fn read_security_result<S: ChunkSource>(server: &mut ByteReader<S>) -> Result<()> {
    match server.read_u32()? {
        0 => Ok(()),
        1 => {
            let reason = read_reason(server)?;
            Err(Error::new(
                ErrorKind::PermissionDenied,
                format!("security handshake failed: {reason}"),
            ))
        }
        other => Err(Error::new(
            ErrorKind::InvalidData,
            format!("invalid security result value: {other} (expected 0 or 1)"),
        )),
    }
}

fn negotiate_security_3_8<S: ChunkSource, C: ChunkSource>(
    server: &mut ByteReader<S>,
    client: &mut ByteReader<C>,
) -> Result<u8> {
    let count = server.read_u8()?;
    if count == 0 {
        let reason = read_reason(server)?;
        return Err(Error::new(
            ErrorKind::ConnectionRefused,
            format!("server offered no security types: {reason}"),
        ));
    }
    let offered = server.read(count as usize)?;
    if !offered.contains(&SECURITY_TYPE_NONE) && !offered.contains(&SECURITY_TYPE_VNC_AUTH) {
        return Err(Error::new(
            ErrorKind::Unsupported,
            format!("no recognized security types offered by server (got {offered:?})"),
        ));
    }

    let chosen = client.read_u8()?;
    if chosen != SECURITY_TYPE_NONE && chosen != SECURITY_TYPE_VNC_AUTH {
        return Err(Error::new(
            ErrorKind::Unsupported,
            format!("client chose unrecognized security type {chosen}"),
        ));
    }

    read_auth_exchange(server, client, chosen)?;
    read_security_result(server)?;
    Ok(chosen)
}

fn negotiate_security_3_3<S: ChunkSource, C: ChunkSource>(
    server: &mut ByteReader<S>,
    client: &mut ByteReader<C>,
) -> Result<u8> {
    let security_type = server.read_u32()?;
    match security_type {
        0 => {
            let reason = read_reason(server)?;
            Err(Error::new(
                ErrorKind::ConnectionRefused,
                format!("server rejected connection: {reason}"),
            ))
        }
        1 => Ok(SECURITY_TYPE_NONE),
        2 => {
            read_auth_exchange(server, client, SECURITY_TYPE_VNC_AUTH)?;
            read_security_result(server)?;
            Ok(SECURITY_TYPE_VNC_AUTH)
        }
        other => Err(Error::new(
            ErrorKind::Unsupported,
            format!("unsupported security type for RFB 3.3: {other}"),
        )),
    }
}

/// Read the client's ClientInit message.
pub fn recv_client_init<C: ChunkSource>(client: &mut ByteReader<C>) -> Result<ClientInit> {
    ClientInit::read_from(client)
}

/// Read the server's ServerInit message.
pub fn recv_server_init<S: ChunkSource>(server: &mut ByteReader<S>) -> Result<ServerInit> {
    ServerInit::read_from(server)
}

/// Run the full handshake replay against a server- and client-directed
/// stream, in protocol order.
pub fn run_handshake<S: ChunkSource, C: ChunkSource>(
    server: &mut ByteReader<S>,
    client: &mut ByteReader<C>,
) -> Result<HandshakeResult> {
    let version = negotiate_version(server, client)?;
    let security_type = negotiate_security(server, client, version)?;
    let client_init = recv_client_init(client)?;
    let server_init = recv_server_init(server)?;
    Ok(HandshakeResult {
        version,
        security_type,
        client_init,
        server_init,
    })
}
