//! Session context and the synchronous event-decoder loop.
//!
//! Ties the capture-reassembled directional streams, the handshake, and the
//! framebuffer/decoder registry together into the replay entry point: locate
//! the RFB flow, run the handshake, then drain the merged client/server
//! stream one message at a time.

use crate::config::ReplayConfig;
use crate::errors::ReplayError;
use crate::framebuffer::{CursorImage, Framebuffer, ENCODING_PSEUDO_CURSOR_WITH_ALPHA};
use rfb_capture::locator::CandidateFlow;
use rfb_capture::{locate_session, DirectionalStream, MergedStream, Origin};
use rfb_common::Rect;
use rfb_protocol::handshake::{run_handshake, NegotiatedVersion};
use rfb_protocol::messages::types::Rectangle;
use rfb_protocol::messages::{ClientMessage, ServerMessage};

/// Synchronous callback registry for session events.
///
/// A struct of optional boxed closures rather than a dynamic keyed map: the
/// set of events a replay can raise is small and fixed.
#[derive(Default)]
pub struct Callbacks {
    pub screen_update: Option<Box<dyn FnMut(&rfb_pixelbuffer::ManagedPixelBuffer, Rect)>>,
    pub update_cursor: Option<Box<dyn FnMut(&CursorImage)>>,
    pub update_cursor_position: Option<Box<dyn FnMut(u16, u16)>>,
    pub type_key: Option<Box<dyn FnMut(u32)>>,
    pub clipboard: Option<Box<dyn FnMut(&str)>>,
}

/// Live state for one replayed RFB session.
pub struct SessionContext {
    pub version: NegotiatedVersion,
    pub security_type: u8,
    pub shared: bool,
    pub name: String,
    pub framebuffer: Framebuffer,
    pub typed_text: String,
    pub clipboard: String,
    pub callbacks: Callbacks,
    config: ReplayConfig,
    merged: MergedStream,
}

impl SessionContext {
    /// Runs the RFB handshake over the already-reassembled server/client
    /// directional streams and builds a context ready to drive [`Self::run`].
    pub fn handshake(
        mut server: DirectionalStream,
        mut client: DirectionalStream,
        config: ReplayConfig,
        callbacks: Callbacks,
    ) -> Result<Self, ReplayError> {
        config.validate()?;

        let result = run_handshake(server.reader(), client.reader())
            .map_err(|e| ReplayError::ProtocolError(e.to_string()))?;

        if !config.accepts_security_type(result.security_type) {
            return Err(ReplayError::ProtocolError(format!(
                "negotiated security type {} is not in accepted_security_types",
                result.security_type
            )));
        }

        tracing::info!(
            target: "rfb_session::handshake",
            version = ?result.version,
            security_type = result.security_type,
            shared = result.client_init.shared,
            width = result.server_init.framebuffer_width,
            height = result.server_init.framebuffer_height,
            name = %result.server_init.name,
            "handshake complete"
        );

        let framebuffer = Framebuffer::new(
            result.server_init.framebuffer_width,
            result.server_init.framebuffer_height,
            result.server_init.pixel_format,
        );

        Ok(Self {
            version: result.version,
            security_type: result.security_type,
            shared: result.client_init.shared,
            name: result.server_init.name,
            framebuffer,
            typed_text: String::new(),
            clipboard: String::new(),
            callbacks,
            config,
            merged: MergedStream::new(client, server),
        })
    }

    /// Drains the merged stream: parses and applies whichever side has the
    /// next earlier-timestamped message until both sides are exhausted.
    pub fn run(&mut self) -> Result<(), ReplayError> {
        loop {
            match self.merged.next_origin() {
                Origin::None => break,
                Origin::Client => self.handle_client_message()?,
                Origin::Server => self.handle_server_message()?,
            }
        }
        Ok(())
    }

    fn handle_client_message(&mut self) -> Result<(), ReplayError> {
        let offset = self.merged.client.reader().tell() as u64;
        let message = ClientMessage::read_from(self.merged.client.reader())
            .map_err(|e| ReplayError::DecodeError { offset, message: e.to_string() })?;

        match message {
            ClientMessage::SetPixelFormat(msg) => {
                tracing::debug!(target: "rfb_session::client", "SetPixelFormat");
                self.framebuffer.set_server_pixel_format(msg.pixel_format);
            }
            ClientMessage::SetEncodings(msg) => {
                tracing::debug!(
                    target: "rfb_session::client",
                    count = msg.encodings.len(),
                    "SetEncodings"
                );
            }
            ClientMessage::FramebufferUpdateRequest(msg) => {
                tracing::debug!(
                    target: "rfb_session::client",
                    incremental = msg.incremental, x = msg.x, y = msg.y,
                    w = msg.width, h = msg.height,
                    "FramebufferUpdateRequest"
                );
            }
            ClientMessage::KeyEvent(msg) => {
                tracing::debug!(
                    target: "rfb_session::client",
                    down = msg.down, key = msg.key,
                    "KeyEvent"
                );
                if msg.down {
                    if let Some(ch) = char::from_u32(msg.key) {
                        self.typed_text.push(ch);
                    }
                    if let Some(cb) = self.callbacks.type_key.as_mut() {
                        cb(msg.key);
                    }
                }
            }
            ClientMessage::PointerEvent(msg) => {
                tracing::debug!(
                    target: "rfb_session::client",
                    x = msg.x, y = msg.y, buttons = msg.button_mask,
                    "PointerEvent"
                );
                self.framebuffer.update_cursor_position(msg.x, msg.y);
                if let Some(cb) = self.callbacks.update_cursor_position.as_mut() {
                    cb(msg.x, msg.y);
                }
            }
            ClientMessage::ClientCutText(msg) => {
                tracing::debug!(
                    target: "rfb_session::client",
                    len = msg.text.len(),
                    "ClientCutText"
                );
                self.clipboard = msg.text;
                if let Some(cb) = self.callbacks.clipboard.as_mut() {
                    cb(&self.clipboard);
                }
            }
        }
        Ok(())
    }

    fn handle_server_message(&mut self) -> Result<(), ReplayError> {
        let offset = self.merged.server.reader().tell() as u64;
        let message = ServerMessage::read_from(self.merged.server.reader())
            .map_err(|e| ReplayError::DecodeError { offset, message: e.to_string() })?;

        match message {
            ServerMessage::FramebufferUpdate(header) => {
                tracing::info!(
                    target: "rfb_session::server",
                    rects = header.rect_count,
                    "FramebufferUpdate"
                );
                for _ in 0..header.rect_count {
                    let offset = self.merged.server.reader().tell() as u64;
                    let rect = Rectangle::read_from(self.merged.server.reader())
                        .map_err(|e| ReplayError::DecodeError { offset, message: e.to_string() })?;
                    self.apply_rectangle(&rect)?;
                }
            }
            ServerMessage::SetColorMapEntries(_) => {
                tracing::debug!(target: "rfb_session::server", "SetColorMapEntries");
            }
            ServerMessage::Bell => {
                tracing::debug!(target: "rfb_session::server", "Bell");
            }
            ServerMessage::ServerCutText(msg) => {
                tracing::debug!(
                    target: "rfb_session::server",
                    len = msg.text.len(),
                    "ServerCutText"
                );
                self.clipboard = msg.text;
                if let Some(cb) = self.callbacks.clipboard.as_mut() {
                    cb(&self.clipboard);
                }
            }
        }
        Ok(())
    }

    fn apply_rectangle(&mut self, rect: &Rectangle) -> Result<(), ReplayError> {
        let config = self.config.clone();
        let damaged = self
            .framebuffer
            .apply_rectangle(self.merged.server.reader(), rect, &config)?;

        if let Some(dest) = damaged {
            if let Some(cb) = self.callbacks.screen_update.as_mut() {
                cb(self.framebuffer.screen(), dest);
            }
        }

        if rect.encoding == ENCODING_PSEUDO_CURSOR_WITH_ALPHA {
            if let Some(cursor) = self.framebuffer.cursor() {
                if let Some(cb) = self.callbacks.update_cursor.as_mut() {
                    cb(cursor);
                }
            }
        }

        Ok(())
    }
}

/// Locates the RFB session among `flows`, runs the handshake, and replays
/// the whole recorded conversation. Convenience entry point composing
/// [`rfb_capture::locate_session`] with [`SessionContext::handshake`] and
/// [`SessionContext::run`].
pub fn replay_capture(
    flows: Vec<CandidateFlow>,
    config: ReplayConfig,
    callbacks: Callbacks,
) -> Result<SessionContext, ReplayError> {
    let (server, client) =
        locate_session(flows).map_err(|e| ReplayError::CaptureInputError(e.to_string()))?;
    let mut ctx = SessionContext::handshake(server, client, config, callbacks)?;
    ctx.run()?;
    Ok(ctx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rfb_capture::directional::Packet;
    use rfb_encodings::ENCODING_RAW;
    use rfb_protocol::messages::types::PixelFormat as WirePixelFormat;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn packet(ts: f64, bytes: Vec<u8>) -> Packet {
        Packet { timestamp: ts, payload: bytes }
    }

    fn standard_pixel_format_bytes() -> Vec<u8> {
        let pf = WirePixelFormat {
            bits_per_pixel: 32,
            depth: 24,
            big_endian: 0,
            true_color: 1,
            red_max: 255,
            green_max: 255,
            blue_max: 255,
            red_shift: 16,
            green_shift: 8,
            blue_shift: 0,
        };
        pf.to_bytes().to_vec()
    }

    fn handshake_streams() -> (DirectionalStream, DirectionalStream) {
        let mut server_bytes = b"RFB 003.008\n".to_vec();
        server_bytes.push(1); // one security type offered
        server_bytes.push(1); // type 1 = None
        server_bytes.extend_from_slice(&0u32.to_be_bytes()); // SecurityResult: OK
        server_bytes.extend_from_slice(&4u16.to_be_bytes()); // framebuffer_width
        server_bytes.extend_from_slice(&3u16.to_be_bytes()); // framebuffer_height
        server_bytes.extend_from_slice(&standard_pixel_format_bytes());
        server_bytes.extend_from_slice(&0u32.to_be_bytes()); // name length 0

        let mut client_bytes = b"RFB 003.008\n".to_vec();
        client_bytes.push(1); // chosen security type: None
        client_bytes.push(1); // ClientInit: shared

        (
            DirectionalStream::new(vec![packet(0.0, server_bytes)]),
            DirectionalStream::new(vec![packet(0.0, client_bytes)]),
        )
    }

    #[test]
    fn handshake_populates_session_context() {
        let (server, client) = handshake_streams();
        let ctx =
            SessionContext::handshake(server, client, ReplayConfig::default(), Callbacks::default())
                .unwrap();

        assert_eq!(ctx.version, NegotiatedVersion::V3_8);
        assert!(ctx.shared);
        assert_eq!(ctx.framebuffer.screen().dimensions(), (4, 3));
    }

    #[test]
    fn key_event_accumulates_typed_text_and_fires_callback() {
        let (server, client) = handshake_streams();

        let seen = Rc::new(RefCell::new(Vec::new()));
        let seen_clone = Rc::clone(&seen);
        let mut callbacks = Callbacks::default();
        callbacks.type_key = Some(Box::new(move |key| seen_clone.borrow_mut().push(key)));

        let mut ctx =
            SessionContext::handshake(server, client, ReplayConfig::default(), callbacks).unwrap();

        // KeyEvent: down=1, pad, key='A' = 0x41
        let mut key_down = vec![4u8, 1, 0, 0];
        key_down.extend_from_slice(&0x41u32.to_be_bytes());
        ctx.merged.client = DirectionalStream::new(vec![packet(1.0, key_down)]);
        ctx.merged.server = DirectionalStream::new(vec![]);

        ctx.run().unwrap();

        assert_eq!(ctx.typed_text, "A");
        assert_eq!(*seen.borrow(), vec![0x41]);
    }

    #[test]
    fn framebuffer_update_fires_screen_update_callback() {
        let (server, client) = handshake_streams();

        let damaged = Rc::new(RefCell::new(Vec::new()));
        let damaged_clone = Rc::clone(&damaged);
        let mut callbacks = Callbacks::default();
        callbacks.screen_update = Some(Box::new(move |_buf, rect| damaged_clone.borrow_mut().push(rect)));

        let mut ctx =
            SessionContext::handshake(server, client, ReplayConfig::default(), callbacks).unwrap();

        // FramebufferUpdate: msg type 0, pad, rect_count=1, one Raw rect covering (0,0,2,1).
        let mut update = vec![0u8, 0, 0, 1];
        update.extend_from_slice(&0u16.to_be_bytes()); // x
        update.extend_from_slice(&0u16.to_be_bytes()); // y
        update.extend_from_slice(&2u16.to_be_bytes()); // width
        update.extend_from_slice(&1u16.to_be_bytes()); // height
        update.extend_from_slice(&ENCODING_RAW.to_be_bytes());
        update.extend_from_slice(&[0, 0, 0xFF, 0xFF, 0xFF, 0, 0, 0xFF]); // 2 BGRA pixels

        ctx.merged.server = DirectionalStream::new(vec![packet(1.0, update)]);
        ctx.merged.client = DirectionalStream::new(vec![]);

        ctx.run().unwrap();

        assert_eq!(damaged.borrow().len(), 1);
        assert_eq!(damaged.borrow()[0], Rect::new(0, 0, 2, 1));
    }

    #[test]
    fn clipboard_update_from_server_fires_callback() {
        let (server, client) = handshake_streams();

        let seen = Rc::new(RefCell::new(String::new()));
        let seen_clone = Rc::clone(&seen);
        let mut callbacks = Callbacks::default();
        callbacks.clipboard = Some(Box::new(move |text| *seen_clone.borrow_mut() = text.to_string()));

        let mut ctx =
            SessionContext::handshake(server, client, ReplayConfig::default(), callbacks).unwrap();

        let mut cut_text = vec![3u8, 0, 0, 0];
        cut_text.extend_from_slice(&5u32.to_be_bytes());
        cut_text.extend_from_slice(b"hello");

        ctx.merged.server = DirectionalStream::new(vec![packet(1.0, cut_text)]);
        ctx.merged.client = DirectionalStream::new(vec![]);

        ctx.run().unwrap();

        assert_eq!(ctx.clipboard, "hello");
        assert_eq!(*seen.borrow(), "hello");
    }
}
