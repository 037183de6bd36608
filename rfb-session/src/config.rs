//! Configuration for replaying a captured RFB session.
//!
//! This is a library-level concern, not a command-line one: the illustrative
//! CLI that drives a replay from a capture file lives outside this crate and
//! is not itself configured through `ReplayConfig`.

use crate::errors::ReplayError;
use rfb_protocol::{SECURITY_TYPE_NONE, SECURITY_TYPE_VNC_AUTH};
use serde::{Deserialize, Serialize};

/// Configuration for a single replay run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplayConfig {
    /// Security types the handshake driver will accept when the server
    /// offers a choice (or mandates one, under RFB 3.3). A type the server
    /// selects that is not in this list fails the handshake with a
    /// `ProtocolError`.
    #[serde(default = "default_accepted_security_types")]
    pub accepted_security_types: Vec<u8>,
    /// Whether encountering an `UnsupportedEncoding` rectangle aborts the
    /// whole replay (`true`) or is logged and skips the rest of that
    /// FramebufferUpdate while the session continues (`false`).
    #[serde(default = "default_abort_on_unsupported_encoding")]
    pub abort_on_unsupported_encoding: bool,
}

fn default_accepted_security_types() -> Vec<u8> {
    vec![SECURITY_TYPE_NONE, SECURITY_TYPE_VNC_AUTH]
}

fn default_abort_on_unsupported_encoding() -> bool {
    true
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            accepted_security_types: default_accepted_security_types(),
            abort_on_unsupported_encoding: default_abort_on_unsupported_encoding(),
        }
    }
}

impl ReplayConfig {
    /// Creates a new configuration builder.
    #[must_use]
    pub fn builder() -> ReplayConfigBuilder {
        ReplayConfigBuilder::default()
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if any configuration values are invalid.
    pub fn validate(&self) -> Result<(), ReplayError> {
        if self.accepted_security_types.is_empty() {
            return Err(ReplayError::ProtocolError(
                "accepted_security_types must not be empty".to_string(),
            ));
        }

        Ok(())
    }

    /// Returns whether `security_type` is one this replay will accept.
    #[must_use]
    pub fn accepts_security_type(&self, security_type: u8) -> bool {
        self.accepted_security_types.contains(&security_type)
    }
}

/// Builder for creating a `ReplayConfig`.
#[derive(Default)]
pub struct ReplayConfigBuilder {
    config: ReplayConfig,
}

impl ReplayConfigBuilder {
    /// Sets which security types the handshake driver will accept.
    #[must_use]
    pub fn accepted_security_types(mut self, types: Vec<u8>) -> Self {
        self.config.accepted_security_types = types;
        self
    }

    /// Sets whether an unsupported encoding aborts the whole replay.
    #[must_use]
    pub fn abort_on_unsupported_encoding(mut self, abort: bool) -> Self {
        self.config.abort_on_unsupported_encoding = abort;
        self
    }

    /// Builds the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn build(self) -> Result<ReplayConfig, ReplayError> {
        self.config.validate()?;
        Ok(self.config)
    }
}
