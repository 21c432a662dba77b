//! Bridge configuration consumed from the session orchestrator.
//!
//! The orchestrator decides whether the bridge is available to a session,
//! which port the host process listens on, and how long the two endpoints
//! wait: once for connection establishment, and per command for the
//! response.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default wait for the host peer to accept the connection (ms)
pub const DEFAULT_CONNECTION_TIMEOUT_MS: u64 = 10_000;

/// Default per-command response timeout (ms)
pub const DEFAULT_COMMAND_TIMEOUT_MS: u64 = 30_000;

/// Default host for the bridge endpoint
pub const DEFAULT_BRIDGE_HOST: &str = "127.0.0.1";

/// Configuration for one bridge session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// Whether the bridge is enabled for this session
    pub enabled: bool,
    /// Host the executor listens on (loopback in practice)
    pub host: String,
    /// Port the executor listens on (0 = ephemeral, reported after bind)
    pub port: u16,
    /// How long the initiator waits for the host peer to accept (ms)
    pub connection_timeout_ms: u64,
    /// How long each command waits for its response (ms)
    pub command_timeout_ms: u64,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            host: DEFAULT_BRIDGE_HOST.to_string(),
            port: 0,
            connection_timeout_ms: DEFAULT_CONNECTION_TIMEOUT_MS,
            command_timeout_ms: DEFAULT_COMMAND_TIMEOUT_MS,
        }
    }
}

impl BridgeConfig {
    /// Create a new config with defaults (bridge disabled)
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Enable or disable the bridge
    #[must_use]
    pub const fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Set the endpoint host
    #[must_use]
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    /// Set the endpoint port (0 = ephemeral)
    #[must_use]
    pub const fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Set the connection-establishment timeout in milliseconds
    #[must_use]
    pub const fn connection_timeout_ms(mut self, ms: u64) -> Self {
        self.connection_timeout_ms = ms;
        self
    }

    /// Set the per-command timeout in milliseconds
    #[must_use]
    pub const fn command_timeout_ms(mut self, ms: u64) -> Self {
        self.command_timeout_ms = ms;
        self
    }

    /// Connection-establishment timeout as a `Duration`
    #[must_use]
    pub const fn connection_timeout(&self) -> Duration {
        Duration::from_millis(self.connection_timeout_ms)
    }

    /// Per-command timeout as a `Duration`
    #[must_use]
    pub const fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }

    /// Endpoint address string (`host:port`)
    #[must_use]
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
