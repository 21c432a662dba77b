//! Puente: Remote Command Bridge for Out-of-Process Test APIs
//!
//! Puente (Spanish: "bridge") ships named commands from a test process to
//! a privileged host process, runs them there against a host-only API
//! handle, and routes each correlated result or error back to the caller.
//! Built for page-object suites that drive an application over WebDriver
//! but still need a side door into the application host itself.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                     PUENTE Architecture                          │
//! ├─────────────────────────────────────────────────────────────────┤
//! │   ┌────────────┐    ┌────────────┐    ┌────────────┐            │
//! │   │ Test       │    │ JSON line  │    │ Host       │            │
//! │   │ Session    │───►│ frames     │───►│ Executor   │            │
//! │   │ (initiator)│◄───│ over TCP   │◄───│ (registry) │            │
//! │   └────────────┘    └────────────┘    └────────────┘            │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The initiator tags every command with a monotonically increasing id
//! and keeps a pending-request table; the executor resolves each command
//! against a fixed registry of named operations and replies with the same
//! id. Responses may arrive in any order; routing is by id alone.

#![warn(missing_docs)]
// Lints are configured in workspace Cargo.toml [workspace.lints.clippy]

/// Bridge configuration: endpoint, enablement, and timeout windows
pub mod config;
/// Host-process endpoint: accept the connection, run commands, reply
pub mod executor;
/// Test-process endpoint: send commands, correlate replies by id
pub mod initiator;
/// Wire types for command and response frames
pub mod protocol;
/// Named-operation registry the executor resolves commands against
pub mod registry;
/// Error and result types shared across the bridge
pub mod result;
/// Session facade for page-object tests
pub mod session;
/// TCP endpoint helpers and newline-delimited JSON framing
pub mod transport;

pub use config::{
    BridgeConfig, DEFAULT_BRIDGE_HOST, DEFAULT_COMMAND_TIMEOUT_MS, DEFAULT_CONNECTION_TIMEOUT_MS,
};
pub use executor::{CommandExecutor, ExecutorHandle};
pub use initiator::CommandInitiator;
pub use protocol::{RemoteCommand, RemoteResponse};
pub use registry::{param, CommandHandler, CommandRegistry};
pub use result::{PuenteError, PuenteResult};
pub use session::BridgeSession;
pub use transport::{bind_endpoint, connect_with_deadline};

/// Prelude for convenient imports
pub mod prelude {
    pub use super::config::*;
    pub use super::executor::*;
    pub use super::initiator::*;
    pub use super::protocol::*;
    pub use super::registry::*;
    pub use super::result::*;
    pub use super::session::*;
    pub use super::transport::*;
}
