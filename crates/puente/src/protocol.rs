//! Wire protocol for the remote command bridge.
//!
//! Frames are UTF-8 JSON texts, one per line. A [`RemoteCommand`] travels
//! from the initiator to the executor; the matching [`RemoteResponse`]
//! travels back carrying the same correlation id. There is no protocol
//! versioning: both endpoints ship in the same build.

use crate::result::{PuenteError, PuenteResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A command sent from the test process to the privileged host process
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteCommand {
    /// Correlation id, unique within a session, minted by the initiator
    pub id: u64,
    /// Name of the registered operation to invoke (`"fn"` on the wire)
    #[serde(rename = "fn")]
    pub op: String,
    /// Positional arguments as structurally cloned JSON values
    #[serde(default)]
    pub params: Vec<Value>,
}

impl RemoteCommand {
    /// Create a command
    #[must_use]
    pub fn new(id: u64, op: impl Into<String>, params: Vec<Value>) -> Self {
        Self {
            id,
            op: op.into(),
            params,
        }
    }

    /// Serialize into a single wire frame (no trailing newline)
    pub fn to_frame(&self) -> PuenteResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parse a wire frame
    pub fn from_frame(frame: &str) -> PuenteResult<Self> {
        Ok(serde_json::from_str(frame)?)
    }
}

/// The executor's reply to one [`RemoteCommand`].
///
/// Exactly one of `result`/`error` is populated; the absent field is
/// omitted from the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteResponse {
    /// Correlation id of the command this responds to
    pub id: u64,
    /// Success payload, absent on failure
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Failure message, absent on success
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RemoteResponse {
    /// Build a success response
    #[must_use]
    pub fn success(id: u64, result: Value) -> Self {
        Self {
            id,
            result: Some(result),
            error: None,
        }
    }

    /// Build a failure response
    #[must_use]
    pub fn failure(id: u64, message: impl Into<String>) -> Self {
        Self {
            id,
            result: None,
            error: Some(message.into()),
        }
    }

    /// Whether this response reports success
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.error.is_none()
    }

    /// Serialize into a single wire frame (no trailing newline)
    pub fn to_frame(&self) -> PuenteResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parse a wire frame
    pub fn from_frame(frame: &str) -> PuenteResult<Self> {
        Ok(serde_json::from_str(frame)?)
    }

    /// Settle into the caller-facing result.
    ///
    /// A populated `error` wins. An absent `result` on a success response
    /// settles as JSON null: the command ran and produced no value.
    pub fn into_result(self) -> PuenteResult<Value> {
        match self.error {
            Some(message) => Err(PuenteError::Execution { message }),
            None => Ok(self.result.unwrap_or(Value::Null)),
        }
    }
}
