//! Session facade tying the bridge into a test.
//!
//! A [`BridgeSession`] wraps one [`CommandInitiator`] and exposes the
//! small surface a page-object test needs: run a named operation in the
//! host, optionally with a one-off timeout or a typed result.

use crate::config::BridgeConfig;
use crate::initiator::CommandInitiator;
use crate::result::PuenteResult;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::time::Duration;

/// One test session's handle on the host bridge.
///
/// Construction is infallible and makes no connection; a disabled or
/// unreachable bridge surfaces on the first `execute_in_host` call.
#[derive(Debug)]
pub struct BridgeSession {
    initiator: CommandInitiator,
}

impl BridgeSession {
    /// Create a session over the given bridge configuration
    #[must_use]
    pub fn new(config: BridgeConfig) -> Self {
        Self {
            initiator: CommandInitiator::new(config),
        }
    }

    /// Run a named operation in the host process and return its result
    pub async fn execute_in_host(&self, op: &str, params: Vec<Value>) -> PuenteResult<Value> {
        self.initiator.execute(op, params).await
    }

    /// Run a named operation with a one-off response timeout
    pub async fn execute_in_host_with_timeout(
        &self,
        op: &str,
        params: Vec<Value>,
        timeout: Duration,
    ) -> PuenteResult<Value> {
        self.initiator.execute_with_timeout(op, params, timeout).await
    }

    /// Run a named operation and decode the result into `R`
    pub async fn execute_in_host_as<R: DeserializeOwned>(
        &self,
        op: &str,
        params: Vec<Value>,
    ) -> PuenteResult<R> {
        self.initiator.execute_as(op, params).await
    }

    /// The initiator backing this session
    #[must_use]
    pub const fn initiator(&self) -> &CommandInitiator {
        &self.initiator
    }

    /// Close the underlying connection; safe to call more than once
    pub async fn close(&self) {
        self.initiator.close().await;
    }
}
