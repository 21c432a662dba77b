//! Named operation registry for the command executor.
//!
//! The executor never evaluates code shipped from the test process. The
//! host registers a fixed set of named operations at session start and a
//! [`RemoteCommand`](crate::RemoteCommand) selects one by name. Each
//! handler receives the privileged API handle and the command's
//! positional parameters, and settles with a JSON value or a failure
//! message.

use crate::result::{PuenteError, PuenteResult};
use futures::future::BoxFuture;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

/// Boxed async handler stored in the registry.
///
/// The first argument is the privileged API handle; the second is the
/// command's positional parameters.
pub type CommandHandler<A> =
    Arc<dyn Fn(Arc<A>, Vec<Value>) -> BoxFuture<'static, PuenteResult<Value>> + Send + Sync>;

/// Fixed, executor-side table of named operations over a privileged API
/// handle `A`
pub struct CommandRegistry<A> {
    handlers: HashMap<String, CommandHandler<A>>,
}

impl<A> std::fmt::Debug for CommandRegistry<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandRegistry")
            .field("operations", &self.names())
            .finish()
    }
}

impl<A> Default for CommandRegistry<A> {
    fn default() -> Self {
        Self::new()
    }
}

impl<A> CommandRegistry<A> {
    /// Create an empty registry
    #[must_use]
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Register a named operation.
    ///
    /// Re-registering a name replaces the previous handler.
    ///
    /// # Example
    ///
    /// ```
    /// use jugar_puente::{param, CommandRegistry};
    /// use serde_json::json;
    ///
    /// struct Workbench;
    ///
    /// let mut registry: CommandRegistry<Workbench> = CommandRegistry::new();
    /// registry.register("add", |_api, params| async move {
    ///     let a: i64 = param(&params, 0)?;
    ///     let b: i64 = param(&params, 1)?;
    ///     Ok(json!(a + b))
    /// });
    /// assert!(registry.contains("add"));
    /// ```
    pub fn register<F, Fut>(&mut self, name: impl Into<String>, handler: F)
    where
        F: Fn(Arc<A>, Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = PuenteResult<Value>> + Send + 'static,
    {
        self.handlers.insert(
            name.into(),
            Arc::new(
                move |api, params| -> BoxFuture<'static, PuenteResult<Value>> {
                    Box::pin(handler(api, params))
                },
            ),
        );
    }

    /// Look up a handler by operation name
    #[must_use]
    pub fn handler(&self, name: &str) -> Option<CommandHandler<A>> {
        self.handlers.get(name).cloned()
    }

    /// Whether an operation name is registered
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    /// Registered operation names, sorted
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.handlers.keys().cloned().collect();
        names.sort();
        names
    }

    /// Number of registered operations
    #[must_use]
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Whether the registry is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

/// Extract a typed positional parameter.
///
/// Fails with a descriptive execution error when the parameter is absent
/// or has the wrong shape, so the initiator sees exactly what was wrong
/// with the call.
pub fn param<T: DeserializeOwned>(params: &[Value], index: usize) -> PuenteResult<T> {
    let value = params.get(index).ok_or_else(|| PuenteError::Execution {
        message: format!("missing parameter {}", index),
    })?;
    serde_json::from_value(value.clone()).map_err(|e| PuenteError::Execution {
        message: format!("parameter {}: {}", index, e),
    })
}
