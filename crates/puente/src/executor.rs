//! Command executor: the host-process endpoint of the bridge.
//!
//! The executor listens on the orchestrator-chosen port, accepts the
//! single initiator connection, and runs each inbound command in its own
//! task, so a slow operation never holds up the ones behind it. Every
//! failure while resolving or running an operation becomes an error
//! response carrying the command's id; a frame without a usable id is
//! logged and dropped, since no response can be correlated for it.

use crate::config::BridgeConfig;
use crate::protocol::{RemoteCommand, RemoteResponse};
use crate::registry::CommandRegistry;
use crate::result::{PuenteError, PuenteResult};
use crate::transport::{bind_endpoint, read_line_frame, write_json_frame};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncWrite, BufReader};
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

/// Executor endpoint hosting a registry of named operations against a
/// privileged API handle `A`
pub struct CommandExecutor<A> {
    api: Arc<A>,
    registry: Arc<CommandRegistry<A>>,
    listener: TcpListener,
    port: u16,
    malformed: Arc<AtomicU64>,
}

impl<A> std::fmt::Debug for CommandExecutor<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandExecutor")
            .field("port", &self.port)
            .field("operations", &self.registry.names())
            .finish()
    }
}

impl<A: Send + Sync + 'static> CommandExecutor<A> {
    /// Bind the listening endpoint for one session.
    ///
    /// The registry is fixed from here on: commands can only select
    /// operations registered before the bind.
    pub async fn bind(
        api: A,
        registry: CommandRegistry<A>,
        config: &BridgeConfig,
    ) -> PuenteResult<Self> {
        let (listener, port) = bind_endpoint(&config.host, config.port).await?;
        Ok(Self {
            api: Arc::new(api),
            registry: Arc::new(registry),
            listener,
            port,
            malformed: Arc::new(AtomicU64::new(0)),
        })
    }

    /// The actually-bound port (differs from the configured one when the
    /// orchestrator asked for port 0)
    #[must_use]
    pub const fn local_port(&self) -> u16 {
        self.port
    }

    /// Frames that failed to parse and were dropped without a reply
    #[must_use]
    pub fn malformed_frames(&self) -> u64 {
        self.malformed.load(Ordering::Relaxed)
    }

    /// Accept the initiator's connection and serve commands until it
    /// closes the transport.
    pub async fn serve(self) -> PuenteResult<()> {
        let (stream, peer) = self.listener.accept().await?;
        debug!("initiator connected from {}", peer);
        let (read_half, write_half) = stream.into_split();
        serve_frames(
            BufReader::new(read_half),
            write_half,
            self.api,
            self.registry,
            self.malformed,
        )
        .await
    }

    /// Spawn [`serve`](Self::serve) onto the runtime and hand back the
    /// bound port plus the serving task.
    #[must_use]
    pub fn spawn(self) -> ExecutorHandle {
        let port = self.port;
        let malformed = Arc::clone(&self.malformed);
        let task = tokio::spawn(self.serve());
        ExecutorHandle {
            port,
            malformed,
            task,
        }
    }
}

/// Handle to an executor serving in the background
#[derive(Debug)]
pub struct ExecutorHandle {
    port: u16,
    malformed: Arc<AtomicU64>,
    task: JoinHandle<PuenteResult<()>>,
}

impl ExecutorHandle {
    /// Port the executor is listening on
    #[must_use]
    pub const fn port(&self) -> u16 {
        self.port
    }

    /// Frames dropped as malformed so far
    #[must_use]
    pub fn malformed_frames(&self) -> u64 {
        self.malformed.load(Ordering::Relaxed)
    }

    /// Wait for the serve loop to finish (the initiator closed the
    /// transport)
    pub async fn join(self) -> PuenteResult<()> {
        match self.task.await {
            Ok(result) => result,
            Err(e) => Err(PuenteError::Execution {
                message: format!("executor task failed: {}", e),
            }),
        }
    }

    /// Stop serving without waiting for the initiator to disconnect
    pub fn abort(&self) {
        self.task.abort();
    }
}

/// Frame loop: commands in, responses out, until EOF.
///
/// Commands run in their own tasks and reply in completion order, so the
/// initiator may see responses in any order relative to the requests.
/// The writer sits behind a lock to keep each response frame whole.
async fn serve_frames<A, R, W>(
    mut reader: R,
    writer: W,
    api: Arc<A>,
    registry: Arc<CommandRegistry<A>>,
    malformed: Arc<AtomicU64>,
) -> PuenteResult<()>
where
    A: Send + Sync + 'static,
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let writer = Arc::new(Mutex::new(writer));
    while let Some(frame) = read_line_frame(&mut reader).await? {
        let command = match RemoteCommand::from_frame(&frame) {
            Ok(command) => command,
            Err(e) => {
                malformed.fetch_add(1, Ordering::Relaxed);
                warn!("dropping malformed command frame: {}", e);
                continue;
            }
        };

        trace!("command {} selects '{}'", command.id, command.op);
        let api = Arc::clone(&api);
        let registry = Arc::clone(&registry);
        let writer = Arc::clone(&writer);
        tokio::spawn(async move {
            let response = dispatch(api, registry, command).await;
            if let Err(e) = write_json_frame(&mut *writer.lock().await, &response).await {
                warn!("failed to write response {}: {}", response.id, e);
            }
        });
    }

    debug!("initiator closed the bridge connection");
    Ok(())
}

/// Run one command to completion, converting every failure into an error
/// response carrying the command's id.
async fn dispatch<A>(
    api: Arc<A>,
    registry: Arc<CommandRegistry<A>>,
    command: RemoteCommand,
) -> RemoteResponse
where
    A: Send + Sync + 'static,
{
    let RemoteCommand { id, op, params } = command;

    let handler = match registry.handler(&op) {
        Some(handler) => handler,
        None => return RemoteResponse::failure(id, format!("unknown command: {}", op)),
    };

    // The extra task turns a handler panic into a reportable failure
    // instead of a lost response.
    match tokio::spawn((*handler)(api, params)).await {
        Ok(Ok(value)) => RemoteResponse::success(id, value),
        Ok(Err(e)) => RemoteResponse::failure(id, e.to_string()),
        Err(join_error) => {
            let message = if join_error.is_panic() {
                match join_error.into_panic().downcast::<String>() {
                    Ok(text) => format!("command '{}' panicked: {}", op, text),
                    Err(payload) => match payload.downcast::<&'static str>() {
                        Ok(text) => format!("command '{}' panicked: {}", op, text),
                        Err(_) => format!("command '{}' panicked", op),
                    },
                }
            } else {
                format!("command '{}' was cancelled", op)
            };
            warn!("{}", message);
            RemoteResponse::failure(id, message)
        }
    }
}
