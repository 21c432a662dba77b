//! Command initiator: the test-process endpoint of the bridge.
//!
//! [`CommandInitiator::execute`] allocates a correlation id, sends one
//! frame on the shared connection, and awaits the matching response under
//! a per-command timeout. A reader task owns the receive side of the
//! connection and settles pending requests out of the table as frames
//! arrive. Routing is strictly by id, so responses may come back in any
//! order relative to the requests.

use crate::config::BridgeConfig;
use crate::protocol::{RemoteCommand, RemoteResponse};
use crate::result::{PuenteError, PuenteResult};
use crate::transport::{connect_with_deadline, read_line_frame, write_json_frame};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncWriteExt, BufReader};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::sync::{oneshot, Mutex, OnceCell};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

type PendingTable = Arc<Mutex<HashMap<u64, oneshot::Sender<RemoteResponse>>>>;

/// Sends commands to the host process and correlates the replies.
///
/// All correlation state is owned by the instance: the pending-request
/// table, the id counter, and the lazily-established shared connection.
/// Several initiators in one process serve several independent sessions
/// without cross-talk.
pub struct CommandInitiator {
    config: BridgeConfig,
    next_id: AtomicU64,
    pending: PendingTable,
    channel: OnceCell<Channel>,
    connect_failed: AtomicBool,
    unmatched: Arc<AtomicU64>,
    malformed: Arc<AtomicU64>,
}

/// Write side of the established connection plus the reader task that
/// drains the read side.
struct Channel {
    writer: Mutex<OwnedWriteHalf>,
    reader_task: JoinHandle<()>,
}

impl std::fmt::Debug for CommandInitiator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandInitiator")
            .field("endpoint", &self.config.endpoint())
            .field("connected", &self.channel.initialized())
            .finish()
    }
}

impl CommandInitiator {
    /// Create an initiator for one session.
    ///
    /// No connection is made here; the first `execute` dials the host
    /// endpoint.
    #[must_use]
    pub fn new(config: BridgeConfig) -> Self {
        Self {
            config,
            next_id: AtomicU64::new(0),
            pending: Arc::new(Mutex::new(HashMap::new())),
            channel: OnceCell::new(),
            connect_failed: AtomicBool::new(false),
            unmatched: Arc::new(AtomicU64::new(0)),
            malformed: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Whether the shared connection has been established
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.channel.initialized()
    }

    /// Responses that arrived for ids no longer pending (typically after
    /// their command timed out) and were dropped
    #[must_use]
    pub fn unmatched_responses(&self) -> u64 {
        self.unmatched.load(Ordering::Relaxed)
    }

    /// Frames that failed to parse and were dropped
    #[must_use]
    pub fn malformed_frames(&self) -> u64 {
        self.malformed.load(Ordering::Relaxed)
    }

    /// Invoke a named operation in the host process.
    ///
    /// Fails with [`PuenteError::Disabled`] before any network activity
    /// when the bridge is not enabled for this session. Otherwise this
    /// suspends at most twice: awaiting the shared connection (first call
    /// only) and awaiting the response under the configured command
    /// timeout.
    pub async fn execute(&self, op: &str, params: Vec<Value>) -> PuenteResult<Value> {
        self.execute_with_timeout(op, params, self.config.command_timeout())
            .await
    }

    /// Invoke a named operation with a one-off response timeout.
    ///
    /// On timeout the pending entry is removed, so a response that still
    /// arrives for this id later is dropped as unmatched.
    pub async fn execute_with_timeout(
        &self,
        op: &str,
        params: Vec<Value>,
        timeout: Duration,
    ) -> PuenteResult<Value> {
        if !self.config.enabled {
            return Err(PuenteError::Disabled);
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let command = RemoteCommand::new(id, op, params);
        let channel = self.channel().await?;

        let (sender, receiver) = oneshot::channel();
        self.pending.lock().await.insert(id, sender);

        if let Err(e) = self.send(channel, &command).await {
            self.pending.lock().await.remove(&id);
            return Err(e);
        }

        match tokio::time::timeout(timeout, receiver).await {
            Ok(Ok(response)) => response.into_result(),
            Ok(Err(_)) => Err(PuenteError::Execution {
                message: format!("response channel closed before command {} settled", id),
            }),
            Err(_) => {
                self.pending.lock().await.remove(&id);
                let ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
                Err(PuenteError::CommandTimeout { ms })
            }
        }
    }

    /// Invoke a named operation and decode the success payload
    pub async fn execute_as<R: DeserializeOwned>(
        &self,
        op: &str,
        params: Vec<Value>,
    ) -> PuenteResult<R> {
        let value = self.execute(op, params).await?;
        Ok(serde_json::from_value(value)?)
    }

    /// Tear the session down: stop the reader task and close the
    /// connection.
    ///
    /// Calls that are still in flight settle by their own command
    /// timeouts; reconnection is out of scope for a session.
    pub async fn close(&self) {
        if let Some(channel) = self.channel.get() {
            channel.reader_task.abort();
            let mut writer = channel.writer.lock().await;
            let _ = writer.shutdown().await;
            debug!("bridge connection closed");
        }
    }

    async fn send(&self, channel: &Channel, command: &RemoteCommand) -> PuenteResult<()> {
        trace!("command {} selects '{}'", command.id, command.op);
        let mut writer = channel.writer.lock().await;
        write_json_frame(&mut *writer, command).await
    }

    /// Shared connection, established on first use.
    ///
    /// A failed establishment is latched: once the connection window has
    /// passed, every later call fails fast with the same timeout error
    /// instead of re-dialing mid-session. The latch lives inside the
    /// initializer because calls queued on the cell re-run it after a
    /// failure; they must observe the first dial's outcome, not start
    /// their own window.
    async fn channel(&self) -> PuenteResult<&Channel> {
        self.channel
            .get_or_try_init(|| async {
                if self.connect_failed.load(Ordering::Relaxed) {
                    return Err(PuenteError::ConnectionTimeout {
                        ms: self.config.connection_timeout_ms,
                    });
                }

                let stream = match connect_with_deadline(
                    &self.config.host,
                    self.config.port,
                    self.config.connection_timeout_ms,
                )
                .await
                {
                    Ok(stream) => stream,
                    Err(e) => {
                        self.connect_failed.store(true, Ordering::Relaxed);
                        return Err(e);
                    }
                };

                let (read_half, write_half) = stream.into_split();
                let reader_task = tokio::spawn(route_responses(
                    BufReader::new(read_half),
                    Arc::clone(&self.pending),
                    Arc::clone(&self.unmatched),
                    Arc::clone(&self.malformed),
                ));
                Ok(Channel {
                    writer: Mutex::new(write_half),
                    reader_task,
                })
            })
            .await
    }
}

/// Reader pump: routes each inbound response to its pending caller.
///
/// Runs until EOF or a read error. Pending entries are deliberately left
/// in the table when the pump stops: after a dropped connection,
/// outstanding calls keep waiting and settle by their own command
/// timeouts.
async fn route_responses<R>(
    mut reader: R,
    pending: PendingTable,
    unmatched: Arc<AtomicU64>,
    malformed: Arc<AtomicU64>,
) where
    R: AsyncBufRead + Unpin,
{
    loop {
        let frame = match read_line_frame(&mut reader).await {
            Ok(Some(frame)) => frame,
            Ok(None) => {
                debug!("host closed the bridge connection");
                return;
            }
            Err(e) => {
                warn!("bridge read failed: {}", e);
                return;
            }
        };

        let response = match RemoteResponse::from_frame(&frame) {
            Ok(response) => response,
            Err(e) => {
                malformed.fetch_add(1, Ordering::Relaxed);
                warn!("dropping malformed response frame: {}", e);
                continue;
            }
        };

        let waiter = pending.lock().await.remove(&response.id);
        match waiter {
            Some(sender) => {
                trace!("response {} settled", response.id);
                // Fails only when the caller already stopped waiting;
                // the response is then dropped as a no-op.
                let _ = sender.send(response);
            }
            None => {
                unmatched.fetch_add(1, Ordering::Relaxed);
                debug!("dropping response for unknown id {}", response.id);
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Instant;
    use tokio::io::AsyncBufReadExt;
    use tokio::net::TcpListener;

    /// Scripted host peer: accepts one connection and hands the split
    /// halves to a script.
    async fn scripted_peer<F, Fut>(script: F) -> u16
    where
        F: FnOnce(
                BufReader<tokio::net::tcp::OwnedReadHalf>,
                OwnedWriteHalf,
            ) -> Fut
            + Send
            + 'static,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        let listener = TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let (read_half, write_half) = stream.into_split();
            script(BufReader::new(read_half), write_half).await;
        });
        port
    }

    async fn read_command(reader: &mut BufReader<tokio::net::tcp::OwnedReadHalf>) -> RemoteCommand {
        let mut line = String::new();
        reader.read_line(&mut line).await.unwrap();
        RemoteCommand::from_frame(line.trim()).unwrap()
    }

    async fn reply(writer: &mut OwnedWriteHalf, response: &RemoteResponse) {
        write_json_frame(writer, response).await.unwrap();
    }

    fn session_config(port: u16) -> BridgeConfig {
        BridgeConfig::new()
            .enabled(true)
            .port(port)
            .connection_timeout_ms(2_000)
            .command_timeout_ms(2_000)
    }

    mod gating_tests {
        use super::*;

        #[tokio::test]
        async fn test_disabled_bridge_fails_before_any_network_activity() {
            let initiator = CommandInitiator::new(BridgeConfig::new().port(1));
            let err = initiator.execute("answer", vec![]).await.unwrap_err();
            assert!(matches!(err, PuenteError::Disabled));
            assert!(!initiator.is_connected());
        }

        #[tokio::test]
        async fn test_connection_timeout_when_host_never_listens() {
            let listener = TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
            let port = listener.local_addr().unwrap().port();
            drop(listener);

            let config = BridgeConfig::new()
                .enabled(true)
                .port(port)
                .connection_timeout_ms(200);
            let initiator = CommandInitiator::new(config);

            let err = initiator.execute("answer", vec![]).await.unwrap_err();
            assert!(matches!(err, PuenteError::ConnectionTimeout { ms: 200 }));
        }

        #[tokio::test]
        async fn test_connection_failure_is_latched() {
            let listener = TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
            let port = listener.local_addr().unwrap().port();
            drop(listener);

            let config = BridgeConfig::new()
                .enabled(true)
                .port(port)
                .connection_timeout_ms(150);
            let initiator = CommandInitiator::new(config);

            let first = initiator.execute("answer", vec![]).await.unwrap_err();
            assert!(matches!(first, PuenteError::ConnectionTimeout { ms: 150 }));

            // The second call must not re-dial for another window.
            let start = Instant::now();
            let second = initiator.execute("answer", vec![]).await.unwrap_err();
            assert!(matches!(second, PuenteError::ConnectionTimeout { ms: 150 }));
            assert!(start.elapsed() < Duration::from_millis(100));
        }

        #[tokio::test]
        async fn test_queued_commands_share_one_failed_dial() {
            let listener = TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
            let port = listener.local_addr().unwrap().port();
            drop(listener);

            let config = BridgeConfig::new()
                .enabled(true)
                .port(port)
                .connection_timeout_ms(300);
            let initiator = CommandInitiator::new(config);

            // Both calls wait on the same establishment; the second must
            // not dial a second full window after the first fails.
            let start = Instant::now();
            let (first, second) = tokio::join!(
                initiator.execute("answer", vec![]),
                initiator.execute("answer", vec![]),
            );
            assert!(matches!(
                first.unwrap_err(),
                PuenteError::ConnectionTimeout { ms: 300 }
            ));
            assert!(matches!(
                second.unwrap_err(),
                PuenteError::ConnectionTimeout { ms: 300 }
            ));
            assert!(start.elapsed() < Duration::from_millis(500));
        }
    }

    mod correlation_tests {
        use super::*;

        #[tokio::test]
        async fn test_ids_start_at_zero_and_increment() {
            let port = scripted_peer(|mut reader, mut writer| async move {
                for _ in 0..3 {
                    let command = read_command(&mut reader).await;
                    reply(&mut writer, &RemoteResponse::success(command.id, json!(command.id)))
                        .await;
                }
            })
            .await;

            let initiator = CommandInitiator::new(session_config(port));
            for expected in 0..3_u64 {
                let value = initiator.execute("seq", vec![]).await.unwrap();
                assert_eq!(value, json!(expected));
            }
            initiator.close().await;
        }

        #[tokio::test]
        async fn test_responses_route_by_id_not_send_order() {
            let port = scripted_peer(|mut reader, mut writer| async move {
                let first = read_command(&mut reader).await;
                let second = read_command(&mut reader).await;
                // Reply to the later command first.
                for command in [second, first] {
                    let payload = command.params.into_iter().next().unwrap();
                    reply(&mut writer, &RemoteResponse::success(command.id, payload)).await;
                }
            })
            .await;

            let initiator = CommandInitiator::new(session_config(port));
            let (uno, dos) = tokio::join!(
                initiator.execute("echo", vec![json!("uno")]),
                initiator.execute("echo", vec![json!("dos")]),
            );
            assert_eq!(uno.unwrap(), json!("uno"));
            assert_eq!(dos.unwrap(), json!("dos"));
            initiator.close().await;
        }

        #[tokio::test]
        async fn test_unsolicited_response_is_dropped() {
            let port = scripted_peer(|mut reader, mut writer| async move {
                reply(&mut writer, &RemoteResponse::success(999, json!("ghost"))).await;
                let command = read_command(&mut reader).await;
                reply(&mut writer, &RemoteResponse::success(command.id, json!("real"))).await;
            })
            .await;

            let initiator = CommandInitiator::new(session_config(port));
            let value = initiator.execute("status", vec![]).await.unwrap();
            assert_eq!(value, json!("real"));
            assert_eq!(initiator.unmatched_responses(), 1);
            initiator.close().await;
        }

        #[tokio::test]
        async fn test_malformed_response_frame_is_counted_and_skipped() {
            let port = scripted_peer(|mut reader, mut writer| async move {
                let command = read_command(&mut reader).await;
                writer.write_all(b"garbage frame\n").await.unwrap();
                reply(&mut writer, &RemoteResponse::success(command.id, json!(1))).await;
            })
            .await;

            let initiator = CommandInitiator::new(session_config(port));
            let value = initiator.execute("status", vec![]).await.unwrap();
            assert_eq!(value, json!(1));
            assert_eq!(initiator.malformed_frames(), 1);
            initiator.close().await;
        }
    }

    mod timeout_tests {
        use super::*;

        #[tokio::test]
        async fn test_timeout_removes_pending_and_late_response_is_noop() {
            let port = scripted_peer(|mut reader, mut writer| async move {
                let slow = read_command(&mut reader).await;
                tokio::time::sleep(Duration::from_millis(150)).await;
                reply(&mut writer, &RemoteResponse::success(slow.id, json!("late"))).await;

                let next = read_command(&mut reader).await;
                reply(&mut writer, &RemoteResponse::success(next.id, json!("fresh"))).await;
            })
            .await;

            let initiator = CommandInitiator::new(session_config(port));

            let err = initiator
                .execute_with_timeout("slow", vec![], Duration::from_millis(50))
                .await
                .unwrap_err();
            assert!(matches!(err, PuenteError::CommandTimeout { ms: 50 }));

            // The late reply lands while the next command is in flight
            // and is dropped without settling anything.
            let value = initiator.execute("next", vec![]).await.unwrap();
            assert_eq!(value, json!("fresh"));
            assert_eq!(initiator.unmatched_responses(), 1);
            assert!(initiator.pending.lock().await.is_empty());
            initiator.close().await;
        }

        #[tokio::test]
        async fn test_each_call_times_out_independently() {
            let port = scripted_peer(|mut reader, mut writer| async move {
                let quick = read_command(&mut reader).await;
                let _hung = read_command(&mut reader).await;
                reply(&mut writer, &RemoteResponse::success(quick.id, json!("ok"))).await;
                // Never reply to the second command.
                std::future::pending::<()>().await;
            })
            .await;

            let initiator = CommandInitiator::new(session_config(port));
            let (quick, hung) = tokio::join!(
                initiator.execute("quick", vec![]),
                initiator.execute_with_timeout("hung", vec![], Duration::from_millis(80)),
            );
            assert_eq!(quick.unwrap(), json!("ok"));
            assert!(matches!(
                hung.unwrap_err(),
                PuenteError::CommandTimeout { ms: 80 }
            ));
            initiator.close().await;
        }
    }

    mod surface_tests {
        use super::*;

        #[tokio::test]
        async fn test_remote_error_message_is_verbatim() {
            let port = scripted_peer(|mut reader, mut writer| async move {
                let command = read_command(&mut reader).await;
                reply(&mut writer, &RemoteResponse::failure(command.id, "boom")).await;
            })
            .await;

            let initiator = CommandInitiator::new(session_config(port));
            let err = initiator.execute("boom", vec![]).await.unwrap_err();
            assert!(matches!(err, PuenteError::Execution { .. }));
            assert_eq!(err.to_string(), "boom");
            initiator.close().await;
        }

        #[tokio::test]
        async fn test_execute_as_decodes_payload() {
            let port = scripted_peer(|mut reader, mut writer| async move {
                let command = read_command(&mut reader).await;
                reply(
                    &mut writer,
                    &RemoteResponse::success(command.id, json!({"major": 1, "minor": 101})),
                )
                .await;
            })
            .await;

            #[derive(serde::Deserialize)]
            struct Version {
                major: u32,
                minor: u32,
            }

            let initiator = CommandInitiator::new(session_config(port));
            let version: Version = initiator.execute_as("version", vec![]).await.unwrap();
            assert_eq!(version.major, 1);
            assert_eq!(version.minor, 101);
            initiator.close().await;
        }

        #[tokio::test]
        async fn test_connection_is_reported_after_first_execute() {
            let port = scripted_peer(|mut reader, mut writer| async move {
                let command = read_command(&mut reader).await;
                reply(&mut writer, &RemoteResponse::success(command.id, json!(true))).await;
            })
            .await;

            let initiator = CommandInitiator::new(session_config(port));
            assert!(!initiator.is_connected());
            initiator.execute("ping", vec![]).await.unwrap();
            assert!(initiator.is_connected());
            initiator.close().await;
        }
    }
}
