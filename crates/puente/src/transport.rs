//! Transport establishment and framing shared by both endpoints.
//!
//! The executor binds a loopback TCP listener on the orchestrator-chosen
//! port; the initiator dials it with retries under a bounded deadline.
//! Frames are newline-delimited JSON texts in both directions.

use crate::result::{PuenteError, PuenteResult};
use serde::Serialize;
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, trace};

/// Interval between connection attempts while dialing
const DIAL_RETRY_INTERVAL_MS: u64 = 50;

/// Bind the executor's listening endpoint.
///
/// Port 0 requests an ephemeral port; the actually-bound port is returned
/// so the session orchestrator can hand it to the initiator.
pub async fn bind_endpoint(host: &str, port: u16) -> PuenteResult<(TcpListener, u16)> {
    let listener = TcpListener::bind((host, port)).await?;
    let bound = listener.local_addr()?.port();
    debug!("bridge endpoint listening on {}:{}", host, bound);
    Ok((listener, bound))
}

/// Dial the executor's endpoint, retrying until the deadline passes.
///
/// The host process may still be starting when the initiator first dials,
/// so refused connections are retried on a short interval until
/// `timeout_ms` elapses.
pub async fn connect_with_deadline(
    host: &str,
    port: u16,
    timeout_ms: u64,
) -> PuenteResult<TcpStream> {
    let start = Instant::now();
    let timeout = Duration::from_millis(timeout_ms);

    loop {
        match TcpStream::connect((host, port)).await {
            Ok(stream) => {
                debug!("connected to bridge endpoint {}:{}", host, port);
                return Ok(stream);
            }
            Err(e) => {
                trace!("bridge endpoint not ready: {}", e);
            }
        }

        if start.elapsed() >= timeout {
            return Err(PuenteError::ConnectionTimeout { ms: timeout_ms });
        }

        tokio::time::sleep(Duration::from_millis(DIAL_RETRY_INTERVAL_MS)).await;
    }
}

/// Write one JSON frame followed by a newline, then flush
pub async fn write_json_frame<W, T>(writer: &mut W, frame: &T) -> PuenteResult<()>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let text = serde_json::to_string(frame)?;
    trace!("send frame: {}", text);
    writer.write_all(text.as_bytes()).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await?;
    Ok(())
}

/// Read one newline-delimited frame, trimmed; `None` on clean EOF
pub async fn read_line_frame<R>(reader: &mut R) -> PuenteResult<Option<String>>
where
    R: AsyncBufRead + Unpin,
{
    let mut line = String::new();
    let read = reader.read_line(&mut line).await?;
    if read == 0 {
        return Ok(None);
    }
    Ok(Some(line.trim().to_string()))
}
