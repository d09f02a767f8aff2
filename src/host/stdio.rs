//! Stdin/stdout JSON bridge for the host command channel.
//!
//! Reads newline-delimited JSON `CommandEnvelope` messages from stdin,
//! dispatches them through the [`HostBridge`] router, and writes
//! `ResponseEnvelope` and `EventEnvelope` messages as newline-delimited
//! JSON to stdout.
//!
//! Stdout is exclusively reserved for the JSON protocol; all diagnostic
//! output (tracing, logs) must be routed to stderr.

use crate::error::{HuddleError, Result};
use crate::host::bridge::HostBridge;
use crate::host::contract::{CommandEnvelope, CommandName, ResponseEnvelope};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader, BufWriter};
use tokio::sync::Mutex;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Run the bridge over the process's stdin and stdout.
///
/// # Errors
///
/// Returns an error if stdin cannot be read or stdout cannot be written.
pub async fn run_stdio_bridge(bridge: Arc<HostBridge>) -> Result<()> {
    run_bridge_io(
        bridge,
        BufReader::new(tokio::io::stdin()),
        tokio::io::stdout(),
    )
    .await
}

/// Commands a single call may have pending before further ones are refused.
const CALL_LANE_CAPACITY: usize = 256;

type SharedWriter<W> = Arc<Mutex<BufWriter<W>>>;

/// Per-call command queue drained by its own dispatch task.
struct CallLane {
    tx: mpsc::Sender<CommandEnvelope>,
    task: JoinHandle<()>,
}

/// Run the bridge until `input` closes or a `runtime.stop` command is
/// received.
///
/// Commands naming a call are handed to that call's lane and dispatched in
/// arrival order there, so frames and speaking signals of one call keep
/// their transport order while a slow lookup in one call never holds up
/// another. Commands without a call are handled inline. Alongside the
/// reader, one task forwards coordinator runtime events into the host event
/// stream and another writes every host event to `output`.
///
/// On exit every lane is drained and every joined call is left before the
/// event writer is stopped.
///
/// # Errors
///
/// Returns an error if `input` cannot be read or `output` cannot be written.
pub async fn run_bridge_io<R, W>(bridge: Arc<HostBridge>, input: R, output: W) -> Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let writer = Arc::new(Mutex::new(BufWriter::new(output)));
    let cancel = CancellationToken::new();

    let runtime_forwarder = bridge.spawn_runtime_forwarder(cancel.clone());

    let event_writer = Arc::clone(&writer);
    let mut event_rx = bridge.events().subscribe();
    let event_cancel = cancel.clone();
    let event_handle = tokio::spawn(async move {
        loop {
            let received = tokio::select! {
                () = event_cancel.cancelled() => break,
                received = event_rx.recv() => received,
            };
            match received {
                Ok(event_envelope) => match serde_json::to_string(&event_envelope) {
                    Ok(json) => {
                        let mut w = event_writer.lock().await;
                        if let Err(e) = write_line(&mut *w, &json).await {
                            tracing::warn!(
                                error = %e,
                                "failed to write event envelope; stopping event forwarder"
                            );
                            break;
                        }
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "failed to serialize event envelope; skipping");
                    }
                },
                Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!(lagged = n, "event forwarder lagged; some events were dropped");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => {
                    tracing::info!("event broadcast channel closed; stopping event forwarder");
                    break;
                }
            }
        }
    });

    let mut lanes = HashMap::new();
    let reader_result = run_reader(&bridge, input, &writer, &mut lanes).await;
    close_lanes(&mut lanes).await;

    bridge.coordinator().shutdown().await;
    cancel.cancel();
    let _ = runtime_forwarder.await;
    let _ = event_handle.await;

    reader_result
}

/// Read line-by-line and hand each command to its call lane.
async fn run_reader<R, W>(
    bridge: &Arc<HostBridge>,
    mut reader: R,
    writer: &SharedWriter<W>,
    lanes: &mut HashMap<String, CallLane>,
) -> Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let mut line = String::new();

    loop {
        line.clear();
        let bytes_read = reader
            .read_line(&mut line)
            .await
            .map_err(|e| HuddleError::Channel(format!("failed to read command line: {e}")))?;

        if bytes_read == 0 {
            tracing::info!("input closed (EOF); shutting down bridge");
            break;
        }

        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let envelope: CommandEnvelope = match serde_json::from_str(trimmed) {
            Ok(env) => env,
            Err(e) => {
                tracing::warn!(error = %e, "failed to parse command envelope");
                let error_response = ResponseEnvelope::error(
                    "parse-error",
                    format!("failed to parse command envelope: {e}"),
                );
                write_response(writer, &error_response).await?;
                continue;
            }
        };

        if envelope.command == CommandName::RuntimeStop {
            close_lanes(lanes).await;
            let response = bridge.dispatch(&envelope).await;
            write_response(writer, &response).await?;
            tracing::info!("runtime.stop received; shutting down bridge");
            break;
        }

        let Some(call) = envelope.call_key().map(str::to_owned) else {
            let response = bridge.dispatch(&envelope).await;
            write_response(writer, &response).await?;
            continue;
        };

        let lane = lanes
            .entry(call.clone())
            .or_insert_with(|| spawn_lane(call.clone(), Arc::clone(bridge), Arc::clone(writer)));
        if let Err(e) = lane.tx.try_send(envelope) {
            let (envelope, state) = match e {
                TrySendError::Full(envelope) => (envelope, "busy"),
                TrySendError::Closed(envelope) => (envelope, "closed"),
            };
            tracing::warn!(
                call = %call,
                command = envelope.command.as_str(),
                state,
                "call lane refused command"
            );
            let response = ResponseEnvelope::error(
                envelope.request_id,
                format!(
                    "call {call} is {state}; {} was dropped",
                    envelope.command.as_str()
                ),
            );
            write_response(writer, &response).await?;
        }
    }

    Ok(())
}

/// Start the dispatch task for one call.
fn spawn_lane<W>(call: String, bridge: Arc<HostBridge>, writer: SharedWriter<W>) -> CallLane
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (tx, mut rx) = mpsc::channel::<CommandEnvelope>(CALL_LANE_CAPACITY);
    let task = tokio::spawn(async move {
        while let Some(envelope) = rx.recv().await {
            let response = bridge.dispatch(&envelope).await;
            if let Err(e) = write_response(&writer, &response).await {
                tracing::warn!(call = %call, error = %e, "failed to write response; closing call lane");
                break;
            }
        }
    });
    CallLane { tx, task }
}

/// Let every lane finish its pending commands, then drop it.
async fn close_lanes(lanes: &mut HashMap<String, CallLane>) {
    for (call, lane) in lanes.drain() {
        drop(lane.tx);
        if let Err(e) = lane.task.await {
            tracing::warn!(call = %call, error = %e, "call lane task failed");
        }
    }
}

async fn write_response<W: AsyncWrite + Unpin>(
    writer: &SharedWriter<W>,
    response: &ResponseEnvelope,
) -> Result<()> {
    let json = serde_json::to_string(response)
        .map_err(|e| HuddleError::Channel(format!("failed to serialize response: {e}")))?;
    let mut w = writer.lock().await;
    write_line(&mut *w, &json).await
}

/// Write a single JSON line and flush.
async fn write_line<W: AsyncWrite + Unpin>(writer: &mut W, json: &str) -> Result<()> {
    writer
        .write_all(json.as_bytes())
        .await
        .map_err(|e| HuddleError::Channel(format!("failed to write output: {e}")))?;
    writer
        .write_all(b"\n")
        .await
        .map_err(|e| HuddleError::Channel(format!("failed to write newline: {e}")))?;
    writer
        .flush()
        .await
        .map_err(|e| HuddleError::Channel(format!("failed to flush output: {e}")))?;
    Ok(())
}
