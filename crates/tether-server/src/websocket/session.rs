//! Per-client session loop — from upgrade through disconnect.

use std::sync::Arc;

use axum::extract::ws::{CloseFrame, Message, WebSocket, close_code};
use futures::{SinkExt, StreamExt};
use metrics::{counter, gauge, histogram};
use serde_json::json;
use tokio::sync::mpsc;
use tracing::{debug, info, instrument, warn};

use tether_rpc::dispatch::DispatchOutcome;
use tether_rpc::errors::{self, CAPACITY_EXCEEDED};
use tether_rpc::frame;
use tether_rpc::protocol::{CallBatch, CallResponse, Cmd, Envelope, ResponseBatch};

use super::connection::{ClientConnection, Outbound};
use crate::engine::AsyncWorkItem;
use crate::server::AppState;

/// Outbound channel depth per connection.
const OUTBOUND_BUFFER: usize = 1024;

/// Run a bridge session for one connected client.
///
/// 1. Registers the connection with the liveness monitor
/// 2. Greets with a `welco` envelope carrying the liveness timeout
/// 3. Dispatches inbound `data` batches; sync responses go straight back,
///    async calls go to the execution engine with this connection as sink
/// 4. Counts every inbound frame as liveness evidence
/// 5. Deregisters and cleans up on disconnect
#[instrument(skip_all, fields(client_id = %client_id))]
pub async fn run_ws_session(ws: WebSocket, client_id: String, state: AppState) {
    let (mut ws_tx, mut ws_rx) = ws.split();

    let (send_tx, mut send_rx) = mpsc::channel::<Outbound>(OUTBOUND_BUFFER);
    let connection = Arc::new(ClientConnection::new(client_id.clone(), send_tx));

    info!(client_id, "client connected");
    counter!("bridge_ws_connections_total").increment(1);
    gauge!("bridge_ws_connections_active").increment(1.0);

    let _ = state.monitor.register(&client_id, connection.clone());

    // Greet before anything else: the client learns its id and how long
    // it may stay silent.
    let welcome = Envelope::welcome(
        state.monitor.config().idle_timeout_ms(),
        json!({
            "connectionId": client_id,
            "timestamp": chrono::Utc::now().to_rfc3339(),
        }),
    );
    if let Ok(frame) = frame::encode_text(&welcome) {
        let _ = ws_tx.send(Message::Text(frame.into())).await;
    }

    // Writer task: the only owner of the socket's send half.
    let writer = tokio::spawn(async move {
        while let Some(outbound) = send_rx.recv().await {
            match outbound {
                Outbound::Frame(text) => {
                    let frame = Message::Text(text.as_str().to_owned().into());
                    if ws_tx.send(frame).await.is_err() {
                        break;
                    }
                }
                Outbound::Close(reason) => {
                    let frame = CloseFrame {
                        code: close_code::NORMAL,
                        reason: reason.into(),
                    };
                    let _ = ws_tx.send(Message::Close(Some(frame))).await;
                    break;
                }
            }
        }
    });

    while let Some(Ok(message)) = ws_rx.next().await {
        // Every inbound frame, control or data, is liveness evidence.
        state.monitor.observe_traffic(&client_id);

        let envelope = match message {
            Message::Text(text) => match frame::decode_text(&text) {
                Ok(envelope) => envelope,
                Err(error) => {
                    warn!(client_id, %error, "undecodable text frame");
                    let _ = connection
                        .send_envelope(&Envelope::err(errors::ERR_BAD_JSON, error.to_string()));
                    continue;
                }
            },
            Message::Binary(bytes) => match frame::decode_binary(&bytes) {
                Ok(envelope) => envelope,
                Err(error) => {
                    warn!(client_id, %error, "undecodable binary frame");
                    let _ = connection
                        .send_envelope(&Envelope::err(errors::ERR_BAD_JSON, error.to_string()));
                    continue;
                }
            },
            Message::Ping(_) | Message::Pong(_) => {
                state.monitor.observe_pong(&client_id);
                continue;
            }
            Message::Close(_) => {
                info!(client_id, "client sent close frame");
                break;
            }
        };

        match envelope.cmd {
            // The client echoing our probe (or probing us) — evidence only;
            // echoing back would ping-pong forever.
            Cmd::Ping => state.monitor.observe_pong(&client_id),
            Cmd::Bye => {
                info!(client_id, "client said bye");
                let _ = connection.send_envelope(&Envelope::bye());
                let _ = connection.request_close("bye");
                break;
            }
            Cmd::Api => {
                let descriptor = state.registry.descriptor();
                let _ = connection.send_envelope(&Envelope::data(descriptor.to_value()));
            }
            Cmd::Data => handle_batch(&connection, &state, envelope.data).await,
            Cmd::Welcome | Cmd::Err | Cmd::Instruction => {
                debug!(client_id, cmd = ?envelope.cmd, "ignoring server-only command from client");
                let _ = connection.send_envelope(&Envelope::err(
                    errors::ERR_UNKNOWN_CMD,
                    "command not accepted from clients",
                ));
            }
        }
    }

    info!(client_id, dropped = connection.drop_count(), "client disconnected");
    counter!("bridge_ws_disconnections_total").increment(1);
    gauge!("bridge_ws_connections_active").decrement(1.0);
    histogram!("bridge_ws_connection_duration_seconds").record(connection.age().as_secs_f64());
    let _ = state.monitor.deregister(&client_id);
    writer.abort();
}

/// Dispatch one inbound call batch. Sync results are answered in a single
/// `data` envelope; async calls are admitted to the engine and answer
/// later through the connection sink. Admission refusal is a synchronous
/// capacity error.
async fn handle_batch(
    connection: &Arc<ClientConnection>,
    state: &AppState,
    payload: Option<serde_json::Value>,
) {
    let batch: CallBatch = match payload.map(serde_json::from_value).transpose() {
        Ok(Some(batch)) => batch,
        Ok(None) => {
            let _ = connection
                .send_envelope(&Envelope::err(errors::ERR_BAD_BATCH, "data envelope without payload"));
            return;
        }
        Err(error) => {
            let _ = connection
                .send_envelope(&Envelope::err(errors::ERR_BAD_BATCH, error.to_string()));
            return;
        }
    };

    let mut responses: Vec<CallResponse> = Vec::with_capacity(batch.calls.len());
    for call in batch.calls {
        let txn = call.txn.clone();
        match state.dispatcher.dispatch(call).await {
            DispatchOutcome::Completed(response) => responses.push(response),
            DispatchOutcome::Deferred(deferred) => {
                let item = AsyncWorkItem {
                    call: deferred,
                    sink: connection.clone(),
                };
                if !state.engine.submit(item) {
                    responses.push(CallResponse::error(
                        txn,
                        CAPACITY_EXCEEDED,
                        "async backlog full, try again later",
                    ));
                }
            }
        }
    }

    if !responses.is_empty() {
        let batch = ResponseBatch { responses };
        match serde_json::to_value(&batch) {
            Ok(payload) => {
                if !connection.send_envelope(&Envelope::data(payload)) {
                    warn!(client_id = %connection.id, "response batch could not be queued");
                }
            }
            Err(error) => warn!(client_id = %connection.id, %error, "response batch unserializable"),
        }
    }
}
