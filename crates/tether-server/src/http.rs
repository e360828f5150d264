//! Name-based HTTP entry path.
//!
//! `POST /call/{path}` takes a call batch and answers inline. A one-shot
//! request has no long-lived sink, so async-flagged handlers execute
//! inline here; the WebSocket path is where the engine earns its keep.

use axum::Json;
use axum::extract::{Path, State};

use tether_rpc::protocol::{CallBatch, ResponseBatch};

use crate::server::AppState;

/// `POST /call/{path}` — dispatch a name-based call batch inline.
///
/// The path segment is the caller's path scope; any `path` field inside
/// the descriptors is overridden by it.
pub async fn call_handler(
    State(state): State<AppState>,
    Path(path): Path<String>,
    Json(batch): Json<CallBatch>,
) -> Json<ResponseBatch> {
    let mut responses = Vec::with_capacity(batch.calls.len());
    for mut call in batch.calls {
        call.path = Some(path.clone());
        responses.push(state.dispatcher.dispatch_inline(call).await);
    }
    Json(ResponseBatch { responses })
}
