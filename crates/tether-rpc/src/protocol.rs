//! Wire-format types matching the browser bridge protocol.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The `type` field carried by every envelope.
pub const ENVELOPE_TYPE: &str = "ws";

/// Envelope command token. Wire values are fixed for client compatibility.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Cmd {
    /// Server greeting sent once per connection; carries the liveness timeout.
    #[serde(rename = "welco")]
    Welcome,
    /// Liveness probe. Any inbound frame counts as a reply.
    #[serde(rename = "ping")]
    Ping,
    /// Orderly goodbye from either side.
    #[serde(rename = "bye")]
    Bye,
    /// Request for the registry descriptor.
    #[serde(rename = "api")]
    Api,
    /// Envelope-level failure (`errId` + `errMsg`).
    #[serde(rename = "err")]
    Err,
    /// Server-pushed instruction (side-channel responses).
    #[serde(rename = "ins")]
    Instruction,
    /// Call batches (client to server) and call responses (server to client).
    #[serde(rename = "data")]
    Data,
}

/// The compact JSON envelope every frame travels in.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    /// Always [`ENVELOPE_TYPE`].
    #[serde(rename = "type")]
    pub kind: String,
    /// Command token.
    pub cmd: Cmd,
    /// Command payload, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    /// Numeric error id (present when `cmd == "err"`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub err_id: Option<i64>,
    /// Error message (present when `cmd == "err"`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub err_msg: Option<String>,
    /// Liveness timeout in milliseconds (present when `cmd == "welco"`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
}

impl Envelope {
    fn bare(cmd: Cmd) -> Self {
        Self {
            kind: ENVELOPE_TYPE.to_owned(),
            cmd,
            data: None,
            err_id: None,
            err_msg: None,
            timeout: None,
        }
    }

    /// Build a `welco` greeting carrying the liveness timeout and payload.
    pub fn welcome(timeout_ms: u64, data: Value) -> Self {
        Self {
            data: Some(data),
            timeout: Some(timeout_ms),
            ..Self::bare(Cmd::Welcome)
        }
    }

    /// Build a `ping` probe.
    pub fn ping() -> Self {
        Self::bare(Cmd::Ping)
    }

    /// Build a `bye` frame.
    pub fn bye() -> Self {
        Self::bare(Cmd::Bye)
    }

    /// Build an `api` descriptor request.
    pub fn api() -> Self {
        Self::bare(Cmd::Api)
    }

    /// Build an envelope-level error frame.
    pub fn err(err_id: i64, err_msg: impl Into<String>) -> Self {
        Self {
            err_id: Some(err_id),
            err_msg: Some(err_msg.into()),
            ..Self::bare(Cmd::Err)
        }
    }

    /// Build a `data` envelope with the given payload.
    pub fn data(payload: Value) -> Self {
        Self {
            data: Some(payload),
            ..Self::bare(Cmd::Data)
        }
    }

    /// Build an `ins` instruction envelope with the given payload.
    pub fn instruction(payload: Value) -> Self {
        Self {
            data: Some(payload),
            ..Self::bare(Cmd::Instruction)
        }
    }
}

/// One call in a batch: a numeric id (preferred once known) or a name plus
/// path scope (first contact), with arguments and a correlation id.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallDescriptor {
    /// Transaction id echoed on the response for correlation.
    pub txn: String,
    /// Stable numeric handler id.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<u32>,
    /// Exposed method name (name-based entry path).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Caller's logical path (name-based entry path).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    /// Positional arguments.
    #[serde(default)]
    pub args: Vec<Value>,
}

/// A batch of calls sent in a `data` envelope (client to server).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CallBatch {
    /// Call descriptors, dispatched independently — no inter-call ordering.
    pub calls: Vec<CallDescriptor>,
}

/// A batch of responses sent in a `data` envelope (server to client).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ResponseBatch {
    /// One response per completed call.
    pub responses: Vec<CallResponse>,
}

/// The answer for one call. For void handlers `value` is absent, not null.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallResponse {
    /// Echoed transaction id.
    pub txn: String,
    /// Whether the call succeeded.
    pub ok: bool,
    /// Return value (absent for void handlers and on error).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    /// Machine-readable error code (present when `ok == false`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub err_code: Option<String>,
    /// Human-readable error message (present when `ok == false`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub err_msg: Option<String>,
}

impl CallResponse {
    /// Build a success response carrying a return value.
    pub fn success(txn: impl Into<String>, value: Value) -> Self {
        Self {
            txn: txn.into(),
            ok: true,
            value: Some(value),
            err_code: None,
            err_msg: None,
        }
    }

    /// Build a success response with no payload (void handlers).
    pub fn void(txn: impl Into<String>) -> Self {
        Self {
            txn: txn.into(),
            ok: true,
            value: None,
            err_code: None,
            err_msg: None,
        }
    }

    /// Build an error response.
    pub fn error(
        txn: impl Into<String>,
        code: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            txn: txn.into(),
            ok: false,
            value: None,
            err_code: Some(code.into()),
            err_msg: Some(message.into()),
        }
    }
}
