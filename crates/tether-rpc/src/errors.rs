//! Error codes and error types for the dispatch core.

use crate::protocol::CallResponse;

// ── Call-level error code constants ─────────────────────────────────

/// No handler for the given id or name.
pub const NOT_FOUND: &str = "NOT_FOUND";
/// A name matched more than one handler under the caller's path.
pub const AMBIGUOUS_NAME: &str = "AMBIGUOUS_NAME";
/// The caller's path is served by no handler-group.
pub const PATH_NOT_PERMITTED: &str = "PATH_NOT_PERMITTED";
/// Argument count or shape rejected before the handler ran.
pub const INVALID_ARGS: &str = "INVALID_ARGS";
/// The handler is currently flagged restricted.
pub const ACCESS_RESTRICTED: &str = "ACCESS_RESTRICTED";
/// Async admission rejected due to backlog limits.
pub const CAPACITY_EXCEEDED: &str = "CAPACITY_EXCEEDED";
/// The handler body failed (or panicked, or timed out).
pub const EXECUTION_FAILED: &str = "EXECUTION_FAILED";

// ── Envelope-level error ids ────────────────────────────────────────

/// Frame was not valid JSON (or not a valid envelope).
pub const ERR_BAD_JSON: i64 = 1;
/// Envelope command not usable in this direction.
pub const ERR_UNKNOWN_CMD: i64 = 2;
/// `data` payload was not a well-formed call batch.
pub const ERR_BAD_BATCH: i64 = 3;

/// Per-call error. Every variant is recovered into a [`CallResponse`];
/// none of these propagate past the dispatcher.
#[derive(Debug, thiserror::Error)]
pub enum CallError {
    /// No handler for the given id or name.
    #[error("{message}")]
    NotFound {
        /// Description naming the missing id or name.
        message: String,
    },

    /// More than one handler matched a name under the caller's path.
    #[error("{message}")]
    Ambiguous {
        /// Description naming the ambiguous name and path.
        message: String,
    },

    /// The caller's path is not served by any handler-group.
    #[error("{message}")]
    PathNotPermitted {
        /// Description naming the rejected path.
        message: String,
    },

    /// Arguments rejected before the handler ran.
    #[error("{message}")]
    InvalidArgs {
        /// Description of the arity or shape mismatch.
        message: String,
    },

    /// The handler is currently flagged restricted.
    #[error("{message}")]
    AccessRestricted {
        /// Description naming the restricted handler.
        message: String,
    },

    /// Async admission rejected.
    #[error("{message}")]
    Capacity {
        /// Description of the capacity limit hit.
        message: String,
    },

    /// The handler body failed.
    #[error("{message}")]
    Execution {
        /// Raw failure description (sanitized before reaching the wire).
        message: String,
    },
}

impl CallError {
    /// Machine-readable error code for this variant.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => NOT_FOUND,
            Self::Ambiguous { .. } => AMBIGUOUS_NAME,
            Self::PathNotPermitted { .. } => PATH_NOT_PERMITTED,
            Self::InvalidArgs { .. } => INVALID_ARGS,
            Self::AccessRestricted { .. } => ACCESS_RESTRICTED,
            Self::Capacity { .. } => CAPACITY_EXCEEDED,
            Self::Execution { .. } => EXECUTION_FAILED,
        }
    }

    /// Convert into a wire response for the given transaction.
    ///
    /// Execution failures are sanitized: the client sees the code but not
    /// internal details.
    pub fn to_response(&self, txn: &str) -> CallResponse {
        CallResponse::error(txn, self.code(), crate::validation::sanitize_message(self))
    }
}

/// Startup-fatal registry error. Never surfaced to a remote caller; a
/// collision aborts `scan` and the process must not accept traffic.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    /// Two distinct methods derived the same numeric id.
    #[error("handler id collision: {id:#010x} claimed by both '{first}' and '{second}'")]
    IdCollision {
        /// The colliding id.
        id: u32,
        /// Fully-qualified signature already holding the id.
        first: String,
        /// Fully-qualified signature that collided.
        second: String,
    },
}
