//! Read-only structural description of the registered call surface.
//!
//! Built once when the registry scan completes and immutable for the
//! process lifetime; remote clients use it to generate their call stubs.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::metadata::{HandlerFlags, ParamShape};

/// One exposed method as seen by a remote client.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MethodDescriptor {
    /// Stable numeric id to use on subsequent calls.
    pub id: u32,
    /// Exposed name for the name-based entry path.
    pub name: String,
    /// Argument shape hints.
    pub params: Vec<ParamShape>,
    /// Behavior flags (clients skip waiting for inline values on void and
    /// side-channel handlers).
    pub flags: HandlerFlags,
}

/// One handler-group and its reachable paths.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupDescriptor {
    /// Group name.
    pub name: String,
    /// Path tokens, sorted; `"*"` means any.
    pub paths: Vec<String>,
    /// The group's methods.
    pub methods: Vec<MethodDescriptor>,
}

/// The full descriptor served over `GET /api` and the WS `api` command.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiDescriptor {
    /// All registered groups.
    pub groups: Vec<GroupDescriptor>,
}

impl ApiDescriptor {
    /// A descriptor with no groups (a registry that has not scanned).
    pub fn empty() -> Self {
        Self { groups: Vec::new() }
    }

    /// Serialize for an envelope payload.
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}
