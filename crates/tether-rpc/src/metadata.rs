//! Immutable per-handler metadata and stable id derivation.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

/// Coarse argument shape used for validation and client stub hints.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamShape {
    /// Any JSON value, including null.
    Any,
    /// JSON string.
    String,
    /// JSON number.
    Number,
    /// JSON boolean.
    Bool,
    /// JSON object.
    Object,
    /// JSON array.
    Array,
}

impl ParamShape {
    /// Signature token used in id derivation. Never change these: ids are
    /// cached by clients across sessions.
    pub fn token(self) -> &'static str {
        match self {
            Self::Any => "any",
            Self::String => "str",
            Self::Number => "num",
            Self::Bool => "bool",
            Self::Object => "obj",
            Self::Array => "arr",
        }
    }

    /// Whether a concrete argument satisfies this shape.
    pub fn matches(self, value: &Value) -> bool {
        match self {
            Self::Any => true,
            Self::String => value.is_string(),
            Self::Number => value.is_number(),
            Self::Bool => value.is_boolean(),
            Self::Object => value.is_object(),
            Self::Array => value.is_array(),
        }
    }
}

/// Per-handler behavior flags, populated once at discovery.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HandlerFlags {
    /// The handler returns nothing; its responses carry no payload field.
    pub is_void: bool,
    /// Execute on the async engine instead of the request thread.
    pub is_async: bool,
    /// Heavier isolation: run on a dedicated task, not the shared queue.
    pub uses_dedicated_worker: bool,
    /// Check argument arity and shapes before invoking.
    pub requires_validation: bool,
    /// Calls are currently rejected with an access error.
    pub is_access_restricted: bool,
    /// The handler pushes its real response later through a side channel.
    pub has_async_response_channel: bool,
}

/// The set of logical path tokens a handler-group is reachable under.
/// The token `"*"` matches any path.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathScope(BTreeSet<String>);

/// The wildcard path token.
pub const WILDCARD_PATH: &str = "*";

impl PathScope {
    /// Build a scope from path tokens.
    pub fn new<I, S>(paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(paths.into_iter().map(Into::into).collect())
    }

    /// The wildcard scope, reachable under any path.
    pub fn any() -> Self {
        Self::new([WILDCARD_PATH])
    }

    /// Whether a caller under `path` may reach this scope.
    pub fn accepts(&self, path: &str) -> bool {
        self.0.contains(WILDCARD_PATH) || self.0.contains(path)
    }

    /// Whether this scope intersects the given path set. An empty query set
    /// means "no restriction supplied" and intersects everything.
    pub fn intersects(&self, paths: &BTreeSet<String>) -> bool {
        paths.is_empty() || paths.iter().any(|p| self.accepts(p))
    }

    /// The scope's tokens, sorted.
    pub fn tokens(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }
}

/// Immutable facts about one exposed handler, owned by the registry.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HandlerMetadata {
    /// Stable numeric identifier, a pure function of the signature.
    pub id: u32,
    /// Name a remote caller uses on the name-based entry path.
    pub exposed_name: String,
    /// Owning handler-group name.
    pub group: String,
    /// Paths under which the owning group is reachable.
    pub path_scope: PathScope,
    /// Declared argument shapes.
    pub params: Vec<ParamShape>,
    /// Behavior flags.
    pub flags: HandlerFlags,
}

impl HandlerMetadata {
    /// Fully-qualified signature string, the id-derivation input.
    pub fn signature(&self) -> String {
        qualified_signature(&self.group, &self.exposed_name, &self.params)
    }
}

/// Render the fully-qualified signature of a handler.
pub fn qualified_signature(group: &str, name: &str, params: &[ParamShape]) -> String {
    let shapes: Vec<&str> = params.iter().map(|p| p.token()).collect();
    format!("{group}/{name}({})", shapes.join(","))
}

/// Derive the stable numeric id for a handler signature.
///
/// First four big-endian bytes of SHA-256 over the fully-qualified
/// signature, so the same build (and any build declaring the same
/// signature) always yields the same id — clients cache ids across page
/// reloads without re-fetching the descriptor.
pub fn derive_id(group: &str, name: &str, params: &[ParamShape]) -> u32 {
    let digest = Sha256::digest(qualified_signature(group, name, params).as_bytes());
    u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]])
}
