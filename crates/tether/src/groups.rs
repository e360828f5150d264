//! Built-in diagnostics handler-group.
//!
//! Registered by the binary so a fresh deployment has something to call;
//! also the living example of the `HandlerGroup` registration surface.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{Value, json};

use tether_rpc::metadata::{HandlerFlags, ParamShape, PathScope};
use tether_rpc::registry::{FnEntryPoint, HandlerDecl, HandlerGroup};

/// Diagnostics endpoints: echo, server time, and a deliberately slow
/// async echo for exercising the engine from a browser console.
pub struct DiagnosticsGroup;

impl HandlerGroup for DiagnosticsGroup {
    fn name(&self) -> &str {
        "diagnostics"
    }

    fn path_scope(&self) -> PathScope {
        PathScope::any()
    }

    fn handlers(&self) -> Vec<HandlerDecl> {
        vec![
            HandlerDecl {
                name: "echo".into(),
                params: vec![ParamShape::Any],
                flags: HandlerFlags::default(),
                entry: Arc::new(FnEntryPoint(|mut args: Vec<Value>| async move {
                    Ok(args.pop().unwrap_or(Value::Null))
                })),
            },
            HandlerDecl {
                name: "serverTime".into(),
                params: vec![],
                flags: HandlerFlags {
                    requires_validation: true,
                    ..HandlerFlags::default()
                },
                entry: Arc::new(FnEntryPoint(|_args: Vec<Value>| async move {
                    Ok(json!(chrono::Utc::now().to_rfc3339()))
                })),
            },
            HandlerDecl {
                name: "delayedEcho".into(),
                params: vec![ParamShape::Any, ParamShape::Number],
                flags: HandlerFlags {
                    is_async: true,
                    requires_validation: true,
                    ..HandlerFlags::default()
                },
                entry: Arc::new(FnEntryPoint(|args: Vec<Value>| async move {
                    // Capped so a stray argument cannot pin a worker.
                    let millis = args.get(1).and_then(Value::as_u64).unwrap_or(0).min(10_000);
                    tokio::time::sleep(Duration::from_millis(millis)).await;
                    Ok(args.into_iter().next().unwrap_or(Value::Null))
                })),
            },
        ]
    }
}
