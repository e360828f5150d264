//! Per-call dispatch: resolve, gate, then execute or defer.
//!
//! Synchronous handlers run on the calling task and complete before the
//! dispatcher returns. Asynchronous handlers come back as a
//! [`DeferredCall`] for the caller to hand to the execution engine — the
//! engine lives above this crate, so deferral is expressed in the return
//! value rather than a callback.

use std::sync::Arc;
use std::time::Instant;

use metrics::{counter, histogram};
use serde_json::Value;
use tracing::{debug, warn};

use crate::errors::CallError;
use crate::protocol::{CallDescriptor, CallResponse};
use crate::registry::{BoundInvoker, InstanceProvider, MethodRegistry};
use crate::validation::validate_args;

/// Outcome of dispatching one call.
pub enum DispatchOutcome {
    /// The call finished (or failed) on the calling task.
    Completed(CallResponse),
    /// The call is async: submit it to the execution engine.
    Deferred(DeferredCall),
}

/// A resolved, validated call waiting for a worker.
pub struct DeferredCall {
    invoker: Arc<BoundInvoker>,
    args: Vec<Value>,
    provider: Arc<dyn InstanceProvider>,
    /// Transaction id echoed on the eventual response.
    pub txn: String,
}

impl DeferredCall {
    /// Whether the handler asked for a dedicated task instead of the
    /// shared worker queue.
    pub fn uses_dedicated_worker(&self) -> bool {
        self.invoker.metadata().flags.uses_dedicated_worker
    }

    /// Exposed name of the deferred handler.
    pub fn method(&self) -> &str {
        &self.invoker.metadata().exposed_name
    }

    /// Execute the deferred handler and build its response.
    pub async fn run(self) -> CallResponse {
        execute(&self.invoker, self.provider.as_ref(), self.args, &self.txn).await
    }
}

/// Resolves and executes calls against a scanned registry.
pub struct Dispatcher {
    registry: Arc<MethodRegistry>,
    provider: Arc<dyn InstanceProvider>,
}

impl Dispatcher {
    /// Create a dispatcher over a scanned registry and the DI collaborator
    /// that owns handler instances.
    pub fn new(registry: Arc<MethodRegistry>, provider: Arc<dyn InstanceProvider>) -> Self {
        Self { registry, provider }
    }

    /// The underlying registry.
    pub fn registry(&self) -> &Arc<MethodRegistry> {
        &self.registry
    }

    /// Dispatch one call: resolve by id or name, apply access and
    /// validation gates, then execute synchronously or defer.
    ///
    /// Every failure is returned as a completed error response — nothing
    /// here crashes the calling task.
    pub async fn dispatch(&self, call: CallDescriptor) -> DispatchOutcome {
        let invoker = match self.resolve(&call) {
            Ok(invoker) => invoker,
            Err(err) => {
                count_error("resolve", &err);
                return DispatchOutcome::Completed(err.to_response(&call.txn));
            }
        };

        let meta = invoker.metadata();
        counter!("bridge_calls_total", "method" => meta.exposed_name.clone()).increment(1);

        if meta.flags.is_access_restricted {
            let err = CallError::AccessRestricted {
                message: format!("'{}' is currently restricted", meta.exposed_name),
            };
            count_error(&meta.exposed_name, &err);
            return DispatchOutcome::Completed(err.to_response(&call.txn));
        }

        if let Err(err) = validate_args(meta, &call.args) {
            count_error(&meta.exposed_name, &err);
            return DispatchOutcome::Completed(err.to_response(&call.txn));
        }

        if meta.flags.is_async {
            debug!(method = meta.exposed_name, txn = call.txn, "deferring async call");
            return DispatchOutcome::Deferred(DeferredCall {
                invoker,
                args: call.args,
                provider: self.provider.clone(),
                txn: call.txn,
            });
        }

        let response = execute(&invoker, self.provider.as_ref(), call.args, &call.txn).await;
        DispatchOutcome::Completed(response)
    }

    /// Dispatch one call and run any deferred work inline. Used by the
    /// one-shot HTTP entry path, which has no long-lived sink to deliver
    /// an out-of-band response through.
    pub async fn dispatch_inline(&self, call: CallDescriptor) -> CallResponse {
        match self.dispatch(call).await {
            DispatchOutcome::Completed(response) => response,
            DispatchOutcome::Deferred(deferred) => deferred.run().await,
        }
    }

    fn resolve(&self, call: &CallDescriptor) -> Result<Arc<BoundInvoker>, CallError> {
        if let Some(id) = call.id {
            return self.registry.resolve(id).ok_or_else(|| CallError::NotFound {
                message: format!("no handler with id {id}"),
            });
        }
        if let Some(name) = call.name.as_deref() {
            let path = call.path.as_deref().unwrap_or("");
            if !self.registry.serves_path(path) {
                return Err(CallError::PathNotPermitted {
                    message: format!("no handler-group serves path '{path}'"),
                });
            }
            return self.registry.resolve_by_name(name, path);
        }
        Err(CallError::InvalidArgs {
            message: "call names neither an id nor a method name".into(),
        })
    }
}

/// Run a resolved handler and convert its result into a wire response.
/// Handler failures are recovered here; they never propagate.
async fn execute(
    invoker: &BoundInvoker,
    provider: &dyn InstanceProvider,
    args: Vec<Value>,
    txn: &str,
) -> CallResponse {
    let meta = invoker.metadata();
    let method = meta.exposed_name.clone();
    let start = Instant::now();

    let result = invoker.call(provider, args).await;

    let duration = start.elapsed();
    histogram!("bridge_call_duration_seconds", "method" => method.clone())
        .record(duration.as_secs_f64());
    if duration.as_secs() >= 5 {
        warn!(method, duration_secs = duration.as_secs_f64(), "slow call");
    }

    match result {
        Ok(value) => {
            if meta.flags.is_void || meta.flags.has_async_response_channel {
                CallResponse::void(txn)
            } else {
                CallResponse::success(txn, value)
            }
        }
        Err(err) => {
            count_error(&method, &err);
            warn!(method, txn, error = %err, "handler failed");
            err.to_response(txn)
        }
    }
}

fn count_error(method: &str, err: &CallError) {
    counter!(
        "bridge_call_errors_total",
        "method" => method.to_owned(),
        "error_type" => err.code()
    )
    .increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use crate::errors;
    use crate::metadata::{HandlerFlags, ParamShape, PathScope, derive_id};
    use crate::registry::{
        EntryPoint, FnEntryPoint, HandlerDecl, HandlerGroup, OwnerInstance, StatelessProvider,
    };
    use serde_json::json;

    struct FailEntry;

    #[async_trait]
    impl EntryPoint for FailEntry {
        async fn invoke(
            &self,
            _instance: OwnerInstance,
            _args: Vec<Value>,
        ) -> Result<Value, CallError> {
            Err(CallError::Execution {
                message: "boom".into(),
            })
        }
    }

    struct FlaggedGroup {
        flags: HandlerFlags,
        params: Vec<ParamShape>,
    }

    impl HandlerGroup for FlaggedGroup {
        fn name(&self) -> &str {
            "test"
        }

        fn path_scope(&self) -> PathScope {
            PathScope::new(["app"])
        }

        fn handlers(&self) -> Vec<HandlerDecl> {
            vec![
                HandlerDecl {
                    name: "echo".into(),
                    params: self.params.clone(),
                    flags: self.flags,
                    entry: Arc::new(FnEntryPoint(|mut args: Vec<Value>| async move {
                        Ok(args.pop().unwrap_or(Value::Null))
                    })),
                },
                HandlerDecl {
                    name: "fail".into(),
                    params: vec![],
                    flags: self.flags,
                    entry: Arc::new(FailEntry),
                },
            ]
        }
    }

    fn dispatcher_with(flags: HandlerFlags, params: Vec<ParamShape>) -> Dispatcher {
        let mut registry = MethodRegistry::new();
        let groups: Vec<Arc<dyn HandlerGroup>> = vec![Arc::new(FlaggedGroup { flags, params })];
        registry.scan(&groups).unwrap();
        Dispatcher::new(Arc::new(registry), Arc::new(StatelessProvider))
    }

    fn call_by_name(txn: &str, name: &str, args: Vec<Value>) -> CallDescriptor {
        CallDescriptor {
            txn: txn.into(),
            id: None,
            name: Some(name.into()),
            path: Some("app".into()),
            args,
        }
    }

    async fn completed(d: &Dispatcher, call: CallDescriptor) -> CallResponse {
        match d.dispatch(call).await {
            DispatchOutcome::Completed(r) => r,
            DispatchOutcome::Deferred(_) => panic!("expected completed outcome"),
        }
    }

    // ── Sync path ───────────────────────────────────────────────────

    #[tokio::test]
    async fn sync_call_by_name_succeeds() {
        let d = dispatcher_with(HandlerFlags::default(), vec![ParamShape::Any]);
        let resp = completed(&d, call_by_name("t1", "echo", vec![json!(42)])).await;
        assert!(resp.ok);
        assert_eq!(resp.txn, "t1");
        assert_eq!(resp.value.unwrap(), json!(42));
    }

    #[tokio::test]
    async fn sync_call_by_id_succeeds() {
        let d = dispatcher_with(HandlerFlags::default(), vec![ParamShape::Any]);
        let id = derive_id("test", "echo", &[ParamShape::Any]);
        let call = CallDescriptor {
            txn: "t2".into(),
            id: Some(id),
            name: None,
            path: None,
            args: vec![json!("hi")],
        };
        let resp = completed(&d, call).await;
        assert!(resp.ok);
        assert_eq!(resp.value.unwrap(), json!("hi"));
    }

    #[tokio::test]
    async fn unknown_id_is_structured_not_found() {
        let d = dispatcher_with(HandlerFlags::default(), vec![]);
        let call = CallDescriptor {
            txn: "t3".into(),
            id: Some(0xffff_ffff),
            name: None,
            path: None,
            args: vec![],
        };
        let resp = completed(&d, call).await;
        assert!(!resp.ok);
        assert_eq!(resp.err_code.as_deref(), Some(errors::NOT_FOUND));
        assert_eq!(resp.txn, "t3");
    }

    #[tokio::test]
    async fn unserved_path_is_rejected() {
        let d = dispatcher_with(HandlerFlags::default(), vec![]);
        let mut call = call_by_name("t4", "echo", vec![]);
        call.path = Some("elsewhere".into());
        let resp = completed(&d, call).await;
        assert_eq!(resp.err_code.as_deref(), Some(errors::PATH_NOT_PERMITTED));
    }

    #[tokio::test]
    async fn call_without_id_or_name_is_invalid() {
        let d = dispatcher_with(HandlerFlags::default(), vec![]);
        let call = CallDescriptor {
            txn: "t5".into(),
            id: None,
            name: None,
            path: None,
            args: vec![],
        };
        let resp = completed(&d, call).await;
        assert_eq!(resp.err_code.as_deref(), Some(errors::INVALID_ARGS));
    }

    #[tokio::test]
    async fn handler_failure_becomes_error_response() {
        let d = dispatcher_with(HandlerFlags::default(), vec![]);
        let resp = completed(&d, call_by_name("t6", "fail", vec![])).await;
        assert!(!resp.ok);
        assert_eq!(resp.err_code.as_deref(), Some(errors::EXECUTION_FAILED));
        // Sanitized: the raw "boom" never reaches the wire.
        assert_eq!(resp.err_msg.as_deref(), Some("Internal handler error"));
    }

    // ── Gates ───────────────────────────────────────────────────────

    #[tokio::test]
    async fn restricted_handler_is_rejected() {
        let flags = HandlerFlags {
            is_access_restricted: true,
            ..HandlerFlags::default()
        };
        let d = dispatcher_with(flags, vec![]);
        let resp = completed(&d, call_by_name("t7", "echo", vec![])).await;
        assert_eq!(resp.err_code.as_deref(), Some(errors::ACCESS_RESTRICTED));
    }

    #[tokio::test]
    async fn validation_gate_runs_before_handler() {
        let flags = HandlerFlags {
            requires_validation: true,
            ..HandlerFlags::default()
        };
        let d = dispatcher_with(flags, vec![ParamShape::String]);
        let resp = completed(&d, call_by_name("t8", "echo", vec![json!(5)])).await;
        assert_eq!(resp.err_code.as_deref(), Some(errors::INVALID_ARGS));
    }

    #[tokio::test]
    async fn void_success_has_no_value() {
        let flags = HandlerFlags {
            is_void: true,
            ..HandlerFlags::default()
        };
        let d = dispatcher_with(flags, vec![ParamShape::Any]);
        let resp = completed(&d, call_by_name("t9", "echo", vec![json!(1)])).await;
        assert!(resp.ok);
        assert!(resp.value.is_none());
        let wire = serde_json::to_value(&resp).unwrap();
        assert!(wire.get("value").is_none());
    }

    #[tokio::test]
    async fn side_channel_handler_gets_no_inline_value() {
        let flags = HandlerFlags {
            has_async_response_channel: true,
            ..HandlerFlags::default()
        };
        let d = dispatcher_with(flags, vec![ParamShape::Any]);
        let resp = completed(&d, call_by_name("t10", "echo", vec![json!(1)])).await;
        assert!(resp.ok);
        assert!(resp.value.is_none());
    }

    // ── Async path ──────────────────────────────────────────────────

    #[tokio::test]
    async fn async_call_is_deferred() {
        let flags = HandlerFlags {
            is_async: true,
            ..HandlerFlags::default()
        };
        let d = dispatcher_with(flags, vec![ParamShape::Any]);
        match d.dispatch(call_by_name("t11", "echo", vec![json!(7)])).await {
            DispatchOutcome::Deferred(deferred) => {
                assert_eq!(deferred.method(), "echo");
                assert_eq!(deferred.txn, "t11");
                assert!(!deferred.uses_dedicated_worker());
                let resp = deferred.run().await;
                assert!(resp.ok);
                assert_eq!(resp.value.unwrap(), json!(7));
            }
            DispatchOutcome::Completed(_) => panic!("expected deferred outcome"),
        }
    }

    #[tokio::test]
    async fn dedicated_worker_flag_carries_through() {
        let flags = HandlerFlags {
            is_async: true,
            uses_dedicated_worker: true,
            ..HandlerFlags::default()
        };
        let d = dispatcher_with(flags, vec![ParamShape::Any]);
        match d.dispatch(call_by_name("t12", "echo", vec![])).await {
            DispatchOutcome::Deferred(deferred) => assert!(deferred.uses_dedicated_worker()),
            DispatchOutcome::Completed(_) => panic!("expected deferred outcome"),
        }
    }

    #[tokio::test]
    async fn async_gates_still_apply_before_deferral() {
        let flags = HandlerFlags {
            is_async: true,
            is_access_restricted: true,
            ..HandlerFlags::default()
        };
        let d = dispatcher_with(flags, vec![]);
        let resp = completed(&d, call_by_name("t13", "echo", vec![])).await;
        assert_eq!(resp.err_code.as_deref(), Some(errors::ACCESS_RESTRICTED));
    }

    #[tokio::test]
    async fn inline_dispatch_runs_deferred_work() {
        let flags = HandlerFlags {
            is_async: true,
            ..HandlerFlags::default()
        };
        let d = dispatcher_with(flags, vec![ParamShape::Any]);
        let resp = d
            .dispatch_inline(call_by_name("t14", "echo", vec![json!("inline")]))
            .await;
        assert!(resp.ok);
        assert_eq!(resp.value.unwrap(), json!("inline"));
    }
}
