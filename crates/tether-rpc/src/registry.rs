//! Method registry: discovery, stable ids, and bound invokers.
//!
//! `scan` runs exactly once at startup, before the transport accepts
//! traffic. Afterwards the registry is read-only and lock-free; `resolve`,
//! `resolve_by_name`, and `filter_by_path` are safe to call from any number
//! of request tasks concurrently.

use std::any::Any;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, info};

use crate::descriptor::{ApiDescriptor, GroupDescriptor, MethodDescriptor};
use crate::errors::{CallError, RegistryError};
use crate::metadata::{HandlerFlags, HandlerMetadata, ParamShape, PathScope, derive_id};

/// An owner instance obtained from the container for the span of one call.
pub type OwnerInstance = Arc<dyn Any + Send + Sync>;

/// The DI collaborator that owns handler instances. One instance is
/// acquired per call and released after it, never held across calls.
#[async_trait]
pub trait InstanceProvider: Send + Sync {
    /// Obtain an owner instance for the named group.
    async fn acquire(&self, group: &str) -> Result<OwnerInstance, CallError>;

    /// Release an instance once the call has finished.
    async fn release(&self, group: &str, instance: OwnerInstance);
}

/// Provider for stateless handler-groups: every call gets a unit instance.
pub struct StatelessProvider;

#[async_trait]
impl InstanceProvider for StatelessProvider {
    async fn acquire(&self, _group: &str) -> Result<OwnerInstance, CallError> {
        Ok(Arc::new(()))
    }

    async fn release(&self, _group: &str, _instance: OwnerInstance) {}
}

/// A scan-time-resolved invocation entry point. No name or signature lookup
/// happens at call time; the registry hands the entry its owner instance
/// and arguments directly.
#[async_trait]
pub trait EntryPoint: Send + Sync {
    /// Invoke the bound method.
    async fn invoke(&self, instance: OwnerInstance, args: Vec<Value>) -> Result<Value, CallError>;
}

/// Adapter turning an async closure into an [`EntryPoint`] (for handlers
/// that ignore their owner instance).
pub struct FnEntryPoint<F>(pub F);

#[async_trait]
impl<F, Fut> EntryPoint for FnEntryPoint<F>
where
    F: Fn(Vec<Value>) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, CallError>> + Send,
{
    async fn invoke(&self, _instance: OwnerInstance, args: Vec<Value>) -> Result<Value, CallError> {
        (self.0)(args).await
    }
}

/// One exposed method as declared by its handler-group: the exposure tag
/// the registry turns into metadata plus a bound invoker.
pub struct HandlerDecl {
    /// Exposed name.
    pub name: String,
    /// Declared argument shapes.
    pub params: Vec<ParamShape>,
    /// Behavior flags.
    pub flags: HandlerFlags,
    /// Resolved entry point.
    pub entry: Arc<dyn EntryPoint>,
}

/// A candidate owner of handlers, tagged as a remoting endpoint.
pub trait HandlerGroup: Send + Sync {
    /// Group name, unique among candidates.
    fn name(&self) -> &str;

    /// Paths under which this group is reachable.
    fn path_scope(&self) -> PathScope;

    /// The group's exposed method declarations.
    fn handlers(&self) -> Vec<HandlerDecl>;
}

/// The injected enumeration of candidate handler-groups — the only thing
/// the registry needs from the DI container at scan time.
pub trait CandidateSource: Send + Sync {
    /// Enumerate candidate groups.
    fn candidates(&self) -> Vec<Arc<dyn HandlerGroup>>;
}

impl CandidateSource for Vec<Arc<dyn HandlerGroup>> {
    fn candidates(&self) -> Vec<Arc<dyn HandlerGroup>> {
        self.clone()
    }
}

/// Metadata plus the resolved entry point for one handler. The owner
/// instance is acquired per call and released on every exit path.
pub struct BoundInvoker {
    meta: HandlerMetadata,
    entry: Arc<dyn EntryPoint>,
}

impl std::fmt::Debug for BoundInvoker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoundInvoker")
            .field("meta", &self.meta)
            .finish_non_exhaustive()
    }
}

impl BoundInvoker {
    /// The handler's immutable metadata.
    pub fn metadata(&self) -> &HandlerMetadata {
        &self.meta
    }

    /// Run the handler: acquire an owner instance, invoke the entry point,
    /// release the instance whether the call succeeded or failed.
    pub async fn call(
        &self,
        provider: &dyn InstanceProvider,
        args: Vec<Value>,
    ) -> Result<Value, CallError> {
        let instance = provider.acquire(&self.meta.group).await?;
        let result = self.entry.invoke(instance.clone(), args).await;
        provider.release(&self.meta.group, instance).await;
        result
    }
}

/// A handler-group as recorded in the path index.
#[derive(Clone, Debug)]
pub struct GroupEntry {
    /// Group name.
    pub name: String,
    /// Paths under which the group is reachable.
    pub path_scope: PathScope,
    /// Ids of the group's handlers.
    pub handler_ids: Vec<u32>,
}

/// The id-to-invoker arena plus the group path index.
pub struct MethodRegistry {
    by_id: HashMap<u32, Arc<BoundInvoker>>,
    groups: Vec<Arc<GroupEntry>>,
    descriptor: Arc<ApiDescriptor>,
}

impl MethodRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            by_id: HashMap::new(),
            groups: Vec::new(),
            descriptor: Arc::new(ApiDescriptor::empty()),
        }
    }

    /// Discover and register every exposed method of every candidate group.
    ///
    /// Called exactly once at startup, before any reader. An id collision
    /// aborts the scan — two distinct signatures must never share an id,
    /// and the second registration never silently shadows the first.
    /// Groups with zero exposed methods are not added to the path index.
    pub fn scan(&mut self, source: &dyn CandidateSource) -> Result<(), RegistryError> {
        for group in source.candidates() {
            let group_name = group.name().to_owned();
            let scope = group.path_scope();
            let decls = group.handlers();
            if decls.is_empty() {
                debug!(group = group_name, "skipping group with no exposed methods");
                continue;
            }

            let mut handler_ids = Vec::with_capacity(decls.len());
            for decl in decls {
                let id = derive_id(&group_name, &decl.name, &decl.params);
                let meta = HandlerMetadata {
                    id,
                    exposed_name: decl.name,
                    group: group_name.clone(),
                    path_scope: scope.clone(),
                    params: decl.params,
                    flags: decl.flags,
                };
                if let Some(existing) = self.by_id.get(&id) {
                    return Err(RegistryError::IdCollision {
                        id,
                        first: existing.metadata().signature(),
                        second: meta.signature(),
                    });
                }
                debug!(id, signature = meta.signature(), "registered handler");
                let invoker = Arc::new(BoundInvoker {
                    meta,
                    entry: decl.entry,
                });
                let _ = self.by_id.insert(id, invoker);
                handler_ids.push(id);
            }

            self.groups.push(Arc::new(GroupEntry {
                name: group_name,
                path_scope: scope,
                handler_ids,
            }));
        }

        self.descriptor = Arc::new(self.build_descriptor());
        info!(
            handlers = self.by_id.len(),
            groups = self.groups.len(),
            "registry scan complete"
        );
        metrics::gauge!("bridge_handlers_registered").set(self.by_id.len() as f64);
        Ok(())
    }

    /// Look up a handler by its stable numeric id. O(1).
    pub fn resolve(&self, id: u32) -> Option<Arc<BoundInvoker>> {
        self.by_id.get(&id).cloned()
    }

    /// Look up a handler by exposed name among the groups whose scope
    /// accepts the caller's path. No match is `NotFound`; a non-unique
    /// match is `Ambiguous` and is rejected, never arbitrarily resolved.
    pub fn resolve_by_name(&self, name: &str, path: &str) -> Result<Arc<BoundInvoker>, CallError> {
        let mut found: Option<Arc<BoundInvoker>> = None;
        for group in self.groups.iter().filter(|g| g.path_scope.accepts(path)) {
            for id in &group.handler_ids {
                let Some(invoker) = self.by_id.get(id) else {
                    continue;
                };
                if invoker.metadata().exposed_name != name {
                    continue;
                }
                if found.is_some() {
                    return Err(CallError::Ambiguous {
                        message: format!("name '{name}' matches more than one handler under path '{path}'"),
                    });
                }
                found = Some(invoker.clone());
            }
        }
        found.ok_or_else(|| CallError::NotFound {
            message: format!("no handler named '{name}' under path '{path}'"),
        })
    }

    /// All groups whose scope intersects the given path set. An empty set
    /// means "no restriction supplied": every group is visible.
    pub fn filter_by_path(&self, paths: &BTreeSet<String>) -> Vec<Arc<GroupEntry>> {
        self.groups
            .iter()
            .filter(|g| g.path_scope.intersects(paths))
            .cloned()
            .collect()
    }

    /// Whether any group at all serves the given path.
    pub fn serves_path(&self, path: &str) -> bool {
        self.groups.iter().any(|g| g.path_scope.accepts(path))
    }

    /// The read-only structural description of the registered surface,
    /// built once at the end of `scan` and immutable afterwards.
    pub fn descriptor(&self) -> Arc<ApiDescriptor> {
        self.descriptor.clone()
    }

    /// Number of registered handlers.
    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    /// Whether the registry holds no handlers.
    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    fn build_descriptor(&self) -> ApiDescriptor {
        let groups = self
            .groups
            .iter()
            .map(|g| GroupDescriptor {
                name: g.name.clone(),
                paths: g.path_scope.tokens().map(str::to_owned).collect(),
                methods: g
                    .handler_ids
                    .iter()
                    .filter_map(|id| self.by_id.get(id))
                    .map(|inv| {
                        let meta = inv.metadata();
                        MethodDescriptor {
                            id: meta.id,
                            name: meta.exposed_name.clone(),
                            params: meta.params.clone(),
                            flags: meta.flags,
                        }
                    })
                    .collect(),
            })
            .collect();
        ApiDescriptor { groups }
    }
}

impl Default for MethodRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    // ── Test groups and providers ───────────────────────────────────

    struct TestGroup {
        name: String,
        scope: PathScope,
        decls: Vec<(String, Vec<ParamShape>, HandlerFlags)>,
    }

    impl HandlerGroup for TestGroup {
        fn name(&self) -> &str {
            &self.name
        }

        fn path_scope(&self) -> PathScope {
            self.scope.clone()
        }

        fn handlers(&self) -> Vec<HandlerDecl> {
            self.decls
                .iter()
                .map(|(name, params, flags)| HandlerDecl {
                    name: name.clone(),
                    params: params.clone(),
                    flags: *flags,
                    entry: Arc::new(FnEntryPoint(|mut args: Vec<Value>| async move {
                        Ok(args.pop().unwrap_or(Value::Null))
                    })),
                })
                .collect()
        }
    }

    fn group(name: &str, scope: PathScope, methods: &[&str]) -> Arc<dyn HandlerGroup> {
        Arc::new(TestGroup {
            name: name.into(),
            scope,
            decls: methods
                .iter()
                .map(|m| ((*m).to_owned(), vec![ParamShape::Any], HandlerFlags::default()))
                .collect(),
        })
    }

    fn scanned(groups: Vec<Arc<dyn HandlerGroup>>) -> MethodRegistry {
        let mut reg = MethodRegistry::new();
        reg.scan(&groups).unwrap();
        reg
    }

    /// Provider that counts acquire/release pairs.
    struct CountingProvider {
        acquired: AtomicUsize,
        released: AtomicUsize,
    }

    impl CountingProvider {
        fn new() -> Self {
            Self {
                acquired: AtomicUsize::new(0),
                released: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl InstanceProvider for CountingProvider {
        async fn acquire(&self, _group: &str) -> Result<OwnerInstance, CallError> {
            let _ = self.acquired.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(()))
        }

        async fn release(&self, _group: &str, _instance: OwnerInstance) {
            let _ = self.released.fetch_add(1, Ordering::SeqCst);
        }
    }

    // ── Scan ────────────────────────────────────────────────────────

    #[test]
    fn scan_registers_all_handlers() {
        let reg = scanned(vec![
            group("chat", PathScope::any(), &["send", "poll"]),
            group("mail", PathScope::new(["admin"]), &["fetch"]),
        ]);
        assert_eq!(reg.len(), 3);
        assert!(!reg.is_empty());
    }

    #[test]
    fn scan_skips_empty_groups() {
        let reg = scanned(vec![
            group("chat", PathScope::any(), &["send"]),
            group("idle", PathScope::any(), &[]),
        ]);
        let all = reg.filter_by_path(&BTreeSet::new());
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].name, "chat");
    }

    #[test]
    fn scan_rejects_id_collision() {
        // Same fully-qualified signature from two candidates derives the
        // same id and must abort the scan.
        let mut reg = MethodRegistry::new();
        let groups: Vec<Arc<dyn HandlerGroup>> = vec![
            group("chat", PathScope::any(), &["send"]),
            group("chat", PathScope::new(["admin"]), &["send"]),
        ];
        let err = reg.scan(&groups).unwrap_err();
        match err {
            RegistryError::IdCollision { first, second, .. } => {
                assert_eq!(first, "chat/send(any)");
                assert_eq!(second, "chat/send(any)");
            }
        }
    }

    #[test]
    fn same_signature_same_id_across_registries() {
        let a = scanned(vec![group("chat", PathScope::any(), &["send"])]);
        let b = scanned(vec![group("chat", PathScope::any(), &["send"])]);
        let id_a = a.descriptor().groups[0].methods[0].id;
        let id_b = b.descriptor().groups[0].methods[0].id;
        assert_eq!(id_a, id_b);
    }

    // ── Resolution ──────────────────────────────────────────────────

    #[test]
    fn resolve_known_id() {
        let reg = scanned(vec![group("chat", PathScope::any(), &["send"])]);
        let id = derive_id("chat", "send", &[ParamShape::Any]);
        let invoker = reg.resolve(id).unwrap();
        assert_eq!(invoker.metadata().exposed_name, "send");
    }

    #[test]
    fn resolve_unknown_id_is_none() {
        let reg = scanned(vec![group("chat", PathScope::any(), &["send"])]);
        assert!(reg.resolve(0xffff_ffff).is_none());
    }

    #[test]
    fn resolve_by_name_respects_path_scope() {
        let reg = scanned(vec![group("chat", PathScope::new(["a", "b"]), &["send"])]);
        assert!(reg.resolve_by_name("send", "a").is_ok());
        assert!(reg.resolve_by_name("send", "b").is_ok());
        let err = reg.resolve_by_name("send", "c").unwrap_err();
        assert_eq!(err.code(), crate::errors::NOT_FOUND);
    }

    #[test]
    fn resolve_by_name_unknown_name() {
        let reg = scanned(vec![group("chat", PathScope::any(), &["send"])]);
        let err = reg.resolve_by_name("nope", "a").unwrap_err();
        assert_eq!(err.code(), crate::errors::NOT_FOUND);
    }

    #[test]
    fn resolve_by_name_rejects_ambiguity() {
        let reg = scanned(vec![
            group("chat", PathScope::new(["shared"]), &["send"]),
            group("mail", PathScope::new(["shared"]), &["send"]),
        ]);
        let err = reg.resolve_by_name("send", "shared").unwrap_err();
        assert_eq!(err.code(), crate::errors::AMBIGUOUS_NAME);
    }

    #[test]
    fn ambiguity_resolved_by_disjoint_paths() {
        let reg = scanned(vec![
            group("chat", PathScope::new(["a"]), &["send"]),
            group("mail", PathScope::new(["b"]), &["send"]),
        ]);
        let inv = reg.resolve_by_name("send", "a").unwrap();
        assert_eq!(inv.metadata().group, "chat");
    }

    #[test]
    fn wildcard_group_reachable_under_any_path() {
        let reg = scanned(vec![group("chat", PathScope::any(), &["send"])]);
        assert!(reg.resolve_by_name("send", "whatever").is_ok());
    }

    // ── Path filtering ──────────────────────────────────────────────

    #[test]
    fn empty_path_set_means_all() {
        let reg = scanned(vec![
            group("chat", PathScope::new(["a"]), &["send"]),
            group("mail", PathScope::new(["b"]), &["fetch"]),
        ]);
        let all_known: BTreeSet<String> = ["a".to_owned(), "b".to_owned()].into();
        let by_empty = reg.filter_by_path(&BTreeSet::new());
        let by_all = reg.filter_by_path(&all_known);
        assert_eq!(by_empty.len(), 2);
        assert_eq!(by_empty.len(), by_all.len());
    }

    #[test]
    fn filter_by_path_intersection() {
        let reg = scanned(vec![
            group("chat", PathScope::new(["a"]), &["send"]),
            group("mail", PathScope::new(["b"]), &["fetch"]),
        ]);
        let query: BTreeSet<String> = ["a".to_owned()].into();
        let hits = reg.filter_by_path(&query);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].name, "chat");
    }

    #[test]
    fn serves_path_checks_all_groups() {
        let reg = scanned(vec![group("chat", PathScope::new(["a"]), &["send"])]);
        assert!(reg.serves_path("a"));
        assert!(!reg.serves_path("z"));
    }

    // ── Invocation and instance lifecycle ───────────────────────────

    #[tokio::test]
    async fn call_acquires_and_releases_instance() {
        let reg = scanned(vec![group("chat", PathScope::any(), &["send"])]);
        let provider = CountingProvider::new();
        let invoker = reg.resolve_by_name("send", "x").unwrap();

        let out = invoker.call(&provider, vec![json!("hello")]).await.unwrap();
        assert_eq!(out, json!("hello"));
        assert_eq!(provider.acquired.load(Ordering::SeqCst), 1);
        assert_eq!(provider.released.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn release_runs_on_handler_error() {
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

        struct FailGroup;
        impl HandlerGroup for FailGroup {
            fn name(&self) -> &str {
                "fail"
            }
            fn path_scope(&self) -> PathScope {
                PathScope::any()
            }
            fn handlers(&self) -> Vec<HandlerDecl> {
                vec![HandlerDecl {
                    name: "boom".into(),
                    params: vec![],
                    flags: HandlerFlags::default(),
                    entry: Arc::new(FailEntry),
                }]
            }
        }

        let reg = scanned(vec![Arc::new(FailGroup) as Arc<dyn HandlerGroup>]);
        let provider = CountingProvider::new();
        let invoker = reg.resolve_by_name("boom", "x").unwrap();

        let result = invoker.call(&provider, vec![]).await;
        assert!(result.is_err());
        assert_eq!(provider.acquired.load(Ordering::SeqCst), 1);
        assert_eq!(provider.released.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn concurrent_resolution_after_scan() {
        let reg = Arc::new(scanned(vec![group("chat", PathScope::any(), &["send"])]));
        let id = derive_id("chat", "send", &[ParamShape::Any]);

        let mut handles = Vec::new();
        for _ in 0..16 {
            let reg = reg.clone();
            handles.push(tokio::spawn(async move {
                reg.resolve(id).is_some() && reg.resolve_by_name("send", "p").is_ok()
            }));
        }
        for h in handles {
            assert!(h.await.unwrap());
        }
    }

    // ── Descriptor ──────────────────────────────────────────────────

    #[test]
    fn descriptor_reflects_surface() {
        let reg = scanned(vec![group("chat", PathScope::new(["a"]), &["send", "poll"])]);
        let desc = reg.descriptor();
        assert_eq!(desc.groups.len(), 1);
        assert_eq!(desc.groups[0].name, "chat");
        assert_eq!(desc.groups[0].paths, vec!["a".to_owned()]);
        assert_eq!(desc.groups[0].methods.len(), 2);
    }

    #[test]
    fn descriptor_before_scan_is_empty() {
        let reg = MethodRegistry::new();
        assert!(reg.descriptor().groups.is_empty());
    }

    #[test]
    fn default_registry_is_empty() {
        assert!(MethodRegistry::default().is_empty());
    }
}
