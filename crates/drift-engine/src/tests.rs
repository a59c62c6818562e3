//! Unit tests for the synchronization engine

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use drift_core::{
    BatchEntry, CancelToken, Depth, DiffNode, DriftError, OutputListener, PathDelta, SyncKind,
    SyncPath, SyncScope, VariantState,
};

use crate::collab::{DiffComputer, StateResolver};
use crate::collector::{SyncFilter, SyncInfoCollector, filter_fn};
use crate::context::{RefreshOutcome, SyncContext, Traversal};

fn scope(roots: &[&str]) -> Arc<SyncScope> {
    Arc::new(SyncScope::new(
        roots.iter().map(|r| SyncPath::parse(r)).collect(),
    ))
}

fn conflict(path: &str) -> DiffNode {
    DiffNode::three_way(
        SyncPath::parse(path),
        VariantState::file("1.2"),
        VariantState::file("1.1"),
        VariantState::file("1.1.2.1"),
    )
}

fn outgoing(path: &str) -> DiffNode {
    DiffNode::three_way(
        SyncPath::parse(path),
        VariantState::file("1.2"),
        VariantState::file("1.1"),
        VariantState::file("1.1"),
    )
}

fn in_sync(path: &str) -> DiffNode {
    DiffNode::in_sync(SyncPath::parse(path))
}

/// Computer scripted with one batch per mapping root.
struct Scripted {
    per_mapping: Mutex<HashMap<SyncPath, Vec<BatchEntry>>>,
    calls: AtomicUsize,
}

impl Scripted {
    fn new(per_mapping: HashMap<SyncPath, Vec<BatchEntry>>) -> Arc<Self> {
        Arc::new(Scripted {
            per_mapping: Mutex::new(per_mapping),
            calls: AtomicUsize::new(0),
        })
    }

    fn single(root: &str, entries: Vec<BatchEntry>) -> Arc<Self> {
        Self::new(HashMap::from([(SyncPath::parse(root), entries)]))
    }
}

#[async_trait]
impl DiffComputer for Scripted {
    async fn compute(
        &self,
        mappings: &[SyncPath],
        _token: &CancelToken,
    ) -> anyhow::Result<Vec<BatchEntry>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let scripts = self.per_mapping.lock().unwrap();
        Ok(mappings
            .iter()
            .flat_map(|m| scripts.get(m).cloned().unwrap_or_default())
            .collect())
    }
}

struct Failing;

#[async_trait]
impl DiffComputer for Failing {
    async fn compute(
        &self,
        _mappings: &[SyncPath],
        _token: &CancelToken,
    ) -> anyhow::Result<Vec<BatchEntry>> {
        Err(anyhow::anyhow!("backend unreachable"))
    }
}

/// Cancels its own token mid-computation, as a backend noticing a
/// cancelled operation would.
struct SelfCancelling;

#[async_trait]
impl DiffComputer for SelfCancelling {
    async fn compute(
        &self,
        _mappings: &[SyncPath],
        token: &CancelToken,
    ) -> anyhow::Result<Vec<BatchEntry>> {
        token.cancel();
        Ok(vec![BatchEntry::put(in_sync("a"))])
    }
}

struct Recorder {
    deltas: Mutex<Vec<PathDelta>>,
}

impl Recorder {
    fn new() -> Arc<Self> {
        Arc::new(Recorder {
            deltas: Mutex::new(Vec::new()),
        })
    }

    fn events(&self) -> Vec<PathDelta> {
        self.deltas.lock().unwrap().clone()
    }
}

impl OutputListener for Recorder {
    fn output_changed(&self, delta: &PathDelta) {
        self.deltas.lock().unwrap().push(delta.clone());
    }
}

// ── Context ─────────────────────────────────────────────

#[tokio::test]
async fn refresh_applies_computed_batch() {
    let computer = Scripted::single(
        "a",
        vec![
            BatchEntry::put(in_sync("a")),
            BatchEntry::put(conflict("a/b")),
        ],
    );
    let context = SyncContext::new(scope(&["a"]), computer);

    let outcome = context.refresh(&[], &CancelToken::new()).await.unwrap();
    let RefreshOutcome::Applied(delta) = outcome else {
        panic!("expected an applied refresh");
    };
    assert_eq!(delta.added.len(), 2);
    assert_eq!(context.tree().size(), 2);
}

#[tokio::test]
async fn refresh_failure_leaves_tree_untouched() {
    let context = SyncContext::new(scope(&["a"]), Arc::new(Failing));
    context
        .tree()
        .apply(vec![BatchEntry::put(in_sync("a"))])
        .unwrap();

    let err = context.refresh(&[], &CancelToken::new()).await.unwrap_err();
    assert!(matches!(err, DriftError::Computation(_)));
    assert_eq!(context.tree().size(), 1);
}

#[tokio::test]
async fn refresh_cancellation_is_an_outcome_not_an_error() {
    let context = SyncContext::new(scope(&["a"]), Arc::new(SelfCancelling));

    let outcome = context.refresh(&[], &CancelToken::new()).await.unwrap();
    assert!(matches!(outcome, RefreshOutcome::Cancelled));
    assert!(context.tree().is_empty());
}

#[tokio::test]
async fn refresh_on_disposed_context_fails() {
    let computer = Scripted::single("a", vec![BatchEntry::put(in_sync("a"))]);
    let context = SyncContext::new(scope(&["a"]), computer);
    context.dispose();

    let err = context.refresh(&[], &CancelToken::new()).await.unwrap_err();
    assert!(matches!(err, DriftError::Disposed));
}

#[tokio::test]
async fn dispose_is_idempotent() {
    let computer = Scripted::single("a", vec![]);
    let context = SyncContext::new(scope(&["a"]), computer);
    let _cache = context.cache().unwrap();
    for _ in 0..3 {
        context.dispose();
    }
    assert!(context.is_disposed());
    assert!(matches!(context.cache(), Err(DriftError::Disposed)));
}

#[test]
fn cache_is_built_exactly_once_under_concurrent_access() {
    let computer = Scripted::single("a", vec![]);
    let context = SyncContext::new(scope(&["a"]), computer);

    let caches: Vec<_> = std::thread::scope(|s| {
        let handles: Vec<_> = (0..8)
            .map(|_| s.spawn(|| context.cache().unwrap()))
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    for cache in &caches[1..] {
        assert!(Arc::ptr_eq(&caches[0], cache));
    }
}

#[tokio::test]
async fn concurrent_refreshes_keep_tree_consistent() {
    let computer = Scripted::new(HashMap::from([
        (
            SyncPath::parse("a"),
            vec![
                BatchEntry::put(in_sync("a")),
                BatchEntry::put(conflict("a/x")),
            ],
        ),
        (
            SyncPath::parse("b"),
            vec![
                BatchEntry::put(in_sync("b")),
                BatchEntry::put(conflict("b/y")),
            ],
        ),
    ]));
    let context = SyncContext::new(scope(&["a", "b"]), computer.clone());

    let tasks: Vec<_> = (0..16)
        .map(|i| {
            let mapping = if i % 2 == 0 { "a" } else { "b" };
            let (_, handle) = context.spawn_refresh(vec![SyncPath::parse(mapping)]);
            handle
        })
        .collect();
    for task in tasks {
        task.await.unwrap().unwrap();
    }

    assert_eq!(computer.calls.load(Ordering::SeqCst), 16);
    assert_eq!(context.tree().size(), 4);
    for node in context.tree().nodes() {
        for ancestor in node.path.ancestors() {
            assert!(context.tree().get(&ancestor).is_some());
        }
    }
}

#[tokio::test]
async fn traversals_intersect_resolved_locations() {
    let computer = Scripted::single(
        "a",
        vec![
            BatchEntry::put(in_sync("a")),
            BatchEntry::put(conflict("a/b")),
            BatchEntry::put(conflict("a/b/c")),
            BatchEntry::put(conflict("a/d")),
        ],
    );
    let context = SyncContext::new(scope(&["a"]), computer);
    context.refresh(&[], &CancelToken::new()).await.unwrap();

    let deep = context.diffs_for_traversals(
        &[Traversal::new(SyncPath::parse("a/b"), Depth::Infinite)],
        &StateResolver,
    );
    let deep_paths: Vec<String> = deep.iter().map(|n| n.path.to_string()).collect();
    assert_eq!(deep_paths, vec!["a/b", "a/b/c"]);

    let shallow = context.diffs_for_traversals(
        &[Traversal::new(SyncPath::parse("a"), Depth::Children)],
        &StateResolver,
    );
    let mut shallow_paths: Vec<String> = shallow.iter().map(|n| n.path.to_string()).collect();
    shallow_paths.sort();
    assert_eq!(shallow_paths, vec!["a", "a/b", "a/d"]);
}

#[tokio::test]
async fn reset_scope_clears_tree_for_refresh() {
    let computer = Scripted::new(HashMap::from([
        (SyncPath::parse("a"), vec![BatchEntry::put(conflict("a/x"))]),
        (SyncPath::parse("b"), vec![BatchEntry::put(conflict("b/y"))]),
    ]));
    let context = SyncContext::new(scope(&["a"]), computer);
    context.refresh(&[], &CancelToken::new()).await.unwrap();
    assert_eq!(context.tree().size(), 2);

    let delta = context.reset_scope(vec![SyncPath::parse("b")]).unwrap();
    assert_eq!(delta.removed.len(), 2);
    assert!(context.tree().is_empty());

    context.refresh(&[], &CancelToken::new()).await.unwrap();
    assert!(context.tree().get(&"b/y".into()).is_some());
    assert_eq!(context.tree().get(&"a/x".into()), None);
}

// ── Cache ───────────────────────────────────────────────

#[tokio::test]
async fn cache_entries_are_invalidated_by_tree_events() {
    let computer = Scripted::single("a", vec![]);
    let context = SyncContext::new(scope(&["a"]), computer);
    let tree = context.tree().clone();
    tree.apply(vec![
        BatchEntry::put(in_sync("a")),
        BatchEntry::put(conflict("a/b")),
        BatchEntry::put(conflict("a/c")),
    ])
    .unwrap();

    let cache = context.cache().unwrap();
    cache.put(SyncPath::parse("a/b"), String::from("label b"));
    cache.put(SyncPath::parse("a/c"), String::from("label c"));

    tree.apply(vec![BatchEntry::put(outgoing("a/b"))]).unwrap();

    assert_eq!(cache.get::<String>(&"a/b".into()), None);
    assert_eq!(cache.get::<String>(&"a/c".into()).unwrap().as_str(), "label c");
}

#[tokio::test]
async fn cache_invalidates_every_path_of_a_delta() {
    let computer = Scripted::single("a", vec![]);
    let context = SyncContext::new(scope(&["a"]), computer);
    let tree = context.tree().clone();
    tree.apply(vec![
        BatchEntry::put(in_sync("a")),
        BatchEntry::put(conflict("a/b")),
        BatchEntry::put(conflict("a/b/c")),
    ])
    .unwrap();

    let cache = context.cache().unwrap();
    for node in tree.nodes() {
        cache.put(node.path.clone(), node.path.to_string());
    }

    // Cascading removal names the whole subtree in the delta; each of
    // those paths must drop out of the cache.
    tree.apply(vec![BatchEntry::remove("a/b".into())]).unwrap();
    assert_eq!(cache.get::<String>(&"a/b".into()), None);
    assert_eq!(cache.get::<String>(&"a/b/c".into()), None);
    assert!(cache.get::<String>(&"a".into()).is_some());
}

#[tokio::test]
async fn disposed_cache_unsubscribes_and_clears() {
    let computer = Scripted::single("a", vec![]);
    let context = SyncContext::new(scope(&["a"]), computer);
    let tree = context.tree().clone();
    tree.apply(vec![BatchEntry::put(in_sync("a"))]).unwrap();

    let cache = context.cache().unwrap();
    cache.put(SyncPath::parse("a"), 42u32);
    cache.dispose();
    cache.dispose();
    assert!(cache.is_empty());

    // Further tree changes must not reach the disposed cache.
    tree.apply(vec![BatchEntry::put(conflict("a/b"))]).unwrap();
    assert_eq!(cache.len(), 0);
}

// ── Collector ───────────────────────────────────────────

fn populated_collector() -> (Arc<SyncContext>, SyncInfoCollector) {
    let computer = Scripted::single("a", vec![]);
    let context = SyncContext::new(scope(&["a"]), computer);
    context
        .tree()
        .apply(vec![
            BatchEntry::put(in_sync("a")),
            BatchEntry::put(conflict("a/b")),
            BatchEntry::put(outgoing("a/c")),
        ])
        .unwrap();
    let collector = SyncInfoCollector::new(context.tree().clone());
    (context, collector)
}

#[test]
fn collector_starts_unrestricted_and_accept_all() {
    let (_context, collector) = populated_collector();
    assert_eq!(collector.output().len(), 3);
    assert_eq!(collector.working_set(), None);
}

#[test]
fn working_set_restricts_output() {
    let (_context, collector) = populated_collector();
    collector.set_working_set(Some(vec![SyncPath::parse("a/b")]));
    assert_eq!(collector.output().paths(), vec![SyncPath::parse("a/b")]);

    // Lifting the restriction brings everything back.
    collector.set_working_set(None);
    assert_eq!(collector.output().len(), 3);
}

#[test]
fn predicate_restricts_output() {
    let (_context, collector) = populated_collector();
    collector.set_filter(
        filter_fn(|node| node.kind == SyncKind::Conflicting),
        &CancelToken::new(),
    );
    assert_eq!(collector.output().paths(), vec![SyncPath::parse("a/b")]);
}

#[test]
fn predicate_change_does_not_touch_working_set_stage() {
    let (_context, collector) = populated_collector();
    collector.set_working_set(Some(vec![SyncPath::parse("a")]));
    let before = collector.working_set_output().snapshot();

    collector.set_filter(
        filter_fn(|node| node.kind == SyncKind::Outgoing),
        &CancelToken::new(),
    );

    assert_eq!(collector.working_set_output().snapshot(), before);
    assert_eq!(collector.output().paths(), vec![SyncPath::parse("a/c")]);
}

#[test]
fn failing_predicate_excludes_only_the_failing_node() {
    let (_context, collector) = populated_collector();

    struct Brittle;
    impl SyncFilter for Brittle {
        fn select(&self, node: &DiffNode, _token: &CancelToken) -> anyhow::Result<bool> {
            if node.path == SyncPath::parse("a/b") {
                anyhow::bail!("decoration lookup failed");
            }
            Ok(true)
        }
    }

    collector.set_filter(Arc::new(Brittle), &CancelToken::new());
    assert_eq!(
        collector.output().paths(),
        vec![SyncPath::parse("a"), SyncPath::parse("a/c")]
    );
}

#[test]
fn cancelled_filter_recompute_keeps_previous_output() {
    let (_context, collector) = populated_collector();
    let token = CancelToken::new();
    token.cancel();
    collector.set_filter(filter_fn(|_| false), &token);
    assert_eq!(collector.output().len(), 3);
}

#[test]
fn tree_changes_flow_through_both_stages() {
    let (context, collector) = populated_collector();
    collector.set_working_set(Some(vec![SyncPath::parse("a/b")]));

    let recorder = Recorder::new();
    collector.output().add_listener(recorder.clone());

    context
        .tree()
        .apply(vec![BatchEntry::remove("a/b".into())])
        .unwrap();

    assert!(collector.output().is_empty());
    let events = recorder.events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].removed, vec![SyncPath::parse("a/b")]);
}

#[test]
fn replaced_node_updates_output_membership() {
    let (context, collector) = populated_collector();
    collector.set_filter(
        filter_fn(|node| node.kind == SyncKind::Conflicting),
        &CancelToken::new(),
    );
    assert_eq!(collector.output().paths(), vec![SyncPath::parse("a/b")]);

    // a/b stops being a conflict; a/c becomes one.
    context
        .tree()
        .apply(vec![
            BatchEntry::put(outgoing("a/b")),
            BatchEntry::put(conflict("a/c")),
        ])
        .unwrap();
    assert_eq!(collector.output().paths(), vec![SyncPath::parse("a/c")]);
}

#[test]
fn disposed_collector_stops_tracking() {
    let (context, collector) = populated_collector();
    collector.dispose();
    collector.dispose();

    context
        .tree()
        .apply(vec![BatchEntry::put(conflict("a/zz"))])
        .unwrap();
    assert_eq!(collector.output().len(), 3);
}

#[test]
fn independent_collectors_do_not_interfere() {
    let (context, first) = populated_collector();
    let second = SyncInfoCollector::new(context.tree().clone());

    first.set_working_set(Some(vec![SyncPath::parse("a/b")]));
    second.set_filter(
        filter_fn(|node| node.kind == SyncKind::Outgoing),
        &CancelToken::new(),
    );

    assert_eq!(first.output().paths(), vec![SyncPath::parse("a/b")]);
    assert_eq!(second.output().paths(), vec![SyncPath::parse("a/c")]);
}
