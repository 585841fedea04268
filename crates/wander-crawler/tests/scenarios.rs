use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use wander_crawler::adapters::{MemoryBlacklist, MemoryRecordStore, ScriptClassifier};
use wander_crawler::{
    AvailabilityProbe, Blacklist, CancelToken, Collaborators, Collector, EmitOpts,
    ExplorationIndex, ItemRecord, MetricsTracker, Navigator, OnError, Origin, RecordStore,
    RunError, RunId, RunOutcome, SelectionMode, TelemetrySink, TraversalConfig, TraversalRun,
    TraversalRunner,
};

struct Site {
    current: Mutex<String>,
    go_to_calls: Mutex<Vec<String>>,
    reloads: AtomicUsize,
    fail_navigation: bool,
    never_ready: bool,
    cancel_on_navigate: Option<CancelToken>,
    batch: Vec<(String, String)>,
    empty_batches: AtomicUsize,
    probe_results: Mutex<VecDeque<bool>>,
}

impl Site {
    fn new(batch: &[(&str, &str)]) -> Self {
        Self {
            current: Mutex::new("start".into()),
            go_to_calls: Mutex::new(Vec::new()),
            reloads: AtomicUsize::new(0),
            fail_navigation: false,
            never_ready: false,
            cancel_on_navigate: None,
            batch: batch
                .iter()
                .map(|(id, group)| (id.to_string(), group.to_string()))
                .collect(),
            empty_batches: AtomicUsize::new(0),
            probe_results: Mutex::new(VecDeque::new()),
        }
    }

    fn go_to_calls(&self) -> Vec<String> {
        self.go_to_calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Collector for Site {
    async fn collect(&self, _origin: &Origin) -> anyhow::Result<Vec<ItemRecord>> {
        if self
            .empty_batches
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Ok(Vec::new());
        }
        let source = self.current.lock().unwrap().clone();
        Ok(self
            .batch
            .iter()
            .map(|(id, group)| ItemRecord::new(id, group).from_source(&source))
            .collect())
    }
}

#[async_trait]
impl Navigator for Site {
    async fn go_to(&self, node_id: &str) -> anyhow::Result<()> {
        self.go_to_calls.lock().unwrap().push(node_id.to_string());
        if self.fail_navigation {
            anyhow::bail!("tab crashed");
        }
        *self.current.lock().unwrap() = node_id.to_string();
        if let Some(cancel) = &self.cancel_on_navigate {
            cancel.cancel();
        }
        Ok(())
    }

    async fn current_node(&self) -> anyhow::Result<String> {
        Ok(self.current.lock().unwrap().clone())
    }

    async fn reload(&self) -> anyhow::Result<()> {
        self.reloads.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn is_ready(&self, _node_id: &str) -> bool {
        !self.never_ready
    }
}

#[async_trait]
impl AvailabilityProbe for Site {
    async fn is_available(&self, _node_id: &str) -> anyhow::Result<bool> {
        Ok(self.probe_results.lock().unwrap().pop_front().unwrap_or(true))
    }
}

#[derive(Default)]
struct CountingBlacklist {
    inner: MemoryBlacklist,
    add_calls: Mutex<Vec<Vec<String>>>,
}

#[async_trait]
impl Blacklist for CountingBlacklist {
    async fn contains(&self, id: &str) -> anyhow::Result<bool> {
        self.inner.contains(id).await
    }

    async fn add(&self, ids: &[String]) -> anyhow::Result<()> {
        self.add_calls.lock().unwrap().push(ids.to_vec());
        self.inner.add(ids).await
    }
}

struct FailingStore;

#[async_trait]
impl RecordStore for FailingStore {
    async fn add_batch(&self, _records: &[ItemRecord]) -> anyhow::Result<()> {
        anyhow::bail!("disk full")
    }

    async fn get_all(&self) -> anyhow::Result<Vec<ItemRecord>> {
        Ok(Vec::new())
    }
}

#[derive(Default)]
struct RecordingTelemetry {
    metrics: Mutex<Vec<String>>,
}

impl TelemetrySink for RecordingTelemetry {
    fn emit(&self, metric: &str, _value: f64, _opts: &EmitOpts) -> anyhow::Result<()> {
        self.metrics.lock().unwrap().push(metric.to_string());
        anyhow::bail!("sink unreachable")
    }
}

struct Harness {
    site: Arc<Site>,
    blacklist: Arc<CountingBlacklist>,
    store: Arc<dyn RecordStore>,
    telemetry: Arc<RecordingTelemetry>,
    config: TraversalConfig,
    index: ExplorationIndex,
    metrics: MetricsTracker,
}

impl Harness {
    fn new(site: Site) -> Self {
        Self {
            site: Arc::new(site),
            blacklist: Arc::new(CountingBlacklist::default()),
            store: Arc::new(MemoryRecordStore::new()),
            telemetry: Arc::new(RecordingTelemetry::default()),
            config: TraversalConfig {
                reload_pause_ms: 0,
                ready_timeout_ms: 30,
                ready_poll_interval_ms: 5,
                ..Default::default()
            },
            index: ExplorationIndex::new(),
            metrics: MetricsTracker::new(Arc::new(ScriptClassifier::latin()), 10),
        }
    }

    fn collab(&self) -> Collaborators {
        Collaborators {
            collector: self.site.clone(),
            navigator: self.site.clone(),
            probe: self.site.clone(),
            blacklist: self.blacklist.clone(),
            store: self.store.clone(),
            telemetry: self.telemetry.clone(),
        }
    }

    async fn run(&self, run: TraversalRun) -> Result<RunOutcome, RunError> {
        let collab = self.collab();
        TraversalRunner::new(
            run,
            SelectionMode::FrontierOnly,
            Origin::Related,
            &self.config,
            &self.index,
            &self.metrics,
            &collab,
        )
        .run()
        .await
    }
}

const TWO_GROUPS: &[(&str, &str)] = &[
    ("a1", "alpha"),
    ("a2", "alpha"),
    ("a3", "alpha"),
    ("b1", "beta"),
    ("b2", "beta"),
];

#[tokio::test]
async fn completes_target_transitions() {
    let harness = Harness::new(Site::new(TWO_GROUPS));

    let outcome = harness.run(TraversalRun::new(RunId(1), 2)).await.unwrap();

    let report = match outcome {
        RunOutcome::Completed(report) => report,
        other => panic!("unexpected outcome {other:?}"),
    };
    assert_eq!(2, report.completed_transitions);
    assert_eq!(vec!["b1", "b2"], harness.site.go_to_calls());
    assert_eq!(report.path, harness.site.go_to_calls());
    assert!(harness.blacklist.add_calls.lock().unwrap().is_empty());
    assert_eq!(10, harness.store.get_all().await.unwrap().len());
    assert!(harness.index.is_source_visited("start"));
    assert!(harness.index.is_source_visited("b1"));
}

#[tokio::test]
async fn unavailable_node_is_blacklisted_and_run_continues() {
    let site = Site::new(TWO_GROUPS);
    site.probe_results.lock().unwrap().push_back(false);
    let harness = Harness::new(site);

    let outcome = harness.run(TraversalRun::new(RunId(1), 2)).await.unwrap();

    assert_eq!(
        vec![vec!["start".to_string()]],
        *harness.blacklist.add_calls.lock().unwrap()
    );
    assert_eq!(2, harness.site.go_to_calls().len());
    assert_eq!(vec!["start".to_string()], outcome.report().blacklisted);
    assert_eq!(2, outcome.report().completed_transitions);
    assert!(harness
        .telemetry
        .metrics
        .lock()
        .unwrap()
        .contains(&"node_blacklisted".to_string()));
}

#[tokio::test]
async fn navigation_failures_stall_the_run() {
    let mut site = Site::new(TWO_GROUPS);
    site.fail_navigation = true;
    let harness = Harness::new(site);

    let err = harness
        .run(TraversalRun::new(RunId(1), 2))
        .await
        .unwrap_err();

    match err {
        RunError::Stalled {
            completed,
            target,
            streak,
        } => {
            assert_eq!((0, 2, 3), (completed, target, streak));
        }
        other => panic!("unexpected error {other}"),
    }
    assert_eq!(9, harness.site.go_to_calls().len());
    assert_eq!(6, harness.site.reloads.load(Ordering::SeqCst));
}

#[tokio::test]
async fn empty_batches_are_retried_with_reload() {
    let site = Site::new(TWO_GROUPS);
    site.empty_batches.store(2, Ordering::SeqCst);
    let harness = Harness::new(site);

    let outcome = harness.run(TraversalRun::new(RunId(1), 1)).await.unwrap();

    assert_eq!(3, outcome.report().attempts);
    assert_eq!(1, outcome.report().completed_transitions);
    assert_eq!(2, harness.site.reloads.load(Ordering::SeqCst));
    assert_eq!(5, harness.index.snapshot().group_counts.values().sum::<usize>());
}

#[tokio::test]
async fn cancelled_before_start_touches_nothing() {
    let harness = Harness::new(Site::new(TWO_GROUPS));
    let cancel = CancelToken::new();
    cancel.cancel();

    let outcome = harness
        .run(TraversalRun::with_cancel(RunId(1), 2, cancel))
        .await
        .unwrap();

    assert!(matches!(outcome, RunOutcome::Cancelled(_)));
    assert!(harness.site.go_to_calls().is_empty());
    assert_eq!(0, harness.index.unique_group_count());
}

#[tokio::test]
async fn cancellation_is_observed_between_transitions() {
    let cancel = CancelToken::new();
    let mut site = Site::new(TWO_GROUPS);
    site.cancel_on_navigate = Some(cancel.clone());
    let harness = Harness::new(site);

    let outcome = harness
        .run(TraversalRun::with_cancel(RunId(1), 5, cancel))
        .await
        .unwrap();

    match outcome {
        RunOutcome::Cancelled(report) => assert_eq!(1, report.completed_transitions),
        other => panic!("unexpected outcome {other:?}"),
    }
    assert_eq!(1, harness.site.go_to_calls().len());
}

#[tokio::test]
async fn ready_timeout_does_not_fail_the_transition() {
    let mut site = Site::new(TWO_GROUPS);
    site.never_ready = true;
    let harness = Harness::new(site);

    let outcome = harness.run(TraversalRun::new(RunId(1), 1)).await.unwrap();

    assert!(matches!(outcome, RunOutcome::Completed(_)));
    assert_eq!(1, outcome.report().attempts);
}

#[tokio::test]
async fn store_failures_follow_on_error_policy() {
    let mut harness = Harness::new(Site::new(TWO_GROUPS));
    harness.store = Arc::new(FailingStore);

    let outcome = harness.run(TraversalRun::new(RunId(1), 1)).await.unwrap();
    assert_eq!(1, outcome.report().completed_transitions);

    let mut harness = Harness::new(Site::new(TWO_GROUPS));
    harness.store = Arc::new(FailingStore);
    harness.config.on_store_error = OnError::Fail;

    let err = harness
        .run(TraversalRun::new(RunId(2), 1))
        .await
        .unwrap_err();
    assert!(matches!(err, RunError::Stalled { .. }));
    assert!(harness.site.go_to_calls().is_empty());
}

#[tokio::test]
async fn metrics_are_emitted_and_sink_errors_swallowed() {
    let harness = Harness::new(Site::new(TWO_GROUPS));

    harness.run(TraversalRun::new(RunId(1), 1)).await.unwrap();

    let metrics = harness.telemetry.metrics.lock().unwrap().clone();
    for name in ["new_groups", "thematic_ratio", "thematic_ratio_avg", "transitions_completed"] {
        assert!(metrics.contains(&name.to_string()), "missing {name}");
    }
}

#[tokio::test]
async fn single_group_frontier_escalates_to_global_pick() {
    let harness = Harness::new(Site::new(&[("m1", "mono"), ("m2", "mono")]));
    harness.index.initialize(&[
        ItemRecord::new("r1", "rare").from_source("elsewhere"),
        ItemRecord::new("x1", "mono").from_source("elsewhere"),
    ]);

    harness.run(TraversalRun::new(RunId(1), 1)).await.unwrap();

    assert_eq!(vec!["r1"], harness.site.go_to_calls());
}

#[tokio::test]
async fn nothing_to_select_is_a_soft_failure() {
    let harness = Harness::new(Site::new(&[("start", "self")]));
    let err = harness
        .run(TraversalRun::new(RunId(1), 1))
        .await
        .unwrap_err();

    assert!(matches!(err, RunError::Stalled { .. }));
    assert!(harness.site.go_to_calls().is_empty());
}
