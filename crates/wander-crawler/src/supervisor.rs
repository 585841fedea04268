use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::future;
use tokio::task::JoinHandle;

use crate::collab::{Classifier, Collaborators};
use crate::config::TraversalConfig;
use crate::error::RunError;
use crate::index::{ExplorationIndex, IndexSnapshot};
use crate::metrics::MetricsTracker;
use crate::record::{Origin, SelectionMode};
use crate::runner::{CancelToken, RunId, RunOutcome, TraversalRun, TraversalRunner};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunInfo {
    pub id: RunId,
    pub name: String,
}

struct RunEntry {
    name: String,
    cancel: CancelToken,
    // Taken by whoever waits on the run.
    handle: Option<JoinHandle<Result<RunOutcome, RunError>>>,
}

impl RunEntry {
    fn is_live(&self) -> bool {
        self.handle.as_ref().map_or(true, |h| !h.is_finished())
    }
}

/// Owns the shared index and registers concurrent runs over it.
pub struct Supervisor {
    config: Arc<TraversalConfig>,
    index: Arc<ExplorationIndex>,
    metrics: Arc<MetricsTracker>,
    collab: Collaborators,
    runs: Mutex<BTreeMap<RunId, RunEntry>>,
    next_id: AtomicU64,
}

impl Supervisor {
    pub fn new(
        config: TraversalConfig,
        collab: Collaborators,
        classifier: Arc<dyn Classifier>,
    ) -> Self {
        let metrics = MetricsTracker::new(classifier, config.rolling_window);
        Self {
            config: Arc::new(config),
            index: Arc::new(ExplorationIndex::new()),
            metrics: Arc::new(metrics),
            collab,
            runs: Mutex::new(BTreeMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn index(&self) -> &Arc<ExplorationIndex> {
        &self.index
    }

    pub fn metrics(&self) -> &Arc<MetricsTracker> {
        &self.metrics
    }

    fn runs(&self) -> MutexGuard<'_, BTreeMap<RunId, RunEntry>> {
        self.runs.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Rebuilds the index from everything the record store holds.
    pub async fn seed_from_store(&self) -> anyhow::Result<usize> {
        let records = self.collab.store.get_all().await?;
        self.index.initialize(&records);
        Ok(records.len())
    }

    /// Spawns a run on the current tokio runtime.
    ///
    /// The run stays registered until `wait` or `wait_all` collects its
    /// outcome, finished or not. Callers must wait on every run they start.
    pub fn start_run(&self, target_transitions: usize, mode: SelectionMode, origin: Origin) -> RunId {
        let id = RunId(self.next_id.fetch_add(1, Ordering::SeqCst));
        let cancel = CancelToken::new();
        let name = format!("{origin} x{target_transitions}");

        let run = TraversalRun::with_cancel(id, target_transitions, cancel.clone());
        let config = self.config.clone();
        let index = self.index.clone();
        let metrics = self.metrics.clone();
        let collab = self.collab.clone();
        let handle = tokio::spawn(async move {
            TraversalRunner::new(run, mode, origin, &config, &index, &metrics, &collab)
                .run()
                .await
        });

        log::info!("Registered {id} ({name})");
        self.runs().insert(
            id,
            RunEntry {
                name,
                cancel,
                handle: Some(handle),
            },
        );
        id
    }

    /// Signals a live run to stop at its next check point.
    pub fn cancel(&self, id: RunId) -> bool {
        match self.runs().get(&id) {
            Some(entry) if entry.is_live() => {
                entry.cancel.cancel();
                log::info!("Cancellation requested for {id}");
                true
            }
            _ => false,
        }
    }

    /// Cancels every live run, returns how many were signalled.
    pub fn cancel_all(&self) -> usize {
        let live = self
            .runs()
            .values()
            .filter(|entry| entry.is_live())
            .inspect(|entry| entry.cancel.cancel())
            .count();
        if live > 0 {
            log::info!("Cancellation requested for {live} runs");
        }
        live
    }

    /// Runs that have not finished yet.
    pub fn list_runs(&self) -> Vec<RunInfo> {
        self.runs()
            .iter()
            .filter(|(_, entry)| entry.is_live())
            .map(|(id, entry)| RunInfo {
                id: *id,
                name: entry.name.clone(),
            })
            .collect()
    }

    /// Waits for a run and unregisters it.
    ///
    /// The run stays cancellable while it is being waited on.
    pub async fn wait(&self, id: RunId) -> Result<RunOutcome, RunError> {
        let handle = self
            .runs()
            .get_mut(&id)
            .and_then(|entry| entry.handle.take())
            .ok_or(RunError::UnknownRun(id))?;
        let res = handle.await;
        self.runs().remove(&id);
        res.map_err(|e| RunError::Join(e.to_string()))?
    }

    /// Waits for every registered run, in id order.
    pub async fn wait_all(&self) -> Vec<(RunId, Result<RunOutcome, RunError>)> {
        let ids = self.runs().keys().copied().collect::<Vec<_>>();
        future::join_all(ids.into_iter().map(|id| async move { (id, self.wait(id).await) })).await
    }

    pub fn index_snapshot(&self) -> IndexSnapshot {
        self.index.snapshot()
    }
}
