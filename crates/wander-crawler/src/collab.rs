use std::sync::Arc;

use async_trait::async_trait;

use crate::record::{ItemRecord, Origin};
use crate::runner::RunId;

/// Turns the currently rendered node into a batch of candidate records.
#[async_trait]
pub trait Collector: Send + Sync {
    /// Returns an empty batch, not an error, while the page is still loading.
    async fn collect(&self, origin: &Origin) -> anyhow::Result<Vec<ItemRecord>>;
}

/// Moves the browsing surface between nodes.
#[async_trait]
pub trait Navigator: Send + Sync {
    async fn go_to(&self, node_id: &str) -> anyhow::Result<()>;

    async fn current_node(&self) -> anyhow::Result<String>;

    /// Hard reload of the target surface, used between failed attempts.
    async fn reload(&self) -> anyhow::Result<()> {
        Ok(())
    }

    /// Whether the node just navigated to has finished loading.
    async fn is_ready(&self, _node_id: &str) -> bool {
        true
    }
}

#[async_trait]
pub trait AvailabilityProbe: Send + Sync {
    async fn is_available(&self, node_id: &str) -> anyhow::Result<bool>;
}

/// Durable set of ids that must never be selected again.
#[async_trait]
pub trait Blacklist: Send + Sync {
    async fn contains(&self, id: &str) -> anyhow::Result<bool>;

    async fn add(&self, ids: &[String]) -> anyhow::Result<()>;
}

#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn add_batch(&self, records: &[ItemRecord]) -> anyhow::Result<()>;

    async fn get_all(&self) -> anyhow::Result<Vec<ItemRecord>>;
}

pub trait TelemetrySink: Send + Sync {
    fn emit(&self, metric: &str, value: f64, opts: &EmitOpts) -> anyhow::Result<()>;
}

/// Pure title predicate, e.g. a language or theme detector.
pub trait Classifier: Send + Sync {
    fn is_match(&self, title: &str) -> bool;
}

#[derive(Debug, Clone, Default)]
pub struct EmitOpts {
    pub run_id: Option<RunId>,
    pub tags: Vec<(&'static str, String)>,
}

impl EmitOpts {
    pub fn for_run(run_id: RunId) -> Self {
        Self {
            run_id: Some(run_id),
            tags: Vec::new(),
        }
    }

    pub fn tag(mut self, key: &'static str, value: impl Into<String>) -> Self {
        self.tags.push((key, value.into()));
        self
    }
}

/// Every external collaborator a run talks to.
#[derive(Clone)]
pub struct Collaborators {
    pub collector: Arc<dyn Collector>,
    pub navigator: Arc<dyn Navigator>,
    pub probe: Arc<dyn AvailabilityProbe>,
    pub blacklist: Arc<dyn Blacklist>,
    pub store: Arc<dyn RecordStore>,
    pub telemetry: Arc<dyn TelemetrySink>,
}

impl Collaborators {
    /// Fire-and-forget emission, failures are only logged.
    pub fn emit(&self, metric: &str, value: f64, opts: &EmitOpts) {
        if let Err(e) = self.telemetry.emit(metric, value, opts) {
            log::debug!("Dropped telemetry {metric}={value} got: {e}");
        }
    }
}
