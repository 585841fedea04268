use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::collab::{AvailabilityProbe, Collector, Navigator};
use crate::record::{ItemRecord, Origin};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphItem {
    pub id: String,
    pub group: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub popularity: String,
}

/// A recorded recommendation graph, usually loaded from YAML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphLayout {
    pub start: String,
    #[serde(default)]
    pub nodes: BTreeMap<String, Vec<GraphItem>>,
    /// Nodes whose page is gone.
    #[serde(default)]
    pub unavailable: BTreeSet<String>,
    /// Nodes that never report ready.
    #[serde(default)]
    pub slow: BTreeSet<String>,
}

/// Simulated site serving a [`GraphLayout`] as collector, navigator and probe.
#[derive(Debug)]
pub struct OfflineGraph {
    layout: GraphLayout,
    current: Mutex<String>,
    navigations: AtomicUsize,
}

impl OfflineGraph {
    pub fn new(layout: GraphLayout) -> Self {
        let current = Mutex::new(layout.start.clone());
        Self {
            layout,
            current,
            navigations: AtomicUsize::new(0),
        }
    }

    pub fn navigations(&self) -> usize {
        self.navigations.load(Ordering::SeqCst)
    }

    fn current(&self) -> String {
        self.current
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn records(&self, source: &str, items: &[GraphItem]) -> Vec<ItemRecord> {
        items
            .iter()
            .map(|item| {
                ItemRecord::new(&item.id, &item.group)
                    .from_source(source)
                    .with_title(&item.title)
                    .with_popularity(&item.popularity)
            })
            .collect()
    }
}

#[async_trait]
impl Collector for OfflineGraph {
    async fn collect(&self, origin: &Origin) -> anyhow::Result<Vec<ItemRecord>> {
        let current = self.current();
        let batch = match origin {
            Origin::Related => self
                .layout
                .nodes
                .get(&current)
                .map(|items| self.records(&current, items))
                .unwrap_or_default(),
            Origin::Feed => self
                .layout
                .nodes
                .get(&self.layout.start)
                .map(|items| self.records(&current, items))
                .unwrap_or_default(),
            Origin::Search(query) => {
                let query = query.to_lowercase();
                let mut seen = BTreeSet::new();
                let hits = self
                    .layout
                    .nodes
                    .values()
                    .flatten()
                    .filter(|item| item.title.to_lowercase().contains(&query))
                    .filter(|item| seen.insert(item.id.clone()))
                    .cloned()
                    .collect::<Vec<_>>();
                self.records(&current, &hits)
            }
        };
        Ok(batch)
    }
}

#[async_trait]
impl Navigator for OfflineGraph {
    async fn go_to(&self, node_id: &str) -> anyhow::Result<()> {
        if node_id.trim().is_empty() {
            anyhow::bail!("Cannot navigate to an empty node id");
        }
        *self.current.lock().unwrap_or_else(PoisonError::into_inner) = node_id.to_string();
        self.navigations.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn current_node(&self) -> anyhow::Result<String> {
        Ok(self.current())
    }

    async fn is_ready(&self, node_id: &str) -> bool {
        !self.layout.slow.contains(node_id)
    }
}

#[async_trait]
impl AvailabilityProbe for OfflineGraph {
    async fn is_available(&self, node_id: &str) -> anyhow::Result<bool> {
        Ok(!self.layout.unavailable.contains(node_id))
    }
}
