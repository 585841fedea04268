use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::sync::mpsc;

use crate::record::ItemRecord;

/// Exploration state: visited sources, per-group counters and group membership.
///
/// Counters and membership are independent signals. A group's count grows once
/// per folded record while its item set only grows on new non-empty ids, so
/// `group_counts[g] >= group_to_item_ids[g].len()` and the two usually differ.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IndexSnapshot {
    pub visited: BTreeSet<String>,
    pub group_counts: BTreeMap<String, usize>,
    pub group_to_item_ids: BTreeMap<String, BTreeSet<String>>,
    /// Raw records folded with buffering enabled, in arrival order.
    pub buffer: Vec<ItemRecord>,
}

impl IndexSnapshot {
    fn fold(&mut self, record: &ItemRecord) {
        if !record.source_node_id.trim().is_empty() {
            self.visited.insert(record.source_node_id.clone());
        }

        let group = record.group_key();
        *self.group_counts.entry(group.to_string()).or_insert(0) += 1;

        let items = self.group_to_item_ids.entry(group.to_string()).or_default();
        if !record.item_id.trim().is_empty() {
            items.insert(record.item_id.clone());
        }
    }

    pub fn is_source_visited(&self, id: &str) -> bool {
        self.visited.contains(id)
    }

    pub fn group_count(&self, group: &str) -> usize {
        self.group_counts.get(group).copied().unwrap_or(0)
    }

    pub fn unique_group_count(&self) -> usize {
        self.group_counts.len()
    }

    pub fn total_unique_item_count(&self) -> usize {
        self.group_to_item_ids.values().map(BTreeSet::len).sum()
    }

    /// Buffered records that came from live traversal rather than bulk import.
    pub fn fresh_records(&self) -> Vec<ItemRecord> {
        self.buffer.iter().filter(|r| !r.imported).cloned().collect()
    }

    /// Groups sorted by ascending count, ties by name.
    pub fn least_represented(&self, limit: usize) -> Vec<(String, usize)> {
        let mut groups = self
            .group_counts
            .iter()
            .map(|(g, c)| (g.clone(), *c))
            .collect::<Vec<_>>();
        groups.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
        groups.truncate(limit);
        groups
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexChange {
    Initialized { records: usize },
    Reset,
    BatchAdded { records: usize, buffered: bool },
}

/// "State changed" notification sent to subscribers after every mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexEvent {
    pub change: IndexChange,
    pub unique_groups: usize,
    pub unique_items: usize,
}

pub trait IndexSubscriber: Send + Sync {
    fn notify(&self, event: &IndexEvent) -> anyhow::Result<()>;
}

impl IndexSubscriber for mpsc::UnboundedSender<IndexEvent> {
    fn notify(&self, event: &IndexEvent) -> anyhow::Result<()> {
        self.send(*event)?;
        Ok(())
    }
}

impl IndexSubscriber for crossbeam_channel::Sender<IndexEvent> {
    fn notify(&self, event: &IndexEvent) -> anyhow::Result<()> {
        self.try_send(*event)?;
        Ok(())
    }
}

/// Shared, mutex guarded exploration index.
///
/// Every fold and every snapshot holds the lock for exactly one operation, so
/// concurrent runs never observe a half-applied batch.
#[derive(Default)]
pub struct ExplorationIndex {
    state: Mutex<IndexSnapshot>,
    subscribers: Mutex<Vec<Box<dyn IndexSubscriber>>>,
}

impl ExplorationIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<S>(&self, subscriber: S)
    where
        S: IndexSubscriber + 'static,
    {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Box::new(subscriber));
    }

    fn state(&self) -> MutexGuard<'_, IndexSnapshot> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Rebuilds every structure from `records`.
    pub fn initialize(&self, records: &[ItemRecord]) {
        let (event, visited) = {
            let mut state = self.state();
            *state = IndexSnapshot::default();
            records.iter().for_each(|r| state.fold(r));
            let change = IndexChange::Initialized {
                records: records.len(),
            };
            (Self::event(&state, change), state.visited.len())
        };
        log::info!(
            "Index initialized from {} records: {} groups, {} items, {visited} visited sources",
            records.len(),
            event.unique_groups,
            event.unique_items,
        );
        self.publish(event);
    }

    pub fn reset(&self) {
        let event = {
            let mut state = self.state();
            *state = IndexSnapshot::default();
            Self::event(&state, IndexChange::Reset)
        };
        self.publish(event);
    }

    /// Folds a batch. `include_in_buffer` only controls the raw side buffer,
    /// counters and sets are always updated.
    pub fn add_batch(&self, records: &[ItemRecord], include_in_buffer: bool) {
        if records.is_empty() {
            log::warn!("Ignoring empty batch");
            return;
        }
        let event = {
            let mut state = self.state();
            records.iter().for_each(|r| state.fold(r));
            if include_in_buffer {
                state.buffer.extend_from_slice(records);
            }
            let change = IndexChange::BatchAdded {
                records: records.len(),
                buffered: include_in_buffer,
            };
            Self::event(&state, change)
        };
        log::debug!(
            "Folded {} records: {} groups, {} items",
            records.len(),
            event.unique_groups,
            event.unique_items
        );
        self.publish(event);
    }

    /// Deep copy of the whole index.
    pub fn snapshot(&self) -> IndexSnapshot {
        self.state().clone()
    }

    pub fn is_source_visited(&self, id: &str) -> bool {
        self.state().is_source_visited(id)
    }

    pub fn unique_group_count(&self) -> usize {
        self.state().unique_group_count()
    }

    pub fn total_unique_item_count(&self) -> usize {
        self.state().total_unique_item_count()
    }

    pub fn group_counts(&self) -> BTreeMap<String, usize> {
        self.state().group_counts.clone()
    }

    pub fn fresh_records(&self) -> Vec<ItemRecord> {
        self.state().fresh_records()
    }

    fn event(state: &IndexSnapshot, change: IndexChange) -> IndexEvent {
        IndexEvent {
            change,
            unique_groups: state.unique_group_count(),
            unique_items: state.total_unique_item_count(),
        }
    }

    fn publish(&self, event: IndexEvent) {
        let subscribers = self
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        for sub in subscribers.iter() {
            if let Err(e) = sub.notify(&event) {
                log::debug!("Couldn't notify index subscriber: {e}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::UNKNOWN_GROUP;

    fn rec(item: &str, group: &str, source: &str) -> ItemRecord {
        ItemRecord::new(item, group).from_source(source)
    }

    #[test]
    fn initialize_empty_resets_to_fresh() {
        let index = ExplorationIndex::new();
        index.add_batch(&[rec("a", "g1", "s1"), rec("b", "g2", "s1")], true);
        index.add_batch(&[rec("c", "g1", "s2")], false);

        index.initialize(&[]);

        assert_eq!(ExplorationIndex::new().snapshot(), index.snapshot());
    }

    #[test]
    fn counts_match_records_per_group() {
        let records = vec![
            rec("a", "g1", "s1"),
            rec("a", "g1", "s1"),
            rec("", "g1", "s2"),
            rec("b", "", "s2"),
            rec("c", "g2", ""),
        ];
        let index = ExplorationIndex::new();
        index.initialize(&records);
        let snap = index.snapshot();

        assert_eq!(3, snap.group_count("g1"));
        assert_eq!(1, snap.group_count("g2"));
        assert_eq!(1, snap.group_count(UNKNOWN_GROUP));
        assert_eq!(
            BTreeSet::from(["s1".to_string(), "s2".to_string()]),
            snap.visited
        );
    }

    #[test]
    fn counts_and_membership_diverge() {
        let index = ExplorationIndex::new();
        index.add_batch(&[rec("a", "g", "s"), rec("a", "g", "s"), rec("", "g", "s")], true);
        let snap = index.snapshot();

        assert_eq!(3, snap.group_count("g"));
        assert_eq!(1, snap.group_to_item_ids["g"].len());
        assert_eq!(1, index.total_unique_item_count());
    }

    #[test]
    fn membership_only_grows() {
        let index = ExplorationIndex::new();
        let mut previous = BTreeSet::new();
        for batch in [
            vec![rec("a", "g", "s1")],
            vec![rec("b", "g", "s2"), rec("a", "g", "s2")],
            vec![rec("", "g", "s3")],
        ] {
            index.add_batch(&batch, true);
            let current = index.snapshot().group_to_item_ids["g"].clone();
            assert!(previous.is_subset(&current));
            previous = current;
        }
        assert_eq!(2, previous.len());
    }

    #[test]
    fn buffer_flag_does_not_affect_counters() {
        let index = ExplorationIndex::new();
        index.add_batch(&[rec("a", "g", "s")], false);
        let mut imported = rec("b", "g", "s");
        imported.imported = true;
        index.add_batch(&[rec("c", "h", "s"), imported], true);

        let snap = index.snapshot();
        assert_eq!(2, snap.group_count("g"));
        assert_eq!(2, snap.buffer.len());
        assert_eq!(vec!["c".to_string()], {
            snap.fresh_records()
                .into_iter()
                .map(|r| r.item_id)
                .collect::<Vec<_>>()
        });
    }

    #[test]
    fn snapshot_is_detached() {
        let index = ExplorationIndex::new();
        index.add_batch(&[rec("a", "g", "s")], true);

        let mut snap = index.snapshot();
        snap.visited.insert("other".into());
        snap.group_counts.insert("g".into(), 99);
        snap.buffer.clear();

        assert!(!index.is_source_visited("other"));
        assert_eq!(1, index.group_counts()["g"]);
        assert_eq!(1, index.snapshot().buffer.len());
    }

    #[test]
    fn empty_batch_is_ignored() {
        let index = ExplorationIndex::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        index.subscribe(tx);

        index.add_batch(&[], true);

        assert!(rx.try_recv().is_err());
        assert_eq!(0, index.unique_group_count());
    }

    #[test]
    fn subscribers_are_notified_and_failures_swallowed() {
        let index = ExplorationIndex::new();
        let (dead_tx, dead_rx) = crossbeam_channel::bounded::<IndexEvent>(0);
        drop(dead_rx);
        index.subscribe(dead_tx);
        let (tx, rx) = crossbeam_channel::unbounded();
        index.subscribe(tx);

        index.add_batch(&[rec("a", "g", "s"), rec("b", "h", "s")], true);
        index.reset();

        assert_eq!(
            IndexEvent {
                change: IndexChange::BatchAdded {
                    records: 2,
                    buffered: true
                },
                unique_groups: 2,
                unique_items: 2,
            },
            rx.recv().unwrap()
        );
        assert_eq!(IndexChange::Reset, rx.recv().unwrap().change);
    }

    #[test]
    fn least_represented_orders_by_count_then_name() {
        let index = ExplorationIndex::new();
        index.add_batch(
            &[
                rec("a", "big", "s"),
                rec("b", "big", "s"),
                rec("c", "zeta", "s"),
                rec("d", "alpha", "s"),
            ],
            true,
        );
        assert_eq!(
            vec![("alpha".to_string(), 1), ("zeta".to_string(), 1)],
            index.snapshot().least_represented(2)
        );
    }
}
