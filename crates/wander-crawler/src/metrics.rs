//! Per-step novelty and thematic signals over a collected batch.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::{Arc, Mutex, PoisonError};

use crate::collab::Classifier;
use crate::record::ItemRecord;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NewGroups {
    pub count: usize,
    pub names: BTreeSet<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ThematicRatio {
    pub matched_count: usize,
    pub total: usize,
    pub ratio_percent: f64,
    pub matched: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct StepMetrics {
    pub new_groups: NewGroups,
    pub thematic: ThematicRatio,
    pub rolling_average: f64,
}

/// Groups present in `batch` that the global counters have never seen.
pub fn new_groups_in_batch(
    batch: &[ItemRecord],
    global_group_counts: &BTreeMap<String, usize>,
) -> NewGroups {
    let names = batch
        .iter()
        .map(ItemRecord::group_key)
        .filter(|g| !global_group_counts.contains_key(*g))
        .map(str::to_string)
        .collect::<BTreeSet<_>>();
    NewGroups {
        count: names.len(),
        names,
    }
}

/// Share of new groups whose batch titles mostly match `classifier`.
///
/// A group matches when strictly more than half of its titled items in this
/// batch classify positively. Untitled items are not classifiable.
pub fn thematic_ratio(
    new_groups: &BTreeSet<String>,
    batch: &[ItemRecord],
    classifier: &dyn Classifier,
) -> ThematicRatio {
    let matched = new_groups
        .iter()
        .filter(|group| {
            let (positive, classified) = batch
                .iter()
                .filter(|item| item.group_key() == group.as_str())
                .filter(|item| !item.title.trim().is_empty())
                .fold((0usize, 0usize), |(positive, classified), item| {
                    (
                        positive + usize::from(classifier.is_match(&item.title)),
                        classified + 1,
                    )
                });
            classified > 0 && positive * 2 > classified
        })
        .cloned()
        .collect::<Vec<_>>();

    let total = new_groups.len();
    let ratio_percent = if total == 0 {
        0.0
    } else {
        round2(matched.len() as f64 / total as f64 * 100.0)
    };

    ThematicRatio {
        matched_count: matched.len(),
        total,
        ratio_percent,
        matched,
    }
}

/// Fixed capacity window of the latest values.
#[derive(Debug, Clone)]
pub struct RollingAverage {
    window: VecDeque<f64>,
    capacity: usize,
}

impl RollingAverage {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            window: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Pushes `value`, evicting the oldest one on overflow, and returns the mean.
    pub fn push(&mut self, value: f64) -> f64 {
        if self.window.len() == self.capacity {
            self.window.pop_front();
        }
        self.window.push_back(value);
        self.average()
    }

    pub fn average(&self) -> f64 {
        if self.window.is_empty() {
            return 0.0;
        }
        round2(self.window.iter().sum::<f64>() / self.window.len() as f64)
    }

    pub fn reset(&mut self) {
        self.window.clear();
    }

    pub fn len(&self) -> usize {
        self.window.len()
    }

    pub fn is_empty(&self) -> bool {
        self.window.is_empty()
    }
}

/// Computes step metrics and keeps the rolling window alive across runs.
pub struct MetricsTracker {
    classifier: Arc<dyn Classifier>,
    rolling: Mutex<RollingAverage>,
}

impl MetricsTracker {
    pub fn new(classifier: Arc<dyn Classifier>, window: usize) -> Self {
        Self {
            classifier,
            rolling: Mutex::new(RollingAverage::new(window)),
        }
    }

    /// Must run before `batch` is folded into the index that produced
    /// `global_group_counts`, otherwise no group is ever new.
    pub fn record(
        &self,
        batch: &[ItemRecord],
        global_group_counts: &BTreeMap<String, usize>,
    ) -> StepMetrics {
        let new_groups = new_groups_in_batch(batch, global_group_counts);
        let thematic = thematic_ratio(&new_groups.names, batch, self.classifier.as_ref());
        let rolling_average = self.update_rolling_average(thematic.ratio_percent);
        StepMetrics {
            new_groups,
            thematic,
            rolling_average,
        }
    }

    pub fn update_rolling_average(&self, latest: f64) -> f64 {
        self.rolling
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(latest)
    }

    pub fn reset_rolling_average(&self) {
        self.rolling
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .reset();
    }

    pub fn rolling_average(&self) -> f64 {
        self.rolling
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .average()
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
