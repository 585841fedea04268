use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;

use rand::seq::IndexedRandom;
use rand::Rng;

use crate::collab::Blacklist;
use crate::config::TraversalConfig;
use crate::index::IndexSnapshot;
use crate::popularity::parse_popularity;
use crate::record::{ItemRecord, SelectionMode};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selection {
    pub item_id: String,
    pub group_id: String,
    /// The mode actually used, after escalation.
    pub mode: SelectionMode,
    /// True when no ranked group had an unvisited item and the pick was random.
    pub fallback: bool,
}

/// Picks the next node, favoring groups the index has seen least.
pub struct GroupDiversitySelector {
    blacklist: Arc<dyn Blacklist>,
    global_group_limit: usize,
    ranked_group_limit: usize,
}

impl GroupDiversitySelector {
    pub fn new(blacklist: Arc<dyn Blacklist>) -> Self {
        Self::from_config(&TraversalConfig::default(), blacklist)
    }

    pub fn from_config(config: &TraversalConfig, blacklist: Arc<dyn Blacklist>) -> Self {
        Self {
            blacklist,
            global_group_limit: config.global_group_limit,
            ranked_group_limit: config.ranked_group_limit,
        }
    }

    /// Returns `None` when every candidate was filtered out.
    ///
    /// `excluded` holds ids rejected by earlier picks of the same attempt.
    pub async fn select_next(
        &self,
        index: &IndexSnapshot,
        current_source_id: &str,
        mode: SelectionMode,
        frontier: &[ItemRecord],
        excluded: &HashSet<String>,
    ) -> anyhow::Result<Option<Selection>> {
        let (mode, candidates) = self
            .candidates(index, current_source_id, mode, frontier, excluded)
            .await?;
        Ok(self.pick(index, mode, &candidates, &mut rand::rng()))
    }

    pub async fn select_next_with_rng<R>(
        &self,
        index: &IndexSnapshot,
        current_source_id: &str,
        mode: SelectionMode,
        frontier: &[ItemRecord],
        excluded: &HashSet<String>,
        rng: &mut R,
    ) -> anyhow::Result<Option<Selection>>
    where
        R: Rng + Send,
    {
        let (mode, candidates) = self
            .candidates(index, current_source_id, mode, frontier, excluded)
            .await?;
        Ok(self.pick(index, mode, &candidates, rng))
    }

    async fn candidates(
        &self,
        index: &IndexSnapshot,
        current_source_id: &str,
        requested: SelectionMode,
        frontier: &[ItemRecord],
        excluded: &HashSet<String>,
    ) -> anyhow::Result<(SelectionMode, Vec<ItemRecord>)> {
        let natural = match requested {
            SelectionMode::FrontierOnly => frontier.to_vec(),
            SelectionMode::Global => self.global_candidates(index),
        };

        let (mode, raw) = if distinct_groups(&natural) < 2 && requested != SelectionMode::Global {
            log::info!(
                "Frontier spans {} group(s), escalating selection from {requested} to {}",
                distinct_groups(&natural),
                SelectionMode::Global
            );
            (SelectionMode::Global, self.global_candidates(index))
        } else {
            (requested, natural)
        };

        let mut candidates = Vec::with_capacity(raw.len());
        for item in raw {
            let id = item.item_id.trim();
            if id.is_empty() || id == current_source_id || excluded.contains(id) {
                continue;
            }
            if self.blacklist.contains(id).await? {
                continue;
            }
            candidates.push(item);
        }

        Ok((mode, candidates))
    }

    /// One synthetic candidate per known item of the least represented groups.
    fn global_candidates(&self, index: &IndexSnapshot) -> Vec<ItemRecord> {
        index
            .least_represented(self.global_group_limit)
            .into_iter()
            .flat_map(|(group, _)| {
                index
                    .group_to_item_ids
                    .get(&group)
                    .into_iter()
                    .flatten()
                    .map(move |id| ItemRecord::new(id.clone(), group.clone()))
            })
            .collect()
    }

    fn pick<R>(
        &self,
        index: &IndexSnapshot,
        mode: SelectionMode,
        candidates: &[ItemRecord],
        rng: &mut R,
    ) -> Option<Selection>
    where
        R: Rng + ?Sized,
    {
        let ranked = rank_groups(index, candidates);

        let diversified = ranked
            .iter()
            .take(self.ranked_group_limit)
            .flat_map(|(_, items)| items.iter())
            .find(|item| !index.is_source_visited(&item.item_id));

        if let Some(item) = diversified {
            return Some(Selection {
                item_id: item.item_id.clone(),
                group_id: item.group_key().to_string(),
                mode,
                fallback: false,
            });
        }

        let item = candidates.choose(rng)?;
        log::info!(
            "No unvisited item in the top {} groups, falling back to random pick {}",
            self.ranked_group_limit,
            item.item_id
        );
        Some(Selection {
            item_id: item.item_id.clone(),
            group_id: item.group_key().to_string(),
            mode,
            fallback: true,
        })
    }
}

fn distinct_groups(items: &[ItemRecord]) -> usize {
    items
        .iter()
        .map(ItemRecord::group_key)
        .collect::<BTreeSet<_>>()
        .len()
}

/// Buckets candidates by group and orders the groups by ascending global count.
///
/// Groups known by exactly one item are ordered among themselves by the
/// popularity of their first candidate, most popular first.
pub fn rank_groups<'a>(
    index: &IndexSnapshot,
    candidates: &'a [ItemRecord],
) -> Vec<(String, Vec<&'a ItemRecord>)> {
    let mut buckets: Vec<(String, Vec<&ItemRecord>)> = Vec::new();
    for item in candidates {
        let group = item.group_key();
        match buckets.iter_mut().find(|(g, _)| g == group) {
            Some((_, items)) => items.push(item),
            None => buckets.push((group.to_string(), vec![item])),
        }
    }

    buckets.sort_by_key(|(group, _)| index.group_count(group));

    if let Some(start) = buckets
        .iter()
        .position(|(group, _)| index.group_count(group) == 1)
    {
        let len = buckets[start..]
            .iter()
            .take_while(|(group, _)| index.group_count(group) == 1)
            .count();
        buckets[start..start + len].sort_by_key(|(_, items)| {
            std::cmp::Reverse(parse_popularity(&items[0].popularity_signal))
        });
    }

    buckets
}
