use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::time::{sleep, timeout};

use crate::collab::{Collaborators, EmitOpts};
use crate::config::{OnError, TraversalConfig};
use crate::error::{RunError, StepError};
use crate::index::ExplorationIndex;
use crate::metrics::MetricsTracker;
use crate::record::{ItemRecord, Origin, SelectionMode};
use crate::selector::{GroupDiversitySelector, Selection};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RunId(pub u64);

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "run-{}", self.0)
    }
}

/// Cooperative cancellation flag, polled at the top of every loop.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Idle,
    Running,
    Completed,
    Cancelled,
    Failed,
}

#[derive(Debug, Clone)]
pub struct TraversalRun {
    pub run_id: RunId,
    pub cancel: CancelToken,
    pub target_transitions: usize,
    pub completed_transitions: usize,
    pub no_progress_streak: usize,
    pub state: RunState,
    attempts: usize,
    path: Vec<String>,
    blacklisted: Vec<String>,
}

impl TraversalRun {
    pub fn new(run_id: RunId, target_transitions: usize) -> Self {
        Self::with_cancel(run_id, target_transitions, CancelToken::new())
    }

    pub fn with_cancel(run_id: RunId, target_transitions: usize, cancel: CancelToken) -> Self {
        Self {
            run_id,
            cancel,
            target_transitions,
            completed_transitions: 0,
            no_progress_streak: 0,
            state: RunState::Idle,
            attempts: 0,
            path: Vec::new(),
            blacklisted: Vec::new(),
        }
    }

    fn report(&self) -> RunReport {
        RunReport {
            run_id: self.run_id,
            target_transitions: self.target_transitions,
            completed_transitions: self.completed_transitions,
            attempts: self.attempts,
            path: self.path.clone(),
            blacklisted: self.blacklisted.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub run_id: RunId,
    pub target_transitions: usize,
    pub completed_transitions: usize,
    /// Attempts across every transition, successful or not.
    pub attempts: usize,
    /// Nodes navigated to, in order.
    pub path: Vec<String>,
    /// Nodes found unavailable during the run.
    pub blacklisted: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Completed(RunReport),
    Cancelled(RunReport),
}

impl RunOutcome {
    pub fn report(&self) -> &RunReport {
        match self {
            Self::Completed(report) | Self::Cancelled(report) => report,
        }
    }
}

enum Transition {
    Navigated(String),
    Abandoned(String),
    Exhausted,
    Cancelled,
}

/// Executes one traversal run against borrowed shared state.
pub struct TraversalRunner<'a> {
    config: &'a TraversalConfig,
    index: &'a ExplorationIndex,
    metrics: &'a MetricsTracker,
    collab: &'a Collaborators,
    selector: GroupDiversitySelector,
    mode: SelectionMode,
    origin: Origin,
    run: TraversalRun,
}

impl<'a> TraversalRunner<'a> {
    pub fn new(
        run: TraversalRun,
        mode: SelectionMode,
        origin: Origin,
        config: &'a TraversalConfig,
        index: &'a ExplorationIndex,
        metrics: &'a MetricsTracker,
        collab: &'a Collaborators,
    ) -> Self {
        Self {
            config,
            index,
            metrics,
            collab,
            selector: GroupDiversitySelector::from_config(config, collab.blacklist.clone()),
            mode,
            origin,
            run,
        }
    }

    pub async fn run(mut self) -> Result<RunOutcome, RunError> {
        self.run.state = RunState::Running;
        log::info!(
            "{} started: {} transitions from {} in {} mode",
            self.run.run_id,
            self.run.target_transitions,
            self.origin,
            self.mode
        );

        loop {
            if self.run.cancel.is_cancelled() {
                return Ok(self.cancelled());
            }
            if self.run.completed_transitions >= self.run.target_transitions {
                self.run.state = RunState::Completed;
                log::info!(
                    "{} completed {} transitions in {} attempts",
                    self.run.run_id,
                    self.run.completed_transitions,
                    self.run.attempts
                );
                return Ok(RunOutcome::Completed(self.run.report()));
            }
            if self.run.no_progress_streak >= self.config.max_no_progress_streak {
                self.run.state = RunState::Failed;
                let err = RunError::Stalled {
                    completed: self.run.completed_transitions,
                    target: self.run.target_transitions,
                    streak: self.run.no_progress_streak,
                };
                log::error!("{} aborted: {err}", self.run.run_id);
                self.collab.emit("run_stalled", 1.0, &self.opts());
                return Err(err);
            }

            match self.transition().await {
                Transition::Navigated(node) => {
                    self.run.completed_transitions += 1;
                    self.run.no_progress_streak = 0;
                    log::info!(
                        "{} transition {}/{} reached {node}",
                        self.run.run_id,
                        self.run.completed_transitions,
                        self.run.target_transitions
                    );
                    self.run.path.push(node);
                    self.collab.emit(
                        "transitions_completed",
                        self.run.completed_transitions as f64,
                        &self.opts(),
                    );
                    if self.config.transition_delay_ms > 0 {
                        sleep(self.config.transition_delay()).await;
                    }
                }
                Transition::Abandoned(node) => {
                    self.run.no_progress_streak += 1;
                    self.run.blacklisted.push(node);
                }
                Transition::Exhausted => {
                    self.run.no_progress_streak += 1;
                    log::warn!(
                        "{} gave up on a transition after {} attempts (no progress streak {})",
                        self.run.run_id,
                        self.config.max_attempts_per_transition,
                        self.run.no_progress_streak
                    );
                }
                Transition::Cancelled => return Ok(self.cancelled()),
            }
        }
    }

    fn cancelled(&mut self) -> RunOutcome {
        self.run.state = RunState::Cancelled;
        log::info!(
            "{} cancelled after {} transitions",
            self.run.run_id,
            self.run.completed_transitions
        );
        RunOutcome::Cancelled(self.run.report())
    }

    fn opts(&self) -> EmitOpts {
        EmitOpts::for_run(self.run.run_id)
    }

    async fn transition(&mut self) -> Transition {
        let max_attempts = self.config.max_attempts_per_transition;
        for attempt in 1..=max_attempts {
            if self.run.cancel.is_cancelled() {
                return Transition::Cancelled;
            }
            self.run.attempts += 1;

            match self.attempt().await {
                Ok(node) => {
                    self.wait_until_ready(&node).await;
                    return Transition::Navigated(node);
                }
                Err(e) if e.is_permanent() => {
                    let node = e.node().unwrap_or_default().to_string();
                    log::warn!("{} {e}, blacklisting it", self.run.run_id);
                    self.collab.emit(
                        "node_blacklisted",
                        1.0,
                        &self.opts().tag("node", node.clone()),
                    );
                    if let Err(e) = self.collab.blacklist.add(&[node.clone()]).await {
                        log::error!("Couldn't blacklist {node}: {e}");
                    }
                    return Transition::Abandoned(node);
                }
                Err(e) => {
                    log::warn!(
                        "{} attempt {attempt}/{max_attempts} failed: {e}",
                        self.run.run_id
                    );
                    self.collab
                        .emit("attempt_failed", 1.0, &self.opts().tag("reason", e.kind()));
                    if attempt < max_attempts {
                        self.reload_and_pause().await;
                    }
                }
            }
        }
        Transition::Exhausted
    }

    async fn attempt(&self) -> Result<String, StepError> {
        let collab = self.collab;

        let current = collab
            .navigator
            .current_node()
            .await
            .map_err(|e| StepError::collaborator("current_node", e))?;

        let available = collab
            .probe
            .is_available(&current)
            .await
            .map_err(|e| StepError::collaborator("probe", e))?;
        if !available {
            return Err(StepError::NodeUnavailable(current));
        }

        let batch = collab
            .collector
            .collect(&self.origin)
            .await
            .map_err(|e| StepError::collaborator("collect", e))?;
        if batch.is_empty() {
            return Err(StepError::EmptyBatch);
        }

        let step = self.metrics.record(&batch, &self.index.group_counts());
        let opts = self.opts();
        collab.emit("new_groups", step.new_groups.count as f64, &opts);
        collab.emit("thematic_ratio", step.thematic.ratio_percent, &opts);
        collab.emit("thematic_ratio_avg", step.rolling_average, &opts);
        log::debug!(
            "{} collected {} items from {current}: {} new groups, thematic {}% (avg {}%)",
            self.run.run_id,
            batch.len(),
            step.new_groups.count,
            step.thematic.ratio_percent,
            step.rolling_average
        );

        self.index.add_batch(&batch, true);

        if let Err(e) = collab.store.add_batch(&batch).await {
            match self.config.on_store_error {
                OnError::SkipAndLog => {
                    log::warn!("Skipping persistence of {} records got: {e}", batch.len());
                }
                OnError::Fail => return Err(StepError::collaborator("store", e)),
            }
        }

        let selection = self.select(&current, &batch).await?;
        log::debug!(
            "{} selected {} from group {} ({} mode{})",
            self.run.run_id,
            selection.item_id,
            selection.group_id,
            selection.mode,
            if selection.fallback { ", random fallback" } else { "" }
        );

        collab
            .navigator
            .go_to(&selection.item_id)
            .await
            .map_err(StepError::Navigation)?;

        Ok(selection.item_id)
    }

    /// Retries selection only to skip picks blacklisted in the meantime.
    async fn select(&self, current: &str, batch: &[ItemRecord]) -> Result<Selection, StepError> {
        let snapshot = self.index.snapshot();
        let mut excluded = HashSet::new();

        for _ in 0..self.config.max_selection_retries {
            let selection = self
                .selector
                .select_next(&snapshot, current, self.mode, batch, &excluded)
                .await
                .map_err(|e| StepError::collaborator("select", e))?
                .ok_or(StepError::NoCandidates)?;

            let blacklisted = self
                .collab
                .blacklist
                .contains(&selection.item_id)
                .await
                .map_err(|e| StepError::collaborator("blacklist", e))?;
            if !blacklisted {
                return Ok(selection);
            }
            log::debug!("Pick {} is blacklisted, selecting again", selection.item_id);
            excluded.insert(selection.item_id);
        }

        Err(StepError::SelectionExhausted {
            retries: self.config.max_selection_retries,
        })
    }

    async fn reload_and_pause(&self) {
        if let Err(e) = self.collab.navigator.reload().await {
            log::warn!("{} reload failed: {e}", self.run.run_id);
        }
        sleep(self.config.reload_pause()).await;
    }

    /// Polls the ready probe, proceeding anyway on timeout.
    async fn wait_until_ready(&self, node: &str) {
        let navigator = &self.collab.navigator;
        let interval = self.config.ready_poll_interval();
        let poll = async {
            while !navigator.is_ready(node).await {
                sleep(interval).await;
            }
        };
        if timeout(self.config.ready_timeout(), poll).await.is_err() {
            log::warn!(
                "{} node {node} not ready after {}ms, proceeding",
                self.run.run_id,
                self.config.ready_timeout_ms
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancel_token_is_shared_between_clones() {
        let token = CancelToken::new();
        let clone = token.clone();
        assert!(!clone.is_cancelled());
        token.cancel();
        assert!(clone.is_cancelled());
    }

    #[test]
    fn run_starts_idle() {
        let run = TraversalRun::new(RunId(3), 5);
        assert_eq!(RunState::Idle, run.state);
        assert_eq!("run-3", run.run_id.to_string());
        assert_eq!(0, run.report().completed_transitions);
    }
}
