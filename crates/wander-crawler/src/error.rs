use thiserror::Error;

use crate::runner::RunId;

/// Why a single attempt at a transition failed.
#[derive(Debug, Error)]
pub enum StepError {
    #[error("Node {0} is unavailable")]
    NodeUnavailable(String),

    #[error("Collected an empty batch")]
    EmptyBatch,

    #[error("No candidate left to select")]
    NoCandidates,

    #[error("Every pick was blacklisted after {retries} selection retries")]
    SelectionExhausted { retries: usize },

    #[error("Navigation failed: {0}")]
    Navigation(anyhow::Error),

    #[error("{step} failed: {error}")]
    Collaborator {
        step: &'static str,
        error: anyhow::Error,
    },
}

impl StepError {
    pub fn collaborator(step: &'static str, error: anyhow::Error) -> Self {
        Self::Collaborator { step, error }
    }

    /// Permanent failures abandon the transition without retrying.
    pub fn is_permanent(&self) -> bool {
        matches!(self, Self::NodeUnavailable(_))
    }

    /// The node a permanent failure is about.
    pub fn node(&self) -> Option<&str> {
        match self {
            Self::NodeUnavailable(node) => Some(node),
            _ => None,
        }
    }

    /// Short tag used when reporting the failure to telemetry.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NodeUnavailable(_) => "node_unavailable",
            Self::EmptyBatch => "empty_batch",
            Self::NoCandidates => "no_candidates",
            Self::SelectionExhausted { .. } => "selection_exhausted",
            Self::Navigation(_) => "navigation",
            Self::Collaborator { step, .. } => step,
        }
    }
}

#[derive(Debug, Error)]
pub enum RunError {
    #[error(
        "No progress after {streak} consecutive failed transitions ({completed}/{target} completed)"
    )]
    Stalled {
        completed: usize,
        target: usize,
        streak: usize,
    },

    #[error("Unknown run {0}")]
    UnknownRun(RunId),

    #[error("Run task failed: {0}")]
    Join(String),
}
