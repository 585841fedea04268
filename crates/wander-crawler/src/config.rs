use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::record::SelectionMode;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TraversalConfig {
    #[serde(default = "default_max_attempts_per_transition")]
    pub max_attempts_per_transition: usize,

    #[serde(default = "default_max_selection_retries")]
    pub max_selection_retries: usize,

    #[serde(default = "default_max_no_progress_streak")]
    pub max_no_progress_streak: usize,

    #[serde(default = "default_ready_timeout_ms")]
    pub ready_timeout_ms: u64,

    #[serde(default = "default_ready_poll_interval_ms")]
    pub ready_poll_interval_ms: u64,

    #[serde(default = "default_reload_pause_ms")]
    pub reload_pause_ms: u64,

    #[serde(default = "default_transition_delay_ms")]
    pub transition_delay_ms: u64,

    #[serde(default = "default_global_group_limit")]
    pub global_group_limit: usize,

    #[serde(default = "default_ranked_group_limit")]
    pub ranked_group_limit: usize,

    #[serde(default = "default_rolling_window")]
    pub rolling_window: usize,

    #[serde(default)]
    pub mode: SelectionMode,

    #[serde(default = "default_on_store_error")]
    pub on_store_error: OnError,
}

impl Default for TraversalConfig {
    fn default() -> Self {
        Self {
            max_attempts_per_transition: default_max_attempts_per_transition(),
            max_selection_retries: default_max_selection_retries(),
            max_no_progress_streak: default_max_no_progress_streak(),
            ready_timeout_ms: default_ready_timeout_ms(),
            ready_poll_interval_ms: default_ready_poll_interval_ms(),
            reload_pause_ms: default_reload_pause_ms(),
            transition_delay_ms: default_transition_delay_ms(),
            global_group_limit: default_global_group_limit(),
            ranked_group_limit: default_ranked_group_limit(),
            rolling_window: default_rolling_window(),
            mode: SelectionMode::default(),
            on_store_error: default_on_store_error(),
        }
    }
}

impl TraversalConfig {
    pub fn ready_timeout(&self) -> Duration {
        Duration::from_millis(self.ready_timeout_ms)
    }

    pub fn ready_poll_interval(&self) -> Duration {
        Duration::from_millis(self.ready_poll_interval_ms.max(1))
    }

    pub fn reload_pause(&self) -> Duration {
        Duration::from_millis(self.reload_pause_ms)
    }

    pub fn transition_delay(&self) -> Duration {
        Duration::from_millis(self.transition_delay_ms)
    }
}

fn default_max_attempts_per_transition() -> usize {
    3
}

fn default_max_selection_retries() -> usize {
    5
}

fn default_max_no_progress_streak() -> usize {
    3
}

fn default_ready_timeout_ms() -> u64 {
    5_000
}

fn default_ready_poll_interval_ms() -> u64 {
    500
}

fn default_reload_pause_ms() -> u64 {
    2_000
}

fn default_transition_delay_ms() -> u64 {
    0
}

fn default_global_group_limit() -> usize {
    10
}

fn default_ranked_group_limit() -> usize {
    10
}

fn default_rolling_window() -> usize {
    10
}

fn default_on_store_error() -> OnError {
    OnError::SkipAndLog
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "clap", derive(clap::ArgEnum))]
pub enum OnError {
    Fail,
    SkipAndLog,
}
