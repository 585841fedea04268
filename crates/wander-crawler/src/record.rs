use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Group key used when a record carries no usable group.
pub const UNKNOWN_GROUP: &str = "unknown";

/// One observed unit of content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemRecord {
    #[serde(default)]
    pub item_id: String,

    #[serde(default = "default_group_id")]
    pub group_id: String,

    /// The node this item was observed from.
    #[serde(default)]
    pub source_node_id: String,

    /// Free text such as a view count, parsed lazily.
    #[serde(default)]
    pub popularity_signal: String,

    #[serde(default)]
    pub thumbnail_ref: String,

    #[serde(default)]
    pub title: String,

    #[serde(default = "Utc::now")]
    pub observed_at: DateTime<Utc>,

    #[serde(default)]
    pub imported: bool,
}

fn default_group_id() -> String {
    String::from(UNKNOWN_GROUP)
}

impl ItemRecord {
    pub fn new(item_id: impl Into<String>, group_id: impl Into<String>) -> Self {
        Self {
            item_id: item_id.into(),
            group_id: group_id.into(),
            source_node_id: String::new(),
            popularity_signal: String::new(),
            thumbnail_ref: String::new(),
            title: String::new(),
            observed_at: Utc::now(),
            imported: false,
        }
    }

    pub fn from_source(mut self, source_node_id: impl Into<String>) -> Self {
        self.source_node_id = source_node_id.into();
        self
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    pub fn with_popularity(mut self, popularity: impl Into<String>) -> Self {
        self.popularity_signal = popularity.into();
        self
    }

    /// The group this record is folded under, `unknown` for blank groups.
    pub fn group_key(&self) -> &str {
        match self.group_id.trim() {
            "" => UNKNOWN_GROUP,
            g => g,
        }
    }
}

/// How the selector builds its candidate set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[cfg_attr(feature = "clap", derive(clap::ArgEnum))]
pub enum SelectionMode {
    /// Only items from the batch just collected.
    FrontierOnly,
    /// Items of the least represented groups known so far.
    Global,
}

impl Default for SelectionMode {
    fn default() -> Self {
        Self::FrontierOnly
    }
}

impl fmt::Display for SelectionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FrontierOnly => write!(f, "frontier_only"),
            Self::Global => write!(f, "global"),
        }
    }
}

/// The surface a run collects its frontier from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Origin {
    /// Recommendations shown next to the current node.
    Related,
    /// Results of a search query.
    Search(String),
    /// The landing feed.
    Feed,
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Related => write!(f, "related"),
            Self::Search(q) => write!(f, "search:{q}"),
            Self::Feed => write!(f, "feed"),
        }
    }
}
