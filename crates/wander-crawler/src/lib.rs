pub mod adapters;
mod collab;
mod config;
mod error;
mod index;
mod metrics;
mod popularity;
mod record;
mod runner;
mod selector;
mod supervisor;

pub use collab::{
    AvailabilityProbe, Blacklist, Classifier, Collaborators, Collector, EmitOpts, Navigator,
    RecordStore, TelemetrySink,
};
pub use config::{OnError, TraversalConfig};
pub use error::{RunError, StepError};
pub use index::{ExplorationIndex, IndexChange, IndexEvent, IndexSnapshot, IndexSubscriber};
pub use metrics::{
    new_groups_in_batch, thematic_ratio, MetricsTracker, NewGroups, RollingAverage, StepMetrics,
    ThematicRatio,
};
pub use popularity::parse_popularity;
pub use record::{ItemRecord, Origin, SelectionMode, UNKNOWN_GROUP};
pub use runner::{
    CancelToken, RunId, RunOutcome, RunReport, RunState, TraversalRun, TraversalRunner,
};
pub use selector::{rank_groups, GroupDiversitySelector, Selection};
pub use supervisor::{RunInfo, Supervisor};

pub use anyhow;
