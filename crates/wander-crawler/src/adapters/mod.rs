//! Concrete collaborators, selected when a [`Supervisor`](crate::Supervisor) is built.

mod classifier;
mod csv_store;
mod file_blacklist;
mod http_probe;
mod memory;
mod offline;
mod telemetry;

pub use classifier::ScriptClassifier;
pub use csv_store::{import_csv, CsvRecordStore, CsvTerminator, CsvWriterConfig};
pub use file_blacklist::FileBlacklist;
pub use http_probe::HttpAvailabilityProbe;
pub use memory::{MemoryBlacklist, MemoryRecordStore};
pub use offline::{GraphItem, GraphLayout, OfflineGraph};
pub use telemetry::{LogTelemetry, NoopTelemetry};
