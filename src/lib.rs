pub mod config;
pub mod enrich;
pub mod import;
pub mod index;
pub mod logging;
pub mod source;
pub mod state;
pub mod sync;
pub mod types;

pub use config::{Settings, TableConfig};
pub use enrich::{EnrichOutcome, Enricher};
pub use import::ImportQueueWatcher;
pub use index::{SearchIndex, UpsertReport};
pub use source::{ChangeDetector, ChangeSource, SqlSource};
pub use state::{FsStateStore, ImportJob, JobOutcome, JobState, SyncCheckpoint};
pub use sync::{Orchestrator, StatusReport};
pub use types::{IndexedDocument, document_id};
