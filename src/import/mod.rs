//! Bulk import queue.
//!
//! Watches the incoming directory, claims files through the state store, and
//! drives each one through `pending -> processing -> done | error`. Crashed
//! runs are picked up by the stale-claim recovery sweep; a file in `error`
//! waits for an operator reset.

mod error;
mod parser;
mod watcher;

pub use error::{ImportError, ImportResult};
pub use parser::parse_jsonl;
pub use watcher::ImportQueueWatcher;
