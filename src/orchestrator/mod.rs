//! Run lifecycle: persistent records and the engine that drives them.

mod engine;
mod store;

pub use engine::{Engine, NoopObserver, RunObserver, RunSummary};
pub use store::{JournalEntry, RunLock, RunRecord, RunStatus, RunStore};
