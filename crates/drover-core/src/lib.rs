//! drover-core: run/event data model and the Run Store contract.
//!
//! The event log is the source of truth for a run; everything else in the
//! orchestrator (leases, cancel flags, the live bus) is coordination
//! around it.

pub mod event;
pub mod identity;
pub mod memory_store;
pub mod run;
#[cfg(feature = "sqlite-persistence")]
pub mod sqlite_store;
pub mod store;

pub use event::{
    EventRecord, ERROR_CODE_CANCELLED, ERROR_CODE_TIMEOUT, ERROR_CODE_UNEXPECTED,
    ERROR_CODE_UPSTREAM, EVENT_ASSISTANT_MESSAGE, EVENT_ASSISTANT_PROGRESS, EVENT_RUN_FAILED,
    EVENT_RUN_TIMEOUT, EVENT_TOOL_START, EVENT_USER_MESSAGE,
};
pub use identity::{RunId, Seq};
pub use memory_store::InMemoryRunStore;
pub use run::{Run, RunStatus};
#[cfg(feature = "sqlite-persistence")]
pub use sqlite_store::SqliteRunStore;
pub use store::{RunStore, StoreError};
