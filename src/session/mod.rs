//! Durable, resumable plan execution sessions.
//!
//! A session wraps one run of a plan in a persisted state machine
//! (`pending → running → completed | failed | waiting_input`), so a run can
//! pause for user input, survive a process restart, be retried from a given
//! step, or be cancelled. [`types`] holds the record model and storage
//! contract, [`storage_memory`] and [`storage_file`] the two built-in
//! backends, and [`manager`] the lifecycle operations.

pub mod manager;
pub mod storage_file;
pub mod storage_memory;
pub mod types;

pub use manager::{SessionError, SessionManager, SessionOutcome};
pub use storage_file::FileSessionStorage;
pub use storage_memory::InMemorySessionStorage;
pub use types::{
    is_valid_transition, ExecutionSession, SessionFilter, SessionStatus, SessionStorage,
    SessionUpdate, StorageError,
};
