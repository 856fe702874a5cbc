//! SheetPilot run coordinator.
//!
//! One actor owns the run state, the variable store and the tab dispatch.
//! Everything else talks to it through a [`CoordinatorHandle`].

pub mod api;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod events;
pub mod model;
pub mod persist;
pub mod storage;

pub use api::{CoordinatorHandle, Mailbox};
pub use config::RunConfig;
pub use coordinator::{Coordinator, STOP_CLEAR_THRESHOLD};
pub use error::{SchedulerError, StorageError};
pub use events::UiEvent;
pub use model::{RunState, RunStatus};
pub use storage::{FileStorage, MemoryStorage, StateStorage, STATE_KEY, VARIABLES_KEY};
