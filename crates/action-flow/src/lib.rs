//! Command interpretation for spreadsheet-driven form filling
//!
//! A row's header cells hold commands in a small language; the row's own cells
//! hold the values. The [`RowExecutor`] walks a row, and the
//! [`CommandInterpreter`] turns each command string into DOM actions with
//! retries and a run-wide error policy.

pub mod errors;
pub mod executor;
pub mod host;
pub mod macros;
pub mod row;
pub mod strategies;
pub mod types;

pub use errors::FlowError;
pub use executor::{sanitize_url, CommandInterpreter};
pub use host::{HostEvent, HostLink, RecordingHost};
pub use macros::{MacroLibrary, MacroResolver};
pub use row::{RowExecutor, COMMAND_SEPARATOR};
pub use strategies::{DefaultFailureHandler, FailureDecision, FailureHandler};
pub use types::*;
