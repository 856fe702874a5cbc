//! SheetPilot library
//!
//! Glue between sheets, the run coordinator and an in-process tab. Exposed
//! for the binary and for integration testing.

pub mod config;
pub mod host;
pub mod queue;
pub mod runner;
pub mod sheet;

pub use config::{load_config, AppConfig};
pub use host::{CoordinatorLink, LocalTab};
pub use queue::{build_queue, parse_row_range, QueueError, QueueSpec};
pub use runner::{LocalRun, RunOutcome};
pub use sheet::{
    macros_from_rows, parse_csv, CachedSheetSource, CsvFileSource, SheetRef, SheetRows,
    SheetSource, SourceError,
};
