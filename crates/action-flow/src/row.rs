//! Row executor
//!
//! Walks the header cells of one row in column order. Each header may chain
//! several commands with `&&`; every command receives the row's cell value
//! for that column.

use std::sync::Arc;

use parking_lot::Mutex;
use sheetpilot_core_types::CommandCursor;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::errors::FlowError;
use crate::executor::CommandInterpreter;
use crate::types::{CommandOutcome, ExecContext, RowJob, RowReport};

/// Separator of chained commands inside one header cell
pub const COMMAND_SEPARATOR: &str = "&&";

pub struct RowExecutor {
    interpreter: Arc<CommandInterpreter>,
}

impl RowExecutor {
    pub fn new(interpreter: Arc<CommandInterpreter>) -> Self {
        Self { interpreter }
    }

    pub fn interpreter(&self) -> &CommandInterpreter {
        &self.interpreter
    }

    /// Execute every command of `job`, starting at `job.resume_at` when set
    ///
    /// `Ok` means the row ran to its end (the caller then reports
    /// `automation_completed`). `Err(Cancelled)` is a stop or an unload;
    /// `Err(Aborted)` is the `stop` error policy.
    pub async fn run(
        &self,
        job: &RowJob,
        cancel: CancellationToken,
    ) -> Result<RowReport, FlowError> {
        let policy = Arc::new(Mutex::new(job.policy));
        let base = ExecContext::new(job, policy, cancel);
        let mut report = RowReport::default();
        info!(
            row_index = job.item.row_index,
            token = %job.token,
            resume_at = ?job.resume_at,
            "Executing row {}",
            job.item.label()
        );

        for (cell, header) in job.item.xpaths.iter().enumerate() {
            let header = header.trim();
            if header.is_empty() {
                continue;
            }
            let cell_value = job.item.values.get(cell).map(|v| v.trim()).unwrap_or("");

            for (part, command) in header.split(COMMAND_SEPARATOR).enumerate() {
                if base.is_cancelled() {
                    debug!("Row stopped before command {}:{}", cell, part);
                    return Err(FlowError::Cancelled);
                }
                let cursor = CommandCursor::new(cell, part);
                if job.resume_at.map_or(false, |resume| cursor < resume) {
                    report.resumed_past += 1;
                    continue;
                }
                let outcome = self
                    .interpreter
                    .process_command(command, &base.at(cursor, cell_value))
                    .await?;
                report.executed += 1;
                if let CommandOutcome::Skipped { .. } = outcome {
                    report.skipped += 1;
                }
            }
        }

        info!(
            row_index = job.item.row_index,
            executed = report.executed,
            skipped = report.skipped,
            "Row finished"
        );
        Ok(report)
    }
}
