//! Progress and audit reporting for a run.
//!
//! Observes job state transitions without affecting scheduling: progress
//! updates are `try_send` (dropped when the consumer lags) and audit log write
//! failures are logged and ignored.

mod audit;
mod progress;

use chrono::Local;
use std::time::Duration;
use tokio::sync::mpsc::Sender;

use crate::config::ParallelOptions;
use crate::error::StartError;

pub use audit::{AuditLog, AuditRow};
pub use progress::ProgressUpdate;

pub(crate) struct Reporter {
    quiet: bool,
    activity: String,
    status: String,
    object_label: String,
    total: Option<usize>,
    progress_tx: Option<Sender<ProgressUpdate>>,
    audit: Option<AuditLog>,
}

impl Reporter {
    pub(crate) fn new(
        opts: &ParallelOptions,
        total: Option<usize>,
        progress_tx: Option<Sender<ProgressUpdate>>,
    ) -> Result<Self, StartError> {
        let audit = match opts.log_destination.as_deref() {
            Some(path) => Some(AuditLog::open(path, opts.append_log).map_err(|source| {
                StartError::Log {
                    path: path.to_path_buf(),
                    source,
                }
            })?),
            None => None,
        };
        Ok(Self {
            quiet: opts.quiet,
            activity: opts.activity_label.clone(),
            status: opts.status_label.clone(),
            object_label: opts.object_name_label.clone(),
            total,
            progress_tx,
            audit,
        })
    }

    pub(crate) fn run_started(&mut self) {
        self.audit_row("Batch processing started", None, "Started", "");
    }

    pub(crate) fn progress(&mut self, started: usize, completed: usize) {
        if self.quiet {
            return;
        }
        let current_operation =
            progress::describe(started, completed, self.total, &self.object_label);
        tracing::debug!(activity = %self.activity, "{}", current_operation);
        if let Some(tx) = &self.progress_tx {
            let update = ProgressUpdate {
                activity: self.activity.clone(),
                status: self.status.clone(),
                current_operation,
                started,
                completed,
                total: self.total,
            };
            let _ = tx.try_send(update);
        }
    }

    pub(crate) fn job_finished(&mut self, label: &str, runtime: Duration, status: &str, details: &str) {
        let action = format!("Removing: {}", label);
        self.audit_row(&action, Some(runtime), status, details);
    }

    pub(crate) fn run_finished(&mut self, status: &str, tally: &str) {
        self.audit_row("Batch processing finished", None, status, tally);
    }

    fn audit_row(&mut self, action: &str, runtime: Option<Duration>, status: &str, details: &str) {
        let Some(log) = self.audit.as_mut() else {
            return;
        };
        let row = AuditRow {
            date: Local::now(),
            action,
            runtime,
            status,
            details,
        };
        if let Err(e) = log.record(&row) {
            tracing::warn!(path = %log.path().display(), error = %e, "audit log write failed");
        }
    }
}
