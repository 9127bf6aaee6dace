//! Progress reporting for a run (items dispatched, completed, percent).
//!
//! The scheduler sends a `ProgressUpdate` whenever a job is dispatched or
//! finishes; consumers (the CLI) render it however they like.

/// Snapshot of run progress.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressUpdate {
    /// Activity title (e.g. "Running Query").
    pub activity: String,
    /// Status text (e.g. "Starting threads").
    pub status: String,
    /// Human-readable counts, e.g. "4 threads defined - 2 of 10 input objects processed".
    pub current_operation: String,
    /// Jobs dispatched so far.
    pub started: usize,
    /// Jobs that reached a terminal state.
    pub completed: usize,
    /// Total number of inputs, when known up front.
    pub total: Option<usize>,
}

impl ProgressUpdate {
    /// Percent complete in [0, 100]; `None` when the total is unknown or zero.
    pub fn percent(&self) -> Option<f64> {
        match self.total {
            Some(total) if total > 0 => {
                Some((self.completed as f64 / total as f64 * 100.0).min(100.0))
            }
            _ => None,
        }
    }

    pub fn is_done(&self) -> bool {
        self.total.is_some_and(|t| self.completed >= t)
    }
}

pub(crate) fn describe(started: usize, completed: usize, total: Option<usize>, object: &str) -> String {
    let total = total
        .map(|t| t.to_string())
        .unwrap_or_else(|| "?".to_string());
    format!(
        "{} threads defined - {} of {} {} processed",
        started, completed, total, object
    )
}
