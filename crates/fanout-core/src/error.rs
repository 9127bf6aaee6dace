//! Error types surfaced by the engine.
//!
//! Configuration and start-up failures are fatal and returned before any job is
//! dispatched. Per-job failures are yielded through the run iterator and never
//! stop the batch.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Invalid engine configuration; detected before dispatch begins.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("no unit of work was provided")]
    MissingUnitOfWork,
    #[error("throttle must be at least 1")]
    ZeroThrottle,
    #[error("poll interval must be at least 1 ms")]
    ZeroPollInterval,
    #[error("max queue must be at least 1")]
    ZeroMaxQueue,
}

/// Failure to start a run.
#[derive(Debug, Error)]
pub enum StartError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("open job log {}: {source}", path.display())]
    Log {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// A single job that did not complete cleanly.
#[derive(Debug, Error)]
#[error("job {index} ({item}): {kind}")]
pub struct JobError {
    /// Position of the item in the input sequence (0-based).
    pub index: usize,
    /// `Debug` rendering of the work item.
    pub item: String,
    pub kind: JobErrorKind,
}

#[derive(Debug, Error)]
pub enum JobErrorKind {
    /// The unit of work returned an error.
    #[error("{0:#}")]
    Failed(anyhow::Error),
    /// The unit of work panicked; the payload message if it was a string.
    #[error("panicked: {0}")]
    Panicked(String),
    /// The worker went away without reporting a result.
    #[error("worker exited without reporting a result")]
    WorkerLost,
    /// No worker thread could be started for the job and none was running
    /// that could free up.
    #[error("could not start a worker thread: {0}")]
    Spawn(#[source] std::io::Error),
    /// The job ran longer than the configured timeout and was abandoned.
    #[error("timed out after {:.1}s", .0.as_secs_f64())]
    TimedOut(Duration),
}

impl JobError {
    pub fn is_timeout(&self) -> bool {
        matches!(self.kind, JobErrorKind::TimedOut(_))
    }
}

/// The run was cancelled through its `CancelToken`.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("run aborted: {dispatched} dispatched, {completed} completed, {abandoned} abandoned")]
pub struct RunAborted {
    pub dispatched: usize,
    pub completed: usize,
    /// Jobs that were still active when the run was aborted.
    pub abandoned: usize,
}

/// Error item yielded by a run.
#[derive(Debug, Error)]
pub enum RunError {
    #[error(transparent)]
    Job(#[from] JobError),
    #[error(transparent)]
    Aborted(#[from] RunAborted),
}

impl RunError {
    /// The job error, if this is a per-job failure.
    pub fn as_job(&self) -> Option<&JobError> {
        match self {
            RunError::Job(e) => Some(e),
            RunError::Aborted(_) => None,
        }
    }

    pub fn is_aborted(&self) -> bool {
        matches!(self, RunError::Aborted(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_error_display_names_item_and_cause() {
        let err = JobError {
            index: 2,
            item: "3".to_string(),
            kind: JobErrorKind::Failed(anyhow::anyhow!("division by zero")),
        };
        assert_eq!(err.to_string(), "job 2 (3): division by zero");
        assert!(!err.is_timeout());
    }

    #[test]
    fn timeout_display_has_elapsed_seconds() {
        let err = JobError {
            index: 0,
            item: "\"host-a\"".to_string(),
            kind: JobErrorKind::TimedOut(Duration::from_millis(1_300)),
        };
        assert!(err.is_timeout());
        assert_eq!(err.to_string(), "job 0 (\"host-a\"): timed out after 1.3s");
    }

    #[test]
    fn run_error_helpers() {
        let aborted = RunError::from(RunAborted {
            dispatched: 4,
            completed: 1,
            abandoned: 3,
        });
        assert!(aborted.is_aborted());
        assert!(aborted.as_job().is_none());
        assert_eq!(
            aborted.to_string(),
            "run aborted: 4 dispatched, 1 completed, 3 abandoned"
        );
    }
}
