//! Per-item job record and its terminal states.

use std::fmt;
use std::io;
use std::time::{Duration, Instant};

use crate::pool::{JobHandle, JobResult, Worker};

/// Terminal state of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobStatus {
    Completed,
    CompletedWithErrors,
    TimedOut,
}

impl JobStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Completed => "Completed",
            JobStatus::CompletedWithErrors => "CompletedWithErrors",
            JobStatus::TimedOut => "TimedOut",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a job left the active set.
pub(crate) enum Outcome<O> {
    Finished(JobResult<O>),
    TimedOut(Duration),
    /// Never started: no worker could be spawned for it.
    SpawnFailed(io::Error),
}

/// A job that reached a terminal state during a drain sweep, with the worker
/// it held (if any) still to be released or disposed.
pub(crate) struct Finished<O> {
    pub(crate) index: usize,
    pub(crate) label: String,
    pub(crate) runtime: Duration,
    pub(crate) outcome: Outcome<O>,
    pub(crate) worker: Option<Worker<O>>,
}

/// Bookkeeping for one dispatched item.
///
/// A record waits (holding its item) until the pool hands it a worker, then
/// runs (holding the worker and the result handle) until it finishes or times
/// out. The start time is the dispatch time, so waiting counts toward the timeout.
pub(crate) struct JobRecord<I, O> {
    pub(crate) index: usize,
    pub(crate) label: String,
    pub(crate) start_time: Instant,
    pending: Option<I>,
    worker: Option<Worker<O>>,
    handle: Option<JobHandle<O>>,
    status: Option<JobStatus>,
}

impl<I, O> JobRecord<I, O> {
    pub(crate) fn new(index: usize, label: String, item: I) -> Self {
        Self {
            index,
            label,
            start_time: Instant::now(),
            pending: Some(item),
            worker: None,
            handle: None,
            status: None,
        }
    }

    pub(crate) fn is_waiting(&self) -> bool {
        self.pending.is_some() && self.status.is_none()
    }

    pub(crate) fn is_running(&self) -> bool {
        self.worker.is_some()
    }

    pub(crate) fn is_terminal(&self) -> bool {
        self.status.is_some()
    }

    /// Take the item so it can be submitted.
    pub(crate) fn take_pending(&mut self) -> Option<I> {
        self.pending.take()
    }

    pub(crate) fn assign(&mut self, worker: Worker<O>, handle: JobHandle<O>) {
        self.worker = Some(worker);
        self.handle = Some(handle);
    }

    /// Poll for completion, then for timeout. On a transition the record is
    /// marked terminal and gives up its worker.
    pub(crate) fn check(&mut self, now: Instant, timeout: Option<Duration>) -> Option<Finished<O>> {
        if self.status.is_some() {
            return None;
        }
        let elapsed = now.saturating_duration_since(self.start_time);
        let outcome = match self.handle.as_ref().and_then(JobHandle::poll) {
            Some(result) => {
                self.status = Some(match result {
                    JobResult::Output(_) => JobStatus::Completed,
                    _ => JobStatus::CompletedWithErrors,
                });
                Outcome::Finished(result)
            }
            None => match timeout {
                Some(limit) if elapsed > limit => {
                    self.status = Some(JobStatus::TimedOut);
                    Outcome::TimedOut(elapsed)
                }
                _ => return None,
            },
        };
        self.handle = None;
        self.pending = None;
        Some(Finished {
            index: self.index,
            label: self.label.clone(),
            runtime: elapsed,
            outcome,
            worker: self.worker.take(),
        })
    }

    /// Mark a waiting record as failed because no worker could be started for it.
    pub(crate) fn fail_to_start(&mut self, now: Instant, err: io::Error) -> Finished<O> {
        self.status = Some(JobStatus::CompletedWithErrors);
        self.pending = None;
        Finished {
            index: self.index,
            label: self.label.clone(),
            runtime: now.saturating_duration_since(self.start_time),
            outcome: Outcome::SpawnFailed(err),
            worker: None,
        }
    }

    /// Give up the worker without a terminal status (run teardown).
    pub(crate) fn take_worker(&mut self) -> Option<Worker<O>> {
        self.handle = None;
        self.worker.take()
    }
}
