//! Pollable result of one submitted job.

use crossbeam_channel::{Receiver, TryRecvError};

/// What a worker reports for one invocation.
#[derive(Debug)]
pub enum JobResult<O> {
    Output(Vec<O>),
    Failed(anyhow::Error),
    Panicked(String),
    /// The reply channel closed without a result (worker thread gone).
    Lost,
}

/// Handle returned by `WorkerPool::submit`. Polling never blocks.
#[derive(Debug)]
pub struct JobHandle<O> {
    rx: Receiver<JobResult<O>>,
}

impl<O> JobHandle<O> {
    pub(crate) fn new(rx: Receiver<JobResult<O>>) -> Self {
        Self { rx }
    }

    /// `Some` once the job has finished; `None` while it is still running.
    pub fn poll(&self) -> Option<JobResult<O>> {
        match self.rx.try_recv() {
            Ok(result) => Some(result),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => Some(JobResult::Lost),
        }
    }
}
