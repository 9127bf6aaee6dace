//! Dispatch-and-drain loop, driven by iteration.
//!
//! Every call to `next` advances the loop until an output or error is ready:
//! dispatch the next item (pausing while `max_queue` records are undrained),
//! then drain until the active set is empty. All bookkeeping happens on the
//! thread that iterates; only the units of work run on worker threads.

use std::collections::VecDeque;
use std::fmt::Debug;
use std::io;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crate::config::ParallelOptions;
use crate::control::CancelToken;
use crate::error::{JobError, JobErrorKind, RunAborted, RunError};
use crate::pool::{JobResult, UnitFn, WorkerPool};
use crate::report::Reporter;

use super::active::ActiveSet;
use super::job::{Finished, JobRecord, JobStatus, Outcome};

/// Where a run is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    /// Created, nothing dispatched yet.
    Idle,
    /// Pulling items from the input.
    Dispatching,
    /// Input exhausted; waiting for the remaining jobs.
    Draining,
    /// Pool shut down; the iterator is exhausted once buffered items are taken.
    Closed,
}

/// Counts for a run so far.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub dispatched: usize,
    pub completed: usize,
    pub completed_with_errors: usize,
    pub timed_out: usize,
    /// Outputs produced by successful jobs.
    pub outputs: usize,
}

impl RunSummary {
    /// Jobs in any terminal state.
    pub fn finished(&self) -> usize {
        self.completed + self.completed_with_errors + self.timed_out
    }

    pub fn failed(&self) -> usize {
        self.completed_with_errors + self.timed_out
    }

    fn tally(&self) -> String {
        format!(
            "dispatched={}, completed={}, errors={}, timed_out={}",
            self.dispatched, self.completed, self.completed_with_errors, self.timed_out
        )
    }

    fn record(&mut self, status: JobStatus) {
        match status {
            JobStatus::Completed => self.completed += 1,
            JobStatus::CompletedWithErrors => self.completed_with_errors += 1,
            JobStatus::TimedOut => self.timed_out += 1,
        }
    }
}

pub(super) struct RunParts<I, S, O> {
    pub(super) unit: UnitFn<I, S, O>,
    pub(super) side: Option<Arc<S>>,
    pub(super) options: ParallelOptions,
    pub(super) reporter: Reporter,
    pub(super) cancel: CancelToken,
}

/// A parallel run in progress. Yields outputs of successful jobs and one error
/// per failed or timed-out job, in completion order. Dropping it early shuts
/// the pool down.
pub struct ParallelRun<It, S, O>
where
    It: Iterator,
{
    unit: UnitFn<It::Item, S, O>,
    side: Option<Arc<S>>,
    items: It,
    pool: WorkerPool<O>,
    active: ActiveSet<It::Item, O>,
    reporter: Reporter,
    cancel: CancelToken,
    buffer: VecDeque<Result<O, RunError>>,
    state: RunState,
    summary: RunSummary,
    max_queue: usize,
    poll_interval: Duration,
    timeout: Option<Duration>,
    no_close_on_timeout: bool,
    started_at: Option<Instant>,
}

impl<It, S, O> ParallelRun<It, S, O>
where
    It: Iterator,
    It::Item: Debug + Send + 'static,
    S: Send + Sync + 'static,
    O: Send + 'static,
{
    pub(super) fn new(parts: RunParts<It::Item, S, O>, items: It) -> Self {
        let RunParts {
            unit,
            side,
            options,
            reporter,
            cancel,
        } = parts;
        Self {
            unit,
            side,
            items,
            pool: WorkerPool::new(options.throttle, options.capture_environment)
                .with_stack_size(options.worker_stack_size),
            active: ActiveSet::new(),
            reporter,
            cancel,
            buffer: VecDeque::new(),
            state: RunState::Idle,
            summary: RunSummary::default(),
            max_queue: options.effective_max_queue(),
            poll_interval: options.poll_interval(),
            timeout: options.job_timeout(),
            no_close_on_timeout: options.no_close_on_timeout,
            started_at: None,
        }
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn summary(&self) -> RunSummary {
        self.summary
    }

    /// Records dispatched but not yet drained (running or waiting for a worker).
    pub fn active_len(&self) -> usize {
        self.active.len()
    }

    /// Records currently holding a worker. Never exceeds the throttle.
    pub fn running_len(&self) -> usize {
        self.active.running()
    }

    pub fn pool_stats(&self) -> crate::pool::PoolStats {
        self.pool.stats()
    }

    fn begin(&mut self) {
        tracing::info!(
            throttle = self.pool.throttle(),
            max_queue = self.max_queue,
            timeout_secs = self.timeout.map(|t| t.as_secs()),
            "batch processing started"
        );
        self.started_at = Some(Instant::now());
        self.reporter.run_started();
        self.state = RunState::Dispatching;
    }

    fn dispatch_step(&mut self) {
        if self.active.len() >= self.max_queue {
            if !self.drain() && self.active.len() >= self.max_queue {
                tracing::trace!(
                    active = self.active.len(),
                    max_queue = self.max_queue,
                    "queue full; waiting for jobs to finish"
                );
                thread::sleep(self.poll_interval);
            }
            return;
        }
        match self.items.next() {
            Some(item) => {
                self.dispatch(item);
                self.drain();
            }
            None => {
                tracing::debug!(
                    dispatched = self.summary.dispatched,
                    "all items dispatched; draining"
                );
                self.state = RunState::Draining;
            }
        }
    }

    fn drain_step(&mut self) {
        if self.active.is_empty() {
            self.finish();
            return;
        }
        if !self.drain() && !self.active.is_empty() {
            thread::sleep(self.poll_interval);
        }
    }

    fn dispatch(&mut self, item: It::Item) {
        let index = self.summary.dispatched;
        self.summary.dispatched += 1;
        let label = format!("{:?}", item);
        let mut record = JobRecord::new(index, label, item);
        let unstartable = match start_record(&mut self.pool, &self.unit, &self.side, &mut record) {
            Ok(true) => {
                tracing::debug!(index, item = %record.label, "dispatched");
                None
            }
            Ok(false) => {
                tracing::debug!(index, item = %record.label, "queued; no free worker");
                None
            }
            Err(e) => give_up_if_idle(&self.pool, &mut record, e),
        };
        match unstartable {
            Some(f) => self.settle(f),
            None => self.active.push(record),
        }
        self.reporter
            .progress(self.summary.dispatched, self.summary.finished());
    }

    /// One sweep over the active set: settle finished and timed-out jobs, then
    /// hand freed workers to waiting records in dispatch order. Returns true if
    /// any job reached a terminal state.
    fn drain(&mut self) -> bool {
        let now = Instant::now();
        let mut finished = Vec::new();
        for record in self.active.iter_mut() {
            if let Some(f) = record.check(now, self.timeout) {
                finished.push(f);
            }
        }
        let mut removed = self.active.remove_terminal();
        let mut any = !finished.is_empty();
        for f in finished {
            self.settle(f);
        }
        let mut unstartable = Vec::new();
        for record in self.active.iter_mut().filter(|r| r.is_waiting()) {
            match start_record(&mut self.pool, &self.unit, &self.side, record) {
                Ok(true) => {
                    tracing::debug!(index = record.index, item = %record.label, "started queued job")
                }
                Ok(false) => break,
                Err(e) => match give_up_if_idle(&self.pool, record, e) {
                    Some(f) => unstartable.push(f),
                    None => break,
                },
            }
        }
        if !unstartable.is_empty() {
            removed += self.active.remove_terminal();
            any = true;
            for f in unstartable {
                self.settle(f);
            }
        }
        if removed > 0 {
            self.reporter
                .progress(self.summary.dispatched, self.summary.finished());
        }
        any
    }

    fn settle(&mut self, f: Finished<O>) {
        let Finished {
            index,
            label,
            runtime,
            outcome,
            worker,
        } = f;
        let (status, error) = match outcome {
            Outcome::Finished(result) => {
                if let Some(worker) = worker {
                    self.pool.release(worker);
                }
                match result {
                    JobResult::Output(outputs) => {
                        self.summary.outputs += outputs.len();
                        self.buffer.extend(outputs.into_iter().map(Ok));
                        (JobStatus::Completed, None)
                    }
                    JobResult::Failed(e) => {
                        (JobStatus::CompletedWithErrors, Some(JobErrorKind::Failed(e)))
                    }
                    JobResult::Panicked(msg) => {
                        (JobStatus::CompletedWithErrors, Some(JobErrorKind::Panicked(msg)))
                    }
                    JobResult::Lost => (JobStatus::CompletedWithErrors, Some(JobErrorKind::WorkerLost)),
                }
            }
            Outcome::SpawnFailed(e) => {
                (JobStatus::CompletedWithErrors, Some(JobErrorKind::Spawn(e)))
            }
            Outcome::TimedOut(elapsed) => {
                tracing::warn!(
                    index,
                    item = %label,
                    elapsed_secs = elapsed.as_secs_f64(),
                    "job timed out"
                );
                if let Some(worker) = worker {
                    if self.no_close_on_timeout {
                        self.pool.abandon(worker);
                    } else {
                        self.pool.retire(worker);
                    }
                }
                (JobStatus::TimedOut, Some(JobErrorKind::TimedOut(elapsed)))
            }
        };
        self.summary.record(status);

        let details = error.as_ref().map(|k| k.to_string()).unwrap_or_default();
        self.reporter
            .job_finished(&label, runtime, status.as_str(), &details);

        if let Some(kind) = error {
            let err = JobError {
                index,
                item: label,
                kind,
            };
            if !err.is_timeout() {
                tracing::warn!(index, item = %err.item, "job failed: {}", err.kind);
            }
            self.buffer.push_back(Err(RunError::Job(err)));
        } else {
            tracing::debug!(index, item = %label, ?runtime, "job completed");
        }
    }

    fn finish(&mut self) {
        self.pool.shutdown();
        self.state = RunState::Closed;
        let tally = self.summary.tally();
        self.reporter.run_finished("Finished", &tally);
        tracing::info!(
            elapsed_secs = self.elapsed().as_secs_f64(),
            "batch processing finished: {}",
            tally
        );
    }

    fn abort(&mut self) {
        let abandoned = self.teardown();
        tracing::warn!(abandoned, "run aborted");
        self.buffer.push_back(Err(RunError::Aborted(RunAborted {
            dispatched: self.summary.dispatched,
            completed: self.summary.finished(),
            abandoned,
        })));
    }

    /// Dispose every worker still held by an active record and shut the pool
    /// down. Returns the number of records that never reached a terminal state.
    fn teardown(&mut self) -> usize {
        let records = self.active.take_all();
        let abandoned = records.len();
        for mut record in records {
            if let Some(worker) = record.take_worker() {
                self.pool.retire(worker);
            }
        }
        self.pool.shutdown();
        self.state = RunState::Closed;
        let tally = format!("{}, abandoned={}", self.summary.tally(), abandoned);
        self.reporter.run_finished("Aborted", &tally);
        abandoned
    }

    fn elapsed(&self) -> Duration {
        self.started_at.map(|t| t.elapsed()).unwrap_or_default()
    }
}

/// Give `record` a worker and submit its item. `Ok(false)` when the pool is
/// saturated, `Err` when a worker thread could not be spawned.
fn start_record<I, S, O>(
    pool: &mut WorkerPool<O>,
    unit: &UnitFn<I, S, O>,
    side: &Option<Arc<S>>,
    record: &mut JobRecord<I, O>,
) -> io::Result<bool>
where
    I: Send + 'static,
    S: Send + Sync + 'static,
    O: Send + 'static,
{
    if !record.is_waiting() {
        return Ok(false);
    }
    let Some(mut worker) = pool.acquire()? else {
        return Ok(false);
    };
    let Some(item) = record.take_pending() else {
        pool.release(worker);
        return Ok(false);
    };
    let handle = pool.submit(&mut worker, unit, item, record.index, side.clone());
    record.assign(worker, handle);
    Ok(true)
}

/// A spawn failure is final only when no worker is busy: otherwise a running
/// job will hand its worker back and the record keeps waiting for it.
fn give_up_if_idle<I, O: Send + 'static>(
    pool: &WorkerPool<O>,
    record: &mut JobRecord<I, O>,
    err: io::Error,
) -> Option<Finished<O>> {
    if pool.stats().busy > 0 {
        tracing::debug!(index = record.index, error = %err, "spawn failed; waiting for a busy worker");
        return None;
    }
    Some(record.fail_to_start(Instant::now(), err))
}

impl<It, S, O> Iterator for ParallelRun<It, S, O>
where
    It: Iterator,
    It::Item: Debug + Send + 'static,
    S: Send + Sync + 'static,
    O: Send + 'static,
{
    type Item = Result<O, RunError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(next) = self.buffer.pop_front() {
                return Some(next);
            }
            match self.state {
                RunState::Closed => return None,
                RunState::Idle => self.begin(),
                RunState::Dispatching | RunState::Draining if self.cancel.is_cancelled() => {
                    self.abort()
                }
                RunState::Dispatching => self.dispatch_step(),
                RunState::Draining => self.drain_step(),
            }
        }
    }
}

impl<It, S, O> Drop for ParallelRun<It, S, O>
where
    It: Iterator,
{
    fn drop(&mut self) {
        if matches!(self.state, RunState::Dispatching | RunState::Draining) {
            let abandoned = self.active.take_all();
            tracing::debug!(abandoned = abandoned.len(), "run dropped before completion");
            for mut record in abandoned {
                if let Some(mut worker) = record.take_worker() {
                    worker.close();
                }
            }
            self.reporter.run_finished("Aborted", &self.summary.tally());
        }
    }
}
