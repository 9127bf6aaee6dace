//! Bounded pool of worker threads.
//!
//! The pool hands out at most `throttle` workers at a time. It never blocks:
//! `acquire` returns `Ok(None)` when every slot is taken and the scheduler tries
//! again on its next drain round, and `Err` when a new thread cannot be spawned. Workers are spawned lazily, reused after a
//! clean finish, and disposed (or parked as leaked) after a timeout.

mod context;
mod handle;
mod worker;

use std::io;
use std::sync::Arc;

use crossbeam_channel::bounded;

use crate::control::CancelToken;

pub use context::{EnvSnapshot, JobContext};
pub use handle::{JobHandle, JobResult};
pub use worker::Worker;

use worker::Task;

/// Unit of work with its output collected, shared by every worker of a run.
pub type UnitFn<I, S, O> = Arc<dyn Fn(I, &JobContext<S>) -> anyhow::Result<Vec<O>> + Send + Sync>;

/// Wrap a unit of work returning any iterable of outputs into a `UnitFn`.
pub fn unit_fn<I, S, O, R, F>(f: F) -> UnitFn<I, S, O>
where
    F: Fn(I, &JobContext<S>) -> anyhow::Result<R> + Send + Sync + 'static,
    R: IntoIterator<Item = O>,
    I: 'static,
    S: 'static,
    O: 'static,
{
    let collected = move |item: I, ctx: &JobContext<S>| -> anyhow::Result<Vec<O>> {
        Ok(f(item, ctx)?.into_iter().collect())
    };
    Arc::new(collected)
}

/// Counters for tests and diagnostics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Workers waiting for a job.
    pub idle: usize,
    /// Workers currently owned by a job.
    pub busy: usize,
    /// Workers created over the pool's lifetime.
    pub spawned: usize,
    /// Workers disposed after a timeout or abort.
    pub retired: usize,
    /// Timed-out workers left running and never reused.
    pub leaked: usize,
    /// Total `submit` calls.
    pub submitted: usize,
}

pub struct WorkerPool<O> {
    throttle: usize,
    capture_environment: bool,
    stack_size: Option<usize>,
    env: Option<Arc<EnvSnapshot>>,
    idle: Vec<Worker<O>>,
    leaked: Vec<Worker<O>>,
    busy: usize,
    next_id: usize,
    retired: usize,
    submitted: usize,
    shut_down: bool,
}

impl<O: Send + 'static> WorkerPool<O> {
    pub fn new(throttle: usize, capture_environment: bool) -> Self {
        Self {
            throttle: throttle.max(1),
            capture_environment,
            stack_size: None,
            env: None,
            idle: Vec::new(),
            leaked: Vec::new(),
            busy: 0,
            next_id: 0,
            retired: 0,
            submitted: 0,
            shut_down: false,
        }
    }

    /// Stack size for threads spawned from now on (platform default when `None`).
    pub fn with_stack_size(mut self, bytes: Option<usize>) -> Self {
        self.stack_size = bytes;
        self
    }

    pub fn throttle(&self) -> usize {
        self.throttle
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            idle: self.idle.len(),
            busy: self.busy,
            spawned: self.next_id,
            retired: self.retired,
            leaked: self.leaked.len(),
            submitted: self.submitted,
        }
    }

    /// Environment snapshot shared by new workers; captured on first use.
    fn environment(&mut self) -> Option<Arc<EnvSnapshot>> {
        if !self.capture_environment {
            return None;
        }
        let env = self.env.get_or_insert_with(|| {
            let snap = EnvSnapshot::capture();
            tracing::debug!(vars = snap.len(), "captured environment for workers");
            Arc::new(snap)
        });
        Some(Arc::clone(env))
    }

    /// Take an idle worker, or spawn one if fewer than `throttle` are in use.
    /// `Ok(None)` when saturated or after shutdown; `Err` if the thread cannot be spawned.
    pub fn acquire(&mut self) -> io::Result<Option<Worker<O>>> {
        if self.shut_down {
            return Ok(None);
        }
        while let Some(worker) = self.idle.pop() {
            if worker.is_alive() {
                self.busy += 1;
                return Ok(Some(worker));
            }
            tracing::debug!(worker = worker.id(), "dropping dead idle worker");
        }
        if self.busy >= self.throttle {
            return Ok(None);
        }
        let id = self.next_id;
        let env = self.environment();
        let worker = Worker::spawn(id, env, self.stack_size).map_err(|e| {
            tracing::debug!(worker = id, busy = self.busy, error = %e, "worker spawn failed");
            e
        })?;
        self.next_id += 1;
        self.busy += 1;
        Ok(Some(worker))
    }

    /// Start `unit(item)` on `worker` and return a handle to poll for the result.
    pub fn submit<I, S>(
        &mut self,
        worker: &mut Worker<O>,
        unit: &UnitFn<I, S, O>,
        item: I,
        index: usize,
        side: Option<Arc<S>>,
    ) -> JobHandle<O>
    where
        I: Send + 'static,
        S: Send + Sync + 'static,
    {
        let cancel = CancelToken::new();
        let ctx = JobContext {
            index,
            worker_id: worker.id(),
            side,
            env: worker.env(),
            cancel: cancel.clone(),
        };
        let unit = Arc::clone(unit);
        let (reply, rx) = bounded(1);
        let task = Task {
            invocation: Box::new(move || unit(item, &ctx)),
            reply,
        };
        self.submitted += 1;
        worker.dispatch(task, cancel);
        JobHandle::new(rx)
    }

    /// Return a worker whose job finished. Dead workers are dropped instead.
    pub fn release(&mut self, mut worker: Worker<O>) {
        self.busy = self.busy.saturating_sub(1);
        worker.clear_job();
        if self.shut_down || !worker.is_alive() {
            worker.close();
            return;
        }
        self.idle.push(worker);
    }

    /// Dispose a worker whose job timed out: cancel its job, close its channel
    /// and detach the thread without waiting for it.
    pub fn retire(&mut self, mut worker: Worker<O>) {
        self.busy = self.busy.saturating_sub(1);
        self.retired += 1;
        tracing::debug!(worker = worker.id(), "retiring worker");
        worker.close();
    }

    /// Leave a timed-out worker running untouched. It no longer counts against
    /// the throttle and is never reused.
    pub fn abandon(&mut self, worker: Worker<O>) {
        self.busy = self.busy.saturating_sub(1);
        tracing::debug!(worker = worker.id(), "leaving timed-out worker unmanaged");
        self.leaked.push(worker);
    }

    /// Stop handing out workers and release every idle one. Safe to call more than once.
    pub fn shutdown(&mut self) {
        if self.shut_down {
            return;
        }
        self.shut_down = true;
        let idle = std::mem::take(&mut self.idle);
        let count = idle.len();
        for worker in idle {
            worker.close_and_join();
        }
        tracing::debug!(
            joined = count,
            leaked = self.leaked.len(),
            "worker pool shut down"
        );
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down
    }
}

impl<O> Drop for WorkerPool<O> {
    fn drop(&mut self) {
        if !self.shut_down {
            self.shut_down = true;
            for worker in self.idle.drain(..) {
                worker.close_and_join();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};

    fn wait_for<O>(handle: &JobHandle<O>) -> JobResult<O> {
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            if let Some(r) = handle.poll() {
                return r;
            }
            assert!(Instant::now() < deadline, "job did not finish");
            std::thread::sleep(Duration::from_millis(5));
        }
    }

    fn doubler() -> UnitFn<u32, (), u32> {
        unit_fn(|x: u32, _ctx: &JobContext<()>| Ok(Some(x * 2)))
    }

    #[test]
    fn acquire_is_bounded_by_throttle() {
        let mut pool = WorkerPool::<u32>::new(2, false);
        let a = pool.acquire().unwrap().expect("first worker");
        let b = pool.acquire().unwrap().expect("second worker");
        assert!(pool.acquire().unwrap().is_none());
        assert_eq!(pool.stats().busy, 2);
        pool.release(a);
        let c = pool.acquire().unwrap().expect("recycled worker");
        assert_eq!(pool.stats().spawned, 2);
        pool.release(b);
        pool.release(c);
        assert_eq!(pool.stats().idle, 2);
        pool.shutdown();
        assert!(pool.is_shut_down());
        assert!(pool.acquire().unwrap().is_none());
    }

    #[test]
    fn submit_runs_unit_and_worker_is_reused() {
        let mut pool = WorkerPool::<u32>::new(1, false);
        let unit = doubler();
        for i in 0..3u32 {
            let mut worker = pool.acquire().unwrap().unwrap();
            let handle = pool.submit(&mut worker, &unit, i, i as usize, None);
            match wait_for(&handle) {
                JobResult::Output(v) => assert_eq!(v, vec![i * 2]),
                other => panic!("unexpected {:?}", other),
            }
            pool.release(worker);
        }
        let stats = pool.stats();
        assert_eq!(stats.spawned, 1);
        assert_eq!(stats.submitted, 3);
    }

    #[test]
    fn retire_frees_a_slot_and_cancels_the_job() {
        let mut pool = WorkerPool::<u32>::new(1, false);
        let unit: UnitFn<u32, (), u32> = unit_fn(|_x: u32, ctx: &JobContext<()>| {
            while !ctx.is_cancelled() {
                std::thread::sleep(Duration::from_millis(5));
            }
            Ok(None)
        });
        let mut worker = pool.acquire().unwrap().unwrap();
        let _handle = pool.submit(&mut worker, &unit, 0, 0, None);
        assert!(pool.acquire().unwrap().is_none());
        pool.retire(worker);
        let replacement = pool.acquire().unwrap().expect("slot freed by retire");
        assert_eq!(replacement.id(), 1);
        assert_eq!(pool.stats().retired, 1);
        pool.release(replacement);
    }

    #[test]
    fn abandon_parks_worker_as_leaked() {
        let mut pool = WorkerPool::<u32>::new(1, false);
        let worker = pool.acquire().unwrap().unwrap();
        pool.abandon(worker);
        let stats = pool.stats();
        assert_eq!(stats.leaked, 1);
        assert_eq!(stats.busy, 0);
        assert!(pool.acquire().unwrap().is_some());
    }

    #[test]
    fn environment_is_captured_once_and_shared() {
        let mut pool = WorkerPool::<String>::new(2, true);
        let unit: UnitFn<(), (), String> = unit_fn(|_: (), ctx: &JobContext<()>| {
            let env = ctx.environment().expect("environment captured");
            Ok(Some(env.len().to_string()))
        });
        let mut a = pool.acquire().unwrap().unwrap();
        let mut b = pool.acquire().unwrap().unwrap();
        assert!(Arc::ptr_eq(
            a.env().as_ref().unwrap(),
            b.env().as_ref().unwrap()
        ));
        let ha = pool.submit(&mut a, &unit, (), 0, None);
        let hb = pool.submit(&mut b, &unit, (), 1, None);
        let (ra, rb) = (wait_for(&ha), wait_for(&hb));
        match (ra, rb) {
            (JobResult::Output(x), JobResult::Output(y)) => assert_eq!(x, y),
            other => panic!("unexpected {:?}", other),
        }
        pool.release(a);
        pool.release(b);
    }

    #[test]
    fn spawn_failure_is_reported_and_frees_nothing() {
        // No address space can hold this stack, so thread creation fails.
        let mut pool = WorkerPool::<u32>::new(2, false).with_stack_size(Some(1 << 60));
        assert!(pool.acquire().is_err());
        let stats = pool.stats();
        assert_eq!(stats.busy, 0);
        assert_eq!(stats.spawned, 0);
        assert!(pool.acquire().is_err());
    }

    #[test]
    fn no_environment_without_capture() {
        let mut pool = WorkerPool::<u32>::new(1, false);
        let worker = pool.acquire().unwrap().unwrap();
        assert!(worker.env().is_none());
        pool.release(worker);
    }
}
