//! Parallel run scheduler.
//!
//! A run streams items from its input into a bounded worker pool and yields
//! results as jobs finish:
//!
//! ```no_run
//! use fanout_core::{run_parallel, JobContext, ParallelOptions};
//!
//! let opts = ParallelOptions { throttle: 4, ..Default::default() };
//! let run = run_parallel(|x: u32, _ctx: &JobContext<()>| Ok(vec![x * 2]), 0..10, opts)?;
//! for result in run {
//!     match result {
//!         Ok(doubled) => println!("{doubled}"),
//!         Err(e) => eprintln!("{e}"),
//!     }
//! }
//! # Ok::<(), fanout_core::StartError>(())
//! ```
//!
//! Nothing is dispatched until the first call to `next`. Dispatching pauses
//! while `max_queue` records are undrained, and at most `throttle` units of
//! work run at once. Results arrive in completion order, not input order.

mod active;
mod job;
mod run;

use std::fmt::Debug;
use std::sync::Arc;

use tokio::sync::mpsc::Sender;

use crate::config::ParallelOptions;
use crate::control::CancelToken;
use crate::error::{ConfigError, StartError};
use crate::pool::{self, JobContext, UnitFn};
use crate::report::{ProgressUpdate, Reporter};

pub use job::JobStatus;
pub use run::{ParallelRun, RunState, RunSummary};

use run::RunParts;

/// Configures and starts a parallel run.
///
/// `I` is the item type, `S` the side parameter shared by every job and `O`
/// the output type.
pub struct ParallelBuilder<I, S, O> {
    unit: Option<UnitFn<I, S, O>>,
    side: Option<Arc<S>>,
    options: ParallelOptions,
    progress: Option<Sender<ProgressUpdate>>,
    cancel: CancelToken,
}

impl<I, S, O> Default for ParallelBuilder<I, S, O> {
    fn default() -> Self {
        Self {
            unit: None,
            side: None,
            options: ParallelOptions::default(),
            progress: None,
            cancel: CancelToken::new(),
        }
    }
}

impl<I, S, O> ParallelBuilder<I, S, O>
where
    I: Debug + Send + 'static,
    S: Send + Sync + 'static,
    O: Send + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Unit of work applied to each item. It may return any iterable of
    /// outputs (`Vec`, `Option`, ...); every element is yielded.
    pub fn unit<R, F>(mut self, f: F) -> Self
    where
        F: Fn(I, &JobContext<S>) -> anyhow::Result<R> + Send + Sync + 'static,
        R: IntoIterator<Item = O>,
    {
        self.unit = Some(pool::unit_fn(f));
        self
    }

    /// Use an already wrapped unit of work (e.g. shared between runs).
    pub fn unit_fn(mut self, unit: UnitFn<I, S, O>) -> Self {
        self.unit = Some(unit);
        self
    }

    /// Value handed to every job through `JobContext::side_parameter`.
    pub fn side_parameter(mut self, side: S) -> Self {
        self.side = Some(Arc::new(side));
        self
    }

    pub fn options(mut self, options: ParallelOptions) -> Self {
        self.options = options;
        self
    }

    /// Receive progress updates. Updates are dropped when the channel is full.
    pub fn progress(mut self, tx: Sender<ProgressUpdate>) -> Self {
        self.progress = Some(tx);
        self
    }

    /// Token that aborts the run when cancelled. Checked once per scheduling step.
    pub fn cancel_token(mut self, token: CancelToken) -> Self {
        self.cancel = token;
        self
    }

    /// Validate the configuration, open the audit log (if any) and return the
    /// lazy run. No worker is started until the run is first polled.
    pub fn run<T>(self, items: T) -> Result<ParallelRun<T::IntoIter, S, O>, StartError>
    where
        T: IntoIterator<Item = I>,
    {
        let unit = self.unit.ok_or(ConfigError::MissingUnitOfWork)?;
        self.options.validate()?;
        let items = items.into_iter();
        let total = match items.size_hint() {
            (lo, Some(hi)) if lo == hi => Some(lo),
            _ => None,
        };
        let reporter = Reporter::new(&self.options, total, self.progress)?;
        let parts = RunParts {
            unit,
            side: self.side,
            options: self.options,
            reporter,
            cancel: self.cancel,
        };
        Ok(ParallelRun::new(parts, items))
    }
}

/// Run `unit` over `items` with `options` and no side parameter.
pub fn run_parallel<T, O, R, F>(
    unit: F,
    items: T,
    options: ParallelOptions,
) -> Result<ParallelRun<T::IntoIter, (), O>, StartError>
where
    T: IntoIterator,
    T::Item: Debug + Send + 'static,
    O: Send + 'static,
    F: Fn(T::Item, &JobContext<()>) -> anyhow::Result<R> + Send + Sync + 'static,
    R: IntoIterator<Item = O>,
{
    ParallelBuilder::new().unit(unit).options(options).run(items)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{JobErrorKind, RunError};
    use std::time::Duration;

    fn fast() -> ParallelOptions {
        ParallelOptions {
            throttle: 3,
            poll_interval_ms: 5,
            ..Default::default()
        }
    }

    #[test]
    fn missing_unit_is_rejected() {
        let builder: ParallelBuilder<u32, (), u32> = ParallelBuilder::new();
        match builder.run(0..3) {
            Err(StartError::Config(ConfigError::MissingUnitOfWork)) => {}
            other => panic!("expected missing unit, got {:?}", other.err()),
        }
    }

    #[test]
    fn invalid_options_are_rejected_before_dispatch() {
        let opts = ParallelOptions {
            throttle: 0,
            ..Default::default()
        };
        let res = run_parallel(|x: u32, _ctx: &JobContext<()>| Ok(Some(x)), 0..3, opts);
        assert!(matches!(
            res.err(),
            Some(StartError::Config(ConfigError::ZeroThrottle))
        ));
    }

    #[test]
    fn run_is_lazy_until_polled() {
        let run = run_parallel(|x: u32, _ctx: &JobContext<()>| Ok(Some(x)), 0..3, fast()).unwrap();
        assert_eq!(run.state(), RunState::Idle);
        assert_eq!(run.summary().dispatched, 0);
        assert_eq!(run.pool_stats().spawned, 0);
    }

    #[test]
    fn every_item_yields_its_outputs() {
        let mut out: Vec<u32> = run_parallel(
            |x: u32, _ctx: &JobContext<()>| Ok(vec![x, x + 100]),
            0..5,
            fast(),
        )
        .unwrap()
        .map(|r| r.unwrap())
        .collect();
        out.sort_unstable();
        assert_eq!(out, vec![0, 1, 2, 3, 4, 100, 101, 102, 103, 104]);
    }

    #[test]
    fn summary_and_state_after_completion() {
        let mut run = run_parallel(
            |x: u32, _ctx: &JobContext<()>| {
                if x == 2 {
                    anyhow::bail!("bad item");
                }
                Ok(Some(x))
            },
            0..4,
            fast(),
        )
        .unwrap();
        let results: Vec<_> = run.by_ref().collect();
        assert_eq!(results.len(), 4);
        let errors: Vec<&RunError> = results.iter().filter_map(|r| r.as_ref().err()).collect();
        assert_eq!(errors.len(), 1);
        let job = errors[0].as_job().expect("job error");
        assert_eq!(job.index, 2);
        assert_eq!(job.item, "2");
        assert!(matches!(job.kind, JobErrorKind::Failed(_)));

        assert_eq!(run.state(), RunState::Closed);
        let summary = run.summary();
        assert_eq!(summary.dispatched, 4);
        assert_eq!(summary.completed, 3);
        assert_eq!(summary.completed_with_errors, 1);
        assert_eq!(summary.finished(), 4);
        assert_eq!(summary.failed(), 1);
        assert_eq!(summary.outputs, 3);
        assert_eq!(run.active_len(), 0);
        assert!(run.next().is_none());
    }

    #[test]
    fn panicking_unit_is_contained() {
        let results: Vec<_> = run_parallel(
            |x: u32, _ctx: &JobContext<()>| {
                if x == 1 {
                    panic!("boom");
                }
                Ok(Some(x))
            },
            0..3,
            fast(),
        )
        .unwrap()
        .collect();
        let panicked = results
            .iter()
            .filter_map(|r| r.as_ref().err().and_then(RunError::as_job))
            .filter(|e| matches!(&e.kind, JobErrorKind::Panicked(m) if m.contains("boom")))
            .count();
        assert_eq!(panicked, 1);
        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 2);
    }

    #[test]
    fn side_parameter_reaches_every_job() {
        let run = ParallelBuilder::new()
            .unit(|x: u32, ctx: &JobContext<u32>| {
                let offset = *ctx.side_parameter().expect("side parameter");
                Ok(Some(x + offset))
            })
            .side_parameter(1000)
            .options(fast())
            .run(vec![1u32, 2, 3])
            .unwrap();
        let mut out: Vec<u32> = run.map(|r| r.unwrap()).collect();
        out.sort_unstable();
        assert_eq!(out, vec![1001, 1002, 1003]);
    }

    #[test]
    fn empty_input_finishes_immediately() {
        let mut run = run_parallel(
            |x: u32, _ctx: &JobContext<()>| Ok(Some(x)),
            Vec::<u32>::new(),
            fast(),
        )
        .unwrap();
        assert!(run.next().is_none());
        assert_eq!(run.state(), RunState::Closed);
        assert_eq!(run.pool_stats().spawned, 0);
    }

    #[test]
    fn unspawnable_worker_fails_each_job_instead_of_hanging() {
        let opts = ParallelOptions {
            throttle: 1,
            poll_interval_ms: 10,
            // No address space can hold this stack, so every spawn fails.
            worker_stack_size: Some(1 << 60),
            ..Default::default()
        };
        let mut run =
            run_parallel(|x: u32, _ctx: &JobContext<()>| Ok(Some(x)), vec![1u32, 2], opts).unwrap();
        let results: Vec<_> = run.by_ref().collect();
        assert_eq!(results.len(), 2);
        for result in &results {
            let job = result.as_ref().err().and_then(RunError::as_job).expect("job error");
            assert!(matches!(job.kind, JobErrorKind::Spawn(_)), "{}", job);
        }
        let summary = run.summary();
        assert_eq!(summary.dispatched, 2);
        assert_eq!(summary.completed_with_errors, 2);
        assert_eq!(run.state(), RunState::Closed);
        assert_eq!(run.pool_stats().spawned, 0);
    }

    #[test]
    fn retired_job_sees_its_cancel_token() {
        let opts = ParallelOptions {
            job_timeout_secs: 1,
            ..fast()
        };
        let (tx, rx) = std::sync::mpsc::channel();
        let run = run_parallel(
            move |_x: u32, ctx: &JobContext<()>| {
                let token = ctx.cancel_token().clone();
                while !token.is_cancelled() {
                    std::thread::sleep(Duration::from_millis(5));
                }
                let _ = tx.send(ctx.index());
                Ok(None::<u32>)
            },
            vec![7u32],
            opts,
        )
        .unwrap();
        let results: Vec<_> = run.collect();
        assert!(results[0].as_ref().err().and_then(RunError::as_job).is_some_and(|e| e.is_timeout()));
        assert_eq!(rx.recv_timeout(Duration::from_secs(2)), Ok(0));
    }

    #[test]
    fn dropping_a_run_midway_does_not_hang() {
        let mut run = run_parallel(
            |x: u32, _ctx: &JobContext<()>| {
                std::thread::sleep(Duration::from_millis(if x == 0 { 0 } else { 200 }));
                Ok(Some(x))
            },
            0..6,
            fast(),
        )
        .unwrap();
        let first = run.next().expect("one result").unwrap();
        assert_eq!(first, 0);
        drop(run);
    }
}
