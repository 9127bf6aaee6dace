//! Bounded-concurrency execution of a unit of work over a stream of items.
//!
//! Items are pulled lazily from the input, each is run on a pooled worker
//! thread (at most `throttle` at a time), and outputs and per-job errors are
//! yielded as jobs finish. See [`scheduler`] for the run lifecycle.

pub mod config;
pub mod control;
pub mod error;
pub mod logging;
pub mod pool;
pub mod report;
pub mod scheduler;

pub use config::{FanoutConfig, ParallelOptions};
pub use control::CancelToken;
pub use error::{ConfigError, JobError, JobErrorKind, RunAborted, RunError, StartError};
pub use pool::{unit_fn, EnvSnapshot, JobContext, UnitFn};
pub use report::ProgressUpdate;
pub use scheduler::{run_parallel, JobStatus, ParallelBuilder, ParallelRun, RunState, RunSummary};
