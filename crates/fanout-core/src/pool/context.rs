//! What a unit of work can see about the job it is running.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::control::CancelToken;

/// Snapshot of the process environment taken when the first worker of a pool
/// is spawned. Shared by every worker and job of that pool.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvSnapshot {
    vars: BTreeMap<String, String>,
}

impl EnvSnapshot {
    /// Capture the current process environment. Variables whose name or value
    /// is not valid Unicode are skipped.
    pub fn capture() -> Self {
        let vars = std::env::vars_os()
            .filter_map(|(k, v)| Some((k.into_string().ok()?, v.into_string().ok()?)))
            .collect();
        Self { vars }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.vars.get(name).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.vars.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }
}

impl FromIterator<(String, String)> for EnvSnapshot {
    fn from_iter<T: IntoIterator<Item = (String, String)>>(iter: T) -> Self {
        Self {
            vars: iter.into_iter().collect(),
        }
    }
}

/// Per-invocation context handed to the unit of work.
#[derive(Debug)]
pub struct JobContext<S> {
    pub(crate) index: usize,
    pub(crate) worker_id: usize,
    pub(crate) side: Option<Arc<S>>,
    pub(crate) env: Option<Arc<EnvSnapshot>>,
    pub(crate) cancel: CancelToken,
}

impl<S> JobContext<S> {
    /// Position of the work item in the input sequence.
    pub fn index(&self) -> usize {
        self.index
    }

    /// Id of the worker thread running this job.
    pub fn worker_id(&self) -> usize {
        self.worker_id
    }

    /// The value shared by all jobs of the run, if one was set.
    pub fn side_parameter(&self) -> Option<&S> {
        self.side.as_deref()
    }

    /// Captured environment, when the run was started with `capture_environment`.
    pub fn environment(&self) -> Option<&EnvSnapshot> {
        self.env.as_deref()
    }

    /// True once the job has timed out and its worker was retired, or the run was aborted.
    /// Long-running units should check this and return early.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Token for handing to code that polls cancellation on its own.
    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }
}
