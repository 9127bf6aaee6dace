//! One worker thread: runs one boxed invocation at a time and replies on the job's channel.

use crossbeam_channel::{unbounded, Receiver, Sender};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;

use crate::control::CancelToken;

use super::context::EnvSnapshot;
use super::handle::JobResult;

/// Type-erased call of the unit of work with its item and context bound.
pub(crate) type Invocation<O> = Box<dyn FnOnce() -> anyhow::Result<Vec<O>> + Send + 'static>;

pub(crate) struct Task<O> {
    pub(crate) invocation: Invocation<O>,
    pub(crate) reply: Sender<JobResult<O>>,
}

/// Exclusive handle to a worker thread. Owned by the pool while idle and by a
/// job record while busy; moving it is what keeps a worker to one job at a time.
pub struct Worker<O> {
    id: usize,
    tx: Option<Sender<Task<O>>>,
    thread: Option<thread::JoinHandle<()>>,
    env: Option<Arc<EnvSnapshot>>,
    job_cancel: Option<CancelToken>,
}

impl<O> std::fmt::Debug for Worker<O> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Worker")
            .field("id", &self.id)
            .field("alive", &self.is_alive())
            .field("busy", &self.job_cancel.is_some())
            .finish()
    }
}

impl<O: Send + 'static> Worker<O> {
    pub(crate) fn spawn(
        id: usize,
        env: Option<Arc<EnvSnapshot>>,
        stack_size: Option<usize>,
    ) -> std::io::Result<Self> {
        let (tx, rx) = unbounded::<Task<O>>();
        let mut builder = thread::Builder::new().name(format!("fanout-worker-{}", id));
        if let Some(bytes) = stack_size {
            builder = builder.stack_size(bytes);
        }
        let thread = builder.spawn(move || worker_loop(id, rx))?;
        tracing::debug!(worker = id, "spawned worker");
        Ok(Self {
            id,
            tx: Some(tx),
            thread: Some(thread),
            env,
            job_cancel: None,
        })
    }
}

impl<O> Worker<O> {
    pub fn id(&self) -> usize {
        self.id
    }

    pub(crate) fn env(&self) -> Option<Arc<EnvSnapshot>> {
        self.env.clone()
    }

    /// Thread still running and accepting tasks.
    pub(crate) fn is_alive(&self) -> bool {
        self.tx.is_some() && self.thread.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Hand a task to the thread. On failure the worker is marked dead and the
    /// task (with its reply sender) is dropped, so the job's handle reports `Lost`.
    pub(crate) fn dispatch(&mut self, task: Task<O>, cancel: CancelToken) -> bool {
        self.job_cancel = Some(cancel);
        let sent = match self.tx.as_ref() {
            Some(tx) => tx.send(task).is_ok(),
            None => false,
        };
        if !sent {
            tracing::warn!(worker = self.id, "worker thread is gone; job lost");
            self.tx = None;
        }
        sent
    }

    /// Job finished; forget its cancel token.
    pub(crate) fn clear_job(&mut self) {
        self.job_cancel = None;
    }

    /// Raise the current job's cancel flag, close the command channel and detach
    /// the thread. It exits once the current invocation returns.
    pub(crate) fn close(&mut self) {
        if let Some(cancel) = self.job_cancel.take() {
            cancel.cancel();
        }
        self.tx = None;
        self.thread = None;
    }

    /// Close the command channel and wait for an idle thread to exit.
    pub(crate) fn close_and_join(mut self) {
        self.tx = None;
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                tracing::warn!(worker = self.id, "worker thread panicked during shutdown");
            }
        }
    }
}

fn worker_loop<O>(id: usize, rx: Receiver<Task<O>>) {
    while let Ok(task) = rx.recv() {
        let Task { invocation, reply } = task;
        let result = match panic::catch_unwind(AssertUnwindSafe(invocation)) {
            Ok(Ok(output)) => JobResult::Output(output),
            Ok(Err(e)) => JobResult::Failed(e),
            Err(payload) => JobResult::Panicked(panic_message(payload.as_ref())),
        };
        // The receiver is gone if the job was abandoned after a timeout.
        let _ = reply.send(result);
    }
    tracing::trace!(worker = id, "worker exiting");
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
