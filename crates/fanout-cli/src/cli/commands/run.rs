//! `fanout run` – run a command once per input item.

use anyhow::{bail, Context, Result};
use fanout_core::{
    CancelToken, ParallelBuilder, ParallelOptions, ProgressUpdate, RunError, RunSummary,
};
use std::io::{BufRead, BufReader, Read};
use std::path::Path;
use std::time::Instant;

use crate::cli::child;

const PROGRESS_INTERVAL_MS: u128 = 500;

/// What a batch produced, for the exit status.
#[derive(Debug, Default)]
pub struct BatchOutcome {
    pub summary: RunSummary,
    pub failures: usize,
    pub aborted: bool,
}

/// Non-empty, trimmed lines of `reader`.
pub fn read_items<R: Read>(reader: R) -> Result<Vec<String>> {
    let mut items = Vec::new();
    for line in BufReader::new(reader).lines() {
        let line = line.context("read input")?;
        let trimmed = line.trim();
        if !trimmed.is_empty() {
            items.push(trimmed.to_string());
        }
    }
    Ok(items)
}

pub async fn run_batch(
    opts: ParallelOptions,
    input: Option<&Path>,
    command: Vec<String>,
) -> Result<()> {
    let items = match input {
        Some(path) => {
            let file = std::fs::File::open(path)
                .with_context(|| format!("open input {}", path.display()))?;
            read_items(file)?
        }
        None => read_items(std::io::stdin().lock())?,
    };
    if items.is_empty() {
        eprintln!("No input items.");
        return Ok(());
    }
    tracing::info!(items = items.len(), throttle = opts.throttle, "starting batch");

    let cancel = CancelToken::new();
    let ctrl_c = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                eprintln!("\ninterrupted; stopping jobs");
                cancel.cancel();
            }
        })
    };

    let (progress_tx, mut progress_rx) = tokio::sync::mpsc::channel::<ProgressUpdate>(16);
    let progress_handle = tokio::spawn(async move {
        let mut last_print: Option<Instant> = None;
        while let Some(update) = progress_rx.recv().await {
            let now = Instant::now();
            let due = last_print
                .map(|t| now.duration_since(t).as_millis() >= PROGRESS_INTERVAL_MS)
                .unwrap_or(true);
            if due || update.is_done() {
                let pct = update
                    .percent()
                    .map(|p| format!("{:.0}%", p))
                    .unwrap_or_else(|| "?".to_string());
                eprint!(
                    "\r  {}: {} ({})  ",
                    update.activity, update.current_operation, pct
                );
                last_print = Some(now);
            }
        }
        if last_print.is_some() {
            eprintln!();
        }
    });

    let outcome = tokio::task::spawn_blocking(move || -> Result<BatchOutcome> {
        let mut run = ParallelBuilder::new()
            .unit(child::run_command)
            .side_parameter(command)
            .options(opts)
            .progress(progress_tx)
            .cancel_token(cancel)
            .run(items)?;
        let mut outcome = BatchOutcome::default();
        for result in run.by_ref() {
            match result {
                Ok(line) => println!("{}", line),
                Err(RunError::Aborted(aborted)) => {
                    eprintln!("{}", aborted);
                    outcome.aborted = true;
                }
                Err(RunError::Job(e)) => {
                    eprintln!("{}", e);
                    outcome.failures += 1;
                }
            }
        }
        outcome.summary = run.summary();
        Ok(outcome)
    })
    .await
    .context("batch task panicked")??;

    ctrl_c.abort();
    let _ = progress_handle.await;

    let summary = outcome.summary;
    tracing::info!(
        dispatched = summary.dispatched,
        completed = summary.completed,
        errors = summary.completed_with_errors,
        timed_out = summary.timed_out,
        "batch finished"
    );
    if outcome.aborted {
        bail!("batch aborted");
    }
    if outcome.failures > 0 || summary.failed() > 0 {
        bail!(
            "{} of {} job(s) failed ({} timed out)",
            summary.failed(),
            summary.dispatched,
            summary.timed_out
        );
    }
    Ok(())
}
