//! CLI for the fanout parallel job engine.

mod child;
mod commands;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use clap_complete::Shell;
use fanout_core::config;
use fanout_core::ParallelOptions;
use std::path::PathBuf;

use commands::{run_batch, run_completions, run_show_config};

/// Top-level CLI for the fanout engine.
#[derive(Debug, Parser)]
#[command(name = "fanout")]
#[command(about = "fanout: run a command once per input line, in parallel", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: CliCommand,
}

#[derive(Debug, Subcommand)]
pub enum CliCommand {
    /// Run a program once per input item with bounded concurrency.
    Run {
        /// Read items from this file instead of stdin (one per line).
        #[arg(long, short = 'i', value_name = "FILE")]
        input: Option<PathBuf>,

        #[command(flatten)]
        overrides: OptionOverrides,

        /// Program and arguments; `{}` is replaced by the item (appended if absent).
        #[arg(last = true, required = true, value_name = "COMMAND")]
        command: Vec<String>,
    },

    /// Show the config file path and effective settings.
    Config,

    /// Print a shell completion script.
    Completions {
        /// Target shell.
        #[arg(value_enum)]
        shell: Shell,
    },
}

/// Flags that override `[parallel]` in the config file.
#[derive(Debug, Default, Args)]
pub struct OptionOverrides {
    /// Maximum number of jobs running at once.
    #[arg(long, short = 't', value_name = "N")]
    pub throttle: Option<usize>,

    /// Delay between drain rounds when nothing finished.
    #[arg(long, value_name = "MS")]
    pub poll_interval_ms: Option<u64>,

    /// Per-job timeout in seconds (0 disables).
    #[arg(long, value_name = "SECS")]
    pub timeout: Option<u64>,

    /// Maximum dispatched-but-undrained jobs before dispatch pauses.
    #[arg(long, value_name = "N")]
    pub max_queue: Option<usize>,

    /// Leave timed-out jobs running instead of killing them.
    #[arg(long)]
    pub no_close_on_timeout: bool,

    /// Run jobs with a snapshot of this process's environment.
    #[arg(long)]
    pub capture_environment: bool,

    /// Suppress progress output.
    #[arg(long, short = 'q')]
    pub quiet: bool,

    /// Write a per-job audit log (CSV) to this path.
    #[arg(long = "log", value_name = "PATH")]
    pub log_destination: Option<PathBuf>,

    /// Append to the audit log instead of replacing it.
    #[arg(long)]
    pub append_log: bool,
}

impl OptionOverrides {
    /// Layer these flags over options loaded from the config file.
    pub fn apply(&self, mut opts: ParallelOptions) -> ParallelOptions {
        if let Some(n) = self.throttle {
            opts.throttle = n;
        }
        if let Some(ms) = self.poll_interval_ms {
            opts.poll_interval_ms = ms;
        }
        if let Some(secs) = self.timeout {
            opts.job_timeout_secs = secs;
        }
        if self.max_queue.is_some() {
            opts.max_queue = self.max_queue;
        }
        opts.no_close_on_timeout |= self.no_close_on_timeout;
        opts.capture_environment |= self.capture_environment;
        opts.quiet |= self.quiet;
        if let Some(path) = &self.log_destination {
            opts.log_destination = Some(path.clone());
        }
        opts.append_log |= self.append_log;
        opts
    }
}

impl CliCommand {
    pub async fn run_from_args() -> Result<()> {
        let cli = Cli::parse();

        match cli.command {
            CliCommand::Run {
                input,
                overrides,
                command,
            } => {
                let cfg = config::load_or_init()?;
                tracing::debug!("loaded config: {:?}", cfg);
                let opts = overrides.apply(cfg.parallel);
                run_batch(opts, input.as_deref(), command).await?;
            }
            CliCommand::Config => run_show_config()?,
            CliCommand::Completions { shell } => run_completions(shell),
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests;
