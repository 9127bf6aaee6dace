//! Tests for the run subcommand and its option overrides.

use super::parse;
use crate::cli::{Cli, CliCommand, OptionOverrides};
use clap::Parser;
use fanout_core::ParallelOptions;
use std::path::Path;

#[test]
fn cli_parse_run_defaults() {
    match parse(&["fanout", "run", "--", "ping", "-c1", "{}"]) {
        CliCommand::Run {
            input,
            overrides,
            command,
        } => {
            assert!(input.is_none());
            assert!(overrides.throttle.is_none());
            assert!(!overrides.quiet);
            assert_eq!(command, vec!["ping", "-c1", "{}"]);
        }
        _ => panic!("expected Run"),
    }
}

#[test]
fn cli_parse_run_flags() {
    match parse(&[
        "fanout",
        "run",
        "--input",
        "/tmp/hosts",
        "--throttle",
        "4",
        "--timeout",
        "30",
        "--max-queue",
        "8",
        "--poll-interval-ms",
        "50",
        "--no-close-on-timeout",
        "--capture-environment",
        "-q",
        "--log",
        "/tmp/run.csv",
        "--append-log",
        "--",
        "echo",
    ]) {
        CliCommand::Run {
            input,
            overrides,
            command,
        } => {
            assert_eq!(input.as_deref(), Some(Path::new("/tmp/hosts")));
            assert_eq!(overrides.throttle, Some(4));
            assert_eq!(overrides.timeout, Some(30));
            assert_eq!(overrides.max_queue, Some(8));
            assert_eq!(overrides.poll_interval_ms, Some(50));
            assert!(overrides.no_close_on_timeout);
            assert!(overrides.capture_environment);
            assert!(overrides.quiet);
            assert_eq!(
                overrides.log_destination.as_deref(),
                Some(Path::new("/tmp/run.csv"))
            );
            assert!(overrides.append_log);
            assert_eq!(command, vec!["echo"]);
        }
        _ => panic!("expected Run with flags"),
    }
}

#[test]
fn cli_parse_run_requires_command() {
    assert!(Cli::try_parse_from(["fanout", "run"]).is_err());
}

#[test]
fn overrides_replace_only_given_values() {
    let base = ParallelOptions {
        throttle: 10,
        job_timeout_secs: 5,
        ..Default::default()
    };
    let overrides = OptionOverrides {
        throttle: Some(2),
        quiet: true,
        ..Default::default()
    };
    let opts = overrides.apply(base.clone());
    assert_eq!(opts.throttle, 2);
    assert_eq!(opts.job_timeout_secs, 5);
    assert!(opts.quiet);
    assert_eq!(opts.max_queue, base.max_queue);
    assert_eq!(opts.object_name_label, base.object_name_label);
}

#[test]
fn empty_overrides_keep_config() {
    let base = ParallelOptions::default();
    assert_eq!(OptionOverrides::default().apply(base.clone()), base);
}
