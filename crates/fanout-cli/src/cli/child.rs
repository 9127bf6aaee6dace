//! Unit of work for `fanout run`: one child process per item.

use anyhow::{bail, Context, Result};
use fanout_core::JobContext;
use std::io::Read;
use std::process::{Command, Stdio};
use std::thread;
use std::time::Duration;

const PLACEHOLDER: &str = "{}";
const WAIT_STEP: Duration = Duration::from_millis(20);

/// Substitute `item` for every `{}` in `template`; append it if there is none.
pub fn expand_args(template: &[String], item: &str) -> Vec<String> {
    if template.iter().any(|a| a.contains(PLACEHOLDER)) {
        template
            .iter()
            .map(|a| a.replace(PLACEHOLDER, item))
            .collect()
    } else {
        let mut args = template.to_vec();
        args.push(item.to_string());
        args
    }
}

/// Run the command template (the side parameter) for `item` and return its
/// stdout lines. The child is killed if the job is cancelled.
pub fn run_command(item: String, ctx: &JobContext<Vec<String>>) -> Result<Vec<String>> {
    let template = ctx
        .side_parameter()
        .context("no command template for job")?;
    let argv = expand_args(template, &item);
    let Some((program, args)) = argv.split_first() else {
        bail!("empty command");
    };

    let mut cmd = Command::new(program);
    cmd.args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::inherit());
    if let Some(env) = ctx.environment() {
        cmd.env_clear().envs(env.iter());
    }
    let mut child = cmd
        .spawn()
        .with_context(|| format!("spawn {}", program))?;
    tracing::debug!(job = ctx.index(), pid = child.id(), "spawned {}", program);

    // Drain stdout on a side thread so a chatty child cannot fill the pipe.
    let mut stdout = child.stdout.take().context("child stdout not captured")?;
    let reader = thread::spawn(move || {
        let mut buf = String::new();
        stdout.read_to_string(&mut buf).map(|_| buf)
    });

    let status = loop {
        if let Some(status) = child.try_wait().context("wait for child")? {
            break status;
        }
        if ctx.is_cancelled() {
            tracing::debug!(job = ctx.index(), pid = child.id(), "killing cancelled child");
            let _ = child.kill();
            let _ = child.wait();
            bail!("cancelled");
        }
        thread::sleep(WAIT_STEP);
    };

    let output = match reader.join() {
        Ok(read) => read.context("read child stdout")?,
        Err(_) => bail!("stdout reader panicked"),
    };
    if !status.success() {
        bail!("{} exited with {}", program, status);
    }
    Ok(output.lines().map(str::to_string).collect())
}
