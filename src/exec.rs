// src/exec.rs

//! Shell execution layer.
//!
//! Every command in a taskfile goes through here: task cmds (streamed
//! through an output sink), status commands and preconditions (exit code
//! only), and dynamic variables (captured stdout). Cancellation is
//! cooperative via a [`CancellationToken`]; a canceled command kills its
//! child process and surfaces [`TaskError::Canceled`].

use std::path::Path;
use std::process::Stdio;

use anyhow::Context as _;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::errors::{Result, TaskError};
use crate::output::CmdSink;

pub struct RunCommandOptions<'a> {
    pub command: &'a str,
    pub dir: &'a Path,
    pub env: &'a [(String, String)],
    /// Inherit the parent's stdio instead of piping, so the child owns the
    /// terminal.
    pub interactive: bool,
}

/// Build a shell command appropriate for the platform.
fn shell_command(command: &str, dir: &Path, env: &[(String, String)]) -> Command {
    let mut cmd = if cfg!(windows) {
        let mut c = Command::new("cmd");
        c.arg("/C").arg(command);
        c
    } else {
        let mut c = Command::new("sh");
        c.arg("-c").arg(command);
        c
    };
    cmd.current_dir(dir);
    cmd.envs(env.iter().map(|(k, v)| (k.as_str(), v.as_str())));
    cmd.kill_on_drop(true);
    cmd
}

/// Run a command, streaming its output through `sink`, and return the exit
/// code. The sink is always finished, so grouped output is flushed even for
/// failing commands.
pub async fn run_command(
    opts: &RunCommandOptions<'_>,
    sink: CmdSink,
    token: &CancellationToken,
) -> Result<i32> {
    let mut cmd = shell_command(opts.command, opts.dir, opts.env);

    if opts.interactive {
        cmd.stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit());
    } else {
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
    }

    let mut child = cmd
        .spawn()
        .with_context(|| format!("spawning process for command {:?}", opts.command))
        .map_err(TaskError::Other)?;

    // Line channel from both stream readers into a single writer task, so
    // the sink sees lines in arrival order without locking in the readers.
    let (line_tx, mut line_rx) = mpsc::unbounded_channel::<(bool, String)>();

    if let Some(stdout) = child.stdout.take() {
        spawn_line_reader(stdout, false, line_tx.clone());
    }
    if let Some(stderr) = child.stderr.take() {
        spawn_line_reader(stderr, true, line_tx.clone());
    }
    drop(line_tx);

    let writer = tokio::spawn(async move {
        let mut sink = sink;
        while let Some((is_err, line)) = line_rx.recv().await {
            sink.line(is_err, &line);
        }
        sink.finish();
    });

    let status = tokio::select! {
        status = child.wait() => {
            status.with_context(|| format!("waiting for command {:?}", opts.command))
                .map_err(TaskError::Other)?
        }
        _ = token.cancelled() => {
            debug!(command = %opts.command, "cancellation requested; killing process");
            let _ = child.kill().await;
            writer.abort();
            return Err(TaskError::Canceled);
        }
    };

    // Drain remaining output before returning.
    let _ = writer.await;

    Ok(status.code().unwrap_or(-1))
}

fn spawn_line_reader(
    stream: impl tokio::io::AsyncRead + Unpin + Send + 'static,
    is_err: bool,
    tx: mpsc::UnboundedSender<(bool, String)>,
) {
    tokio::spawn(async move {
        let reader = BufReader::new(stream);
        let mut lines = reader.lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if tx.send((is_err, line)).is_err() {
                break;
            }
        }
    });
}

/// Run a command with discarded output and report whether it exited zero.
/// Used for status commands and preconditions.
pub async fn run_check(
    command: &str,
    dir: &Path,
    env: &[(String, String)],
    token: &CancellationToken,
) -> Result<bool> {
    let mut cmd = shell_command(command, dir, env);
    cmd.stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null());

    let status = tokio::select! {
        status = cmd.status() => {
            status.with_context(|| format!("running check command {:?}", command))
                .map_err(TaskError::Other)?
        }
        _ = token.cancelled() => return Err(TaskError::Canceled),
    };

    Ok(status.success())
}

/// Run a command and capture its stdout. Non-zero exit is an error carrying
/// a snippet of stderr. Used for dynamic variables.
pub async fn capture_stdout(
    command: &str,
    dir: &Path,
    env: &[(String, String)],
    token: &CancellationToken,
) -> Result<String> {
    let mut cmd = shell_command(command, dir, env);
    cmd.stdin(Stdio::null());

    let output = tokio::select! {
        output = cmd.output() => {
            output.with_context(|| format!("running command {:?}", command))
                .map_err(TaskError::Other)?
        }
        _ = token.cancelled() => return Err(TaskError::Canceled),
    };

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(TaskError::DynamicVar {
            cmd: command.to_string(),
            message: format!(
                "exit status {}: {}",
                output.status.code().unwrap_or(-1),
                stderr.trim()
            ),
        });
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}
