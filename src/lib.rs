// src/lib.rs

pub mod args;
pub mod cli;
pub mod compiler;
pub mod errors;
pub mod exec;
pub mod executor;
pub mod logging;
pub mod output;
pub mod platform;
pub mod status;
pub mod taskfile;
pub mod templater;
pub mod watch;

use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::cli::CliArgs;
use crate::errors::{Result, TaskError};
use crate::executor::{Executor, RunFlags};
use crate::output::{stderr_writer, stdout_writer};
use crate::taskfile::{read_taskfile, read_taskvars, validate, Call, Output};

const DEFAULT_TASKFILE: &str = "Taskfile.yml";

const INIT_TASKFILE: &str = r#"version: "2"

tasks:
  default:
    cmds:
      - echo "Hello from taskdag"
"#;

/// High-level entry point used by `main.rs`.
///
/// This wires together:
/// - Taskvars + taskfile loading and validation
/// - positional argument parsing into calls and globals
/// - the executor
/// - one of: init / list / summary / status / run / watch
pub async fn run(args: CliArgs) -> Result<()> {
    let dir = match &args.dir {
        Some(d) => PathBuf::from(d),
        None => PathBuf::from("."),
    };
    let dir = dir.canonicalize().unwrap_or(dir);

    if args.init {
        return init_taskfile(&dir);
    }

    let entry = match &args.taskfile {
        Some(f) => dir.join(f),
        None => dir.join(DEFAULT_TASKFILE),
    };

    let (calls, globals) = args::parse(&args.task_args);
    let calls = if calls.is_empty() {
        vec![Call::new("default")]
    } else {
        calls
    };

    let taskvars = read_taskvars(&dir)?;
    let parent_vars = taskvars.merged(&globals);

    let taskfile = read_taskfile(&entry, &parent_vars)?;
    validate(&taskfile)?;
    debug!(tasks = taskfile.tasks.len(), version = %taskfile.version, "taskfile loaded");

    let output_override = match &args.output {
        Some(mode) => Some(Output::from_str(mode).map_err(|e| TaskError::Other(anyhow::anyhow!(e)))?),
        None => None,
    };

    let flags = RunFlags {
        dry: args.dry,
        force: args.force,
        verbose: args.verbose,
        silent: args.silent,
        parallel: args.parallel,
        color: args.color,
    };

    let executor = Arc::new(Executor::new(
        taskfile,
        dir,
        flags,
        output_override,
        stdout_writer(),
        stderr_writer(),
    ));

    if args.list {
        return list_tasks(&executor);
    }

    let token = CancellationToken::new();

    if args.summary {
        return print_summaries(&executor, &token, &calls).await;
    }
    if args.status {
        return executor.status(&token, &calls).await;
    }

    if args.watch {
        // Surface unknown tasks and template errors before watching starts.
        for call in &calls {
            executor.compiled_task(call, &token).await?;
        }
        return watch::watch_tasks(executor, calls).await;
    }

    {
        let token = token.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                token.cancel();
            }
        });
    }

    executor.run(&token, &calls).await
}

/// Write a starter taskfile, refusing to clobber an existing one.
fn init_taskfile(dir: &std::path::Path) -> Result<()> {
    let path = dir.join(DEFAULT_TASKFILE);
    if path.exists() {
        return Err(TaskError::Other(anyhow::anyhow!(
            "{path:?} already exists"
        )));
    }
    std::fs::write(&path, INIT_TASKFILE)?;
    println!("{} created in the current directory", DEFAULT_TASKFILE);
    Ok(())
}

/// `--list`: every non-internal task with its description.
fn list_tasks(executor: &Executor) -> Result<()> {
    let mut listed = false;
    for (name, task) in &executor.taskfile.tasks {
        if task.internal {
            continue;
        }
        listed = true;
        if task.desc.is_empty() {
            println!("* {name}");
        } else {
            println!("* {name}: \t{}", task.desc);
        }
    }
    if !listed {
        println!("task: No tasks available");
    }
    Ok(())
}

/// `--summary`: compiled description, deps and commands per call.
async fn print_summaries(
    executor: &Executor,
    token: &CancellationToken,
    calls: &[Call],
) -> Result<()> {
    for (i, call) in calls.iter().enumerate() {
        if i > 0 {
            println!();
        }
        let t = executor.compiled_task(call, token).await?;
        println!("task: {}", t.name);
        if !t.desc.is_empty() {
            println!();
            println!("{}", t.desc);
        }
        if !t.deps.is_empty() {
            println!();
            println!("dependencies:");
            for dep in &t.deps {
                println!(" - {}", dep.task);
            }
        }
        if !t.cmds.is_empty() {
            println!();
            println!("commands:");
            for cmd in &t.cmds {
                if cmd.task.is_empty() {
                    println!(" - {}", cmd.command);
                } else {
                    println!(" - task: {}", cmd.task);
                }
            }
        }
    }
    Ok(())
}
