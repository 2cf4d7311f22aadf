// src/executor.rs

//! DAG execution.
//!
//! [`Executor::run`] walks the dependency graph of each call: deps run in
//! parallel on a child cancellation token, cmds run sequentially afterwards.
//! A per-task mutex serializes concurrent invocations of the same task, and
//! run-policy fingerprints give `once` / `when_changed` their exactly-once
//! semantics across the whole run.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::{Arc, Mutex as StdMutex, MutexGuard};

use anyhow::anyhow;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::compiler::Compiler;
use crate::errors::{Result, TaskError};
use crate::exec::{self, RunCommandOptions};
use crate::output::{OutputContext, SharedWriter};
use crate::status::Checker;
use crate::taskfile::{Call, Cmd, Output, Task, Taskfile, RunPolicy, Var, Vars};

/// Ceiling on invocations of one task within a single run. Template
/// expansion can produce task references the static cycle check cannot see;
/// this bounds the damage of such a cycle.
const MAXIMUM_TASK_CALLS: usize = 100;

#[derive(Debug, Clone, Copy, Default)]
pub struct RunFlags {
    pub dry: bool,
    pub force: bool,
    pub verbose: bool,
    pub silent: bool,
    pub parallel: bool,
    pub color: bool,
}

pub struct Executor {
    pub taskfile: Taskfile,
    /// Directory the entry taskfile was read from; task dirs resolve
    /// against it.
    pub dir: PathBuf,
    pub flags: RunFlags,
    output: OutputContext,
    compiler: Compiler,
    call_counts: StdMutex<HashMap<String, usize>>,
    fingerprints: StdMutex<HashSet<String>>,
    task_mutexes: StdMutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl Executor {
    pub fn new(
        taskfile: Taskfile,
        dir: PathBuf,
        flags: RunFlags,
        output_override: Option<Output>,
        stdout: SharedWriter,
        stderr: SharedWriter,
    ) -> Executor {
        let style = output_override.or(taskfile.output).unwrap_or_default();
        let output = OutputContext {
            style,
            color: flags.color,
            stdout,
            stderr,
        };
        Executor {
            compiler: Compiler::new(dir.clone()),
            taskfile,
            dir,
            flags,
            output,
            call_counts: StdMutex::new(HashMap::new()),
            fingerprints: StdMutex::new(HashSet::new()),
            task_mutexes: StdMutex::new(HashMap::new()),
        }
    }

    pub fn compiler(&self) -> &Compiler {
        &self.compiler
    }

    /// Compile the task a call refers to without executing anything.
    pub async fn compiled_task(&self, call: &Call, token: &CancellationToken) -> Result<Task> {
        self.compiler.compiled_task(&self.taskfile, call, token).await
    }

    /// Run the given top-level calls.
    ///
    /// Every call is compiled up-front so unknown task names fail before
    /// anything executes. Calls run sequentially unless `--parallel` is set;
    /// an interactive task forces sequential execution regardless, so the
    /// terminal is never contended.
    pub async fn run(self: &Arc<Self>, token: &CancellationToken, calls: &[Call]) -> Result<()> {
        let mut interactive = false;
        for call in calls {
            let t = self.compiled_task(call, token).await?;
            if t.internal {
                return Err(TaskError::TaskInternal(t.name));
            }
            interactive |= t.interactive;
        }

        if self.flags.parallel && !interactive {
            let mut set = JoinSet::new();
            for call in calls {
                set.spawn(self.run_task(token.clone(), call.clone()));
            }
            // Wait for every peer to settle, then report the first failure.
            let mut first: Option<TaskError> = None;
            while let Some(joined) = set.join_next().await {
                let outcome = joined.unwrap_or_else(|e| Err(TaskError::Other(anyhow!(e))));
                if let Err(err) = outcome {
                    if first.is_none() {
                        first = Some(err);
                    }
                }
            }
            first.map_or(Ok(()), Err)
        } else {
            for call in calls {
                self.run_task(token.clone(), call.clone()).await?;
            }
            Ok(())
        }
    }

    /// Exit-status check for `--status`: error on the first call that is not
    /// up-to-date.
    pub async fn status(&self, token: &CancellationToken, calls: &[Call]) -> Result<()> {
        for call in calls {
            let t = self.compiled_task(call, token).await?;
            let dir = self.dir.join(&t.dir);
            let env = env_pairs(&t);
            if !self.is_task_up_to_date(&t, &dir, &env, token).await? {
                return Err(TaskError::NotUpToDate(t.name));
            }
        }
        Ok(())
    }

    /// Run a single call, recursively walking its deps and task-cmds.
    pub fn run_task(
        self: &Arc<Self>,
        token: CancellationToken,
        call: Call,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send>> {
        let this = Arc::clone(self);
        Box::pin(async move { this.run_task_inner(token, call).await })
    }

    async fn run_task_inner(self: Arc<Self>, token: CancellationToken, call: Call) -> Result<()> {
        if token.is_cancelled() {
            return Err(TaskError::Canceled);
        }

        let t = self.compiled_task(&call, &token).await?;

        {
            let mut counts = lock(&self.call_counts);
            let count = counts.entry(t.name.clone()).or_insert(0);
            *count += 1;
            if *count > MAXIMUM_TASK_CALLS {
                return Err(TaskError::MaximumCallsExceeded {
                    task: t.name.clone(),
                });
            }
        }

        let fingerprint = match t.run {
            RunPolicy::Always => None,
            RunPolicy::Once => Some(t.name.clone()),
            RunPolicy::WhenChanged => Some(call_fingerprint(&t.name, &call.effective_vars())),
        };

        // Serialize concurrent invocations of a deduplicated task: when B
        // and C both depend on A, the second arrival waits here and then
        // sees A's fingerprint, observing the post-execution state. Tasks
        // with `run: always` never dedupe and may legitimately recurse into
        // themselves, so they skip the lock.
        let task_mutex = fingerprint.as_ref().map(|_| {
            let mut mutexes = lock(&self.task_mutexes);
            Arc::clone(
                mutexes
                    .entry(t.name.clone())
                    .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(()))),
            )
        });
        let _guard = match &task_mutex {
            Some(m) => Some(m.lock().await),
            None => None,
        };
        if let Some(fp) = &fingerprint {
            if lock(&self.fingerprints).contains(fp) {
                debug!(task = %t.name, "already ran in this execution; skipping");
                return Ok(());
            }
        }

        let dir = self.dir.join(&t.dir);
        let env = env_pairs(&t);

        for pre in &t.preconditions {
            if !exec::run_check(&pre.sh, &dir, &env, &token).await? {
                return Err(TaskError::PreconditionFailed {
                    task: t.name.clone(),
                    message: pre.msg.clone(),
                });
            }
        }

        let checker = Checker::for_task(&t, &self.dir, self.flags.dry);

        if !self.flags.force && self.is_task_up_to_date(&t, &dir, &env, &token).await? {
            self.log_stderr(&format!(r#"task: Task "{}" is up to date"#, t.name));
            if let Some(fp) = fingerprint {
                lock(&self.fingerprints).insert(fp);
            }
            return Ok(());
        }

        self.run_deps(&t, &call, &token).await?;

        let mut failed: Option<TaskError> = None;
        for cmd in &t.cmds {
            match self.run_cmd(&t, cmd, &dir, &env, &token, &call).await {
                Ok(()) => {}
                Err(err) if err.is_canceled() => return Err(err),
                Err(err) => {
                    if cmd.ignore_error || t.ignore_error {
                        warn!(task = %t.name, error = %err, "command failed (ignored)");
                        continue;
                    }
                    failed = Some(err);
                    break;
                }
            }
        }

        if let Some(err) = failed {
            if let Err(status_err) = checker.on_error() {
                warn!(task = %t.name, error = %status_err, "unable to clear status state");
            }
            return Err(err);
        }

        checker.on_success()?;
        if let Some(fp) = fingerprint {
            lock(&self.fingerprints).insert(fp);
        }
        Ok(())
    }

    /// Run all deps of `t` in parallel on a shared child token; the first
    /// failure cancels the siblings and becomes the task's error.
    async fn run_deps(self: &Arc<Self>, t: &Task, call: &Call, token: &CancellationToken) -> Result<()> {
        if t.deps.is_empty() {
            return Ok(());
        }

        let child = token.child_token();
        let mut set = JoinSet::new();
        for dep in &t.deps {
            let dep_call = Call {
                task: dep.task.clone(),
                vars: dep.vars.clone(),
                parent_vars: call.effective_vars(),
            };
            set.spawn(self.run_task(child.clone(), dep_call));
        }

        let mut first: Option<TaskError> = None;
        while let Some(joined) = set.join_next().await {
            let outcome = joined.unwrap_or_else(|e| Err(TaskError::Other(anyhow!(e))));
            if let Err(err) = outcome {
                match &first {
                    None => {
                        child.cancel();
                        first = Some(err);
                    }
                    // Siblings canceled by the first failure report
                    // Canceled; keep the original cause.
                    Some(existing) if existing.is_canceled() && !err.is_canceled() => {
                        first = Some(err);
                    }
                    Some(_) => {}
                }
            }
        }

        first.map_or(Ok(()), Err)
    }

    async fn run_cmd(
        self: &Arc<Self>,
        t: &Task,
        cmd: &Cmd,
        dir: &Path,
        env: &[(String, String)],
        token: &CancellationToken,
        call: &Call,
    ) -> Result<()> {
        if !cmd.task.is_empty() {
            let sub_call = Call {
                task: cmd.task.clone(),
                vars: cmd.vars.clone(),
                parent_vars: call.effective_vars(),
            };
            return self.run_task(token.clone(), sub_call).await;
        }

        let silent = cmd.silent || t.silent || self.flags.silent;
        if !silent {
            self.log_stderr(&format!("task: {}", cmd.command));
        }
        if self.flags.dry {
            return Ok(());
        }

        let sink = self.output.sink(&t.prefix);
        let opts = RunCommandOptions {
            command: &cmd.command,
            dir,
            env,
            interactive: t.interactive,
        };
        let code = exec::run_command(&opts, sink, token).await?;
        if code != 0 {
            return Err(TaskError::CommandFailed {
                task: t.name.clone(),
                cmd: cmd.command.clone(),
                code,
            });
        }
        Ok(())
    }

    /// Combined verdict over status commands and the source checker: a task
    /// is up-to-date iff every status command exits zero and the checker
    /// agrees, and at least one of the two is configured.
    pub async fn is_task_up_to_date(
        &self,
        t: &Task,
        dir: &Path,
        env: &[(String, String)],
        token: &CancellationToken,
    ) -> Result<bool> {
        let has_status = !t.status.is_empty();
        if has_status {
            for status_cmd in &t.status {
                if !exec::run_check(status_cmd, dir, env, token).await? {
                    debug!(task = %t.name, command = %status_cmd, "status command exited non-zero");
                    return Ok(false);
                }
            }
        }

        let has_sources = !t.sources.is_empty();
        if has_sources {
            let checker = Checker::for_task(t, &self.dir, self.flags.dry);
            if !checker.is_up_to_date()? {
                return Ok(false);
            }
        }

        Ok(has_status || has_sources)
    }

    /// Compile the transitive call tree (deps and task-cmds) of a call.
    /// Each distinct (task, vars) pair is visited once.
    pub async fn collect_call_tree(
        &self,
        call: &Call,
        token: &CancellationToken,
    ) -> Result<Vec<Task>> {
        let mut tasks = Vec::new();
        let mut visited: HashSet<String> = HashSet::new();
        let mut pending = vec![call.clone()];

        while let Some(current) = pending.pop() {
            if !visited.insert(call_fingerprint(&current.task, &current.effective_vars())) {
                continue;
            }
            let t = self.compiled_task(&current, token).await?;
            for dep in &t.deps {
                pending.push(Call {
                    task: dep.task.clone(),
                    vars: dep.vars.clone(),
                    parent_vars: current.effective_vars(),
                });
            }
            for cmd in &t.cmds {
                if !cmd.task.is_empty() {
                    pending.push(Call {
                        task: cmd.task.clone(),
                        vars: cmd.vars.clone(),
                        parent_vars: current.effective_vars(),
                    });
                }
            }
            tasks.push(t);
        }

        Ok(tasks)
    }

    /// Write a log line to the injected stderr writer.
    pub fn log_stderr(&self, message: &str) {
        self.output.write_stderr_line(message);
    }
}

/// Fingerprint a call: task name plus a sorted var set (callers pass the
/// call's effective vars, so inherited values distinguish calls too).
pub fn call_fingerprint(name: &str, vars: &Vars) -> String {
    let mut pairs: Vec<(&String, &Var)> = vars.iter().collect();
    pairs.sort_by_key(|(k, _)| k.as_str());

    let mut out = name.to_string();
    for (k, v) in pairs {
        out.push('\u{1}');
        out.push_str(k);
        out.push('=');
        match v {
            Var::Static(s) => out.push_str(s),
            Var::Sh(cmd) => {
                out.push_str("sh:");
                out.push_str(cmd);
            }
        }
    }
    out
}

fn env_pairs(t: &Task) -> Vec<(String, String)> {
    t.env
        .iter()
        .map(|(k, v)| {
            let value = match v {
                Var::Static(s) => s.clone(),
                Var::Sh(cmd) => cmd.clone(),
            };
            (k.clone(), value)
        })
        .collect()
}

/// Lock an internal mutex, recovering the guard if a holder panicked.
fn lock<T>(mutex: &StdMutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
