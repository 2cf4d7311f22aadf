// src/compiler.rs

//! Task compilation: variable resolution and template expansion.
//!
//! Resolution order (later layers override earlier ones): process
//! environment < taskfile `env:` < the vars snapshot attached to the task at
//! load time < inherited parent-call vars < task `vars:` < call-site vars.
//! After the variable map is resolved, every string attribute of the task is
//! expanded `expansions` times, so variables whose values themselves contain
//! templates settle to a fixed point.
//!
//! Dynamic `{sh: ...}` variables are executed in the task's directory with
//! the accumulated environment; results are cached per `(command, dir)` for
//! the lifetime of the executor. The watcher clears the cache between reruns
//! when `reset-vars-on-rerun` is set.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::errors::{Result, TaskError};
use crate::exec;
use crate::taskfile::{Call, Task, Taskfile, Var, Vars};
use crate::templater::Templater;

pub struct Compiler {
    entry_dir: PathBuf,
    templater: Templater,
    /// Dynamic variable results keyed on `(command, dir)`. The lock is held
    /// across evaluation so a reused dynamic var runs exactly once.
    dynamic_cache: Mutex<HashMap<(String, PathBuf), String>>,
}

impl Compiler {
    pub fn new(entry_dir: PathBuf) -> Compiler {
        Compiler {
            entry_dir,
            templater: Templater::new(),
            dynamic_cache: Mutex::new(HashMap::new()),
        }
    }

    /// Drop all cached dynamic variable results.
    pub async fn reset(&self) {
        self.dynamic_cache.lock().await.clear();
    }

    /// Compile the task named by `call`: resolve its variable environment,
    /// then expand every string attribute. Compiling twice with the same
    /// inputs yields identical results.
    pub async fn compiled_task(
        &self,
        taskfile: &Taskfile,
        call: &Call,
        token: &CancellationToken,
    ) -> Result<Task> {
        let task = taskfile
            .tasks
            .get(&call.task)
            .ok_or_else(|| TaskError::TaskNotFound(call.task.clone()))?;

        let vars = self.resolve_variables(taskfile, task, call, token).await?;

        let n = taskfile.expansions;
        let mut t = task.clone();

        t.dir = self.expand_attr(&t.name, "dir", &task.dir, &vars, n)?;
        t.desc = self.expand_attr(&t.name, "desc", &task.desc, &vars, n)?;
        t.prefix = self.expand_attr(&t.name, "prefix", &task.prefix, &vars, n)?;
        if t.prefix.is_empty() {
            t.prefix = t.name.clone();
        }

        for (field, list) in [
            ("sources", &mut t.sources),
            ("generates", &mut t.generates),
            ("status", &mut t.status),
        ] {
            for item in list.iter_mut() {
                *item = self.expand_attr(&task.name, field, item, &vars, n)?;
            }
        }

        for pre in &mut t.preconditions {
            pre.sh = self.expand_attr(&task.name, "preconditions", &pre.sh, &vars, n)?;
            pre.msg = self.expand_attr(&task.name, "preconditions", &pre.msg, &vars, n)?;
        }

        for cmd in &mut t.cmds {
            cmd.command = self.expand_attr(&task.name, "cmds", &cmd.command, &vars, n)?;
            cmd.task = self.expand_attr(&task.name, "cmds", &cmd.task, &vars, n)?;
            cmd.vars = self.expand_var_templates(&task.name, &cmd.vars, &vars, n)?;
        }

        for dep in &mut t.deps {
            dep.task = self.expand_attr(&task.name, "deps", &dep.task, &vars, n)?;
            dep.vars = self.expand_var_templates(&task.name, &dep.vars, &vars, n)?;
        }

        // The compiled env is the taskfile env overlaid with the task's own,
        // fully resolved to static values.
        let mut env = Vars::new();
        for (name, var) in taskfile.env.merged(&task.env).iter() {
            let value = self
                .resolve_var(&task.name, var, &vars, &t.dir, token)
                .await?;
            env.insert(name.clone(), Var::Static(value));
        }
        t.env = env;

        // Expose the resolved variables on the compiled task so callers can
        // inspect them without re-running resolution.
        t.vars = vars
            .iter()
            .map(|(k, v)| (k.clone(), Var::Static(v.clone())))
            .collect();

        Ok(t)
    }

    /// Layer the variable environment for a call and resolve every value to
    /// a static string.
    async fn resolve_variables(
        &self,
        taskfile: &Taskfile,
        task: &Task,
        call: &Call,
        token: &CancellationToken,
    ) -> Result<BTreeMap<String, String>> {
        let mut acc: BTreeMap<String, String> = std::env::vars().collect();

        let layers = [
            &taskfile.env,
            &task.taskfile_vars,
            &call.parent_vars,
            &task.vars,
            &call.vars,
        ];
        for layer in layers {
            for (name, var) in layer.iter() {
                let dir = self.expand_attr(&task.name, "dir", &task.dir, &acc, 1)?;
                let value = self.resolve_var(&task.name, var, &acc, &dir, token).await?;
                acc.insert(name.clone(), value);
            }
        }

        Ok(acc)
    }

    async fn resolve_var(
        &self,
        task_name: &str,
        var: &Var,
        acc: &BTreeMap<String, String>,
        dir: &str,
        token: &CancellationToken,
    ) -> Result<String> {
        match var {
            Var::Static(s) => self.expand_attr(task_name, "vars", s, acc, 1),
            Var::Sh(cmd) => {
                let cmd = self.expand_attr(task_name, "vars", cmd, acc, 1)?;
                let dir = self.entry_dir.join(dir);
                self.handle_dynamic_var(&cmd, &dir, acc, token).await
            }
        }
    }

    /// Evaluate a dynamic variable, caching on `(command, dir)`.
    async fn handle_dynamic_var(
        &self,
        cmd: &str,
        dir: &Path,
        acc: &BTreeMap<String, String>,
        token: &CancellationToken,
    ) -> Result<String> {
        let key = (cmd.to_string(), dir.to_path_buf());

        let mut cache = self.dynamic_cache.lock().await;
        if let Some(value) = cache.get(&key) {
            return Ok(value.clone());
        }

        let env: Vec<(String, String)> =
            acc.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
        let stdout = exec::capture_stdout(cmd, dir, &env, token).await?;
        let value = stdout
            .strip_suffix('\n')
            .map(|s| s.strip_suffix('\r').unwrap_or(s))
            .unwrap_or(&stdout)
            .to_string();

        debug!(command = %cmd, result = %value, "resolved dynamic variable");
        cache.insert(key, value.clone());
        Ok(value)
    }

    /// Expand `template` up to `n` times, stopping early at a fixed point.
    fn expand_attr(
        &self,
        task_name: &str,
        attribute: &str,
        template: &str,
        vars: &BTreeMap<String, String>,
        n: usize,
    ) -> Result<String> {
        let mut current = template.to_string();
        for _ in 0..n.max(1) {
            let next = self
                .templater
                .expand(&current, vars)
                .map_err(|source| TaskError::Template {
                    task: task_name.to_string(),
                    attribute: attribute.to_string(),
                    source,
                })?;
            if next == current {
                break;
            }
            current = next;
        }
        Ok(current)
    }

    /// Expand the template parts of a nested var map (dep / task-cmd vars)
    /// in the parent's context. Dynamic commands are expanded but not
    /// evaluated; that happens when the sub-call resolves its own layers.
    fn expand_var_templates(
        &self,
        task_name: &str,
        vars: &Vars,
        context: &BTreeMap<String, String>,
        n: usize,
    ) -> Result<Vars> {
        let mut out = Vars::new();
        for (name, var) in vars.iter() {
            let expanded = match var {
                Var::Static(s) => {
                    Var::Static(self.expand_attr(task_name, "vars", s, context, n)?)
                }
                Var::Sh(cmd) => Var::Sh(self.expand_attr(task_name, "vars", cmd, context, n)?),
            };
            out.insert(name.clone(), expanded);
        }
        Ok(out)
    }
}
