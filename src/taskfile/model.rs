// src/taskfile/model.rs

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::de::{Deserializer, Error as DeError};
use serde::Deserialize;

use crate::errors::TaskError;

/// A variable value: either a literal string or a shell snippet whose
/// trimmed standard output becomes the value at compile time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Var {
    Static(String),
    Sh(String),
}

impl Var {
    pub fn r#static(s: impl Into<String>) -> Var {
        Var::Static(s.into())
    }
}

impl<'de> Deserialize<'de> for Var {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Sh { sh: String },
            Scalar(serde_yaml::Value),
        }

        match Repr::deserialize(deserializer)? {
            Repr::Sh { sh } => Ok(Var::Sh(sh)),
            Repr::Scalar(v) => Ok(Var::Static(scalar_to_string(&v).ok_or_else(|| {
                D::Error::custom("variable must be a scalar or {sh: command}")
            })?)),
        }
    }
}

fn scalar_to_string(v: &serde_yaml::Value) -> Option<String> {
    match v {
        serde_yaml::Value::String(s) => Some(s.clone()),
        serde_yaml::Value::Bool(b) => Some(b.to_string()),
        serde_yaml::Value::Number(n) => Some(n.to_string()),
        serde_yaml::Value::Null => Some(String::new()),
        _ => None,
    }
}

/// A name → [`Var`] mapping that preserves declaration order, so a variable
/// can reference one declared above it.
///
/// Later layers override earlier ones; [`Vars::merged`] implements the
/// "right side wins" rule used everywhere a layer is stacked on another.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Vars(Vec<(String, Var)>);

impl Vars {
    pub fn new() -> Vars {
        Vars(Vec::new())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&Var> {
        self.0.iter().find(|(k, _)| k == name).map(|(_, v)| v)
    }

    /// Insert or overwrite, keeping the original position on overwrite.
    pub fn insert(&mut self, name: impl Into<String>, var: Var) {
        let name = name.into();
        match self.0.iter_mut().find(|(k, _)| *k == name) {
            Some(entry) => entry.1 = var,
            None => self.0.push((name, var)),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Var)> {
        self.0.iter().map(|(k, v)| (k, v))
    }

    /// Returns a copy of `self` with `other` layered on top (other wins).
    pub fn merged(&self, other: &Vars) -> Vars {
        let mut out = self.clone();
        for (k, v) in other.iter() {
            out.insert(k.clone(), v.clone());
        }
        out
    }
}

impl FromIterator<(String, Var)> for Vars {
    fn from_iter<T: IntoIterator<Item = (String, Var)>>(iter: T) -> Self {
        let mut out = Vars::new();
        for (k, v) in iter {
            out.insert(k, v);
        }
        out
    }
}

impl<'de> Deserialize<'de> for Vars {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        // Deserialize through a YAML mapping to keep declaration order.
        let mapping = serde_yaml::Mapping::deserialize(deserializer)?;
        let mut out = Vars::new();
        for (key, value) in mapping {
            let name = key
                .as_str()
                .ok_or_else(|| D::Error::custom("variable names must be strings"))?
                .to_string();
            let var: Var = serde_yaml::from_value(value).map_err(D::Error::custom)?;
            out.insert(name, var);
        }
        Ok(out)
    }
}

/// A request to run one task with optional per-invocation variables.
///
/// `vars` are the variables declared at this call site (a `deps:` entry, a
/// task-cmd, or the CLI). `parent_vars` are call vars inherited from the
/// calling task; they resolve below the target task's own `vars:` block,
/// while `vars` resolve above it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Call {
    pub task: String,
    pub vars: Vars,
    pub parent_vars: Vars,
}

impl Call {
    pub fn new(task: impl Into<String>) -> Call {
        Call {
            task: task.into(),
            vars: Vars::new(),
            parent_vars: Vars::new(),
        }
    }

    /// All vars visible at this call site: inherited ones with the call's
    /// own declarations layered on top. This is what flows down to
    /// sub-calls and what fingerprints are computed over.
    pub fn effective_vars(&self) -> Vars {
        self.parent_vars.merged(&self.vars)
    }
}

/// One entry of a task's `cmds:` list.
///
/// Exactly one of `command` / `task` is non-empty: a command entry runs a
/// shell string, a task entry is a recursive sub-call executed in place.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Cmd {
    pub command: String,
    pub task: String,
    pub vars: Vars,
    pub silent: bool,
    pub ignore_error: bool,
}

impl<'de> Deserialize<'de> for Cmd {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Plain(String),
            Full {
                #[serde(default)]
                cmd: String,
                #[serde(default)]
                task: String,
                #[serde(default)]
                vars: Vars,
                #[serde(default)]
                silent: bool,
                #[serde(default)]
                ignore_error: bool,
            },
        }

        match Repr::deserialize(deserializer)? {
            Repr::Plain(command) => Ok(Cmd {
                command,
                ..Cmd::default()
            }),
            Repr::Full {
                cmd,
                task,
                vars,
                silent,
                ignore_error,
            } => {
                if cmd.is_empty() == task.is_empty() {
                    return Err(D::Error::custom(
                        "a cmds entry needs exactly one of `cmd` or `task`",
                    ));
                }
                Ok(Cmd {
                    command: cmd,
                    task,
                    vars,
                    silent,
                    ignore_error,
                })
            }
        }
    }
}

/// One entry of a task's `deps:` list. Deps run in parallel before any cmd.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Dep {
    pub task: String,
    pub vars: Vars,
}

impl<'de> Deserialize<'de> for Dep {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Plain(String),
            Full {
                task: String,
                #[serde(default)]
                vars: Vars,
            },
        }

        Ok(match Repr::deserialize(deserializer)? {
            Repr::Plain(task) => Dep {
                task,
                vars: Vars::new(),
            },
            Repr::Full { task, vars } => Dep { task, vars },
        })
    }
}

/// A precondition: a shell command that must exit zero before the task may
/// run, with an optional message shown when it does not.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Precondition {
    pub sh: String,
    pub msg: String,
}

impl<'de> Deserialize<'de> for Precondition {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Plain(String),
            Full {
                sh: String,
                #[serde(default)]
                msg: String,
            },
        }

        Ok(match Repr::deserialize(deserializer)? {
            Repr::Plain(sh) => {
                let msg = format!("`{sh}` exited non-zero");
                Precondition { sh, msg }
            }
            Repr::Full { sh, msg } => {
                let msg = if msg.is_empty() {
                    format!("`{sh}` exited non-zero")
                } else {
                    msg
                };
                Precondition { sh, msg }
            }
        })
    }
}

/// Up-to-date detection strategy. The empty string in YAML maps to
/// [`Method::Timestamp`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Method {
    #[default]
    Timestamp,
    Checksum,
    None,
}

impl<'de> Deserialize<'de> for Method {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        match s.as_str() {
            "" | "timestamp" => Ok(Method::Timestamp),
            "checksum" => Ok(Method::Checksum),
            "none" => Ok(Method::None),
            other => Err(D::Error::custom(format!("invalid method {other:?}"))),
        }
    }
}

/// Deduplication policy across one execution of the DAG.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RunPolicy {
    #[default]
    Always,
    Once,
    WhenChanged,
}

impl<'de> Deserialize<'de> for RunPolicy {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        match s.as_str() {
            "" | "always" => Ok(RunPolicy::Always),
            "once" => Ok(RunPolicy::Once),
            "when_changed" => Ok(RunPolicy::WhenChanged),
            other => Err(D::Error::custom(format!("invalid run policy {other:?}"))),
        }
    }
}

/// How command output of concurrently running tasks is presented.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Output {
    #[default]
    Interleaved,
    Group,
    Prefixed,
}

impl FromStr for Output {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "" | "interleaved" => Ok(Output::Interleaved),
            "group" => Ok(Output::Group),
            "prefixed" => Ok(Output::Prefixed),
            other => Err(format!(
                "invalid output mode {other:?} (expected interleaved, group or prefixed)"
            )),
        }
    }
}

impl fmt::Display for Output {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Output::Interleaved => "interleaved",
            Output::Group => "group",
            Output::Prefixed => "prefixed",
        };
        f.write_str(s)
    }
}

impl<'de> Deserialize<'de> for Output {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Output::from_str(&s).map_err(D::Error::custom)
    }
}

/// One named task.
///
/// `name` and `taskfile_vars` are not part of the YAML surface; the reader
/// fills them in while namespacing (`taskfile_vars` snapshots the merged
/// variables of the file the task was declared in).
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Task {
    #[serde(skip)]
    pub name: String,
    #[serde(default)]
    pub cmds: Vec<Cmd>,
    #[serde(default)]
    pub deps: Vec<Dep>,
    #[serde(default)]
    pub desc: String,
    #[serde(default)]
    pub sources: Vec<String>,
    #[serde(default)]
    pub generates: Vec<String>,
    #[serde(default)]
    pub status: Vec<String>,
    #[serde(default)]
    pub preconditions: Vec<Precondition>,
    #[serde(default)]
    pub dir: String,
    #[serde(default)]
    pub vars: Vars,
    #[serde(default)]
    pub env: Vars,
    #[serde(default)]
    pub method: Method,
    #[serde(default)]
    pub run: RunPolicy,
    #[serde(default)]
    pub silent: bool,
    #[serde(default)]
    pub ignore_error: bool,
    #[serde(default)]
    pub prefix: String,
    #[serde(default)]
    pub interactive: bool,
    #[serde(default)]
    pub internal: bool,
    #[serde(skip)]
    pub taskfile_vars: Vars,
}

/// Default number of template expansion passes.
pub const DEFAULT_EXPANSIONS: usize = 2;

/// A parsed taskfile after structural defaults are applied.
///
/// Constructed by the reader, mutated only during include merging, then
/// treated as immutable.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Taskfile {
    pub version: String,
    pub expansions: usize,
    pub output: Option<Output>,
    /// Includes in declaration order; later includes shadow earlier ones.
    pub includes: Vec<(String, String)>,
    pub vars: Vars,
    pub env: Vars,
    pub tasks: BTreeMap<String, Task>,
    pub reset_vars_on_rerun: bool,
}

impl<'de> Deserialize<'de> for Taskfile {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = serde_yaml::Value::deserialize(deserializer)?;
        Taskfile::from_value(value).map_err(D::Error::custom)
    }
}

impl Taskfile {
    /// Parse either the full taskfile form or the bare tasks-mapping form
    /// (which implies `version: "1"`).
    fn from_value(value: serde_yaml::Value) -> Result<Taskfile, String> {
        #[derive(Deserialize)]
        struct Full {
            #[serde(default)]
            version: String,
            #[serde(default)]
            expansions: usize,
            #[serde(default)]
            output: Option<Output>,
            #[serde(default)]
            includes: serde_yaml::Mapping,
            #[serde(default)]
            vars: Vars,
            #[serde(default)]
            env: Vars,
            #[serde(default)]
            tasks: BTreeMap<String, Task>,
            #[serde(default = "default_true", rename = "reset-vars-on-rerun")]
            reset_vars_on_rerun: bool,
        }

        fn default_true() -> bool {
            true
        }

        if !value.is_mapping() {
            return Err("taskfile must be a YAML mapping".into());
        }

        let is_full = value.get("version").is_some() || value.get("tasks").is_some();

        if !is_full {
            let tasks: BTreeMap<String, Task> =
                serde_yaml::from_value(value).map_err(|e| e.to_string())?;
            return Ok(Taskfile {
                version: "1".to_string(),
                expansions: DEFAULT_EXPANSIONS,
                tasks,
                reset_vars_on_rerun: true,
                ..Taskfile::default()
            });
        }

        let full: Full = serde_yaml::from_value(value).map_err(|e| e.to_string())?;

        let mut includes = Vec::with_capacity(full.includes.len());
        for (k, v) in &full.includes {
            let name = k
                .as_str()
                .ok_or_else(|| "include names must be strings".to_string())?;
            let path = v
                .as_str()
                .ok_or_else(|| format!("include {name:?} must map to a path string"))?;
            includes.push((name.to_string(), path.to_string()));
        }

        Ok(Taskfile {
            version: if full.version.is_empty() {
                "1".to_string()
            } else {
                full.version
            },
            expansions: if full.expansions == 0 {
                DEFAULT_EXPANSIONS
            } else {
                full.expansions.max(1)
            },
            output: full.output,
            includes,
            vars: full.vars,
            env: full.env,
            tasks: full.tasks,
            reset_vars_on_rerun: full.reset_vars_on_rerun,
        })
    }
}

/// Merge `t2` into `t1` (include semantics: later files shadow earlier ones).
///
/// `vars` are intentionally not merged here; variable visibility is carried
/// by the `taskfile_vars` snapshot the reader attaches to each task.
pub fn merge(t1: &mut Taskfile, t2: Taskfile) -> Result<(), TaskError> {
    if t1.version != t2.version {
        return Err(TaskError::VersionMismatch {
            first: t1.version.clone(),
            second: t2.version.clone(),
        });
    }

    // An expansions count equal to the default is treated as unset on the
    // right side, so an include cannot accidentally reset an explicit root
    // setting.
    if t2.expansions != DEFAULT_EXPANSIONS {
        t1.expansions = t2.expansions;
    }

    if t2.output.is_some() {
        t1.output = t2.output;
    }

    for (k, v) in t2.env.iter() {
        t1.env.insert(k.clone(), v.clone());
    }

    for (name, task) in t2.tasks {
        t1.tasks.insert(name, task);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_mapping_parses_as_version_1() {
        let tf: Taskfile = serde_yaml::from_str("build:\n  cmds:\n    - echo built\n").unwrap();
        assert_eq!(tf.version, "1");
        assert_eq!(tf.expansions, DEFAULT_EXPANSIONS);
        assert!(tf.reset_vars_on_rerun);
        assert_eq!(tf.tasks["build"].cmds[0].command, "echo built");
    }

    #[test]
    fn full_form_parses_vars_and_cmd_shapes() {
        let yaml = r#"
version: "2"
vars:
  NAME: world
  NOW: {sh: "date"}
tasks:
  greet:
    cmds:
      - echo hello
      - cmd: echo again
        silent: true
      - task: other
        vars: {WHO: me}
  other:
    cmds: ["echo other"]
"#;
        let tf: Taskfile = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(tf.version, "2");
        assert_eq!(tf.vars.get("NAME"), Some(&Var::Static("world".into())));
        assert_eq!(tf.vars.get("NOW"), Some(&Var::Sh("date".into())));
        let greet = &tf.tasks["greet"];
        assert_eq!(greet.cmds.len(), 3);
        assert!(greet.cmds[1].silent);
        assert_eq!(greet.cmds[2].task, "other");
        assert_eq!(greet.cmds[2].vars.get("WHO"), Some(&Var::Static("me".into())));
    }

    #[test]
    fn cmd_with_both_forms_is_rejected() {
        let yaml = "version: \"2\"\ntasks:\n  t:\n    cmds:\n      - cmd: echo x\n        task: y\n";
        assert!(serde_yaml::from_str::<Taskfile>(yaml).is_err());
    }

    #[test]
    fn merge_respects_version_and_default_expansions() {
        let mut t1: Taskfile = serde_yaml::from_str("version: \"2\"\nexpansions: 3\ntasks: {}\n").unwrap();
        let t2: Taskfile = serde_yaml::from_str("version: \"2\"\ntasks:\n  x: {cmds: [\"echo\"]}\n").unwrap();
        merge(&mut t1, t2).unwrap();
        // right side carried the default, so the explicit 3 survives
        assert_eq!(t1.expansions, 3);
        assert!(t1.tasks.contains_key("x"));

        let t3: Taskfile = serde_yaml::from_str("version: \"1\"\ntasks: {}\n").unwrap();
        assert!(matches!(
            merge(&mut t1, t3),
            Err(TaskError::VersionMismatch { .. })
        ));
    }
}
