// src/taskfile/read.rs

use std::path::{Path, PathBuf};

use petgraph::algo::toposort;
use petgraph::graphmap::DiGraphMap;
use tracing::debug;

use crate::errors::{Result, TaskError};
use crate::platform;
use crate::taskfile::model::{merge, Taskfile, Vars};

pub const NAMESPACE_SEPARATOR: &str = ":";

/// Read the taskfile at `path`, following includes and the host OS overlay,
/// and return the fully merged result.
///
/// `parent_vars` are merged underneath the file's own `vars` (the file
/// wins); the CLI passes Taskvars globals and `NAME=value` arguments here.
pub fn read_taskfile(path: &Path, parent_vars: &Vars) -> Result<Taskfile> {
    read_inner(path, parent_vars, &[], true)
}

fn read_inner(
    path: &Path,
    parent_vars: &Vars,
    namespaces: &[String],
    allow_overlay: bool,
) -> Result<Taskfile> {
    let dir = path.parent().unwrap_or_else(|| Path::new(".")).to_path_buf();

    if !path.is_file() {
        return Err(TaskError::TaskfileNotFound(path.to_path_buf()));
    }
    let mut t = decode_taskfile(path)?;

    t.vars = parent_vars.merged(&t.vars);

    // Rewrite every task (and its task references) into the current
    // namespace and snapshot the merged vars it was declared with.
    let names: Vec<String> = t.tasks.keys().cloned().collect();
    for name in names {
        let Some(mut task) = t.tasks.remove(&name) else {
            continue;
        };
        let qualified = join_namespace(&name, namespaces);

        for dep in &mut task.deps {
            dep.task = join_namespace(&dep.task, namespaces);
        }
        for cmd in &mut task.cmds {
            if !cmd.task.is_empty() {
                cmd.task = join_namespace(&cmd.task, namespaces);
            }
        }

        task.name = qualified.clone();
        task.taskfile_vars = t.vars.clone();
        t.tasks.insert(qualified, task);
    }

    for (include_name, include_path) in t.includes.clone() {
        let mut target = dir.join(&include_path);
        if target.is_dir() {
            target = target.join("Taskfile.yml");
        }
        if !target.is_file() {
            return Err(TaskError::IncludeNotFound {
                name: include_name,
                path: target,
            });
        }

        // A dot-prefixed include name flat-merges: the included tasks keep
        // the current namespace list instead of gaining a new segment.
        let included_namespaces: Vec<String> = if include_name.starts_with('.') {
            namespaces.to_vec()
        } else {
            let mut ns = namespaces.to_vec();
            ns.push(include_name.clone());
            ns
        };

        debug!(include = %include_name, path = ?target, "reading included taskfile");
        let included = read_inner(&target, &t.vars, &included_namespaces, true)?;
        merge(&mut t, included)?;
    }

    if allow_overlay {
        if let Some(overlay) = overlay_path(path) {
            if overlay.is_file() {
                debug!(path = ?overlay, "reading OS overlay taskfile");
                let os_taskfile = read_inner(&overlay, &t.vars, namespaces, false)?;
                merge(&mut t, os_taskfile)?;
            }
        }
    }

    Ok(t)
}

fn decode_taskfile(path: &Path) -> Result<Taskfile> {
    let contents = std::fs::read_to_string(path)?;
    serde_yaml::from_str(&contents).map_err(|source| TaskError::TaskfileDecode {
        path: path.to_path_buf(),
        source,
    })
}

/// `<basename>_<os>.yml` next to `path`, e.g. `Taskfile_linux.yml`.
fn overlay_path(path: &Path) -> Option<PathBuf> {
    let stem = path.file_stem()?.to_str()?;
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    Some(dir.join(format!("{}_{}.yml", stem, platform::os_identifier())))
}

/// Read `Taskvars.yml` and `Taskvars_<os>.yml` from `dir` (deprecated but
/// supported): flat `name: value` mappings merged into the globals, the OS
/// variant winning.
pub fn read_taskvars(dir: &Path) -> Result<Vars> {
    let mut vars = Vars::new();

    for name in ["Taskvars.yml".to_string(), format!("Taskvars_{}.yml", platform::os_identifier())] {
        let path = dir.join(&name);
        if !path.is_file() {
            continue;
        }
        let contents = std::fs::read_to_string(&path)?;
        let file_vars: Vars =
            serde_yaml::from_str(&contents).map_err(|source| TaskError::TaskfileDecode {
                path: path.clone(),
                source,
            })?;
        vars = vars.merged(&file_vars);
    }

    Ok(vars)
}

/// Qualify `name` with the namespace list.
///
/// - A leading `:` roots the name (namespace stripped).
/// - A name equal to the innermost namespace collapses onto it, so a task
///   can refer to itself by short name within its own namespace.
pub fn join_namespace(name: &str, namespaces: &[String]) -> String {
    if let Some(rooted) = name.strip_prefix(NAMESPACE_SEPARATOR) {
        return rooted.to_string();
    }

    let mut namespaces = namespaces;
    if let Some(last) = namespaces.last() {
        if last == name {
            namespaces = &namespaces[..namespaces.len() - 1];
        }
    }

    let mut parts: Vec<&str> = namespaces.iter().map(String::as_str).collect();
    parts.push(name);
    parts.join(NAMESPACE_SEPARATOR)
}

/// Validate the merged taskfile: every statically named dep / task-cmd
/// reference must exist, and the reference graph must be acyclic.
///
/// References that still contain template syntax can only be checked at
/// compile time; the executor's call-depth guard covers cycles routed
/// through them.
pub fn validate(t: &Taskfile) -> Result<()> {
    let mut graph: DiGraphMap<&str, ()> = DiGraphMap::new();

    for name in t.tasks.keys() {
        graph.add_node(name.as_str());
    }

    for (name, task) in &t.tasks {
        let refs = task
            .deps
            .iter()
            .map(|d| d.task.as_str())
            .chain(task.cmds.iter().filter(|c| !c.task.is_empty()).map(|c| c.task.as_str()));

        for target in refs {
            if target.contains("{{") {
                continue;
            }
            if !t.tasks.contains_key(target) {
                return Err(TaskError::TaskNotFound(target.to_string()));
            }
            graph.add_edge(target, name.as_str(), ());
        }
    }

    match toposort(&graph, None) {
        Ok(_) => Ok(()),
        Err(cycle) => Err(TaskError::DependencyCycle(cycle.node_id().to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_namespace_rules() {
        let ns = |items: &[&str]| items.iter().map(|s| s.to_string()).collect::<Vec<_>>();

        assert_eq!(join_namespace(":root", &ns(&["x", "y"])), "root");
        assert_eq!(join_namespace("foo", &ns(&["x"])), "x:foo");
        assert_eq!(join_namespace("x", &ns(&["x"])), "x");
        assert_eq!(join_namespace("foo", &[]), "foo");
        assert_eq!(join_namespace("bar", &ns(&["a", "b"])), "a:b:bar");
    }

    #[test]
    fn validate_rejects_unknown_and_cyclic_references() {
        let tf: Taskfile = serde_yaml::from_str(
            "version: \"2\"\ntasks:\n  a:\n    deps: [b]\n    cmds: [\"echo a\"]\n",
        )
        .unwrap();
        assert!(matches!(validate(&tf), Err(TaskError::TaskNotFound(_))));

        let tf: Taskfile = serde_yaml::from_str(
            "version: \"2\"\ntasks:\n  a:\n    deps: [b]\n  b:\n    deps: [a]\n",
        )
        .unwrap();
        assert!(matches!(validate(&tf), Err(TaskError::DependencyCycle(_))));
    }
}
