// src/watch/paths.rs

//! Watch-path derivation from source globs.
//!
//! A glob like `src/**/*.c` cannot be registered with the filesystem
//! notifier directly; it is cut at the first wildcard metacharacter and
//! collapsed to a directory. A `**` glob marks the directory recursive with
//! a `/...` suffix. Redundant paths are then reduced: `a/...` dominates
//! anything under `a`, and a directory dominates its direct children.

use std::path::Path;

use crate::status::glob::visit_patterns;

/// Recursive-watch marker suffix.
pub const RECURSIVE_SUFFIX: &str = "/...";

/// Best-effort watch paths for one task's source globs, anchored at `dir`.
pub fn watch_paths_from_globs(dir: &Path, globs: &[String]) -> Vec<String> {
    let mut paths = Vec::new();

    visit_patterns(dir, globs, |pattern, exclude| {
        if exclude {
            return;
        }

        let has_double_star = pattern.contains("**");
        let meta = ['*', '?', '[', '{']
            .iter()
            .filter_map(|m| pattern.find(*m))
            .min();

        let mut path = match meta {
            Some(idx) => pattern[..idx].to_string(),
            None => pattern.to_string(),
        };

        if has_double_star {
            path = format!("{}{}", dir_of(&path), RECURSIVE_SUFFIX);
        } else if meta.is_some() {
            path = dir_of(&path);
        }

        paths.push(normalize_path(&path));
    });

    paths
}

/// All but the last path element, ignoring trailing slashes (`"."` for bare
/// names, `"/"` at the root).
fn dir_of(path: &str) -> String {
    match path.rfind('/') {
        Some(idx) => {
            let dir = path[..=idx].trim_end_matches('/');
            if dir.is_empty() {
                "/".to_string()
            } else {
                dir.to_string()
            }
        }
        None => ".".to_string(),
    }
}

/// Prefix relative paths with `./` so comparisons are stable.
pub fn normalize_path(path: &str) -> String {
    if path == "." || path.starts_with('/') || path.starts_with("./") {
        path.to_string()
    } else {
        format!("./{path}")
    }
}

fn is_recursive(path: &str) -> bool {
    path.ends_with(RECURSIVE_SUFFIX)
}

/// The directory a watch path stands for, with any recursive marker removed.
pub fn base_dir(path: &str) -> &str {
    path.strip_suffix(RECURSIVE_SUFFIX).unwrap_or(path)
}

/// Does watching `path` make watching `another` redundant?
fn path_includes(path: &str, another: &str) -> bool {
    let path_recursive = is_recursive(path);
    let another_recursive = is_recursive(another);

    let path = normalize_path(base_dir(path));
    let another = normalize_path(base_dir(another));

    if path_recursive {
        another == path || another.starts_with(&format!("{path}/"))
    } else {
        !another_recursive && path == normalize_path(&dir_of(&another))
    }
}

/// Drop every path dominated by another in the set.
pub fn reduce_watch_paths(paths: impl IntoIterator<Item = String>) -> Vec<String> {
    let mut result: Vec<String> = Vec::new();

    for p in paths {
        if p.is_empty() {
            continue;
        }
        if result.iter().any(|r| path_includes(r, &p)) {
            continue;
        }
        result.retain(|r| !path_includes(&p, r));
        if !result.contains(&p) {
            result.push(p);
        }
    }

    result
}
