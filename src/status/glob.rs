// src/status/glob.rs

//! Glob set expansion shared by the status checkers and the watcher.
//!
//! A source entry is a colon-separated list of subglobs; a `!` prefix marks
//! an exclusion. Relative subglobs resolve against the task directory and
//! environment variables are expanded before matching. The result is the
//! sorted set difference `included \ excluded`.

use std::collections::{BTreeSet, HashSet};
use std::path::{Path, PathBuf};

use anyhow::Context as _;

use crate::errors::{Result, TaskError};

/// Visit each expanded, dir-anchored subglob pattern with its exclude flag,
/// without touching the filesystem. The watcher uses this to derive watch
/// directories from the same pattern language.
pub fn visit_patterns(
    dir: &Path,
    globs: &[String],
    mut f: impl FnMut(&str, bool),
) {
    for entry in globs {
        for part in entry.split(':') {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }
            let (exclude, part) = match part.strip_prefix('!') {
                Some(rest) => (true, rest),
                None => (false, part),
            };
            let part = expand_env(part);
            let pattern = if Path::new(&part).is_absolute() {
                part
            } else {
                dir.join(&part).to_string_lossy().into_owned()
            };
            f(&pattern, exclude);
        }
    }
}

/// Expand the glob set for `globs` relative to `dir`.
pub fn glob(dir: &Path, globs: &[String]) -> Result<Vec<PathBuf>> {
    let mut patterns: Vec<(String, bool)> = Vec::new();
    visit_patterns(dir, globs, |pattern, exclude| {
        patterns.push((pattern.to_string(), exclude));
    });

    let mut included: Vec<PathBuf> = Vec::new();
    let mut excluded: HashSet<PathBuf> = HashSet::new();

    for (pattern, exclude) in patterns {
        let paths = glob::glob(&pattern)
            .with_context(|| format!("invalid glob pattern {pattern:?}"))
            .map_err(TaskError::Other)?;
        for entry in paths {
            let path = entry
                .with_context(|| format!("reading glob match for {pattern:?}"))
                .map_err(TaskError::Other)?;
            if exclude {
                excluded.insert(path);
            } else {
                included.push(path);
            }
        }
    }

    let files: BTreeSet<PathBuf> = included
        .into_iter()
        .filter(|p| !excluded.contains(p))
        .collect();

    Ok(files.into_iter().collect())
}

/// Replace `$NAME` / `${NAME}` with the value of the environment variable,
/// or the empty string when unset. A `$` not followed by a name is literal.
fn expand_env(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars().peekable();

    while let Some(c) = chars.next() {
        if c != '$' {
            out.push(c);
            continue;
        }
        match chars.peek() {
            Some('{') => {
                chars.next();
                let mut name = String::new();
                for c in chars.by_ref() {
                    if c == '}' {
                        break;
                    }
                    name.push(c);
                }
                out.push_str(&std::env::var(&name).unwrap_or_default());
            }
            Some(c) if c.is_ascii_alphabetic() || *c == '_' => {
                let mut name = String::new();
                while let Some(c) = chars.peek() {
                    if c.is_ascii_alphanumeric() || *c == '_' {
                        name.push(*c);
                        chars.next();
                    } else {
                        break;
                    }
                }
                out.push_str(&std::env::var(&name).unwrap_or_default());
            }
            _ => out.push('$'),
        }
    }

    out
}
