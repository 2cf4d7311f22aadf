// src/status/mod.rs

//! Up-to-date detection.
//!
//! A task's `method` selects one of three checkers over its glob-expanded
//! source and generated file sets:
//!
//! - `timestamp`: newest source older than oldest generated file.
//! - `checksum`: content digest compared against a persisted value under
//!   `<dir>/.task/checksum/<name>`.
//! - `none`: never up-to-date.

pub mod glob;

use std::fs::{self, File};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use anyhow::{anyhow, Context as _};
use tracing::debug;

use crate::errors::{Result, TaskError};
use crate::taskfile::{Method, Task};

/// Status checker for one compiled task, selected by its `method`.
#[derive(Debug, Clone)]
pub enum Checker {
    Timestamp {
        dir: PathBuf,
        sources: Vec<String>,
        generates: Vec<String>,
    },
    Checksum {
        dir: PathBuf,
        task: String,
        sources: Vec<String>,
        dry: bool,
    },
    None,
}

impl Checker {
    pub fn for_task(task: &Task, entry_dir: &Path, dry: bool) -> Checker {
        let dir = entry_dir.join(&task.dir);
        match task.method {
            Method::Timestamp => Checker::Timestamp {
                dir,
                sources: task.sources.clone(),
                generates: task.generates.clone(),
            },
            Method::Checksum => Checker::Checksum {
                dir,
                task: task.name.clone(),
                sources: task.sources.clone(),
                dry,
            },
            Method::None => Checker::None,
        }
    }

    pub fn is_up_to_date(&self) -> Result<bool> {
        match self {
            Checker::Timestamp {
                dir,
                sources,
                generates,
            } => timestamp_up_to_date(dir, sources, generates),
            Checker::Checksum {
                dir, task, sources, ..
            } => {
                let new = compute_checksum(dir, sources)?;
                let old = fs::read_to_string(checksum_path(dir, task))
                    .ok()
                    .map(|s| s.trim().to_string());
                Ok(old.as_deref() == Some(new.as_str()))
            }
            Checker::None => Ok(false),
        }
    }

    /// Called after the task body ran successfully; the checksum checker
    /// persists the fresh digest here (skipped on dry runs).
    pub fn on_success(&self) -> Result<()> {
        if let Checker::Checksum {
            dir,
            task,
            sources,
            dry,
        } = self
        {
            if *dry {
                return Ok(());
            }
            let digest = compute_checksum(dir, sources)?;
            let path = checksum_path(dir, task);
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("creating checksum directory at {parent:?}"))
                    .map_err(TaskError::Other)?;
            }
            fs::write(&path, &digest)
                .with_context(|| format!("writing checksum at {path:?}"))
                .map_err(TaskError::Other)?;
            debug!(task = %task, digest = %digest, "stored task checksum");
        }
        Ok(())
    }

    /// Called when the task body failed; the checksum checker drops the
    /// persisted digest so the next run re-executes.
    pub fn on_error(&self) -> Result<()> {
        if let Checker::Checksum { dir, task, .. } = self {
            let path = checksum_path(dir, task);
            if path.is_file() {
                fs::remove_file(&path)
                    .with_context(|| format!("removing checksum at {path:?}"))
                    .map_err(TaskError::Other)?;
            }
        }
        Ok(())
    }
}

fn timestamp_up_to_date(dir: &Path, sources: &[String], generates: &[String]) -> Result<bool> {
    if generates.is_empty() {
        return Ok(false);
    }
    let generated = glob::glob(dir, generates)?;
    if generated.is_empty() {
        return Ok(false);
    }

    if sources.is_empty() {
        // No sources declared: no comparison baseline, nothing can be
        // newer than the outputs.
        return Ok(true);
    }
    let source_files = glob::glob(dir, sources)?;
    if source_files.is_empty() {
        // Declared sources that match nothing are missing inputs, not an
        // absent baseline.
        return Err(TaskError::Other(anyhow!(
            "sources {sources:?} matched no files under {dir:?}"
        )));
    }

    let newest_source = max_mtime(&source_files)?;
    let oldest_generated = match min_mtime(&generated)? {
        Some(t) => t,
        None => return Ok(false),
    };

    Ok(newest_source <= oldest_generated)
}

fn max_mtime(files: &[PathBuf]) -> Result<SystemTime> {
    let mut max = SystemTime::UNIX_EPOCH;
    for f in files {
        let t = mtime(f)?;
        if t > max {
            max = t;
        }
    }
    Ok(max)
}

fn min_mtime(files: &[PathBuf]) -> Result<Option<SystemTime>> {
    let mut min: Option<SystemTime> = None;
    for f in files {
        let t = mtime(f)?;
        min = Some(match min {
            Some(m) if m < t => m,
            _ => t,
        });
    }
    Ok(min)
}

fn mtime(path: &Path) -> Result<SystemTime> {
    let meta = fs::metadata(path)
        .with_context(|| format!("stat {path:?}"))
        .map_err(TaskError::Other)?;
    meta.modified()
        .with_context(|| format!("mtime of {path:?}"))
        .map_err(TaskError::Other)
}

fn checksum_path(dir: &Path, task: &str) -> PathBuf {
    dir.join(".task").join("checksum").join(normalize_filename(task))
}

/// Qualified task names contain `:`; map anything unfit for a filename.
fn normalize_filename(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            ':' | '/' | '\\' => '-',
            other => other,
        })
        .collect()
}

/// Stable digest over the sorted source paths and their contents.
fn compute_checksum(dir: &Path, sources: &[String]) -> Result<String> {
    let files = glob::glob(dir, sources)?;

    let mut hasher = blake3::Hasher::new();
    for file in &files {
        let rel = file.strip_prefix(dir).unwrap_or(file);
        hasher.update(rel.to_string_lossy().as_bytes());
        hasher.update(b"\0");
        hasher.update(file_hash(file)?.as_bytes());
        hasher.update(b"\0");
    }
    Ok(hasher.finalize().to_hex().to_string())
}

fn file_hash(path: &Path) -> Result<String> {
    let mut hasher = blake3::Hasher::new();
    let mut file = File::open(path)
        .with_context(|| format!("opening file for hashing: {path:?}"))
        .map_err(TaskError::Other)?;
    let mut buf = [0u8; 8192];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hasher.finalize().to_hex().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn touch(path: &Path, contents: &str) {
        fs::write(path, contents).unwrap();
    }

    #[test]
    fn none_is_never_up_to_date() {
        assert!(!Checker::None.is_up_to_date().unwrap());
    }

    #[test]
    fn timestamp_without_generates_is_stale() {
        let tmp = tempfile::tempdir().unwrap();
        touch(&tmp.path().join("src.c"), "x");
        let checker = Checker::Timestamp {
            dir: tmp.path().to_path_buf(),
            sources: vec!["src.c".into()],
            generates: vec![],
        };
        assert!(!checker.is_up_to_date().unwrap());
    }

    #[test]
    fn timestamp_with_no_declared_sources_is_up_to_date() {
        let tmp = tempfile::tempdir().unwrap();
        touch(&tmp.path().join("bin"), "y");
        let checker = Checker::Timestamp {
            dir: tmp.path().to_path_buf(),
            sources: vec![],
            generates: vec!["bin".into()],
        };
        assert!(checker.is_up_to_date().unwrap());
    }

    #[test]
    fn timestamp_errors_when_declared_sources_match_nothing() {
        let tmp = tempfile::tempdir().unwrap();
        touch(&tmp.path().join("bin"), "y");
        let checker = Checker::Timestamp {
            dir: tmp.path().to_path_buf(),
            sources: vec!["missing.c".into()],
            generates: vec!["bin".into()],
        };
        assert!(checker.is_up_to_date().is_err());
    }

    #[test]
    fn timestamp_compares_newest_source_to_oldest_output() {
        let tmp = tempfile::tempdir().unwrap();
        let src = tmp.path().join("src.c");
        let out = tmp.path().join("bin");
        touch(&src, "x");
        touch(&out, "y");

        let base = SystemTime::UNIX_EPOCH + std::time::Duration::from_secs(1_000_000);
        set_mtime(&src, base);
        set_mtime(&out, base + std::time::Duration::from_secs(1));

        let checker = Checker::Timestamp {
            dir: tmp.path().to_path_buf(),
            sources: vec!["src.c".into()],
            generates: vec!["bin".into()],
        };
        assert!(checker.is_up_to_date().unwrap());

        set_mtime(&src, base + std::time::Duration::from_secs(2));
        assert!(!checker.is_up_to_date().unwrap());
    }

    #[test]
    fn checksum_round_trip() {
        let tmp = tempfile::tempdir().unwrap();
        let f = tmp.path().join("f.txt");
        touch(&f, "contents");

        let checker = Checker::Checksum {
            dir: tmp.path().to_path_buf(),
            task: "ns:build".into(),
            sources: vec!["f.txt".into()],
            dry: false,
        };

        assert!(!checker.is_up_to_date().unwrap());
        checker.on_success().unwrap();
        assert!(checker.is_up_to_date().unwrap());

        // Touching without changing contents keeps it up-to-date.
        let now = SystemTime::now();
        set_mtime(&f, now);
        assert!(checker.is_up_to_date().unwrap());

        touch(&f, "changed");
        assert!(!checker.is_up_to_date().unwrap());

        checker.on_success().unwrap();
        checker.on_error().unwrap();
        assert!(!checker.is_up_to_date().unwrap());
    }

    fn set_mtime(path: &Path, t: SystemTime) {
        let f = fs::File::options().write(true).open(path).unwrap();
        f.set_modified(t).unwrap();
    }
}
