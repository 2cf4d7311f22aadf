// src/errors.rs

//! Crate-wide error type.
//!
//! Configuration and compilation problems get their own variants so the CLI
//! can report them before any task runs; execution errors carry the task
//! name. `Canceled` is special-cased by the executor and the watch loop and
//! is never reported as a task failure.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum TaskError {
    #[error(r#"taskfile {0:?} not found, use "--init" to create a new one"#)]
    TaskfileNotFound(PathBuf),

    #[error("decoding taskfile {path:?}: {source}")]
    TaskfileDecode {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error(r#"taskfile versions should match: first is {first:?} but second is {second:?}"#)]
    VersionMismatch { first: String, second: String },

    #[error("include {name:?} points at {path:?}, which does not exist")]
    IncludeNotFound { name: String, path: PathBuf },

    #[error("task {0:?} does not exist")]
    TaskNotFound(String),

    #[error("task {0:?} is internal and cannot be called directly")]
    TaskInternal(String),

    #[error("cycle detected in task dependencies involving {0:?}")]
    DependencyCycle(String),

    #[error("task {task:?} was called too many times (likely a cyclic task reference)")]
    MaximumCallsExceeded { task: String },

    #[error("task {task:?}: template error in {attribute}: {source}")]
    Template {
        task: String,
        attribute: String,
        #[source]
        source: minijinja::Error,
    },

    #[error("dynamic variable {{sh: {cmd:?}}} failed: {message}")]
    DynamicVar { cmd: String, message: String },

    #[error("task {task:?}: precondition failed: {message}")]
    PreconditionFailed { task: String, message: String },

    #[error("task {task:?}: command {cmd:?} exited with status {code}")]
    CommandFailed { task: String, cmd: String, code: i32 },

    #[error("task {0:?} is not up-to-date")]
    NotUpToDate(String),

    #[error("run was canceled")]
    Canceled,

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl TaskError {
    /// Cancellation is surfaced through the error channel but is not a task
    /// failure; callers use this to decide whether to log it.
    pub fn is_canceled(&self) -> bool {
        matches!(self, TaskError::Canceled)
    }
}

pub type Result<T> = std::result::Result<T, TaskError>;
