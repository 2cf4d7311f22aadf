// src/taskfile/mod.rs

//! Taskfile data model and loading.
//!
//! Responsibilities:
//! - Define the YAML-backed data model (`model.rs`): taskfile, task, cmd,
//!   dep, var, call.
//! - Read a taskfile from disk with include merging, namespace rewriting and
//!   OS overlays (`read.rs`).
//! - Validate static invariants like dependency acyclicity.

pub mod model;
pub mod read;

pub use model::{
    merge, Call, Cmd, Dep, Method, Output, Precondition, RunPolicy, Task, Taskfile, Var, Vars,
};
pub use read::{read_taskfile, read_taskvars, validate};
