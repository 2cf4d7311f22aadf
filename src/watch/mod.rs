// src/watch/mod.rs

//! Watch mode.
//!
//! The watcher runs the given calls, derives the union of watch directories
//! from the sources of every task in the transitive call tree, and reruns a
//! call when a debounced filesystem event lands on one of its dependencies.
//!
//! Each call gets its own coordinator loop owning all mutable watch state
//! (running token, registered paths, notifier handle); events and debounce
//! firings reach it over channels.

pub mod debounce;
pub mod paths;
pub mod watcher;

pub use debounce::Debouncer;
pub use watcher::{watch_tasks, watch_tasks_until};
