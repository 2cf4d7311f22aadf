// src/cli.rs

//! CLI argument parsing using `clap`.

use clap::Parser;

/// Command-line arguments for `taskdag`.
///
/// Trailing positional arguments are task names and `NAME=value` variable
/// assignments; see [`crate::args::parse`] for how they are grouped into
/// calls.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "taskdag",
    version,
    about = "Task runner: run named tasks from a Taskfile.yml with dependencies, \
             up-to-date checks and file watching.",
    long_about = None
)]
pub struct CliArgs {
    /// Create a starter Taskfile.yml in the current directory.
    #[arg(long)]
    pub init: bool,

    /// List all non-internal tasks with their descriptions.
    #[arg(short, long)]
    pub list: bool,

    /// Run tasks even if they are up-to-date.
    #[arg(short, long)]
    pub force: bool,

    /// Watch source files of the given tasks and rerun them on change.
    #[arg(short, long)]
    pub watch: bool,

    /// Enable debug logging.
    #[arg(short, long)]
    pub verbose: bool,

    /// Suppress command echo.
    #[arg(short, long)]
    pub silent: bool,

    /// Run top-level calls in parallel.
    #[arg(short, long)]
    pub parallel: bool,

    /// Compile and print what would run without executing any command.
    #[arg(long)]
    pub dry: bool,

    /// Print a summary of the given tasks instead of running them.
    #[arg(long)]
    pub summary: bool,

    /// Exit non-zero if any of the given tasks is not up-to-date.
    #[arg(long)]
    pub status: bool,

    /// Colorize the prefixed output mode.
    #[arg(long)]
    pub color: bool,

    /// Directory to run in (defaults to the current directory).
    #[arg(short, long, value_name = "DIR")]
    pub dir: Option<String>,

    /// Taskfile to read (defaults to Taskfile.yml in the run directory).
    #[arg(short, long, value_name = "FILE")]
    pub taskfile: Option<String>,

    /// Output mode: interleaved, group or prefixed (overrides the taskfile).
    #[arg(long, value_name = "MODE")]
    pub output: Option<String>,

    /// Tasks to run, each optionally followed by NAME=value assignments.
    /// Assignments before the first task name become global variables.
    #[arg(value_name = "ARGS", trailing_var_arg = true)]
    pub task_args: Vec<String>,
}

/// Convenience wrapper around `CliArgs::parse()`.
pub fn parse() -> CliArgs {
    CliArgs::parse()
}
