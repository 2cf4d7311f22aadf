// src/output.rs

//! Output policies for command stdout/stderr.
//!
//! Writers are injected so tests can capture output. Each command gets a
//! [`CmdSink`] configured with the taskfile's output mode:
//!
//! - `interleaved`: lines go straight to the shared writers.
//! - `group`: lines are buffered and flushed atomically on completion.
//! - `prefixed`: each line is prefixed with the task label.

use std::io::Write;
use std::sync::{Arc, Mutex};

use crate::taskfile::Output;

pub type SharedWriter = Arc<Mutex<Box<dyn Write + Send>>>;

pub fn stdout_writer() -> SharedWriter {
    Arc::new(Mutex::new(Box::new(std::io::stdout())))
}

pub fn stderr_writer() -> SharedWriter {
    Arc::new(Mutex::new(Box::new(std::io::stderr())))
}

/// A writer backed by a shared byte buffer, for capturing output in tests.
pub fn buffer_writer() -> (SharedWriter, Arc<Mutex<Vec<u8>>>) {
    let buf: Arc<Mutex<Vec<u8>>> = Arc::new(Mutex::new(Vec::new()));
    let writer = VecWriter(Arc::clone(&buf));
    (Arc::new(Mutex::new(Box::new(writer))), buf)
}

struct VecWriter(Arc<Mutex<Vec<u8>>>);

impl Write for VecWriter {
    fn write(&mut self, data: &[u8]) -> std::io::Result<usize> {
        lock_writer(&self.0).extend_from_slice(data);
        Ok(data.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// Per-executor output configuration; [`OutputContext::sink`] derives the
/// per-command sink.
#[derive(Clone)]
pub struct OutputContext {
    pub style: Output,
    pub color: bool,
    pub stdout: SharedWriter,
    pub stderr: SharedWriter,
}

impl OutputContext {
    /// Write one log line to the stderr writer, bypassing the output policy.
    pub fn write_stderr_line(&self, message: &str) {
        let mut guard = lock_writer(&self.stderr);
        let _ = writeln!(guard, "{message}");
        let _ = guard.flush();
    }

    pub fn sink(&self, label: &str) -> CmdSink {
        CmdSink {
            style: self.style,
            prefix: label.to_string(),
            color: self.color,
            stdout: Arc::clone(&self.stdout),
            stderr: Arc::clone(&self.stderr),
            buffered: Vec::new(),
        }
    }
}

pub struct CmdSink {
    style: Output,
    prefix: String,
    color: bool,
    stdout: SharedWriter,
    stderr: SharedWriter,
    buffered: Vec<(bool, String)>,
}

impl CmdSink {
    /// Record one line of command output. `is_err` selects the stderr writer.
    pub fn line(&mut self, is_err: bool, text: &str) {
        match self.style {
            Output::Interleaved => self.write_line(is_err, text),
            Output::Group => self.buffered.push((is_err, text.to_string())),
            Output::Prefixed => {
                let prefixed = format!("{} {}", self.rendered_prefix(), text);
                self.write_line(is_err, &prefixed);
            }
        }
    }

    /// Flush anything held back by the `group` policy in one atomic burst.
    pub fn finish(mut self) {
        if self.style != Output::Group || self.buffered.is_empty() {
            return;
        }
        let lines = std::mem::take(&mut self.buffered);
        let mut out = lock_writer(&self.stdout);
        let mut err = lock_writer(&self.stderr);
        for (is_err, text) in lines {
            let target: &mut Box<dyn Write + Send> = if is_err { &mut err } else { &mut out };
            let _ = writeln!(target, "{text}");
        }
        let _ = out.flush();
        let _ = err.flush();
    }

    fn write_line(&self, is_err: bool, text: &str) {
        let writer = if is_err { &self.stderr } else { &self.stdout };
        let mut guard = lock_writer(writer);
        let _ = writeln!(guard, "{text}");
        let _ = guard.flush();
    }

    fn rendered_prefix(&self) -> String {
        if self.color {
            let code = PREFIX_COLORS[color_index(&self.prefix)];
            format!("\x1b[{code}m[{}]\x1b[0m", self.prefix)
        } else {
            format!("[{}]", self.prefix)
        }
    }
}

/// Lock a shared writer, recovering the guard if a holder panicked.
fn lock_writer<T: ?Sized>(writer: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    writer.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

const PREFIX_COLORS: [u8; 6] = [31, 32, 33, 34, 35, 36];

fn color_index(name: &str) -> usize {
    name.bytes().fold(0usize, |acc, b| acc.wrapping_add(b as usize)) % PREFIX_COLORS.len()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn captured(style: Output, f: impl FnOnce(&mut CmdSink)) -> String {
        let (out, buf) = buffer_writer();
        let (err, _) = buffer_writer();
        let ctx = OutputContext {
            style,
            color: false,
            stdout: out,
            stderr: err,
        };
        let mut sink = ctx.sink("build");
        f(&mut sink);
        sink.finish();
        let bytes = buf.lock().unwrap().clone();
        String::from_utf8(bytes).unwrap()
    }

    #[test]
    fn interleaved_writes_immediately() {
        let out = captured(Output::Interleaved, |s| s.line(false, "one"));
        assert_eq!(out, "one\n");
    }

    #[test]
    fn group_holds_lines_until_finish() {
        let (out, buf) = buffer_writer();
        let (err, _) = buffer_writer();
        let ctx = OutputContext {
            style: Output::Group,
            color: false,
            stdout: out,
            stderr: err,
        };
        let mut sink = ctx.sink("build");
        sink.line(false, "one");
        assert!(buf.lock().unwrap().is_empty());
        sink.finish();
        assert_eq!(String::from_utf8(buf.lock().unwrap().clone()).unwrap(), "one\n");
    }

    #[test]
    fn prefixed_adds_task_label() {
        let out = captured(Output::Prefixed, |s| s.line(false, "one"));
        assert_eq!(out, "[build] one\n");
    }
}
