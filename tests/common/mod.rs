#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use taskdag::executor::{Executor, RunFlags};
use taskdag::output::buffer_writer;
use taskdag::taskfile::{read_taskfile, validate, Vars};

/// A loaded executor with captured stdout/stderr, built from the
/// `Taskfile.yml` in `dir`.
pub struct Harness {
    pub executor: Arc<Executor>,
    pub dir: PathBuf,
    stdout: Arc<Mutex<Vec<u8>>>,
    stderr: Arc<Mutex<Vec<u8>>>,
}

impl Harness {
    pub fn stdout(&self) -> String {
        String::from_utf8(self.stdout.lock().unwrap().clone()).unwrap()
    }

    pub fn stderr(&self) -> String {
        String::from_utf8(self.stderr.lock().unwrap().clone()).unwrap()
    }
}

pub fn write_taskfile(dir: &Path, yaml: &str) {
    std::fs::write(dir.join("Taskfile.yml"), yaml).expect("writing taskfile");
}

pub fn harness(dir: &Path) -> Harness {
    harness_with_flags(dir, RunFlags::default())
}

pub fn harness_with_flags(dir: &Path, flags: RunFlags) -> Harness {
    let taskfile =
        read_taskfile(&dir.join("Taskfile.yml"), &Vars::new()).expect("reading taskfile");
    validate(&taskfile).expect("validating taskfile");

    let (out_writer, stdout) = buffer_writer();
    let (err_writer, stderr) = buffer_writer();
    let executor = Arc::new(Executor::new(
        taskfile,
        dir.to_path_buf(),
        flags,
        None,
        out_writer,
        err_writer,
    ));

    Harness {
        executor,
        dir: dir.to_path_buf(),
        stdout,
        stderr,
    }
}
