mod common;

use std::error::Error;
use std::fs;

use tokio_util::sync::CancellationToken;

use common::{harness, harness_with_flags, write_taskfile};
use taskdag::errors::TaskError;
use taskdag::executor::RunFlags;
use taskdag::taskfile::Call;

type TestResult = Result<(), Box<dyn Error>>;

const CHECKSUM_TASKFILE: &str = r#"
version: "2"
tasks:
  build:
    method: checksum
    sources: ["f.txt"]
    cmds:
      - echo ran
"#;

#[tokio::test]
async fn checksum_task_skips_until_sources_change() -> TestResult {
    let tmp = tempfile::tempdir()?;
    fs::write(tmp.path().join("f.txt"), "v1")?;
    write_taskfile(tmp.path(), CHECKSUM_TASKFILE);
    let token = CancellationToken::new();

    let h = harness(tmp.path());
    h.executor.run(&token, &[Call::new("build")]).await?;
    assert_eq!(h.stdout(), "ran\n");

    // Fresh executor, unchanged sources: up-to-date short circuit.
    let h = harness(tmp.path());
    h.executor.run(&token, &[Call::new("build")]).await?;
    assert!(h.stdout().is_empty());
    assert!(h.stderr().contains("up to date"));

    // Changed contents trigger re-execution.
    fs::write(tmp.path().join("f.txt"), "v2")?;
    let h = harness(tmp.path());
    h.executor.run(&token, &[Call::new("build")]).await?;
    assert_eq!(h.stdout(), "ran\n");
    Ok(())
}

#[tokio::test]
async fn checksum_failure_clears_the_stored_digest() -> TestResult {
    let tmp = tempfile::tempdir()?;
    fs::write(tmp.path().join("f.txt"), "v1")?;
    write_taskfile(
        tmp.path(),
        r#"
version: "2"
tasks:
  build:
    method: checksum
    sources: ["f.txt"]
    cmds:
      - echo ran
      - "test -f unlock"
"#,
    );
    let token = CancellationToken::new();

    let h = harness(tmp.path());
    assert!(h.executor.run(&token, &[Call::new("build")]).await.is_err());

    // The failed run must not have persisted a digest, so the next run
    // executes again instead of reporting up-to-date.
    fs::write(tmp.path().join("unlock"), "")?;
    let h = harness(tmp.path());
    h.executor.run(&token, &[Call::new("build")]).await?;
    assert_eq!(h.stdout(), "ran\n");
    Ok(())
}

#[tokio::test]
async fn timestamp_task_skips_when_outputs_are_newer() -> TestResult {
    let tmp = tempfile::tempdir()?;
    write_taskfile(
        tmp.path(),
        r#"
version: "2"
tasks:
  build:
    sources: ["src.c"]
    generates: ["bin"]
    cmds:
      - echo compiled
"#,
    );
    fs::write(tmp.path().join("src.c"), "int main;")?;
    fs::write(tmp.path().join("bin"), "elf")?;

    let base = std::time::SystemTime::UNIX_EPOCH + std::time::Duration::from_secs(1_700_000_000);
    set_mtime(&tmp.path().join("src.c"), base);
    set_mtime(&tmp.path().join("bin"), base + std::time::Duration::from_secs(1));

    let token = CancellationToken::new();
    let h = harness(tmp.path());
    h.executor.run(&token, &[Call::new("build")]).await?;
    assert!(h.stdout().is_empty());
    assert!(h.stderr().contains("up to date"));

    // Touching the source past the output re-runs.
    set_mtime(&tmp.path().join("src.c"), base + std::time::Duration::from_secs(2));
    let h = harness(tmp.path());
    h.executor.run(&token, &[Call::new("build")]).await?;
    assert_eq!(h.stdout(), "compiled\n");
    Ok(())
}

#[tokio::test]
async fn status_commands_gate_execution() -> TestResult {
    let tmp = tempfile::tempdir()?;
    write_taskfile(
        tmp.path(),
        r#"
version: "2"
tasks:
  setup:
    status:
      - "test -f marker"
    cmds:
      - touch marker
      - echo installed
"#,
    );
    let token = CancellationToken::new();

    let h = harness(tmp.path());
    h.executor.run(&token, &[Call::new("setup")]).await?;
    assert_eq!(h.stdout(), "installed\n");

    let h = harness(tmp.path());
    h.executor.run(&token, &[Call::new("setup")]).await?;
    assert!(h.stdout().is_empty());
    Ok(())
}

#[tokio::test]
async fn force_runs_even_when_up_to_date() -> TestResult {
    let tmp = tempfile::tempdir()?;
    fs::write(tmp.path().join("f.txt"), "v1")?;
    write_taskfile(tmp.path(), CHECKSUM_TASKFILE);
    let token = CancellationToken::new();

    let h = harness(tmp.path());
    h.executor.run(&token, &[Call::new("build")]).await?;

    let h = harness_with_flags(
        tmp.path(),
        RunFlags {
            force: true,
            ..RunFlags::default()
        },
    );
    h.executor.run(&token, &[Call::new("build")]).await?;
    assert_eq!(h.stdout(), "ran\n");
    Ok(())
}

#[tokio::test]
async fn status_query_reports_stale_tasks() -> TestResult {
    let tmp = tempfile::tempdir()?;
    fs::write(tmp.path().join("f.txt"), "v1")?;
    write_taskfile(tmp.path(), CHECKSUM_TASKFILE);
    let token = CancellationToken::new();

    let h = harness(tmp.path());
    let err = h
        .executor
        .status(&token, &[Call::new("build")])
        .await
        .expect_err("never-run task is stale");
    assert!(matches!(err, TaskError::NotUpToDate(name) if name == "build"));

    h.executor.run(&token, &[Call::new("build")]).await?;
    h.executor.status(&token, &[Call::new("build")]).await?;
    Ok(())
}

fn set_mtime(path: &std::path::Path, t: std::time::SystemTime) {
    let f = fs::File::options().write(true).open(path).unwrap();
    f.set_modified(t).unwrap();
}
