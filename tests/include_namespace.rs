mod common;

use std::error::Error;
use std::fs;

use tokio_util::sync::CancellationToken;

use common::{harness, write_taskfile};
use taskdag::errors::TaskError;
use taskdag::platform;
use taskdag::taskfile::{read_taskfile, validate, Call, Var, Vars};

type TestResult = Result<(), Box<dyn Error>>;

#[tokio::test]
async fn included_tasks_gain_a_namespace_prefix() -> TestResult {
    let tmp = tempfile::tempdir()?;
    fs::create_dir(tmp.path().join("lib"))?;
    write_taskfile(
        tmp.path(),
        r#"
version: "2"
includes:
  lib: ./lib
tasks:
  default:
    cmds:
      - task: lib:test
"#,
    );
    fs::write(
        tmp.path().join("lib/Taskfile.yml"),
        r#"
version: "2"
tasks:
  test:
    cmds:
      - echo lib-test
"#,
    )?;

    let h = harness(tmp.path());
    let token = CancellationToken::new();
    h.executor.run(&token, &[Call::new("lib:test")]).await?;
    assert_eq!(h.stdout(), "lib-test\n");

    // The root task reaches it through the same qualified name.
    let h = harness(tmp.path());
    h.executor.run(&token, &[Call::new("default")]).await?;
    assert_eq!(h.stdout(), "lib-test\n");
    Ok(())
}

#[tokio::test]
async fn dot_prefixed_includes_flat_merge() -> TestResult {
    let tmp = tempfile::tempdir()?;
    fs::create_dir(tmp.path().join("lib"))?;
    write_taskfile(
        tmp.path(),
        r#"
version: "2"
includes:
  .lib: ./lib
tasks:
  default:
    cmds: ["echo root"]
"#,
    );
    fs::write(
        tmp.path().join("lib/Taskfile.yml"),
        r#"
version: "2"
tasks:
  test:
    cmds:
      - echo flat-test
"#,
    )?;

    let h = harness(tmp.path());
    let token = CancellationToken::new();
    h.executor.run(&token, &[Call::new("test")]).await?;
    assert_eq!(h.stdout(), "flat-test\n");
    Ok(())
}

#[tokio::test]
async fn included_file_sees_parent_vars_but_keeps_its_own() -> TestResult {
    let tmp = tempfile::tempdir()?;
    fs::create_dir(tmp.path().join("lib"))?;
    write_taskfile(
        tmp.path(),
        r#"
version: "2"
vars:
  FROM_ROOT: "root-value"
  SHARED: "root"
includes:
  lib: ./lib
tasks: {}
"#,
    );
    fs::write(
        tmp.path().join("lib/Taskfile.yml"),
        r#"
version: "2"
vars:
  SHARED: "lib"
tasks:
  show:
    cmds:
      - echo {{ FROM_ROOT }}/{{ SHARED }}
"#,
    )?;

    let h = harness(tmp.path());
    let token = CancellationToken::new();
    h.executor.run(&token, &[Call::new("lib:show")]).await?;
    assert_eq!(h.stdout(), "root-value/lib\n");
    Ok(())
}

#[tokio::test]
async fn os_overlay_shadows_base_tasks() -> TestResult {
    let tmp = tempfile::tempdir()?;
    write_taskfile(
        tmp.path(),
        r#"
version: "2"
tasks:
  greet:
    cmds: ["echo generic"]
"#,
    );
    fs::write(
        tmp.path()
            .join(format!("Taskfile_{}.yml", platform::os_identifier())),
        r#"
version: "2"
tasks:
  greet:
    cmds: ["echo host-specific"]
"#,
    )?;

    let h = harness(tmp.path());
    let token = CancellationToken::new();
    h.executor.run(&token, &[Call::new("greet")]).await?;
    assert_eq!(h.stdout(), "host-specific\n");
    Ok(())
}

#[tokio::test]
async fn taskvars_feed_global_variables() -> TestResult {
    let tmp = tempfile::tempdir()?;
    fs::write(tmp.path().join("Taskvars.yml"), "REGION: eu-west-1\n")?;
    write_taskfile(
        tmp.path(),
        r#"
version: "2"
tasks:
  show:
    cmds:
      - echo {{ REGION }}
"#,
    );

    let taskvars = taskdag::taskfile::read_taskvars(tmp.path())?;
    assert_eq!(taskvars.get("REGION"), Some(&Var::Static("eu-west-1".into())));

    let taskfile = read_taskfile(&tmp.path().join("Taskfile.yml"), &taskvars)?;
    validate(&taskfile)?;
    assert_eq!(
        taskfile.tasks["show"].taskfile_vars.get("REGION"),
        Some(&Var::Static("eu-west-1".into()))
    );
    Ok(())
}

#[test]
fn version_mismatch_between_includes_fails() {
    let tmp = tempfile::tempdir().unwrap();
    fs::create_dir(tmp.path().join("lib")).unwrap();
    write_taskfile(
        tmp.path(),
        "version: \"2\"\nincludes:\n  lib: ./lib\ntasks: {}\n",
    );
    fs::write(
        tmp.path().join("lib/Taskfile.yml"),
        "version: \"1\"\ntasks:\n  t:\n    cmds: [\"echo\"]\n",
    )
    .unwrap();

    let err = read_taskfile(&tmp.path().join("Taskfile.yml"), &Vars::new())
        .expect_err("version mismatch must fail");
    assert!(matches!(err, TaskError::VersionMismatch { .. }));
}

#[test]
fn missing_include_target_is_reported() {
    let tmp = tempfile::tempdir().unwrap();
    write_taskfile(
        tmp.path(),
        "version: \"2\"\nincludes:\n  lib: ./nowhere\ntasks: {}\n",
    );

    let err = read_taskfile(&tmp.path().join("Taskfile.yml"), &Vars::new())
        .expect_err("missing include must fail");
    assert!(matches!(err, TaskError::IncludeNotFound { .. }));
}

#[test]
fn bare_mapping_file_reads_as_version_1() {
    let tmp = tempfile::tempdir().unwrap();
    write_taskfile(tmp.path(), "build:\n  cmds:\n    - echo built\n");

    let tf = read_taskfile(&tmp.path().join("Taskfile.yml"), &Vars::new()).unwrap();
    assert_eq!(tf.version, "1");
    assert!(tf.tasks.contains_key("build"));
}

#[tokio::test]
async fn internal_tasks_reject_direct_calls() -> TestResult {
    let tmp = tempfile::tempdir()?;
    write_taskfile(
        tmp.path(),
        r#"
version: "2"
tasks:
  helper:
    internal: true
    cmds: ["echo hidden"]
  public:
    cmds:
      - task: helper
"#,
    );

    let h = harness(tmp.path());
    let token = CancellationToken::new();
    let err = h
        .executor
        .run(&token, &[Call::new("helper")])
        .await
        .expect_err("internal task is not callable");
    assert!(matches!(err, TaskError::TaskInternal(_)));

    // But it still runs as a sub-call of a public task.
    let h = harness(tmp.path());
    h.executor.run(&token, &[Call::new("public")]).await?;
    assert_eq!(h.stdout(), "hidden\n");
    Ok(())
}

#[tokio::test]
async fn rooted_references_escape_the_namespace() -> TestResult {
    let tmp = tempfile::tempdir()?;
    fs::create_dir(tmp.path().join("lib"))?;
    write_taskfile(
        tmp.path(),
        r#"
version: "2"
includes:
  lib: ./lib
tasks:
  toolchain:
    cmds: ["echo root-toolchain"]
"#,
    );
    fs::write(
        tmp.path().join("lib/Taskfile.yml"),
        r#"
version: "2"
tasks:
  build:
    deps: [":toolchain"]
    cmds: ["echo lib-build"]
"#,
    )?;

    let h = harness(tmp.path());
    let token = CancellationToken::new();
    h.executor.run(&token, &[Call::new("lib:build")]).await?;
    assert_eq!(h.stdout(), "root-toolchain\nlib-build\n");
    Ok(())
}
