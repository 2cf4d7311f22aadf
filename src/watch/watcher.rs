// src/watch/watcher.rs

use std::collections::{BTreeSet, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use notify::{Config, RecommendedWatcher, RecursiveMode, Watcher as _};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::errors::{Result, TaskError};
use crate::executor::Executor;
use crate::status::glob;
use crate::taskfile::Call;
use crate::watch::debounce::Debouncer;
use crate::watch::paths;

const DEBOUNCE_WINDOW: Duration = Duration::from_millis(500);

/// Watch all calls until interrupted. Each call is watched by its own
/// coordinator; Ctrl-C cancels them all and any in-flight run.
pub async fn watch_tasks(executor: Arc<Executor>, calls: Vec<Call>) -> Result<()> {
    let interrupted = CancellationToken::new();
    {
        let interrupted = interrupted.clone();
        tokio::spawn(async move {
            if let Err(err) = tokio::signal::ctrl_c().await {
                eprintln!("taskdag: failed to listen for interrupt: {err}");
                return;
            }
            interrupted.cancel();
        });
    }

    watch_tasks_until(executor, calls, interrupted).await
}

/// Watch all calls until `interrupted` fires. Split out from
/// [`watch_tasks`] so callers can supply their own stop signal.
pub async fn watch_tasks_until(
    executor: Arc<Executor>,
    calls: Vec<Call>,
    interrupted: CancellationToken,
) -> Result<()> {
    let mut set = JoinSet::new();
    for call in calls {
        set.spawn(watch_task(
            Arc::clone(&executor),
            interrupted.clone(),
            call,
        ));
    }

    while let Some(joined) = set.join_next().await {
        match joined {
            Ok(Ok(())) => {}
            Ok(Err(err)) => error!(error = %err, "watcher exited with error"),
            Err(err) => error!(error = %err, "watcher panicked"),
        }
    }

    Ok(())
}

/// Kick off one run of a call on a fresh cancellation token. Failures are
/// reported but do not stop the watch loop; cancellation is silent.
fn spawn_run(executor: &Arc<Executor>, call: &Call) -> CancellationToken {
    let token = CancellationToken::new();
    let e = Arc::clone(executor);
    let c = call.clone();
    let t = token.clone();
    tokio::spawn(async move {
        if let Err(err) = e.run_task(t, c).await {
            if !err.is_canceled() {
                e.log_stderr(&format!("task: {err}"));
            }
        }
    });
    token
}

/// State owned by one call's coordinator loop. The notifier handle must be
/// kept alive for registrations to stay active.
struct WatchState {
    notifier: Option<RecommendedWatcher>,
    registered: Vec<String>,
}

async fn watch_task(
    executor: Arc<Executor>,
    interrupted: CancellationToken,
    call: Call,
) -> Result<()> {
    let mut run_token = spawn_run(&executor, &call);
    executor.log_stderr(&format!(r#"task: Started watching "{}""#, call.task));

    let (event_tx, mut event_rx) = mpsc::unbounded_channel::<notify::Event>();
    let mut state = WatchState {
        notifier: None,
        registered: Vec::new(),
    };
    if let Err(err) = rewatch(&executor, &call, &interrupted, &mut state, &event_tx).await {
        run_token.cancel();
        return Err(err);
    }

    let mut debouncer = Debouncer::new(DEBOUNCE_WINDOW);
    let (fire_tx, mut fire_rx) = mpsc::unbounded_channel::<PathBuf>();

    loop {
        tokio::select! {
            maybe_event = event_rx.recv() => {
                let Some(event) = maybe_event else { break };
                debug!(?event, "filesystem event");
                if let Some(path) = event.paths.into_iter().next_back() {
                    let fire_tx = fire_tx.clone();
                    debouncer.schedule(async move {
                        let _ = fire_tx.send(path);
                    });
                }
            }
            Some(path) = fire_rx.recv() => {
                if !is_call_dependency(&executor, &call, &path, &interrupted).await {
                    continue;
                }
                executor.log_stderr(&format!(
                    r#"task: Rerunning "{}" ({} changed)"#,
                    call.task,
                    path.display()
                ));

                run_token.cancel();
                if executor.taskfile.reset_vars_on_rerun {
                    executor.compiler().reset().await;
                }
                run_token = spawn_run(&executor, &call);

                if let Err(err) =
                    rewatch(&executor, &call, &interrupted, &mut state, &event_tx).await
                {
                    run_token.cancel();
                    return Err(err);
                }
            }
            _ = interrupted.cancelled() => {
                run_token.cancel();
                return Ok(());
            }
        }
    }

    run_token.cancel();
    Ok(())
}

/// Recompute the watch-path set for a call and re-register the notifier if
/// it changed. A path that cannot be registered is logged and skipped; the
/// remaining paths stay watched.
async fn rewatch(
    executor: &Arc<Executor>,
    call: &Call,
    token: &CancellationToken,
    state: &mut WatchState,
    event_tx: &mpsc::UnboundedSender<notify::Event>,
) -> Result<()> {
    let watch_paths = task_watch_paths(executor, call, token).await?;
    if watch_paths == state.registered {
        return Ok(());
    }

    let mut notifier = RecommendedWatcher::new(
        {
            let event_tx = event_tx.clone();
            move |res: notify::Result<notify::Event>| match res {
                Ok(event) => {
                    let _ = event_tx.send(event);
                }
                Err(err) => {
                    eprintln!("taskdag: file watch error: {err}");
                }
            }
        },
        Config::default(),
    )
    .map_err(|err| TaskError::Other(anyhow!(err)))?;

    for watch_path in &watch_paths {
        let target = paths::base_dir(watch_path);
        let mode = if watch_path.ends_with(paths::RECURSIVE_SUFFIX) {
            RecursiveMode::Recursive
        } else {
            RecursiveMode::NonRecursive
        };
        debug!(path = %watch_path, "watching");
        if let Err(err) = notifier.watch(Path::new(target), mode) {
            error!(path = %watch_path, error = %err, "unable to watch path");
        }
    }

    // Dropping the previous notifier unregisters its paths.
    state.notifier = Some(notifier);
    state.registered = watch_paths;
    Ok(())
}

/// Union of watch paths over the transitive call tree, reduced and ordered
/// for stable comparison between rewatches.
async fn task_watch_paths(
    executor: &Arc<Executor>,
    call: &Call,
    token: &CancellationToken,
) -> Result<Vec<String>> {
    let tasks = executor.collect_call_tree(call, token).await?;

    let mut all: BTreeSet<String> = BTreeSet::new();
    for task in &tasks {
        let dir = executor.dir.join(&task.dir);
        for p in paths::watch_paths_from_globs(&dir, &task.sources) {
            all.insert(p);
        }
    }

    let mut reduced = paths::reduce_watch_paths(all);
    reduced.sort();
    reduced.reverse();
    Ok(reduced)
}

/// Is `path` one of the source files of the call's tree? Generated files
/// and VCS/vendor noise never count, so a task writing its own outputs does
/// not retrigger itself.
async fn is_call_dependency(
    executor: &Arc<Executor>,
    call: &Call,
    path: &Path,
    token: &CancellationToken,
) -> bool {
    let display = path.to_string_lossy();
    if display.contains("/.git/") || display.contains("/node_modules/") {
        return false;
    }

    let tasks = match executor.collect_call_tree(call, token).await {
        Ok(tasks) => tasks,
        Err(err) => {
            warn!(task = %call.task, error = %err, "unable to compile call tree for watch check");
            return false;
        }
    };

    let mut dependencies: HashSet<PathBuf> = HashSet::new();
    let mut generated: Vec<PathBuf> = Vec::new();

    for task in &tasks {
        let dir = executor.dir.join(&task.dir);
        match glob::glob(&dir, &task.sources) {
            Ok(files) => dependencies.extend(files),
            Err(err) => {
                warn!(task = %task.name, error = %err, "unable to expand sources for watch check");
                return false;
            }
        }
        match glob::glob(&dir, &task.generates) {
            Ok(files) => generated.extend(files),
            Err(err) => {
                warn!(task = %task.name, error = %err, "unable to expand generates for watch check");
                return false;
            }
        }
    }

    for file in generated {
        dependencies.remove(&file);
    }

    if dependencies.contains(path) {
        return true;
    }
    // Notifiers may hand back canonicalized paths.
    path.canonicalize()
        .map(|canonical| dependencies.contains(&canonical))
        .unwrap_or(false)
}
