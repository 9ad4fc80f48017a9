//! Watch mode is implemented as a three-part system:
//!
//! 1. **File watcher**: Uses the `notify` crate to monitor the roots of the
//!    watched selectors recursively, debounced so that rapid saves trigger
//!    one rerun.
//! 2. **Rules**: Every changed path is matched against the [`WatchRule`]s.
//!    A matching rule names the task to rerun through the [`Runner`], or
//!    only asks for a reload.
//! 3. **Reload bridge**: When a [`ReloadBridge`] is attached, connected
//!    browsers are told to reload after the reruns finished.
//!
//! Reruns go through the same runner as the initial build, so the
//! fingerprint caches held by the tasks keep them incremental.

use std::borrow::Cow;
use std::collections::{BTreeSet, HashSet};
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use notify::{EventKind, RecursiveMode};
use notify_debouncer_full::new_debouncer;

use super::Runner;
use super::reload::ReloadBridge;
use crate::error::WatchError;
use crate::globs::Selector;

/// Reacts to changes of the files picked by a selector.
#[derive(Debug, Clone)]
pub struct WatchRule {
    pub selector: Selector,
    /// Task to rerun; `None` only triggers a reload.
    pub task: Option<Cow<'static, str>>,
}

impl WatchRule {
    pub fn run(selector: &Selector, task: impl Into<Cow<'static, str>>) -> Self {
        Self {
            selector: selector.clone(),
            task: Some(task.into()),
        }
    }

    pub fn reload(selector: &Selector) -> Self {
        Self {
            selector: selector.clone(),
            task: None,
        }
    }
}

/// Blocks forever, rerunning tasks as their sources change.
pub fn watch(
    runner: &Runner,
    rules: &[WatchRule],
    bridge: Option<&ReloadBridge>,
) -> Result<(), WatchError> {
    let env = runner.env();

    let watched: HashSet<Utf8PathBuf> = rules
        .iter()
        .map(|rule| env.path(&rule.selector.root))
        .filter(|path| path.is_dir())
        .collect();

    let watched = collapse_watch_paths(watched);
    if watched.is_empty() {
        return Err(WatchError::Empty);
    }

    let (tx, rx) = std::sync::mpsc::channel();
    let mut debouncer = new_debouncer(Duration::from_millis(250), None, tx)?;

    for path in &watched {
        tracing::info!("watching {}", path);
        debouncer.watch(path, RecursiveMode::Recursive)?;
    }

    loop {
        let events = match rx.recv()? {
            Ok(events) => events,
            Err(errors) => {
                for e in errors {
                    tracing::error!("watch error: {:?}", e);
                }
                continue;
            }
        };

        let changed: BTreeSet<Utf8PathBuf> = events
            .iter()
            .filter(|de| !matches!(de.event.kind, EventKind::Access(_)))
            .flat_map(|de| &de.event.paths)
            .filter_map(|path| Utf8Path::from_path(path))
            .filter_map(|path| path.strip_prefix(&env.root).ok())
            .map(Utf8Path::to_owned)
            .collect();

        let (tasks, reload) = triage(rules, &changed);
        if tasks.is_empty() && !reload {
            continue;
        }

        tracing::info!("change detected, re-running tasks...");
        for task in &tasks {
            if let Err(e) = runner.run(task) {
                tracing::error!("Error running '{}': {}", task, e);
            }
        }

        if let Some(bridge) = bridge {
            bridge.signal();
        }
        tracing::info!("rebuild complete, watching for changes...");
    }
}

/// Tasks to rerun, in rule order without repeats, and whether anything
/// relevant changed at all.
fn triage<'r>(rules: &'r [WatchRule], changed: &BTreeSet<Utf8PathBuf>) -> (Vec<&'r str>, bool) {
    let mut tasks = Vec::new();
    let mut hit = false;

    for rule in rules {
        if !changed.iter().any(|path| rule.selector.matches(path)) {
            continue;
        }
        hit = true;

        if let Some(task) = rule.task.as_deref()
            && !tasks.contains(&task)
        {
            tasks.push(task);
        }
    }

    (tasks, hit)
}

/// Reduces a set of paths to the minimal set of watch roots.
///
/// If we watch `/a` and `/a/b`, we only need to watch `/a` because
/// the watcher is recursive. This function sorts the paths and filters
/// out any path that is a subdirectory of a previously accepted path.
fn collapse_watch_paths(paths: HashSet<Utf8PathBuf>) -> Vec<Utf8PathBuf> {
    let mut paths: Vec<_> = paths.into_iter().collect();
    paths.sort();

    let mut filtered = Vec::new();
    for path in paths {
        if let Some(last) = filtered.last()
            && path.starts_with(last)
        {
            continue;
        }
        filtered.push(path);
    }

    filtered
}
