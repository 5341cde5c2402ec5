//! Filesystem watcher that wakes tail loops early.
//!
//! Interval polling stays authoritative; a notification only shortens the
//! wait before the next poll of the readers following the changed directory.

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use {
    notify_debouncer_full::{
        DebounceEventResult, Debouncer, RecommendedCache, new_debouncer,
        notify::{EventKind, RecommendedWatcher, RecursiveMode},
    },
    tokio::sync::Notify,
    tracing::{debug, info, warn},
};

use crate::{Result, error::Context};

/// Keeps the debouncer alive; dropping it stops notifications.
pub struct LogWatcher {
    _debouncer: Debouncer<RecommendedWatcher, RecommendedCache>,
}

impl LogWatcher {
    /// Watch each directory and wake the associated readers on create/modify events.
    pub fn start(targets: Vec<(PathBuf, Arc<Notify>)>) -> Result<Self> {
        let mut wakers: HashMap<PathBuf, Vec<Arc<Notify>>> = HashMap::new();
        for (dir, waker) in targets {
            // Notification paths are absolute.
            let dir = std::fs::canonicalize(&dir).unwrap_or(dir);
            wakers.entry(dir).or_default().push(waker);
        }
        let dirs: Vec<PathBuf> = wakers.keys().cloned().collect();

        let mut debouncer = new_debouncer(
            Duration::from_millis(200),
            None,
            move |result: DebounceEventResult| match result {
                Ok(events) => {
                    for event in events {
                        if !matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_)) {
                            continue;
                        }
                        for path in &event.paths {
                            if let Some(targets) = path.parent().and_then(|dir| wakers.get(dir)) {
                                debug!(path = %path.display(), "log watcher event");
                                targets.iter().for_each(|w| w.notify_one());
                            }
                        }
                    }
                },
                Err(errors) => {
                    for e in errors {
                        warn!(error = %e, "log watcher error");
                    }
                },
            },
        )
        .context("failed to create log watcher")?;

        for dir in &dirs {
            if Path::new(dir).exists() {
                debouncer
                    .watch(dir, RecursiveMode::NonRecursive)
                    .with_context(|| format!("failed to watch {}", dir.display()))?;
                info!(dir = %dir.display(), "log watcher: watching directory");
            } else {
                debug!(dir = %dir.display(), "log directory missing, not watched");
            }
        }

        Ok(Self {
            _debouncer: debouncer,
        })
    }
}
