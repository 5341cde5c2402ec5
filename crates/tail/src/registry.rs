//! Explicit registry of tail readers and their polling loops.
//!
//! Each registered reader gets its own task. Loops share nothing except the
//! output channel, so a failing file never stalls the others.

use std::{collections::HashSet, sync::Arc, time::Duration};

use {
    tokio::{
        sync::{Notify, mpsc},
        task::JoinHandle,
        time::MissedTickBehavior,
    },
    tokio_util::sync::CancellationToken,
    tracing::{debug, info, warn},
};

#[cfg(feature = "metrics")]
use gatekeeper_metrics::{counter, gauge, labels, tail as tail_metrics};

use crate::{Error, Result, reader::TailReader};

/// One line of text together with the reader that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourcedLine {
    pub source: Arc<str>,
    pub line: String,
}

/// Polling cadence shared by all loops of a registry.
#[derive(Debug, Clone, Copy)]
pub struct TailOptions {
    pub poll_interval: Duration,
    pub probe_interval: Duration,
    /// Wake loops early on filesystem notifications (`file-watcher` feature).
    pub watch: bool,
}

impl Default for TailOptions {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            probe_interval: Duration::from_secs(5),
            watch: true,
        }
    }
}

/// Owns the readers before [`ReaderRegistry::spawn`] and their tasks after.
pub struct ReaderRegistry {
    options: TailOptions,
    readers: Vec<TailReader>,
    names: HashSet<Arc<str>>,
    handles: Vec<JoinHandle<()>>,
    cancel: CancellationToken,
    #[cfg(feature = "file-watcher")]
    watcher: Option<crate::watcher::LogWatcher>,
}

impl ReaderRegistry {
    pub fn new(options: TailOptions) -> Self {
        Self {
            options,
            readers: Vec::new(),
            names: HashSet::new(),
            handles: Vec::new(),
            cancel: CancellationToken::new(),
            #[cfg(feature = "file-watcher")]
            watcher: None,
        }
    }

    /// Add a reader. Names must be unique.
    pub fn register(&mut self, reader: TailReader) -> Result<()> {
        if !self.names.insert(reader.shared_name()) {
            return Err(Error::duplicate_reader(reader.name()));
        }
        self.readers.push(reader);
        Ok(())
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.names.iter().map(|n| n.as_ref()).collect();
        names.sort_unstable();
        names
    }

    /// Token cancelled by [`ReaderRegistry::shutdown`].
    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Start one polling loop per registered reader, forwarding lines to `tx`.
    pub fn spawn(&mut self, tx: mpsc::Sender<SourcedLine>) {
        let readers = std::mem::take(&mut self.readers);
        let wakers: Vec<Arc<Notify>> = readers.iter().map(|_| Arc::new(Notify::new())).collect();

        #[cfg(feature = "file-watcher")]
        if self.options.watch {
            let targets = readers
                .iter()
                .zip(&wakers)
                .filter_map(|(reader, waker)| {
                    reader
                        .locator()
                        .watch_dir()
                        .map(|dir| (dir, Arc::clone(waker)))
                })
                .collect();
            match crate::watcher::LogWatcher::start(targets) {
                Ok(watcher) => self.watcher = Some(watcher),
                Err(e) => warn!(error = %e, "file watcher unavailable, relying on interval polling"),
            }
        }

        for (reader, waker) in readers.into_iter().zip(wakers) {
            info!(reader = %reader.name(), "starting tail reader");
            let handle = tokio::spawn(run_reader(
                reader,
                tx.clone(),
                self.options,
                self.cancel.clone(),
                waker,
            ));
            self.handles.push(handle);
        }

        #[cfg(feature = "metrics")]
        gauge!(tail_metrics::READERS_ACTIVE).set(self.handles.len() as f64);
    }

    /// Cancel every loop and wait for them to drop their file handles.
    pub async fn shutdown(mut self) {
        self.cancel.cancel();
        for handle in self.handles.drain(..) {
            if let Err(e) = handle.await {
                warn!(error = %e, "tail reader task ended abnormally");
            }
        }
        #[cfg(feature = "metrics")]
        gauge!(tail_metrics::READERS_ACTIVE).set(0.0);
        info!("tail readers stopped");
    }
}

async fn run_reader(
    mut reader: TailReader,
    tx: mpsc::Sender<SourcedLine>,
    options: TailOptions,
    cancel: CancellationToken,
    wake: Arc<Notify>,
) {
    let source = reader.shared_name();

    loop {
        match reader.open(options.probe_interval, &cancel).await {
            Ok(true) => break,
            Ok(false) => return,
            Err(e) => {
                warn!(reader = %source, error = %e, "failed to open log file, retrying");
                tokio::select! {
                    () = cancel.cancelled() => return,
                    () = tokio::time::sleep(options.probe_interval) => {},
                }
            },
        }
    }

    let mut ticker = tokio::time::interval(options.poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            _ = ticker.tick() => {},
            () = wake.notified() => {},
        }

        match reader.poll().await {
            Ok(lines) => {
                for line in lines {
                    let sourced = SourcedLine {
                        source: Arc::clone(&source),
                        line,
                    };
                    tokio::select! {
                        () = cancel.cancelled() => return,
                        sent = tx.send(sourced) => {
                            if sent.is_err() {
                                debug!(reader = %source, "line consumer dropped, stopping reader");
                                return;
                            }
                        },
                    }
                }
            },
            Err(e) => {
                warn!(reader = %source, error = %e, "tail poll failed, retrying next tick");
                #[cfg(feature = "metrics")]
                counter!(tail_metrics::ERRORS_TOTAL, labels::SOURCE => source.to_string())
                    .increment(1);
            },
        }
    }
    debug!(reader = %source, "tail reader stopped");
}
