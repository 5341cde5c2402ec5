//! Polling tail reader: turns an append-only file into newly written lines.

use std::{
    io,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use {
    tokio::{
        fs::File,
        io::{AsyncReadExt, AsyncSeekExt, SeekFrom},
    },
    tokio_util::sync::CancellationToken,
    tracing::{debug, info, warn},
};

#[cfg(feature = "metrics")]
use gatekeeper_metrics::{counter, labels, tail as tail_metrics};

use crate::{
    Result,
    cursor::{CursorStore, LogSource, Observation},
    locator::LogLocator,
};

/// A fragment longer than this without a newline is emitted as a line anyway.
const MAX_PENDING_BYTES: usize = 1024 * 1024;

/// Follows one log file (or one daily series of files) from a persisted cursor.
pub struct TailReader {
    name: Arc<str>,
    locator: Box<dyn LogLocator>,
    cursors: Arc<dyn CursorStore>,
    cursor: Option<LogSource>,
    /// Bytes after the last newline of the previous read.
    pending: Vec<u8>,
    missing_reported: bool,
}

impl TailReader {
    pub fn new(
        name: impl Into<Arc<str>>,
        locator: impl LogLocator + 'static,
        cursors: Arc<dyn CursorStore>,
    ) -> Self {
        Self {
            name: name.into(),
            locator: Box::new(locator),
            cursors,
            cursor: None,
            pending: Vec::new(),
            missing_reported: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn shared_name(&self) -> Arc<str> {
        Arc::clone(&self.name)
    }

    pub fn locator(&self) -> &dyn LogLocator {
        self.locator.as_ref()
    }

    /// Current cursor, `None` until the reader has been opened.
    pub fn cursor(&self) -> Option<&LogSource> {
        self.cursor.as_ref()
    }

    /// Wait until the live file exists, then load its persisted cursor.
    ///
    /// Probes every `probe_interval`. Returns `false` if cancelled first.
    pub async fn open(
        &mut self,
        probe_interval: Duration,
        cancel: &CancellationToken,
    ) -> Result<bool> {
        loop {
            let path = self.locator.locate();
            if stat_path(&path).await?.is_some() {
                self.switch_to(path).await?;
                return Ok(true);
            }
            if !self.missing_reported {
                info!(reader = %self.name, path = %path.display(), "waiting for log file to appear");
                self.missing_reported = true;
            }
            tokio::select! {
                () = cancel.cancelled() => return Ok(false),
                () = tokio::time::sleep(probe_interval) => {},
            }
        }
    }

    /// Size of the followed file, `None` if it does not exist.
    pub async fn stat(&self) -> Result<Option<u64>> {
        let path = match &self.cursor {
            Some(cursor) => cursor.path.clone(),
            None => self.locator.locate(),
        };
        stat_path(&path).await
    }

    /// Read everything appended since the last poll and return its non-empty lines.
    ///
    /// When the locator points at a new file (daily rollover), the previous
    /// file is drained once before switching.
    pub async fn poll(&mut self) -> Result<Vec<String>> {
        let live = self.locator.locate();
        let mut lines = Vec::new();

        match self.cursor.as_ref().map(|c| c.path.clone()) {
            Some(path) if path == live => {},
            Some(previous) => {
                match self.read_new().await {
                    Ok(mut drained) => lines.append(&mut drained),
                    Err(e) => {
                        warn!(reader = %self.name, path = %previous.display(), error = %e, "failed to drain previous log file");
                    },
                }
                if let Some(line) = take_fragment(&mut self.pending) {
                    lines.push(line);
                }
                info!(
                    reader = %self.name,
                    from = %previous.display(),
                    to = %live.display(),
                    "switching to new log file"
                );
                self.switch_to(live).await?;
            },
            None => self.switch_to(live).await?,
        }

        match self.read_new().await {
            Ok(mut fresh) => {
                lines.append(&mut fresh);
                Ok(lines)
            },
            Err(e) if !lines.is_empty() => {
                warn!(reader = %self.name, error = %e, "read failed after draining previous file");
                Ok(lines)
            },
            Err(e) => Err(e),
        }
    }

    async fn switch_to(&mut self, path: PathBuf) -> Result<()> {
        let cursor = self
            .cursors
            .load(&path)
            .await?
            .unwrap_or_else(|| LogSource::new(&path));
        debug!(
            reader = %self.name,
            path = %path.display(),
            offset = cursor.byte_offset,
            "following log file"
        );
        self.cursor = Some(cursor);
        self.pending.clear();
        self.missing_reported = false;
        Ok(())
    }

    async fn read_new(&mut self) -> Result<Vec<String>> {
        let Some(cursor) = self.cursor.as_mut() else {
            return Ok(Vec::new());
        };

        let Some(size) = stat_path(&cursor.path).await? else {
            if !self.missing_reported {
                warn!(reader = %self.name, path = %cursor.path.display(), "log file is missing");
                self.missing_reported = true;
            }
            return Ok(Vec::new());
        };
        self.missing_reported = false;

        let (start, end) = match cursor.observe(size) {
            Observation::Unchanged => return Ok(Vec::new()),
            Observation::Grown { start, end } => (start, end),
            Observation::Rotated { end } => {
                warn!(
                    reader = %self.name,
                    path = %cursor.path.display(),
                    size = end,
                    "log file shrank below cursor, restarting from byte 0"
                );
                #[cfg(feature = "metrics")]
                counter!(tail_metrics::ROTATIONS_TOTAL, labels::SOURCE => self.name.to_string())
                    .increment(1);
                self.pending.clear();
                (0, end)
            },
        };

        let mut lines = Vec::new();
        let mut consumed = start;
        if end > start {
            let bytes = read_range(&cursor.path, start, end).await?;
            // The file may have been truncated between stat and read.
            consumed = start + bytes.len() as u64;
            lines = split_lines(&mut self.pending, &bytes);

            #[cfg(feature = "metrics")]
            {
                counter!(tail_metrics::BYTES_TOTAL, labels::SOURCE => self.name.to_string())
                    .increment(bytes.len() as u64);
                counter!(tail_metrics::LINES_TOTAL, labels::SOURCE => self.name.to_string())
                    .increment(lines.len() as u64);
            }
        }

        cursor.commit(consumed);
        if let Err(e) = self.cursors.save(cursor).await {
            warn!(reader = %self.name, error = %e, "failed to persist log cursor");
        }
        Ok(lines)
    }
}

async fn stat_path(path: &Path) -> Result<Option<u64>> {
    match tokio::fs::metadata(path).await {
        Ok(meta) => Ok(Some(meta.len())),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

async fn read_range(path: &Path, start: u64, end: u64) -> Result<Vec<u8>> {
    let mut file = File::open(path).await?;
    file.seek(SeekFrom::Start(start)).await?;
    let len = end - start;
    let mut buf = Vec::with_capacity(len as usize);
    file.take(len).read_to_end(&mut buf).await?;
    Ok(buf)
}

/// Append `chunk` to the carried fragment and return the complete lines.
fn split_lines(pending: &mut Vec<u8>, chunk: &[u8]) -> Vec<String> {
    pending.extend_from_slice(chunk);
    let Some(last_newline) = pending.iter().rposition(|&b| b == b'\n') else {
        return if pending.len() > MAX_PENDING_BYTES {
            take_fragment(pending).into_iter().collect()
        } else {
            Vec::new()
        };
    };
    let rest = pending.split_off(last_newline + 1);
    let complete = std::mem::replace(pending, rest);
    complete.split(|&b| b == b'\n').filter_map(clean_line).collect()
}

fn take_fragment(pending: &mut Vec<u8>) -> Option<String> {
    let fragment = std::mem::take(pending);
    clean_line(&fragment)
}

fn clean_line(raw: &[u8]) -> Option<String> {
    let text = String::from_utf8_lossy(raw);
    let text = text.trim().trim_start_matches('\u{feff}').trim();
    (!text.is_empty()).then(|| text.to_string())
}
