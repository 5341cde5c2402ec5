//! Resolution of the file a reader should currently follow.

use std::path::{Path, PathBuf};

use chrono::{Local, NaiveDate};

/// Tells a reader which file is the live one right now.
pub trait LogLocator: Send + Sync {
    /// Path of the file currently being appended to.
    fn locate(&self) -> PathBuf;

    /// Directory to watch for change notifications.
    fn watch_dir(&self) -> Option<PathBuf> {
        self.locate().parent().map(Path::to_path_buf)
    }
}

/// A single fixed file.
#[derive(Debug, Clone)]
pub struct FixedPath(pub PathBuf);

impl LogLocator for FixedPath {
    fn locate(&self) -> PathBuf {
        self.0.clone()
    }
}

/// One file per local calendar day: `<directory>/<prefix>_<YYYY-MM-DD>.log`.
#[derive(Debug, Clone)]
pub struct DailyFiles {
    directory: PathBuf,
    prefix: String,
}

impl DailyFiles {
    pub fn new(directory: impl Into<PathBuf>, prefix: impl Into<String>) -> Self {
        Self {
            directory: directory.into(),
            prefix: prefix.into(),
        }
    }

    pub fn path_for(&self, date: NaiveDate) -> PathBuf {
        self.directory
            .join(format!("{}_{}.log", self.prefix, date.format("%Y-%m-%d")))
    }
}

impl LogLocator for DailyFiles {
    fn locate(&self) -> PathBuf {
        self.path_for(Local::now().date_naive())
    }

    fn watch_dir(&self) -> Option<PathBuf> {
        Some(self.directory.clone())
    }
}

#[allow(clippy::unwrap_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn daily_file_name_uses_prefix_and_iso_date() {
        let files = DailyFiles::new("/srv/scum/logs", "login");
        let date = NaiveDate::from_ymd_opt(2026, 3, 7).unwrap();
        assert_eq!(
            files.path_for(date),
            PathBuf::from("/srv/scum/logs/login_2026-03-07.log")
        );
    }

    #[test]
    fn fixed_path_watches_parent() {
        let fixed = FixedPath(PathBuf::from("/tmp/game/chat.log"));
        assert_eq!(fixed.watch_dir(), Some(PathBuf::from("/tmp/game")));
    }
}
