//! Reading the launcher's log files (and crash reports, which
//! are just another directory of text files).
//!
//! Reads of the same file are collapsed with [`SingleFlight`],
//! so a UI that asks for the same log from several places
//! only hits the disk once.

use std::{path::PathBuf, sync::Arc};

use thiserror::Error;

use crate::{guard::SingleFlight, LAUNCHER_DIR};

#[derive(Debug, Clone, Error)]
pub enum LogReadError {
    #[error("invalid log file name: {0:?}")]
    InvalidName(String),
    #[error("couldn't read log {path:?}: {error}")]
    Io {
        path: PathBuf,
        error: Arc<std::io::Error>,
    },
}

type ReadResult = Result<Arc<str>, LogReadError>;

pub struct LogReader {
    dir: PathBuf,
    reads: SingleFlight<ReadResult>,
}

impl LogReader {
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            reads: SingleFlight::new(),
        }
    }

    /// Reader for `<launcher dir>/logs`, where
    /// [`init_log_file`](crate::print::init_log_file) writes.
    #[must_use]
    pub fn launcher_logs() -> Self {
        Self::new(LAUNCHER_DIR.join("logs"))
    }

    /// File names in the directory, newest name first.
    /// A missing directory is an empty list.
    ///
    /// # Errors
    /// If the directory exists but can't be listed.
    pub async fn list(&self) -> Result<Vec<String>, LogReadError> {
        let io_err = |error| LogReadError::Io {
            path: self.dir.clone(),
            error: Arc::new(error),
        };
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(n) => n,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(error) => return Err(io_err(error)),
        };

        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(io_err)? {
            if entry.file_type().await.is_ok_and(|n| n.is_file()) {
                names.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        names.sort_unstable_by(|a, b| b.cmp(a));
        Ok(names)
    }

    /// Reads one file by name. Invalid UTF-8 is replaced, not rejected.
    ///
    /// # Errors
    /// - `name` isn't a plain file name (`..`, separators)
    /// - the file couldn't be read
    pub async fn read(&self, name: &str) -> ReadResult {
        if name.is_empty() || name == "." || name == ".." || name.contains(['/', '\\']) {
            return Err(LogReadError::InvalidName(name.to_owned()));
        }
        let path = self.dir.join(name);
        self.reads
            .run(name, move || async move {
                match tokio::fs::read(&path).await {
                    Ok(bytes) => Ok(Arc::from(String::from_utf8_lossy(&bytes).as_ref())),
                    Err(error) => Err(LogReadError::Io {
                        path,
                        error: Arc::new(error),
                    }),
                }
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn lists_and_reads() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(dir.path().join("2024-01-01.log"), "old")
            .await
            .unwrap();
        tokio::fs::write(dir.path().join("2024-02-01.log"), "new")
            .await
            .unwrap();

        let reader = LogReader::new(dir.path());
        assert_eq!(
            reader.list().await.unwrap(),
            vec!["2024-02-01.log".to_owned(), "2024-01-01.log".to_owned()]
        );

        let (a, b) = tokio::join!(reader.read("2024-02-01.log"), reader.read("2024-02-01.log"));
        assert_eq!(&*a.unwrap(), "new");
        assert_eq!(&*b.unwrap(), "new");
    }

    #[tokio::test]
    async fn rejects_paths() {
        let reader = LogReader::new("logs");
        assert!(matches!(
            reader.read("../secret").await,
            Err(LogReadError::InvalidName(_))
        ));
    }

    #[tokio::test]
    async fn missing_dir_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let reader = LogReader::new(dir.path().join("crash-reports"));
        assert!(reader.list().await.unwrap().is_empty());
    }
}
