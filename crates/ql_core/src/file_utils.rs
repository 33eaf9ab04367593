use std::{
    ffi::OsString,
    path::{Path, PathBuf},
    sync::LazyLock,
};

use tokio::io::AsyncWriteExt;

use crate::{err, IntoIoError, IoError, RequestError};

/// Environment variable to put the launcher directory somewhere else.
pub const LAUNCHER_DIR_ENV: &str = "QL_LAUNCHER_DIR";

/// The launcher directory.
///
/// - Windows: `%APPDATA%/QuantumLauncher`
/// - Linux: `~/.local/share/QuantumLauncher`
/// - macOS: `~/Library/Application Support/QuantumLauncher`
///
/// Falls back to `./QuantumLauncher` if the data directory can't be
/// found, so that the launcher still works in odd environments.
pub static LAUNCHER_DIR: LazyLock<PathBuf> = LazyLock::new(|| match get_launcher_dir() {
    Ok(n) => n,
    Err(error) => {
        err!(no_log, "{error}");
        PathBuf::from("QuantumLauncher")
    }
});

/// Finds the launcher directory without creating it.
///
/// # Errors
/// If `QL_LAUNCHER_DIR` isn't set and the platform
/// data directory can't be determined.
pub fn get_launcher_dir() -> Result<PathBuf, IoError> {
    if let Some(dir) = std::env::var_os(LAUNCHER_DIR_ENV).filter(|n| !n.is_empty()) {
        return Ok(PathBuf::from(dir));
    }
    dirs::data_dir()
        .map(|n| n.join("QuantumLauncher"))
        .ok_or(IoError::LauncherDirNotFound)
}

/// Returns `Err` for any non-2xx response.
///
/// # Errors
/// If the status code isn't a success.
pub fn check_for_success(response: &reqwest::Response) -> Result<(), RequestError> {
    if response.status().is_success() {
        Ok(())
    } else {
        Err(RequestError::DownloadError {
            code: response.status(),
            url: response.url().clone(),
        })
    }
}

/// `path` with `suffix` appended to the file name
/// (`session.json` + `.tmp` = `session.json.tmp`).
#[must_use]
pub fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name: OsString = path.as_os_str().to_owned();
    name.push(suffix);
    PathBuf::from(name)
}

/// Replaces the file at `path` with `contents` so that
/// readers only ever see the old or the new file, never a half-written one.
///
/// Writes a sibling `.tmp` file, syncs it and renames it over `path`.
///
/// # Errors
/// If the directory can't be created, or the temp file
/// can't be written or renamed.
pub async fn write_atomic(path: &Path, contents: &[u8]) -> Result<(), IoError> {
    if let Some(parent) = path.parent().filter(|n| !n.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await.path(parent)?;
    }

    let tmp = with_suffix(path, ".tmp");
    let mut file = tokio::fs::File::create(&tmp).await.path(&tmp)?;
    file.write_all(contents).await.path(&tmp)?;
    file.sync_all().await.path(&tmp)?;
    drop(file);

    if let Err(error) = tokio::fs::rename(&tmp, path).await {
        _ = tokio::fs::remove_file(&tmp).await;
        return Err(error).path(path);
    }
    Ok(())
}

/// Reads a file, treating a missing file as empty.
///
/// # Errors
/// For any read error other than "not found".
pub async fn read_or_empty(path: &Path) -> Result<Vec<u8>, IoError> {
    match tokio::fs::read(path).await {
        Ok(n) => Ok(n),
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
        Err(error) => Err(error).path(path),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn atomic_write_replaces_and_cleans_up() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("doc.json");

        write_atomic(&path, b"first").await.unwrap();
        write_atomic(&path, b"second").await.unwrap();

        assert_eq!(tokio::fs::read(&path).await.unwrap(), b"second");
        assert!(!with_suffix(&path, ".tmp").exists());
    }

    #[tokio::test]
    async fn missing_file_reads_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        let bytes = read_or_empty(&dir.path().join("nope.json")).await.unwrap();
        assert!(bytes.is_empty());
    }
}
