use std::path::PathBuf;

use thiserror::Error;

/// How much of a broken JSON document is kept in error messages.
const JSON_ERR_PREVIEW: usize = 256;

#[derive(Debug, Error)]
pub enum IoError {
    #[error("at path {path:?}: {error}")]
    Io {
        error: std::io::Error,
        path: PathBuf,
    },
    #[error("couldn't find the launcher directory (set QL_LAUNCHER_DIR to override)")]
    LauncherDirNotFound,
}

pub trait IntoIoError<T> {
    /// Attaches the path that the failed operation was working on.
    #[allow(clippy::missing_errors_doc)]
    fn path(self, p: impl Into<PathBuf>) -> Result<T, IoError>;
}

impl<T> IntoIoError<T> for Result<T, std::io::Error> {
    fn path(self, p: impl Into<PathBuf>) -> Result<T, IoError> {
        self.map_err(|error| IoError::Io {
            error,
            path: p.into(),
        })
    }
}

#[derive(Debug, Error)]
pub enum JsonError {
    #[error("couldn't parse JSON: {error}\n{json}")]
    From {
        error: serde_json::Error,
        json: String,
    },
    #[error("couldn't serialize JSON: {error}")]
    To { error: serde_json::Error },
}

pub trait IntoJsonError<T> {
    /// For errors while *parsing*. `json` is the input,
    /// a short preview of it is kept for the error message.
    #[allow(clippy::missing_errors_doc)]
    fn json(self, json: String) -> Result<T, JsonError>;
    /// For errors while *serializing*.
    #[allow(clippy::missing_errors_doc)]
    fn json_to(self) -> Result<T, JsonError>;
}

impl<T> IntoJsonError<T> for Result<T, serde_json::Error> {
    fn json(self, mut json: String) -> Result<T, JsonError> {
        self.map_err(|error| {
            if json.len() > JSON_ERR_PREVIEW {
                let mut end = JSON_ERR_PREVIEW;
                while !json.is_char_boundary(end) {
                    end -= 1;
                }
                json.truncate(end);
                json.push_str("...");
            }
            JsonError::From { error, json }
        })
    }

    fn json_to(self) -> Result<T, JsonError> {
        self.map_err(|error| JsonError::To { error })
    }
}

#[derive(Debug, Error)]
pub enum JsonFileError {
    #[error(transparent)]
    Io(#[from] IoError),
    #[error(transparent)]
    Json(#[from] JsonError),
    #[error("document failed validation: {0}")]
    Invalid(String),
}

#[derive(Debug, Error)]
pub enum RequestError {
    #[error("request to {url} failed with code {code}")]
    DownloadError {
        code: reqwest::StatusCode,
        url: reqwest::Url,
    },
    #[error("request error: {0}")]
    ReqwestError(#[from] reqwest::Error),
}
