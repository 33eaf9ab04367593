//! Settings for the account session core

use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use ql_core::{err, LAUNCHER_DIR};
use serde::{Deserialize, Serialize};

/// Auth servers added on first start.
pub const DEFAULT_ENDPOINTS: &[&str] = &[
    "https://littleskin.cn/api/yggdrasil",
    "https://authserver.ely.by/api/authlib-injector",
];

const CONFIG_FILE: &str = "auth_config.json";

/// Settings for the account session core, stored in
/// `QuantumLauncher/auth_config.json`.
///
/// # Why `Option`?
///
/// Every field is optional so that the file can be partial
/// (or absent). Missing fields use the defaults documented on
/// the `c_*` accessors.
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct SessionConfig {
    /// Where the session document lives.
    pub session_file: Option<PathBuf>,
    /// Where older launcher versions kept accounts. The first
    /// existing one is copied over if `session_file` doesn't exist.
    pub legacy_files: Option<Vec<PathBuf>>,
    /// How long to wait after a change before saving,
    /// so bursts of changes are one write.
    pub persist_debounce_ms: Option<u64>,
    /// Auth server API urls added on first start.
    pub default_endpoints: Option<Vec<String>>,
    pub request_timeout_secs: Option<u64>,
    /// Service name under which tokens are kept in the system keyring.
    pub keyring_service: Option<String>,
    /// Directory the defaults above are relative to.
    /// Not stored, set by [`SessionConfig::in_dir`].
    #[serde(skip)]
    pub base_dir: Option<PathBuf>,
}

impl SessionConfig {
    /// Loads `QuantumLauncher/auth_config.json`.
    ///
    /// Like the launcher config, this doesn't fail:
    /// a missing or broken file gives the defaults
    /// (with an error log if it was broken).
    pub async fn load() -> Self {
        Self::load_from(&LAUNCHER_DIR.join(CONFIG_FILE)).await
    }

    pub async fn load_from(path: &Path) -> Self {
        let text = match tokio::fs::read_to_string(path).await {
            Ok(n) => n,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => return Self::default(),
            Err(error) => {
                err!("Couldn't read {path:?}, using default auth settings: {error}");
                return Self::default();
            }
        };
        match serde_json::from_str(&text) {
            Ok(n) => n,
            Err(error) => {
                err!("Invalid auth config {path:?}, using defaults: {error}");
                Self::default()
            }
        }
    }

    /// Defaults, with all files under `dir` instead of the launcher directory.
    #[must_use]
    pub fn in_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: Some(dir.into()),
            ..Self::default()
        }
    }

    fn c_base_dir(&self) -> &Path {
        self.base_dir.as_deref().unwrap_or(LAUNCHER_DIR.as_path())
    }

    /// Default: `<launcher dir>/auth/session.json`
    #[must_use]
    pub fn c_session_file(&self) -> PathBuf {
        self.session_file
            .clone()
            .unwrap_or_else(|| self.c_base_dir().join("auth").join("session.json"))
    }

    /// Default: `<launcher dir>/accounts.json`
    #[must_use]
    pub fn c_legacy_files(&self) -> Vec<PathBuf> {
        self.legacy_files
            .clone()
            .unwrap_or_else(|| vec![self.c_base_dir().join("accounts.json")])
    }

    /// Default: 250ms
    #[must_use]
    pub fn c_persist_debounce(&self) -> Duration {
        Duration::from_millis(self.persist_debounce_ms.unwrap_or(250))
    }

    /// Default: [`DEFAULT_ENDPOINTS`]
    #[must_use]
    pub fn c_default_endpoints(&self) -> Vec<String> {
        self.default_endpoints.clone().unwrap_or_else(|| {
            DEFAULT_ENDPOINTS
                .iter()
                .map(|n| (*n).to_owned())
                .collect()
        })
    }

    /// Default: 30s
    #[must_use]
    pub fn c_request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.unwrap_or(30))
    }

    /// Default: `"QuantumLauncher"`
    #[must_use]
    pub fn c_keyring_service(&self) -> String {
        self.keyring_service
            .clone()
            .unwrap_or_else(|| "QuantumLauncher".to_owned())
    }
}
