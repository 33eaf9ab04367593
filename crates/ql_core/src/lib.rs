//! # Shared utilities for the Quantum Launcher account core
//!
//! **Not recommended to use in your own projects!**
//!
//! This crate contains:
//! - Logging macros ([`info!`], [`pt!`], [`warn!`], [`err!`])
//!   with secret redaction and an optional log file
//! - Error types for file and JSON I/O
//! - The launcher directory and the shared HTTP [`CLIENT`]
//! - [`json_store`]: crash-safe typed JSON documents with
//!   legacy-path migration and tolerant decoding
//! - [`guard`]: per-key mutual exclusion and single-flight
//! - [`read_log`]: reading the launcher's own log files

use std::sync::LazyLock;

mod error;
pub mod file_utils;
pub mod guard;
pub mod json_store;
pub mod print;
pub mod read_log;

pub use error::{
    IntoIoError, IntoJsonError, IoError, JsonError, JsonFileError, RequestError,
};
pub use file_utils::LAUNCHER_DIR;
pub use owo_colors;

/// The shared HTTP client. Reuse this instead of
/// creating new clients, it keeps a connection pool.
pub static CLIENT: LazyLock<reqwest::Client> = LazyLock::new(|| {
    reqwest::Client::builder()
        .user_agent(concat!("QuantumLauncher/", env!("CARGO_PKG_VERSION")))
        .build()
        .unwrap_or_else(|error| {
            err!("Couldn't build HTTP client, using defaults: {error}");
            reqwest::Client::new()
        })
});
