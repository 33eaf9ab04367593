//! Log sinks behind the [`info!`](crate::info), [`pt!`](crate::pt),
//! [`warn!`](crate::warn) and [`err!`](crate::err) macros.
//!
//! Every message goes through [`auto_redact`] first, then:
//! - to the terminal (unless disabled with [`set_print`])
//! - to an in-memory ring buffer, see [`get_logs`]
//! - to `<launcher dir>/logs/<timestamp>.log`, once
//!   [`init_log_file`] has been called (skipped by `no_log` variants)

use std::{
    collections::VecDeque,
    fmt::Display,
    fs::File,
    io::Write,
    path::PathBuf,
    sync::{
        atomic::{AtomicBool, Ordering},
        LazyLock, Mutex, PoisonError,
    },
};

use regex::Regex;

use crate::{IntoIoError, IoError, LAUNCHER_DIR};

#[macro_use]
mod macros;

const MEMORY_LOG_LIMIT: usize = 2000;

static PRINT: AtomicBool = AtomicBool::new(true);

/// Git Bash on Windows doesn't show stderr properly.
pub static IS_GIT_BASH: LazyLock<bool> = LazyLock::new(|| {
    cfg!(target_os = "windows") && std::env::var_os("MSYSTEM").is_some()
});

static LOGGER: LazyLock<Mutex<Logger>> = LazyLock::new(|| {
    Mutex::new(Logger {
        memory: VecDeque::new(),
        file: None,
    })
});

struct Logger {
    memory: VecDeque<(String, LogType)>,
    file: Option<File>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogType {
    Info,
    Point,
    Warn,
    Error,
}

impl Display for LogType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}",
            match self {
                LogType::Info => "[info]",
                LogType::Point => "-",
                LogType::Warn => "[warn]",
                LogType::Error => "[error]",
            }
        )
    }
}

#[must_use]
pub fn is_print() -> bool {
    PRINT.load(Ordering::Relaxed)
}

/// Turns terminal output on or off. Logs are still kept in memory.
pub fn set_print(enabled: bool) {
    PRINT.store(enabled, Ordering::Relaxed);
}

/// Starts mirroring logs into a new file in `<launcher dir>/logs`.
///
/// Returns the path of the file.
///
/// # Errors
/// If the logs directory or the file couldn't be created.
pub fn init_log_file() -> Result<PathBuf, IoError> {
    let dir = LAUNCHER_DIR.join("logs");
    std::fs::create_dir_all(&dir).path(&dir)?;
    let name = chrono::Local::now().format("%Y-%m-%d-%H-%M-%S.log").to_string();
    let path = dir.join(name);
    let file = File::create(&path).path(&path)?;

    let mut logger = LOGGER.lock().unwrap_or_else(PoisonError::into_inner);
    logger.file = Some(file);
    Ok(path)
}

pub fn print_to_memory(msg: &str, t: LogType) {
    let mut logger = LOGGER.lock().unwrap_or_else(PoisonError::into_inner);
    if logger.memory.len() >= MEMORY_LOG_LIMIT {
        logger.memory.pop_front();
    }
    logger.memory.push_back((msg.to_owned(), t));
}

pub fn print_to_file(msg: &str, t: LogType) {
    print_to_memory(msg, t);

    let mut logger = LOGGER.lock().unwrap_or_else(PoisonError::into_inner);
    if let Some(file) = &mut logger.file {
        let time = chrono::Local::now().format("%H:%M:%S");
        if writeln!(file, "{time} {t} {msg}").is_err() {
            // Disk full or file gone, stop trying
            logger.file = None;
        }
    }
}

/// Returns a copy of the in-memory log, oldest first.
#[must_use]
pub fn get_logs() -> Vec<(String, LogType)> {
    LOGGER
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .memory
        .iter()
        .cloned()
        .collect()
}

static REDACTIONS: LazyLock<Vec<(Regex, &'static str)>> = LazyLock::new(|| {
    [
        (
            r#"("(?:accessToken|clientToken|refreshToken|password)"\s*:\s*")[^"]*(")"#,
            "${1}[REDACTED]${2}",
        ),
        (r"(Bearer\s+)\S+", "${1}[REDACTED]"),
        (
            r"eyJ[A-Za-z0-9_-]{8,}\.[A-Za-z0-9_-]{8,}\.[A-Za-z0-9_-]*",
            "[REDACTED]",
        ),
    ]
    .into_iter()
    .filter_map(|(pattern, replacement)| Regex::new(pattern).ok().map(|n| (n, replacement)))
    .collect()
});

/// Hides tokens and passwords that may end up in log messages
/// (JSON request bodies, `Authorization` headers, JWTs).
#[must_use]
pub fn auto_redact(msg: &str) -> String {
    let mut out = msg.to_owned();
    for (regex, replacement) in REDACTIONS.iter() {
        if regex.is_match(&out) {
            out = regex.replace_all(&out, *replacement).into_owned();
        }
    }
    out
}
