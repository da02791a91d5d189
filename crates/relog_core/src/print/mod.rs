//! Console/log output with automatic secret redaction.
//!
//! Anything that qualifies as a secret (tokens, passwords, derived keys)
//! registers itself via [`redact`]; every message printed through the
//! [`info!`], [`err!`] and [`pt!`] macros is passed through
//! [`auto_redact`] before it reaches the console or the in-memory log.

use std::fmt::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{LazyLock, Mutex, RwLock};

mod macros;

/// Whether messages are echoed to stdout/stderr.
/// Tests and embedders may turn this off; the log buffer still fills.
static ENABLE_PRINT: AtomicBool = AtomicBool::new(true);

/// Secrets to mask in every outgoing message. Only ever grows;
/// the set is small (a handful of tokens per login attempt).
static SECRETS: LazyLock<RwLock<Vec<String>>> = LazyLock::new(|| RwLock::new(Vec::new()));

/// In-memory log, already redacted. Exposed for bug reports.
static LOG: LazyLock<Mutex<String>> = LazyLock::new(|| Mutex::new(String::new()));

#[derive(Clone, Copy, Debug)]
pub enum LogType {
    Info,
    Error,
    Point,
}

pub fn is_print() -> bool {
    ENABLE_PRINT.load(Ordering::Acquire)
}

pub fn set_print(enable: bool) {
    ENABLE_PRINT.store(enable, Ordering::Release);
}

/// Registers a secret value so it never appears in any log output.
/// Short values are skipped: masking 1-3 char strings would mangle
/// unrelated text without hiding anything of worth.
pub fn redact(value: &str) {
    if value.len() < 4 {
        return;
    }
    if let Ok(mut secrets) = SECRETS.write() {
        if !secrets.iter().any(|s| s == value) {
            secrets.push(value.to_owned());
        }
    }
}

/// Replaces every registered secret in `msg` with `[REDACTED]`.
#[must_use]
pub fn auto_redact(msg: &str) -> String {
    let Ok(secrets) = SECRETS.read() else {
        return msg.to_owned();
    };
    let mut out = msg.to_owned();
    for secret in secrets.iter() {
        if out.contains(secret.as_str()) {
            out = out.replace(secret.as_str(), "[REDACTED]");
        }
    }
    out
}

/// Appends a redacted message to the in-memory log.
pub fn print_to_log(msg: &str, kind: LogType) {
    let prefix = match kind {
        LogType::Info => "[info]",
        LogType::Error => "[error]",
        LogType::Point => "-",
    };
    if let Ok(mut log) = LOG.lock() {
        let now = chrono::Local::now().format("%H:%M:%S");
        // Writing to a String cannot fail.
        let _ = writeln!(log, "[{now}] {prefix} {msg}");
    }
}

/// Returns a copy of the in-memory log (already redacted).
#[must_use]
pub fn get_log() -> String {
    LOG.lock().map(|l| l.clone()).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redacts_registered_secrets() {
        redact("super-secret-token-value");
        let out = auto_redact("got token super-secret-token-value from provider");
        assert_eq!(out, "got token [REDACTED] from provider");
    }

    #[test]
    fn short_values_are_not_registered() {
        redact("abc");
        let out = auto_redact("abcdef");
        assert_eq!(out, "abcdef");
    }

    #[test]
    fn log_buffer_collects_messages() {
        print_to_log("hello from the test", LogType::Info);
        assert!(get_log().contains("hello from the test"));
    }
}
