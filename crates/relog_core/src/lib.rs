//! Shared plumbing for the relog workspace: error vocabulary,
//! logging macros with secret redaction, the data directory and
//! the shared HTTP client.

use std::path::PathBuf;
use std::sync::LazyLock;

mod error;
pub mod print;

pub use error::{
    IntoIoError, IntoJsonError, IoError, JsonError, JsonFileError, RequestError,
};

/// User agent sent with every outgoing request.
pub const USER_AGENT: &str = concat!("relog/", env!("CARGO_PKG_VERSION"));

/// Shared HTTP client. Per-request timeouts are set at the call sites,
/// so the client itself carries only the user agent.
pub static CLIENT: LazyLock<reqwest::Client> = LazyLock::new(|| {
    reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .build()
        .unwrap_or_default()
});

/// Data directory of the account switcher
/// (`<platform data dir>/relog`, current directory as a last resort).
///
/// Holds the binary account store, the config file and nothing else.
pub static RELOG_DIR: LazyLock<PathBuf> = LazyLock::new(|| {
    let base = dirs::data_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."));
    base.join("relog")
});
