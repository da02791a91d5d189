use std::path::PathBuf;

use thiserror::Error;

/// An I/O error together with the path it happened at.
///
/// Produced via [`IntoIoError::path`]:
///
/// ```ignore
/// std::fs::read(&file).path(&file)?;
/// ```
#[derive(Debug, Error)]
#[error("i/o error at {}: {error}", path.display())]
pub struct IoError {
    pub error: std::io::Error,
    pub path: PathBuf,
}

pub trait IntoIoError<T> {
    /// Attaches a path to an `std::io::Error`.
    fn path(self, path: impl Into<PathBuf>) -> Result<T, IoError>;
}

impl<T> IntoIoError<T> for Result<T, std::io::Error> {
    fn path(self, path: impl Into<PathBuf>) -> Result<T, IoError> {
        self.map_err(|error| IoError {
            error,
            path: path.into(),
        })
    }
}

/// A JSON (de)serialization error with a truncated excerpt of the
/// offending document for diagnostics.
#[derive(Debug, Error)]
#[error("json error: {error}{}", excerpt.as_deref().map(|e| format!(" (in: {e})")).unwrap_or_default())]
pub struct JsonError {
    pub error: serde_json::Error,
    pub excerpt: Option<String>,
}

pub trait IntoJsonError<T> {
    /// Attaches a document excerpt to a deserialization error.
    fn json(self, document: String) -> Result<T, JsonError>;
    /// For serialization errors, where no input document exists.
    fn json_to(self) -> Result<T, JsonError>;
}

impl<T> IntoJsonError<T> for Result<T, serde_json::Error> {
    fn json(self, document: String) -> Result<T, JsonError> {
        self.map_err(|error| JsonError {
            error,
            excerpt: Some(truncate(&document)),
        })
    }

    fn json_to(self) -> Result<T, JsonError> {
        self.map_err(|error| JsonError {
            error,
            excerpt: None,
        })
    }
}

fn truncate(document: &str) -> String {
    const LIMIT: usize = 256;
    if document.len() <= LIMIT {
        document.to_owned()
    } else {
        let mut end = LIMIT;
        while !document.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}...", &document[..end])
    }
}

/// Either of the two things that can go wrong with a JSON file on disk.
#[derive(Debug, Error)]
pub enum JsonFileError {
    #[error(transparent)]
    Io(#[from] IoError),
    #[error(transparent)]
    Json(#[from] JsonError),
}

/// HTTP request failure.
#[derive(Debug, Error)]
pub enum RequestError {
    #[error("received status {code} from {url}")]
    DownloadError {
        code: reqwest::StatusCode,
        url: Box<reqwest::Url>,
    },
    #[error(transparent)]
    ReqwestError(#[from] reqwest::Error),
}
