//! Error types for the sheet_export crate.

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while authenticating, talking to the Google APIs, or
/// writing exports.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Credentials file '{}' not found; run with --setup for instructions", .path.display())]
    CredentialsFileMissing { path: PathBuf },

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("API request failed ({}): {message}", .status.map_or_else(|| "no status".to_string(), |s| s.to_string()))]
    ApiRequest { status: Option<u16>, message: String },

    #[error("Worksheet '{0}' appears to be empty")]
    EmptyWorksheet(String),

    #[error("Failed to parse configuration: {0}")]
    ConfigParse(String),

    #[error("Filesystem error at '{}': {source}", .path.display())]
    Filesystem {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

impl Error {
    pub(crate) fn filesystem(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Filesystem {
            path: path.into(),
            source,
        }
    }

    /// Whether this error should stop the whole invocation rather than a
    /// single item.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::CredentialsFileMissing { .. } | Error::AuthenticationFailed(_)
        )
    }
}

/// Result type alias for [`Error`].
pub type Result<T> = std::result::Result<T, Error>;
