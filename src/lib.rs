//! Export Google Sheets worksheets from a user's Drive to local CSV files.

pub mod args;
pub mod auth;
pub mod cfg;
pub mod cli;
pub mod credential;
pub mod csv_sink;
pub mod error;
pub mod job;
pub mod loopback;
pub mod oauth;
pub mod persist;
pub mod prompt;
pub mod setup;
pub mod sheets;

pub use auth::{CredentialManager, GoogleCredentialManager, StaticToken, TokenSource};
pub use cfg::{ConfigStore, Settings};
pub use credential::{ClientSecret, Credential};
pub use error::{Error, Result};
pub use job::{BatchSummary, ExportSummary, Exporter};
pub use sheets::{GoogleClient, SheetsApi, SpreadsheetRef, WorksheetRef};
