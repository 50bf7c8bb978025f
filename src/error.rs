//! Error types for vipscan.
//!
//! Scanner outcomes (rate limiting, transport failures, last page) are not
//! errors: they are values of the scanners' outcome enums. The types here
//! cover persistence, join dispatch, and process startup.

use thiserror::Error;

/// Failure reading or writing the key-value store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("store document is not a JSON object")]
    NotAnObject,
}

/// Failure to hand a listing to the game client.
#[derive(Debug, Error)]
pub enum JoinError {
    /// Host launching was requested but no launcher is configured.
    #[error("no host context available to launch the game")]
    MissingHostContext,

    #[error("listing with access code is not on the current page")]
    UnknownListing,

    #[error("listing has no access code")]
    MissingAccessCode,

    #[error("host launcher failed: {0}")]
    Launch(String),
}

/// Errors raised while building the application.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("HTTP client error: {0}")]
    HttpClient(#[from] reqwest::Error),

    #[error("Invalid header value: {0}")]
    InvalidHeader(#[from] reqwest::header::InvalidHeaderValue),

    #[error("Invalid listing URL: {0}")]
    InvalidUrl(String),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Template error: {0}")]
    Template(#[from] tera::Error),
}
