//! Error types for feed resolution, sync and state mutations.

use reqwest::StatusCode;
use thiserror::Error;

/// Failure resolving a single feed through the proxy.
///
/// Never surfaces past the aggregator: a failed feed contributes nothing.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("proxy returned {0}")]
    Status(StatusCode),
    #[error("proxy reported status '{status}': {message}")]
    Proxy { status: String, message: String },
}

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("invalid token ({0})")]
    InvalidToken(StatusCode),
    #[error("unexpected status {status}: {body}")]
    Status { status: StatusCode, body: String },
    #[error("malformed remote document: {0}")]
    Payload(#[from] serde_json::Error),
    #[error("local store error: {0}")]
    Store(#[from] anyhow::Error),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MutationError {
    #[error("folder name is empty")]
    EmptyName,
    #[error("folder '{0}' already exists")]
    DuplicateFolder(String),
    #[error("folder id '{0}' is reserved")]
    ReservedFolder(String),
    #[error("folder '{0}' not found")]
    UnknownFolder(String),
    #[error("feed '{0}' not found")]
    UnknownFeed(String),
    #[error("feed url is empty")]
    EmptyUrl,
    #[error("invalid setting: {0}")]
    InvalidSetting(String),
}

/// Failure of a user action applied through the reader.
#[derive(Debug, Error)]
pub enum ReaderError {
    #[error(transparent)]
    Mutation(#[from] MutationError),
    #[error("local store error: {0}")]
    Store(#[from] anyhow::Error),
}
