//! Loader Error Types
//!
//! This module provides structured errors using `exn` for automatic location
//! tracking and error tree construction.

use derive_more::{Display, Error};

/// A loader error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for loader operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// These describe what the caller should *do*, not what went wrong
/// internally. The staleness check depends on the distinction between the
/// first two: an unreadable file is worth another attempt on the next scan,
/// an unrecognized format is not.
#[derive(Debug, Display, Error, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// The file vanished or could not be read.
    #[display("unreadable file: {_0}")]
    Unreadable(#[error(not(source))] String),
    /// No provider knows the recorded format.
    #[display("unknown format: {_0}")]
    UnknownFormat(#[error(not(source))] String),
    /// The file was read but its content could not be turned into nuts.
    #[display("malformed content in file: {_0}")]
    MalformedContent(#[error(not(source))] String),
    /// A source failed to refresh its inventory.
    #[display("inventory refresh failed")]
    Inventory,
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            ErrorKind::Unreadable(_) | ErrorKind::Inventory => true,
            ErrorKind::UnknownFormat(_) | ErrorKind::MalformedContent(_) => false,
        }
    }
}
