// src/error.rs

//! Error types for catalog updates
//!
//! [`Error`] is the crate-wide error. Failures of an update attempt that a
//! caller needs to tell apart (transport, HTTP status, validation, parse) are
//! carried by [`UpdateError`] and its [`UpdateErrorKind`].

use std::fmt;
use thiserror::Error;

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;

/// Crate-wide error type
#[derive(Error, Debug)]
pub enum Error {
    #[error("Initialization error: {0}")]
    InitError(String),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("I/O error: {0}")]
    IoError(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    Update(#[from] UpdateError),

    /// The caller raised the cancel token; the attempt was rolled back
    #[error("Update cancelled")]
    Cancelled,
}

impl Error {
    /// The update error kind, if this error came out of the update pipeline
    pub fn update_kind(&self) -> Option<UpdateErrorKind> {
        match self {
            Error::Update(e) => Some(e.kind),
            _ => None,
        }
    }
}

/// Classification of a failed update attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UpdateErrorKind {
    /// Transport-level failure before any response was judged meaningful
    Network,
    /// Response status other than success or not-modified
    HttpStatus,
    /// Timestamp regression, signer shape violation or fingerprint mismatch
    Validation,
    /// Malformed catalog payload
    Parse,
}

impl fmt::Display for UpdateErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UpdateErrorKind::Network => write!(f, "network"),
            UpdateErrorKind::HttpStatus => write!(f, "http-status"),
            UpdateErrorKind::Validation => write!(f, "validation"),
            UpdateErrorKind::Parse => write!(f, "parse"),
        }
    }
}

/// A typed update failure with an optional underlying cause
#[derive(Error, Debug)]
#[error("{kind} error: {message}")]
pub struct UpdateError {
    pub kind: UpdateErrorKind,
    pub message: String,
    #[source]
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl UpdateError {
    pub fn new(kind: UpdateErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            source: None,
        }
    }

    /// Attach the error that caused this failure
    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(UpdateErrorKind::Network, message)
    }

    pub fn http_status(status: u16) -> Self {
        Self::new(UpdateErrorKind::HttpStatus, format!("server responded with status {status}"))
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(UpdateErrorKind::Validation, message)
    }

    pub fn parse(message: impl Into<String>) -> Self {
        Self::new(UpdateErrorKind::Parse, message)
    }
}
