//! Error types
//!
//! Every failure in a run falls into one of four kinds. None of them is
//! recovered from: the driver logs the error once and exits with status 1.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// The params file is unreadable, malformed, or incomplete
    #[error("Configuration error: {0}")]
    Config(String),

    /// No credential in the chain could produce an access token
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// Resource Graph rejected a request, or the transport failed
    #[error("Query failed: {0}")]
    Query(String),

    /// The export file could not be written
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    pub fn auth(message: impl Into<String>) -> Self {
        Self::Auth(message.into())
    }

    pub fn query(message: impl Into<String>) -> Self {
        Self::Query(message.into())
    }
}

impl From<csv::Error> for Error {
    fn from(err: csv::Error) -> Self {
        match err.into_kind() {
            csv::ErrorKind::Io(io) => Self::Io(io),
            other => Self::Io(std::io::Error::other(format!("{other:?}"))),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
