// crates/common/src/error.rs
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Missing metric columns, invalid settings, foreign weight key sets
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Data unavailable: {0}")]
    DataUnavailable(String),

    #[error("Normalization failed: {0}")]
    Normalization(String),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Invalid data: {0}")]
    InvalidData(String),
}

impl Error {
    /// Errors that abort the current cycle outright
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::Config(_) | Error::Persistence(_) | Error::Io(_)
        )
    }

    /// Errors a cycle can absorb by degrading (zero reward, uniform weights)
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Error::DataUnavailable(_) | Error::Normalization(_))
    }
}
