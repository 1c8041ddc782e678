use thiserror::Error;

use dumbcas_types::{Digest, DigestParseError};

pub type Result<T> = std::result::Result<T, DumbcasError>;

#[derive(Debug, Error)]
pub enum DumbcasError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("blob not found: {0}")]
    BlobNotFound(Digest),

    #[error(transparent)]
    InvalidDigest(#[from] DigestParseError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("failed to read input list '{path}': {message}")]
    InputList { path: String, message: String },

    #[error("was interrupted")]
    Interrupted,

    #[error("{0}")]
    Other(String),
}
