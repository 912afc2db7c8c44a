use std::io;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ResolverError {
    /// Malformed knowledge base or configuration. Fatal at startup.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The embedding model could not be loaded. Fatal at startup.
    #[error("Model load error: {0}")]
    ModelLoad(String),

    /// A single request failed to embed. Callers degrade to the fallback reply.
    #[error("Inference failure: {0}")]
    Inference(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

impl ResolverError {
    pub fn is_fatal(&self) -> bool {
        !matches!(self, ResolverError::Inference(_))
    }
}

pub type Result<T> = std::result::Result<T, ResolverError>;
