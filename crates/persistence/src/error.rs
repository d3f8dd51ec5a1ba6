//! Persistence errors

use thiserror::Error;

#[derive(Error, Debug)]
pub enum PersistenceError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid log directory: {0}")]
    InvalidDirectory(String),
}

impl From<PersistenceError> for voice_chat_core::Error {
    fn from(err: PersistenceError) -> Self {
        voice_chat_core::Error::collaborator("conversation_log", err)
    }
}
