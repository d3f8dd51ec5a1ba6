//! Conversation log storage
//!
//! Provides:
//! - JSON file log: one pretty-printed file per completed turn
//! - In-memory log for tests and for running with file logging disabled

pub mod conversations;
pub mod error;

pub use conversations::{InMemoryConversationLog, JsonFileConversationLog};
pub use error::PersistenceError;

use std::sync::Arc;

use voice_chat_config::ConversationLogConfig;
use voice_chat_core::ConversationLog;

/// Build the log selected by configuration
pub async fn init(config: &ConversationLogConfig) -> Result<Arc<dyn ConversationLog>, PersistenceError> {
    if !config.enabled {
        tracing::info!("Conversation file log disabled, keeping records in memory");
        return Ok(Arc::new(InMemoryConversationLog::new()));
    }

    let log = JsonFileConversationLog::create(&config.directory).await?;
    tracing::info!(directory = %config.directory, "Conversation log ready");
    Ok(Arc::new(log))
}
