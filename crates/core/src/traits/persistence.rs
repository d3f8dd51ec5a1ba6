//! Conversation log trait

use async_trait::async_trait;

use crate::{ConversationRecord, Result};

/// Sink for completed turns
///
/// Called exactly once per completed agent round-trip. Failures are logged
/// by the caller and never affect the conversation.
#[async_trait]
pub trait ConversationLog: Send + Sync + 'static {
    async fn record(&self, record: &ConversationRecord) -> Result<()>;
}
