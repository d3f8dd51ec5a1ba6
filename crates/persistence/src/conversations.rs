//! Completed-turn logs

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Local, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::io::AsyncWriteExt;
use voice_chat_core::{ConversationLog, ConversationRecord, Result};

use crate::PersistenceError;

/// On-disk shape of one turn
#[derive(Debug, Serialize)]
struct StoredTurn<'a> {
    user_input: &'a str,
    ai_response: &'a str,
    timestamp: String,
    role: &'a str,
    session_id: Option<&'a str>,
}

impl<'a> From<&'a ConversationRecord> for StoredTurn<'a> {
    fn from(record: &'a ConversationRecord) -> Self {
        Self {
            user_input: &record.user_input,
            ai_response: &record.ai_response,
            timestamp: local_time(record.timestamp).format("%Y-%m-%d %H:%M:%S").to_string(),
            role: &record.role_id,
            session_id: record.session_id.as_deref(),
        }
    }
}

fn local_time(timestamp: DateTime<Utc>) -> DateTime<Local> {
    timestamp.with_timezone(&Local)
}

/// Writes `conversation_<yyyymmdd_hhmmss_micros>.json` per turn
pub struct JsonFileConversationLog {
    directory: PathBuf,
}

impl JsonFileConversationLog {
    /// Open the log, creating the directory if needed
    pub async fn create(directory: impl AsRef<Path>) -> std::result::Result<Self, PersistenceError> {
        let directory = directory.as_ref().to_path_buf();
        if directory.as_os_str().is_empty() {
            return Err(PersistenceError::InvalidDirectory("empty path".to_string()));
        }
        tokio::fs::create_dir_all(&directory).await?;
        Ok(Self { directory })
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    fn file_stem(record: &ConversationRecord) -> String {
        format!(
            "conversation_{}",
            local_time(record.timestamp).format("%Y%m%d_%H%M%S_%6f")
        )
    }

    async fn write(&self, record: &ConversationRecord) -> std::result::Result<PathBuf, PersistenceError> {
        let body = serde_json::to_vec_pretty(&StoredTurn::from(record))?;
        let stem = Self::file_stem(record);

        let mut suffix = 0u32;
        loop {
            let name = if suffix == 0 {
                format!("{}.json", stem)
            } else {
                format!("{}_{}.json", stem, suffix)
            };
            let path = self.directory.join(name);

            match tokio::fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
                .await
            {
                Ok(mut file) => {
                    file.write_all(&body).await?;
                    file.flush().await?;
                    return Ok(path);
                }
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => suffix += 1,
                Err(e) => return Err(e.into()),
            }
        }
    }
}

#[async_trait]
impl ConversationLog for JsonFileConversationLog {
    async fn record(&self, record: &ConversationRecord) -> Result<()> {
        let path = self.write(record).await?;
        tracing::debug!(path = %path.display(), role = %record.role_id, "Turn logged");
        Ok(())
    }
}

/// Keeps records in memory
#[derive(Default)]
pub struct InMemoryConversationLog {
    records: Mutex<Vec<ConversationRecord>>,
}

impl InMemoryConversationLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything logged so far
    pub fn records(&self) -> Vec<ConversationRecord> {
        self.records.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }
}

#[async_trait]
impl ConversationLog for InMemoryConversationLog {
    async fn record(&self, record: &ConversationRecord) -> Result<()> {
        self.records.lock().push(record.clone());
        Ok(())
    }
}
