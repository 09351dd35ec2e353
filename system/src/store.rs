use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use thiserror::Error;

use crate::message::{CanvasSnapshot, ChatMessage};
use crate::types::ProjectId;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store i/o failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("corrupt document: {0}")]
    Corrupt(#[from] serde_json::Error),
    #[error("store backend: {0}")]
    Backend(String),
}

/// Gateway to the document database: an append-only chat log plus one
/// canvas snapshot per project. The real database lives outside this core;
/// the engine only sees these four operations.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Every persisted message for a project, ascending by timestamp.
    async fn chat_history(&self, project_id: &ProjectId) -> Result<Vec<ChatMessage>, StoreError>;

    async fn insert_message(&self, message: &ChatMessage) -> Result<(), StoreError>;

    async fn find_canvas(
        &self,
        project_id: &ProjectId,
    ) -> Result<Option<CanvasSnapshot>, StoreError>;

    /// Creates the snapshot if absent, otherwise overwrites it. Last writer
    /// wins; there is no compare-and-swap.
    async fn upsert_canvas(
        &self,
        project_id: &ProjectId,
        canvas_data: Value,
        last_updated: DateTime<Utc>,
    ) -> Result<(), StoreError>;
}

/// In-process store used by tests and as a zero-setup default. Locks are
/// never held across an await.
pub struct MemoryStore {
    messages: Mutex<Vec<ChatMessage>>,
    canvases: Mutex<HashMap<ProjectId, CanvasSnapshot>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            messages: Mutex::new(Vec::new()),
            canvases: Mutex::new(HashMap::new()),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn chat_history(&self, project_id: &ProjectId) -> Result<Vec<ChatMessage>, StoreError> {
        let messages = self.messages.lock().expect("poisoned");
        let mut history: Vec<ChatMessage> = messages
            .iter()
            .filter(|m| &m.project_id == project_id)
            .cloned()
            .collect();
        history.sort_by_key(|m| m.timestamp);
        Ok(history)
    }

    async fn insert_message(&self, message: &ChatMessage) -> Result<(), StoreError> {
        self.messages.lock().expect("poisoned").push(message.clone());
        Ok(())
    }

    async fn find_canvas(
        &self,
        project_id: &ProjectId,
    ) -> Result<Option<CanvasSnapshot>, StoreError> {
        Ok(self
            .canvases
            .lock()
            .expect("poisoned")
            .get(project_id)
            .cloned())
    }

    async fn upsert_canvas(
        &self,
        project_id: &ProjectId,
        canvas_data: Value,
        last_updated: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.canvases.lock().expect("poisoned").insert(
            project_id.clone(),
            CanvasSnapshot {
                project_id: project_id.clone(),
                canvas_data,
                last_updated,
            },
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn message(project_id: &str, text: &str, secs: i64) -> ChatMessage {
        ChatMessage {
            project_id: project_id.to_owned(),
            sender: "u1".to_owned(),
            sender_username: "ada".to_owned(),
            message: text.to_owned(),
            timestamp: Utc.timestamp_opt(secs, 0).unwrap(),
        }
    }

    #[tokio::test]
    async fn history_is_sorted_by_timestamp_regardless_of_insertion_order() {
        let store = MemoryStore::new();
        let project = "p1".to_owned();
        store.insert_message(&message("p1", "third", 30)).await.unwrap();
        store.insert_message(&message("p1", "first", 10)).await.unwrap();
        store.insert_message(&message("p2", "other", 15)).await.unwrap();
        store.insert_message(&message("p1", "second", 20)).await.unwrap();

        let history = store.chat_history(&project).await.unwrap();
        let texts: Vec<&str> = history.iter().map(|m| m.message.as_str()).collect();
        assert_eq!(texts, vec!["first", "second", "third"]);
    }

    #[tokio::test]
    async fn upsert_creates_then_overwrites_the_snapshot() {
        let store = MemoryStore::new();
        let project = "p1".to_owned();
        assert_eq!(store.find_canvas(&project).await.unwrap(), None);

        let t1 = Utc.timestamp_opt(10, 0).unwrap();
        store
            .upsert_canvas(&project, json!({"strokes": 1}), t1)
            .await
            .unwrap();
        let t2 = Utc.timestamp_opt(20, 0).unwrap();
        store
            .upsert_canvas(&project, json!({"strokes": 2}), t2)
            .await
            .unwrap();

        let canvas = store.find_canvas(&project).await.unwrap().unwrap();
        assert_eq!(canvas.canvas_data, json!({"strokes": 2}));
        assert_eq!(canvas.last_updated, t2);
    }

    #[tokio::test]
    async fn repeated_clears_leave_the_empty_value() {
        let store = MemoryStore::new();
        let project = "p1".to_owned();
        store
            .upsert_canvas(&project, json!({"strokes": 5}), Utc::now())
            .await
            .unwrap();
        for _ in 0..3 {
            store
                .upsert_canvas(&project, Value::String(String::new()), Utc::now())
                .await
                .unwrap();
        }

        let canvas = store.find_canvas(&project).await.unwrap().unwrap();
        assert_eq!(canvas.canvas_data, Value::String(String::new()));
    }
}
