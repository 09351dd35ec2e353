use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::fs;
use tokio::sync::Mutex;

use system::{CanvasSnapshot, ChatMessage, DocumentStore, ProjectId, StoreError};

/// Document store backed by JSON files under one data directory: a chat log
/// and a canvas snapshot per project. Stands in for the external document
/// database. The engine spawns one task per write, so writes are serialized
/// through a lock and land via rename; readers never see a torn file.
pub struct FileStore {
    dir: PathBuf,
    write_lock: Mutex<()>,
}

impl FileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            write_lock: Mutex::new(()),
        }
    }

    fn chat_path(&self, project_id: &ProjectId) -> PathBuf {
        self.dir.join(format!("{}.chat.json", file_stem(project_id)))
    }

    fn canvas_path(&self, project_id: &ProjectId) -> PathBuf {
        self.dir
            .join(format!("{}.canvas.json", file_stem(project_id)))
    }

    async fn read_log(&self, project_id: &ProjectId) -> Result<Vec<ChatMessage>, StoreError> {
        match fs::read(self.chat_path(project_id)).await {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(err) => Err(err.into()),
        }
    }

    async fn write_atomic(&self, path: &Path, bytes: Vec<u8>) -> Result<(), StoreError> {
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, bytes).await?;
        fs::rename(&tmp, path).await?;
        Ok(())
    }
}

/// Project ids are opaque; keep file names to a safe alphabet.
fn file_stem(project_id: &ProjectId) -> String {
    project_id
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

#[async_trait]
impl DocumentStore for FileStore {
    async fn chat_history(&self, project_id: &ProjectId) -> Result<Vec<ChatMessage>, StoreError> {
        let mut messages = self.read_log(project_id).await?;
        messages.sort_by_key(|m| m.timestamp);
        Ok(messages)
    }

    async fn insert_message(&self, message: &ChatMessage) -> Result<(), StoreError> {
        // Appending is a read-modify-write of the whole log; interleaved
        // writers would drop each other's messages.
        let _guard = self.write_lock.lock().await;
        fs::create_dir_all(&self.dir).await?;
        let mut messages = self.read_log(&message.project_id).await?;
        messages.push(message.clone());
        let bytes = serde_json::to_vec(&messages)?;
        self.write_atomic(&self.chat_path(&message.project_id), bytes)
            .await?;
        Ok(())
    }

    async fn find_canvas(
        &self,
        project_id: &ProjectId,
    ) -> Result<Option<CanvasSnapshot>, StoreError> {
        match fs::read(self.canvas_path(project_id)).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    async fn upsert_canvas(
        &self,
        project_id: &ProjectId,
        canvas_data: Value,
        last_updated: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;
        fs::create_dir_all(&self.dir).await?;
        let snapshot = CanvasSnapshot {
            project_id: project_id.clone(),
            canvas_data,
            last_updated,
        };
        let bytes = serde_json::to_vec(&snapshot)?;
        self.write_atomic(&self.canvas_path(project_id), bytes)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn message(text: &str, secs: i64) -> ChatMessage {
        ChatMessage {
            project_id: "p/1".to_owned(),
            sender: "u1".to_owned(),
            sender_username: "ada".to_owned(),
            message: text.to_owned(),
            timestamp: Utc.timestamp_opt(secs, 0).unwrap(),
        }
    }

    #[tokio::test]
    async fn messages_round_trip_in_timestamp_order() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path());
        let project = "p/1".to_owned();

        store.insert_message(&message("late", 20)).await.unwrap();
        store.insert_message(&message("early", 10)).await.unwrap();

        let history = store.chat_history(&project).await.unwrap();
        let texts: Vec<&str> = history.iter().map(|m| m.message.as_str()).collect();
        assert_eq!(texts, vec!["early", "late"]);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn concurrent_inserts_keep_every_message_and_a_parseable_log() {
        let dir = tempfile::tempdir().unwrap();
        let store = std::sync::Arc::new(FileStore::new(dir.path()));
        let project = "p/1".to_owned();

        // The engine spawns one persistence task per sendMessage; the log
        // must survive them landing at the same time.
        let mut writers = Vec::new();
        for i in 0..50i64 {
            let store = std::sync::Arc::clone(&store);
            writers.push(tokio::spawn(async move {
                store.insert_message(&message(&format!("m{}", i), i)).await
            }));
        }
        for writer in writers {
            writer.await.unwrap().unwrap();
        }

        let history = store.chat_history(&project).await.unwrap();
        assert_eq!(history.len(), 50);
        let texts: Vec<&str> = history.iter().map(|m| m.message.as_str()).collect();
        assert_eq!(texts[0], "m0");
        assert_eq!(texts[49], "m49");
    }

    #[tokio::test]
    async fn missing_files_mean_empty_history_and_no_canvas() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path());
        let project = "fresh".to_owned();

        assert!(store.chat_history(&project).await.unwrap().is_empty());
        assert_eq!(store.find_canvas(&project).await.unwrap(), None);
    }

    #[tokio::test]
    async fn canvas_upsert_overwrites_in_place() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path());
        let project = "p1".to_owned();

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
}
