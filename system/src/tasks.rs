use async_trait::async_trait;
use thiserror::Error;

use crate::message::{Task, TaskPayload};

#[derive(Debug, Error)]
pub enum TaskError {
    #[error("task rejected: {0}")]
    Rejected(String),
    #[error("task service unavailable: {0}")]
    Unavailable(String),
}

/// The external task service. It owns all task state; this core only relays
/// lifecycle events around a successful creation call.
#[async_trait]
pub trait TaskService: Send + Sync {
    async fn create_task(&self, payload: TaskPayload) -> Result<Task, TaskError>;
}

/// Single-process stand-in for the task service. Assigns ids and echoes the
/// payload back as the created task.
pub struct LocalTaskService;

impl LocalTaskService {
    pub fn new() -> Self {
        Self
    }
}

impl Default for LocalTaskService {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TaskService for LocalTaskService {
    async fn create_task(&self, payload: TaskPayload) -> Result<Task, TaskError> {
        let has_title = payload
            .fields
            .get("title")
            .and_then(|v| v.as_str())
            .map_or(false, |title| !title.is_empty());
        if !has_title {
            return Err(TaskError::Rejected("a task needs a title".to_owned()));
        }
        Ok(Task {
            id: uuid::Uuid::new_v4().to_string(),
            project_id: payload.project_id,
            fields: payload.fields,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn payload(fields: serde_json::Value) -> TaskPayload {
        TaskPayload {
            project_id: "p1".to_owned(),
            fields: fields.as_object().cloned().unwrap_or_default(),
        }
    }

    #[tokio::test]
    async fn created_tasks_get_an_id_and_keep_their_fields() {
        let service = LocalTaskService::new();
        let task = service
            .create_task(payload(json!({"title": "ship it", "status": "todo"})))
            .await
            .unwrap();
        assert!(!task.id.is_empty());
        assert_eq!(task.project_id, "p1");
        assert_eq!(task.fields.get("status"), Some(&json!("todo")));
    }

    #[tokio::test]
    async fn untitled_tasks_are_rejected() {
        let service = LocalTaskService::new();
        let result = service.create_task(payload(json!({"status": "todo"}))).await;
        assert!(matches!(result, Err(TaskError::Rejected(_))));
    }
}
