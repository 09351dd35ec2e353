use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::types::{ProjectId, UserId};

/// Rejected at the transport boundary, before an event reaches the engine.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("missing or empty projectId")]
    MissingProjectId,
}

/// Everything a client may send. Event names and payload field names are the
/// wire contract and must not change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ClientEvent {
    #[serde(rename = "joinProject")]
    JoinProject(JoinProject),
    #[serde(rename = "drawing")]
    Drawing(DrawingPayload),
    #[serde(rename = "clearCanvas")]
    ClearCanvas(ClearCanvasPayload),
    #[serde(rename = "sendMessage")]
    SendMessage(ChatPayload),
    #[serde(rename = "typing")]
    Typing(TypingPayload),
    #[serde(rename = "stopTyping")]
    StopTyping(StopTypingPayload),
    #[serde(rename = "createTask")]
    CreateTask(TaskPayload),
    #[serde(rename = "updateTask")]
    UpdateTask(TaskUpdatePayload),
    #[serde(rename = "deleteTask")]
    DeleteTask(TaskDeletePayload),
}

impl ClientEvent {
    pub fn project_id(&self) -> &ProjectId {
        match self {
            ClientEvent::JoinProject(p) => &p.project_id,
            ClientEvent::Drawing(p) => &p.project_id,
            ClientEvent::ClearCanvas(p) => &p.project_id,
            ClientEvent::SendMessage(p) => &p.project_id,
            ClientEvent::Typing(p) => &p.project_id,
            ClientEvent::StopTyping(p) => &p.project_id,
            ClientEvent::CreateTask(p) => &p.project_id,
            ClientEvent::UpdateTask(p) => &p.project_id,
            ClientEvent::DeleteTask(p) => &p.project_id,
        }
    }

    /// Serde already rejects frames with missing required fields; the one
    /// thing it lets through is an empty projectId string.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.project_id().is_empty() {
            Err(ValidationError::MissingProjectId)
        } else {
            Ok(())
        }
    }
}

/// Everything the server may emit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ServerEvent {
    #[serde(rename = "onlineUsers")]
    OnlineUsers(Vec<OnlineUser>),
    #[serde(rename = "previousMessages")]
    PreviousMessages(Vec<ChatMessage>),
    #[serde(rename = "loadCanvas")]
    LoadCanvas(Value),
    #[serde(rename = "drawing")]
    Drawing(Value),
    #[serde(rename = "clearCanvas")]
    ClearCanvas,
    #[serde(rename = "message")]
    Message(ChatMessage),
    #[serde(rename = "typing")]
    Typing(TypingEvent),
    #[serde(rename = "stopTyping")]
    StopTyping(UserId),
    #[serde(rename = "taskCreated")]
    TaskCreated(Task),
    #[serde(rename = "createTaskResult")]
    CreateTaskResult(TaskAck),
    #[serde(rename = "taskUpdated")]
    TaskUpdated(Value),
    #[serde(rename = "taskDeleted")]
    TaskDeleted(String),
    #[serde(rename = "error")]
    Error(ErrorReport),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinProject {
    pub project_id: ProjectId,
    pub user_id: UserId,
    pub username: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DrawingPayload {
    pub project_id: ProjectId,
    /// Opaque serialized drawing state; the format is owned by the client.
    pub drawing_data: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClearCanvasPayload {
    pub project_id: ProjectId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatPayload {
    pub project_id: ProjectId,
    pub sender: UserId,
    pub sender_username: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypingPayload {
    pub project_id: ProjectId,
    pub user_id: UserId,
    pub username: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StopTypingPayload {
    pub project_id: ProjectId,
    pub user_id: UserId,
}

/// Task fields other than projectId pass through untouched; their schema is
/// owned by the task service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskPayload {
    pub project_id: ProjectId,
    #[serde(flatten)]
    pub fields: serde_json::Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskUpdatePayload {
    pub project_id: ProjectId,
    pub task: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskDeletePayload {
    pub project_id: ProjectId,
    pub task_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypingEvent {
    pub user_id: UserId,
    pub username: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OnlineUser {
    pub username: String,
}

/// Persisted chat line. The timestamp is always server-assigned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub project_id: ProjectId,
    pub sender: UserId,
    pub sender_username: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

/// One snapshot per project, overwritten in place. Last writer wins.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CanvasSnapshot {
    pub project_id: ProjectId,
    pub canvas_data: Value,
    pub last_updated: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: String,
    pub project_id: ProjectId,
    #[serde(flatten)]
    pub fields: serde_json::Map<String, Value>,
}

/// Direct reply to the connection that issued a createTask.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskAck {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task: Option<Task>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TaskAck {
    pub fn ok(task: Task) -> Self {
        Self {
            success: true,
            task: Some(task),
            error: None,
        }
    }

    pub fn err(reason: impl Into<String>) -> Self {
        Self {
            success: false,
            task: None,
            error: Some(reason.into()),
        }
    }
}

/// Failure notice delivered to the originating connection only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorReport {
    pub context: String,
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn client_events_deserialize_from_wire_names() {
        let frame = json!({
            "event": "joinProject",
            "data": { "projectId": "p1", "userId": "u1", "username": "ada" }
        });
        let event: ClientEvent = serde_json::from_value(frame).unwrap();
        assert_eq!(
            event,
            ClientEvent::JoinProject(JoinProject {
                project_id: "p1".into(),
                user_id: "u1".into(),
                username: "ada".into(),
            })
        );
    }

    #[test]
    fn missing_required_field_is_rejected() {
        let frame = json!({
            "event": "sendMessage",
            "data": { "projectId": "p1", "sender": "u1", "message": "hi" }
        });
        assert!(serde_json::from_value::<ClientEvent>(frame).is_err());
    }

    #[test]
    fn empty_project_id_fails_validation() {
        let event = ClientEvent::ClearCanvas(ClearCanvasPayload {
            project_id: String::new(),
        });
        assert!(event.validate().is_err());
    }

    #[test]
    fn server_events_serialize_with_wire_names() {
        let event = ServerEvent::OnlineUsers(vec![OnlineUser {
            username: "ada".into(),
        }]);
        let frame = serde_json::to_value(&event).unwrap();
        assert_eq!(
            frame,
            json!({ "event": "onlineUsers", "data": [{ "username": "ada" }] })
        );
    }

    #[test]
    fn clear_canvas_broadcast_carries_no_data() {
        let frame = serde_json::to_value(&ServerEvent::ClearCanvas).unwrap();
        assert_eq!(frame, json!({ "event": "clearCanvas" }));
    }

    #[test]
    fn task_payload_keeps_extra_fields() {
        let frame = json!({
            "event": "createTask",
            "data": { "projectId": "p1", "title": "ship it", "assignee": "u2" }
        });
        let event: ClientEvent = serde_json::from_value(frame).unwrap();
        match event {
            ClientEvent::CreateTask(payload) => {
                assert_eq!(payload.project_id, "p1");
                assert_eq!(payload.fields.get("title"), Some(&json!("ship it")));
                assert_eq!(payload.fields.get("assignee"), Some(&json!("u2")));
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }
}
