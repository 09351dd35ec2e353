use std::sync::Arc;

use serde_json::Value;
use tokio::sync::oneshot;

use system::{ProjectId, ServerEvent, TaskAck, TaskPayload, TaskService};

use crate::connection::ConnectionEvent;
use crate::rooms::{ConnectionTx, RoomRouter};

/// Relays task lifecycle events. Only creation touches the external task
/// service; updates and deletes were already persisted by the time they
/// reach this core.
pub struct TaskNotifier {
    service: Arc<dyn TaskService>,
}

impl TaskNotifier {
    pub fn new(service: Arc<dyn TaskService>) -> Self {
        Self { service }
    }

    /// Delegates creation to the task service, acknowledges the creator
    /// directly, and broadcasts the created task to the room. Runs as its
    /// own task so a slow service never stalls the engine loop.
    pub fn created(
        &self,
        targets: Vec<ConnectionTx>,
        payload: TaskPayload,
        ack: oneshot::Sender<TaskAck>,
    ) {
        let service = Arc::clone(&self.service);
        tokio::spawn(async move {
            match service.create_task(payload).await {
                Ok(task) => {
                    // The creator's ack does not depend on its own broadcast
                    // echo arriving.
                    let _ = ack.send(TaskAck::ok(task.clone()));
                    for tx in targets {
                        let _ = tx
                            .send(ConnectionEvent::ServerEvent(ServerEvent::TaskCreated(
                                task.clone(),
                            )))
                            .await;
                    }
                }
                Err(err) => {
                    log::warn!("task creation failed: {}", err);
                    let _ = ack.send(TaskAck::err(err.to_string()));
                }
            }
        });
    }

    pub async fn updated(&self, router: &RoomRouter, project_id: &ProjectId, task: Value) {
        router
            .broadcast(project_id, ServerEvent::TaskUpdated(task))
            .await;
    }

    pub async fn deleted(&self, router: &RoomRouter, project_id: &ProjectId, task_id: String) {
        router
            .broadcast(project_id, ServerEvent::TaskDeleted(task_id))
            .await;
    }
}
