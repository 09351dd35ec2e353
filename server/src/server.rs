use std::num::Wrapping;
use std::sync::Arc;

use chrono::Utc;
use serde_json::Value;
use tokio::sync::mpsc::{channel, Sender};

use system::{
    ChatMessage, ChatPayload, ClearCanvasPayload, ClientEvent, ConnectionId, DocumentStore,
    DrawingPayload, ErrorReport, JoinProject, ProjectId, ServerEvent, SessionRegistry,
    StopTypingPayload, TaskService, TypingEvent, TypingPayload,
};

use super::connection::{ConnectionCommand, ConnectionEvent};
use crate::notifier::TaskNotifier;
use crate::rooms::RoomRouter;

pub type ServerTx = Sender<ConnectionCommand>;

/// The collaboration engine. One task owns all of this; inbound events are
/// serialized through the command channel, so the registry and router never
/// see concurrent mutation. Persistence I/O runs in spawned tasks and never
/// blocks the fanout.
struct Server {
    connection_id_source: Wrapping<ConnectionId>,
    registry: SessionRegistry,
    router: RoomRouter,
    store: Arc<dyn DocumentStore>,
    notifier: TaskNotifier,
}

impl Server {
    fn new(store: Arc<dyn DocumentStore>, tasks: Arc<dyn TaskService>) -> Self {
        Self {
            connection_id_source: Wrapping(0),
            registry: SessionRegistry::new(),
            router: RoomRouter::new(),
            store,
            notifier: TaskNotifier::new(tasks),
        }
    }

    async fn handle_connection_command(&mut self, command: ConnectionCommand) {
        match command {
            ConnectionCommand::Connect { tx } => {
                let connection_id = self.new_connection_id();
                log::info!("client connected as connection {}", connection_id);
                if tx
                    .send(ConnectionEvent::Connected { connection_id })
                    .await
                    .is_err()
                {
                    log::debug!("connection {} closed during handshake", connection_id);
                    return;
                }
                self.router.insert(connection_id, tx);
            }
            ConnectionCommand::Disconnect { from } => {
                self.handle_disconnect(from).await;
            }
            ConnectionCommand::ClientEvent { from, event } => {
                self.handle_client_event(from, event).await;
            }
            ConnectionCommand::CreateTask { from: _, payload, ack } => {
                let targets = self.router.room_txs(&payload.project_id);
                self.notifier.created(targets, payload, ack);
            }
        }
    }

    async fn handle_client_event(&mut self, from: ConnectionId, event: ClientEvent) {
        match event {
            ClientEvent::JoinProject(payload) => self.handle_join(from, payload).await,
            ClientEvent::Drawing(payload) => self.handle_drawing(from, payload).await,
            ClientEvent::ClearCanvas(payload) => self.handle_clear_canvas(from, payload).await,
            ClientEvent::SendMessage(payload) => self.handle_chat(from, payload),
            ClientEvent::Typing(payload) => self.handle_typing(from, payload).await,
            ClientEvent::StopTyping(payload) => self.handle_stop_typing(from, payload).await,
            // createTask arrives as its own command so it can carry the ack
            // channel; reaching here means a client bypassed the handshake.
            ClientEvent::CreateTask(_) => {
                log::warn!("connection {}: createTask without ack channel", from);
            }
            ClientEvent::UpdateTask(payload) => {
                self.notifier
                    .updated(&self.router, &payload.project_id, payload.task)
                    .await;
            }
            ClientEvent::DeleteTask(payload) => {
                self.notifier
                    .deleted(&self.router, &payload.project_id, payload.task_id)
                    .await;
            }
        }
    }

    async fn handle_join(&mut self, from: ConnectionId, payload: JoinProject) {
        let JoinProject {
            project_id,
            user_id,
            username,
        } = payload;

        // A second join supersedes the first: unsubscribe from the previous
        // room so the connection does not double-receive, and let that room
        // see the departure.
        if let Some(previous) = self
            .registry
            .join(from, user_id, username, project_id.clone())
        {
            if previous != project_id {
                self.router.leave_room(&from, &previous);
                let users = self.registry.online_users(&previous);
                self.router
                    .broadcast(&previous, ServerEvent::OnlineUsers(users))
                    .await;
            }
        }
        self.router.join_room(from, &project_id);
        log::info!("connection {} joined project {}", from, project_id);

        let users = self.registry.online_users(&project_id);
        self.router
            .broadcast(&project_id, ServerEvent::OnlineUsers(users))
            .await;

        // Chat history and the canvas snapshot go to the joiner only. The
        // fetch runs off the engine loop; a slow store delays this one
        // client, nothing else.
        if let Some(tx) = self.router.tx(&from) {
            let store = Arc::clone(&self.store);
            tokio::spawn(async move {
                match store.chat_history(&project_id).await {
                    Ok(messages) => {
                        let _ = tx
                            .send(ConnectionEvent::ServerEvent(ServerEvent::PreviousMessages(
                                messages,
                            )))
                            .await;
                    }
                    Err(err) => {
                        log::error!("failed to load chat history for {}: {}", project_id, err)
                    }
                }
                match store.find_canvas(&project_id).await {
                    Ok(Some(canvas)) => {
                        let _ = tx
                            .send(ConnectionEvent::ServerEvent(ServerEvent::LoadCanvas(
                                canvas.canvas_data,
                            )))
                            .await;
                    }
                    // No snapshot yet is a normal state for a fresh project.
                    Ok(None) => {}
                    Err(err) => log::error!("failed to load canvas for {}: {}", project_id, err),
                }
            });
        }
    }

    async fn handle_drawing(&mut self, from: ConnectionId, payload: DrawingPayload) {
        let DrawingPayload {
            project_id,
            drawing_data,
        } = payload;

        // Peers get the stroke first; the sender already applied it locally.
        self.router
            .broadcast_excluding(&from, &project_id, ServerEvent::Drawing(drawing_data.clone()))
            .await;

        self.persist_canvas(project_id, drawing_data);
    }

    async fn handle_clear_canvas(&mut self, from: ConnectionId, payload: ClearCanvasPayload) {
        self.router
            .broadcast_excluding(&from, &payload.project_id, ServerEvent::ClearCanvas)
            .await;

        self.persist_canvas(payload.project_id, Value::String(String::new()));
    }

    /// Canvas persistence is best effort and independent of the broadcast:
    /// a failed or hung write is logged and degrades nothing else.
    fn persist_canvas(&self, project_id: ProjectId, canvas_data: Value) {
        let store = Arc::clone(&self.store);
        tokio::spawn(async move {
            if let Err(err) = store
                .upsert_canvas(&project_id, canvas_data, Utc::now())
                .await
            {
                log::error!("failed to save canvas for {}: {}", project_id, err);
            }
        });
    }

    /// Chat is the one flow where persistence gates the broadcast: everyone,
    /// the sender included, renders from the single persisted copy.
    fn handle_chat(&mut self, from: ConnectionId, payload: ChatPayload) {
        let message = ChatMessage {
            project_id: payload.project_id,
            sender: payload.sender,
            sender_username: payload.sender_username,
            message: payload.message,
            // Server-assigned; a client clock must not decide history order.
            timestamp: Utc::now(),
        };

        let targets = self.router.room_txs(&message.project_id);
        let sender_tx = self.router.tx(&from);
        let store = Arc::clone(&self.store);
        tokio::spawn(async move {
            match store.insert_message(&message).await {
                Ok(()) => {
                    for tx in targets {
                        let _ = tx
                            .send(ConnectionEvent::ServerEvent(ServerEvent::Message(
                                message.clone(),
                            )))
                            .await;
                    }
                }
                Err(err) => {
                    log::error!(
                        "failed to save chat message for {}: {}",
                        message.project_id,
                        err
                    );
                    // The room never sees an unpersisted message; only the
                    // sender learns it was lost.
                    if let Some(tx) = sender_tx {
                        let _ = tx
                            .send(ConnectionEvent::ServerEvent(ServerEvent::Error(
                                ErrorReport {
                                    context: "sendMessage".to_owned(),
                                    message: "message could not be saved".to_owned(),
                                },
                            )))
                            .await;
                    }
                }
            }
        });
    }

    async fn handle_typing(&mut self, from: ConnectionId, payload: TypingPayload) {
        self.router
            .broadcast_excluding(
                &from,
                &payload.project_id,
                ServerEvent::Typing(TypingEvent {
                    user_id: payload.user_id,
                    username: payload.username,
                }),
            )
            .await;
    }

    async fn handle_stop_typing(&mut self, from: ConnectionId, payload: StopTypingPayload) {
        self.router
            .broadcast_excluding(
                &from,
                &payload.project_id,
                ServerEvent::StopTyping(payload.user_id),
            )
            .await;
    }

    async fn handle_disconnect(&mut self, from: ConnectionId) {
        // Disconnect before join is a normal outcome; nothing to announce.
        if let Some(project_id) = self.registry.leave(&from) {
            self.router.leave_room(&from, &project_id);
            let users = self.registry.online_users(&project_id);
            self.router
                .broadcast(&project_id, ServerEvent::OnlineUsers(users))
                .await;
        }
        self.router.remove(&from);
        log::info!("connection {} disconnected", from);
    }

    fn new_connection_id(&mut self) -> ConnectionId {
        self.connection_id_source += Wrapping(1);
        self.connection_id_source.0
    }
}

pub fn spawn_server(store: Arc<dyn DocumentStore>, tasks: Arc<dyn TaskService>) -> ServerTx {
    let (srv_tx, mut srv_rx) = channel::<ConnectionCommand>(64);

    tokio::spawn(async move {
        let mut server = Server::new(store, tasks);

        while let Some(command) = srv_rx.recv().await {
            server.handle_connection_command(command).await;
        }
    });

    srv_tx
}
