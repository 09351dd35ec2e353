use actix::{Actor, ActorContext, AsyncContext, Handler, Message, Running, StreamHandler};
use actix_web::{web, Error, HttpRequest, HttpResponse};
use actix_web_actors::ws;
use tokio::sync::oneshot;

use system::{ClientEvent, ConnectionId, ServerEvent, TaskAck, TaskPayload};

use crate::rooms::ConnectionTx;
use crate::server::ServerTx;

/// Inbound side of the engine's command channel.
#[derive(Debug)]
pub enum ConnectionCommand {
    Connect {
        tx: ConnectionTx,
    },
    Disconnect {
        from: ConnectionId,
    },
    ClientEvent {
        from: ConnectionId,
        event: ClientEvent,
    },
    /// createTask carries a reply channel so the creator gets a direct
    /// acknowledgement in addition to the room broadcast.
    CreateTask {
        from: ConnectionId,
        payload: TaskPayload,
        ack: oneshot::Sender<TaskAck>,
    },
}

/// What the engine pushes back to one connection.
#[derive(Debug)]
pub enum ConnectionEvent {
    Connected { connection_id: ConnectionId },
    ServerEvent(ServerEvent),
}

#[derive(Message)]
#[rtype(result = "()")]
struct ConnectionActorMessage(ConnectionEvent);

enum ConnectionState {
    Idle,
    Connected(ConnectionId),
}

struct ConnectionActor {
    state: ConnectionState,
    srv_tx: ServerTx,
}

impl ConnectionActor {
    fn send_command(&self, command: ConnectionCommand) {
        // Best effort: a full command queue degrades one event, never the
        // connection.
        if self.srv_tx.try_send(command).is_err() {
            log::warn!("server command queue unavailable; dropping event");
        }
    }
}

/// Connect goes through the same best-effort path as every other command: a
/// full or closed queue refuses this one connection, it never panics.
fn request_connect(srv_tx: &ServerTx, tx: ConnectionTx) -> bool {
    srv_tx.try_send(ConnectionCommand::Connect { tx }).is_ok()
}

impl Actor for ConnectionActor {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        let (tx, mut rx) = tokio::sync::mpsc::channel::<ConnectionEvent>(32);

        if !request_connect(&self.srv_tx, tx) {
            log::warn!("server command queue unavailable; refusing connection");
            ctx.stop();
            return;
        }

        let addr = ctx.address().recipient();

        // Pumps engine events into the actor mailbox. Ends when the engine
        // drops this connection's sender on disconnect.
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                addr.do_send(ConnectionActorMessage(event));
            }
        });
    }

    fn stopping(&mut self, _: &mut Self::Context) -> Running {
        if let ConnectionState::Connected(id) = self.state {
            self.send_command(ConnectionCommand::Disconnect { from: id });
        }
        Running::Stop
    }
}

/// Ingress
impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for ConnectionActor {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        match msg {
            Ok(ws::Message::Ping(msg)) => ctx.pong(&msg),
            Ok(ws::Message::Text(text)) => {
                let from = match self.state {
                    ConnectionState::Connected(id) => id,
                    ConnectionState::Idle => {
                        log::warn!("dropping frame received before connect handshake");
                        return;
                    }
                };
                match serde_json::from_str::<ClientEvent>(&text) {
                    Ok(event) => {
                        if let Err(err) = event.validate() {
                            log::warn!("connection {}: dropping invalid event: {}", from, err);
                            return;
                        }
                        log::debug!("ingress {:?}", event);
                        self.dispatch(from, event, ctx);
                    }
                    Err(err) => {
                        log::warn!("connection {}: dropping malformed frame: {}", from, err);
                    }
                }
            }
            Ok(ws::Message::Binary(_)) => {
                log::warn!("dropping unexpected binary frame");
            }
            Ok(ws::Message::Close(_)) => {
                if let ConnectionState::Connected(id) = self.state {
                    self.send_command(ConnectionCommand::Disconnect { from: id });
                    self.state = ConnectionState::Idle;
                }
                ctx.stop();
            }
            _ => (),
        }
    }
}

impl ConnectionActor {
    fn dispatch(&self, from: ConnectionId, event: ClientEvent, ctx: &mut ws::WebsocketContext<Self>) {
        match event {
            ClientEvent::CreateTask(payload) => {
                let (ack_tx, ack_rx) = oneshot::channel();
                let addr = ctx.address().recipient();
                tokio::spawn(async move {
                    if let Ok(ack) = ack_rx.await {
                        addr.do_send(ConnectionActorMessage(ConnectionEvent::ServerEvent(
                            ServerEvent::CreateTaskResult(ack),
                        )));
                    }
                });
                self.send_command(ConnectionCommand::CreateTask {
                    from,
                    payload,
                    ack: ack_tx,
                });
            }
            event => self.send_command(ConnectionCommand::ClientEvent { from, event }),
        }
    }
}

/// Egress
impl Handler<ConnectionActorMessage> for ConnectionActor {
    type Result = ();

    fn handle(
        &mut self,
        msg: ConnectionActorMessage,
        ctx: &mut ws::WebsocketContext<Self>,
    ) -> Self::Result {
        match msg.0 {
            ConnectionEvent::Connected { connection_id } => {
                self.state = ConnectionState::Connected(connection_id);
            }
            ConnectionEvent::ServerEvent(event) => {
                log::debug!("egress {:?}", event);
                let serialized = serde_json::to_string(&event).expect("must succeed");
                ctx.text(serialized);
            }
        }
    }
}

pub async fn ws_index(
    req: HttpRequest,
    stream: web::Payload,
    srv_tx: web::Data<ServerTx>,
) -> Result<HttpResponse, Error> {
    ws::start(
        ConnectionActor {
            srv_tx: srv_tx.get_ref().clone(),
            state: ConnectionState::Idle,
        },
        &req,
        stream,
    )
}
