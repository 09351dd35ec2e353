use std::collections::{HashMap, HashSet};

use system::{ConnectionId, ProjectId, ServerEvent};

use crate::connection::ConnectionEvent;

pub type ConnectionTx = tokio::sync::mpsc::Sender<ConnectionEvent>;

/// Groups live connections by project and fans events out to them. Pure
/// delivery: no persistence, no membership validation. A connection that
/// dropped but has not been cleaned up yet silently misses delivery.
pub struct RoomRouter {
    connection_txs: HashMap<ConnectionId, ConnectionTx>,
    rooms: HashMap<ProjectId, HashSet<ConnectionId>>,
}

impl RoomRouter {
    pub fn new() -> Self {
        Self {
            connection_txs: HashMap::new(),
            rooms: HashMap::new(),
        }
    }

    pub fn insert(&mut self, connection_id: ConnectionId, tx: ConnectionTx) {
        self.connection_txs.insert(connection_id, tx);
    }

    /// Drops the connection's sender and any room membership it still holds.
    pub fn remove(&mut self, connection_id: &ConnectionId) -> Option<ConnectionTx> {
        self.rooms.retain(|_, members| {
            members.remove(connection_id);
            !members.is_empty()
        });
        self.connection_txs.remove(connection_id)
    }

    pub fn join_room(&mut self, connection_id: ConnectionId, project_id: &ProjectId) {
        self.rooms
            .entry(project_id.clone())
            .or_default()
            .insert(connection_id);
    }

    pub fn leave_room(&mut self, connection_id: &ConnectionId, project_id: &ProjectId) {
        if let Some(members) = self.rooms.get_mut(project_id) {
            members.remove(connection_id);
            if members.is_empty() {
                self.rooms.remove(project_id);
            }
        }
    }

    pub fn tx(&self, connection_id: &ConnectionId) -> Option<ConnectionTx> {
        self.connection_txs.get(connection_id).cloned()
    }

    /// Cloned senders for every current room member, for flows that finish
    /// their fanout from a spawned task.
    pub fn room_txs(&self, project_id: &ProjectId) -> Vec<ConnectionTx> {
        self.members(project_id)
            .iter()
            .filter_map(|id| self.connection_txs.get(id).cloned())
            .collect()
    }

    pub async fn send_to(&self, to: &ConnectionId, event: ServerEvent) {
        self.send(to, ConnectionEvent::ServerEvent(event)).await;
    }

    pub async fn send(&self, to: &ConnectionId, event: ConnectionEvent) {
        if let Some(tx) = self.connection_txs.get(to) {
            if tx.send(event).await.is_err() {
                log::debug!("connection {} dropped before delivery", to);
            }
        } else {
            log::debug!("connection {} is gone; skipping delivery", to);
        }
    }

    pub async fn broadcast(&self, project_id: &ProjectId, event: ServerEvent) {
        for connection_id in self.members(project_id) {
            self.send_to(&connection_id, event.clone()).await;
        }
    }

    /// Same as broadcast, but skips the originator so a sender never
    /// receives an echo of its own locally-applied action.
    pub async fn broadcast_excluding(
        &self,
        without: &ConnectionId,
        project_id: &ProjectId,
        event: ServerEvent,
    ) {
        for connection_id in self.members(project_id) {
            if &connection_id != without {
                self.send_to(&connection_id, event.clone()).await;
            }
        }
    }

    fn members(&self, project_id: &ProjectId) -> Vec<ConnectionId> {
        self.rooms
            .get(project_id)
            .map(|members| members.iter().copied().collect())
            .unwrap_or_default()
    }
}

impl Default for RoomRouter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc::{channel, Receiver};

    fn subscribe(router: &mut RoomRouter, id: ConnectionId, project: &str) -> Receiver<ConnectionEvent> {
        let (tx, rx) = channel(8);
        router.insert(id, tx);
        router.join_room(id, &project.to_owned());
        rx
    }

    fn received(rx: &mut Receiver<ConnectionEvent>) -> Option<ServerEvent> {
        match rx.try_recv() {
            Ok(ConnectionEvent::ServerEvent(event)) => Some(event),
            _ => None,
        }
    }

    #[tokio::test]
    async fn broadcast_reaches_every_room_member() {
        let mut router = RoomRouter::new();
        let mut rx1 = subscribe(&mut router, 1, "p1");
        let mut rx2 = subscribe(&mut router, 2, "p1");
        let mut rx3 = subscribe(&mut router, 3, "p2");

        router.broadcast(&"p1".to_owned(), ServerEvent::ClearCanvas).await;

        assert_eq!(received(&mut rx1), Some(ServerEvent::ClearCanvas));
        assert_eq!(received(&mut rx2), Some(ServerEvent::ClearCanvas));
        assert_eq!(received(&mut rx3), None);
    }

    #[tokio::test]
    async fn broadcast_excluding_skips_the_originator() {
        let mut router = RoomRouter::new();
        let mut rx1 = subscribe(&mut router, 1, "p1");
        let mut rx2 = subscribe(&mut router, 2, "p1");

        router
            .broadcast_excluding(&1, &"p1".to_owned(), ServerEvent::ClearCanvas)
            .await;

        assert_eq!(received(&mut rx1), None);
        assert_eq!(received(&mut rx2), Some(ServerEvent::ClearCanvas));
    }

    #[tokio::test]
    async fn a_dropped_receiver_does_not_fail_the_fanout() {
        let mut router = RoomRouter::new();
        let rx1 = subscribe(&mut router, 1, "p1");
        let mut rx2 = subscribe(&mut router, 2, "p1");
        drop(rx1);

        router.broadcast(&"p1".to_owned(), ServerEvent::ClearCanvas).await;

        assert_eq!(received(&mut rx2), Some(ServerEvent::ClearCanvas));
    }

    #[tokio::test]
    async fn remove_strips_room_membership() {
        let mut router = RoomRouter::new();
        let mut rx1 = subscribe(&mut router, 1, "p1");
        let mut rx2 = subscribe(&mut router, 2, "p1");

        router.remove(&1);
        router.broadcast(&"p1".to_owned(), ServerEvent::ClearCanvas).await;

        assert_eq!(received(&mut rx1), None);
        assert_eq!(received(&mut rx2), Some(ServerEvent::ClearCanvas));
    }
}
