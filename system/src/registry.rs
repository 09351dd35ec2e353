use std::collections::{BTreeSet, HashMap};

use crate::message::OnlineUser;
use crate::types::{ConnectionId, ProjectId, UserId};

/// Presence record for one live connection. A user with two tabs open has
/// two entries.
#[derive(Debug, Clone, PartialEq)]
pub struct PresenceEntry {
    pub user_id: UserId,
    pub username: String,
    pub project_id: ProjectId,
}

/// Who is online in which project, keyed by connection id. Owned by the
/// server task; no operation here can fail.
pub struct SessionRegistry {
    entries: HashMap<ConnectionId, PresenceEntry>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    /// Registers or overwrites the entry for a connection. Returns the
    /// project the connection previously belonged to, if any, so the caller
    /// can drop the stale room subscription.
    pub fn join(
        &mut self,
        connection_id: ConnectionId,
        user_id: UserId,
        username: String,
        project_id: ProjectId,
    ) -> Option<ProjectId> {
        log::debug!(
            "presence: connection {} now in project {}",
            connection_id,
            project_id
        );
        self.entries
            .insert(
                connection_id,
                PresenceEntry {
                    user_id,
                    username,
                    project_id,
                },
            )
            .map(|previous| previous.project_id)
    }

    /// Removes the entry if present and returns its project id. A connection
    /// that disconnects before joining has no entry; that is a normal
    /// outcome, not an error.
    pub fn leave(&mut self, connection_id: &ConnectionId) -> Option<ProjectId> {
        self.entries
            .remove(connection_id)
            .map(|entry| entry.project_id)
    }

    pub fn project_of(&self, connection_id: &ConnectionId) -> Option<&ProjectId> {
        self.entries
            .get(connection_id)
            .map(|entry| &entry.project_id)
    }

    /// The set of usernames online in a project. Order is unspecified;
    /// duplicate connections for one user collapse to one name.
    pub fn online_users(&self, project_id: &ProjectId) -> Vec<OnlineUser> {
        self.entries
            .values()
            .filter(|entry| &entry.project_id == project_id)
            .map(|entry| entry.username.as_str())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .map(|username| OnlineUser {
                username: username.to_owned(),
            })
            .collect()
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
