// src/presence.rs
//! In-memory roster of live connections per poll.
//!
//! Lives only as long as the process and is not shared between instances.

use std::collections::HashMap;

use tokio::sync::RwLock;
use uuid::Uuid;

use crate::models::{ConnectionId, Participant, Role};

#[derive(Default)]
struct Roster {
    by_connection: HashMap<ConnectionId, Participant>,
    // Join order per poll; kick picks the earliest match.
    by_poll: HashMap<Uuid, Vec<ConnectionId>>,
}

impl Roster {
    fn detach(&mut self, connection: ConnectionId) -> Option<Participant> {
        let participant = self.by_connection.remove(&connection)?;
        if let Some(members) = self.by_poll.get_mut(&participant.poll_id) {
            members.retain(|id| *id != connection);
            if members.is_empty() {
                self.by_poll.remove(&participant.poll_id);
            }
        }
        Some(participant)
    }
}

#[derive(Default)]
pub struct PresenceRegistry {
    roster: RwLock<Roster>,
}

impl PresenceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `participant` under its connection. Joining again from the
    /// same connection overwrites the entry; a different poll moves it.
    ///
    /// Returns the previous entry when the connection was already registered.
    pub async fn join(&self, participant: Participant) -> Option<Participant> {
        let mut roster = self.roster.write().await;
        let connection = participant.connection_id;
        let previous = roster.by_connection.get(&connection).cloned();

        match &previous {
            Some(prev) if prev.poll_id == participant.poll_id => {}
            Some(_) => {
                roster.detach(connection);
                roster.by_poll.entry(participant.poll_id).or_default().push(connection);
            }
            None => roster.by_poll.entry(participant.poll_id).or_default().push(connection),
        }
        roster.by_connection.insert(connection, participant);
        previous
    }

    /// Removes the connection from `poll_id`'s roster. `None` when it is not
    /// registered there, including when it has since moved to another poll.
    pub async fn leave(&self, connection: ConnectionId, poll_id: Uuid) -> Option<Participant> {
        let mut roster = self.roster.write().await;
        if roster.by_connection.get(&connection)?.poll_id != poll_id {
            return None;
        }
        roster.detach(connection)
    }

    pub async fn get(&self, connection: ConnectionId) -> Option<Participant> {
        self.roster.read().await.by_connection.get(&connection).cloned()
    }

    /// Participants of a poll in join order.
    pub async fn list_by_poll(&self, poll_id: Uuid) -> Vec<Participant> {
        let roster = self.roster.read().await;
        roster
            .by_poll
            .get(&poll_id)
            .map(|members| {
                members
                    .iter()
                    .filter_map(|id| roster.by_connection.get(id).cloned())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub async fn count_by_poll(&self, poll_id: Uuid) -> usize {
        self.roster.read().await.by_poll.get(&poll_id).map_or(0, Vec::len)
    }

    /// Removes the earliest-joined connection of `student_id` in `poll_id`.
    ///
    /// If the same student holds several connections in the poll, only that
    /// one is removed; the others stay registered.
    pub async fn kick(&self, student_id: &str, poll_id: Uuid) -> Option<Participant> {
        let mut roster = self.roster.write().await;
        let target = roster.by_poll.get(&poll_id).and_then(|members| {
            members.iter().copied().find(|id| {
                roster.by_connection.get(id).is_some_and(|p| {
                    p.role == Role::Student && p.identity == student_id
                })
            })
        })?;
        roster.detach(target)
    }
}
