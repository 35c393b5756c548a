// src/broadcast.rs
//! Fan-out of committed state to the connections subscribed to a room.
//!
//! Each connection registers an unbounded outlet; publishing never waits on a
//! subscriber. A push that cannot be delivered is logged and the dead outlet is
//! dropped, the triggering command is never affected.

use std::collections::{HashMap, HashSet};

use serde::Serialize;
use tokio::sync::{mpsc, RwLock};
use uuid::Uuid;

use crate::models::{ConnectionId, Participant, Poll, Results};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Room {
    Poll(Uuid),
    /// Dashboards watching lifecycle changes of every poll.
    Global,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", content = "data")]
pub enum Event {
    #[serde(rename = "poll:started")]
    PollStarted(Poll),
    #[serde(rename = "poll:ended")]
    PollEnded(Poll),
    #[serde(rename = "results:updated")]
    ResultsUpdated(Results),
    #[serde(rename = "vote:updated")]
    VoteUpdated { poll_id: Uuid, total_votes: i64 },
    #[serde(rename = "participants:update")]
    ParticipantsUpdate(Vec<Participant>),
    #[serde(rename = "student:kicked")]
    StudentKicked { reason: String },
    #[serde(rename = "error")]
    Error { message: String },
}

pub type Outlet = mpsc::UnboundedSender<Event>;

#[derive(Default)]
struct Subscribers {
    outlets: HashMap<ConnectionId, Outlet>,
    rooms: HashMap<Room, HashSet<ConnectionId>>,
}

impl Subscribers {
    fn drop_connection(&mut self, connection: ConnectionId) {
        self.outlets.remove(&connection);
        self.rooms.retain(|_, members| {
            members.remove(&connection);
            !members.is_empty()
        });
    }
}

#[derive(Default)]
pub struct Broadcaster {
    inner: RwLock<Subscribers>,
}

impl Broadcaster {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn connect(&self, connection: ConnectionId, outlet: Outlet) {
        self.inner.write().await.outlets.insert(connection, outlet);
    }

    /// Forgets the connection and all of its room memberships.
    pub async fn disconnect(&self, connection: ConnectionId) {
        self.inner.write().await.drop_connection(connection);
    }

    pub async fn subscribe(&self, connection: ConnectionId, room: Room) {
        let mut inner = self.inner.write().await;
        if inner.outlets.contains_key(&connection) {
            inner.rooms.entry(room).or_default().insert(connection);
        }
    }

    pub async fn unsubscribe(&self, connection: ConnectionId, room: Room) {
        let mut inner = self.inner.write().await;
        if let Some(members) = inner.rooms.get_mut(&room) {
            members.remove(&connection);
            if members.is_empty() {
                inner.rooms.remove(&room);
            }
        }
    }

    pub async fn subscriber_count(&self, room: Room) -> usize {
        self.inner.read().await.rooms.get(&room).map_or(0, HashSet::len)
    }

    /// Pushes `event` to every current member of `room`. Returns how many
    /// outlets accepted it.
    pub async fn publish(&self, room: Room, event: Event) -> usize {
        let targets: Vec<(ConnectionId, Outlet)> = {
            let inner = self.inner.read().await;
            let Some(members) = inner.rooms.get(&room) else {
                return 0;
            };
            members
                .iter()
                .filter_map(|id| inner.outlets.get(id).map(|outlet| (*id, outlet.clone())))
                .collect()
        };

        let mut delivered = 0;
        let mut dead = Vec::new();
        for (connection, outlet) in targets {
            if outlet.send(event.clone()).is_ok() {
                delivered += 1;
            } else {
                tracing::warn!(%connection, ?room, "dropping push to closed connection");
                dead.push(connection);
            }
        }
        self.prune(dead).await;
        delivered
    }

    /// Pushes `event` to a single connection, regardless of rooms.
    pub async fn send_to(&self, connection: ConnectionId, event: Event) -> bool {
        let outlet = self.inner.read().await.outlets.get(&connection).cloned();
        match outlet {
            Some(outlet) if outlet.send(event).is_ok() => true,
            Some(_) => {
                tracing::warn!(%connection, "dropping direct push to closed connection");
                self.prune(vec![connection]).await;
                false
            }
            None => false,
        }
    }

    async fn prune(&self, dead: Vec<ConnectionId>) {
        if dead.is_empty() {
            return;
        }
        let mut inner = self.inner.write().await;
        for connection in dead {
            inner.drop_connection(connection);
        }
    }
}
