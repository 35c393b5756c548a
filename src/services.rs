// src/services.rs
use std::sync::Arc;

use uuid::Uuid;

use crate::broadcast::{Broadcaster, Event, Outlet, Room};
use crate::clock::Clock;
use crate::error::AppError;
use crate::gate::PollGates;
use crate::ledger::VoteLedger;
use crate::models::{normalize_identity, ConnectionId, Participant};
use crate::poll::PollLifecycle;
use crate::presence::PresenceRegistry;
use crate::store::Store;

pub type SharedSession<S> = Arc<Session<S>>;

/// Everything a live session needs, built once and handed to the HTTP and
/// WebSocket layers.
pub struct Session<S> {
    pub polls: PollLifecycle<S>,
    pub ledger: Arc<VoteLedger<S>>,
    pub presence: PresenceRegistry,
    pub broadcaster: Arc<Broadcaster>,
    gates: Arc<PollGates>,
}

impl<S: Store> Session<S> {
    pub fn new(store: S, clock: Arc<dyn Clock>) -> SharedSession<S> {
        let store = Arc::new(store);
        let broadcaster = Arc::new(Broadcaster::new());
        let gates = Arc::new(PollGates::new());
        let ledger = Arc::new(VoteLedger::new(
            store.clone(),
            broadcaster.clone(),
            gates.clone(),
            clock.clone(),
        ));
        let polls = PollLifecycle::new(
            store,
            ledger.clone(),
            broadcaster.clone(),
            gates.clone(),
            clock,
        );

        Arc::new(Session {
            polls,
            ledger,
            presence: PresenceRegistry::new(),
            broadcaster,
            gates,
        })
    }

    /// Registers a fresh connection's outlet. It receives nothing until it
    /// joins or watches a room.
    pub async fn connect(&self, outlet: Outlet) -> ConnectionId {
        let connection = ConnectionId::new();
        self.broadcaster.connect(connection, outlet).await;
        tracing::debug!(%connection, "connection opened");
        connection
    }

    /// Subscribes a connection without adding it to any roster.
    pub async fn watch(&self, connection: ConnectionId, room: Room) {
        self.broadcaster.subscribe(connection, room).await;
    }

    /// Puts the participant in its poll's room and tells the room.
    pub async fn join(&self, mut participant: Participant) -> Result<Vec<Participant>, AppError> {
        participant.identity = normalize_identity(&participant.identity)?.to_string();
        let poll_id = participant.poll_id;
        let connection = participant.connection_id;
        // Poll must exist; reading it also applies the deadline check.
        self.polls.get(poll_id).await?;

        if let Some(previous) = self.presence.get(connection).await {
            if previous.poll_id != poll_id {
                self.leave(connection).await;
            }
        }

        let _gate = self.gates.lock(poll_id).await;
        self.presence.join(participant.clone()).await;
        self.broadcaster.subscribe(connection, Room::Poll(poll_id)).await;
        tracing::debug!(%connection, %poll_id, identity = %participant.identity, "participant joined");

        let roster = self.presence.list_by_poll(poll_id).await;
        self.broadcaster
            .publish(Room::Poll(poll_id), Event::ParticipantsUpdate(roster.clone()))
            .await;
        Ok(roster)
    }

    /// Removes the connection from its roster and room, if it was in one.
    pub async fn leave(&self, connection: ConnectionId) -> Option<Participant> {
        // The connection may move to another poll while we wait for the gate;
        // only a removal from the poll whose gate is held counts.
        let (participant, _gate) = loop {
            let poll_id = self.presence.get(connection).await?.poll_id;
            let gate = self.gates.lock(poll_id).await;
            if let Some(participant) = self.presence.leave(connection, poll_id).await {
                break (participant, gate);
            }
        };
        let poll_id = participant.poll_id;
        self.broadcaster.unsubscribe(connection, Room::Poll(poll_id)).await;
        tracing::debug!(%connection, %poll_id, "participant left");

        let roster = self.presence.list_by_poll(poll_id).await;
        self.broadcaster
            .publish(Room::Poll(poll_id), Event::ParticipantsUpdate(roster))
            .await;
        Some(participant)
    }

    /// Socket gone: leave the roster and drop every subscription.
    pub async fn disconnect(&self, connection: ConnectionId) {
        self.leave(connection).await;
        self.broadcaster.disconnect(connection).await;
        tracing::debug!(%connection, "connection closed");
    }

    /// Forcibly removes one connection of `student_id` from the poll.
    ///
    /// Only the earliest-joined connection is affected when the student has
    /// several open. The removed connection alone gets `student:kicked`; the
    /// room gets the reduced roster.
    pub async fn kick(
        &self,
        poll_id: Uuid,
        student_id: &str,
        reason: Option<String>,
    ) -> Result<Option<Participant>, AppError> {
        let student_id = normalize_identity(student_id)?;
        self.polls.get(poll_id).await?;

        let _gate = self.gates.lock(poll_id).await;
        let Some(kicked) = self.presence.kick(student_id, poll_id).await else {
            return Ok(None);
        };
        let connection = kicked.connection_id;
        let reason = reason.unwrap_or_else(|| "removed by the teacher".to_string());

        self.broadcaster.unsubscribe(connection, Room::Poll(poll_id)).await;
        self.broadcaster
            .send_to(connection, Event::StudentKicked { reason })
            .await;
        tracing::info!(%connection, %poll_id, student_id, "student kicked");

        let roster = self.presence.list_by_poll(poll_id).await;
        self.broadcaster
            .publish(Room::Poll(poll_id), Event::ParticipantsUpdate(roster))
            .await;
        Ok(Some(kicked))
    }

    pub async fn roster(&self, poll_id: Uuid) -> Result<Vec<Participant>, AppError> {
        self.polls.get(poll_id).await?;
        Ok(self.presence.list_by_poll(poll_id).await)
    }
}

#[cfg(test)]
pub(crate) use testing::test_session;
