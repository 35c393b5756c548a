// src/poll.rs
//! Poll lifecycle: PENDING -> ACTIVE -> CLOSED.
//!
//! Deadlines are enforced lazily. Any read or start that comes across an
//! ACTIVE poll past its time limit closes it on the spot; nothing closes a
//! poll in the background unless the optional sweep is running.

use std::sync::Arc;

use tokio::sync::Mutex;
use uuid::Uuid;

use crate::broadcast::{Broadcaster, Event, Room};
use crate::clock::Clock;
use crate::error::AppError;
use crate::gate::PollGates;
use crate::ledger::VoteLedger;
use crate::models::{CreatePoll, Poll, PollClosure, PollStatus, Results, Vote};
use crate::store::Store;

pub struct PollLifecycle<S> {
    store: Arc<S>,
    ledger: Arc<VoteLedger<S>>,
    broadcaster: Arc<Broadcaster>,
    gates: Arc<PollGates>,
    clock: Arc<dyn Clock>,
    // Serializes `start` so two polls can never be activated side by side.
    start_lock: Mutex<()>,
}

impl<S: Store> PollLifecycle<S> {
    pub fn new(
        store: Arc<S>,
        ledger: Arc<VoteLedger<S>>,
        broadcaster: Arc<Broadcaster>,
        gates: Arc<PollGates>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            ledger,
            broadcaster,
            gates,
            clock,
            start_lock: Mutex::new(()),
        }
    }

    pub async fn create(&self, request: CreatePoll) -> Result<Poll, AppError> {
        request.validate()?;
        let poll = self.store.insert_poll(request.into_poll(self.clock.now())).await?;
        tracing::info!(poll_id = %poll.id, options = poll.options.len(), "poll created");
        Ok(poll)
    }

    pub async fn get(&self, poll_id: Uuid) -> Result<Poll, AppError> {
        let poll = self
            .store
            .get_poll(poll_id)
            .await?
            .ok_or(AppError::PollNotFound(poll_id))?;
        self.expire_if_due(poll).await
    }

    pub async fn list(&self) -> Result<Vec<Poll>, AppError> {
        let polls = self.store.list_polls().await?;
        let mut checked = Vec::with_capacity(polls.len());
        for poll in polls {
            checked.push(self.expire_if_due(poll).await?);
        }
        Ok(checked)
    }

    /// Current tally, read after the deadline check so an expired poll is
    /// closed before its results are reported.
    pub async fn results(&self, poll_id: Uuid) -> Result<Results, AppError> {
        let poll = self.get(poll_id).await?;
        self.ledger.aggregate(&poll).await
    }

    pub async fn vote_of(&self, poll_id: Uuid, student_id: &str) -> Result<Vote, AppError> {
        self.get(poll_id).await?;
        self.ledger.find_vote(poll_id, student_id).await
    }

    /// The poll currently accepting votes, if any. Expired ACTIVE polls found
    /// along the way are closed and not reported.
    pub async fn active(&self) -> Result<Option<Poll>, AppError> {
        let mut current = None;
        for poll in self.store.polls_with_status(PollStatus::Active).await? {
            let poll = self.expire_if_due(poll).await?;
            if poll.status == PollStatus::Active && current.is_none() {
                current = Some(poll);
            }
        }
        Ok(current)
    }

    /// Activates a PENDING poll.
    ///
    /// Every other ACTIVE poll is inspected first: expired ones are closed,
    /// a live one makes the call fail with nothing changed. This is the only
    /// path that moves a poll into ACTIVE.
    pub async fn start(&self, poll_id: Uuid) -> Result<Poll, AppError> {
        let _serial = self.start_lock.lock().await;

        let target = self
            .store
            .get_poll(poll_id)
            .await?
            .ok_or(AppError::PollNotFound(poll_id))?;

        let now = self.clock.now();
        for active in self.store.polls_with_status(PollStatus::Active).await? {
            if active.is_expired(now) {
                self.close(active.id).await?;
            } else if active.id == target.id {
                return Err(AppError::InvalidTransition {
                    poll_id,
                    status: PollStatus::Active,
                });
            } else {
                tracing::info!(%poll_id, active = %active.id, "start refused, another poll is active");
                return Err(AppError::AnotherPollActive(active.id));
            }
        }

        let _gate = self.gates.lock(poll_id).await;
        let started = self
            .store
            .transition(poll_id, PollStatus::Pending, PollStatus::Active, self.clock.now())
            .await?;
        let Some(started) = started else {
            let status = match self.store.get_poll(poll_id).await? {
                Some(poll) => poll.status,
                None => return Err(AppError::PollNotFound(poll_id)),
            };
            return Err(AppError::InvalidTransition { poll_id, status });
        };
        tracing::info!(%poll_id, time_limit = started.time_limit, "poll started");

        self.broadcaster
            .publish(Room::Poll(poll_id), Event::PollStarted(started.clone()))
            .await;
        self.broadcaster
            .publish(Room::Global, Event::PollStarted(started.clone()))
            .await;
        Ok(started)
    }

    /// Closes an ACTIVE poll and returns its final tally.
    ///
    /// Ending a PENDING or already CLOSED poll changes nothing and reports the
    /// poll as it stands.
    pub async fn end(&self, poll_id: Uuid) -> Result<PollClosure, AppError> {
        let poll = self
            .store
            .get_poll(poll_id)
            .await?
            .ok_or(AppError::PollNotFound(poll_id))?;

        if poll.status == PollStatus::Active {
            if let Some(closure) = self.close(poll_id).await? {
                return Ok(closure);
            }
        }

        // Not active, or closed by someone else in the meantime.
        let poll = self
            .store
            .get_poll(poll_id)
            .await?
            .ok_or(AppError::PollNotFound(poll_id))?;
        let results = self.ledger.aggregate(&poll).await?;
        Ok(PollClosure { poll, results })
    }

    async fn expire_if_due(&self, poll: Poll) -> Result<Poll, AppError> {
        if !poll.is_expired(self.clock.now()) {
            return Ok(poll);
        }
        tracing::info!(poll_id = %poll.id, "poll past its deadline, closing");
        match self.close(poll.id).await? {
            Some(closure) => Ok(closure.poll),
            None => Ok(self.store.get_poll(poll.id).await?.unwrap_or(poll)),
        }
    }

    /// ACTIVE -> CLOSED. `None` when the poll was no longer ACTIVE.
    async fn close(&self, poll_id: Uuid) -> Result<Option<PollClosure>, AppError> {
        let _gate = self.gates.lock(poll_id).await;
        let closed = self
            .store
            .transition(poll_id, PollStatus::Active, PollStatus::Closed, self.clock.now())
            .await?;
        let Some(poll) = closed else {
            return Ok(None);
        };

        let results = self.ledger.aggregate(&poll).await?;
        tracing::info!(%poll_id, total_votes = results.total_votes, "poll closed");

        let room = Room::Poll(poll_id);
        self.broadcaster.publish(room, Event::PollEnded(poll.clone())).await;
        self.broadcaster
            .publish(room, Event::ResultsUpdated(results.clone()))
            .await;
        self.broadcaster
            .publish(Room::Global, Event::PollEnded(poll.clone()))
            .await;
        Ok(Some(PollClosure { poll, results }))
    }
}
