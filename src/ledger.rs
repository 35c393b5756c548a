// src/ledger.rs
use std::sync::Arc;

use uuid::Uuid;

use crate::broadcast::{Broadcaster, Event, Room};
use crate::clock::Clock;
use crate::error::AppError;
use crate::gate::PollGates;
use crate::models::{normalize_identity, Poll, PollStatus, Results, Vote};
use crate::store::{Store, StoreError};

/// Admission and tallying of votes.
pub struct VoteLedger<S> {
    store: Arc<S>,
    broadcaster: Arc<Broadcaster>,
    gates: Arc<PollGates>,
    clock: Arc<dyn Clock>,
}

impl<S: Store> VoteLedger<S> {
    pub fn new(
        store: Arc<S>,
        broadcaster: Arc<Broadcaster>,
        gates: Arc<PollGates>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            broadcaster,
            gates,
            clock,
        }
    }

    /// Records one vote for `student_id`.
    ///
    /// The deadline is not consulted here: a vote that arrives after the time
    /// limit but before the poll is closed is accepted.
    pub async fn submit(
        &self,
        poll_id: Uuid,
        student_id: &str,
        option_id: Uuid,
    ) -> Result<Vote, AppError> {
        let student_id = normalize_identity(student_id)?;

        let poll = self
            .store
            .get_poll(poll_id)
            .await?
            .ok_or(AppError::PollNotFound(poll_id))?;
        if poll.status != PollStatus::Active {
            return Err(AppError::PollNotActive(poll_id));
        }
        if poll.option(option_id).is_none() {
            return Err(AppError::InvalidOption { poll_id, option_id });
        }
        if self.store.find_vote(poll_id, student_id).await?.is_some() {
            return Err(duplicate(poll_id, student_id));
        }

        let _gate = self.gates.lock(poll_id).await;
        let vote = Vote {
            id: Uuid::new_v4(),
            poll_id,
            student_id: student_id.to_string(),
            option_id,
            created_at: self.clock.now(),
        };
        let vote = match self.store.insert_vote(vote).await {
            Ok(vote) => vote,
            Err(StoreError::UniqueViolation) => return Err(duplicate(poll_id, student_id)),
            Err(StoreError::PollNotActive) => return Err(AppError::PollNotActive(poll_id)),
            Err(err) => return Err(err.into()),
        };
        tracing::info!(%poll_id, student_id, %option_id, "vote recorded");

        let results = self.aggregate(&poll).await?;
        let total_votes = results.total_votes;
        let room = Room::Poll(poll_id);
        self.broadcaster
            .publish(room, Event::ResultsUpdated(results))
            .await;
        self.broadcaster
            .publish(room, Event::VoteUpdated { poll_id, total_votes })
            .await;

        Ok(vote)
    }

    /// Current tally of `poll`, in the poll's option order.
    ///
    /// Takes the poll as already read; callers looking one up by id go through
    /// the lifecycle so the deadline is checked first.
    pub async fn aggregate(&self, poll: &Poll) -> Result<Results, AppError> {
        let counts = self.store.tally(poll.id).await?;
        Ok(Results::from_tally(poll, &counts))
    }

    pub async fn find_vote(&self, poll_id: Uuid, student_id: &str) -> Result<Vote, AppError> {
        let student_id = normalize_identity(student_id)?;
        self.store
            .find_vote(poll_id, student_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("vote of {student_id} in poll {poll_id}")))
    }
}

fn duplicate(poll_id: Uuid, student_id: &str) -> AppError {
    AppError::DuplicateVote {
        poll_id,
        student_id: student_id.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use tokio::sync::mpsc;

    use crate::models::ConnectionId;
    use crate::services::test_session;

    use super::*;

    #[tokio::test]
    async fn two_votes_for_a_tally_one_hundred_percent() {
        let (session, _clock) = test_session();
        let poll = session.started_poll(&["A", "B"], 30).await;
        let (a, b) = (poll.options[0].id, poll.options[1].id);

        session.ledger.submit(poll.id, "student1", a).await.unwrap();
        session.ledger.submit(poll.id, "student2", a).await.unwrap();
        let results = session.polls.results(poll.id).await.unwrap();

        assert_eq!(results.total_votes, 2);
        assert_eq!(results.options[0].option_id, a);
        assert_eq!((results.options[0].vote_count, results.options[0].percentage), (2, 100.0));
        assert_eq!(results.options[1].option_id, b);
        assert_eq!((results.options[1].vote_count, results.options[1].percentage), (0, 0.0));
        let sum: i64 = results.options.iter().map(|o| o.vote_count).sum();
        assert_eq!(sum, results.total_votes);
    }

    #[tokio::test]
    async fn resubmission_is_rejected_and_first_vote_kept() {
        let (session, _clock) = test_session();
        let poll = session.started_poll(&["A", "B"], 30).await;
        let (a, b) = (poll.options[0].id, poll.options[1].id);

        session.ledger.submit(poll.id, "student1", a).await.unwrap();
        let err = session.ledger.submit(poll.id, "student1", b).await.unwrap_err();

        assert!(matches!(err, AppError::DuplicateVote { .. }));
        let vote = session.ledger.find_vote(poll.id, "student1").await.unwrap();
        assert_eq!(vote.option_id, a);
        assert_eq!(session.polls.results(poll.id).await.unwrap().total_votes, 1);
    }

    #[tokio::test]
    async fn concurrent_duplicates_yield_exactly_one_vote() {
        let (session, _clock) = test_session();
        let poll = session.started_poll(&["A", "B"], 30).await;
        let (poll_id, option) = (poll.id, poll.options[1].id);

        let handles: Vec<_> = (0..10)
            .map(|_| {
                let session = session.clone();
                tokio::spawn(async move { session.ledger.submit(poll_id, "retry", option).await })
            })
            .collect();
        let mut accepted = 0;
        let mut duplicates = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => accepted += 1,
                Err(AppError::DuplicateVote { .. }) => duplicates += 1,
                Err(other) => panic!("unexpected error {other}"),
            }
        }

        assert_eq!((accepted, duplicates), (1, 9));
        assert_eq!(session.polls.results(poll.id).await.unwrap().total_votes, 1);
    }

    #[tokio::test]
    async fn votes_on_pending_or_closed_polls_are_rejected() {
        let (session, _clock) = test_session();
        let pending = session.pending_poll(&["A", "B"], 30).await;
        let err = session
            .ledger
            .submit(pending.id, "s1", pending.options[0].id)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::PollNotActive(_)));

        let poll = session.started_poll(&["A", "B"], 30).await;
        session.polls.end(poll.id).await.unwrap();
        let err = session
            .ledger
            .submit(poll.id, "s1", poll.options[0].id)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::PollNotActive(_)));

        assert_eq!(session.polls.results(pending.id).await.unwrap().total_votes, 0);
        assert_eq!(session.polls.results(poll.id).await.unwrap().total_votes, 0);
    }

    #[tokio::test]
    async fn unknown_poll_and_foreign_option_are_distinct_failures() {
        let (session, _clock) = test_session();
        let poll = session.started_poll(&["A", "B"], 30).await;

        let err = session
            .ledger
            .submit(Uuid::new_v4(), "s1", poll.options[0].id)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::PollNotFound(_)));

        let err = session.ledger.submit(poll.id, "s1", Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, AppError::InvalidOption { .. }));

        let err = session.ledger.submit(poll.id, "  ", poll.options[0].id).await.unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[tokio::test]
    async fn late_vote_before_next_check_is_accepted() {
        let (session, clock) = test_session();
        let poll = session.started_poll(&["A", "B"], 10).await;
        clock.advance(15);

        session.ledger.submit(poll.id, "late", poll.options[0].id).await.unwrap();

        assert!(session.polls.active().await.unwrap().is_none());
        let err = session
            .ledger
            .submit(poll.id, "later", poll.options[0].id)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::PollNotActive(_)));
        assert_eq!(session.polls.results(poll.id).await.unwrap().total_votes, 1);
    }

    #[tokio::test]
    async fn accepted_vote_is_pushed_to_the_room() {
        let (session, _clock) = test_session();
        let poll = session.started_poll(&["A", "B"], 30).await;
        let (tx, mut rx) = mpsc::unbounded_channel();
        let watcher = ConnectionId::new();
        session.broadcaster.connect(watcher, tx).await;
        session.broadcaster.subscribe(watcher, Room::Poll(poll.id)).await;

        session.ledger.submit(poll.id, "s1", poll.options[0].id).await.unwrap();

        match rx.recv().await.unwrap() {
            Event::ResultsUpdated(results) => assert_eq!(results.total_votes, 1),
            other => panic!("unexpected event {other:?}"),
        }
        assert_eq!(
            rx.recv().await.unwrap(),
            Event::VoteUpdated { poll_id: poll.id, total_votes: 1 }
        );
    }
}
