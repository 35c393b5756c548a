// src/store/memory.rs
use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{Store, StoreError};
use crate::models::{Poll, PollStatus, Vote};

#[derive(Default)]
struct Tables {
    polls: HashMap<Uuid, Poll>,
    // (poll_id, student_id) is the primary key, mirroring the unique index.
    votes: HashMap<(Uuid, String), Vote>,
}

/// Process-local store. Every operation runs under one lock, which gives the
/// same atomicity the database gets from constraints and row locks.
#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Store for MemoryStore {
    async fn insert_poll(&self, poll: Poll) -> Result<Poll, StoreError> {
        let mut tables = self.tables.lock().await;
        tables.polls.insert(poll.id, poll.clone());
        Ok(poll)
    }

    async fn get_poll(&self, id: Uuid) -> Result<Option<Poll>, StoreError> {
        Ok(self.tables.lock().await.polls.get(&id).cloned())
    }

    async fn list_polls(&self) -> Result<Vec<Poll>, StoreError> {
        let tables = self.tables.lock().await;
        let mut polls: Vec<Poll> = tables.polls.values().cloned().collect();
        polls.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(polls)
    }

    async fn polls_with_status(&self, status: PollStatus) -> Result<Vec<Poll>, StoreError> {
        let tables = self.tables.lock().await;
        Ok(tables
            .polls
            .values()
            .filter(|poll| poll.status == status)
            .cloned()
            .collect())
    }

    async fn transition(
        &self,
        id: Uuid,
        from: PollStatus,
        to: PollStatus,
        at: DateTime<Utc>,
    ) -> Result<Option<Poll>, StoreError> {
        let mut tables = self.tables.lock().await;
        let Some(poll) = tables.polls.get_mut(&id).filter(|poll| poll.status == from) else {
            return Ok(None);
        };
        poll.status = to;
        match to {
            PollStatus::Active => poll.started_at = Some(at),
            PollStatus::Closed => poll.ended_at = Some(at),
            PollStatus::Pending => {}
        }
        Ok(Some(poll.clone()))
    }

    async fn insert_vote(&self, vote: Vote) -> Result<Vote, StoreError> {
        let mut tables = self.tables.lock().await;
        match tables.polls.get(&vote.poll_id) {
            Some(poll) if poll.status == PollStatus::Active => {}
            _ => return Err(StoreError::PollNotActive),
        }
        let key = (vote.poll_id, vote.student_id.clone());
        if tables.votes.contains_key(&key) {
            return Err(StoreError::UniqueViolation);
        }
        tables.votes.insert(key, vote.clone());
        Ok(vote)
    }

    async fn find_vote(&self, poll_id: Uuid, student_id: &str) -> Result<Option<Vote>, StoreError> {
        let tables = self.tables.lock().await;
        Ok(tables.votes.get(&(poll_id, student_id.to_string())).cloned())
    }

    async fn tally(&self, poll_id: Uuid) -> Result<HashMap<Uuid, i64>, StoreError> {
        let tables = self.tables.lock().await;
        let mut counts = HashMap::new();
        for vote in tables.votes.values().filter(|vote| vote.poll_id == poll_id) {
            *counts.entry(vote.option_id).or_insert(0) += 1;
        }
        Ok(counts)
    }
}
