// src/store/mod.rs
//! Durable storage for polls, options and votes.
//!
//! Implementations must enforce uniqueness of `(poll_id, student_id)` on votes
//! themselves and apply status transitions as conditional updates; callers rely
//! on these guarantees instead of read-then-write checks.

mod memory;
mod postgres;

use std::collections::HashMap;
use std::future::Future;

use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::models::{Poll, PollStatus, Vote};

pub use memory::MemoryStore;
pub use postgres::PgStore;

#[derive(Debug, Error)]
pub enum StoreError {
    /// The `(poll_id, student_id)` pair already has a vote.
    #[error("vote already recorded for this student")]
    UniqueViolation,

    /// The poll was not ACTIVE when the vote insert ran.
    #[error("poll is not accepting votes")]
    PollNotActive,

    #[error("stored data is inconsistent: {0}")]
    Corrupt(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

pub trait Store: Send + Sync + 'static {
    /// Persists a poll together with its options.
    fn insert_poll(&self, poll: Poll) -> impl Future<Output = Result<Poll, StoreError>> + Send;

    fn get_poll(&self, id: Uuid) -> impl Future<Output = Result<Option<Poll>, StoreError>> + Send;

    /// All polls, newest first.
    fn list_polls(&self) -> impl Future<Output = Result<Vec<Poll>, StoreError>> + Send;

    fn polls_with_status(
        &self,
        status: PollStatus,
    ) -> impl Future<Output = Result<Vec<Poll>, StoreError>> + Send;

    /// Moves a poll from `from` to `to` only if it is currently in `from`.
    ///
    /// Stamps `started_at` when entering ACTIVE and `ended_at` when entering
    /// CLOSED. Returns `None` when the poll is missing or in another status.
    fn transition(
        &self,
        id: Uuid,
        from: PollStatus,
        to: PollStatus,
        at: DateTime<Utc>,
    ) -> impl Future<Output = Result<Option<Poll>, StoreError>> + Send;

    /// Inserts a vote if, at insert time, its poll is ACTIVE and the student
    /// has not voted in it yet.
    fn insert_vote(&self, vote: Vote) -> impl Future<Output = Result<Vote, StoreError>> + Send;

    fn find_vote(
        &self,
        poll_id: Uuid,
        student_id: &str,
    ) -> impl Future<Output = Result<Option<Vote>, StoreError>> + Send;

    /// Vote counts per option id. Options without votes are absent.
    fn tally(
        &self,
        poll_id: Uuid,
    ) -> impl Future<Output = Result<HashMap<Uuid, i64>, StoreError>> + Send;
}
