// src/models.rs
use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PollStatus {
    Pending,
    Active,
    Closed,
}

impl PollStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            PollStatus::Pending => "PENDING",
            PollStatus::Active => "ACTIVE",
            PollStatus::Closed => "CLOSED",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "PENDING" => Some(PollStatus::Pending),
            "ACTIVE" => Some(PollStatus::Active),
            "CLOSED" => Some(PollStatus::Closed),
            _ => None,
        }
    }
}

impl fmt::Display for PollStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Poll {
    pub id: Uuid,
    pub question: String,
    pub options: Vec<PollOption>,
    pub status: PollStatus,
    /// Seconds the poll stays open once started.
    pub time_limit: i32,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl Poll {
    /// Moment the poll stops being valid, if it has been started.
    pub fn deadline(&self) -> Option<DateTime<Utc>> {
        self.started_at
            .map(|started| started + TimeDelta::seconds(i64::from(self.time_limit)))
    }

    /// An ACTIVE poll whose elapsed time exceeds its own time limit.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.status == PollStatus::Active && self.deadline().is_some_and(|deadline| now > deadline)
    }

    pub fn option(&self, option_id: Uuid) -> Option<&PollOption> {
        self.options.iter().find(|option| option.id == option_id)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct PollOption {
    pub id: Uuid,
    pub poll_id: Uuid,
    pub text: String,
    /// Informational only, never consulted when admitting votes.
    pub is_correct_answer: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Vote {
    pub id: Uuid,
    pub poll_id: Uuid,
    pub student_id: String,
    pub option_id: Uuid,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConnectionId(pub Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Role {
    Student,
    Teacher,
}

/// A live connection sitting in a poll's room. Never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Participant {
    pub connection_id: ConnectionId,
    /// Student id or teacher id, depending on `role`.
    pub identity: String,
    pub display_name: String,
    pub role: Role,
    pub poll_id: Uuid,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptionResult {
    pub option_id: Uuid,
    pub text: String,
    pub vote_count: i64,
    pub percentage: f64,
}

/// Tally derived from the ledger on request, never stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Results {
    pub poll_id: Uuid,
    pub question: String,
    pub options: Vec<OptionResult>,
    pub total_votes: i64,
}

impl Results {
    /// Lays per-option counts out in the poll's option order.
    pub fn from_tally(poll: &Poll, counts: &HashMap<Uuid, i64>) -> Self {
        let per_option: Vec<(&PollOption, i64)> = poll
            .options
            .iter()
            .map(|option| (option, counts.get(&option.id).copied().unwrap_or(0)))
            .collect();
        let total_votes: i64 = per_option.iter().map(|(_, count)| count).sum();

        let options = per_option
            .into_iter()
            .map(|(option, vote_count)| OptionResult {
                option_id: option.id,
                text: option.text.clone(),
                vote_count,
                percentage: percentage(vote_count, total_votes),
            })
            .collect();

        Results {
            poll_id: poll.id,
            question: poll.question.clone(),
            options,
            total_votes,
        }
    }
}

/// Rounded to two decimals; each option is rounded on its own.
fn percentage(count: i64, total: i64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    (count as f64 * 10_000.0 / total as f64).round() / 100.0
}

#[derive(Debug, Clone, Serialize)]
pub struct PollClosure {
    pub poll: Poll,
    pub results: Results,
}

#[derive(Debug, Deserialize)]
pub struct NewOption {
    pub text: String,
    #[serde(default)]
    pub is_correct_answer: bool,
}

#[derive(Debug, Deserialize)]
pub struct CreatePoll {
    pub question: String,
    pub options: Vec<NewOption>,
    pub time_limit: i32,
}

impl CreatePoll {
    pub fn validate(&self) -> Result<(), AppError> {
        if self.question.trim().is_empty() {
            return Err(AppError::Validation("question must not be empty".into()));
        }
        if self.options.len() < 2 {
            return Err(AppError::Validation("a poll needs at least two options".into()));
        }
        if self.options.iter().any(|option| option.text.trim().is_empty()) {
            return Err(AppError::Validation("option text must not be empty".into()));
        }
        if self.time_limit <= 0 {
            return Err(AppError::Validation("time_limit must be positive".into()));
        }
        Ok(())
    }

    /// Builds the PENDING poll this request describes.
    pub fn into_poll(self, now: DateTime<Utc>) -> Poll {
        let poll_id = Uuid::new_v4();
        let options = self
            .options
            .into_iter()
            .map(|option| PollOption {
                id: Uuid::new_v4(),
                poll_id,
                text: option.text.trim().to_string(),
                is_correct_answer: option.is_correct_answer,
            })
            .collect();

        Poll {
            id: poll_id,
            question: self.question.trim().to_string(),
            options,
            status: PollStatus::Pending,
            time_limit: self.time_limit,
            created_at: now,
            started_at: None,
            ended_at: None,
        }
    }
}

/// Canonical form of a student or participant identity: surrounding
/// whitespace dropped, never empty. Votes, roster entries and kicks all key on
/// this form.
pub fn normalize_identity(raw: &str) -> Result<&str, AppError> {
    let identity = raw.trim();
    if identity.is_empty() {
        return Err(AppError::Validation("identity must not be empty".into()));
    }
    Ok(identity)
}

#[derive(Debug, Deserialize)]
pub struct VoteRequest {
    pub student_id: String,
    pub option_id: Uuid,
}

#[derive(Debug, Deserialize)]
pub struct KickRequest {
    pub student_id: String,
    pub reason: Option<String>,
}
