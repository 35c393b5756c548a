// src/store/postgres.rs
use std::collections::HashMap;

use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use uuid::Uuid;

use super::{Store, StoreError};
use crate::models::{Poll, PollOption, PollStatus, Vote};

const POLL_COLUMNS: &str = "id, question, status, time_limit, created_at, started_at, ended_at";

#[derive(sqlx::FromRow)]
struct PollRow {
    id: Uuid,
    question: String,
    status: String,
    time_limit: i32,
    created_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    ended_at: Option<DateTime<Utc>>,
}

impl PollRow {
    fn into_poll(self, options: Vec<PollOption>) -> Result<Poll, StoreError> {
        let status = PollStatus::parse(&self.status)
            .ok_or_else(|| StoreError::Corrupt(format!("unknown poll status {}", self.status)))?;
        Ok(Poll {
            id: self.id,
            question: self.question,
            options,
            status,
            time_limit: self.time_limit,
            created_at: self.created_at,
            started_at: self.started_at,
            ended_at: self.ended_at,
        })
    }
}

/// PostgreSQL-backed store. Relies on the constraints created by
/// [`crate::db::migrate`].
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn options_for(&self, poll_ids: &[Uuid]) -> Result<HashMap<Uuid, Vec<PollOption>>, StoreError> {
        let options = sqlx::query_as::<_, PollOption>(
            "SELECT id, poll_id, text, is_correct_answer FROM poll_options \
             WHERE poll_id = ANY($1) ORDER BY poll_id, position",
        )
        .bind(poll_ids)
        .fetch_all(&self.pool)
        .await?;

        let mut grouped: HashMap<Uuid, Vec<PollOption>> = HashMap::new();
        for option in options {
            grouped.entry(option.poll_id).or_default().push(option);
        }
        Ok(grouped)
    }

    async fn hydrate(&self, rows: Vec<PollRow>) -> Result<Vec<Poll>, StoreError> {
        let ids: Vec<Uuid> = rows.iter().map(|row| row.id).collect();
        let mut options = self.options_for(&ids).await?;
        rows.into_iter()
            .map(|row| {
                let poll_options = options.remove(&row.id).unwrap_or_default();
                row.into_poll(poll_options)
            })
            .collect()
    }

    async fn hydrate_one(&self, row: Option<PollRow>) -> Result<Option<Poll>, StoreError> {
        match row {
            Some(row) => Ok(self.hydrate(vec![row]).await?.pop()),
            None => Ok(None),
        }
    }
}

impl Store for PgStore {
    async fn insert_poll(&self, poll: Poll) -> Result<Poll, StoreError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO polls (id, question, status, time_limit, created_at) \
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(poll.id)
        .bind(&poll.question)
        .bind(poll.status.as_str())
        .bind(poll.time_limit)
        .bind(poll.created_at)
        .execute(&mut *tx)
        .await?;

        for (position, option) in poll.options.iter().enumerate() {
            sqlx::query(
                "INSERT INTO poll_options (id, poll_id, text, is_correct_answer, position) \
                 VALUES ($1, $2, $3, $4, $5)",
            )
            .bind(option.id)
            .bind(poll.id)
            .bind(&option.text)
            .bind(option.is_correct_answer)
            .bind(position as i32)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(poll)
    }

    async fn get_poll(&self, id: Uuid) -> Result<Option<Poll>, StoreError> {
        let row = sqlx::query_as::<_, PollRow>(&format!("SELECT {POLL_COLUMNS} FROM polls WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        self.hydrate_one(row).await
    }

    async fn list_polls(&self) -> Result<Vec<Poll>, StoreError> {
        let rows = sqlx::query_as::<_, PollRow>(&format!(
            "SELECT {POLL_COLUMNS} FROM polls ORDER BY created_at DESC"
        ))
        .fetch_all(&self.pool)
        .await?;
        self.hydrate(rows).await
    }

    async fn polls_with_status(&self, status: PollStatus) -> Result<Vec<Poll>, StoreError> {
        let rows = sqlx::query_as::<_, PollRow>(&format!(
            "SELECT {POLL_COLUMNS} FROM polls WHERE status = $1"
        ))
        .bind(status.as_str())
        .fetch_all(&self.pool)
        .await?;
        self.hydrate(rows).await
    }

    async fn transition(
        &self,
        id: Uuid,
        from: PollStatus,
        to: PollStatus,
        at: DateTime<Utc>,
    ) -> Result<Option<Poll>, StoreError> {
        let row = sqlx::query_as::<_, PollRow>(&format!(
            "UPDATE polls SET status = $3::text, \
                 started_at = CASE WHEN $3::text = 'ACTIVE' THEN $4 ELSE started_at END, \
                 ended_at = CASE WHEN $3::text = 'CLOSED' THEN $4 ELSE ended_at END \
             WHERE id = $1 AND status = $2 \
             RETURNING {POLL_COLUMNS}"
        ))
        .bind(id)
        .bind(from.as_str())
        .bind(to.as_str())
        .bind(at)
        .fetch_optional(&self.pool)
        .await?;
        self.hydrate_one(row).await
    }

    async fn insert_vote(&self, vote: Vote) -> Result<Vote, StoreError> {
        let mut tx = self.pool.begin().await?;

        // Holding a share lock on the poll row orders this insert against a
        // concurrent close of the same poll.
        let status: Option<String> =
            sqlx::query_scalar("SELECT status FROM polls WHERE id = $1 FOR SHARE")
                .bind(vote.poll_id)
                .fetch_optional(&mut *tx)
                .await?;
        if status.as_deref() != Some(PollStatus::Active.as_str()) {
            return Err(StoreError::PollNotActive);
        }

        let inserted = sqlx::query_as::<_, Vote>(
            "INSERT INTO votes (id, poll_id, student_id, option_id, created_at) \
             VALUES ($1, $2, $3, $4, $5) \
             RETURNING id, poll_id, student_id, option_id, created_at",
        )
        .bind(vote.id)
        .bind(vote.poll_id)
        .bind(&vote.student_id)
        .bind(vote.option_id)
        .bind(vote.created_at)
        .fetch_one(&mut *tx)
        .await;

        let inserted = match inserted {
            Ok(vote) => vote,
            Err(sqlx::Error::Database(err)) if err.is_unique_violation() => {
                return Err(StoreError::UniqueViolation)
            }
            Err(err) => return Err(err.into()),
        };

        tx.commit().await?;
        Ok(inserted)
    }

    async fn find_vote(&self, poll_id: Uuid, student_id: &str) -> Result<Option<Vote>, StoreError> {
        let vote = sqlx::query_as::<_, Vote>(
            "SELECT id, poll_id, student_id, option_id, created_at FROM votes \
             WHERE poll_id = $1 AND student_id = $2",
        )
        .bind(poll_id)
        .bind(student_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(vote)
    }

    async fn tally(&self, poll_id: Uuid) -> Result<HashMap<Uuid, i64>, StoreError> {
        let rows = sqlx::query(
            "SELECT option_id, COUNT(*) AS vote_count FROM votes \
             WHERE poll_id = $1 GROUP BY option_id",
        )
        .bind(poll_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| {
                let option_id: Uuid = row.get("option_id");
                let count: i64 = row.get("vote_count");
                (option_id, count)
            })
            .collect())
    }
}

// These run against a real server: `DATABASE_URL=postgres://... cargo test -- --ignored`.
// Each test gets a fresh database from `sqlx::test`.
#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::clock::SystemClock;
    use crate::error::AppError;
    use crate::models::{CreatePoll, NewOption};
    use crate::services::Session;

    fn new_poll(texts: &[&str]) -> Poll {
        CreatePoll {
            question: "Which one?".into(),
            options: texts
                .iter()
                .map(|text| NewOption {
                    text: text.to_string(),
                    is_correct_answer: false,
                })
                .collect(),
            time_limit: 30,
        }
        .into_poll(Utc::now())
    }

    fn vote(poll: &Poll, student_id: &str, option: usize) -> Vote {
        Vote {
            id: Uuid::new_v4(),
            poll_id: poll.id,
            student_id: student_id.into(),
            option_id: poll.options[option].id,
            created_at: Utc::now(),
        }
    }

    async fn store(pool: PgPool) -> PgStore {
        crate::db::migrate(&pool).await.unwrap();
        PgStore::new(pool)
    }

    #[sqlx::test(migrations = false)]
    #[ignore = "needs DATABASE_URL pointing at PostgreSQL"]
    async fn votes_need_an_active_poll_and_a_fresh_student(pool: PgPool) {
        let store = store(pool).await;
        let poll = store.insert_poll(new_poll(&["A", "B", "C"])).await.unwrap();

        assert!(matches!(
            store.insert_vote(vote(&poll, "s1", 0)).await,
            Err(StoreError::PollNotActive)
        ));

        let started = store
            .transition(poll.id, PollStatus::Pending, PollStatus::Active, Utc::now())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(started.status, PollStatus::Active);
        assert!(started.started_at.is_some());
        let texts: Vec<_> = started.options.iter().map(|o| o.text.as_str()).collect();
        assert_eq!(texts, ["A", "B", "C"]);

        store.insert_vote(vote(&poll, "s1", 1)).await.unwrap();
        assert!(matches!(
            store.insert_vote(vote(&poll, "s1", 0)).await,
            Err(StoreError::UniqueViolation)
        ));
        store.insert_vote(vote(&poll, "s2", 1)).await.unwrap();

        let counts = store.tally(poll.id).await.unwrap();
        assert_eq!(counts, HashMap::from([(poll.options[1].id, 2)]));
        let found = store.find_vote(poll.id, "s1").await.unwrap().unwrap();
        assert_eq!(found.option_id, poll.options[1].id);

        store
            .transition(poll.id, PollStatus::Active, PollStatus::Closed, Utc::now())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(
            store.insert_vote(vote(&poll, "s3", 0)).await,
            Err(StoreError::PollNotActive)
        ));
    }

    #[sqlx::test(migrations = false)]
    #[ignore = "needs DATABASE_URL pointing at PostgreSQL"]
    async fn transitions_apply_only_from_the_expected_status(pool: PgPool) {
        let store = store(pool).await;
        let poll = store.insert_poll(new_poll(&["A", "B"])).await.unwrap();

        let skipped = store
            .transition(poll.id, PollStatus::Active, PollStatus::Closed, Utc::now())
            .await
            .unwrap();
        assert!(skipped.is_none());
        assert_eq!(
            store.get_poll(poll.id).await.unwrap().unwrap().status,
            PollStatus::Pending
        );

        store
            .transition(poll.id, PollStatus::Pending, PollStatus::Active, Utc::now())
            .await
            .unwrap()
            .unwrap();
        let again = store
            .transition(poll.id, PollStatus::Pending, PollStatus::Active, Utc::now())
            .await
            .unwrap();
        assert!(again.is_none());
        assert_eq!(store.polls_with_status(PollStatus::Active).await.unwrap().len(), 1);
    }

    #[sqlx::test(migrations = false)]
    #[ignore = "needs DATABASE_URL pointing at PostgreSQL"]
    async fn option_of_another_poll_is_refused_by_the_schema(pool: PgPool) {
        let store = store(pool).await;
        let poll = store.insert_poll(new_poll(&["A", "B"])).await.unwrap();
        let other = store.insert_poll(new_poll(&["C", "D"])).await.unwrap();
        store
            .transition(poll.id, PollStatus::Pending, PollStatus::Active, Utc::now())
            .await
            .unwrap();

        let foreign = Vote {
            option_id: other.options[0].id,
            ..vote(&poll, "s1", 0)
        };
        assert!(matches!(
            store.insert_vote(foreign).await,
            Err(StoreError::Database(_))
        ));
        assert!(store.tally(poll.id).await.unwrap().is_empty());
    }

    #[sqlx::test(migrations = false)]
    #[ignore = "needs DATABASE_URL pointing at PostgreSQL"]
    async fn end_racing_votes_counts_exactly_the_accepted_ones(pool: PgPool) {
        let session = Session::new(store(pool).await, Arc::new(SystemClock));
        let poll = session.started_poll(&["A", "B"], 30).await;
        let (poll_id, options) = (poll.id, [poll.options[0].id, poll.options[1].id]);

        let voters: Vec<_> = (0..20)
            .map(|n| {
                let session = session.clone();
                tokio::spawn(async move {
                    session
                        .ledger
                        .submit(poll_id, &format!("s{n}"), options[n % 2])
                        .await
                })
            })
            .collect();
        let closure = session.polls.end(poll_id).await.unwrap();

        let mut accepted = 0;
        for voter in voters {
            match voter.await.unwrap() {
                Ok(_) => accepted += 1,
                Err(err) => assert!(matches!(err, AppError::PollNotActive(_)), "unexpected {err}"),
            }
        }
        assert_eq!(closure.poll.status, PollStatus::Closed);
        assert_eq!(closure.results.total_votes, accepted);
        assert_eq!(session.polls.results(poll_id).await.unwrap().total_votes, accepted);
    }
}
