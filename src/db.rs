// src/db.rs
use sqlx::postgres::PgPoolOptions;
use sqlx::{Pool, Postgres};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS polls (
    id UUID PRIMARY KEY,
    question TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'PENDING' CHECK (status IN ('PENDING', 'ACTIVE', 'CLOSED')),
    time_limit INTEGER NOT NULL CHECK (time_limit > 0),
    created_at TIMESTAMPTZ NOT NULL,
    started_at TIMESTAMPTZ,
    ended_at TIMESTAMPTZ
);

CREATE TABLE IF NOT EXISTS poll_options (
    id UUID PRIMARY KEY,
    poll_id UUID NOT NULL REFERENCES polls (id),
    text TEXT NOT NULL,
    is_correct_answer BOOLEAN NOT NULL DEFAULT FALSE,
    position INTEGER NOT NULL,
    UNIQUE (id, poll_id)
);

CREATE TABLE IF NOT EXISTS votes (
    id UUID PRIMARY KEY,
    poll_id UUID NOT NULL REFERENCES polls (id),
    student_id TEXT NOT NULL,
    option_id UUID NOT NULL,
    created_at TIMESTAMPTZ NOT NULL,
    UNIQUE (poll_id, student_id),
    FOREIGN KEY (option_id, poll_id) REFERENCES poll_options (id, poll_id)
);

CREATE INDEX IF NOT EXISTS polls_status_idx ON polls (status);
"#;

pub async fn create_pool(database_url: &str, max_connections: u32) -> Result<Pool<Postgres>, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await
}

/// Creates the tables and constraints the store depends on.
pub async fn migrate(pool: &Pool<Postgres>) -> Result<(), sqlx::Error> {
    sqlx::raw_sql(SCHEMA).execute(pool).await?;
    Ok(())
}
