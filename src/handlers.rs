// src/handlers.rs
use axum::extract::{Path, State};
use axum::Json;
use http::StatusCode;
use serde::Serialize;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::broadcast::Room;
use crate::error::AppError;
use crate::models::{CreatePoll, KickRequest, Participant, Poll, PollClosure, Results, Vote, VoteRequest};
use crate::services::SharedSession;
use crate::store::Store;

type ApiResult<T> = Result<Json<T>, AppError>;

/// Create a PENDING poll
pub async fn create_poll<S: Store>(
    State(session): State<SharedSession<S>>,
    Json(request): Json<CreatePoll>,
) -> Result<(StatusCode, Json<Poll>), AppError> {
    let poll = session.polls.create(request).await?;
    Ok((StatusCode::CREATED, Json(poll)))
}

pub async fn list_polls<S: Store>(State(session): State<SharedSession<S>>) -> ApiResult<Vec<Poll>> {
    Ok(Json(session.polls.list().await?))
}

/// The active poll, or `null` when none is running
pub async fn get_active_poll<S: Store>(
    State(session): State<SharedSession<S>>,
) -> ApiResult<Option<Poll>> {
    Ok(Json(session.polls.active().await?))
}

pub async fn get_poll<S: Store>(
    State(session): State<SharedSession<S>>,
    Path(poll_id): Path<Uuid>,
) -> ApiResult<Poll> {
    Ok(Json(session.polls.get(poll_id).await?))
}

pub async fn start_poll<S: Store>(
    State(session): State<SharedSession<S>>,
    Path(poll_id): Path<Uuid>,
) -> ApiResult<Poll> {
    Ok(Json(session.polls.start(poll_id).await?))
}

/// End a poll and return its final results
pub async fn end_poll<S: Store>(
    State(session): State<SharedSession<S>>,
    Path(poll_id): Path<Uuid>,
) -> ApiResult<PollClosure> {
    Ok(Json(session.polls.end(poll_id).await?))
}

/// Vote for an option
pub async fn submit_vote<S: Store>(
    State(session): State<SharedSession<S>>,
    Path(poll_id): Path<Uuid>,
    Json(request): Json<VoteRequest>,
) -> Result<(StatusCode, Json<Vote>), AppError> {
    let vote = session
        .ledger
        .submit(poll_id, &request.student_id, request.option_id)
        .await?;
    Ok((StatusCode::CREATED, Json(vote)))
}

pub async fn get_student_vote<S: Store>(
    State(session): State<SharedSession<S>>,
    Path((poll_id, student_id)): Path<(Uuid, String)>,
) -> ApiResult<Vote> {
    Ok(Json(session.polls.vote_of(poll_id, &student_id).await?))
}

pub async fn get_results<S: Store>(
    State(session): State<SharedSession<S>>,
    Path(poll_id): Path<Uuid>,
) -> ApiResult<Results> {
    Ok(Json(session.polls.results(poll_id).await?))
}

#[derive(Serialize)]
pub struct Roster {
    participants: Vec<Participant>,
    count: usize,
    /// Connections subscribed to the room, watchers included.
    subscribers: usize,
}

pub async fn get_participants<S: Store>(
    State(session): State<SharedSession<S>>,
    Path(poll_id): Path<Uuid>,
) -> ApiResult<Roster> {
    let participants = session.roster(poll_id).await?;
    Ok(Json(Roster {
        participants,
        count: session.presence.count_by_poll(poll_id).await,
        subscribers: session.broadcaster.subscriber_count(Room::Poll(poll_id)).await,
    }))
}

/// Remove a student's connection from the poll room
pub async fn kick_student<S: Store>(
    State(session): State<SharedSession<S>>,
    Path(poll_id): Path<Uuid>,
    Json(request): Json<KickRequest>,
) -> ApiResult<Value> {
    let kicked = session
        .kick(poll_id, &request.student_id, request.reason)
        .await?;
    Ok(Json(json!({ "kicked": kicked.is_some() })))
}
