// src/routes.rs
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::handlers;
use crate::services::SharedSession;
use crate::store::Store;
use crate::ws;

pub fn create_routes<S: Store>(session: SharedSession<S>) -> Router {
    let api = Router::new()
        .route("/polls", get(handlers::list_polls::<S>).post(handlers::create_poll::<S>))
        .route("/polls/active", get(handlers::get_active_poll::<S>))
        .route("/polls/{poll_id}", get(handlers::get_poll::<S>))
        .route("/polls/{poll_id}/start", post(handlers::start_poll::<S>))
        .route("/polls/{poll_id}/end", post(handlers::end_poll::<S>))
        .route("/polls/{poll_id}/votes", post(handlers::submit_vote::<S>))
        .route(
            "/polls/{poll_id}/votes/{student_id}",
            get(handlers::get_student_vote::<S>),
        )
        .route("/polls/{poll_id}/results", get(handlers::get_results::<S>))
        .route("/polls/{poll_id}/participants", get(handlers::get_participants::<S>))
        .route("/polls/{poll_id}/kick", post(handlers::kick_student::<S>));

    Router::new()
        .nest("/api", api)
        .route("/ws", get(ws::ws_handler::<S>))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(session)
}
