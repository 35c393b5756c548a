// src/main.rs
mod broadcast;
mod clock;
mod config;
mod db;
mod error;
mod gate;
mod handlers;
mod ledger;
mod models;
mod poll;
mod presence;
mod routes;
mod services;
mod store;
mod sweep;
mod ws;

use std::sync::Arc;

use dotenvy::dotenv;
use tracing_subscriber::EnvFilter;

use crate::clock::SystemClock;
use crate::config::Config;
use crate::services::Session;
use crate::store::{MemoryStore, PgStore, Store};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    dotenv().ok(); // Load environment variables from .env file

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Config::from_env()?;

    match config.database_url.as_deref() {
        Some(database_url) => {
            // Create the database connection pool
            let pool = db::create_pool(database_url, config.db_max_connections).await?;
            db::migrate(&pool).await?;
            serve(PgStore::new(pool), &config).await
        }
        None => {
            tracing::warn!("DATABASE_URL not set, polls and votes are kept in memory only");
            serve(MemoryStore::new(), &config).await
        }
    }
}

async fn serve<S: Store>(store: S, config: &Config) -> Result<(), BoxError> {
    let session = Session::new(store, Arc::new(SystemClock));
    if let Some(every) = config.deadline_sweep {
        tracing::info!(?every, "deadline sweep enabled");
        sweep::spawn_deadline_sweep(session.clone(), every);
    }

    let routes = routes::create_routes(session);

    // Start the server
    let addr = config.socket_addr();
    tracing::info!(%addr, "listening");
    axum_server::bind(addr).serve(routes.into_make_service()).await?;
    Ok(())
}
