// src/sweep.rs
//! Optional periodic deadline check.
//!
//! Off by default, in which case an expired poll stays ACTIVE (and keeps
//! accepting votes) until the next read or start touches it. When enabled,
//! the staleness window shrinks to roughly one interval.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::services::SharedSession;
use crate::store::Store;

pub fn spawn_deadline_sweep<S: Store>(session: SharedSession<S>, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if let Err(err) = session.polls.active().await {
                tracing::warn!(error = %err, "deadline sweep failed");
            }
        }
    })
}
