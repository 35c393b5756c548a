// src/gate.rs
use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

/// Per-poll locks. A mutation and the broadcast describing it happen while the
/// poll's gate is held, so a room sees events in commit order.
#[derive(Default)]
pub struct PollGates {
    gates: Mutex<HashMap<Uuid, Arc<Mutex<()>>>>,
}

impl PollGates {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock(&self, poll_id: Uuid) -> OwnedMutexGuard<()> {
        let gate = {
            let mut gates = self.gates.lock().await;
            gates.entry(poll_id).or_default().clone()
        };
        gate.lock_owned().await
    }
}
