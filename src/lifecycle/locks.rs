use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use crate::domain::EntityId;

/// One async mutex per station. Cycles for the same station queue up;
/// different stations never contend.
#[derive(Default)]
pub struct EntityLocks {
    locks: Mutex<HashMap<EntityId, Arc<AsyncMutex<()>>>>,
}

impl EntityLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock(&self, entity: EntityId) -> OwnedMutexGuard<()> {
        let lock = self.locks.lock().entry(entity).or_default().clone();
        lock.lock_owned().await
    }
}
