//! Per-identity single-flight gate

use chartsync_core::RequestIdentity;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// Serializes work on one release request while letting different
/// requests proceed concurrently.
#[derive(Debug, Default)]
pub struct IdentityGate {
    slots: Mutex<HashMap<RequestIdentity, Arc<AsyncMutex<()>>>>,
}

impl IdentityGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `identity`. Access ends when the guard drops.
    pub async fn acquire(&self, identity: &RequestIdentity) -> OwnedMutexGuard<()> {
        let slot = {
            let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
            // Slots nobody holds or waits on
            slots.retain(|_, slot| Arc::strong_count(slot) > 1);
            slots.entry(identity.clone()).or_default().clone()
        };
        slot.lock_owned().await
    }

    /// Number of identities currently tracked
    #[cfg(test)]
    fn len(&self) -> usize {
        self.slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}
