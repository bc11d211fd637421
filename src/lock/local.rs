use crate::lock::{ClusterLock, LockResult};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{debug, info};

/// Locks shared between the tasks of a single process.
///
/// A holder that does not unlock within its `duration_hint` loses the lock to the next waiter.
#[derive(Debug, Default)]
pub struct LocalLock {
    held: Mutex<HashMap<String, Instant>>,
    released: Notify,
}

impl LocalLock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Takes the lock if it is free or expired, otherwise returns the current holder's expiry.
    fn try_lock(&self, token: &str, duration_hint: Duration) -> Result<(), Instant> {
        let now = Instant::now();
        let mut held = self.held.lock();
        match held.get(token) {
            Some(expiry) if *expiry > now => Err(*expiry),
            Some(_) => {
                info!("Taking over expired lock {token}");
                held.insert(token.to_string(), now + duration_hint);
                Ok(())
            }
            None => {
                held.insert(token.to_string(), now + duration_hint);
                Ok(())
            }
        }
    }
}

#[async_trait]
impl ClusterLock for LocalLock {
    async fn lock(&self, token: &str, duration_hint: Duration) -> LockResult<bool> {
        loop {
            let released = self.released.notified();
            tokio::pin!(released);
            released.as_mut().enable();
            match self.try_lock(token, duration_hint) {
                Ok(()) => {
                    debug!("Acquired lock {token}");
                    return Ok(true);
                }
                Err(expiry) => {
                    debug!("Lock {token} is held, waiting");
                    let _ = tokio::time::timeout_at(expiry, released).await;
                }
            }
        }
    }

    async fn unlock(&self, token: &str) -> LockResult<bool> {
        let was_held = self.held.lock().remove(token).is_some();
        if was_held {
            debug!("Released lock {token}");
            self.released.notify_waiters();
        }
        Ok(was_held)
    }

    async fn clear(&self) -> LockResult<()> {
        self.held.lock().clear();
        self.released.notify_waiters();
        Ok(())
    }
}
