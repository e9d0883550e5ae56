//! Time bounded exclusive locks backed by the store

use crate::model::{Lock, LockEntity, TenantId};
use crate::store::Store;
use crate::{CsmsError, CsmsResult};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, warn};
use uuid::Uuid;

/// Grants and releases locks keyed by resource
#[derive(Clone)]
pub struct LockManager {
    store: Arc<dyn Store>,
    ttl: Duration,
    holder: String,
}

impl LockManager {
    pub fn new(store: Arc<dyn Store>, ttl: Duration) -> Self {
        Self {
            store,
            ttl,
            holder: format!("station-manager-{}", std::process::id()),
        }
    }

    /// Single acquisition attempt
    pub async fn acquire(
        &self,
        tenant: &TenantId,
        entity: LockEntity,
        key: &str,
    ) -> CsmsResult<Option<Lock>> {
        let now = Utc::now();
        let ttl = chrono::Duration::from_std(self.ttl).map_err(|e| CsmsError::Configuration {
            message: format!("lock TTL out of range: {}", e),
        })?;
        let lock = Lock {
            id: Uuid::new_v4().to_string(),
            tenant: tenant.clone(),
            entity,
            key: key.to_string(),
            holder: self.holder.clone(),
            timestamp: now,
            expires_at: now + ttl,
        };

        if self.store.try_acquire_lock(&lock).await? {
            debug!("Lock {} acquired on {}", lock.id, lock.resource());
            Ok(Some(lock))
        } else {
            Ok(None)
        }
    }

    /// Retry every `poll_interval` until `timeout` elapses.
    ///
    /// A zero timeout makes a single attempt.
    pub async fn acquire_with_timeout(
        &self,
        tenant: &TenantId,
        entity: LockEntity,
        key: &str,
        timeout: Duration,
        poll_interval: Duration,
    ) -> CsmsResult<Option<Lock>> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(lock) = self.acquire(tenant, entity, key).await? {
                return Ok(Some(lock));
            }
            let now = Instant::now();
            if now >= deadline {
                debug!("Lock on {}:{} still held after {:?}", entity, key, timeout);
                return Ok(None);
            }
            let wait = poll_interval.max(Duration::from_millis(1));
            tokio::time::sleep(wait.min(deadline - now)).await;
        }
    }

    /// [`acquire_with_timeout`](Self::acquire_with_timeout) returning a guard
    /// that releases the lock even when its holder never gets to
    pub async fn acquire_guarded(
        &self,
        tenant: &TenantId,
        entity: LockEntity,
        key: &str,
        timeout: Duration,
        poll_interval: Duration,
    ) -> CsmsResult<Option<LockGuard>> {
        let lock = self
            .acquire_with_timeout(tenant, entity, key, timeout, poll_interval)
            .await?;
        Ok(lock.map(|lock| LockGuard {
            locks: self.clone(),
            lock: Some(lock),
        }))
    }

    pub async fn release(&self, lock: &Lock) -> CsmsResult<bool> {
        let released = self.store.release_lock(lock).await?;
        if released {
            debug!("Lock {} released on {}", lock.id, lock.resource());
        } else {
            warn!(
                "Lock {} on {} was already gone or taken over",
                lock.id,
                lock.resource()
            );
        }
        Ok(released)
    }
}

/// A held lock.
///
/// Call [`release`](Self::release) when done. A guard dropped while still
/// holding its lock, by a cancelled caller or a panic, spawns the release on
/// the current runtime instead of leaving the lock until it expires.
pub struct LockGuard {
    locks: LockManager,
    lock: Option<Lock>,
}

impl LockGuard {
    pub async fn release(mut self) -> CsmsResult<bool> {
        let Some(lock) = self.lock.as_ref() else {
            return Ok(false);
        };
        let released = self.locks.release(lock).await;
        self.lock = None;
        released
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        let Some(lock) = self.lock.take() else {
            return;
        };
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!(
                "Lock {} on {} dropped outside a runtime, left to expire",
                lock.id,
                lock.resource()
            );
            return;
        };
        warn!(
            "Lock {} on {} dropped while held, releasing in background",
            lock.id,
            lock.resource()
        );
        let locks = self.locks.clone();
        runtime.spawn(async move {
            if let Err(e) = locks.release(&lock).await {
                error!("Cannot release lock {} on {}: {}", lock.id, lock.resource(), e);
            }
        });
    }
}
