//! Fair, bounded-concurrency lock guarding the embedding endpoint.
//!
//! Grants are handed out in request order by a tokio [`Semaphore`]. Callers get
//! a [`LockToken`] that must be passed back to [`ResourceLockManager::release`];
//! a token dropped without release still returns its grant, with a warning.

use crate::error::{IndexerError, Result};
use log::{debug, error, info, warn};
use serde::Serialize;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;

pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug)]
struct LockInner {
    name: String,
    concurrency: usize,
    semaphore: Arc<Semaphore>,
    grants: Mutex<HashMap<u64, OwnedSemaphorePermit>>,
    hold: Mutex<Option<ExternalHold>>,
    next_id: AtomicU64,
    waiting: AtomicUsize,
}

#[derive(Debug)]
struct ExternalHold {
    id: u64,
    _permits: OwnedSemaphorePermit,
}

impl LockInner {
    fn grants(&self) -> MutexGuard<'_, HashMap<u64, OwnedSemaphorePermit>> {
        self.grants.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn hold(&self) -> MutexGuard<'_, Option<ExternalHold>> {
        self.hold.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Proof of an outstanding grant. Not reentrant: a holder that asks again
/// waits behind itself until its timeout.
#[derive(Debug)]
#[must_use = "a lock token must be released"]
pub struct LockToken {
    id: u64,
    inner: Weak<LockInner>,
}

impl LockToken {
    #[must_use]
    pub const fn id(&self) -> u64 {
        self.id
    }
}

impl Drop for LockToken {
    fn drop(&mut self) {
        if let Some(inner) = self.inner.upgrade() {
            if inner.grants().remove(&self.id).is_some() {
                warn!(
                    "Lock token {} on '{}' dropped without release; grant returned",
                    self.id, inner.name
                );
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LockStatus {
    pub name: String,
    pub concurrency: usize,
    pub held: usize,
    pub waiting: usize,
    pub available: usize,
    pub externally_held: bool,
}

impl LockStatus {
    #[must_use]
    pub const fn is_locked(&self) -> bool {
        self.available == 0
    }
}

#[derive(Debug, Clone)]
pub struct ResourceLockManager {
    inner: Arc<LockInner>,
}

impl Default for ResourceLockManager {
    fn default() -> Self {
        Self::new("embedding", 1)
    }
}

struct WaitGuard<'a>(&'a AtomicUsize);

impl<'a> WaitGuard<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for WaitGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl ResourceLockManager {
    pub fn new(name: impl Into<String>, concurrency: usize) -> Self {
        let concurrency = concurrency.max(1);
        Self {
            inner: Arc::new(LockInner {
                name: name.into(),
                concurrency,
                semaphore: Arc::new(Semaphore::new(concurrency)),
                grants: Mutex::new(HashMap::new()),
                hold: Mutex::new(None),
                next_id: AtomicU64::new(1),
                waiting: AtomicUsize::new(0),
            }),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Wait in line for a grant.
    ///
    /// Fails with `LockTimeout` when `timeout` elapses first and with
    /// `Cancelled` when `cancel` fires; in both cases the caller leaves the line.
    pub async fn acquire(&self, timeout: Duration, cancel: &CancellationToken) -> Result<LockToken> {
        let permit = {
            let _waiting = WaitGuard::enter(&self.inner.waiting);
            self.wait_for(1, timeout, cancel).await?
        };

        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner.grants().insert(id, permit);
        debug!("Lock '{}' granted to token {id}", self.inner.name);
        Ok(LockToken {
            id,
            inner: Arc::downgrade(&self.inner),
        })
    }

    /// Give a grant back. Releasing the same token twice, or a token issued
    /// by another manager, is an error.
    pub fn release(&self, token: &LockToken) -> Result<()> {
        if !Weak::ptr_eq(&token.inner, &Arc::downgrade(&self.inner)) {
            error!(
                "Lock '{}': token {} belongs to another lock",
                self.inner.name, token.id
            );
            return Err(IndexerError::LockNotHeld(token.id));
        }
        let permit = self.inner.grants().remove(&token.id);
        match permit {
            Some(permit) => {
                drop(permit);
                debug!("Lock '{}' released by token {}", self.inner.name, token.id);
                Ok(())
            }
            None => {
                error!(
                    "Lock '{}': token {} released but not held",
                    self.inner.name, token.id
                );
                Err(IndexerError::LockNotHeld(token.id))
            }
        }
    }

    /// Run `work` while holding a grant.
    pub async fn with_lock<F, T>(
        &self,
        timeout: Duration,
        cancel: &CancellationToken,
        work: F,
    ) -> Result<T>
    where
        F: Future<Output = T>,
    {
        let token = self.acquire(timeout, cancel).await?;
        let out = work.await;
        self.release(&token)?;
        Ok(out)
    }

    #[must_use]
    pub fn status(&self) -> LockStatus {
        LockStatus {
            name: self.inner.name.clone(),
            concurrency: self.inner.concurrency,
            held: self.inner.grants().len(),
            waiting: self.inner.waiting.load(Ordering::SeqCst),
            available: self.inner.semaphore.available_permits(),
            externally_held: self.inner.hold().is_some(),
        }
    }

    /// Take every grant on behalf of an outside party (for example an agent
    /// running its own model calls) for at most `ttl`.
    ///
    /// Queues behind current holders like any other request. Returns the
    /// hold's id; the hold lapses on its own after `ttl` or earlier through
    /// [`release_hold`](Self::release_hold). A new hold replaces an older one.
    pub async fn hold_for(
        &self,
        ttl: Duration,
        wait: Duration,
        cancel: &CancellationToken,
    ) -> Result<u64> {
        let permits = {
            let _waiting = WaitGuard::enter(&self.inner.waiting);
            self.wait_for(self.inner.concurrency, wait, cancel).await?
        };
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        *self.inner.hold() = Some(ExternalHold {
            id,
            _permits: permits,
        });
        info!("Lock '{}' held externally for {ttl:?}", self.inner.name);

        let inner = Arc::downgrade(&self.inner);
        tokio::spawn(async move {
            tokio::time::sleep(ttl).await;
            if let Some(inner) = inner.upgrade() {
                let mut hold = inner.hold();
                if hold.as_ref().is_some_and(|h| h.id == id) {
                    *hold = None;
                    info!("External hold on '{}' expired", inner.name);
                }
            }
        });
        Ok(id)
    }

    /// End the external hold early. Returns whether one was active.
    pub fn release_hold(&self) -> bool {
        let released = self.inner.hold().take().is_some();
        if released {
            info!("External hold on '{}' released", self.inner.name);
        }
        released
    }

    async fn wait_for(
        &self,
        permits: usize,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<OwnedSemaphorePermit> {
        let permits = u32::try_from(permits).unwrap_or(u32::MAX);
        let semaphore = Arc::clone(&self.inner.semaphore);
        tokio::select! {
            biased;
            () = cancel.cancelled() => Err(IndexerError::Cancelled),
            acquired = tokio::time::timeout(timeout, semaphore.acquire_many_owned(permits)) => {
                match acquired {
                    Ok(Ok(permit)) => Ok(permit),
                    Ok(Err(_closed)) => Err(IndexerError::Other(format!(
                        "lock '{}' is closed",
                        self.inner.name
                    ))),
                    Err(_elapsed) => {
                        #[allow(clippy::cast_possible_truncation)]
                        let ms = timeout.as_millis() as u64;
                        Err(IndexerError::LockTimeout(ms))
                    }
                }
            }
        }
    }
}
