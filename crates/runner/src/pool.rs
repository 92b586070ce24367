//! Bounded pool of exclusive external handles
//!
//! Handles are created lazily by a factory, leased to one scenario at a
//! time and returned when the lease drops.

use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::Mutex;
use serde::Serialize;
use std::future::Future;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, info, warn};

use stepdeck_common::StepError;

/// An exclusively owned external handle
#[async_trait]
pub trait Resource: Send + 'static {
    /// Prepare the handle for its next lease
    async fn reset(&mut self) -> Result<(), StepError> {
        Ok(())
    }

    async fn close(&mut self) -> Result<(), StepError>;
}

type Factory<R> = Arc<dyn Fn(usize) -> BoxFuture<'static, Result<R, StepError>> + Send + Sync>;

struct PoolInner<R> {
    idle: Mutex<Vec<R>>,
    semaphore: Arc<Semaphore>,
    factory: Factory<R>,
    capacity: usize,
    created: AtomicUsize,
    acquire_timeout: Duration,
    closed: AtomicBool,
}

#[derive(Debug, Clone, Serialize)]
pub struct PoolStats {
    pub capacity: usize,
    /// Handles created over the pool's lifetime
    pub created: usize,
    pub idle: usize,
    pub in_use: usize,
}

pub struct ResourcePool<R: Resource> {
    inner: Arc<PoolInner<R>>,
}

impl<R: Resource> Clone for ResourcePool<R> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<R: Resource> ResourcePool<R> {
    /// `factory` receives a running index so handles can be told apart
    pub fn new<F, Fut>(capacity: usize, acquire_timeout: Duration, factory: F) -> Self
    where
        F: Fn(usize) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, StepError>> + Send + 'static,
    {
        let capacity = capacity.max(1);
        Self {
            inner: Arc::new(PoolInner {
                idle: Mutex::new(Vec::new()),
                semaphore: Arc::new(Semaphore::new(capacity)),
                factory: Arc::new(move |n| factory(n).boxed()),
                capacity,
                created: AtomicUsize::new(0),
                acquire_timeout,
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Lease a handle, waiting at most the acquire timeout for one to free up
    pub async fn acquire(&self) -> Result<Lease<R>, StepError> {
        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(StepError::Resource("resource pool is closed".to_string()));
        }

        let permit = tokio::time::timeout(
            self.inner.acquire_timeout,
            self.inner.semaphore.clone().acquire_owned(),
        )
        .await
        .map_err(|_| StepError::Timeout {
            what: "a free pooled resource".to_string(),
            after_ms: self.inner.acquire_timeout.as_millis() as u64,
        })?
        .map_err(|_| StepError::Resource("resource pool is closed".to_string()))?;

        let idle = self.inner.idle.lock().pop();
        let resource = match idle {
            Some(mut resource) => match resource.reset().await {
                Ok(()) => resource,
                Err(e) => {
                    warn!("Discarding pooled resource that failed to reset: {}", e);
                    if let Err(e) = resource.close().await {
                        warn!("Discarded resource did not close cleanly: {}", e);
                    }
                    self.create().await?
                }
            },
            None => self.create().await?,
        };

        Ok(Lease {
            resource: Some(resource),
            permit: Some(permit),
            pool: self.inner.clone(),
        })
    }

    async fn create(&self) -> Result<R, StepError> {
        let index = self.inner.created.fetch_add(1, Ordering::SeqCst);
        debug!(index, "Creating pooled resource");
        (self.inner.factory)(index).await
    }

    /// Close idle handles and refuse new leases. Handles still leased are
    /// dropped when their lease ends.
    pub async fn close(&self) {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.inner.semaphore.close();

        let idle: Vec<R> = std::mem::take(&mut *self.inner.idle.lock());
        info!("Closing resource pool ({} idle)", idle.len());
        for mut resource in idle {
            if let Err(e) = resource.close().await {
                warn!("Failed to close pooled resource: {}", e);
            }
        }
    }

    pub fn stats(&self) -> PoolStats {
        let idle = self.inner.idle.lock().len();
        PoolStats {
            capacity: self.inner.capacity,
            created: self.inner.created.load(Ordering::SeqCst),
            idle,
            in_use: self.inner.capacity - self.inner.semaphore.available_permits(),
        }
    }
}

/// Exclusive use of one pooled handle
pub struct Lease<R: Resource> {
    resource: Option<R>,
    permit: Option<OwnedSemaphorePermit>,
    pool: Arc<PoolInner<R>>,
}

impl<R: Resource> Lease<R> {
    /// Return the handle to the pool
    pub fn release(self) {
        drop(self);
    }

    /// Close the handle instead of returning it, e.g. after it crashed
    pub async fn discard(mut self) -> Result<(), StepError> {
        match self.resource.take() {
            Some(mut resource) => resource.close().await,
            None => Ok(()),
        }
    }
}

impl<R: Resource> Deref for Lease<R> {
    type Target = R;

    fn deref(&self) -> &R {
        // Only `discard` takes the resource, and it consumes the lease
        self.resource.as_ref().unwrap_or_else(|| unreachable!())
    }
}

impl<R: Resource> DerefMut for Lease<R> {
    fn deref_mut(&mut self) -> &mut R {
        self.resource.as_mut().unwrap_or_else(|| unreachable!())
    }
}

impl<R: Resource> Drop for Lease<R> {
    fn drop(&mut self) {
        if let Some(resource) = self.resource.take() {
            if !self.pool.closed.load(Ordering::SeqCst) {
                self.pool.idle.lock().push(resource);
            }
        }
        self.permit.take();
    }
}
