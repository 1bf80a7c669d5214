//! Bounded worker pool for part uploads
//!
//! Part uploads run as tasks on the upload runtime. A counting semaphore
//! sized like the pool gates how many are in flight; `submit_part` waits
//! on it, which is what pushes back on the ingestion stream.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{info, warn};

use crate::error::{Result, StratusError};
use crate::metrics::standard;

/// Which sessions share a semaphore
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PermitScope {
    /// One semaphore for every session of a coordinator
    #[default]
    Shared,
    /// Each session gets its own semaphore of the pool size
    PerSession,
}

/// Configuration for the worker pool
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Requested parallelism
    pub parallelism: usize,
    /// Cap `parallelism` at the number of available CPUs
    pub cap_to_cpus: bool,
    /// Semaphore sharing between sessions
    pub permit_scope: PermitScope,
    /// How long shutdown waits for in-flight parts
    pub shutdown_timeout_secs: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            parallelism: 4,
            cap_to_cpus: true,
            permit_scope: PermitScope::Shared,
            shutdown_timeout_secs: 30,
        }
    }
}

impl PoolConfig {
    /// `min(parallelism, cpus)` when capped, never below one
    pub fn effective_size(&self) -> usize {
        let size = if self.cap_to_cpus {
            self.parallelism.min(num_cpus::get())
        } else {
            self.parallelism
        };
        size.max(1)
    }
}

/// In-flight accounting shared by every permit a pool hands out
#[derive(Debug, Default)]
struct PoolStats {
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

/// Counting semaphore gating in-flight part uploads
#[derive(Clone)]
pub struct UploadPermits {
    semaphore: Arc<Semaphore>,
    capacity: usize,
    stats: Arc<PoolStats>,
}

impl UploadPermits {
    fn new(capacity: usize, stats: Arc<PoolStats>) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            capacity,
            stats,
        }
    }

    /// Wait for a slot; fails only once the pool is shut down
    pub async fn acquire(&self) -> Result<UploadPermit> {
        let permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| StratusError::ShutdownInProgress)?;
        Ok(self.track(permit))
    }

    /// Try to acquire without blocking
    pub fn try_acquire(&self) -> Option<UploadPermit> {
        self.semaphore
            .clone()
            .try_acquire_owned()
            .ok()
            .map(|permit| self.track(permit))
    }

    fn track(&self, permit: OwnedSemaphorePermit) -> UploadPermit {
        let now = self.stats.in_flight.fetch_add(1, Ordering::AcqRel) + 1;
        self.stats.peak.fetch_max(now, Ordering::AcqRel);
        standard::PARTS_IN_FLIGHT.inc();
        UploadPermit {
            _permit: permit,
            stats: self.stats.clone(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Permits currently free
    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    fn close(&self) {
        self.semaphore.close();
    }
}

/// Permit held by one in-flight part upload
pub struct UploadPermit {
    _permit: OwnedSemaphorePermit,
    stats: Arc<PoolStats>,
}

impl Drop for UploadPermit {
    fn drop(&mut self) {
        self.stats.in_flight.fetch_sub(1, Ordering::AcqRel);
        standard::PARTS_IN_FLIGHT.dec();
    }
}

/// Worker pool: the runtime handle part tasks are spawned on plus the
/// concurrency bound
pub struct WorkerPool {
    handle: Handle,
    size: usize,
    config: PoolConfig,
    shared: UploadPermits,
    /// Semaphores handed to sessions under `PerSession`
    session_semaphores: Mutex<Vec<Weak<Semaphore>>>,
    closed: AtomicBool,
    stats: Arc<PoolStats>,
}

impl WorkerPool {
    /// Create a pool spawning onto `handle`
    pub fn new(config: PoolConfig, handle: Handle) -> Self {
        let size = config.effective_size();
        let stats = Arc::new(PoolStats::default());
        info!(
            "Worker pool: {} workers (requested {}, {:?} permits)",
            size, config.parallelism, config.permit_scope
        );

        Self {
            handle,
            size,
            shared: UploadPermits::new(size, stats.clone()),
            session_semaphores: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
            stats,
            config,
        }
    }

    /// Pool on the current runtime
    pub fn current(config: PoolConfig) -> Self {
        Self::new(config, Handle::current())
    }

    /// Permits a new session should dispatch under
    pub fn permits_for_session(&self) -> UploadPermits {
        match self.config.permit_scope {
            PermitScope::Shared => self.shared.clone(),
            PermitScope::PerSession => {
                let permits = UploadPermits::new(self.size, self.stats.clone());
                let mut semaphores = self.session_semaphores.lock();
                if self.closed.load(Ordering::Acquire) {
                    permits.close();
                } else {
                    semaphores.retain(|semaphore| semaphore.strong_count() > 0);
                    semaphores.push(Arc::downgrade(&permits.semaphore));
                }
                permits
            }
        }
    }

    pub fn handle(&self) -> &Handle {
        &self.handle
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn scope(&self) -> PermitScope {
        self.config.permit_scope
    }

    /// Part uploads currently holding a permit
    pub fn in_flight(&self) -> usize {
        self.stats.in_flight.load(Ordering::Acquire)
    }

    /// Highest in-flight count observed
    pub fn peak_in_flight(&self) -> usize {
        self.stats.peak.load(Ordering::Acquire)
    }

    /// Stop handing out permits and wait for in-flight parts to drain
    ///
    /// Every semaphore the pool created is closed, and sessions started
    /// afterwards get a closed one. Returns false when the timeout elapsed
    /// first.
    pub async fn shutdown(&self) -> bool {
        {
            let mut semaphores = self.session_semaphores.lock();
            self.closed.store(true, Ordering::Release);
            self.shared.close();
            for semaphore in semaphores.drain(..).filter_map(|weak| weak.upgrade()) {
                semaphore.close();
            }
        }
        let timeout = Duration::from_secs(self.config.shutdown_timeout_secs);

        let drained = tokio::time::timeout(timeout, async {
            while self.in_flight() > 0 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .is_ok();

        if drained {
            info!("Worker pool drained");
        } else {
            warn!(
                "Worker pool shutdown timed out with {} part uploads in flight",
                self.in_flight()
            );
        }
        drained
    }
}
