//! Tokio runtime executor configuration
//!
//! Separate runtimes for serving requests and for part-upload workers, so
//! a burst of large uploads cannot starve the request loop.

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tokio::runtime::{Builder, Handle, Runtime};

use crate::error::{Result, StratusError};

/// Configuration for the server runtime
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Number of threads serving HTTP requests
    pub io_threads: usize,
    /// Number of threads running part uploads
    pub upload_threads: usize,
    /// Grace period for in-flight work at shutdown
    pub shutdown_timeout_secs: u64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        let cpus = num_cpus::get();
        Self {
            io_threads: cpus.max(2),
            upload_threads: cpus.max(2),
            shutdown_timeout_secs: 30,
        }
    }
}

/// Dual-runtime executor for the storage server
pub struct ServerRuntime {
    /// Request-serving runtime
    io_runtime: Runtime,
    /// Part-upload worker runtime
    upload_runtime: Runtime,
    config: RuntimeConfig,
}

impl ServerRuntime {
    /// Create a new runtime with the given configuration
    pub fn new(config: RuntimeConfig) -> Result<Self> {
        let io_runtime = Builder::new_multi_thread()
            .worker_threads(config.io_threads.max(1))
            .thread_name("stratus-io")
            .enable_all()
            .build()
            .map_err(|e| StratusError::Internal {
                message: format!("Failed to create I/O runtime: {}", e),
            })?;

        let upload_runtime = Builder::new_multi_thread()
            .worker_threads(config.upload_threads.max(1))
            .thread_name("stratus-upload")
            .enable_all()
            .build()
            .map_err(|e| StratusError::Internal {
                message: format!("Failed to create upload runtime: {}", e),
            })?;

        Ok(Self {
            io_runtime,
            upload_runtime,
            config,
        })
    }

    /// Run a future on the I/O runtime, blocking until complete
    pub fn block_on_io<F: Future>(&self, future: F) -> F::Output {
        self.io_runtime.block_on(future)
    }

    /// Handle part uploads are spawned on
    pub fn upload_handle(&self) -> Handle {
        self.upload_runtime.handle().clone()
    }

    /// Graceful shutdown of both runtimes
    pub fn shutdown(self) {
        let grace = Duration::from_secs(self.config.shutdown_timeout_secs);
        // Uploads first: the pool has already drained or given up
        self.upload_runtime.shutdown_timeout(grace);
        self.io_runtime.shutdown_timeout(grace);
    }
}
