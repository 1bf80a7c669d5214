//! Stratus Core - chunked multipart upload engine
//!
//! This crate provides:
//! - Reassembly of arbitrarily sized client chunks into fixed-size parts
//! - Concurrent part upload against an S3-compatible object store
//! - Ordered multipart finalization with exactly-once responses
//! - Abort-on-failure cleanup of partially uploaded objects
//! - An HTTP service exposing upload, download, delete and copy

pub mod config;
pub mod error;
pub mod metrics;
pub mod protocol;
pub mod runtime;
pub mod service;
pub mod storage;
pub mod telemetry;
pub mod upload;

pub use config::ServerConfig;
pub use error::{Result, StratusError};
pub use protocol::{UploadChunk, UploadResponse};
pub use runtime::ServerRuntime;
pub use service::StorageService;
pub use storage::{InMemoryObjectStore, ObjectStore, S3Client};
pub use upload::{UploadCoordinator, UploadSession};
