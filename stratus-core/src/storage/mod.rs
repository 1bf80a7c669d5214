//! Object storage
//!
//! The [`ObjectStore`] port consumed by the upload engine, with an
//! S3-compatible adapter and an in-memory one.

pub mod buffer_pool;
pub mod memory;
pub mod object_store;
pub mod s3;
pub mod sigv4;

pub use buffer_pool::ByteBufferPool;
pub use memory::InMemoryObjectStore;
pub use object_store::{CompletedPart, ObjectStore, DEFAULT_CONTENT_TYPE};
pub use s3::{S3Client, S3Config};

/// Smallest part size S3 accepts for every part but the last (5 MiB)
pub const MIN_PART_SIZE: usize = 5 * 1024 * 1024;

/// Default part size (50 MiB)
pub const DEFAULT_PART_SIZE: usize = 50 * 1024 * 1024;
