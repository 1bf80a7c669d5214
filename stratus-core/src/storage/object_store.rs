//! Object store port
//!
//! The narrow interface the upload engine consumes. Adapters translate it
//! onto a concrete backend; the engine never retries a call.

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::Result;

/// Content type used when the caller supplies none
pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// A part accepted by the store, referenced again at completion time
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedPart {
    /// 1-based part number
    pub part_number: u32,
    /// Opaque identifier returned by the store
    pub etag: String,
    /// Payload size in bytes
    pub size_bytes: u64,
}

impl CompletedPart {
    pub fn new(part_number: u32, etag: impl Into<String>, size_bytes: u64) -> Self {
        Self {
            part_number,
            etag: etag.into(),
            size_bytes,
        }
    }
}

/// Object store operations used by the upload engine and the unary calls
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Start a multipart upload and return the store-issued upload id
    async fn create_multipart_upload(&self, key: &str, content_type: &str) -> Result<String>;

    /// Upload one part and return its etag
    async fn upload_part(
        &self,
        key: &str,
        upload_id: &str,
        part_number: u32,
        data: Bytes,
    ) -> Result<String>;

    /// Assemble the object from parts given in ascending part-number order
    async fn complete_multipart_upload(
        &self,
        key: &str,
        upload_id: &str,
        parts: &[CompletedPart],
    ) -> Result<()>;

    /// Discard an in-progress multipart upload and its parts
    async fn abort_multipart_upload(&self, key: &str, upload_id: &str) -> Result<()>;

    /// Store a whole object in one request
    async fn put_object(&self, key: &str, data: Bytes, content_type: &str) -> Result<String>;

    /// Read a whole object
    async fn get_object(&self, key: &str) -> Result<Bytes>;

    /// Delete an object; deleting a missing key is not an error
    async fn delete_object(&self, key: &str) -> Result<()>;

    /// Server-side copy within the store
    async fn copy_object(&self, src_key: &str, dst_key: &str) -> Result<String>;
}
