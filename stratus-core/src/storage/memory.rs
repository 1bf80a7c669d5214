//! In-memory object store
//!
//! Backs local development and tests. Multipart semantics mirror S3:
//! completion must name every uploaded part with its etag, in order.

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

use super::object_store::{CompletedPart, ObjectStore};
use crate::error::{Result, StratusError};

/// Stored object with its metadata
#[derive(Debug, Clone)]
pub struct StoredObject {
    pub data: Bytes,
    pub content_type: String,
    pub etag: String,
}

struct PendingUpload {
    key: String,
    content_type: String,
    parts: BTreeMap<u32, (String, Bytes)>,
}

/// Thread-safe in-memory implementation of [`ObjectStore`]
#[derive(Default)]
pub struct InMemoryObjectStore {
    objects: Mutex<HashMap<String, StoredObject>>,
    uploads: Mutex<HashMap<String, PendingUpload>>,
    next_upload_id: AtomicU64,
}

impl InMemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of a stored object
    pub fn object(&self, key: &str) -> Option<StoredObject> {
        self.objects.lock().get(key).cloned()
    }

    /// Number of stored objects
    pub fn object_count(&self) -> usize {
        self.objects.lock().len()
    }

    /// Number of multipart uploads neither completed nor aborted
    pub fn open_uploads(&self) -> usize {
        self.uploads.lock().len()
    }

    fn etag_for(data: &[u8]) -> String {
        format!("\"{:08x}\"", crc32c::crc32c(data))
    }
}

#[async_trait]
impl ObjectStore for InMemoryObjectStore {
    async fn create_multipart_upload(&self, key: &str, content_type: &str) -> Result<String> {
        let id = self.next_upload_id.fetch_add(1, Ordering::Relaxed) + 1;
        let upload_id = format!("mem-upload-{}", id);
        self.uploads.lock().insert(
            upload_id.clone(),
            PendingUpload {
                key: key.to_string(),
                content_type: content_type.to_string(),
                parts: BTreeMap::new(),
            },
        );
        debug!("Created in-memory upload {} for {}", upload_id, key);
        Ok(upload_id)
    }

    async fn upload_part(
        &self,
        key: &str,
        upload_id: &str,
        part_number: u32,
        data: Bytes,
    ) -> Result<String> {
        let mut uploads = self.uploads.lock();
        let upload = uploads
            .get_mut(upload_id)
            .filter(|u| u.key == key)
            .ok_or_else(|| StratusError::storage(format!("No such upload: {}", upload_id)))?;

        if part_number == 0 || part_number > 10_000 {
            return Err(StratusError::storage(format!(
                "Invalid part number {} for {}",
                part_number, key
            )));
        }

        let etag = Self::etag_for(&data);
        upload.parts.insert(part_number, (etag.clone(), data));
        Ok(etag)
    }

    async fn complete_multipart_upload(
        &self,
        key: &str,
        upload_id: &str,
        parts: &[CompletedPart],
    ) -> Result<()> {
        let mut uploads = self.uploads.lock();
        let upload = uploads
            .get(upload_id)
            .filter(|u| u.key == key)
            .ok_or_else(|| StratusError::storage(format!("No such upload: {}", upload_id)))?;

        if parts.is_empty() {
            return Err(StratusError::storage("Multipart upload requires at least one part"));
        }

        let mut data = BytesMut::new();
        let mut previous = 0;
        for part in parts {
            if part.part_number <= previous {
                return Err(StratusError::storage("Parts must be in ascending order"));
            }
            previous = part.part_number;

            match upload.parts.get(&part.part_number) {
                Some((etag, bytes)) if *etag == part.etag => data.extend_from_slice(bytes),
                Some(_) => {
                    return Err(StratusError::storage(format!(
                        "ETag mismatch for part {}",
                        part.part_number
                    )))
                }
                None => {
                    return Err(StratusError::storage(format!(
                        "Part {} was never uploaded",
                        part.part_number
                    )))
                }
            }
        }

        let Some(upload) = uploads.remove(upload_id) else {
            return Err(StratusError::Internal {
                message: "Upload vanished while locked".into(),
            });
        };
        let data = data.freeze();
        let etag = format!("\"{:08x}-{}\"", crc32c::crc32c(&data), parts.len());
        self.objects.lock().insert(
            key.to_string(),
            StoredObject {
                data,
                content_type: upload.content_type,
                etag,
            },
        );
        Ok(())
    }

    async fn abort_multipart_upload(&self, key: &str, upload_id: &str) -> Result<()> {
        let mut uploads = self.uploads.lock();
        match uploads.get(upload_id) {
            Some(upload) if upload.key == key => {
                uploads.remove(upload_id);
                Ok(())
            }
            _ => Err(StratusError::storage(format!("No such upload: {}", upload_id))),
        }
    }

    async fn put_object(&self, key: &str, data: Bytes, content_type: &str) -> Result<String> {
        let etag = Self::etag_for(&data);
        self.objects.lock().insert(
            key.to_string(),
            StoredObject {
                data,
                content_type: content_type.to_string(),
                etag: etag.clone(),
            },
        );
        Ok(etag)
    }

    async fn get_object(&self, key: &str) -> Result<Bytes> {
        self.objects
            .lock()
            .get(key)
            .map(|o| o.data.clone())
            .ok_or_else(|| StratusError::ObjectNotFound { key: key.into() })
    }

    async fn delete_object(&self, key: &str) -> Result<()> {
        self.objects.lock().remove(key);
        Ok(())
    }

    async fn copy_object(&self, src_key: &str, dst_key: &str) -> Result<String> {
        let mut objects = self.objects.lock();
        let source = objects
            .get(src_key)
            .cloned()
            .ok_or_else(|| StratusError::ObjectNotFound { key: src_key.into() })?;
        let etag = source.etag.clone();
        objects.insert(dst_key.to_string(), source);
        Ok(etag)
    }
}
