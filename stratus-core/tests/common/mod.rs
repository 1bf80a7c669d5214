//! Shared test fixtures: a fault-injecting object store and stream helpers

#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use stratus_core::error::{Result, StratusError};
use stratus_core::protocol::UploadChunk;
use stratus_core::storage::{CompletedPart, InMemoryObjectStore, ObjectStore};
use stratus_core::upload::{PoolConfig, UploadConfig, UploadCoordinator, WorkerPool};

pub const KIB: usize = 1024;
pub const MIB: usize = 1024 * 1024;

/// One call seen by [`FaultyStore`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreCall {
    Create { key: String },
    UploadPart { part_number: u32, size: usize },
    Complete { part_numbers: Vec<u32>, etags: Vec<String> },
    Abort { key: String },
    Put { key: String, size: usize },
}

/// In-memory store with delays, injected failures and a call log
///
/// Part etags are reported as `etag-{n}` so completion payloads are easy
/// to assert on.
#[derive(Default)]
pub struct FaultyStore {
    inner: InMemoryObjectStore,
    part_delay: Duration,
    failing_parts: HashSet<u32>,
    fail_create: bool,
    fail_complete: bool,
    inner_etags: Mutex<HashMap<(String, u32), String>>,
    active: AtomicUsize,
    peak: AtomicUsize,
    calls: Mutex<Vec<StoreCall>>,
}

impl FaultyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_part_delay(mut self, delay: Duration) -> Self {
        self.part_delay = delay;
        self
    }

    pub fn failing_parts(mut self, parts: impl IntoIterator<Item = u32>) -> Self {
        self.failing_parts = parts.into_iter().collect();
        self
    }

    pub fn failing_create(mut self) -> Self {
        self.fail_create = true;
        self
    }

    pub fn failing_complete(mut self) -> Self {
        self.fail_complete = true;
        self
    }

    pub fn inner(&self) -> &InMemoryObjectStore {
        &self.inner
    }

    pub fn calls(&self) -> Vec<StoreCall> {
        self.calls.lock().clone()
    }

    /// Highest number of part uploads in progress at once
    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    pub fn abort_count(&self) -> usize {
        self.count(|call| matches!(call, StoreCall::Abort { .. }))
    }

    pub fn complete_count(&self) -> usize {
        self.count(|call| matches!(call, StoreCall::Complete { .. }))
    }

    pub fn create_count(&self) -> usize {
        self.count(|call| matches!(call, StoreCall::Create { .. }))
    }

    /// Uploaded part sizes ordered by part number
    pub fn part_sizes(&self) -> Vec<usize> {
        let mut parts: Vec<(u32, usize)> = self
            .calls()
            .into_iter()
            .filter_map(|call| match call {
                StoreCall::UploadPart { part_number, size } => Some((part_number, size)),
                _ => None,
            })
            .collect();
        parts.sort();
        parts.into_iter().map(|(_, size)| size).collect()
    }

    pub fn completion(&self) -> Option<(Vec<u32>, Vec<String>)> {
        self.calls().into_iter().find_map(|call| match call {
            StoreCall::Complete { part_numbers, etags } => Some((part_numbers, etags)),
            _ => None,
        })
    }

    fn count(&self, predicate: impl Fn(&StoreCall) -> bool) -> usize {
        self.calls.lock().iter().filter(|call| predicate(call)).count()
    }

    fn log(&self, call: StoreCall) {
        self.calls.lock().push(call);
    }
}

struct ActiveGuard<'a>(&'a AtomicUsize);

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl ObjectStore for FaultyStore {
    async fn create_multipart_upload(&self, key: &str, content_type: &str) -> Result<String> {
        self.log(StoreCall::Create { key: key.to_string() });
        if self.fail_create {
            return Err(StratusError::storage("injected create failure"));
        }
        self.inner.create_multipart_upload(key, content_type).await
    }

    async fn upload_part(
        &self,
        key: &str,
        upload_id: &str,
        part_number: u32,
        data: Bytes,
    ) -> Result<String> {
        self.log(StoreCall::UploadPart {
            part_number,
            size: data.len(),
        });

        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        let _guard = ActiveGuard(&self.active);

        if !self.part_delay.is_zero() {
            tokio::time::sleep(self.part_delay).await;
        }
        if self.failing_parts.contains(&part_number) {
            return Err(StratusError::storage(format!(
                "injected failure for part {}",
                part_number
            )));
        }

        let etag = self
            .inner
            .upload_part(key, upload_id, part_number, data)
            .await?;
        self.inner_etags
            .lock()
            .insert((upload_id.to_string(), part_number), etag);
        Ok(format!("etag-{}", part_number))
    }

    async fn complete_multipart_upload(
        &self,
        key: &str,
        upload_id: &str,
        parts: &[CompletedPart],
    ) -> Result<()> {
        self.log(StoreCall::Complete {
            part_numbers: parts.iter().map(|p| p.part_number).collect(),
            etags: parts.iter().map(|p| p.etag.clone()).collect(),
        });
        if self.fail_complete {
            return Err(StratusError::storage("injected complete failure"));
        }

        let translated: Vec<CompletedPart> = {
            let etags = self.inner_etags.lock();
            parts
                .iter()
                .map(|p| {
                    let etag = etags
                        .get(&(upload_id.to_string(), p.part_number))
                        .cloned()
                        .unwrap_or_default();
                    CompletedPart::new(p.part_number, etag, p.size_bytes)
                })
                .collect()
        };
        self.inner
            .complete_multipart_upload(key, upload_id, &translated)
            .await
    }

    async fn abort_multipart_upload(&self, key: &str, upload_id: &str) -> Result<()> {
        self.log(StoreCall::Abort { key: key.to_string() });
        self.inner.abort_multipart_upload(key, upload_id).await
    }

    async fn put_object(&self, key: &str, data: Bytes, content_type: &str) -> Result<String> {
        self.log(StoreCall::Put {
            key: key.to_string(),
            size: data.len(),
        });
        self.inner.put_object(key, data, content_type).await
    }

    async fn get_object(&self, key: &str) -> Result<Bytes> {
        self.inner.get_object(key).await
    }

    async fn delete_object(&self, key: &str) -> Result<()> {
        self.inner.delete_object(key).await
    }

    async fn copy_object(&self, src_key: &str, dst_key: &str) -> Result<String> {
        self.inner.copy_object(src_key, dst_key).await
    }
}

/// Coordinator on the current runtime with exactly `parallelism` workers
pub fn coordinator(store: Arc<dyn ObjectStore>, part_size: usize, parallelism: usize) -> UploadCoordinator {
    UploadCoordinator::new(
        store,
        WorkerPool::current(PoolConfig {
            parallelism,
            cap_to_cpus: false,
            ..Default::default()
        }),
        UploadConfig {
            part_size,
            buffer_pool_size: 4,
            ..Default::default()
        },
    )
}

/// Deterministic payload
pub fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

/// Split `data` into protocol messages of `chunk_size`, last one flagged
pub fn chunk_messages(key: &str, data: &[u8], chunk_size: usize) -> Vec<Result<UploadChunk>> {
    let pieces: Vec<&[u8]> = data.chunks(chunk_size).collect();
    let count = pieces.len();
    pieces
        .into_iter()
        .enumerate()
        .map(|(index, piece)| {
            let chunk = UploadChunk::data(
                key,
                "application/octet-stream",
                index as u64,
                Bytes::copy_from_slice(piece),
            );
            Ok(if index + 1 == count { chunk.last() } else { chunk })
        })
        .collect()
}

/// Wait until `condition` holds or a second passes
pub async fn eventually(condition: impl Fn() -> bool) -> bool {
    for _ in 0..100 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}
