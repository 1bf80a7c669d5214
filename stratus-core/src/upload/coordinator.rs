//! Upload coordinator and ingestion driver
//!
//! The coordinator owns the store, the worker pool and the upload settings
//! and hands out sessions. Its ingestion driver turns a stream of
//! [`UploadChunk`] messages (or raw bytes) into session calls and resolves
//! to the stream's single terminal response.

use bytes::Bytes;
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use super::assembler::ChunkAssembler;
use super::pool::WorkerPool;
use super::progress::DEFAULT_PROGRESS_INTERVAL;
use super::response::TerminalSignal;
use super::session::{SessionContext, UploadSession};
use crate::error::{Result, StratusError};
use crate::protocol::{UploadChunk, UploadResponse};
use crate::storage::{ByteBufferPool, ObjectStore, DEFAULT_PART_SIZE, MIN_PART_SIZE};

/// Upload pipeline settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadConfig {
    /// Target part size in bytes; the final part may be smaller
    pub part_size: usize,
    /// Progress is reported every time this many bytes have been uploaded
    pub progress_interval: u64,
    /// Idle part buffers kept for reuse
    pub buffer_pool_size: usize,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            part_size: DEFAULT_PART_SIZE,
            progress_interval: DEFAULT_PROGRESS_INTERVAL,
            buffer_pool_size: 8,
        }
    }
}

/// Factory for upload sessions
pub struct UploadCoordinator {
    store: Arc<dyn ObjectStore>,
    pool: WorkerPool,
    config: UploadConfig,
    buffers: Arc<ByteBufferPool>,
}

impl UploadCoordinator {
    pub fn new(store: Arc<dyn ObjectStore>, pool: WorkerPool, config: UploadConfig) -> Self {
        if config.part_size < MIN_PART_SIZE {
            warn!(
                "Part size {} is below the S3 minimum of {} bytes; real stores will reject multi-part uploads",
                config.part_size, MIN_PART_SIZE
            );
        }
        let buffers = ByteBufferPool::new(config.buffer_pool_size, config.part_size);
        info!(
            "Upload coordinator ready: part size {} bytes, {} workers",
            config.part_size,
            pool.size()
        );

        Self {
            store,
            pool,
            config,
            buffers,
        }
    }

    pub fn store(&self) -> &Arc<dyn ObjectStore> {
        &self.store
    }

    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    pub fn config(&self) -> &UploadConfig {
        &self.config
    }

    pub fn buffers(&self) -> &Arc<ByteBufferPool> {
        &self.buffers
    }

    /// Fresh assembler cutting parts of the configured size
    pub fn assembler(&self) -> ChunkAssembler {
        ChunkAssembler::new(self.config.part_size, self.buffers.clone())
    }

    /// Start a session; the terminal response will go out on `signal`
    pub async fn start_session(
        &self,
        key: &str,
        content_type: &str,
        signal: Arc<TerminalSignal>,
    ) -> Result<UploadSession> {
        let ctx = SessionContext {
            store: self.store.clone(),
            permits: self.pool.permits_for_session(),
            handle: self.pool.handle().clone(),
            buffers: self.buffers.clone(),
            progress_interval: self.config.progress_interval,
        };
        UploadSession::begin(key, content_type, ctx, signal).await
    }

    /// Drive a chunk-message stream to its terminal response
    pub async fn ingest<S>(&self, mut chunks: S) -> UploadResponse
    where
        S: Stream<Item = Result<UploadChunk>> + Send + Unpin,
    {
        let (signal, rx) = TerminalSignal::oneshot();
        let mut ingestion = Ingestion::new(self, signal);

        loop {
            match chunks.next().await {
                Some(Ok(chunk)) => {
                    let last = chunk.is_last_chunk;
                    if let Err(e) = ingestion.accept(chunk).await {
                        ingestion.abandon(e).await;
                        break;
                    }
                    if last {
                        ingestion.complete().await;
                        break;
                    }
                }
                Some(Err(e)) => {
                    warn!("Upload stream failed: {}", e);
                    ingestion.abandon_incomplete().await;
                    break;
                }
                None => {
                    ingestion.abandon_incomplete().await;
                    break;
                }
            }
        }

        drop(ingestion);
        Self::response(rx).await
    }

    /// Stop accepting parts and wait for in-flight uploads
    pub async fn shutdown(&self) -> bool {
        self.pool.shutdown().await
    }

    async fn response(rx: oneshot::Receiver<UploadResponse>) -> UploadResponse {
        rx.await.unwrap_or_else(|_| {
            UploadResponse::failed(&StratusError::Internal {
                message: "upload ended without a response".into(),
            })
        })
    }
}

/// Per-stream driver state
struct Ingestion<'a> {
    coordinator: &'a UploadCoordinator,
    signal: Arc<TerminalSignal>,
    target: Option<(String, String)>,
    assembler: ChunkAssembler,
    session: Option<UploadSession>,
    next_index: u64,
}

impl<'a> Ingestion<'a> {
    fn new(coordinator: &'a UploadCoordinator, signal: Arc<TerminalSignal>) -> Self {
        Self {
            coordinator,
            signal,
            target: None,
            assembler: coordinator.assembler(),
            session: None,
            next_index: 0,
        }
    }

    fn fix_target(&mut self, key: &str, content_type: &str) -> Result<()> {
        if key.trim().is_empty() {
            return Err(StratusError::InvalidMessage {
                reason: "object key is required".into(),
            });
        }
        debug!("Upload stream for {} ({})", key, content_type);
        self.target = Some((key.to_string(), content_type.to_string()));
        Ok(())
    }

    /// Handle one protocol message
    async fn accept(&mut self, chunk: UploadChunk) -> Result<()> {
        match &self.target {
            None => {
                let content_type = chunk.content_type_or_default().to_string();
                self.fix_target(&chunk.key, &content_type)?;
            }
            Some((key, _)) if !chunk.key.is_empty() && chunk.key != *key => {
                warn!(
                    "Ignoring key {} on chunk {}, stream is bound to {}",
                    chunk.key, chunk.chunk_index, key
                );
            }
            Some(_) => {}
        }

        if chunk.chunk_index != self.next_index {
            warn!(
                "Chunk index {} out of sequence, expected {}",
                chunk.chunk_index, self.next_index
            );
        }
        self.next_index = chunk.chunk_index + 1;

        self.push(chunk.chunk_data).await
    }

    /// Feed bytes to the assembler and dispatch every full part
    async fn push(&mut self, data: Bytes) -> Result<()> {
        if data.is_empty() {
            return Ok(());
        }

        self.assembler.push(&data);
        self.ensure_session().await?;

        let Some(session) = &self.session else {
            return Err(StratusError::Internal {
                message: "session missing after start".into(),
            });
        };
        session.record_received(data.len() as u64);
        while let Some(part) = self.assembler.next_part() {
            session.submit_part(part).await?;
        }
        Ok(())
    }

    /// Create the session on first use
    async fn ensure_session(&mut self) -> Result<()> {
        if self.session.is_some() {
            return Ok(());
        }

        let (key, content_type) = self.target.as_ref().ok_or_else(|| StratusError::Internal {
            message: "upload target not set".into(),
        })?;
        let session = self
            .coordinator
            .start_session(key, content_type, self.signal.clone())
            .await?;
        self.session = Some(session);
        Ok(())
    }

    /// Last chunk seen: flush, then finalize or take the zero-byte path
    async fn complete(&mut self) {
        self.assembler.finish();

        let Some(session) = &self.session else {
            self.put_empty().await;
            return;
        };

        while let Some(part) = self.assembler.next_part() {
            if let Err(e) = session.submit_part(part).await {
                session.abort(&e).await;
                return;
            }
        }

        if let Err(e) = session.mark_last_chunk() {
            session.abort(&e).await;
            return;
        }

        // finalize signals the outcome itself
        if let Err(e) = session.finalize().await {
            debug!("Finalize of {} failed: {}", session.key(), e);
        }
    }

    async fn put_empty(&self) {
        let Some((key, content_type)) = &self.target else {
            self.signal.send(UploadResponse::failed(&StratusError::InvalidMessage {
                reason: "object key is required".into(),
            }));
            return;
        };

        info!("Empty upload for {}, storing zero-byte object", key);
        let store = self.coordinator.store();
        match store.put_object(key, Bytes::new(), content_type).await {
            Ok(_) => {
                self.signal.send(UploadResponse::completed(key));
            }
            Err(e) => {
                warn!("Zero-byte put for {} failed: {}", key, e);
                self.signal.send(UploadResponse::failed(&e));
            }
        }
    }

    /// Stream ended (or broke) before the last-chunk marker
    async fn abandon_incomplete(&mut self) {
        let parts_dispatched = self.session.as_ref().map_or(0, |s| s.parts_dispatched());
        self.abandon(StratusError::IncompleteStream { parts_dispatched })
            .await;
    }

    /// Roll back whatever exists and make sure the caller hears about it
    async fn abandon(&mut self, error: StratusError) {
        match &self.session {
            Some(session) => {
                session.abort(&error).await;
            }
            None => {
                warn!("Upload rejected: {}", error);
                self.signal.send(UploadResponse::failed(&error));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::InMemoryObjectStore;
    use crate::upload::pool::PoolConfig;
    use futures::stream;

    fn coordinator(store: Arc<InMemoryObjectStore>, part_size: usize) -> UploadCoordinator {
        UploadCoordinator::new(
            store,
            WorkerPool::current(PoolConfig::default()),
            UploadConfig {
                part_size,
                ..Default::default()
            },
        )
    }

    fn chunk(index: u64, data: &'static [u8]) -> Result<UploadChunk> {
        Ok(UploadChunk::data("notes.txt", "text/plain", index, Bytes::from_static(data)))
    }

    #[tokio::test]
    async fn test_ingest_chunks() {
        let store = Arc::new(InMemoryObjectStore::new());
        let coordinator = coordinator(store.clone(), 4);

        let chunks = vec![
            chunk(0, b"abc"),
            chunk(1, b"defgh"),
            chunk(2, b"ij").map(UploadChunk::last),
        ];
        let response = coordinator.ingest(stream::iter(chunks)).await;

        assert!(response.success, "{}", response.message);
        let object = store.object("notes.txt").unwrap();
        assert_eq!(&object.data[..], b"abcdefghij");
        assert_eq!(object.content_type, "text/plain");
    }

    #[tokio::test]
    async fn test_ingest_zero_bytes_uses_put() {
        let store = Arc::new(InMemoryObjectStore::new());
        let coordinator = coordinator(store.clone(), 4);

        let chunks = vec![chunk(0, b"").map(UploadChunk::last)];
        let response = coordinator.ingest(stream::iter(chunks)).await;

        assert!(response.success);
        assert!(store.object("notes.txt").unwrap().data.is_empty());
        assert_eq!(store.open_uploads(), 0);
    }

    #[tokio::test]
    async fn test_ingest_requires_key() {
        let store = Arc::new(InMemoryObjectStore::new());
        let coordinator = coordinator(store.clone(), 4);

        let chunks = vec![Ok(UploadChunk::data("", "", 0, Bytes::from_static(b"x")).last())];
        let response = coordinator.ingest(stream::iter(chunks)).await;

        assert!(!response.success);
        assert!(response.message.contains("object key is required"));
        assert_eq!(store.object_count(), 0);
    }

    #[tokio::test]
    async fn test_later_key_ignored() {
        let store = Arc::new(InMemoryObjectStore::new());
        let coordinator = coordinator(store.clone(), 4);

        let chunks = vec![
            chunk(0, b"first"),
            Ok(UploadChunk::data("other.txt", "", 5, Bytes::from_static(b"+more")).last()),
        ];
        let response = coordinator.ingest(stream::iter(chunks)).await;

        assert!(response.success);
        assert_eq!(&store.object("notes.txt").unwrap().data[..], b"first+more");
        assert!(store.object("other.txt").is_none());
    }

    #[tokio::test]
    async fn test_stream_error_aborts() {
        let store = Arc::new(InMemoryObjectStore::new());
        let coordinator = coordinator(store.clone(), 4);

        let chunks = vec![
            chunk(0, b"123456"),
            Err(StratusError::storage("connection reset")),
        ];
        let response = coordinator.ingest(stream::iter(chunks)).await;

        assert!(!response.success);
        assert!(response.client_error);
        assert!(response.message.contains("without last chunk"));
        assert_eq!(store.open_uploads(), 0);
        assert!(store.object("notes.txt").is_none());
    }

    #[tokio::test]
    async fn test_received_bytes_include_buffered_fragments() {
        let store = Arc::new(InMemoryObjectStore::new());
        let coordinator = coordinator(store.clone(), 4);
        let (signal, _rx) = TerminalSignal::oneshot();

        let mut ingestion = Ingestion::new(&coordinator, signal);
        ingestion.fix_target("notes.txt", "text/plain").unwrap();
        ingestion.push(Bytes::from_static(b"abcde")).await.unwrap();
        ingestion.push(Bytes::from_static(b"fg")).await.unwrap();

        let session = ingestion.session.as_ref().unwrap();
        // One full part went out; three bytes are still in the assembler
        assert_eq!(session.parts_dispatched(), 1);
        assert_eq!(ingestion.assembler.buffered(), 3);
        assert_eq!(session.bytes_received(), 7);

        ingestion.complete().await;
    }
}
