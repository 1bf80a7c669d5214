//! Multipart upload session
//!
//! One session owns one multipart upload on the object store:
//!
//! ```text
//! Initializing -> Streaming -> Finalizing -> Completed
//!                     |             |
//!                     +-------------+------> Aborted | Failed
//! ```
//!
//! Part numbers are allocated atomically before dispatch, so they are
//! contiguous no matter how uploads interleave. Part uploads run on the
//! worker pool; the first failure closes the session, cancels the other
//! in-flight parts, aborts the upload on the store and sends the single
//! terminal response. Late results are discarded.

use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::{AbortHandle, JoinSet};
use tracing::{debug, error, info, warn};

use super::pool::{UploadPermit, UploadPermits};
use super::progress::ProgressTracker;
use super::response::TerminalSignal;
use crate::error::{Result, StratusError};
use crate::metrics::standard;
use crate::protocol::UploadResponse;
use crate::storage::{ByteBufferPool, CompletedPart, ObjectStore};

/// Lifecycle state of an upload session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Initializing,
    Streaming,
    Finalizing,
    Completed,
    Aborted,
    Failed,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            SessionState::Completed | SessionState::Aborted | SessionState::Failed
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SessionState::Initializing => "initializing",
            SessionState::Streaming => "streaming",
            SessionState::Finalizing => "finalizing",
            SessionState::Completed => "completed",
            SessionState::Aborted => "aborted",
            SessionState::Failed => "failed",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a session borrows from its coordinator
#[derive(Clone)]
pub struct SessionContext {
    pub store: Arc<dyn ObjectStore>,
    pub permits: UploadPermits,
    pub handle: Handle,
    pub buffers: Arc<ByteBufferPool>,
    pub progress_interval: u64,
}

/// Result of a completed upload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadSummary {
    pub key: String,
    pub upload_id: String,
    pub parts: u32,
    pub bytes: u64,
}

enum PartSlot {
    Pending(AbortHandle),
    Completed(CompletedPart),
}

/// State reachable from worker tasks
struct SessionShared {
    key: String,
    upload_id: String,
    store: Arc<dyn ObjectStore>,
    state: watch::Sender<SessionState>,
    registry: Mutex<BTreeMap<u32, PartSlot>>,
    next_part_number: AtomicU32,
    progress: ProgressTracker,
    signal: Arc<TerminalSignal>,
    buffers: Arc<ByteBufferPool>,
}

impl SessionShared {
    fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// One-way move into a terminal state; false if already terminal
    fn enter_terminal(&self, target: SessionState) -> bool {
        let entered = self.state.send_if_modified(|state| {
            if state.is_terminal() {
                false
            } else {
                *state = target;
                true
            }
        });

        if entered {
            standard::ACTIVE_SESSIONS.dec();
            match target {
                SessionState::Completed => standard::UPLOADS_COMPLETED.inc(),
                SessionState::Failed => standard::UPLOADS_FAILED.inc(),
                SessionState::Aborted => standard::UPLOADS_ABORTED.inc(),
                _ => {}
            }
        }
        entered
    }

    fn record_part(&self, part_number: u32, etag: String, size: u64) {
        {
            let mut registry = self.registry.lock();
            let state = self.state();
            if !matches!(state, SessionState::Streaming | SessionState::Finalizing) {
                debug!(
                    "Discarding result of part {} for {}: session {}",
                    part_number, self.key, state
                );
                return;
            }
            registry.insert(
                part_number,
                PartSlot::Completed(CompletedPart::new(part_number, etag, size)),
            );
        }

        standard::PARTS_UPLOADED.inc();
        standard::BYTES_UPLOADED.inc_by(size);
        debug!("Part {} of {} uploaded ({} bytes)", part_number, self.key, size);

        if let Some(report) = self.progress.record_uploaded(size) {
            info!(
                "Upload progress for {}: {} MiB uploaded of {} MiB received",
                self.key,
                report.uploaded_mib(),
                report.bytes_received / (1024 * 1024)
            );
        }
    }

    /// The abort path. Only the caller that wins the terminal transition
    /// cancels parts, aborts the store upload and signals the caller.
    async fn fail(&self, error: &StratusError, terminal: SessionState, current_part: Option<u32>) -> bool {
        if !self.enter_terminal(terminal) {
            warn!("Ignoring failure for {} after it closed: {}", self.key, error);
            return false;
        }
        error!("Upload {} for {} {}: {}", self.upload_id, self.key, terminal, error);

        let cancelled = {
            let mut registry = self.registry.lock();
            let mut cancelled = 0;
            for (part_number, slot) in registry.iter() {
                if let PartSlot::Pending(handle) = slot {
                    if Some(*part_number) != current_part {
                        handle.abort();
                        cancelled += 1;
                    }
                }
            }
            registry.clear();
            cancelled
        };
        if cancelled > 0 {
            debug!("Cancelled {} outstanding parts of {}", cancelled, self.key);
        }

        match self
            .store
            .abort_multipart_upload(&self.key, &self.upload_id)
            .await
        {
            Ok(()) => info!("Aborted multipart upload {} for {}", self.upload_id, self.key),
            Err(e) => warn!(
                "Best-effort abort of upload {} for {} failed: {}",
                self.upload_id, self.key, e
            ),
        }

        self.signal.send(UploadResponse::failed(error));
        true
    }
}

/// Worker body for one part
async fn run_part(shared: Arc<SessionShared>, part_number: u32, data: Bytes, permit: UploadPermit) {
    let size = data.len() as u64;
    let started = Instant::now();

    let result = shared
        .store
        .upload_part(&shared.key, &shared.upload_id, part_number, data.clone())
        .await;
    drop(permit);
    standard::PART_UPLOAD_DURATION.observe_duration(started.elapsed());

    match result {
        Ok(etag) => shared.record_part(part_number, etag, size),
        Err(e) => {
            let err = StratusError::PartUpload {
                part_number,
                reason: e.to_string(),
            };
            shared.fail(&err, SessionState::Failed, Some(part_number)).await;
        }
    }

    shared.buffers.reclaim(data);
}

/// A live multipart upload
pub struct UploadSession {
    shared: Arc<SessionShared>,
    tasks: Mutex<JoinSet<()>>,
    permits: UploadPermits,
    handle: Handle,
}

impl UploadSession {
    /// Create the multipart upload on the store and start streaming
    ///
    /// A store failure is fatal: the failure response goes out on `signal`
    /// and no session exists afterwards.
    pub async fn begin(
        key: &str,
        content_type: &str,
        ctx: SessionContext,
        signal: Arc<TerminalSignal>,
    ) -> Result<Self> {
        let (state, _) = watch::channel(SessionState::Initializing);

        let upload_id = match ctx.store.create_multipart_upload(key, content_type).await {
            Ok(upload_id) => upload_id,
            Err(e) => {
                let err = StratusError::StoreInit {
                    key: key.to_string(),
                    reason: e.to_string(),
                };
                error!("{}", err);
                standard::UPLOADS_FAILED.inc();
                signal.send(UploadResponse::failed(&err));
                return Err(err);
            }
        };

        state.send_replace(SessionState::Streaming);
        standard::UPLOADS_STARTED.inc();
        standard::ACTIVE_SESSIONS.inc();
        info!("Started multipart upload {} for {} ({})", upload_id, key, content_type);

        Ok(Self {
            shared: Arc::new(SessionShared {
                key: key.to_string(),
                upload_id,
                store: ctx.store,
                state,
                registry: Mutex::new(BTreeMap::new()),
                next_part_number: AtomicU32::new(1),
                progress: ProgressTracker::new(ctx.progress_interval),
                signal,
                buffers: ctx.buffers,
            }),
            tasks: Mutex::new(JoinSet::new()),
            permits: ctx.permits,
            handle: ctx.handle,
        })
    }

    /// Dispatch one part and return its number
    ///
    /// Waits while the concurrency bound is saturated and gives up with
    /// `SessionClosed` if the session closes meanwhile.
    pub async fn submit_part(&self, data: Bytes) -> Result<u32> {
        self.ensure_state(SessionState::Streaming)?;

        let size = data.len();
        let part_number = self.shared.next_part_number.fetch_add(1, Ordering::AcqRel);

        let mut state = self.shared.state.subscribe();
        let permit = tokio::select! {
            permit = self.permits.acquire() => permit?,
            _ = async {
                let _ = state.wait_for(|s| s.is_terminal()).await;
            } => return Err(self.closed()),
        };

        let mut registry = self.shared.registry.lock();
        if self.shared.state() != SessionState::Streaming {
            return Err(self.closed());
        }

        let task = run_part(self.shared.clone(), part_number, data, permit);
        let abort = self.tasks.lock().spawn_on(task, &self.handle);
        registry.insert(part_number, PartSlot::Pending(abort));

        debug!("Dispatched part {} of {} ({} bytes)", part_number, self.shared.key, size);
        Ok(part_number)
    }

    /// End of input: `Streaming -> Finalizing`
    pub fn mark_last_chunk(&self) -> Result<()> {
        let moved = self.shared.state.send_if_modified(|state| {
            if *state == SessionState::Streaming {
                *state = SessionState::Finalizing;
                true
            } else {
                false
            }
        });

        if moved {
            debug!(
                "Last chunk received for {} after {} parts",
                self.shared.key,
                self.parts_dispatched()
            );
            Ok(())
        } else {
            Err(self.closed())
        }
    }

    /// Wait for every part, verify the registry and complete the upload
    pub async fn finalize(&self) -> Result<UploadSummary> {
        self.ensure_state(SessionState::Finalizing)?;

        let mut tasks = std::mem::take(&mut *self.tasks.lock());
        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                if e.is_panic() {
                    let err = StratusError::Internal {
                        message: format!("Part upload task panicked: {}", e),
                    };
                    self.shared.fail(&err, SessionState::Failed, None).await;
                    return Err(err);
                }
            }
        }

        // A part failure while draining has already closed the session
        self.ensure_state(SessionState::Finalizing)?;

        let expected = self.parts_dispatched();
        let registry = std::mem::take(&mut *self.shared.registry.lock());
        let found: Vec<u32> = registry
            .iter()
            .filter(|(_, slot)| matches!(slot, PartSlot::Completed(_)))
            .map(|(part_number, _)| *part_number)
            .collect();

        if !found.iter().copied().eq(1..=expected) {
            let err = StratusError::ContiguityViolation { expected, found };
            self.shared.fail(&err, SessionState::Aborted, None).await;
            return Err(err);
        }

        let parts: Vec<CompletedPart> = registry
            .into_values()
            .filter_map(|slot| match slot {
                PartSlot::Completed(part) => Some(part),
                PartSlot::Pending(_) => None,
            })
            .collect();
        let bytes: u64 = parts.iter().map(|p| p.size_bytes).sum();

        let key = &self.shared.key;
        let upload_id = &self.shared.upload_id;
        info!("Completing upload {} for {}: {} parts, {} bytes", upload_id, key, parts.len(), bytes);

        if let Err(e) = self
            .shared
            .store
            .complete_multipart_upload(key, upload_id, &parts)
            .await
        {
            let err = StratusError::Finalize {
                key: key.clone(),
                reason: e.to_string(),
            };
            self.shared.fail(&err, SessionState::Failed, None).await;
            return Err(err);
        }

        if !self.shared.enter_terminal(SessionState::Completed) {
            return Err(self.closed());
        }
        info!("Upload complete: {} ({} bytes)", key, bytes);
        self.shared.signal.send(UploadResponse::completed(key));

        Ok(UploadSummary {
            key: key.clone(),
            upload_id: upload_id.clone(),
            parts: expected,
            bytes,
        })
    }

    /// Roll the upload back because of `error`
    ///
    /// Returns false if the session had already reached a terminal state.
    pub async fn abort(&self, error: &StratusError) -> bool {
        self.shared.fail(error, SessionState::Aborted, None).await
    }

    /// Resolves once the session is terminal
    pub async fn wait_terminal(&self) -> SessionState {
        let mut state = self.shared.state.subscribe();
        let result = state.wait_for(|s| s.is_terminal()).await.map(|s| *s);
        result.unwrap_or_else(|_| self.state())
    }

    pub fn key(&self) -> &str {
        &self.shared.key
    }

    pub fn upload_id(&self) -> &str {
        &self.shared.upload_id
    }

    pub fn state(&self) -> SessionState {
        self.shared.state()
    }

    /// Part numbers allocated so far
    pub fn parts_dispatched(&self) -> u32 {
        self.shared.next_part_number.load(Ordering::Acquire) - 1
    }

    /// Count bytes taken off the ingestion stream, buffered or not
    pub fn record_received(&self, bytes: u64) {
        self.shared.progress.record_received(bytes);
    }

    pub fn bytes_received(&self) -> u64 {
        self.shared.progress.bytes_received()
    }

    pub fn bytes_uploaded(&self) -> u64 {
        self.shared.progress.bytes_uploaded()
    }

    fn ensure_state(&self, expected: SessionState) -> Result<()> {
        if self.state() == expected {
            Ok(())
        } else {
            Err(self.closed())
        }
    }

    fn closed(&self) -> StratusError {
        StratusError::SessionClosed {
            key: self.shared.key.clone(),
            state: self.state().to_string(),
        }
    }
}

impl Drop for UploadSession {
    fn drop(&mut self) {
        // Let in-flight parts and a running abort finish on their own
        self.tasks.get_mut().detach_all();

        let state = self.state();
        if state.is_terminal() {
            return;
        }

        warn!("Upload session for {} dropped while {}, aborting", self.shared.key, state);
        let shared = self.shared.clone();
        let err = StratusError::IncompleteStream {
            parts_dispatched: self.parts_dispatched(),
        };
        self.handle.spawn(async move {
            shared.fail(&err, SessionState::Aborted, None).await;
        });
    }
}
