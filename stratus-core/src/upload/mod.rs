//! Chunked multipart upload engine
//!
//! Fragments are re-buffered into parts by the [`ChunkAssembler`], uploaded
//! in parallel under the [`WorkerPool`] bound by an [`UploadSession`], and
//! finalized or rolled back exactly once.

pub mod assembler;
pub mod coordinator;
pub mod pool;
pub mod progress;
pub mod response;
pub mod session;

pub use assembler::{assemble, ChunkAssembler};
pub use coordinator::{UploadConfig, UploadCoordinator};
pub use pool::{PermitScope, PoolConfig, UploadPermit, UploadPermits, WorkerPool};
pub use progress::{ProgressReport, ProgressTracker, DEFAULT_PROGRESS_INTERVAL};
pub use response::{ResponseSink, TerminalSignal};
pub use session::{SessionContext, SessionState, UploadSession, UploadSummary};
