//! Async runtime management
//!
//! Dual Tokio runtimes for request serving and part uploads, plus
//! broadcast-based shutdown signalling.

pub mod executor;
pub mod shutdown;

pub use executor::{RuntimeConfig, ServerRuntime};
pub use shutdown::ShutdownSignal;
