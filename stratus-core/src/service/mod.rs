//! Service layer
//!
//! [`StorageService`] is the transport-neutral facade; [`http`] exposes it
//! over axum.

pub mod http;
pub mod storage;

pub use http::{router, serve};
pub use storage::StorageService;
