//! Storage service facade
//!
//! The request/response surface of the storage service: the streaming
//! upload plus unary delete, copy and download. Transport adapters (the
//! HTTP API) sit on top of this.

use bytes::Bytes;
use futures::Stream;
use std::sync::Arc;
use tracing::{info, warn};

use crate::error::{Result, StratusError};
use crate::protocol::{
    frame_body, CopyObjectRequest, CopyObjectResponse, DeleteObjectRequest, DeleteObjectResponse,
    UploadChunk, UploadResponse,
};
use crate::upload::UploadCoordinator;

pub struct StorageService {
    coordinator: Arc<UploadCoordinator>,
}

impl StorageService {
    pub fn new(coordinator: Arc<UploadCoordinator>) -> Self {
        Self { coordinator }
    }

    pub fn coordinator(&self) -> &Arc<UploadCoordinator> {
        &self.coordinator
    }

    /// Streaming upload: ordered chunks in, one response out
    pub async fn upload<S>(&self, chunks: S) -> UploadResponse
    where
        S: Stream<Item = Result<UploadChunk>> + Send + Unpin,
    {
        self.coordinator.ingest(chunks).await
    }

    /// Streaming upload of a raw body under a known key
    ///
    /// The body is framed into upload messages and takes the same path as
    /// [`StorageService::upload`].
    pub async fn upload_bytes<S>(&self, key: &str, content_type: &str, body: S) -> UploadResponse
    where
        S: Stream<Item = Result<Bytes>> + Send + Unpin,
    {
        let chunks = frame_body(key.to_string(), content_type.to_string(), body);
        self.upload(Box::pin(chunks)).await
    }

    pub async fn delete_object(&self, request: DeleteObjectRequest) -> DeleteObjectResponse {
        let result = match require_key(&request.key) {
            Ok(()) => self.coordinator.store().delete_object(&request.key).await,
            Err(e) => Err(e),
        };

        match result {
            Ok(()) => {
                info!("File successfully deleted: {}", request.key);
                DeleteObjectResponse {
                    success: true,
                    message: "File deleted successfully".into(),
                }
            }
            Err(e) => {
                warn!("Delete of {} failed: {}", request.key, e);
                DeleteObjectResponse {
                    success: false,
                    message: format!("Error: {}", e),
                }
            }
        }
    }

    pub async fn copy_object(&self, request: CopyObjectRequest) -> CopyObjectResponse {
        let result = match require_key(&request.key).and_then(|_| require_key(&request.destination_key)) {
            Ok(()) => self
                .coordinator
                .store()
                .copy_object(&request.key, &request.destination_key)
                .await
                .map(|_| ()),
            Err(e) => Err(e),
        };

        match result {
            Ok(()) => {
                info!(
                    "File successfully copied from '{}' to '{}'",
                    request.key, request.destination_key
                );
                CopyObjectResponse {
                    success: true,
                    message: "File copied successfully".into(),
                }
            }
            Err(e) => {
                warn!("Copy of {} failed: {}", request.key, e);
                CopyObjectResponse {
                    success: false,
                    message: format!("Error copying file: {}", e),
                }
            }
        }
    }

    /// Read a whole object
    pub async fn download_object(&self, key: &str) -> Result<Bytes> {
        require_key(key)?;
        self.coordinator.store().get_object(key).await
    }
}

fn require_key(key: &str) -> Result<()> {
    if key.trim().is_empty() {
        Err(StratusError::InvalidMessage {
            reason: "object key is required".into(),
        })
    } else {
        Ok(())
    }
}
