//! Storage service message types
//!
//! The streaming upload contract and the unary request/response pairs.
//! Serialized as camelCase JSON on the HTTP surface.

use bytes::Bytes;
use futures::{stream, Stream, StreamExt};
use serde::{Deserialize, Serialize};

use crate::error::{Result, StratusError};
use crate::storage::DEFAULT_CONTENT_TYPE;

/// One client message of a streaming upload
///
/// Messages arrive in order. The first message fixes `key` and
/// `content_type` for the whole stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadChunk {
    pub key: String,
    pub content_type: String,
    pub chunk_index: u64,
    pub chunk_data: Bytes,
    pub is_last_chunk: bool,
}

impl UploadChunk {
    /// A data-carrying chunk
    pub fn data(key: impl Into<String>, content_type: impl Into<String>, chunk_index: u64, chunk_data: Bytes) -> Self {
        Self {
            key: key.into(),
            content_type: content_type.into(),
            chunk_index,
            chunk_data,
            is_last_chunk: false,
        }
    }

    /// Mark this chunk as the end of the stream
    pub fn last(mut self) -> Self {
        self.is_last_chunk = true;
        self
    }

    /// Content type with the default applied when blank
    pub fn content_type_or_default(&self) -> &str {
        if self.content_type.trim().is_empty() {
            DEFAULT_CONTENT_TYPE
        } else {
            &self.content_type
        }
    }
}

/// Frame a raw body as upload messages
///
/// Every body fragment becomes one data chunk and the end of the body
/// becomes an empty last chunk. A body error is passed through and ends
/// the stream.
pub fn frame_body<S>(
    key: String,
    content_type: String,
    body: S,
) -> impl Stream<Item = Result<UploadChunk>> + Send
where
    S: Stream<Item = Result<Bytes>> + Send + Unpin,
{
    stream::unfold(Some((body, 0u64)), move |state| {
        let key = key.clone();
        let content_type = content_type.clone();
        async move {
            let (mut body, index) = state?;
            let item = match body.next().await {
                Some(Ok(data)) => {
                    let chunk = UploadChunk::data(key, content_type, index, data);
                    return Some((Ok(chunk), Some((body, index + 1))));
                }
                Some(Err(e)) => Err(e),
                None => Ok(UploadChunk::data(key, content_type, index, Bytes::new()).last()),
            };
            Some((item, None))
        }
    })
}

/// The single terminal response of an upload stream
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadResponse {
    pub success: bool,
    pub message: String,
    /// The failure was caused by the client's input, not the store
    #[serde(skip)]
    pub client_error: bool,
}

impl UploadResponse {
    pub fn completed(key: &str) -> Self {
        Self {
            success: true,
            message: format!("File uploaded successfully: {}", key),
            client_error: false,
        }
    }

    pub fn failed(error: &StratusError) -> Self {
        Self {
            success: false,
            message: format!("Upload failed: {}", error),
            client_error: error.is_client_error(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteObjectRequest {
    pub key: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteObjectResponse {
    pub success: bool,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CopyObjectRequest {
    pub key: String,
    pub destination_key: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CopyObjectResponse {
    pub success: bool,
    pub message: String,
}
