//! Chunk-message uploads through the storage service

mod common;

use bytes::Bytes;
use futures::stream;
use std::sync::Arc;
use std::time::Duration;

use common::*;
use stratus_core::error::StratusError;
use stratus_core::protocol::UploadChunk;
use stratus_core::service::StorageService;

fn service(store: Arc<FaultyStore>, part_size: usize, parallelism: usize) -> StorageService {
    StorageService::new(Arc::new(coordinator(store, part_size, parallelism)))
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_upload_chunk_messages() {
    let store = Arc::new(FaultyStore::new());
    let service = service(store.clone(), 4 * KIB, 2);

    let data = payload(9 * KIB);
    let response = service
        .upload(stream::iter(chunk_messages("docs/manual.pdf", &data, 3 * KIB)))
        .await;

    assert!(response.success, "{}", response.message);
    assert_eq!(response.message, "File uploaded successfully: docs/manual.pdf");
    assert_eq!(store.part_sizes(), vec![4 * KIB, 4 * KIB, KIB]);
    assert_eq!(
        &service.download_object("docs/manual.pdf").await.unwrap()[..],
        &data[..]
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_upload_without_last_chunk_is_rolled_back() {
    let store = Arc::new(FaultyStore::new());
    let service = service(store.clone(), 2 * KIB, 2);

    let chunks = vec![
        Ok(UploadChunk::data("cut.bin", "", 0, Bytes::from(payload(2 * KIB)))),
        Ok(UploadChunk::data("cut.bin", "", 1, Bytes::from(payload(2 * KIB)))),
    ];
    let response = service.upload(stream::iter(chunks)).await;

    assert!(!response.success);
    assert!(response.client_error);
    assert_eq!(
        response.message,
        "Upload failed: Stream closed without last chunk after 2 parts"
    );
    assert_eq!(store.abort_count(), 1);
    assert_eq!(store.complete_count(), 0);
    assert!(service.download_object("cut.bin").await.is_err());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_upload_part_failure() {
    let store = Arc::new(
        FaultyStore::new()
            .with_part_delay(Duration::from_millis(5))
            .failing_parts([2]),
    );
    let service = service(store.clone(), KIB, 2);

    let data = payload(4 * KIB);
    let response = service
        .upload(stream::iter(chunk_messages("flaky.bin", &data, KIB)))
        .await;

    assert!(!response.success);
    assert!(!response.client_error);
    assert!(response
        .message
        .starts_with("Upload failed: Part 2 upload failed"));
    assert_eq!(store.abort_count(), 1);
    assert_eq!(store.complete_count(), 0);
    assert_eq!(store.inner().open_uploads(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_upload_bytes_frames_body() {
    let store = Arc::new(FaultyStore::new());
    let service = service(store.clone(), 4 * KIB, 2);

    let body = vec![
        Ok(Bytes::from(payload(3 * KIB))),
        Ok(Bytes::new()),
        Ok(Bytes::from(payload(3 * KIB))),
    ];
    let response = service
        .upload_bytes("raw.bin", "application/octet-stream", stream::iter(body))
        .await;

    assert!(response.success, "{}", response.message);
    assert_eq!(store.part_sizes(), vec![4 * KIB, 2 * KIB]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_upload_bytes_body_error_is_client_error() {
    let store = Arc::new(FaultyStore::new());
    let service = service(store.clone(), KIB, 2);

    let body = vec![
        Ok(Bytes::from(payload(2 * KIB))),
        Err(StratusError::InvalidMessage {
            reason: "client went away".into(),
        }),
    ];
    let response = service
        .upload_bytes("gone.bin", "application/octet-stream", stream::iter(body))
        .await;

    assert!(!response.success);
    assert!(response.client_error);
    assert_eq!(store.abort_count(), 1);
}
