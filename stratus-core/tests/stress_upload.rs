//! Stress tests for the upload engine under load
//!
//! Run with: cargo test --release --test stress_upload -- --nocapture

mod common;

use futures::stream;
use std::sync::Arc;
use std::time::{Duration, Instant};

use common::*;
use stratus_core::storage::InMemoryObjectStore;

/// Many concurrent uploads sharing one worker pool
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn stress_concurrent_uploads() {
    let num_uploads = 32;
    let upload_size = 2 * MIB;

    let store = Arc::new(FaultyStore::new().with_part_delay(Duration::from_micros(200)));
    let coordinator = Arc::new(coordinator(store.clone(), 256 * KIB, 4));
    let data = Arc::new(payload(upload_size));

    let start = Instant::now();

    let mut handles = Vec::new();
    for i in 0..num_uploads {
        let coordinator = coordinator.clone();
        let data = data.clone();
        handles.push(tokio::spawn(async move {
            let key = format!("stress/{}.bin", i);
            let chunks = chunk_messages(&key, &data, 64 * KIB);
            coordinator.ingest(stream::iter(chunks)).await
        }));
    }

    let mut succeeded = 0;
    for handle in handles {
        if handle.await.unwrap().success {
            succeeded += 1;
        }
    }

    let elapsed = start.elapsed();
    let total_mib = (num_uploads * upload_size) as f64 / MIB as f64;

    println!("Concurrent upload stress test:");
    println!("  Uploads: {}", num_uploads);
    println!("  Total: {:.0} MiB", total_mib);
    println!("  Elapsed: {:?}", elapsed);
    println!("  Throughput: {:.2} MiB/s", total_mib / elapsed.as_secs_f64());
    println!("  Peak part concurrency: {}", store.peak_concurrency());

    assert_eq!(succeeded, num_uploads, "Not all uploads succeeded");
    assert!(store.peak_concurrency() <= coordinator.pool().size());
    assert_eq!(store.inner().object_count(), num_uploads);
    assert_eq!(store.inner().open_uploads(), 0);
}

/// Single large upload through the in-memory store
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn stress_single_large_upload() {
    let upload_size = 64 * MIB;
    let store = Arc::new(InMemoryObjectStore::new());
    let coordinator = coordinator(store.clone(), 8 * MIB, 4);
    let data = payload(upload_size);

    let start = Instant::now();
    let response = coordinator
        .ingest(stream::iter(chunk_messages("large.bin", &data, MIB)))
        .await;
    let elapsed = start.elapsed();

    println!("Single large upload stress test:");
    println!("  Size: {} MiB", upload_size / MIB);
    println!("  Elapsed: {:?}", elapsed);
    println!(
        "  Throughput: {:.2} MiB/s",
        (upload_size / MIB) as f64 / elapsed.as_secs_f64()
    );
    println!("  Buffers reclaimed: {}", coordinator.buffers().reclaimed());

    assert!(response.success, "{}", response.message);
    assert_eq!(store.object("large.bin").unwrap().data.len(), upload_size);
}
