//! Integration tests for connection status and the connection registry
//!
//! These tests verify status transitions, shared counters, and how
//! registered connections come and go.

mod common;

use common::*;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use wsflow::{
    AtomicConnectionStatus, AtomicMetrics, ConnectionBuilder, ConnectionRegistry, ConnectionStatus,
    WsError,
};

#[test]
fn test_connection_status_full_lifecycle() {
    verbose_println!("Testing full connection lifecycle...");

    let status = AtomicConnectionStatus::new(ConnectionStatus::Disconnected);
    assert!(status.is_disconnected());

    status.set(ConnectionStatus::Connecting);
    assert!(status.is_connecting());
    assert!(!status.is_connected());

    status.set(ConnectionStatus::Connected);
    assert!(status.is_connected());

    status.set(ConnectionStatus::Authenticating);
    assert!(status.is_connected());
    assert!(!status.is_ready());

    status.set(ConnectionStatus::Ready);
    assert!(status.is_ready());

    status.set(ConnectionStatus::Closing);
    assert!(status.is_closing());

    status.set(ConnectionStatus::Disconnected);
    assert!(status.is_disconnected());
    verbose_println!("  State: Disconnected (complete)");
}

#[test]
fn test_status_display_names() {
    let names: Vec<String> = [
        ConnectionStatus::Disconnected,
        ConnectionStatus::Connecting,
        ConnectionStatus::Connected,
        ConnectionStatus::Authenticating,
        ConnectionStatus::Ready,
        ConnectionStatus::Closing,
    ]
    .iter()
    .map(ToString::to_string)
    .collect();

    assert_eq!(
        names,
        vec!["disconnected", "connecting", "connected", "authenticating", "ready", "closing"]
    );
}

#[test]
fn test_concurrent_status_access() {
    verbose_println!("Testing concurrent status access...");

    let status = Arc::new(AtomicConnectionStatus::new(ConnectionStatus::Disconnected));
    let metrics = Arc::new(AtomicMetrics::new());

    let mut handles = vec![];

    for _ in 0..5 {
        let status_clone = Arc::clone(&status);
        handles.push(thread::spawn(move || {
            for _ in 0..1000 {
                let _ = status_clone.get();
                let _ = status_clone.is_ready();
            }
        }));
    }

    for _ in 0..3 {
        let status_clone = Arc::clone(&status);
        handles.push(thread::spawn(move || {
            for _ in 0..100 {
                status_clone.set(ConnectionStatus::Ready);
                status_clone.set(ConnectionStatus::Disconnected);
            }
        }));
    }

    for _ in 0..5 {
        let metrics_clone = Arc::clone(&metrics);
        handles.push(thread::spawn(move || {
            for _ in 0..1000 {
                metrics_clone.increment_sent();
                metrics_clone.increment_received();
            }
        }));
    }

    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(metrics.messages_sent(), 5000);
    assert_eq!(metrics.messages_received(), 5000);
}

#[test]
fn test_compare_exchange_race_safety() {
    verbose_println!("Testing compare_exchange race safety...");

    let status = Arc::new(AtomicConnectionStatus::new(ConnectionStatus::Disconnected));
    let success_count = Arc::new(std::sync::atomic::AtomicUsize::new(0));

    let mut handles = vec![];

    for _ in 0..10 {
        let status_clone = Arc::clone(&status);
        let success_clone = Arc::clone(&success_count);

        handles.push(thread::spawn(move || {
            if status_clone
                .compare_exchange(ConnectionStatus::Disconnected, ConnectionStatus::Connecting)
                .is_ok()
            {
                success_clone.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
            }
        }));
    }

    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(
        success_count.load(std::sync::atomic::Ordering::Relaxed),
        1,
        "Only one thread should win the race"
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_registry_tracks_connections_by_name() {
    verbose_println!("Testing connection registry...");

    let registry = ConnectionRegistry::new();

    let first = ConnectionBuilder::new()
        .name("deribit-main")
        .adapter(TestAdapter::new())
        .transport(MockTransport::new())
        .options(fast_options())
        .registry(registry.clone())
        .connect()
        .await
        .unwrap();
    let second = ConnectionBuilder::new()
        .name("deribit-backup")
        .adapter(TestAdapter::new())
        .transport(MockTransport::new())
        .options(fast_options())
        .registry(registry.clone())
        .spawn()
        .unwrap();

    assert_eq!(registry.list(), vec!["deribit-backup", "deribit-main"]);
    assert!(registry.get("deribit-main").unwrap().same_connection(&first));

    let statuses = registry.statuses();
    assert_eq!(statuses["deribit-main"].status, ConnectionStatus::Ready);
    assert_eq!(statuses["deribit-backup"].status, ConnectionStatus::Disconnected);

    second.close().await.unwrap();
    assert!(!registry.contains("deribit-backup"));
    assert!(registry.contains("deribit-main"));

    registry.close_all().await;
    assert!(registry.is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_registry_rejects_duplicate_names() {
    let registry = ConnectionRegistry::new();

    let first = ConnectionBuilder::new()
        .name("orders")
        .adapter(TestAdapter::new())
        .transport(MockTransport::new())
        .registry(registry.clone())
        .spawn()
        .unwrap();

    let duplicate = ConnectionBuilder::new()
        .name("orders")
        .adapter(TestAdapter::new())
        .transport(MockTransport::new())
        .registry(registry.clone())
        .spawn();
    assert!(matches!(duplicate, Err(WsError::Configuration(_))));

    // The name is free again once the first connection is gone
    first.close().await.unwrap();
    let replacement = ConnectionBuilder::new()
        .name("orders")
        .adapter(TestAdapter::new())
        .transport(MockTransport::new())
        .registry(registry.clone())
        .spawn()
        .unwrap();
    assert_eq!(registry.len(), 1);

    replacement.close().await.unwrap();
    assert!(wait_until(Duration::from_secs(1), || registry.is_empty()).await);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_invalid_options_are_rejected_before_spawning() {
    let mut options = fast_options();
    options.jitter = 2.0;

    let result = ConnectionBuilder::new()
        .adapter(TestAdapter::new())
        .transport(MockTransport::new())
        .options(options)
        .spawn();

    assert!(matches!(result, Err(WsError::Configuration(_))));
}
