//! SightingStore behavior under concurrent writers and readers

use chrono::{Duration, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use swivel_common::db::Coordinate;
use swivel_scan::db::NewSighting;
use swivel_scan::SightingStore;
use tempfile::TempDir;

async fn open_store() -> (SightingStore, TempDir) {
    let dir = TempDir::new().unwrap();
    let store = SightingStore::open(&dir.path().join("swivel.db")).await.unwrap();
    (store, dir)
}

async fn record(store: &SightingStore, key: &str, place_id: i64, offset_ms: i64) {
    store
        .record_sighting(NewSighting {
            device_key: key,
            name: None,
            place_id: Some(place_id),
            rssi: -60,
            raw_address: key,
            gatt_signature: Some("sig"),
            timestamp: Utc::now() + Duration::milliseconds(offset_ms),
        })
        .await
        .unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_writes_same_device_all_counted() {
    let (store, _dir) = open_store().await;
    let place = store.create_place(None, Coordinate::new(1.0, 1.0), 50.0).await.unwrap();

    let mut handles = Vec::new();
    for i in 0..20 {
        let store = store.clone();
        handles.push(tokio::spawn(async move {
            record(&store, "shared", place.place_id, i).await;
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    let device = store.get_device("shared").await.unwrap().unwrap();
    assert_eq!(device.times_seen, 20);
    assert_eq!(store.sightings_for_device("shared").await.unwrap().len(), 20);
    assert_eq!(store.links_for_device("shared").await.unwrap()[0].times_seen, 20);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_reports_consistent_during_writes() {
    let (store, _dir) = open_store().await;
    let a = store.create_place(None, Coordinate::new(1.0, 1.0), 50.0).await.unwrap();
    let b = store.create_place(None, Coordinate::new(2.0, 2.0), 50.0).await.unwrap();

    let done = Arc::new(AtomicBool::new(false));
    let mut writers = Vec::new();
    for w in 0..4 {
        let store = store.clone();
        let (a, b) = (a.place_id, b.place_id);
        writers.push(tokio::spawn(async move {
            for i in 0..15 {
                let place = if i % 2 == 0 { a } else { b };
                record(&store, &format!("device-{}", w), place, i).await;
            }
        }));
    }

    let reader = {
        let store = store.clone();
        let done = done.clone();
        tokio::spawn(async move {
            let mut checks = 0;
            while !done.load(Ordering::SeqCst) {
                let report = store.report_places_and_devices().await.unwrap();
                // Every sighting is placed, so link counts must sum to the device counter
                let mut per_device = std::collections::HashMap::new();
                for place in &report {
                    for placed in &place.devices {
                        let entry = per_device.entry(placed.device.device_key.clone()).or_insert((0, placed.device.times_seen));
                        entry.0 += placed.link.times_seen;
                    }
                }
                for (key, (links, counter)) in per_device {
                    assert_eq!(links, counter, "inconsistent snapshot for {}", key);
                }
                checks += 1;
                tokio::task::yield_now().await;
            }
            checks
        })
    };

    for writer in writers {
        writer.await.unwrap();
    }
    done.store(true, Ordering::SeqCst);
    let checks = reader.await.unwrap();
    assert!(checks > 0);

    let stats = store.stats().await.unwrap();
    assert_eq!(stats.devices, 4);
    assert_eq!(stats.sightings, 60);
    // Alternating places: every sighting after the first is a move
    assert_eq!(stats.relocations, 4 * 14);
}

#[tokio::test]
async fn test_reopen_preserves_data() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("swivel.db");

    let store = SightingStore::open(&path).await.unwrap();
    let place = store.create_place(Some("Home"), Coordinate::new(1.0, 1.0), 30.0).await.unwrap();
    record(&store, "k1", place.place_id, 0).await;
    store.close().await;

    let store = SightingStore::open(&path).await.unwrap();
    let stats = store.stats().await.unwrap();
    assert_eq!(stats.devices, 1);
    assert_eq!(stats.places, 1);
    assert_eq!(stats.sightings, 1);
    assert_eq!(store.list_places().await.unwrap()[0].name.as_deref(), Some("Home"));
}
