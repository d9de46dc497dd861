// tests/concurrency.rs

//! Serialization of update attempts, cleanup and await-idle.

mod common;

use catalog_sync::{CancelToken, IndexStore, SilentProgress, UpdateOutcome};
use common::*;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

const ADDRESS_A: &str = "https://a.example.org/repo";
const ADDRESS_B: &str = "https://b.example.org/repo";

/// Split store events into per-attempt runs and check none interleave
fn assert_not_interleaved(events: &[StoreEvent]) -> Vec<i64> {
    let mut order = Vec::new();
    let mut current: Option<i64> = None;
    let mut open = false;

    for event in events {
        match event {
            StoreEvent::Begin => {
                assert!(!open, "staging began twice without finalize: {events:?}");
                open = true;
                current = None;
            }
            StoreEvent::Write { repository_id, .. } => {
                assert!(open, "write outside staging: {events:?}");
                match current {
                    Some(id) => assert_eq!(id, *repository_id, "interleaved: {events:?}"),
                    None => current = Some(*repository_id),
                }
            }
            StoreEvent::Finalize { repository_id, .. } => {
                assert!(open, "finalize outside staging: {events:?}");
                if let Some(id) = current {
                    assert_eq!(id, *repository_id, "interleaved: {events:?}");
                }
                order.push(*repository_id);
                open = false;
            }
        }
    }
    assert!(!open);
    order
}

#[test]
fn test_concurrent_updates_do_not_interleave() {
    let h = Harness::new();
    *h.downloader.delay.lock().unwrap() = Some(Duration::from_millis(20));
    let a = h.add_repository(ADDRESS_A);
    let b = h.add_repository(ADDRESS_B);
    h.downloader
        .push(&index_url(ADDRESS_A), Reply::content(catalog(100, 170), ""));
    h.downloader
        .push(&index_url(ADDRESS_B), Reply::content(catalog(100, 130), ""));

    std::thread::scope(|s| {
        for repo in [&a, &b] {
            let updater = &h.updater;
            s.spawn(move || {
                let outcome = updater
                    .update(repo, &CancelToken::new(), &SilentProgress)
                    .unwrap();
                assert!(matches!(outcome, UpdateOutcome::Updated { .. }));
            });
        }
    });

    let mut order = assert_not_interleaved(&h.store.events());
    order.sort();
    assert_eq!(order, vec![a.id, b.id]);
    assert_eq!(h.store.inner.product_count(a.id).unwrap(), 170);
    assert_eq!(h.store.inner.product_count(b.id).unwrap(), 130);
    assert!(h.scratch_files().is_empty());
}

#[test]
fn test_cleanup_removes_disabled_and_deleted() {
    let h = Harness::new();
    let a = h.add_repository(ADDRESS_A);
    let b = h.add_repository(ADDRESS_B);
    for repo in [&a, &b] {
        h.downloader
            .push(&index_url(&repo.address), Reply::content(catalog(100, 3), ""));
        h.updater
            .update(repo, &CancelToken::new(), &SilentProgress)
            .unwrap();
    }
    assert_eq!(h.updater.cleanup_removed().unwrap(), 0);

    h.store.inner.set_enabled(a.id, false).unwrap();
    h.store.inner.mark_deleted(b.id).unwrap();
    assert_eq!(h.updater.cleanup_removed().unwrap(), 2);

    assert_eq!(h.store.inner.product_count(a.id).unwrap(), 0);
    assert_eq!(h.store.inner.product_count(b.id).unwrap(), 0);
    assert!(h.store.repository(a.id).unwrap().is_some());
    assert!(h.store.repository(b.id).unwrap().is_none());
}

#[test]
fn test_cleanup_does_not_wait_for_running_update() {
    let h = Harness::new();
    *h.downloader.delay.lock().unwrap() = Some(Duration::from_millis(500));
    let a = h.add_repository(ADDRESS_A);
    let b = h.add_repository(ADDRESS_B);
    h.store.inner.set_enabled(b.id, false).unwrap();
    h.downloader
        .push(&index_url(ADDRESS_A), Reply::content(catalog(100, 3), ""));

    let finished = AtomicBool::new(false);
    std::thread::scope(|s| {
        s.spawn(|| {
            h.updater
                .update(&a, &CancelToken::new(), &SilentProgress)
                .unwrap();
            finished.store(true, Ordering::SeqCst);
        });

        while h.downloader.request_count() == 0 {
            std::thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(h.updater.cleanup_removed().unwrap(), 1);
        assert!(!finished.load(Ordering::SeqCst));
    });
    assert!(finished.load(Ordering::SeqCst));
}

#[test]
fn test_await_idle_waits_for_running_update() {
    let h = Harness::new();
    *h.downloader.delay.lock().unwrap() = Some(Duration::from_millis(200));
    let a = h.add_repository(ADDRESS_A);
    h.downloader
        .push(&index_url(ADDRESS_A), Reply::content(catalog(100, 3), ""));

    let finished = AtomicBool::new(false);
    std::thread::scope(|s| {
        s.spawn(|| {
            h.updater
                .update(&a, &CancelToken::new(), &SilentProgress)
                .unwrap();
            finished.store(true, Ordering::SeqCst);
        });

        while h.downloader.request_count() == 0 {
            std::thread::sleep(Duration::from_millis(5));
        }
        h.updater.await_idle();
        assert_eq!(h.store.inner.product_count(a.id).unwrap(), 3);
    });
    assert!(finished.load(Ordering::SeqCst));
}

#[test]
fn test_repository_disabled_during_update_stays_disabled() {
    let h = Harness::new();
    let a = h.add_repository(ADDRESS_A);
    h.downloader
        .push(&index_url(ADDRESS_A), Reply::content(catalog(100, 3), ""));
    h.updater
        .update(&a, &CancelToken::new(), &SilentProgress)
        .unwrap();
    let committed = h.stored(a.id);

    *h.downloader.delay.lock().unwrap() = Some(Duration::from_millis(300));
    h.downloader
        .push(&index_url(ADDRESS_A), Reply::content(catalog(200, 5), ""));
    let before = h.downloader.request_count();

    std::thread::scope(|s| {
        let update = s.spawn(|| {
            h.updater
                .update(&committed, &CancelToken::new(), &SilentProgress)
                .unwrap()
        });

        while h.downloader.request_count() == before {
            std::thread::sleep(Duration::from_millis(5));
        }
        h.store.inner.set_enabled(a.id, false).unwrap();
        assert_eq!(h.updater.cleanup_removed().unwrap(), 1);

        assert!(matches!(update.join().unwrap(), UpdateOutcome::Cancelled));
    });

    let stored = h.stored(a.id);
    assert!(!stored.enabled);
    assert_eq!(stored.timestamp, 100);
    assert_eq!(h.store.inner.product_count(a.id).unwrap(), 0);
    assert!(h.scratch_files().is_empty());
}
