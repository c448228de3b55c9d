//! Collector Lock Integration Tests
//!
//! Two controllers pointed at one data directory: only one collects, the
//! other keeps counting readers, and the lock moves once released.

#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use std::sync::{Arc, Barrier};
use std::thread;

use tempfile::TempDir;

use common::{FakeFactory, FakeSource, config};
use market_data_collector::infrastructure::runtime::read_holder;
use market_data_collector::{DataKind, RuntimeController, RuntimeState};

fn pair(dir: &TempDir) -> (RuntimeController, RuntimeController) {
    let cfg = config(dir.path(), &[DataKind::Ticker]);
    (
        RuntimeController::new(cfg.clone(), FakeFactory::new(FakeSource::new())),
        RuntimeController::new(cfg, FakeFactory::new(FakeSource::new())),
    )
}

#[test]
fn second_controller_is_reader_only() {
    let dir = TempDir::new().unwrap();
    let (a, b) = pair(&dir);

    assert!(a.start());
    assert!(!b.start());
    assert_eq!(b.state(), RuntimeState::Stopped);

    // The loser's lease still counts.
    let lease = b.lease();
    assert_eq!(b.reader_count(), 1);
    assert!(!b.is_running());
    drop(lease);

    assert!(a.stop());
    assert!(!a.lock_path().exists());
}

#[test]
fn lock_moves_after_release() {
    let dir = TempDir::new().unwrap();
    let (a, b) = pair(&dir);

    assert!(a.start());
    let (pid, _) = read_holder(&a.lock_path()).unwrap();
    assert_eq!(pid, std::process::id());

    assert!(a.stop());
    assert!(b.start());
    assert!(!a.start());
    assert!(b.stop());
    assert!(!b.lock_path().exists());
}

#[test]
fn concurrent_starts_have_one_winner() {
    let dir = TempDir::new().unwrap();
    let (a, b) = pair(&dir);
    let barrier = Arc::new(Barrier::new(2));

    let handles: Vec<_> = [a.clone(), b.clone()]
        .into_iter()
        .map(|controller| {
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                controller.start()
            })
        })
        .collect();
    let results: Vec<bool> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    assert_eq!(results.iter().filter(|started| **started).count(), 1);
    assert_eq!(u8::from(a.is_running()) + u8::from(b.is_running()), 1);

    a.stop();
    b.stop();
    assert!(!a.lock_path().exists());
}
