//! Worker pool start-up and shutdown against the loopback substrate.

#![cfg(not(feature = "loom"))]

use std::sync::Arc;
use std::time::Duration;

use epoch_swap::{
    BufferSpec, CancellationToken, HarnessError, LoopbackSubstrate, QuiescenceDomain, StatsMaps,
    StatsValue, WorkerPool,
};

fn stats_maps(capacity: usize) -> StatsMaps<u64, StatsValue> {
    StatsMaps::create(BufferSpec::hash(capacity)).unwrap()
}

#[test]
fn workers_stop_writing_after_shutdown() {
    let (_barrier, domain) = QuiescenceDomain::new();
    let substrate = Arc::new(LoopbackSubstrate::new(domain));
    let maps = stats_maps(8);

    let pool = WorkerPool::spawn(8, substrate, maps.clone(), CancellationToken::new()).unwrap();
    std::thread::sleep(Duration::from_millis(100));
    let report = pool.shutdown().unwrap();
    assert_eq!(report.messages.len(), 8);

    let mut before = maps.buffer(0).snapshot().unwrap();
    std::thread::sleep(Duration::from_millis(50));
    let mut after = maps.buffer(0).snapshot().unwrap();
    before.sort_unstable_by_key(|(cookie, _)| *cookie);
    after.sort_unstable_by_key(|(cookie, _)| *cookie);
    assert_eq!(before, after);
    assert_eq!(before.len(), 8);
}

#[test]
fn external_cancel_stops_workers() {
    let (_barrier, domain) = QuiescenceDomain::new();
    let substrate = Arc::new(LoopbackSubstrate::new(domain));
    let token = CancellationToken::new();

    let pool = WorkerPool::spawn(2, substrate, stats_maps(2), token.clone()).unwrap();
    token.cancel();
    assert!(pool.token().is_cancelled());

    let report = pool.shutdown().unwrap();
    assert_eq!(report.messages.len(), 2);
}

#[test]
fn undersized_buffers_count_failed_updates() {
    let (_barrier, domain) = QuiescenceDomain::new();
    let substrate = Arc::new(LoopbackSubstrate::builder(domain).dwell_spins(0).build());
    let maps = stats_maps(1);

    let pool =
        WorkerPool::spawn(2, substrate.clone(), maps.clone(), CancellationToken::new()).unwrap();
    std::thread::sleep(Duration::from_millis(50));
    pool.shutdown().unwrap();

    // One cookie fits, the other worker's updates are dropped like a full map would
    assert_eq!(maps.buffer(0).len().unwrap(), 1);
    assert!(substrate.failed_updates() > 0);
}

#[test]
fn unsupported_substrate_fails_spawn() {
    let (_barrier, domain) = QuiescenceDomain::new();
    let substrate = Arc::new(LoopbackSubstrate::builder(domain).supported(false).build());

    let err = WorkerPool::spawn(3, substrate, stats_maps(3), CancellationToken::new()).unwrap_err();
    assert!(matches!(err, HarnessError::Attach { .. }));
}
