use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use lan_probe_rs::probe::Probe;
use lan_probe_rs::scanner::{ConcurrencyBudget, ScanCoordinator, SharedProgress, MAX_WORK_UNITS};
use lan_probe_rs::{ProbeError, ScanError};
use tokio_util::sync::CancellationToken;

/// Sleeps a unit-dependent time so completion order differs from input order,
/// then reports `unit % 3 == 0`. Tracks peak concurrency and per-unit calls.
#[derive(Default)]
struct Scrambled {
    in_flight: AtomicUsize,
    peak: AtomicUsize,
    calls: Mutex<HashMap<u32, usize>>,
}

#[async_trait]
impl Probe<u32> for Scrambled {
    async fn probe(&self, unit: u32) -> Result<bool, ProbeError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        *self.calls.lock().unwrap().entry(unit).or_default() += 1;

        tokio::time::sleep(Duration::from_millis(u64::from((unit * 7) % 13))).await;

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        Ok(unit % 3 == 0)
    }
}

struct Constant(bool);

#[async_trait]
impl Probe<u32> for Constant {
    async fn probe(&self, _unit: u32) -> Result<bool, ProbeError> {
        Ok(self.0)
    }
}

/// Fails locally for units in `broken`, succeeds for everything else.
struct Flaky {
    broken: Vec<u32>,
}

#[async_trait]
impl Probe<u32> for Flaky {
    async fn probe(&self, unit: u32) -> Result<bool, ProbeError> {
        if self.broken.contains(&unit) {
            return Err(ProbeError::Task(format!("socket exhausted for {unit}")));
        }
        Ok(true)
    }
}

struct Stuck;

#[async_trait]
impl Probe<u32> for Stuck {
    async fn probe(&self, _unit: u32) -> Result<bool, ProbeError> {
        tokio::time::sleep(Duration::from_secs(30)).await;
        Ok(true)
    }
}

#[tokio::test]
async fn keeps_input_order_regardless_of_completion_order() {
    let units: Vec<u32> = (0..60).collect();
    let probe = Arc::new(Scrambled::default());
    let out = ScanCoordinator::new(ConcurrencyBudget::Fixed(16))
        .run(units.clone(), probe.clone())
        .await
        .unwrap();

    let expected: Vec<u32> = units.into_iter().filter(|u| u % 3 == 0).collect();
    assert_eq!(out, expected);
}

#[tokio::test]
async fn probes_each_unit_exactly_once_within_budget() {
    let probe = Arc::new(Scrambled::default());
    ScanCoordinator::new(ConcurrencyBudget::Fixed(5))
        .run(0..40u32, probe.clone())
        .await
        .unwrap();

    let calls = probe.calls.lock().unwrap();
    assert_eq!(calls.len(), 40);
    assert!(calls.values().all(|&n| n == 1));
    assert!(probe.peak.load(Ordering::SeqCst) <= 5);
}

#[tokio::test]
async fn computed_budget_bounds_in_flight() {
    let probe = Arc::new(Scrambled::default());
    // 256 units -> max(4, 8) * 2 = 16
    ScanCoordinator::default()
        .run(0..256u32, probe.clone())
        .await
        .unwrap();
    assert!(probe.peak.load(Ordering::SeqCst) <= 16);
}

#[tokio::test]
async fn all_true_and_all_false() {
    let all = ScanCoordinator::default()
        .run(0..25u32, Arc::new(Constant(true)))
        .await
        .unwrap();
    assert_eq!(all, (0..25).collect::<Vec<_>>());

    let none = ScanCoordinator::default()
        .run(0..25u32, Arc::new(Constant(false)))
        .await
        .unwrap();
    assert!(none.is_empty());
}

#[tokio::test]
async fn empty_work_set_is_empty_result() {
    let out = ScanCoordinator::default()
        .run(Vec::<u32>::new(), Arc::new(Constant(true)))
        .await
        .unwrap();
    assert!(out.is_empty());
}

#[tokio::test]
async fn isolated_probe_failures_are_excluded() {
    let probe = Arc::new(Flaky {
        broken: vec![2, 5, 7],
    });
    let out = ScanCoordinator::default().run(0..10u32, probe).await.unwrap();
    assert_eq!(out, vec![0, 1, 3, 4, 6, 8, 9]);
}

#[tokio::test]
async fn every_probe_failing_is_systemic() {
    let probe = Arc::new(Flaky {
        broken: (0..6).collect(),
    });
    let err = ScanCoordinator::default().run(0..6u32, probe).await.unwrap_err();
    match err {
        ScanError::ProbesUnavailable { failed, .. } => assert_eq!(failed, 6),
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn cancellation_mid_scan_reports_canceled() {
    let cancel = CancellationToken::new();
    let coordinator = ScanCoordinator::new(ConcurrencyBudget::Fixed(4)).with_cancel(cancel.clone());

    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });

    let started = std::time::Instant::now();
    let err = coordinator.run(0..100u32, Arc::new(Stuck)).await.unwrap_err();
    assert!(matches!(err, ScanError::Canceled));
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[tokio::test]
async fn pre_canceled_token_dispatches_nothing() {
    let cancel = CancellationToken::new();
    cancel.cancel();
    let probe = Arc::new(Scrambled::default());
    let err = ScanCoordinator::default()
        .with_cancel(cancel)
        .run(0..10u32, probe.clone())
        .await
        .unwrap_err();
    assert!(matches!(err, ScanError::Canceled));
    assert!(probe.calls.lock().unwrap().is_empty());
}

#[tokio::test]
async fn progress_counts_every_probe() {
    let progress = SharedProgress::new();
    ScanCoordinator::default()
        .with_progress(progress.clone())
        .run(0..30u32, Arc::new(Scrambled::default()))
        .await
        .unwrap();
    assert_eq!(progress.snapshot(), (30, 30, 10));
}

#[tokio::test]
async fn oversized_work_set_is_rejected_before_dispatch() {
    let probe = Arc::new(Scrambled::default());
    let coordinator = ScanCoordinator::default();

    let err = coordinator.run(0..u32::MAX, probe.clone()).await.unwrap_err();
    match err {
        ScanError::WorkSetTooLarge { size, max } => {
            assert_eq!(size, u128::from(u32::MAX));
            assert_eq!(max, MAX_WORK_UNITS);
        }
        other => panic!("unexpected error: {other}"),
    }

    // No exact size hint: counting stops just past the limit.
    let unsized_units = (0..u32::MAX).filter(|u| u % 2 == 0);
    let err = coordinator.run(unsized_units, probe.clone()).await.unwrap_err();
    assert!(matches!(err, ScanError::WorkSetTooLarge { .. }), "{err}");

    assert!(probe.calls.lock().unwrap().is_empty());
}
