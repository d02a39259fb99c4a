use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{ProbeError, Result, ScanError};
use crate::probe::Probe;

/// Lower bound of the computed concurrency, before doubling.
pub const CONCURRENCY_FLOOR: usize = 4;

/// Largest work set a single run accepts (a /8 IPv4 sweep fits).
pub const MAX_WORK_UNITS: usize = 1 << 24;

/// Fail with [`ScanError::WorkSetTooLarge`] when `size` units exceed [`MAX_WORK_UNITS`].
pub fn check_work_size(size: u128) -> Result<usize> {
    match usize::try_from(size) {
        Ok(n) if n <= MAX_WORK_UNITS => Ok(n),
        _ => Err(ScanError::WorkSetTooLarge {
            size,
            max: MAX_WORK_UNITS,
        }),
    }
}

/// Concurrency for `n` work units when the caller did not pick one:
/// `max(4, floor(log2(n))) * 2`. Never below 8 and non-decreasing in `n`.
pub fn compute_concurrency(n: usize) -> usize {
    let log = if n == 0 { 0 } else { n.ilog2() as usize };
    CONCURRENCY_FLOOR.max(log) * 2
}

/// Upper bound on simultaneously in-flight probes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConcurrencyBudget {
    /// Sized from the work set with [`compute_concurrency`].
    #[default]
    Auto,
    /// Caller-chosen ceiling; always wins over the computed one.
    Fixed(usize),
}

impl ConcurrencyBudget {
    pub fn limit_for(self, n: usize) -> usize {
        match self {
            ConcurrencyBudget::Auto => compute_concurrency(n),
            ConcurrencyBudget::Fixed(limit) => limit.max(1),
        }
    }
}

impl From<Option<usize>> for ConcurrencyBudget {
    fn from(limit: Option<usize>) -> Self {
        limit.map_or(ConcurrencyBudget::Auto, ConcurrencyBudget::Fixed)
    }
}

/// Live counters for a running scan, readable from other tasks.
#[derive(Clone, Debug, Default)]
pub struct SharedProgress {
    pub total: Arc<AtomicU64>,
    pub scanned_done: Arc<AtomicU64>,
    pub open_count: Arc<AtomicU64>,
}

impl SharedProgress {
    pub fn new() -> Self {
        Self::default()
    }

    fn start(&self, total: usize) {
        self.total.store(total as u64, Ordering::Relaxed);
        self.scanned_done.store(0, Ordering::Relaxed);
        self.open_count.store(0, Ordering::Relaxed);
    }

    fn record(&self, open: bool) {
        self.scanned_done.fetch_add(1, Ordering::Relaxed);
        if open {
            self.open_count.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// `(total, scanned, open)` snapshot.
    pub fn snapshot(&self) -> (u64, u64, u64) {
        (
            self.total.load(Ordering::Relaxed),
            self.scanned_done.load(Ordering::Relaxed),
            self.open_count.load(Ordering::Relaxed),
        )
    }
}

/// Runs a [`Probe`] over an ordered work set with bounded concurrency.
///
/// - At most `budget` probes are in flight, enforced by a `Semaphore`.
/// - Every unit is probed exactly once; `run` returns only after all of them finished.
/// - The result keeps the input order: outcomes land in a slot per input index and
///   are zipped back against a second pass over the work set.
/// - A probe that fails counts as negative for its unit. Only when every probe
///   failed does `run` fail, with [`ScanError::ProbesUnavailable`].
/// - Cancelling the token stops dispatch, aborts in-flight probes and yields
///   [`ScanError::Canceled`].
#[derive(Debug, Clone, Default)]
pub struct ScanCoordinator {
    budget: ConcurrencyBudget,
    cancel: CancellationToken,
    progress: Option<SharedProgress>,
}

impl ScanCoordinator {
    pub fn new(budget: ConcurrencyBudget) -> Self {
        Self {
            budget,
            ..Self::default()
        }
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_progress(mut self, progress: SharedProgress) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn budget(&self) -> ConcurrencyBudget {
        self.budget
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Probe every unit and return the ones whose probe succeeded, in input order.
    ///
    /// The iterator is cloned to enumerate the work set a second time when zipping
    /// outcomes, so it must replay the same sequence. Work sets above
    /// [`MAX_WORK_UNITS`] are rejected before anything is dispatched.
    pub async fn run<I, U, P>(&self, units: I, probe: Arc<P>) -> Result<Vec<U>>
    where
        I: IntoIterator<Item = U>,
        I::IntoIter: Clone,
        U: Send + 'static,
        P: Probe<U> + ?Sized + 'static,
    {
        let dispatch = units.into_iter();
        let replay = dispatch.clone();
        let total = check_work_size(work_len(&dispatch))?;
        let limit = self.budget.limit_for(total).min(Semaphore::MAX_PERMITS);

        if let Some(progress) = &self.progress {
            progress.start(total);
        }
        debug!(total, limit, "dispatching probes");

        let sem = Arc::new(Semaphore::new(limit));
        let mut set = JoinSet::new();
        let mut outcomes: Vec<bool> = Vec::with_capacity(total);
        let mut tally = Tally::default();

        for (idx, unit) in dispatch.enumerate() {
            let permit = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    set.shutdown().await;
                    info!(dispatched = idx, total, "scan canceled");
                    return Err(ScanError::Canceled);
                }
                permit = sem.clone().acquire_owned() => {
                    permit.map_err(|_| ScanError::Canceled)?
                }
            };

            // Reap what already finished so the set only holds live probes.
            while let Some(res) = set.try_join_next() {
                tally.record(res, &mut outcomes);
            }

            outcomes.push(false);
            let probe = probe.clone();
            let progress = self.progress.clone();
            set.spawn(async move {
                let _permit = permit; // held until the probe completes
                let outcome = probe.probe(unit).await;
                if let Some(progress) = progress {
                    progress.record(matches!(outcome, Ok(true)));
                }
                (idx, outcome)
            });
        }

        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    set.shutdown().await;
                    info!(total, "scan canceled");
                    return Err(ScanError::Canceled);
                }
                res = set.join_next() => match res {
                    Some(res) => tally.record(res, &mut outcomes),
                    None => break,
                },
            }
        }

        if tally.failed > 0 {
            warn!(failed = tally.failed, total, "probes failed locally and were counted as negative");
        }
        if let Some(source) = tally.first_error {
            if tally.failed == total {
                return Err(ScanError::ProbesUnavailable {
                    failed: tally.failed,
                    source,
                });
            }
        }

        Ok(replay
            .zip(outcomes)
            .filter_map(|(unit, ok)| ok.then_some(unit))
            .collect())
    }
}

#[derive(Default)]
struct Tally {
    failed: usize,
    first_error: Option<ProbeError>,
}

impl Tally {
    fn record(
        &mut self,
        res: std::result::Result<(usize, std::result::Result<bool, ProbeError>), JoinError>,
        outcomes: &mut [bool],
    ) {
        let err = match res {
            Ok((idx, Ok(ok))) => {
                outcomes[idx] = ok;
                return;
            }
            Ok((idx, Err(e))) => {
                debug!(unit = idx, error = %e, "probe failed");
                e
            }
            Err(e) => {
                debug!(error = %e, "probe task did not complete");
                ProbeError::Task(e.to_string())
            }
        };
        self.failed += 1;
        self.first_error.get_or_insert(err);
    }
}

/// Length of the work set, using the exact size hint when the iterator has one.
/// Counting stops one past [`MAX_WORK_UNITS`], enough to reject the run.
fn work_len<I: Iterator + Clone>(iter: &I) -> u128 {
    match iter.size_hint() {
        (lo, Some(hi)) if lo == hi => lo as u128,
        (lo, _) if lo > MAX_WORK_UNITS => lo as u128,
        _ => iter.clone().take(MAX_WORK_UNITS + 1).count() as u128,
    }
}
