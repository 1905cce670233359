//! Aggregation of request outcomes.
use stampede_core::{
    Counter, LatencyDigest, Metric, MetricsSnapshot, Rate, RequestOutcome, StatusClass, Trend,
    CHECKS, EVENTS, HTTP_REQS, HTTP_REQ_DURATION, HTTP_REQ_FAILED,
};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Shared sink every worker reports into.
///
/// Counters are atomics. Latencies are buffered in `pending` and folded into
/// the t-digest by [`MetricsCollector::flush`], which the run controller calls
/// on every tick, so workers never wait on the digest itself.
///
/// `reqs` only changes while `pending` is held, and a snapshot reads it under
/// the same lock, so the latency trend never drifts from the request count.
pub struct MetricsCollector {
    reqs: AtomicU64,
    failed: AtomicU64,
    checked: AtomicU64,
    events: AtomicU64,
    status_classes: [AtomicU64; StatusClass::COUNT],
    pending: Mutex<Vec<Duration>>,
    latency: Mutex<LatencyDigest>,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self {
            reqs: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            checked: AtomicU64::new(0),
            events: AtomicU64::new(0),
            status_classes: Default::default(),
            pending: Mutex::new(Vec::new()),
            latency: Mutex::new(LatencyDigest::new()),
        }
    }

    pub fn report(&self, outcome: &RequestOutcome) {
        {
            let mut pending = lock(&self.pending);
            self.reqs.fetch_add(1, Ordering::Relaxed);
            if let Some(latency) = outcome.latency {
                pending.push(latency);
            }
        }
        // Hits are published after `reqs`, so a snapshot loading them first
        // can never see more hits than requests.
        if !outcome.succeeded {
            self.failed.fetch_add(1, Ordering::Release);
        }
        if outcome.checked {
            self.checked.fetch_add(1, Ordering::Release);
        }
        self.events.fetch_add(outcome.events, Ordering::Relaxed);
        self.status_classes[StatusClass::of(outcome.status).index()]
            .fetch_add(1, Ordering::Relaxed);

        #[cfg(feature = "metrics")]
        {
            metrics::counter!(HTTP_REQS).increment(1);
            if !outcome.succeeded {
                metrics::counter!(HTTP_REQ_FAILED).increment(1);
            }
            metrics::counter!(EVENTS).increment(outcome.events);
            if let Some(latency) = outcome.latency {
                metrics::histogram!(HTTP_REQ_DURATION).record(latency.as_secs_f64());
            }
        }
    }

    /// Folds pending latencies into the digest.
    pub fn flush(&self) {
        // Digest before pending: a taken batch is always folded in before
        // anyone else can read the digest.
        let mut digest = lock(&self.latency);
        let batch = std::mem::take(&mut *lock(&self.pending));
        for latency in batch {
            digest.insert(latency);
        }
    }

    pub fn total_requests(&self) -> u64 {
        self.reqs.load(Ordering::Relaxed)
    }

    /// A consistent view of every aggregate, with `elapsed` as the run time.
    pub fn snapshot(&self, elapsed: Duration) -> MetricsSnapshot {
        let failed = self.failed.load(Ordering::Acquire);
        let checked = self.checked.load(Ordering::Acquire);

        let mut digest = lock(&self.latency);
        let (reqs, batch) = {
            let mut pending = lock(&self.pending);
            (self.reqs.load(Ordering::Relaxed), std::mem::take(&mut *pending))
        };
        for latency in batch {
            digest.insert(latency);
        }
        let latency = digest.clone();
        drop(digest);

        let events = self.events.load(Ordering::Relaxed);
        let status_classes: [u64; StatusClass::COUNT] =
            std::array::from_fn(|i| self.status_classes[i].load(Ordering::Relaxed));

        let mut snapshot = MetricsSnapshot::new(elapsed, status_classes);
        snapshot.insert(Metric::Counter(Counter {
            name: HTTP_REQS.to_string(),
            total: reqs,
        }));
        snapshot.insert(Metric::Counter(Counter {
            name: EVENTS.to_string(),
            total: events,
        }));
        snapshot.insert(Metric::Rate(Rate {
            name: HTTP_REQ_FAILED.to_string(),
            hits: failed,
            total: reqs,
        }));
        snapshot.insert(Metric::Rate(Rate {
            name: CHECKS.to_string(),
            hits: checked,
            total: reqs,
        }));
        snapshot.insert(Metric::Trend(Trend {
            name: HTTP_REQ_DURATION.to_string(),
            latency,
        }));
        snapshot
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
