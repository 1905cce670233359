use pdatastructs::tdigest::{TDigest, K1};
use std::time::{Duration, Instant};
use tracing::error;

/// Compression of the latency digest. With δ = 100 the rank error of the
/// p50..p99 estimates stays within ±1%.
const TDIGEST_COMPRESSION: f64 = 100.;
const TDIGEST_BACKLOG_SIZE: usize = 100;

/// Result of a single worker iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestOutcome {
    /// HTTP status, or [`crate::TRANSPORT_ERROR_STATUS`] when no response arrived.
    pub status: u16,
    /// `None` when no request was sent.
    pub latency: Option<Duration>,
    pub timestamp: Instant,
    pub succeeded: bool,
    /// Whether the status matched the expected acceptance status.
    pub checked: bool,
    /// Business events carried by the request.
    pub events: u64,
}

impl RequestOutcome {
    pub fn from_status(status: u16, expected: u16, latency: Duration, events: u64) -> Self {
        Self {
            status,
            latency: Some(latency),
            timestamp: Instant::now(),
            succeeded: (200..300).contains(&status),
            checked: status == expected,
            events,
        }
    }

    /// A request that never received a response (connection error, timeout).
    pub fn failed(latency: Duration, events: u64) -> Self {
        Self {
            status: crate::TRANSPORT_ERROR_STATUS,
            latency: Some(latency),
            timestamp: Instant::now(),
            succeeded: false,
            checked: false,
            events,
        }
    }

    /// An iteration whose payload could not be built. It counts as a failed
    /// request but has no latency.
    pub fn unsent() -> Self {
        Self {
            latency: None,
            ..Self::failed(Duration::ZERO, 0)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum StatusClass {
    TransportError,
    Informational,
    Success,
    Redirection,
    ClientError,
    ServerError,
}

impl StatusClass {
    pub const COUNT: usize = 6;

    pub const ALL: [StatusClass; Self::COUNT] = [
        StatusClass::TransportError,
        StatusClass::Informational,
        StatusClass::Success,
        StatusClass::Redirection,
        StatusClass::ClientError,
        StatusClass::ServerError,
    ];

    pub fn of(status: u16) -> Self {
        match status {
            100..=199 => Self::Informational,
            200..=299 => Self::Success,
            300..=399 => Self::Redirection,
            400..=499 => Self::ClientError,
            500..=599 => Self::ServerError,
            _ => Self::TransportError,
        }
    }

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::TransportError => "error",
            Self::Informational => "1xx",
            Self::Success => "2xx",
            Self::Redirection => "3xx",
            Self::ClientError => "4xx",
            Self::ServerError => "5xx",
        }
    }
}

/// Streaming latency distribution.
///
/// Quantiles come from a t-digest; count, sum, min and max are exact.
#[derive(Debug, Clone)]
pub struct LatencyDigest {
    digest: TDigest<K1>,
    count: u64,
    sum_nanos: u128,
    min: Duration,
    max: Duration,
}

impl LatencyDigest {
    pub fn new() -> Self {
        Self {
            digest: TDigest::new(K1::new(TDIGEST_COMPRESSION), TDIGEST_BACKLOG_SIZE),
            count: 0,
            sum_nanos: 0,
            min: Duration::MAX,
            max: Duration::ZERO,
        }
    }

    pub fn insert(&mut self, latency: Duration) {
        self.digest.insert(latency.as_secs_f64());
        self.count += 1;
        self.sum_nanos += latency.as_nanos();
        self.min = self.min.min(latency);
        self.max = self.max.max(latency);
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn min(&self) -> Option<Duration> {
        (!self.is_empty()).then_some(self.min)
    }

    pub fn max(&self) -> Option<Duration> {
        (!self.is_empty()).then_some(self.max)
    }

    pub fn mean(&self) -> Option<Duration> {
        if self.is_empty() {
            return None;
        }
        let nanos = self.sum_nanos / u128::from(self.count);
        Some(Duration::from_nanos(u64::try_from(nanos).unwrap_or(u64::MAX)))
    }

    /// Estimated latency at `quantile` (0.0..=1.0).
    pub fn quantile(&self, quantile: f64) -> Option<Duration> {
        if self.is_empty() {
            return None;
        }

        let secs = self.digest.quantile(quantile.clamp(0., 1.));
        if !secs.is_finite() {
            error!("Non-finite latency estimate for quantile {quantile}.");
            return None;
        }

        let estimate = Duration::from_secs_f64(secs.max(0.));
        Some(estimate.clamp(self.min, self.max))
    }
}

impl Default for LatencyDigest {
    fn default() -> Self {
        Self::new()
    }
}
