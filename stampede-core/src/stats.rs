use crate::data::{LatencyDigest, StatusClass};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Counter {
    pub name: String,
    pub total: u64,
}

impl Counter {
    /// Average increments per second over `elapsed`. `None` for a zero-length run.
    pub fn per_second(&self, elapsed: Duration) -> Option<f64> {
        let secs = elapsed.as_secs_f64();
        (secs > 0.).then(|| self.total as f64 / secs)
    }
}

/// Fraction of observations that were "hits". `hits` never exceeds `total`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rate {
    pub name: String,
    pub hits: u64,
    pub total: u64,
}

impl Rate {
    /// `None` when nothing was observed.
    pub fn ratio(&self) -> Option<f64> {
        (self.total > 0).then(|| self.hits as f64 / self.total as f64)
    }
}

#[derive(Debug, Clone)]
pub struct Trend {
    pub name: String,
    pub latency: LatencyDigest,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricKind {
    Counter,
    Rate,
    Trend,
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl MetricKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Counter => "counter",
            Self::Rate => "rate",
            Self::Trend => "trend",
        }
    }
}

#[derive(Debug, Clone)]
pub enum Metric {
    Counter(Counter),
    Rate(Rate),
    Trend(Trend),
}

impl Metric {
    pub fn name(&self) -> &str {
        match self {
            Self::Counter(c) => &c.name,
            Self::Rate(r) => &r.name,
            Self::Trend(t) => &t.name,
        }
    }

    pub fn kind(&self) -> MetricKind {
        match self {
            Self::Counter(_) => MetricKind::Counter,
            Self::Rate(_) => MetricKind::Rate,
            Self::Trend(_) => MetricKind::Trend,
        }
    }
}

/// Frozen view of every aggregate at one point of the run.
#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    /// Run time the aggregates cover; the denominator of per-second rates.
    pub elapsed: Duration,
    metrics: BTreeMap<String, Metric>,
    status_classes: [u64; StatusClass::COUNT],
}

impl MetricsSnapshot {
    pub fn new(elapsed: Duration, status_classes: [u64; StatusClass::COUNT]) -> Self {
        Self {
            elapsed,
            metrics: BTreeMap::new(),
            status_classes,
        }
    }

    pub fn insert(&mut self, metric: Metric) {
        self.metrics.insert(metric.name().to_string(), metric);
    }

    pub fn get(&self, name: &str) -> Option<&Metric> {
        self.metrics.get(name)
    }

    pub fn metrics(&self) -> impl Iterator<Item = &Metric> {
        self.metrics.values()
    }

    pub fn counter(&self, name: &str) -> Option<&Counter> {
        match self.metrics.get(name) {
            Some(Metric::Counter(c)) => Some(c),
            _ => None,
        }
    }

    pub fn rate(&self, name: &str) -> Option<&Rate> {
        match self.metrics.get(name) {
            Some(Metric::Rate(r)) => Some(r),
            _ => None,
        }
    }

    pub fn trend(&self, name: &str) -> Option<&Trend> {
        match self.metrics.get(name) {
            Some(Metric::Trend(t)) => Some(t),
            _ => None,
        }
    }

    pub fn status_count(&self, class: StatusClass) -> u64 {
        self.status_classes[class.index()]
    }
}
