//! Pass/fail verdicts for a run.
use crate::pool::DrainReport;
use crate::report::RunResult;
use stampede_core::{Aggregate, ConfigError, Metric, MetricsSnapshot, Threshold};
use std::time::Duration;
use tracing::debug;

/// Verdict for one threshold.
#[derive(Debug, Clone, PartialEq)]
pub struct ThresholdResult {
    pub threshold: Threshold,
    /// `None` when the metric saw no observations.
    pub observed: Option<f64>,
    pub passed: bool,
}

/// Evaluates thresholds against a frozen snapshot.
///
/// A threshold over a metric with no observations is vacuously satisfied by
/// `<` and `<=` and fails for every other comparator.
#[derive(Debug, Clone, Default)]
pub struct ThresholdEvaluator {
    thresholds: Vec<Threshold>,
}

impl ThresholdEvaluator {
    pub fn new(thresholds: Vec<Threshold>) -> Result<Self, ConfigError> {
        for threshold in &thresholds {
            threshold.validate()?;
        }
        Ok(Self { thresholds })
    }

    pub fn thresholds(&self) -> &[Threshold] {
        &self.thresholds
    }

    pub fn evaluate(&self, snapshot: MetricsSnapshot) -> Result<RunResult, ConfigError> {
        let results = self
            .thresholds
            .iter()
            .map(|threshold| {
                let observed = observe(&snapshot, threshold)?;
                let passed = match observed {
                    Some(value) => threshold.comparator().apply(value, threshold.value()),
                    None => threshold.comparator().vacuous(),
                };
                debug!("{threshold}: observed {observed:?}, passed: {passed}");
                Ok(ThresholdResult {
                    threshold: threshold.clone(),
                    observed,
                    passed,
                })
            })
            .collect::<Result<Vec<_>, ConfigError>>()?;

        Ok(RunResult::new(snapshot, results, 0, DrainReport::default()))
    }
}

fn observe(snapshot: &MetricsSnapshot, threshold: &Threshold) -> Result<Option<f64>, ConfigError> {
    let metric = snapshot
        .get(threshold.metric())
        .ok_or_else(|| ConfigError::UnknownMetric(threshold.metric().to_string()))?;

    let mismatch = || ConfigError::KindMismatch {
        metric: threshold.metric().to_string(),
        kind: metric.kind().as_str(),
        expression: threshold.expression().to_string(),
    };

    let observed = match (metric, threshold.aggregate()) {
        (Metric::Counter(counter), Aggregate::Count) => Some(counter.total as f64),
        (Metric::Counter(counter), Aggregate::Rate) => counter.per_second(snapshot.elapsed),
        (Metric::Rate(rate), Aggregate::Rate) => rate.ratio(),
        (Metric::Trend(trend), aggregate) => {
            let latency = &trend.latency;
            match aggregate {
                Aggregate::Count => Some(latency.count() as f64),
                Aggregate::Percentile(p) => latency.quantile(p / 100.).map(millis),
                Aggregate::Avg => latency.mean().map(millis),
                Aggregate::Min => latency.min().map(millis),
                Aggregate::Med => latency.quantile(0.5).map(millis),
                Aggregate::Max => latency.max().map(millis),
                Aggregate::Rate => return Err(mismatch()),
            }
        }
        _ => return Err(mismatch()),
    };
    Ok(observed)
}

fn millis(d: Duration) -> f64 {
    d.as_nanos() as f64 / 1e6
}
