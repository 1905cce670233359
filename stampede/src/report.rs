//! Run results: the end-of-run summary, its JSON form and the process exit code.
use crate::evaluator::ThresholdResult;
use crate::pool::DrainReport;
use serde::Serialize;
use stampede_core::{
    LatencyDigest, Metric, MetricsSnapshot, StatusClass, THRESHOLD_FAILURE_EXIT_CODE,
};
use std::collections::BTreeMap;
use std::fmt;
use std::process::ExitCode;
use std::time::Duration;

/// Everything a finished run produced.
#[derive(Debug, Clone)]
pub struct RunResult {
    pub snapshot: MetricsSnapshot,
    pub thresholds: Vec<ThresholdResult>,
    /// True iff every threshold passed. A run without thresholds passes.
    pub overall_pass: bool,
    pub peak_workers: usize,
    pub drain: DrainReport,
}

impl RunResult {
    pub fn new(
        snapshot: MetricsSnapshot,
        thresholds: Vec<ThresholdResult>,
        peak_workers: usize,
        drain: DrainReport,
    ) -> Self {
        let overall_pass = thresholds.iter().all(|t| t.passed);
        Self {
            snapshot,
            thresholds,
            overall_pass,
            peak_workers,
            drain,
        }
    }

    pub(crate) fn with_workers(mut self, peak_workers: usize, drain: DrainReport) -> Self {
        self.peak_workers = peak_workers;
        self.drain = drain;
        self
    }

    /// 0 when every threshold held, the dedicated threshold failure code
    /// otherwise.
    pub fn exit_status(&self) -> u8 {
        if self.overall_pass {
            0
        } else {
            THRESHOLD_FAILURE_EXIT_CODE
        }
    }

    pub fn exit_code(&self) -> ExitCode {
        ExitCode::from(self.exit_status())
    }

    pub fn summary(&self) -> Summary {
        let elapsed = self.snapshot.elapsed;
        let metrics = self
            .snapshot
            .metrics()
            .map(|metric| {
                let summary = match metric {
                    Metric::Counter(c) => MetricSummary::Counter {
                        count: c.total,
                        rate: c.per_second(elapsed),
                    },
                    Metric::Rate(r) => MetricSummary::Rate {
                        rate: r.ratio(),
                        hits: r.hits,
                        total: r.total,
                    },
                    Metric::Trend(t) => MetricSummary::trend(&t.latency),
                };
                (metric.name().to_string(), summary)
            })
            .collect();

        let status_classes = StatusClass::ALL
            .iter()
            .map(|&class| (class.label(), self.snapshot.status_count(class)))
            .filter(|(_, count)| *count > 0)
            .collect();

        let thresholds = self
            .thresholds
            .iter()
            .map(|t| ThresholdSummary {
                metric: t.threshold.metric().to_string(),
                expression: t.threshold.expression().to_string(),
                observed: t.observed,
                passed: t.passed,
            })
            .collect();

        Summary {
            elapsed_secs: elapsed.as_secs_f64(),
            overall_pass: self.overall_pass,
            peak_workers: self.peak_workers,
            aborted_workers: self.drain.aborted,
            ramp_down_aborted_workers: self.drain.ramp_down_aborted,
            metrics,
            status_classes,
            thresholds,
        }
    }
}

/// Serializable end-of-run summary.
#[derive(Debug, Clone, Serialize)]
pub struct Summary {
    pub elapsed_secs: f64,
    pub overall_pass: bool,
    pub peak_workers: usize,
    /// Workers cut off by the final drain timeout.
    pub aborted_workers: usize,
    /// Retired workers cut off past the ramp-down grace period.
    pub ramp_down_aborted_workers: usize,
    pub metrics: BTreeMap<String, MetricSummary>,
    pub status_classes: BTreeMap<&'static str, u64>,
    pub thresholds: Vec<ThresholdSummary>,
}

/// Latencies are in milliseconds.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum MetricSummary {
    Counter {
        count: u64,
        rate: Option<f64>,
    },
    Rate {
        rate: Option<f64>,
        hits: u64,
        total: u64,
    },
    Trend {
        count: u64,
        avg: Option<f64>,
        min: Option<f64>,
        med: Option<f64>,
        p90: Option<f64>,
        p95: Option<f64>,
        p99: Option<f64>,
        max: Option<f64>,
    },
}

impl MetricSummary {
    fn trend(latency: &LatencyDigest) -> Self {
        let ms = |d: Duration| d.as_nanos() as f64 / 1e6;
        Self::Trend {
            count: latency.count(),
            avg: latency.mean().map(ms),
            min: latency.min().map(ms),
            med: latency.quantile(0.5).map(ms),
            p90: latency.quantile(0.9).map(ms),
            p95: latency.quantile(0.95).map(ms),
            p99: latency.quantile(0.99).map(ms),
            max: latency.max().map(ms),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ThresholdSummary {
    pub metric: String,
    pub expression: String,
    pub observed: Option<f64>,
    pub passed: bool,
}

impl fmt::Display for RunResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let summary = self.summary();
        writeln!(
            f,
            "run {:.1}s, peak {} workers, {} finished and {} aborted at shutdown",
            summary.elapsed_secs, summary.peak_workers, self.drain.finished, self.drain.aborted
        )?;
        if self.drain.ramp_down_aborted > 0 {
            writeln!(
                f,
                "{} workers aborted past the ramp-down grace period",
                self.drain.ramp_down_aborted
            )?;
        }
        writeln!(f)?;

        for (name, metric) in &summary.metrics {
            write!(f, "  {:.<24}: ", name)?;
            match metric {
                MetricSummary::Counter { count, rate } => {
                    writeln!(f, "{count} {}/s", opt(*rate, 2))?;
                }
                MetricSummary::Rate { rate, hits, total } => {
                    let pct = rate.map(|r| r * 100.);
                    writeln!(f, "{}% {hits} of {total}", opt(pct, 2))?;
                }
                MetricSummary::Trend {
                    avg,
                    min,
                    med,
                    p90,
                    p95,
                    p99,
                    max,
                    ..
                } => {
                    writeln!(
                        f,
                        "avg={}ms min={}ms med={}ms p(90)={}ms p(95)={}ms p(99)={}ms max={}ms",
                        opt(*avg, 2),
                        opt(*min, 2),
                        opt(*med, 2),
                        opt(*p90, 2),
                        opt(*p95, 2),
                        opt(*p99, 2),
                        opt(*max, 2),
                    )?;
                }
            }
        }

        if !summary.status_classes.is_empty() {
            write!(f, "  {:.<24}: ", "status")?;
            let classes: Vec<_> = summary
                .status_classes
                .iter()
                .map(|(label, count)| format!("{label}={count}"))
                .collect();
            writeln!(f, "{}", classes.join(" "))?;
        }

        if !summary.thresholds.is_empty() {
            writeln!(f)?;
            writeln!(f, "thresholds:")?;
            for t in &summary.thresholds {
                writeln!(
                    f,
                    "  {} {}: {} (observed {})",
                    if t.passed { "✓" } else { "✗" },
                    t.metric,
                    t.expression,
                    opt(t.observed, 4),
                )?;
            }
        }

        Ok(())
    }
}

fn opt(value: Option<f64>, precision: usize) -> String {
    match value {
        Some(v) => format!("{v:.precision$}"),
        None => "-".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::MetricsCollector;
    use crate::evaluator::ThresholdEvaluator;
    use stampede_core::{RequestOutcome, Threshold, HTTP_REQS, HTTP_REQ_DURATION};

    fn result(thresholds: &[&str]) -> RunResult {
        let collector = MetricsCollector::new();
        for ms in [10, 20, 30] {
            collector.report(&RequestOutcome::from_status(
                202,
                202,
                Duration::from_millis(ms),
                50,
            ));
        }
        collector.report(&RequestOutcome::from_status(
            503,
            202,
            Duration::from_millis(5),
            50,
        ));
        let thresholds: Vec<Threshold> = thresholds.iter().map(|t| t.parse().unwrap()).collect();
        ThresholdEvaluator::new(thresholds)
            .unwrap()
            .evaluate(collector.snapshot(Duration::from_secs(2)))
            .unwrap()
            .with_workers(
                3,
                DrainReport {
                    finished: 2,
                    aborted: 1,
                    ramp_down_aborted: 2,
                },
            )
    }

    #[test]
    fn exit_codes() {
        assert_eq!(result(&["p95 < 1s"]).exit_status(), 0);
        assert_eq!(result(&["failureRate < 0.1"]).exit_status(), 99);
        assert_eq!(result(&[]).exit_status(), 0);
    }

    #[test]
    fn summary_json() {
        let summary = result(&["failureRate < 0.1"]).summary();
        let json = serde_json::to_value(&summary).unwrap();

        assert_eq!(json["overall_pass"], false);
        assert_eq!(json["peak_workers"], 3);
        assert_eq!(json["aborted_workers"], 1);
        assert_eq!(json["ramp_down_aborted_workers"], 2);
        assert_eq!(json["metrics"][HTTP_REQS]["type"], "counter");
        assert_eq!(json["metrics"][HTTP_REQS]["count"], 4);
        assert_eq!(json["metrics"][HTTP_REQS]["rate"], 2.0);
        assert_eq!(json["metrics"]["events"]["count"], 200);
        assert_eq!(json["metrics"]["http_req_failed"]["rate"], 0.25);
        assert_eq!(json["metrics"][HTTP_REQ_DURATION]["type"], "trend");
        assert_eq!(json["metrics"][HTTP_REQ_DURATION]["max"], 30.0);
        assert_eq!(json["status_classes"]["2xx"], 3);
        assert_eq!(json["status_classes"]["5xx"], 1);
        assert_eq!(json["thresholds"][0]["metric"], "http_req_failed");
        assert_eq!(json["thresholds"][0]["observed"], 0.25);
    }

    #[test]
    fn renders_summary() {
        let rendered = result(&["failureRate < 0.1", "p95 < 1s"]).to_string();
        assert!(rendered.contains("2 finished and 1 aborted at shutdown"));
        assert!(rendered.contains("2 workers aborted past the ramp-down grace period"));
        assert!(rendered.contains("http_reqs"));
        assert!(rendered.contains("4 2.00/s"));
        assert!(rendered.contains("25.00% 1 of 4"));
        assert!(rendered.contains("2xx=3 5xx=1"));
        assert!(rendered.contains("✗ http_req_failed: failureRate < 0.1"));
        assert!(rendered.contains("✓ http_req_duration: p95 < 1s"));
    }
}
