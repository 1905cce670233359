//! Threshold expressions.
//!
//! Accepts both the k6 forms (`p(95)<1000`, `rate<0.01`, `rate>15000`) attached
//! to an explicit metric, and a shorthand form that names its own metric
//! (`p95 < 1000ms`, `failureRate < 0.01`, `throughput > 15000/s`).
use crate::{
    ConfigError, MetricKind, CHECKS, EVENTS, HTTP_REQS, HTTP_REQ_DURATION, HTTP_REQ_FAILED,
};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Aggregate {
    /// Percentile in `(0, 100]`.
    Percentile(f64),
    Avg,
    Min,
    Med,
    Max,
    Count,
    /// Ratio for a Rate, increments per second for a Counter.
    Rate,
}

impl Aggregate {
    pub fn applies_to(&self, kind: MetricKind) -> bool {
        match kind {
            MetricKind::Trend => !matches!(self, Self::Rate),
            MetricKind::Rate => matches!(self, Self::Rate),
            MetricKind::Counter => matches!(self, Self::Count | Self::Rate),
        }
    }

    fn parse(s: &str) -> Option<Self> {
        let agg = match s {
            "avg" => Self::Avg,
            "min" => Self::Min,
            "med" => Self::Med,
            "max" => Self::Max,
            "count" => Self::Count,
            "rate" | "failureRate" | "throughput" => Self::Rate,
            _ => {
                let pct = s.strip_prefix('p')?;
                let pct = pct
                    .strip_prefix('(')
                    .and_then(|p| p.strip_suffix(')'))
                    .unwrap_or(pct);
                let pct: f64 = pct.trim().parse().ok()?;
                if !(pct > 0. && pct <= 100.) {
                    return None;
                }
                Self::Percentile(pct)
            }
        };
        Some(agg)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparator {
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
}

impl Comparator {
    // Two-character operators first so `<=` is not read as `<`.
    const TOKENS: [(&'static str, Comparator); 6] = [
        ("<=", Comparator::Le),
        (">=", Comparator::Ge),
        ("==", Comparator::Eq),
        ("!=", Comparator::Ne),
        ("<", Comparator::Lt),
        (">", Comparator::Gt),
    ];

    pub fn apply(&self, observed: f64, expected: f64) -> bool {
        match self {
            Self::Lt => observed < expected,
            Self::Le => observed <= expected,
            Self::Gt => observed > expected,
            Self::Ge => observed >= expected,
            Self::Eq => observed == expected,
            Self::Ne => observed != expected,
        }
    }

    /// Outcome when there is nothing to compare (no samples, zero-length run).
    ///
    /// An upper bound holds over an empty set; any other comparison fails.
    pub fn vacuous(&self) -> bool {
        matches!(self, Self::Lt | Self::Le)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
            Self::Eq => "==",
            Self::Ne => "!=",
        }
    }
}

/// Unit suffix a threshold value was written with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Unit {
    Plain,
    /// `ms`, `us`, `s` or `m`.
    Duration,
    /// `/s`
    PerSecond,
    /// `%`
    Percent,
}

impl Unit {
    fn applies_to(&self, kind: MetricKind) -> bool {
        match self {
            Self::Plain | Self::Percent => true,
            Self::Duration => kind == MetricKind::Trend,
            Self::PerSecond => kind == MetricKind::Counter,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Threshold {
    metric: String,
    aggregate: Aggregate,
    comparator: Comparator,
    /// Durations are normalized to milliseconds, percentages to ratios.
    value: f64,
    unit: Unit,
    expression: String,
}

impl Threshold {
    /// Parse a k6-style expression bound to `metric`, e.g. `("http_req_duration", "p(95)<1000")`.
    pub fn new(metric: &str, expression: &str) -> Result<Self, ConfigError> {
        let (aggregate, comparator, value, unit) = split(expression)?;
        let aggregate =
            Aggregate::parse(aggregate).ok_or_else(|| invalid(expression, "unknown aggregate"))?;

        Ok(Self {
            metric: metric.to_string(),
            aggregate,
            comparator,
            value,
            unit,
            expression: expression.trim().to_string(),
        })
    }

    pub fn metric(&self) -> &str {
        &self.metric
    }

    pub fn aggregate(&self) -> Aggregate {
        self.aggregate
    }

    pub fn comparator(&self) -> Comparator {
        self.comparator
    }

    pub fn value(&self) -> f64 {
        self.value
    }

    pub fn expression(&self) -> &str {
        &self.expression
    }

    /// Rejects metrics a run never records, and aggregates or units that do
    /// not fit the metric's kind.
    pub fn validate(&self) -> Result<(), ConfigError> {
        match builtin_kind(&self.metric) {
            Some(kind) if !self.aggregate.applies_to(kind) => Err(ConfigError::KindMismatch {
                metric: self.metric.clone(),
                kind: kind.as_str(),
                expression: self.expression.clone(),
            }),
            Some(kind) if !self.unit.applies_to(kind) => Err(invalid(
                &self.expression,
                &format!("unit does not apply to {} `{}`", kind.as_str(), self.metric),
            )),
            Some(_) => Ok(()),
            None => Err(ConfigError::UnknownMetric(self.metric.clone())),
        }
    }
}

impl FromStr for Threshold {
    type Err = ConfigError;

    /// Shorthand form where the aggregate implies the metric: `p95 < 1000ms`,
    /// `failureRate < 0.01`, `throughput > 15000/s`.
    fn from_str(expression: &str) -> Result<Self, Self::Err> {
        let (lhs, ..) = split(expression)?;
        let metric = match lhs {
            "failureRate" => HTTP_REQ_FAILED,
            "throughput" | "count" => HTTP_REQS,
            "rate" => return Err(invalid(expression, "`rate` needs an explicit metric")),
            _ => HTTP_REQ_DURATION,
        };
        Self::new(metric, expression)
    }
}

impl fmt::Display for Threshold {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.metric, self.expression)
    }
}

/// Kind of the metrics every run records.
pub fn builtin_kind(metric: &str) -> Option<MetricKind> {
    match metric {
        HTTP_REQS | EVENTS => Some(MetricKind::Counter),
        HTTP_REQ_FAILED | CHECKS => Some(MetricKind::Rate),
        HTTP_REQ_DURATION => Some(MetricKind::Trend),
        _ => None,
    }
}

fn split(expression: &str) -> Result<(&str, Comparator, f64, Unit), ConfigError> {
    let (pos, token, comparator) = expression
        .char_indices()
        .find_map(|(i, _)| {
            Comparator::TOKENS
                .iter()
                .find(|(token, _)| expression[i..].starts_with(token))
                .map(|(token, cmp)| (i, *token, *cmp))
        })
        .ok_or_else(|| invalid(expression, "missing comparator"))?;

    let lhs = expression[..pos].trim();
    let rhs = expression[pos + token.len()..].trim();
    if lhs.is_empty() {
        return Err(invalid(expression, "missing aggregate"));
    }

    let (value, unit) = parse_value(rhs).ok_or_else(|| invalid(expression, "invalid value"))?;
    Ok((lhs, comparator, value, unit))
}

fn parse_value(s: &str) -> Option<(f64, Unit)> {
    // Longest suffixes first so `/s` and `ms` are not read as `s`.
    let (number, scale, unit) = if let Some(n) = s.strip_suffix("/s") {
        (n, 1., Unit::PerSecond)
    } else if let Some(n) = s.strip_suffix("ms") {
        (n, 1., Unit::Duration)
    } else if let Some(n) = s.strip_suffix("us") {
        (n, 1e-3, Unit::Duration)
    } else if let Some(n) = s.strip_suffix('s') {
        (n, 1e3, Unit::Duration)
    } else if let Some(n) = s.strip_suffix('m') {
        (n, 60e3, Unit::Duration)
    } else if let Some(n) = s.strip_suffix('%') {
        (n, 1e-2, Unit::Percent)
    } else {
        (s, 1., Unit::Plain)
    };

    let value: f64 = number.trim().parse().ok()?;
    value.is_finite().then_some((value * scale, unit))
}

fn invalid(expression: &str, reason: &str) -> ConfigError {
    ConfigError::InvalidThreshold {
        expression: expression.to_string(),
        reason: reason.to_string(),
    }
}
