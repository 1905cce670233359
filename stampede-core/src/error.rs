use std::time::Duration;
use thiserror::Error;

/// Invalid scenario or threshold definitions. Always detected before any
/// traffic is generated.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ConfigError {
    #[error("scenario `{0}` has no stages")]
    EmptyStages(String),

    #[error("stage {index} has a zero duration")]
    ZeroDuration { index: usize },

    #[error("{field} must be greater than zero")]
    NonPositive { field: &'static str },

    #[error("pacing range is inverted ({min:?} > {max:?})")]
    InvertedPacing { min: Duration, max: Duration },

    #[error("invalid threshold `{expression}`: {reason}")]
    InvalidThreshold { expression: String, reason: String },

    #[error("threshold `{expression}` cannot be applied to {kind} metric `{metric}`")]
    KindMismatch {
        metric: String,
        kind: &'static str,
        expression: String,
    },

    #[error("threshold references unknown metric `{0}`")]
    UnknownMetric(String),

    #[error("invalid base url `{url}`: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("malformed configuration: {0}")]
    Malformed(String),
}

impl From<serde_json::Error> for ConfigError {
    fn from(err: serde_json::Error) -> Self {
        Self::Malformed(err.to_string())
    }
}
