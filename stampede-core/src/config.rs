use crate::{
    ConfigError, Threshold, DEFAULT_BASE_URL, DEFAULT_EVENTS_PER_REQUEST,
    DEFAULT_GRACEFUL_RAMP_DOWN, DEFAULT_GRACEFUL_STOP, DEFAULT_REQUEST_TIMEOUT,
    DEFAULT_TICK_INTERVAL, EXPECTED_STATUS,
};
use serde::de::{self, MapAccess, Visitor};
use serde::Deserialize;
use std::fmt;
use std::time::Duration;

/// A segment of the run ramping linearly from the previous target to `target`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
pub struct Stage {
    #[serde(deserialize_with = "duration::deserialize")]
    pub duration: Duration,
    pub target: u32,
}

impl Stage {
    pub fn new(duration: Duration, target: u32) -> Self {
        Self { duration, target }
    }
}

/// Sleep between two iterations of the same worker.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Pacing {
    #[default]
    None,
    Fixed(#[serde(deserialize_with = "duration::deserialize")] Duration),
    Uniform {
        #[serde(deserialize_with = "duration::deserialize")]
        min: Duration,
        #[serde(deserialize_with = "duration::deserialize")]
        max: Duration,
    },
}

/// How fractional worker counts are turned into whole workers while ramping.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Rounding {
    /// Half away from zero.
    #[default]
    Nearest,
    Floor,
    Ceil,
}

impl Rounding {
    pub fn apply(&self, value: f64) -> u32 {
        let rounded = match self {
            Self::Nearest => value.round(),
            Self::Floor => value.floor(),
            Self::Ceil => value.ceil(),
        };
        // Saturating float-to-int conversion; negatives clamp to 0.
        rounded as u32
    }
}

/// Which ingestion endpoint the default payload builders target.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// One event per `POST /events`.
    #[default]
    Single,
    /// `events_per_request` events per `POST /events/bulk`.
    Bulk,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ScenarioConfig {
    pub name: String,
    pub base_url: String,
    pub mode: Mode,
    pub events_per_request: u32,
    pub campaign_id: String,
    pub tags: Vec<String>,
    /// Workers at the start of the first stage.
    pub start_workers: u32,
    pub stages: Vec<Stage>,
    #[serde(deserialize_with = "duration::deserialize")]
    pub graceful_ramp_down: Duration,
    #[serde(deserialize_with = "duration::deserialize")]
    pub graceful_stop: Duration,
    pub pacing: Pacing,
    #[serde(deserialize_with = "duration::deserialize")]
    pub request_timeout: Duration,
    #[serde(deserialize_with = "duration::deserialize")]
    pub tick_interval: Duration,
    pub rounding: Rounding,
    pub expected_status: u16,
    #[serde(deserialize_with = "deserialize_thresholds")]
    pub thresholds: Vec<Threshold>,
}

impl ScenarioConfig {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            base_url: DEFAULT_BASE_URL.to_string(),
            mode: Mode::default(),
            events_per_request: DEFAULT_EVENTS_PER_REQUEST,
            campaign_id: format!("cmp_{name}"),
            tags: vec![],
            start_workers: 0,
            stages: vec![],
            graceful_ramp_down: DEFAULT_GRACEFUL_RAMP_DOWN,
            graceful_stop: DEFAULT_GRACEFUL_STOP,
            pacing: Pacing::default(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            tick_interval: DEFAULT_TICK_INTERVAL,
            rounding: Rounding::default(),
            expected_status: EXPECTED_STATUS,
            thresholds: vec![],
        }
    }

    /// Parse and validate a JSON scenario definition.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.stages.is_empty() {
            return Err(ConfigError::EmptyStages(self.name.clone()));
        }

        if let Some(index) = self.stages.iter().position(|s| s.duration.is_zero()) {
            return Err(ConfigError::ZeroDuration { index });
        }

        if self.tick_interval.is_zero() {
            return Err(ConfigError::NonPositive {
                field: "tick_interval",
            });
        }

        if self.request_timeout.is_zero() {
            return Err(ConfigError::NonPositive {
                field: "request_timeout",
            });
        }

        if self.mode == Mode::Bulk && self.events_per_request == 0 {
            return Err(ConfigError::NonPositive {
                field: "events_per_request",
            });
        }

        if let Pacing::Uniform { min, max } = self.pacing {
            if min > max {
                return Err(ConfigError::InvertedPacing { min, max });
            }
        }

        self.thresholds.iter().try_for_each(Threshold::validate)
    }

    /// Sum of all stage durations.
    pub fn duration(&self) -> Duration {
        self.stages.iter().map(|s| s.duration).sum()
    }

    /// Largest number of workers the schedule ever asks for.
    pub fn peak_workers(&self) -> u32 {
        self.stages
            .iter()
            .map(|s| s.target)
            .fold(self.start_workers, u32::max)
    }
}

impl Default for ScenarioConfig {
    fn default() -> Self {
        Self::new("default")
    }
}

/// Thresholds are declared k6-style: `{"http_req_duration": ["p(95)<1000"]}`.
/// They keep their declaration order.
fn deserialize_thresholds<'de, D>(deserializer: D) -> Result<Vec<Threshold>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    deserializer.deserialize_map(ThresholdsVisitor)
}

struct ThresholdsVisitor;

impl<'de> Visitor<'de> for ThresholdsVisitor {
    type Value = Vec<Threshold>;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a map of metric names to threshold expressions")
    }

    fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Self::Value, A::Error> {
        let mut thresholds = Vec::new();
        while let Some((metric, expressions)) = map.next_entry::<String, Vec<String>>()? {
            for expression in &expressions {
                let threshold = Threshold::new(&metric, expression).map_err(de::Error::custom)?;
                thresholds.push(threshold);
            }
        }
        Ok(thresholds)
    }
}

/// Durations as humantime strings (`"15s"`, `"3m"`, `"250ms"`) or plain seconds.
mod duration {
    use serde::de::{self, Visitor};
    use std::fmt;
    use std::time::Duration;

    pub(super) fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: de::Deserializer<'de>,
    {
        deserializer.deserialize_any(DurationVisitor)
    }

    struct DurationVisitor;

    impl<'de> Visitor<'de> for DurationVisitor {
        type Value = Duration;

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("a duration such as \"15s\" or a number of seconds")
        }

        fn visit_str<E: de::Error>(self, v: &str) -> Result<Duration, E> {
            humantime::parse_duration(v).map_err(E::custom)
        }

        fn visit_u64<E: de::Error>(self, v: u64) -> Result<Duration, E> {
            Ok(Duration::from_secs(v))
        }

        fn visit_i64<E: de::Error>(self, v: i64) -> Result<Duration, E> {
            u64::try_from(v)
                .map(Duration::from_secs)
                .map_err(|_| E::custom("duration cannot be negative"))
        }

        fn visit_f64<E: de::Error>(self, v: f64) -> Result<Duration, E> {
            Duration::try_from_secs_f64(v).map_err(E::custom)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Aggregate, EVENTS, HTTP_REQ_DURATION, HTTP_REQ_FAILED};

    const PEAK_BULK: &str = r#"{
        "name": "peak_20k",
        "mode": "bulk",
        "stages": [
            { "duration": "15s", "target": 400 },
            { "duration": "3m", "target": 400 },
            { "duration": "15s", "target": 0 }
        ],
        "graceful_ramp_down": "15s",
        "graceful_stop": "15s",
        "pacing": { "fixed": "1s" },
        "thresholds": {
            "http_req_duration": ["p(95)<1000", "p(99)<2000"],
            "http_req_failed": ["rate<0.01"],
            "events": ["rate>15000"]
        }
    }"#;

    #[test]
    fn parses_scenario() {
        let config = ScenarioConfig::from_json(PEAK_BULK).unwrap();
        assert_eq!(config.name, "peak_20k");
        assert_eq!(config.mode, Mode::Bulk);
        assert_eq!(config.events_per_request, DEFAULT_EVENTS_PER_REQUEST);
        assert_eq!(config.base_url, DEFAULT_BASE_URL);
        assert_eq!(config.stages[1], Stage::new(Duration::from_secs(180), 400));
        assert_eq!(config.graceful_stop, Duration::from_secs(15));
        assert_eq!(config.pacing, Pacing::Fixed(Duration::from_secs(1)));
        assert_eq!(config.duration(), Duration::from_secs(210));
        assert_eq!(config.peak_workers(), 400);
        assert_eq!(config.thresholds.len(), 4);

        let declared: Vec<_> = config
            .thresholds
            .iter()
            .map(|t| (t.metric(), t.expression()))
            .collect();
        assert_eq!(
            declared,
            [
                (HTTP_REQ_DURATION, "p(95)<1000"),
                (HTTP_REQ_DURATION, "p(99)<2000"),
                (HTTP_REQ_FAILED, "rate<0.01"),
                (EVENTS, "rate>15000"),
            ]
        );
        assert_eq!(config.thresholds[0].aggregate(), Aggregate::Percentile(95.));
    }

    #[test]
    fn parses_uniform_pacing_and_numeric_durations() {
        let config = ScenarioConfig::from_json(
            r#"{
                "stages": [{ "duration": 30, "target": 100 }],
                "pacing": { "uniform": { "min": "20ms", "max": "120ms" } },
                "rounding": "floor"
            }"#,
        )
        .unwrap();
        assert_eq!(config.stages[0].duration, Duration::from_secs(30));
        assert_eq!(
            config.pacing,
            Pacing::Uniform {
                min: Duration::from_millis(20),
                max: Duration::from_millis(120)
            }
        );
        assert_eq!(config.rounding, Rounding::Floor);
    }

    #[test]
    fn rejects_invalid_scenarios() {
        assert_eq!(
            ScenarioConfig::from_json(r#"{ "name": "empty" }"#).unwrap_err(),
            ConfigError::EmptyStages("empty".to_string())
        );

        let zero_stage = r#"{
            "stages": [{ "duration": "1s", "target": 1 }, { "duration": "0s", "target": 2 }]
        }"#;
        assert_eq!(
            ScenarioConfig::from_json(zero_stage).unwrap_err(),
            ConfigError::ZeroDuration { index: 1 }
        );

        let inverted = ScenarioConfig::from_json(
            r#"{
                "stages": [{ "duration": "1s", "target": 1 }],
                "pacing": { "uniform": { "min": "2s", "max": "1s" } }
            }"#,
        );
        assert!(matches!(inverted, Err(ConfigError::InvertedPacing { .. })));

        let bad_threshold = ScenarioConfig::from_json(
            r#"{
                "stages": [{ "duration": "1s", "target": 1 }],
                "thresholds": { "http_req_duration": ["p95 fast"] }
            }"#,
        );
        assert!(matches!(bad_threshold, Err(ConfigError::Malformed(_))));

        let unknown_field = ScenarioConfig::from_json(r#"{ "vus": 10 }"#);
        assert!(matches!(unknown_field, Err(ConfigError::Malformed(_))));
    }

    #[test]
    fn rounding_policies() {
        assert_eq!(Rounding::Nearest.apply(2.5), 3);
        assert_eq!(Rounding::Nearest.apply(2.49), 2);
        assert_eq!(Rounding::Floor.apply(2.9), 2);
        assert_eq!(Rounding::Ceil.apply(2.1), 3);
        assert_eq!(Rounding::Nearest.apply(-0.7), 0);
    }
}
