use std::time::Duration;

/// Default target service, matching the ingestion API's local port.
pub const DEFAULT_BASE_URL: &str = "http://localhost:8080";

/// Events carried by a single `/events/bulk` request.
pub const DEFAULT_EVENTS_PER_REQUEST: u32 = 50;

/// Time retired workers are given to finish their in-flight iteration.
pub const DEFAULT_GRACEFUL_RAMP_DOWN: Duration = Duration::from_secs(30);

/// Time workers are given to finish when the run ends.
pub const DEFAULT_GRACEFUL_STOP: Duration = Duration::from_secs(30);

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// How often the controller re-evaluates the stage schedule.
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_millis(100);

/// Status recorded for requests that never produced an HTTP response.
pub const TRANSPORT_ERROR_STATUS: u16 = 0;

/// Status the ingestion API answers with when it accepts events.
pub const EXPECTED_STATUS: u16 = 202;

/// Exit code reported when one or more thresholds fail.
pub const THRESHOLD_FAILURE_EXIT_CODE: u8 = 99;

/// Base unix timestamp used for generated events (2026-02-15T12:00:00Z).
pub const BASE_TIMESTAMP: i64 = 1_771_156_800;

/// Built-in metric names.
pub const HTTP_REQS: &str = "http_reqs";
pub const HTTP_REQ_FAILED: &str = "http_req_failed";
pub const HTTP_REQ_DURATION: &str = "http_req_duration";
pub const EVENTS: &str = "events";
pub const CHECKS: &str = "checks";
