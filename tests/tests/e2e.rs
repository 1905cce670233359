mod utils;
#[allow(unused)]
use utils::*;

use stampede::prelude::*;
use stampede::RunResult;
use stampede_core::{StatusClass, CHECKS, EVENTS, HTTP_REQS, HTTP_REQ_FAILED};
use std::time::Duration;

fn config(base_url: String, mode: Mode) -> ScenarioConfig {
    let mut config = ScenarioConfig::new("e2e");
    config.base_url = base_url;
    config.mode = mode;
    config.tick_interval = Duration::from_millis(50);
    config.graceful_ramp_down = Duration::from_secs(1);
    config.graceful_stop = Duration::from_secs(5);
    config
}

fn requests(result: &RunResult) -> u64 {
    result.snapshot.counter(HTTP_REQS).unwrap().total
}

#[tokio::test(flavor = "multi_thread")]
#[ntest::timeout(30_000)]
async fn single_events_pass() {
    let service = mock(Duration::from_millis(2), 0.).await.unwrap();

    let result = Scenario::http(config(service.base_url(), Mode::Single))
        .unwrap()
        .stage(Duration::from_secs(1), 5)
        .stage(Duration::from_secs(2), 5)
        .stage(Duration::from_secs(1), 0)
        .pacing(Pacing::Uniform {
            min: Duration::from_millis(20),
            max: Duration::from_millis(120),
        })
        .threshold("http_req_duration", "p(95)<1000")
        .threshold("http_req_failed", "rate<0.01")
        .threshold(CHECKS, "rate>0.99")
        .await
        .unwrap();

    println!("{result}");
    assert!(result.overall_pass, "{result}");
    assert_eq!(result.exit_status(), 0);
    assert_eq!(result.peak_workers, 5);

    let reqs = requests(&result);
    assert!(reqs > 50, "{reqs} requests");
    assert_eq!(result.snapshot.counter(EVENTS).unwrap().total, reqs);
    assert_eq!(service.stats().accepted_events, reqs);
    assert_eq!(result.snapshot.status_count(StatusClass::Success), reqs);
}

#[tokio::test(flavor = "multi_thread")]
#[ntest::timeout(30_000)]
async fn bulk_events_pass() {
    let service = mock(Duration::from_millis(5), 0.).await.unwrap();

    let mut config = config(service.base_url(), Mode::Bulk);
    config.events_per_request = 50;
    let result = Scenario::http(config)
        .unwrap()
        .start_workers(4)
        .stage(Duration::from_secs(2), 4)
        .pacing(Pacing::Fixed(Duration::from_millis(200)))
        .threshold("http_req_failed", "rate<0.01")
        .await
        .unwrap();

    assert!(result.overall_pass, "{result}");
    let reqs = requests(&result);
    assert!((20..=50).contains(&reqs), "{reqs} requests");
    assert_eq!(result.snapshot.counter(EVENTS).unwrap().total, reqs * 50);
    assert_eq!(service.stats().accepted_events, reqs * 50);
}

#[tokio::test(flavor = "multi_thread")]
#[ntest::timeout(30_000)]
async fn failing_threshold_sets_exit_code() {
    let service = mock(Duration::from_millis(2), 0.5).await.unwrap();

    let result = Scenario::http(config(service.base_url(), Mode::Single))
        .unwrap()
        .stage(Duration::from_secs(2), 3)
        .pacing(Pacing::Fixed(Duration::from_millis(50)))
        .threshold("http_req_failed", "rate<0.01")
        .await
        .unwrap();

    assert!(!result.overall_pass);
    assert_eq!(result.exit_status(), 99);

    let failed = result.snapshot.rate(HTTP_REQ_FAILED).unwrap();
    assert!(failed.hits > 0 && failed.hits < failed.total);
    assert_eq!(
        result.snapshot.status_count(StatusClass::ServerError),
        failed.hits
    );

    let summary = serde_json::to_value(result.summary()).unwrap();
    assert_eq!(summary["overall_pass"], false);
    assert_eq!(summary["thresholds"][0]["passed"], false);
}

#[tokio::test(flavor = "multi_thread")]
#[ntest::timeout(30_000)]
async fn unreachable_target_counts_transport_errors() {
    init();
    let port = std::net::TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port();

    let result = Scenario::http(config(format!("http://127.0.0.1:{port}"), Mode::Single))
        .unwrap()
        .stage(Duration::from_secs(1), 2)
        .pacing(Pacing::Fixed(Duration::from_millis(100)))
        .threshold("http_req_failed", "rate<0.01")
        .await
        .unwrap();

    let reqs = requests(&result);
    assert!(reqs > 0);
    assert_eq!(result.snapshot.rate(HTTP_REQ_FAILED).unwrap().hits, reqs);
    assert_eq!(
        result.snapshot.status_count(StatusClass::TransportError),
        reqs
    );
    assert!(!result.overall_pass);
}

#[tokio::test(flavor = "multi_thread")]
#[ntest::timeout(30_000)]
async fn json_scenario() {
    let service = mock(Duration::from_millis(2), 0.).await.unwrap();

    let json = format!(
        r#"{{
            "name": "json",
            "base_url": "{}",
            "stages": [
                {{ "duration": "1s", "target": 3 }},
                {{ "duration": "500ms", "target": 0 }}
            ],
            "graceful_ramp_down": "1s",
            "graceful_stop": "5s",
            "pacing": {{ "fixed": "100ms" }},
            "tick_interval": "50ms",
            "thresholds": {{
                "http_req_duration": ["p(95)<1000", "p(99)<2000"],
                "http_req_failed": ["rate<0.01"]
            }}
        }}"#,
        service.base_url()
    );
    let config = ScenarioConfig::from_json(&json).unwrap();
    assert_eq!(config.thresholds.len(), 3);

    let result = Scenario::http(config).unwrap().await.unwrap();
    assert!(result.overall_pass, "{result}");
    assert_eq!(result.thresholds.len(), 3);
    assert_eq!(service.stats().accepted_events, requests(&result));
}
