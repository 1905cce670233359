use anyhow::Context;
use mock_service::{MockConfig, MockService};
use std::sync::OnceLock;
use std::time::Duration;
use tracing::{error, Level};
use tracing_subscriber::FmtSubscriber;

#[allow(unused)]
pub fn init() {
    static ONCE_LOCK: OnceLock<()> = OnceLock::new();

    ONCE_LOCK.get_or_init(|| {
        let default_panic = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |info| {
            default_panic(info);
            error!("Panic occurred: {info:?}");
        }));

        let _ = FmtSubscriber::builder()
            .with_max_level(Level::DEBUG)
            .with_env_filter("stampede=debug,mock_service=info")
            .try_init();
    });
}

/// Mock ingestion service on a free local port.
#[allow(unused)]
pub async fn mock(latency: Duration, failure_rate: f64) -> anyhow::Result<MockService> {
    init();
    mock_service::spawn(
        ([127, 0, 0, 1], 0).into(),
        MockConfig {
            latency,
            jitter: latency / 4,
            failure_rate,
            capacity: None,
        },
    )
    .await
    .context("binding mock service")
}
