use mock_service::MockConfig;
use std::net::SocketAddr;
use std::num::NonZeroU32;
use std::time::Duration;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

fn env_duration(key: &str) -> anyhow::Result<Duration> {
    match std::env::var(key) {
        Ok(value) => Ok(humantime::parse_duration(&value)?),
        Err(_) => Ok(Duration::ZERO),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    FmtSubscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("mock_service=info,tower_http=warn")),
        )
        .init();

    let addr: SocketAddr = std::env::var("MOCK_ADDR")
        .unwrap_or_else(|_| "0.0.0.0:8080".to_string())
        .parse()?;

    let config = MockConfig {
        latency: env_duration("MOCK_LATENCY")?,
        jitter: env_duration("MOCK_JITTER")?,
        failure_rate: std::env::var("MOCK_FAILURE_RATE")
            .ok()
            .map(|v| v.parse())
            .transpose()?
            .unwrap_or(0.),
        capacity: std::env::var("MOCK_CAPACITY")
            .ok()
            .map(|v| v.parse::<u32>())
            .transpose()?
            .and_then(NonZeroU32::new),
    };

    mock_service::run(addr, config).await
}
