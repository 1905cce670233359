//! Builder-style entry point for running a scenario.
use crate::controller::{RunController, RunError};
use crate::events::EventPayloadBuilder;
use crate::executor::PayloadBuilder;
use crate::report::RunResult;
use crate::transport::{HttpTransport, Transport};
use stampede_core::{ConfigError, Pacing, Rounding, ScenarioConfig, Stage, Threshold};
use std::{
    future::Future,
    pin::Pin,
    task::{Context, Poll},
    time::Duration,
};
use tokio_util::sync::CancellationToken;

type RunFuture = Pin<Box<dyn Future<Output = Result<RunResult, RunError>> + Send>>;

/// Load test scenario
///
/// Configure with the builder methods, then `.await` it to run.
///
/// # Example
/// ```no_run
/// use stampede::prelude::*;
/// use std::time::Duration;
///
/// #[tokio::main]
/// async fn main() -> std::process::ExitCode {
///     let config = ScenarioConfig::new("smoke");
///     let result = Scenario::http(config)
///         .unwrap()
///         .stage(Duration::from_secs(15), 400)
///         .stage(Duration::from_secs(180), 400)
///         .stage(Duration::from_secs(15), 0)
///         .pacing(Pacing::Fixed(Duration::from_secs(1)))
///         .threshold("http_req_duration", "p(95)<1000")
///         .threshold("http_req_failed", "rate<0.01")
///         .await
///         .unwrap();
///
///     println!("{result}");
///     result.exit_code()
/// }
/// ```
#[pin_project::pin_project]
pub struct Scenario<T, B> {
    transport: Option<T>,
    builder: Option<B>,
    runner_fut: Option<RunFuture>,
    config: ScenarioConfig,
    thresholds: Vec<(String, String)>,
    abort: CancellationToken,
}

impl<T, B> Scenario<T, B> {
    pub fn new(name: &str, transport: T, builder: B) -> Self {
        Self::with_config(ScenarioConfig::new(name), transport, builder)
    }

    pub fn with_config(config: ScenarioConfig, transport: T, builder: B) -> Self {
        Self {
            transport: Some(transport),
            builder: Some(builder),
            runner_fut: None,
            config,
            thresholds: vec![],
            abort: CancellationToken::new(),
        }
    }

    /// Appends a stage ramping to `target` workers over `duration`.
    pub fn stage(mut self, duration: Duration, target: u32) -> Self {
        self.config.stages.push(Stage::new(duration, target));
        self
    }

    /// Replaces all stages.
    pub fn stages(mut self, stages: impl IntoIterator<Item = Stage>) -> Self {
        self.config.stages = stages.into_iter().collect();
        self
    }

    pub fn start_workers(mut self, workers: u32) -> Self {
        self.config.start_workers = workers;
        self
    }

    pub fn graceful_ramp_down(mut self, duration: Duration) -> Self {
        self.config.graceful_ramp_down = duration;
        self
    }

    pub fn graceful_stop(mut self, duration: Duration) -> Self {
        self.config.graceful_stop = duration;
        self
    }

    pub fn pacing(mut self, pacing: Pacing) -> Self {
        self.config.pacing = pacing;
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.config.request_timeout = timeout;
        self
    }

    pub fn tick_interval(mut self, interval: Duration) -> Self {
        self.config.tick_interval = interval;
        self
    }

    pub fn rounding(mut self, rounding: Rounding) -> Self {
        self.config.rounding = rounding;
        self
    }

    pub fn expected_status(mut self, status: u16) -> Self {
        self.config.expected_status = status;
        self
    }

    /// Adds a k6-style threshold on `metric`, e.g. `("http_req_duration", "p(95)<1000")`.
    ///
    /// Expressions are parsed when the scenario starts; a bad one fails the run
    /// with [`RunError::Config`] before any request is sent.
    pub fn threshold(mut self, metric: &str, expression: &str) -> Self {
        self.thresholds
            .push((metric.to_string(), expression.to_string()));
        self
    }

    /// Cancelling the token ends the run early; it still drains and reports.
    pub fn abort_handle(&self) -> CancellationToken {
        self.abort.clone()
    }

    pub fn config(&self) -> &ScenarioConfig {
        &self.config
    }
}

impl Scenario<HttpTransport, EventPayloadBuilder> {
    /// Event ingestion scenario against `config.base_url`.
    pub fn http(config: ScenarioConfig) -> Result<Self, ConfigError> {
        let transport = HttpTransport::new(&config.base_url, config.request_timeout)?;
        let builder = EventPayloadBuilder::from_config(&config);
        Ok(Self::with_config(config, transport, builder))
    }
}

impl<T: Transport, B: PayloadBuilder> Future for Scenario<T, B> {
    type Output = Result<RunResult, RunError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.project();
        if this.runner_fut.is_none() {
            let (Some(transport), Some(builder)) = (this.transport.take(), this.builder.take())
            else {
                unreachable!()
            };
            let mut config = this.config.clone();
            let thresholds = std::mem::take(this.thresholds);
            let abort = this.abort.clone();

            *this.runner_fut = Some(Box::pin(async move {
                for (metric, expression) in thresholds {
                    config.thresholds.push(Threshold::new(&metric, &expression)?);
                }
                RunController::new(config, transport, builder)?
                    .with_abort(abort)
                    .run()
                    .await
            }));
        }

        if let Some(runner) = this.runner_fut {
            runner.as_mut().poll(cx)
        } else {
            unreachable!()
        }
    }
}
