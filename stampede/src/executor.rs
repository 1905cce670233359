//! A single worker: build a payload, send it, report the outcome, pace, repeat.
use crate::collector::MetricsCollector;
use crate::transport::{Payload, Transport};
use pin_project::pin_project;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use stampede_core::{Pacing, RequestOutcome};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

/// Identity of the iteration a payload is built for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerContext {
    pub worker_id: u64,
    pub iteration: u64,
}

#[derive(Debug, Error)]
#[error("payload build failed: {0}")]
pub struct BuildError(String);

impl BuildError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self(reason.into())
    }
}

impl From<serde_json::Error> for BuildError {
    fn from(err: serde_json::Error) -> Self {
        Self(err.to_string())
    }
}

/// Produces the request for each iteration.
pub trait PayloadBuilder: Send + Sync + 'static {
    fn build(&self, ctx: WorkerContext) -> Result<Payload, BuildError>;
}

impl<F> PayloadBuilder for F
where
    F: Fn(WorkerContext) -> Result<Payload, BuildError> + Send + Sync + 'static,
{
    fn build(&self, ctx: WorkerContext) -> Result<Payload, BuildError> {
        self(ctx)
    }
}

/// Per-iteration settings shared by every worker of a run.
#[derive(Debug, Clone, Copy)]
pub(crate) struct IterationSettings {
    pub pacing: Pacing,
    pub request_timeout: Duration,
    pub expected_status: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Running,
    Stopped,
}

pub(crate) struct RequestExecutor<T, B> {
    id: u64,
    iteration: u64,
    state: State,
    transport: Arc<T>,
    builder: Arc<B>,
    metrics: Arc<MetricsCollector>,
    settings: IterationSettings,
    retire: CancellationToken,
    rng: SmallRng,
}

impl<T: Transport, B: PayloadBuilder> RequestExecutor<T, B> {
    pub fn new(
        id: u64,
        transport: Arc<T>,
        builder: Arc<B>,
        metrics: Arc<MetricsCollector>,
        settings: IterationSettings,
        retire: CancellationToken,
    ) -> Self {
        Self {
            id,
            iteration: 0,
            state: State::Running,
            transport,
            builder,
            metrics,
            settings,
            retire,
            rng: SmallRng::from_entropy(),
        }
    }

    /// Loops until retired and returns the number of completed iterations.
    ///
    /// Retirement is only observed between iterations: an in-flight request
    /// always runs to completion (or timeout) and is reported.
    pub async fn run(mut self) -> u64 {
        trace!("Worker {} started", self.id);
        while self.state == State::Running {
            if self.retire.is_cancelled() {
                self.state = State::Stopped;
                break;
            }

            let outcome = self.iterate().await;
            self.metrics.report(&outcome);
            self.iteration += 1;

            self.pace().await;
        }
        trace!("Worker {} retired after {} iterations", self.id, self.iteration);
        self.iteration
    }

    async fn iterate(&mut self) -> RequestOutcome {
        let ctx = WorkerContext {
            worker_id: self.id,
            iteration: self.iteration,
        };
        let payload = match self.builder.build(ctx) {
            Ok(payload) => payload,
            Err(err) => {
                warn!("Worker {}: {err}", self.id);
                return RequestOutcome::unsent();
            }
        };

        let events = payload.events;
        let timeout = self.settings.request_timeout;
        match tokio::time::timeout(timeout, Timed::new(self.transport.send(payload))).await {
            Ok((Ok(status), latency)) => RequestOutcome::from_status(
                status,
                self.settings.expected_status,
                latency,
                events,
            ),
            Ok((Err(err), latency)) => {
                debug!("Worker {}: {err}", self.id);
                RequestOutcome::failed(latency, events)
            }
            Err(_) => {
                debug!("Worker {}: request timed out after {timeout:?}", self.id);
                RequestOutcome::failed(timeout, events)
            }
        }
    }

    async fn pace(&mut self) {
        let delay = pacing_delay(&self.settings.pacing, &mut self.rng);
        if delay.is_zero() {
            // Give the runtime a chance to run the controller between requests.
            tokio::task::yield_now().await;
            return;
        }

        tokio::select! {
            _ = self.retire.cancelled() => self.state = State::Stopped,
            _ = tokio::time::sleep(delay) => {}
        }
    }
}

fn pacing_delay(pacing: &Pacing, rng: &mut impl Rng) -> Duration {
    match *pacing {
        Pacing::None => Duration::ZERO,
        Pacing::Fixed(delay) => delay,
        Pacing::Uniform { min, max } if min < max => rng.gen_range(min..=max),
        Pacing::Uniform { min, .. } => min,
    }
}

/// Resolves to the inner output and the time from first poll to completion.
#[pin_project]
struct Timed<F> {
    #[pin]
    inner: F,
    start: Option<Instant>,
}

impl<F> Timed<F> {
    fn new(inner: F) -> Self {
        Self { inner, start: None }
    }
}

impl<F: Future> Future for Timed<F> {
    type Output = (F::Output, Duration);

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.project();
        let start = *this.start.get_or_insert_with(Instant::now);
        match this.inner.poll(cx) {
            Poll::Ready(output) => Poll::Ready((output, start.elapsed())),
            Poll::Pending => Poll::Pending,
        }
    }
}
