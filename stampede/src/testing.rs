//! Test doubles shared by the engine's unit tests.
use crate::executor::{BuildError, WorkerContext};
use crate::transport::{Endpoint, Payload, Transport, TransportError};
use rand_distr::{Distribution, SkewNormal};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// In-process transport with a configurable latency and failure pattern.
pub(crate) struct MockTransport {
    latency: Duration,
    jitter: Option<Duration>,
    status: u16,
    fail_every: Option<(u64, u16)>,
    unreachable: bool,
    sent: AtomicU64,
}

impl MockTransport {
    pub fn new(latency: Duration) -> Self {
        Self {
            latency,
            jitter: None,
            status: 202,
            fail_every: None,
            unreachable: false,
            sent: AtomicU64::new(0),
        }
    }

    /// Never gets a response: every request fails after `latency`.
    pub fn unreachable(latency: Duration) -> Self {
        Self {
            unreachable: true,
            ..Self::new(latency)
        }
    }

    /// Answers every `n`th request with `status` instead of 202.
    pub fn failing_every(mut self, n: u64, status: u16) -> Self {
        self.fail_every = Some((n, status));
        self
    }

    pub fn with_jitter(mut self, std: Duration) -> Self {
        self.jitter = Some(std);
        self
    }

    pub fn sent(&self) -> u64 {
        self.sent.load(Ordering::Relaxed)
    }

    fn delay(&self) -> Duration {
        match self.jitter {
            Some(std) => {
                let normal =
                    SkewNormal::new(self.latency.as_secs_f64(), std.as_secs_f64(), 20.).unwrap();
                let v: f64 = normal.sample(&mut rand::thread_rng()).max(0.);
                Duration::from_secs_f64(v)
            }
            None => self.latency,
        }
    }
}

impl Transport for MockTransport {
    async fn send(&self, _payload: Payload) -> Result<u16, TransportError> {
        let call = self.sent.fetch_add(1, Ordering::Relaxed);
        let delay = self.delay();
        tokio::time::sleep(delay).await;

        if self.unreachable {
            return Err(TransportError::Connect("connection refused".to_string()));
        }
        match self.fail_every {
            Some((n, status)) if call % n == n - 1 => Ok(status),
            _ => Ok(self.status),
        }
    }
}

/// Builds single-endpoint payloads carrying `events` events.
pub(crate) fn mock_builder(
    events: u64,
) -> impl Fn(WorkerContext) -> Result<Payload, BuildError> + Send + Sync + 'static {
    move |ctx: WorkerContext| {
        Ok(Payload {
            endpoint: Endpoint::Events,
            body: format!("{}:{}", ctx.worker_id, ctx.iteration).into_bytes(),
            events,
        })
    }
}
