//! In-process stand-in for the event ingestion service.
//!
//! `POST /events` takes one event, `POST /events/bulk` up to
//! [`MAX_BULK_EVENTS`]. Valid payloads are answered with `202 Accepted`.
//! Latency, random failures and a capacity limit are configurable.
use axum::{
    debug_handler,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use metrics::counter;
use rand::Rng;
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::num::NonZeroU32;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;
use tracing::{debug, info};

pub const MAX_BULK_EVENTS: usize = 1_000;

#[derive(Debug, Clone, Default)]
pub struct MockConfig {
    /// Mean time spent on each request before answering.
    pub latency: Duration,
    /// Standard deviation of the latency.
    pub jitter: Duration,
    /// Fraction of valid requests answered with `500`.
    pub failure_rate: f64,
    /// Requests per second served before answering `503`.
    pub capacity: Option<NonZeroU32>,
}

#[derive(Debug, Deserialize)]
pub struct EventRequest {
    pub event_name: Option<String>,
    pub channel: Option<String>,
    pub campaign_id: Option<String>,
    pub user_id: Option<String>,
    pub timestamp: Option<i64>,
    #[serde(default)]
    pub tags: Vec<String>,
    pub metadata: Option<serde_json::Map<String, serde_json::Value>>,
}

impl EventRequest {
    fn validate(&self) -> Result<(), &'static str> {
        if self.event_name.as_deref().map_or(true, |s| s.trim().is_empty()) {
            return Err("event_name is required");
        }
        if self.user_id.as_deref().map_or(true, |s| s.trim().is_empty()) {
            return Err("user_id is required");
        }
        match self.timestamp {
            None => Err("timestamp is required"),
            Some(ts) if ts <= 0 => Err("timestamp must be a positive Unix epoch value"),
            Some(_) => Ok(()),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct BulkEventRequest {
    pub events: Vec<EventRequest>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct EventResponse {
    pub status: String,
    pub accepted_count: usize,
    pub message: String,
}

/// Counters of what the service saw.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stats {
    pub requests: u64,
    pub accepted_requests: u64,
    pub accepted_events: u64,
    pub rejected: u64,
    pub throttled: u64,
    pub failed: u64,
}

pub struct AppState {
    config: MockConfig,
    limiter: Option<DefaultDirectRateLimiter>,
    requests: AtomicU64,
    accepted_requests: AtomicU64,
    accepted_events: AtomicU64,
    rejected: AtomicU64,
    throttled: AtomicU64,
    failed: AtomicU64,
}

impl AppState {
    pub fn new(config: MockConfig) -> Self {
        Self {
            limiter: config.capacity.map(rate_limiter),
            config,
            requests: AtomicU64::new(0),
            accepted_requests: AtomicU64::new(0),
            accepted_events: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
            throttled: AtomicU64::new(0),
            failed: AtomicU64::new(0),
        }
    }

    pub fn stats(&self) -> Stats {
        Stats {
            requests: self.requests.load(Ordering::Relaxed),
            accepted_requests: self.accepted_requests.load(Ordering::Relaxed),
            accepted_events: self.accepted_events.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            throttled: self.throttled.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }

    fn delay(&self) -> Duration {
        let mean = self.config.latency.as_secs_f64();
        let std = self.config.jitter.as_secs_f64();
        let secs = match Normal::new(mean, std) {
            Ok(normal) if std > 0. => normal.sample(&mut rand::thread_rng()).max(0.),
            _ => mean,
        };
        Duration::from_secs_f64(secs)
    }

    /// Shared admission path of both endpoints.
    async fn admit(&self, events: &[EventRequest]) -> Response {
        self.requests.fetch_add(1, Ordering::Relaxed);
        counter!("mock_service.requests").increment(1);

        if let Some(limiter) = &self.limiter {
            if limiter.check().is_err() {
                self.throttled.fetch_add(1, Ordering::Relaxed);
                return (StatusCode::SERVICE_UNAVAILABLE, "over capacity").into_response();
            }
        }

        tokio::time::sleep(self.delay()).await;

        if events.is_empty() {
            self.rejected.fetch_add(1, Ordering::Relaxed);
            return (StatusCode::BAD_REQUEST, "events list must not be empty").into_response();
        }
        if events.len() > MAX_BULK_EVENTS {
            self.rejected.fetch_add(1, Ordering::Relaxed);
            return (
                StatusCode::BAD_REQUEST,
                "Maximum 1000 events per bulk request",
            )
                .into_response();
        }
        if let Err(reason) = events.iter().try_for_each(EventRequest::validate) {
            debug!("Rejected payload: {reason}");
            self.rejected.fetch_add(1, Ordering::Relaxed);
            return (StatusCode::BAD_REQUEST, reason).into_response();
        }

        let failure_rate = self.config.failure_rate.min(1.);
        if failure_rate > 0. && rand::thread_rng().gen_bool(failure_rate) {
            self.failed.fetch_add(1, Ordering::Relaxed);
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }

        self.accepted_requests.fetch_add(1, Ordering::Relaxed);
        self.accepted_events
            .fetch_add(events.len() as u64, Ordering::Relaxed);
        counter!("mock_service.accepted_events").increment(events.len() as u64);

        let message = if events.len() == 1 {
            "Event queued for processing"
        } else {
            "Events queued for processing"
        };
        (
            StatusCode::ACCEPTED,
            Json(EventResponse {
                status: "accepted".to_string(),
                accepted_count: events.len(),
                message: message.to_string(),
            }),
        )
            .into_response()
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/events", post(ingest_event))
        .route("/events/bulk", post(ingest_bulk))
        .route("/stats", get(stats))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[debug_handler]
async fn ingest_event(
    State(state): State<Arc<AppState>>,
    Json(event): Json<EventRequest>,
) -> Response {
    state.admit(std::slice::from_ref(&event)).await
}

#[debug_handler]
async fn ingest_bulk(
    State(state): State<Arc<AppState>>,
    Json(bulk): Json<BulkEventRequest>,
) -> Response {
    state.admit(&bulk.events).await
}

#[debug_handler]
async fn stats(State(state): State<Arc<AppState>>) -> Json<Stats> {
    Json(state.stats())
}

/// A running service.
pub struct MockService {
    pub addr: SocketAddr,
    pub state: Arc<AppState>,
    task: JoinHandle<()>,
}

impl MockService {
    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn stats(&self) -> Stats {
        self.state.stats()
    }
}

impl Drop for MockService {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Binds `addr` (port 0 picks a free one) and serves in the background.
pub async fn spawn(addr: SocketAddr, config: MockConfig) -> anyhow::Result<MockService> {
    let listener = TcpListener::bind(addr).await?;
    let addr = listener.local_addr()?;
    let state = Arc::new(AppState::new(config));
    let app = router(state.clone());

    info!("Mock service listening on {addr}");
    let task = tokio::spawn(async move {
        if let Err(err) = axum::serve(listener, app).await {
            tracing::error!("Mock service stopped: {err}");
        }
    });

    Ok(MockService { addr, state, task })
}

/// Serves until the process is stopped.
pub async fn run(addr: SocketAddr, config: MockConfig) -> anyhow::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!("Mock service listening on {}", listener.local_addr()?);
    axum::serve(listener, router(Arc::new(AppState::new(config)))).await?;
    Ok(())
}

pub fn rate_limiter(per_second: NonZeroU32) -> DefaultDirectRateLimiter {
    RateLimiter::direct(Quota::per_second(per_second))
}
