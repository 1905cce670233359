//! Default payload builders for the event ingestion endpoints.
use crate::executor::{BuildError, PayloadBuilder, WorkerContext};
use crate::transport::{Endpoint, Payload};
use rand::Rng;
use serde::Serialize;
use stampede_core::{Mode, ScenarioConfig, BASE_TIMESTAMP};

const EVENT_NAME: &str = "product_view";
const CHANNEL: &str = "web";
const SOURCE: &str = "stampede";
const TIMESTAMP_SPREAD_SECS: i64 = 86_400;

#[derive(Serialize)]
struct Event<'a> {
    event_name: &'a str,
    channel: &'a str,
    campaign_id: &'a str,
    user_id: String,
    timestamp: i64,
    #[serde(skip_serializing_if = "<[_]>::is_empty")]
    tags: &'a [String],
    #[serde(skip_serializing_if = "Option::is_none")]
    metadata: Option<Metadata>,
}

#[derive(Serialize)]
struct Metadata {
    source: &'static str,
    iteration: u64,
}

#[derive(Serialize)]
struct Bulk<'a> {
    events: Vec<Event<'a>>,
}

/// Builds `product_view` events with a per-iteration user id and a random
/// timestamp within one day of [`BASE_TIMESTAMP`].
#[derive(Debug, Clone)]
pub struct EventPayloadBuilder {
    mode: Mode,
    events_per_request: u32,
    campaign_id: String,
    tags: Vec<String>,
}

impl EventPayloadBuilder {
    /// One event per `POST /events`, tagged and carrying the iteration in its metadata.
    pub fn single(campaign_id: &str, tags: Vec<String>) -> Self {
        Self {
            mode: Mode::Single,
            events_per_request: 1,
            campaign_id: campaign_id.to_string(),
            tags,
        }
    }

    /// `events_per_request` events per `POST /events/bulk`.
    pub fn bulk(campaign_id: &str, events_per_request: u32) -> Self {
        Self {
            mode: Mode::Bulk,
            events_per_request,
            campaign_id: campaign_id.to_string(),
            tags: vec![],
        }
    }

    pub fn from_config(config: &ScenarioConfig) -> Self {
        match config.mode {
            Mode::Single => Self::single(&config.campaign_id, config.tags.clone()),
            Mode::Bulk => Self::bulk(&config.campaign_id, config.events_per_request),
        }
    }

    fn event(&self, user_id: String, metadata: Option<Metadata>, rng: &mut impl Rng) -> Event<'_> {
        Event {
            event_name: EVENT_NAME,
            channel: CHANNEL,
            campaign_id: &self.campaign_id,
            user_id,
            timestamp: BASE_TIMESTAMP + rng.gen_range(0..TIMESTAMP_SPREAD_SECS),
            tags: &self.tags,
            metadata,
        }
    }
}

impl PayloadBuilder for EventPayloadBuilder {
    fn build(&self, ctx: WorkerContext) -> Result<Payload, BuildError> {
        let mut rng = rand::thread_rng();
        let WorkerContext {
            worker_id,
            iteration,
        } = ctx;

        match self.mode {
            Mode::Single => {
                let event = self.event(
                    format!("user_{worker_id}_{iteration}"),
                    Some(Metadata {
                        source: SOURCE,
                        iteration,
                    }),
                    &mut rng,
                );
                Ok(Payload {
                    endpoint: Endpoint::Events,
                    body: serde_json::to_vec(&event)?,
                    events: 1,
                })
            }
            Mode::Bulk => {
                if self.events_per_request == 0 {
                    return Err(BuildError::new("bulk request without events"));
                }
                let events = (0..self.events_per_request)
                    .map(|i| {
                        let user_id = format!("user_{worker_id}_{iteration}_{i}");
                        self.event(user_id, None, &mut rng)
                    })
                    .collect();
                Ok(Payload {
                    endpoint: Endpoint::EventsBulk,
                    body: serde_json::to_vec(&Bulk { events })?,
                    events: u64::from(self.events_per_request),
                })
            }
        }
    }
}
