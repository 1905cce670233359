#![cfg_attr(docsrs, feature(doc_cfg))]
#![doc = include_str!("../README.md")]

pub mod collector;
pub mod controller;
pub mod evaluator;
pub mod events;
pub mod executor;
pub mod report;
pub mod scenario;
pub mod scheduler;
pub mod transport;

pub(crate) mod clock;
pub(crate) mod pool;

#[cfg(test)]
pub(crate) mod testing;

pub use collector::MetricsCollector;
pub use controller::{RunController, RunError};
pub use evaluator::{ThresholdEvaluator, ThresholdResult};
pub use events::EventPayloadBuilder;
pub use executor::{BuildError, PayloadBuilder, WorkerContext};
pub use pool::{DrainReport, SpawnError};
pub use report::{MetricSummary, RunResult, Summary, ThresholdSummary};
pub use scenario::Scenario;
pub use scheduler::StageScheduler;
pub use transport::{Endpoint, HttpTransport, Payload, Transport, TransportError};

pub mod prelude {
    pub use crate::{
        EventPayloadBuilder, HttpTransport, Payload, PayloadBuilder, RunResult, Scenario,
        Transport, WorkerContext,
    };
    pub use stampede_core::{Mode, Pacing, Rounding, ScenarioConfig, Stage, Threshold};
}
