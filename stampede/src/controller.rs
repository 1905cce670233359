//! The top-level run loop.
use crate::clock::RunClock;
use crate::collector::MetricsCollector;
use crate::evaluator::ThresholdEvaluator;
use crate::executor::{IterationSettings, PayloadBuilder};
use crate::pool::{SpawnError, WorkerPool};
use crate::report::RunResult;
use crate::scheduler::StageScheduler;
use crate::transport::Transport;
use stampede_core::{ConfigError, ScenarioConfig};
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
#[allow(unused_imports)]
use tracing::{debug, error, info, instrument, trace, warn};

#[derive(Debug, Error)]
pub enum RunError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Spawn(#[from] SpawnError),
}

/// Drives one run: ticks the scheduler, reconciles the pool, drains and
/// evaluates thresholds.
pub struct RunController<T, B> {
    config: ScenarioConfig,
    scheduler: StageScheduler,
    evaluator: ThresholdEvaluator,
    transport: Arc<T>,
    builder: Arc<B>,
    abort: CancellationToken,
}

impl<T: Transport, B: PayloadBuilder> RunController<T, B> {
    /// Validates the configuration; no traffic is generated for an invalid one.
    pub fn new(config: ScenarioConfig, transport: T, builder: B) -> Result<Self, ConfigError> {
        config.validate()?;
        let scheduler = StageScheduler::new(&config)?;
        let evaluator = ThresholdEvaluator::new(config.thresholds.clone())?;

        Ok(Self {
            config,
            scheduler,
            evaluator,
            transport: Arc::new(transport),
            builder: Arc::new(builder),
            abort: CancellationToken::new(),
        })
    }

    /// Uses `abort` instead of a fresh token to stop the run early.
    pub fn with_abort(mut self, abort: CancellationToken) -> Self {
        self.abort = abort;
        self
    }

    /// Cancelling the returned token ends the run at the next tick. An aborted
    /// run still drains and is evaluated.
    pub fn abort_handle(&self) -> CancellationToken {
        self.abort.clone()
    }

    pub fn config(&self) -> &ScenarioConfig {
        &self.config
    }

    #[instrument(name = "scenario", skip_all, fields(name = %self.config.name))]
    pub async fn run(self) -> Result<RunResult, RunError> {
        info!("Running {} with config {:?}", self.config.name, &self.config);

        let metrics = Arc::new(MetricsCollector::new());
        let mut pool = WorkerPool::new(
            self.transport.clone(),
            self.builder.clone(),
            metrics.clone(),
            IterationSettings {
                pacing: self.config.pacing,
                request_timeout: self.config.request_timeout,
                expected_status: self.config.expected_status,
            },
            self.scheduler.graceful_ramp_down(),
        );

        let total = self.scheduler.total_duration();
        let mut clock = RunClock::start(self.config.tick_interval).await;
        debug!("Ticking every {clock} for {}", humantime::format_duration(total));

        let mut stage = None;
        let mut ramping_down = false;
        // NOTE: This loop is time-sensitive; nothing in it may block.
        let outcome = loop {
            let elapsed = clock.elapsed();
            if elapsed >= total {
                break Ok(());
            }
            if self.abort.is_cancelled() {
                warn!("Run aborted after {:?}", elapsed);
                break Ok(());
            }

            let current = self.scheduler.stage_index(elapsed);
            if current != stage {
                if let Some(index) = current {
                    info!("Entering stage {index} at {:?}", elapsed);
                }
                stage = current;
            }

            if self.scheduler.is_ramp_down_window(elapsed) {
                if !ramping_down {
                    info!("Ramp-down window reached; no new iterations are admitted");
                    pool.stop_admitting();
                    ramping_down = true;
                }
                pool.reap();
            } else {
                let target = self.scheduler.concurrency_at(elapsed);
                if let Err(err) = pool.reconcile(target) {
                    error!("Stopping run: {err}");
                    break Err(err);
                }
                trace!("{} active, {} retiring", pool.active(), pool.retiring());
            }

            metrics.flush();

            tokio::select! {
                _ = clock.tick() => {}
                _ = self.abort.cancelled() => {}
            }
        };

        let drain = pool.drain_and_stop(self.scheduler.graceful_stop()).await;
        if drain.aborted > 0 {
            warn!("{} workers were aborted mid-iteration", drain.aborted);
        }
        outcome?;

        let snapshot = metrics.snapshot(clock.elapsed());
        let result = self
            .evaluator
            .evaluate(snapshot)?
            .with_workers(pool.peak(), drain);

        info!(
            "Scenario complete: {} requests, thresholds {}",
            metrics.total_requests(),
            if result.overall_pass { "passed" } else { "failed" }
        );
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::DrainReport;
    use crate::testing::{mock_builder, MockTransport};
    use stampede_core::{Pacing, Stage, Threshold, HTTP_REQS, HTTP_REQ_FAILED};
    use std::time::Duration;

    fn config(stages: &[(u64, u32)]) -> ScenarioConfig {
        let mut config = ScenarioConfig::new("controller");
        config.stages = stages
            .iter()
            .map(|&(d, t)| Stage::new(Duration::from_secs(d), t))
            .collect();
        config.pacing = Pacing::Fixed(Duration::from_secs(1));
        config
    }

    // Worker k is spawned once the 0 -> 10 ramp rounds to k, at roughly
    // (k - 0.5) / 2 seconds, and iterates every ~1.01s until the ramp-down
    // window opens at 15s: between 11 and 15 iterations each, ~130 in total.
    #[tracing_test::traced_test]
    #[tokio::test(start_paused = true)]
    async fn ramping_run() {
        let mut config = config(&[(5, 10), (10, 10), (5, 0)]);
        config.thresholds = vec![
            "failureRate < 0.01".parse().unwrap(),
            "p95 < 50ms".parse().unwrap(),
        ];

        let controller = RunController::new(
            config,
            MockTransport::new(Duration::from_millis(10)),
            mock_builder(1),
        )
        .unwrap();
        let result = controller.run().await.unwrap();

        let reqs = result.snapshot.counter(HTTP_REQS).unwrap().total;
        assert!((115..=145).contains(&reqs), "{reqs} requests");
        assert_eq!(result.snapshot.rate(HTTP_REQ_FAILED).unwrap().hits, 0);
        assert_eq!(result.peak_workers, 10);
        assert_eq!(result.drain, DrainReport::default());
        assert!(result.snapshot.elapsed >= Duration::from_secs(20));
        assert!(result.overall_pass);
        assert!(logs_contain("Ramp-down window reached"));
    }

    #[tracing_test::traced_test]
    #[tokio::test(start_paused = true)]
    async fn failing_threshold() {
        let mut config = config(&[(2, 4), (4, 4)]);
        config.thresholds = vec![Threshold::new(HTTP_REQ_FAILED, "rate<0.01").unwrap()];

        let transport = MockTransport::new(Duration::from_millis(10)).failing_every(4, 500);
        let result = RunController::new(config, transport, mock_builder(1))
            .unwrap()
            .run()
            .await
            .unwrap();

        let failed = result.snapshot.rate(HTTP_REQ_FAILED).unwrap();
        assert!(failed.hits > 0 && failed.hits <= failed.total);
        assert!(!result.overall_pass);
        assert_eq!(result.exit_status(), 99);
    }

    #[tracing_test::traced_test]
    #[tokio::test(start_paused = true)]
    async fn abort_stops_early() {
        // Five workers from the first tick, so there is traffic before the abort.
        let mut config = config(&[(60, 5)]);
        config.start_workers = 5;
        let controller = RunController::new(
            config,
            MockTransport::new(Duration::from_millis(10)),
            mock_builder(1),
        )
        .unwrap();
        let abort = controller.abort_handle();
        let run = tokio::spawn(controller.run());

        tokio::time::sleep(Duration::from_secs(3)).await;
        abort.cancel();
        let result = run.await.unwrap().unwrap();

        assert!(result.snapshot.elapsed < Duration::from_secs(4));
        // Three iterations per worker at 1s pacing, give or take one.
        let reqs = result.snapshot.counter(HTTP_REQS).unwrap().total;
        assert!((10..=20).contains(&reqs), "{reqs} requests");
        assert_eq!(result.peak_workers, 5);
        assert!(result.overall_pass);
        assert!(logs_contain("Run aborted"));
    }

    #[test]
    fn rejects_invalid_config_before_running() {
        let err = RunController::new(
            config(&[]),
            MockTransport::new(Duration::ZERO),
            mock_builder(1),
        )
        .err()
        .unwrap();
        assert_eq!(err, ConfigError::EmptyStages("controller".to_string()));

        let mut bad_threshold = config(&[(1, 1)]);
        bad_threshold.thresholds = vec![Threshold::new("nope", "count<1").unwrap()];
        assert!(RunController::new(
            bad_threshold,
            MockTransport::new(Duration::ZERO),
            mock_builder(1)
        )
        .is_err());
    }
}
