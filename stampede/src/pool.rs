//! The live worker population.
use crate::collector::MetricsCollector;
use crate::executor::{IterationSettings, PayloadBuilder, RequestExecutor};
use crate::transport::Transport;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

#[derive(Debug, Error)]
#[error("unable to spawn workers: {0}")]
pub struct SpawnError(String);

/// How the pool's workers ended once the run was over.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    /// Workers that finished their last iteration on their own.
    pub finished: usize,
    /// Workers cut off mid-iteration by the final drain timeout. Their last
    /// iteration is never reported.
    pub aborted: usize,
    /// Retired workers cut off earlier, past the ramp-down grace period.
    pub ramp_down_aborted: usize,
}

struct Worker {
    id: u64,
    retire: CancellationToken,
    task: JoinHandle<u64>,
}

/// Grows and shrinks the set of executors to match the scheduler's target.
///
/// Shrinking retires workers gracefully: they finish their in-flight
/// iteration and exit. A retired worker still running after
/// `graceful_ramp_down` is aborted.
pub(crate) struct WorkerPool<T, B> {
    transport: Arc<T>,
    builder: Arc<B>,
    metrics: Arc<MetricsCollector>,
    settings: IterationSettings,
    graceful_ramp_down: Duration,
    admission: CancellationToken,
    active: Vec<Worker>,
    retiring: Vec<(Worker, Instant)>,
    aborting: Vec<Worker>,
    next_id: u64,
    peak: usize,
    ramp_down_aborted: usize,
}

impl<T: Transport, B: PayloadBuilder> WorkerPool<T, B> {
    pub fn new(
        transport: Arc<T>,
        builder: Arc<B>,
        metrics: Arc<MetricsCollector>,
        settings: IterationSettings,
        graceful_ramp_down: Duration,
    ) -> Self {
        Self {
            transport,
            builder,
            metrics,
            settings,
            graceful_ramp_down,
            admission: CancellationToken::new(),
            active: vec![],
            retiring: vec![],
            aborting: vec![],
            next_id: 0,
            peak: 0,
            ramp_down_aborted: 0,
        }
    }

    /// Spawns or retires workers until exactly `target` are active.
    ///
    /// Idempotent for a repeated target. A no-op once admission stopped.
    pub fn reconcile(&mut self, target: u32) -> Result<(), SpawnError> {
        self.reap();
        if self.admission.is_cancelled() {
            return Ok(());
        }

        let target = target as usize;
        if self.active.len() < target {
            let handle = Handle::try_current().map_err(|e| SpawnError(e.to_string()))?;
            while self.active.len() < target {
                self.spawn(&handle);
            }
        } else if self.active.len() > target {
            let deadline = Instant::now() + self.graceful_ramp_down;
            for worker in self.active.drain(target..) {
                worker.retire.cancel();
                self.retiring.push((worker, deadline));
            }
        }

        self.peak = self.peak.max(self.active.len());
        #[cfg(feature = "metrics")]
        metrics::gauge!("vus").set(self.active.len() as f64);
        Ok(())
    }

    fn spawn(&mut self, handle: &Handle) {
        let id = self.next_id;
        self.next_id += 1;

        let retire = self.admission.child_token();
        let executor = RequestExecutor::new(
            id,
            self.transport.clone(),
            self.builder.clone(),
            self.metrics.clone(),
            self.settings,
            retire.clone(),
        );
        let task = handle.spawn(executor.run());
        self.active.push(Worker { id, retire, task });
    }

    /// Retires every worker; no further iterations start.
    pub fn stop_admitting(&mut self) {
        if self.admission.is_cancelled() {
            return;
        }
        self.admission.cancel();
        let deadline = Instant::now() + self.graceful_ramp_down;
        let retired = self.active.len();
        self.retiring
            .extend(self.active.drain(..).map(|worker| (worker, deadline)));
        debug!("Stopped admitting iterations; retired {retired} workers");
    }

    /// Forgets finished workers and aborts retired ones past their deadline.
    pub fn reap(&mut self) {
        self.active.retain(|worker| {
            let finished = worker.task.is_finished();
            if finished {
                warn!("Worker {} exited while active", worker.id);
            }
            !finished
        });

        let now = Instant::now();
        let mut still_retiring = Vec::with_capacity(self.retiring.len());
        for (worker, deadline) in self.retiring.drain(..) {
            if worker.task.is_finished() {
                continue;
            }
            if now >= deadline {
                debug!("Worker {} overran the ramp-down grace period", worker.id);
                worker.task.abort();
                self.ramp_down_aborted += 1;
                self.aborting.push(worker);
            } else {
                still_retiring.push((worker, deadline));
            }
        }
        self.retiring = still_retiring;
        self.aborting.retain(|worker| !worker.task.is_finished());
    }

    /// Stops admission and waits up to `timeout` for every worker to finish its
    /// in-flight iteration. Workers still running afterwards are aborted.
    ///
    /// Once this returns no worker reports into the collector anymore.
    pub async fn drain_and_stop(&mut self, timeout: Duration) -> DrainReport {
        self.stop_admitting();
        let deadline = Instant::now() + timeout;
        let mut report = DrainReport {
            ramp_down_aborted: self.ramp_down_aborted,
            ..DrainReport::default()
        };

        for (mut worker, _) in self.retiring.drain(..) {
            match tokio::time::timeout_at(deadline, &mut worker.task).await {
                Ok(Ok(_)) => report.finished += 1,
                Ok(Err(err)) => {
                    if err.is_panic() {
                        error!("Worker {} panicked: {err}", worker.id);
                    }
                    report.finished += 1;
                }
                Err(_) => {
                    worker.task.abort();
                    let _ = worker.task.await;
                    report.aborted += 1;
                }
            }
        }
        for worker in self.aborting.drain(..) {
            let _ = worker.task.await;
        }

        #[cfg(feature = "metrics")]
        metrics::gauge!("vus").set(0.);
        report
    }

    pub fn active(&self) -> usize {
        self.active.len()
    }

    pub fn retiring(&self) -> usize {
        self.retiring.len()
    }

    /// Highest number of simultaneously active workers so far.
    pub fn peak(&self) -> usize {
        self.peak
    }

    #[cfg(test)]
    fn spawned(&self) -> u64 {
        self.next_id
    }
}
