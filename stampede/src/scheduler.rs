//! Stage schedule: what the worker population should be at any point of a run.
use stampede_core::{ConfigError, Rounding, ScenarioConfig};
use std::time::Duration;

#[derive(Debug, Clone, Copy)]
struct StageBounds {
    start: Duration,
    end: Duration,
    from: u32,
    to: u32,
}

/// Computes the target number of workers from elapsed run time.
///
/// Each stage ramps linearly from the previous stage's target (the first one
/// from `start_workers`) to its own target. The scheduler is pure: it holds no
/// clock and is driven with monotonic elapsed time by the controller.
#[derive(Debug, Clone)]
pub struct StageScheduler {
    stages: Vec<StageBounds>,
    total: Duration,
    ramp_down_start: Duration,
    rounding: Rounding,
    graceful_ramp_down: Duration,
    graceful_stop: Duration,
}

impl StageScheduler {
    pub fn new(config: &ScenarioConfig) -> Result<Self, ConfigError> {
        if config.stages.is_empty() {
            return Err(ConfigError::EmptyStages(config.name.clone()));
        }

        let mut stages = Vec::with_capacity(config.stages.len());
        let mut start = Duration::ZERO;
        let mut from = config.start_workers;
        for (index, stage) in config.stages.iter().enumerate() {
            if stage.duration.is_zero() {
                return Err(ConfigError::ZeroDuration { index });
            }
            let end = start + stage.duration;
            stages.push(StageBounds {
                start,
                end,
                from,
                to: stage.target,
            });
            start = end;
            from = stage.target;
        }
        let total = start;

        // The trailing ramp to zero starts where the last non-zero target ends.
        let last_non_zero_end = stages
            .iter()
            .rev()
            .find(|s| s.to > 0)
            .map_or(Duration::ZERO, |s| s.end);
        let ramp_down_start = if last_non_zero_end == total {
            total
        } else {
            last_non_zero_end.max(total.saturating_sub(config.graceful_ramp_down))
        };

        Ok(Self {
            stages,
            total,
            ramp_down_start,
            rounding: config.rounding,
            graceful_ramp_down: config.graceful_ramp_down,
            graceful_stop: config.graceful_stop,
        })
    }

    /// Target concurrency at `elapsed`.
    ///
    /// Matches a stage's starting target at its start and its own target at its
    /// end. Past the end of the schedule the target is 0.
    pub fn concurrency_at(&self, elapsed: Duration) -> u32 {
        if elapsed > self.total {
            return 0;
        }
        if elapsed == self.total {
            return self.stages.last().map_or(0, |s| s.to);
        }

        let Some(stage) = self.stage_index(elapsed).and_then(|i| self.stages.get(i)) else {
            return 0;
        };

        let progress =
            (elapsed - stage.start).as_secs_f64() / (stage.end - stage.start).as_secs_f64();
        let from = f64::from(stage.from);
        let to = f64::from(stage.to);
        self.rounding.apply(from + (to - from) * progress)
    }

    /// True while the schedule ramps down to zero for the last time, bounded to
    /// the final `graceful_ramp_down` of the run. No new iterations are admitted
    /// during this window; in-flight ones may finish.
    pub fn is_ramp_down_window(&self, elapsed: Duration) -> bool {
        elapsed >= self.ramp_down_start && elapsed < self.total
    }

    /// Index of the stage containing `elapsed`, `None` once the schedule is over.
    pub fn stage_index(&self, elapsed: Duration) -> Option<usize> {
        let index = self.stages.partition_point(|s| s.end <= elapsed);
        (index < self.stages.len()).then_some(index)
    }

    pub fn total_duration(&self) -> Duration {
        self.total
    }

    pub fn graceful_ramp_down(&self) -> Duration {
        self.graceful_ramp_down
    }

    pub fn graceful_stop(&self) -> Duration {
        self.graceful_stop
    }
}
