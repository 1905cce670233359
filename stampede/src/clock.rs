//! Monotonic run time, sampled at the controller's tick interval.
use std::fmt;
use std::time::Duration;
use tokio::time::{interval, Instant, Interval, MissedTickBehavior};

pub(crate) struct RunClock {
    start: Instant,
    ticks: Interval,
    period: Duration,
}

impl RunClock {
    /// Starts the run at the clock's first (immediate) tick.
    pub async fn start(period: Duration) -> Self {
        let mut ticks = interval(period);
        // A slow tick pushes the schedule back rather than bursting to catch up.
        ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let start = ticks.tick().await;
        Self {
            start,
            ticks,
            period,
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Waits for the next tick and returns the run time it was scheduled at.
    pub async fn tick(&mut self) -> Duration {
        self.ticks.tick().await.duration_since(self.start)
    }
}

impl fmt::Display for RunClock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", humantime::format_duration(self.period))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn ticks_on_run_time() {
        let mut clock = RunClock::start(Duration::from_millis(100)).await;
        assert_eq!(clock.to_string(), "100ms");
        assert_eq!(clock.elapsed(), Duration::ZERO);

        assert_eq!(clock.tick().await, Duration::from_millis(100));
        assert_eq!(clock.tick().await, Duration::from_millis(200));

        // A stalled controller resumes one period after it next polls.
        tokio::time::sleep(Duration::from_millis(250)).await;
        clock.tick().await;
        assert_eq!(clock.elapsed(), Duration::from_millis(450));
        assert_eq!(clock.tick().await, Duration::from_millis(550));
    }
}
