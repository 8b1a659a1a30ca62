use std::time::Duration;

use tokio::sync::watch;
use tokio::time::{Interval, MissedTickBehavior};

/// Fixed-period tick source whose period can be changed while running.
///
/// Ticks that fall due while a previous tick is still being processed are
/// skipped, never queued.
pub struct TickScheduler {
    interval: Interval,
    period: Duration,
    period_rx: watch::Receiver<Duration>,
}

/// Sender side used by the admin API to change the tick period.
pub type IntervalHandle = watch::Sender<Duration>;

fn build_interval(period: Duration) -> Interval {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    interval
}

impl TickScheduler {
    pub fn new(period: Duration) -> (Self, IntervalHandle) {
        let (tx, rx) = watch::channel(period);
        let scheduler = Self {
            interval: build_interval(period),
            period,
            period_rx: rx,
        };
        (scheduler, tx)
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Wait for the next tick. The first call returns immediately.
    ///
    /// A period change restarts the timer with the new period and fires at
    /// once.
    pub async fn wait_for_next(&mut self) {
        loop {
            tokio::select! {
                _ = self.interval.tick() => return,
                changed = self.period_rx.changed() => {
                    if changed.is_err() {
                        // Sender gone: keep ticking at the current period.
                        self.interval.tick().await;
                        return;
                    }
                    let period = *self.period_rx.borrow_and_update();
                    if period.is_zero() || period == self.period {
                        continue;
                    }
                    tracing::info!(period_ms = period.as_millis() as u64, "tick interval changed");
                    self.period = period;
                    self.interval = build_interval(period);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::Instant;

    #[tokio::test(start_paused = true)]
    async fn ticks_at_period() {
        let (mut scheduler, _handle) = TickScheduler::new(Duration::from_secs(1));
        let start = Instant::now();
        scheduler.wait_for_next().await;
        scheduler.wait_for_next().await;
        scheduler.wait_for_next().await;
        assert_eq!(start.elapsed(), Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn slow_tick_skips_missed_firings() {
        let (mut scheduler, _handle) = TickScheduler::new(Duration::from_secs(1));
        scheduler.wait_for_next().await;
        let start = Instant::now();
        tokio::time::sleep(Duration::from_millis(3500)).await;
        scheduler.wait_for_next().await;
        scheduler.wait_for_next().await;
        // One late firing, then back on the 1s grid rather than a burst.
        assert_eq!(start.elapsed(), Duration::from_secs(4));
    }

    #[tokio::test(start_paused = true)]
    async fn period_change_applies() {
        let (mut scheduler, handle) = TickScheduler::new(Duration::from_secs(10));
        scheduler.wait_for_next().await;
        handle.send(Duration::from_secs(2)).unwrap();
        let start = Instant::now();
        scheduler.wait_for_next().await;
        scheduler.wait_for_next().await;
        assert_eq!(scheduler.period(), Duration::from_secs(2));
        assert_eq!(start.elapsed(), Duration::from_secs(2));
    }
}
