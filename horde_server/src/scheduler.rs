//! Fixed-rate tick scheduler.
//!
//! The scheduler only does time bookkeeping. Each wake-up it reports how
//! many simulation steps are due before the next outbound flush:
//! - on time: one step
//! - behind: up to `max_catch_up_ticks` steps, the rest carried forward
//! - more than `max_backlog_ticks` behind: the excess is discarded and
//!   reported so it can be logged

use std::time::Duration;

use tokio::time::Instant;
use tracing::warn;

/// What to do on one wake-up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TickPlan {
    /// Simulation steps to run before flushing.
    pub steps: u32,
    /// Steps discarded because the backlog was too large.
    pub dropped: u32,
}

#[derive(Debug)]
pub struct TickScheduler {
    interval: Duration,
    max_catch_up: u32,
    max_backlog: u32,
    next_deadline: Instant,
    total_steps: u64,
    total_dropped: u64,
}

impl TickScheduler {
    pub fn new(interval: Duration, max_catch_up: u32, max_backlog: u32, start: Instant) -> Self {
        Self {
            interval,
            max_catch_up: max_catch_up.max(1),
            max_backlog: max_backlog.max(max_catch_up.max(1)),
            next_deadline: start + interval,
            total_steps: 0,
            total_dropped: 0,
        }
    }

    /// When the next step is due.
    pub fn next_deadline(&self) -> Instant {
        self.next_deadline
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Works out the steps due at `now` and advances the deadline past them.
    pub fn plan(&mut self, now: Instant) -> TickPlan {
        if now < self.next_deadline {
            return TickPlan::default();
        }
        let behind = now.duration_since(self.next_deadline);
        let due = 1 + (behind.as_nanos() / self.interval.as_nanos().max(1)) as u64;
        let due = u32::try_from(due).unwrap_or(u32::MAX);

        let mut plan = TickPlan {
            steps: due.min(self.max_catch_up),
            dropped: 0,
        };
        if due > self.max_backlog {
            plan.dropped = due - plan.steps;
            warn!(
                dropped = plan.dropped,
                backlog = due,
                "tick backlog too large, discarding steps"
            );
            self.next_deadline += self.interval * due;
        } else {
            self.next_deadline += self.interval * plan.steps;
        }
        self.total_steps += u64::from(plan.steps);
        self.total_dropped += u64::from(plan.dropped);
        plan
    }

    pub fn total_steps(&self) -> u64 {
        self.total_steps
    }

    pub fn total_dropped(&self) -> u64 {
        self.total_dropped
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MS50: Duration = Duration::from_millis(50);

    #[test]
    fn on_time_is_one_step() {
        let t0 = Instant::now();
        let mut s = TickScheduler::new(MS50, 5, 40, t0);
        assert_eq!(s.plan(t0).steps, 0);
        assert_eq!(s.plan(t0 + MS50).steps, 1);
        assert_eq!(s.next_deadline(), t0 + MS50 * 2);
    }

    #[test]
    fn catch_up_is_bounded_and_carried() {
        let t0 = Instant::now();
        let mut s = TickScheduler::new(MS50, 5, 40, t0);
        // Eight steps due.
        let now = t0 + MS50 * 8;
        let first = s.plan(now);
        assert_eq!(first, TickPlan { steps: 5, dropped: 0 });
        let second = s.plan(now);
        assert_eq!(second, TickPlan { steps: 3, dropped: 0 });
        assert_eq!(s.plan(now).steps, 0);
        assert_eq!(s.total_steps(), 8);
    }

    #[test]
    fn oversized_backlog_is_dropped_and_counted() {
        let t0 = Instant::now();
        let mut s = TickScheduler::new(MS50, 5, 40, t0);
        let now = t0 + MS50 * 100;
        let plan = s.plan(now);
        assert_eq!(plan, TickPlan { steps: 5, dropped: 95 });
        assert_eq!(s.total_dropped(), 95);
        assert!(s.next_deadline() > now);
    }
}
