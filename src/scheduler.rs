// ABOUTME: Periodic preview-tick scheduler, polled by the caller rather than owning a timer
// ABOUTME: fires only while the filter is Active; missed ticks never accumulate

use std::time::{Duration, Instant};
use tracing::debug;

/// Configuration for the preview scheduler.
#[derive(Debug, Clone, Copy)]
pub struct SchedulerConfig {
    period: Duration,
    enabled: bool,
}

impl SchedulerConfig {
    /// `fps` of zero is treated as the default of 10, per the tunable's
    /// documented behavior.
    pub fn from_fps(fps: u32) -> Self {
        let fps = if fps == 0 { 10 } else { fps };
        SchedulerConfig {
            period: Duration::from_secs_f64(1.0 / fps as f64),
            enabled: true,
        }
    }

    pub fn disabled() -> Self {
        SchedulerConfig {
            period: Duration::from_secs(1),
            enabled: false,
        }
    }

    pub fn period(&self) -> Duration {
        self.period
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self::from_fps(10)
    }
}

/// Tracks the next preview-tick deadline. The caller polls [`Scheduler::due`]
/// from its own event loop / timer callback rather than the scheduler
/// owning a thread — the same shape as a keep-alive manager that is
/// asked "should I ping yet?" on every pass.
#[derive(Debug)]
pub struct Scheduler {
    config: SchedulerConfig,
    next_deadline: Option<Instant>,
    armed: bool,
    total_ticks: u64,
}

impl Scheduler {
    pub fn new(config: SchedulerConfig) -> Self {
        Scheduler {
            config,
            next_deadline: None,
            armed: false,
            total_ticks: 0,
        }
    }

    /// Called whenever the filter state changes; the scheduler only runs
    /// while the filter reports `Active`.
    pub fn on_state_armed(&mut self, armed: bool, now: Instant) {
        self.armed = armed && self.config.enabled;
        if self.armed && self.next_deadline.is_none() {
            self.next_deadline = Some(now + self.config.period);
        }
        if !self.armed {
            self.next_deadline = None;
        }
    }

    /// Whether a preview tick is owed right now.
    pub fn due(&self, now: Instant) -> bool {
        self.armed && self.next_deadline.is_some_and(|deadline| now >= deadline)
    }

    /// Record that a tick fired, advancing the deadline. Missed ticks do
    /// not accumulate: the next deadline is `previous + period`, clamped
    /// forward to `now + period` if that has already passed.
    pub fn mark_fired(&mut self, now: Instant) {
        let previous = self.next_deadline.unwrap_or(now);
        let mut next = previous + self.config.period;
        if next <= now {
            next = now + self.config.period;
        }
        self.next_deadline = Some(next);
        self.total_ticks += 1;
        debug!(total_ticks = self.total_ticks, "preview tick fired");
    }

    pub fn total_ticks(&self) -> u64 {
        self.total_ticks
    }

    pub fn is_armed(&self) -> bool {
        self.armed
    }
}
