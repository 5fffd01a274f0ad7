//! Rate instrumentation for the debug logs

use std::time::{Duration, Instant};

/// Counts events and reports the achieved rate once per window
pub struct RateMeter {
    window: Duration,
    started: Instant,
    count: u64,
}

impl RateMeter {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            started: Instant::now(),
            count: 0,
        }
    }

    /// Count one event. Returns the rate over the window once it has elapsed.
    pub fn tick(&mut self) -> Option<f64> {
        self.tick_at(Instant::now())
    }

    pub fn tick_at(&mut self, now: Instant) -> Option<f64> {
        self.count += 1;
        let elapsed = now.saturating_duration_since(self.started);
        if elapsed < self.window {
            return None;
        }
        let rate = self.count as f64 / elapsed.as_secs_f64();
        self.count = 0;
        self.started = now;
        Some(rate)
    }
}

/// Rate-limits a periodic action, e.g. a log line
pub struct Every {
    period: Duration,
    last: Option<Instant>,
}

impl Every {
    pub fn new(period: Duration) -> Self {
        Self { period, last: None }
    }

    pub fn ready(&mut self) -> bool {
        self.ready_at(Instant::now())
    }

    pub fn ready_at(&mut self, now: Instant) -> bool {
        match self.last {
            Some(last) if now.saturating_duration_since(last) < self.period => false,
            _ => {
                self.last = Some(now);
                true
            }
        }
    }
}

/// `1 / processing time`, the rate the producer could sustain on its own
pub fn theoretical_max_fps(processing: Duration) -> f64 {
    let secs = processing.as_secs_f64();
    if secs <= 0.0 {
        f64::INFINITY
    } else {
        1.0 / secs
    }
}
