//! Fixed-window request counters.
//!
//! Each resource owns one window: a start timestamp and the number of requests
//! admitted since then. When a request arrives at least one window length after
//! the start, the window restarts at that request's timestamp. Traffic can
//! therefore reach twice the threshold across a window boundary; steady-state
//! throughput never exceeds the threshold per window.

use dashmap::DashMap;
use parking_lot::Mutex;
use std::time::Duration;
use tracing::debug;

/// Counter state for a single resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowState {
    /// When the current window started, in milliseconds
    pub window_start_ms: i64,
    /// Requests admitted in the current window
    pub count: u64,
}

impl WindowState {
    fn new(now: i64) -> Self {
        Self {
            window_start_ms: now,
            count: 0,
        }
    }

    /// Restart the window if `now` is at least one window past its start.
    ///
    /// A `now` earlier than the window start counts as inside the window.
    fn roll(&mut self, now: i64, window_size_ms: u64) {
        let elapsed = now.saturating_sub(self.window_start_ms);
        if elapsed >= 0 && elapsed as u64 >= window_size_ms {
            self.window_start_ms = now;
            self.count = 0;
        }
    }

    fn until_reset(&self, now: i64, window_size_ms: u64) -> Duration {
        let window_end = self.window_start_ms as i128 + window_size_ms as i128;
        let wait = (window_end - now as i128).clamp(0, u64::MAX as i128);
        Duration::from_millis(wait as u64)
    }
}

/// The result of a counting attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CounterOutcome {
    /// The request was counted.
    Admitted {
        /// Quota left in the current window
        remaining: u64,
    },
    /// The window is full.
    Rejected {
        /// Time until the current window elapses
        retry_after: Duration,
    },
}

impl CounterOutcome {
    /// Whether the request was counted.
    pub fn is_admitted(&self) -> bool {
        matches!(self, CounterOutcome::Admitted { .. })
    }
}

/// Per-resource fixed-window counters.
///
/// Windows are created lazily on the first request for a resource and live
/// for as long as the counter does. Each window sits behind its own lock, so
/// unrelated resources never contend with each other.
#[derive(Default)]
pub struct WindowCounter {
    windows: DashMap<String, Mutex<WindowState>>,
}

impl WindowCounter {
    /// Create an empty counter.
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one request against `resource` if its window has room.
    pub fn try_increment(
        &self,
        resource: &str,
        now: i64,
        window_size_ms: u64,
        threshold: f64,
    ) -> CounterOutcome {
        if let Some(window) = self.windows.get(resource) {
            return Self::apply(&mut window.lock(), now, window_size_ms, threshold);
        }

        let window = self.windows.entry(resource.to_string()).or_insert_with(|| {
            debug!(resource = %resource, window_size_ms, "Creating window counter");
            Mutex::new(WindowState::new(now))
        });
        let mut state = window.lock();
        Self::apply(&mut state, now, window_size_ms, threshold)
    }

    fn apply(
        state: &mut WindowState,
        now: i64,
        window_size_ms: u64,
        threshold: f64,
    ) -> CounterOutcome {
        state.roll(now, window_size_ms);

        if (state.count as f64) < threshold {
            state.count += 1;
            let remaining = (threshold - state.count as f64).ceil().max(0.0) as u64;
            CounterOutcome::Admitted { remaining }
        } else {
            CounterOutcome::Rejected {
                retry_after: state.until_reset(now, window_size_ms),
            }
        }
    }

    /// The current state of a resource's window, if it has one.
    pub fn snapshot(&self, resource: &str) -> Option<WindowState> {
        self.windows.get(resource).map(|window| *window.lock())
    }

    /// Number of resources with a window.
    pub fn len(&self) -> usize {
        self.windows.len()
    }

    /// Whether no resource has been counted yet.
    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }
}
