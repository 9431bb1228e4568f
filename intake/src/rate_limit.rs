//! Per-address request budget for the submission route.
//!
//! The limiter is a trait so the in-process table can be replaced by one
//! backed by shared storage without touching the handlers.
use moka::ops::compute::Op;
use moka::sync::Cache;
use std::net::IpAddr;
use std::time::{Duration, Instant};

/// Longest window the limiter accepts.
pub const MAX_WINDOW: Duration = Duration::from_secs(366 * 24 * 60 * 60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateDecision {
    Allowed { remaining: u64 },
    Denied { retry_after: Duration },
}

pub trait RateLimiter: Send + Sync {
    /// Counts one request from `key` at `now` and reports whether it fits in
    /// the current window. Denied requests are not counted.
    fn check_and_increment(&self, key: IpAddr, now: Instant) -> RateDecision;
}

#[derive(Clone, Copy, Debug)]
struct Window {
    started: Instant,
    count: u64,
}

/// Fixed-window counter per client address. A window opens on the first
/// request from an address and lasts `window`, independent of other addresses.
pub struct FixedWindowLimiter {
    max_requests: u64,
    window: Duration,
    windows: Cache<IpAddr, Window>,
}

impl FixedWindowLimiter {
    /// `max_requests = 0` disables limiting. `window` is capped at
    /// [`MAX_WINDOW`].
    pub fn new(max_requests: u64, window: Duration) -> Self {
        let window = window.min(MAX_WINDOW);
        // Entries outlive their window by at most one window, then get evicted.
        let windows = Cache::builder().time_to_live(window).build();

        FixedWindowLimiter {
            max_requests,
            window,
            windows,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.max_requests > 0
    }
}

impl RateLimiter for FixedWindowLimiter {
    fn check_and_increment(&self, key: IpAddr, now: Instant) -> RateDecision {
        if !self.is_enabled() {
            return RateDecision::Allowed {
                remaining: u64::MAX,
            };
        }

        let mut decision = RateDecision::Allowed { remaining: 0 };

        // The compute closure runs under the per-key lock, so concurrent
        // requests from one address are serialized here.
        self.windows.entry(key).and_compute_with(|existing| {
            let current = existing
                .map(|entry| entry.into_value())
                .filter(|w| now.saturating_duration_since(w.started) < self.window);

            match current {
                None => {
                    decision = RateDecision::Allowed {
                        remaining: self.max_requests - 1,
                    };
                    Op::Put(Window {
                        started: now,
                        count: 1,
                    })
                }
                Some(w) if w.count < self.max_requests => {
                    decision = RateDecision::Allowed {
                        remaining: self.max_requests - w.count - 1,
                    };
                    Op::Put(Window {
                        count: w.count + 1,
                        ..w
                    })
                }
                Some(w) => {
                    decision = RateDecision::Denied {
                        retry_after: w
                            .started
                            .checked_add(self.window)
                            .map_or(self.window, |end| end.saturating_duration_since(now)),
                    };
                    Op::Nop
                }
            }
        });

        decision
    }
}
