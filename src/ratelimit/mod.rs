//! Per-client sliding-window rate limiting.
//!
//! Each client owns an ordered queue of request timestamps. Entries older
//! than the window are purged before every decision, and the check-and-append
//! in [`RateLimiter::allow`] runs under one `DashMap` entry guard, so two
//! concurrent requests from the same client can never both take the last
//! slot.
//!
//! Burst detection is a separate read-only signal over a shorter window.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use dashmap::DashMap;

use crate::config::RateLimitConfig;

/// Timestamps and violation count for one client.
#[derive(Debug, Default)]
struct ClientWindow {
    timestamps: VecDeque<Instant>,
    violations: u64,
}

impl ClientWindow {
    fn prune(&mut self, now: Instant, window: Duration) {
        while let Some(&oldest) = self.timestamps.front() {
            if now.saturating_duration_since(oldest) >= window {
                self.timestamps.pop_front();
            } else {
                break;
            }
        }
    }
}

/// Sliding-window rate limiter keyed by client identity.
#[derive(Debug)]
pub struct RateLimiter {
    windows: DashMap<String, ClientWindow>,
    max_requests: usize,
    window: Duration,
    burst_window: Duration,
    burst_threshold: usize,
}

impl RateLimiter {
    /// Create a limiter allowing `max_requests` per `window`.
    pub fn new(max_requests: usize, window: Duration) -> Self {
        let defaults = RateLimitConfig::default();
        Self {
            windows: DashMap::new(),
            max_requests,
            window,
            burst_window: Duration::from_secs(defaults.burst_window_secs),
            burst_threshold: defaults.burst_threshold,
        }
    }

    /// Create from config
    pub fn from_config(config: &RateLimitConfig) -> Self {
        Self::new(config.max_requests, Duration::from_secs(config.window_secs))
            .with_burst(
                config.burst_threshold,
                Duration::from_secs(config.burst_window_secs),
            )
    }

    /// Override burst detection settings
    pub fn with_burst(mut self, threshold: usize, window: Duration) -> Self {
        self.burst_threshold = threshold;
        self.burst_window = window;
        self
    }

    /// Record a request from `client` now, if its quota allows.
    pub fn allow(&self, client: &str) -> bool {
        self.allow_at(client, Instant::now())
    }

    /// [`allow`](Self::allow) at an explicit instant.
    pub fn allow_at(&self, client: &str, now: Instant) -> bool {
        let mut entry = self.windows.entry(client.to_string()).or_default();
        let window = entry.value_mut();
        window.prune(now, self.window);

        if window.timestamps.len() >= self.max_requests {
            window.violations += 1;
            tracing::debug!(
                client,
                violations = window.violations,
                "Rate limit exceeded"
            );
            return false;
        }

        window.timestamps.push_back(now);
        true
    }

    /// Whether `client` sent at least `burst_threshold` requests in the
    /// burst window.
    pub fn is_burst(&self, client: &str) -> bool {
        self.is_burst_at(client, Instant::now())
    }

    /// [`is_burst`](Self::is_burst) at an explicit instant.
    pub fn is_burst_at(&self, client: &str, now: Instant) -> bool {
        let Some(mut entry) = self.windows.get_mut(client) else {
            return false;
        };
        let window = entry.value_mut();
        window.prune(now, self.window);

        let recent = window
            .timestamps
            .iter()
            .rev()
            .take_while(|&&t| now.saturating_duration_since(t) < self.burst_window)
            .count();
        recent >= self.burst_threshold
    }

    /// Rejections recorded for `client` since its window was created.
    pub fn violations(&self, client: &str) -> u64 {
        self.windows.get(client).map_or(0, |w| w.violations)
    }

    /// Requests currently counted against `client`.
    pub fn in_window(&self, client: &str) -> usize {
        self.windows.get(client).map_or(0, |w| w.timestamps.len())
    }

    /// Forget all state for `client`.
    pub fn reset(&self, client: &str) {
        self.windows.remove(client);
    }

    /// Drop windows with no live timestamps. Returns the number removed.
    pub fn cleanup(&self) -> usize {
        self.cleanup_at(Instant::now())
    }

    /// [`cleanup`](Self::cleanup) at an explicit instant.
    pub fn cleanup_at(&self, now: Instant) -> usize {
        let before = self.windows.len();
        self.windows.retain(|_, window| {
            window.prune(now, self.window);
            !window.timestamps.is_empty()
        });
        before.saturating_sub(self.windows.len())
    }

    /// Number of tracked clients
    pub fn client_count(&self) -> usize {
        self.windows.len()
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::from_config(&RateLimitConfig::default())
    }
}
