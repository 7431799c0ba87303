//! Per-channel circuit breaker protecting downstream providers from being
//! hammered by a worker pool that keeps retrying a channel that is down.
//! Closed/Open/HalfOpen state machine with atomic counters guarded by a
//! `parking_lot::RwLock`, the same shape used for protecting mediation
//! targets: a run of failures trips the breaker, a cooldown window lets one
//! probe through, and enough consecutive successes in that half-open state
//! closes it again.

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use parking_lot::RwLock;
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

pub struct CircuitBreaker {
    state: RwLock<CircuitState>,
    failure_count: AtomicU32,
    success_count: AtomicU32,
    last_failure_time: RwLock<Option<Instant>>,
    failure_threshold: u32,
    success_threshold: u32,
    reset_timeout: Duration,
}

impl CircuitBreaker {
    pub fn new(failure_threshold: u32, success_threshold: u32, reset_timeout: Duration) -> Self {
        Self {
            state: RwLock::new(CircuitState::Closed),
            failure_count: AtomicU32::new(0),
            success_count: AtomicU32::new(0),
            last_failure_time: RwLock::new(None),
            failure_threshold,
            success_threshold,
            reset_timeout,
        }
    }

    /// Whether a send attempt should be let through right now. Trips the
    /// breaker from `Open` to `HalfOpen` as a side effect once the reset
    /// timeout has elapsed.
    pub fn allow_request(&self) -> bool {
        match *self.state.read() {
            CircuitState::Closed => true,
            CircuitState::Open => {
                let elapsed = self.last_failure_time.read().map(|t| t.elapsed() >= self.reset_timeout).unwrap_or(false);
                if elapsed {
                    *self.state.write() = CircuitState::HalfOpen;
                    self.success_count.store(0, Ordering::SeqCst);
                    debug!("circuit breaker transitioning to half-open");
                    true
                } else {
                    false
                }
            }
            CircuitState::HalfOpen => true,
        }
    }

    pub fn record_success(&self) {
        match *self.state.read() {
            CircuitState::HalfOpen => {
                let count = self.success_count.fetch_add(1, Ordering::SeqCst) + 1;
                if count >= self.success_threshold {
                    *self.state.write() = CircuitState::Closed;
                    self.failure_count.store(0, Ordering::SeqCst);
                    info!(successes = count, "circuit breaker closed");
                }
            }
            CircuitState::Closed => {
                self.failure_count.store(0, Ordering::SeqCst);
            }
            CircuitState::Open => {}
        }
    }

    pub fn record_failure(&self) {
        match *self.state.read() {
            CircuitState::Closed => {
                let count = self.failure_count.fetch_add(1, Ordering::SeqCst) + 1;
                if count >= self.failure_threshold {
                    *self.state.write() = CircuitState::Open;
                    *self.last_failure_time.write() = Some(Instant::now());
                    warn!(failures = count, "circuit breaker opened");
                }
            }
            CircuitState::HalfOpen => {
                *self.state.write() = CircuitState::Open;
                *self.last_failure_time.write() = Some(Instant::now());
                self.success_count.store(0, Ordering::SeqCst);
                warn!("circuit breaker re-opened on failure in half-open state");
            }
            CircuitState::Open => {}
        }
    }

    pub fn state(&self) -> CircuitState {
        *self.state.read()
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(10, 3, Duration::from_secs(30))
    }
}

/// One breaker per channel, created lazily on first use. The Sender
/// consults this before handing a message to an adapter's `Send`, and
/// reports back via `record_success`/`record_failure` after each attempt.
#[derive(Default)]
pub struct CircuitBreakerRegistry {
    breakers: DashMap<Uuid, CircuitBreaker>,
    failure_threshold: u32,
    success_threshold: u32,
    reset_timeout: Duration,
}

impl CircuitBreakerRegistry {
    pub fn new(failure_threshold: u32, success_threshold: u32, reset_timeout: Duration) -> Self {
        Self { breakers: DashMap::new(), failure_threshold, success_threshold, reset_timeout }
    }

    pub fn allow_request(&self, channel_uuid: Uuid) -> bool {
        self.breakers
            .entry(channel_uuid)
            .or_insert_with(|| CircuitBreaker::new(self.failure_threshold, self.success_threshold, self.reset_timeout))
            .allow_request()
    }

    pub fn record_success(&self, channel_uuid: Uuid) {
        if let Some(breaker) = self.breakers.get(&channel_uuid) {
            breaker.record_success();
        }
    }

    pub fn record_failure(&self, channel_uuid: Uuid) {
        self.breakers
            .entry(channel_uuid)
            .or_insert_with(|| CircuitBreaker::new(self.failure_threshold, self.success_threshold, self.reset_timeout))
            .record_failure();
    }

    pub fn state_of(&self, channel_uuid: Uuid) -> Option<CircuitState> {
        self.breakers.get(&channel_uuid).map(|b| b.state())
    }
}

impl Default for CircuitBreakerRegistry {
    fn default() -> Self {
        Self::new(10, 3, Duration::from_secs(30))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opens_after_threshold_failures_and_blocks() {
        let cb = CircuitBreaker::new(3, 2, Duration::from_millis(50));
        assert!(cb.allow_request());
        cb.record_failure();
        cb.record_failure();
        assert!(cb.allow_request());
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(!cb.allow_request());
    }

    #[test]
    fn half_opens_after_reset_timeout_and_closes_after_successes() {
        let cb = CircuitBreaker::new(1, 2, Duration::from_millis(10));
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);
        std::thread::sleep(Duration::from_millis(20));
        assert!(cb.allow_request());
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        cb.record_success();
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        cb.record_success();
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[test]
    fn failure_in_half_open_reopens_immediately() {
        let cb = CircuitBreaker::new(1, 2, Duration::from_millis(10));
        cb.record_failure();
        std::thread::sleep(Duration::from_millis(20));
        assert!(cb.allow_request());
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);
    }

    #[test]
    fn registry_tracks_breakers_per_channel_independently() {
        let registry = CircuitBreakerRegistry::new(1, 2, Duration::from_secs(30));
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        registry.record_failure(a);
        assert_eq!(registry.state_of(a), Some(CircuitState::Open));
        assert_eq!(registry.state_of(b), None);
        assert!(registry.allow_request(b));
    }
}
