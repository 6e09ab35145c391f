use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct BreakerConfig {
    pub failure_threshold: u32,
    pub timeout: Duration,
    pub half_open_max_calls: u32,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            timeout: Duration::from_secs(60),
            half_open_max_calls: 3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

/// Monitoring view of one breaker.
#[derive(Debug, Clone, Serialize)]
pub struct BreakerSnapshot {
    pub state: BreakerState,
    pub failure_count: u32,
    pub can_attempt: bool,
}

/// Per-server circuit breaker.
///
/// Closed counts consecutive failures; at the threshold it opens and
/// rejects everything until `timeout` has elapsed, then lets a bounded
/// number of half-open probes through. Probe failure reopens, enough probe
/// successes close.
#[derive(Debug)]
pub struct CircuitBreaker {
    config: BreakerConfig,
    state: BreakerState,
    failure_count: u32,
    half_open_calls: u32,
    last_failure_time: Option<Instant>,
}

impl CircuitBreaker {
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            config,
            state: BreakerState::Closed,
            failure_count: 0,
            half_open_calls: 0,
            last_failure_time: None,
        }
    }

    pub fn state(&self) -> BreakerState {
        self.state
    }

    pub fn record_success(&mut self) {
        match self.state {
            BreakerState::HalfOpen => {
                self.half_open_calls += 1;
                if self.half_open_calls >= self.config.half_open_max_calls {
                    self.state = BreakerState::Closed;
                    self.failure_count = 0;
                    self.half_open_calls = 0;
                    info!("circuit breaker closed, service recovered");
                }
            }
            BreakerState::Closed => {
                self.failure_count = 0;
            }
            BreakerState::Open => {}
        }
    }

    pub fn record_failure(&mut self) {
        self.failure_count += 1;
        self.last_failure_time = Some(Instant::now());

        match self.state {
            BreakerState::HalfOpen => {
                self.state = BreakerState::Open;
                self.half_open_calls = 0;
                warn!(failure_count = self.failure_count, "circuit breaker reopened, half-open probe failed");
            }
            BreakerState::Closed if self.failure_count >= self.config.failure_threshold => {
                self.state = BreakerState::Open;
                warn!(
                    failure_count = self.failure_count,
                    threshold = self.config.failure_threshold,
                    "circuit breaker opened"
                );
            }
            _ => {}
        }
    }

    /// Whether a request may go through right now. An open breaker flips to
    /// half-open once the timeout has elapsed since the last failure.
    pub fn can_attempt(&mut self) -> bool {
        match self.state {
            BreakerState::Closed => true,
            BreakerState::HalfOpen => self.half_open_calls < self.config.half_open_max_calls,
            BreakerState::Open => {
                if let Some(last_failure) = self.last_failure_time {
                    if last_failure.elapsed() >= self.config.timeout {
                        self.state = BreakerState::HalfOpen;
                        self.half_open_calls = 0;
                        info!("circuit breaker half-open");
                        return true;
                    }
                }
                false
            }
        }
    }

    pub fn snapshot(&mut self) -> BreakerSnapshot {
        let can_attempt = self.can_attempt();
        BreakerSnapshot {
            state: self.state,
            failure_count: self.failure_count,
            can_attempt,
        }
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(BreakerConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast_breaker() -> CircuitBreaker {
        CircuitBreaker::new(BreakerConfig {
            failure_threshold: 5,
            timeout: Duration::from_millis(50),
            half_open_max_calls: 3,
        })
    }

    #[test]
    fn test_opens_after_threshold() {
        let mut breaker = fast_breaker();
        for _ in 0..4 {
            breaker.record_failure();
            assert_eq!(breaker.state(), BreakerState::Closed);
        }
        breaker.record_failure();
        assert_eq!(breaker.state(), BreakerState::Open);
        assert!(!breaker.can_attempt());
    }

    #[test]
    fn test_success_resets_failure_count() {
        let mut breaker = fast_breaker();
        for _ in 0..4 {
            breaker.record_failure();
        }
        breaker.record_success();
        for _ in 0..4 {
            breaker.record_failure();
        }
        assert_eq!(breaker.state(), BreakerState::Closed);
    }

    #[test]
    fn test_stays_open_until_timeout() {
        let mut breaker = fast_breaker();
        for _ in 0..5 {
            breaker.record_failure();
        }
        assert!(!breaker.can_attempt());

        std::thread::sleep(Duration::from_millis(60));
        assert!(breaker.can_attempt());
        assert_eq!(breaker.state(), BreakerState::HalfOpen);
    }

    #[test]
    fn test_half_open_failure_reopens() {
        let mut breaker = fast_breaker();
        for _ in 0..5 {
            breaker.record_failure();
        }
        std::thread::sleep(Duration::from_millis(60));
        assert!(breaker.can_attempt());

        breaker.record_failure();
        assert_eq!(breaker.state(), BreakerState::Open);
        assert!(!breaker.can_attempt());
    }

    #[test]
    fn test_half_open_successes_close() {
        let mut breaker = fast_breaker();
        for _ in 0..5 {
            breaker.record_failure();
        }
        std::thread::sleep(Duration::from_millis(60));
        assert!(breaker.can_attempt());

        for _ in 0..3 {
            breaker.record_success();
        }
        assert_eq!(breaker.state(), BreakerState::Closed);
        assert!(breaker.can_attempt());
    }

    #[test]
    fn test_half_open_bounds_probes() {
        let mut breaker = fast_breaker();
        for _ in 0..5 {
            breaker.record_failure();
        }
        std::thread::sleep(Duration::from_millis(60));

        // First can_attempt transitions to half-open; probes are bounded by
        // recorded successes, so repeated checks without outcomes still pass.
        assert!(breaker.can_attempt());
        breaker.record_success();
        breaker.record_success();
        assert!(breaker.can_attempt());
        breaker.record_success();
        assert_eq!(breaker.state(), BreakerState::Closed);
    }
}
