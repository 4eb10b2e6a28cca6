//! CircuitBreaker - 配送プロバイダの保護
//!
//! ```text
//! Closed --(threshold / failure ratio)--> Open --(reset_timeout)--> HalfOpen
//!   ^                                      ^                          |
//!   |                                      +-------(probe fails)------+
//!   +-------------------(success_threshold probe successes)-----------+
//! ```
//!
//! - open の間はプロバイダを呼ばずに即座に拒否する
//! - dispatcher はこの拒否を recoverable な失敗として扱う
//! - 未決着のまま drop された probe permit は half-open の枠を返す

use std::collections::VecDeque;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;

use crate::config::BreakerConfig;

#[derive(Debug, Clone, PartialEq)]
pub struct CircuitBreakerSettings {
    /// Consecutive failures that open the circuit.
    pub failure_threshold: u32,
    /// Rolling window for the failure-ratio rule.
    pub window: Duration,
    /// Calls inside `window` before the ratio rule applies.
    pub min_requests: u32,
    pub failure_ratio: f64,
    /// Time spent open before probing.
    pub reset_timeout: Duration,
    pub half_open_max_probes: u32,
    pub success_threshold: u32,
}

impl Default for CircuitBreakerSettings {
    fn default() -> Self {
        Self::from(&BreakerConfig::default())
    }
}

impl From<&BreakerConfig> for CircuitBreakerSettings {
    fn from(config: &BreakerConfig) -> Self {
        Self {
            failure_threshold: config.failure_threshold,
            window: Duration::from_millis(config.window_ms),
            min_requests: config.min_requests,
            failure_ratio: config.failure_ratio,
            reset_timeout: Duration::from_millis(config.reset_timeout_ms),
            half_open_max_probes: config.half_open_max_probes,
            success_threshold: config.success_threshold,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }
}

/// Returned by [`CircuitBreaker::try_acquire`] when the call must not proceed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("circuit breaker is open")]
pub struct CircuitOpen;

/// Permission to make one provider call. Hand it back through
/// [`CircuitBreaker::record_success`] or [`CircuitBreaker::record_failure`].
///
/// Dropping an unsettled probe permit (the call was cancelled) frees its
/// half-open slot without counting as a success or a failure.
#[derive(Debug)]
#[must_use]
pub struct Permit<'a> {
    breaker: &'a CircuitBreaker,
    probe: bool,
    /// Half-open episode the probe slot belongs to.
    epoch: u64,
    settled: bool,
}

impl Permit<'_> {
    pub fn is_probe(&self) -> bool {
        self.probe
    }
}

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        if self.settled || !self.probe {
            return;
        }
        let mut data = self.breaker.data.lock();
        if data.state == CircuitState::HalfOpen && data.epoch == self.epoch {
            data.probes_in_flight = data.probes_in_flight.saturating_sub(1);
            tracing::debug!("circuit breaker probe abandoned, slot released");
        }
    }
}

#[derive(Debug)]
struct BreakerData {
    state: CircuitState,
    consecutive_failures: u32,
    /// (when, failed) for calls inside the rolling window.
    outcomes: VecDeque<(Instant, bool)>,
    opened_at: Option<Instant>,
    probes_in_flight: u32,
    probe_successes: u32,
    /// Bumped on every transition into half-open.
    epoch: u64,
}

impl BreakerData {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            outcomes: VecDeque::new(),
            opened_at: None,
            probes_in_flight: 0,
            probe_successes: 0,
            epoch: 0,
        }
    }

    fn prune(&mut self, now: Instant, window: Duration) {
        while let Some(&(at, _)) = self.outcomes.front() {
            if now.duration_since(at) <= window {
                break;
            }
            self.outcomes.pop_front();
        }
    }

    fn failure_ratio(&self) -> f64 {
        if self.outcomes.is_empty() {
            return 0.0;
        }
        let failures = self.outcomes.iter().filter(|(_, failed)| *failed).count();
        failures as f64 / self.outcomes.len() as f64
    }

    fn open(&mut self, now: Instant) {
        self.state = CircuitState::Open;
        self.opened_at = Some(now);
        self.probes_in_flight = 0;
        self.probe_successes = 0;
    }

    fn close(&mut self) {
        self.state = CircuitState::Closed;
        self.opened_at = None;
        self.consecutive_failures = 0;
        self.outcomes.clear();
        self.probes_in_flight = 0;
        self.probe_successes = 0;
    }
}

/// Single breaker in front of one provider.
#[derive(Debug)]
pub struct CircuitBreaker {
    settings: CircuitBreakerSettings,
    data: Mutex<BreakerData>,
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(CircuitBreakerSettings::default())
    }
}

impl CircuitBreaker {
    pub fn new(settings: CircuitBreakerSettings) -> Self {
        Self {
            settings,
            data: Mutex::new(BreakerData::new()),
        }
    }

    pub fn state(&self) -> CircuitState {
        self.data.lock().state
    }

    /// Admit a call, or reject it fast while the circuit is open or the
    /// half-open probe slots are taken.
    pub fn try_acquire(&self) -> Result<Permit<'_>, CircuitOpen> {
        let now = Instant::now();
        let mut data = self.data.lock();

        if data.state == CircuitState::Open {
            let elapsed = data.opened_at.map(|at| now.duration_since(at));
            if elapsed.is_some_and(|e| e >= self.settings.reset_timeout) {
                data.state = CircuitState::HalfOpen;
                data.probes_in_flight = 0;
                data.probe_successes = 0;
                data.epoch += 1;
                tracing::info!("circuit breaker half-open, probing provider");
            } else {
                return Err(CircuitOpen);
            }
        }

        let epoch = data.epoch;
        let permit = |probe| Permit {
            breaker: self,
            probe,
            epoch,
            settled: false,
        };
        match data.state {
            CircuitState::Closed => Ok(permit(false)),
            CircuitState::HalfOpen => {
                if data.probes_in_flight >= self.settings.half_open_max_probes {
                    return Err(CircuitOpen);
                }
                data.probes_in_flight += 1;
                Ok(permit(true))
            }
            CircuitState::Open => Err(CircuitOpen),
        }
    }

    pub fn record_success(&self, mut permit: Permit<'_>) {
        permit.settled = true;
        let now = Instant::now();
        let mut data = self.data.lock();

        match data.state {
            CircuitState::Closed => {
                data.consecutive_failures = 0;
                data.outcomes.push_back((now, false));
                data.prune(now, self.settings.window);
            }
            CircuitState::HalfOpen if permit.probe && permit.epoch == data.epoch => {
                data.probes_in_flight = data.probes_in_flight.saturating_sub(1);
                data.probe_successes += 1;
                if data.probe_successes >= self.settings.success_threshold {
                    data.close();
                    tracing::info!("circuit breaker closed, provider recovered");
                }
            }
            // a call admitted before the circuit opened finished late
            _ => {}
        }
    }

    pub fn record_failure(&self, mut permit: Permit<'_>) {
        permit.settled = true;
        let now = Instant::now();
        let mut data = self.data.lock();

        match data.state {
            CircuitState::Closed => {
                data.consecutive_failures += 1;
                data.outcomes.push_back((now, true));
                data.prune(now, self.settings.window);

                let consecutive = data.consecutive_failures >= self.settings.failure_threshold;
                let requests = data.outcomes.len() as u32;
                let ratio = data.failure_ratio();
                let by_ratio = requests >= self.settings.min_requests
                    && ratio >= self.settings.failure_ratio;

                if consecutive || by_ratio {
                    data.open(now);
                    tracing::warn!(
                        consecutive_failures = data.consecutive_failures,
                        requests,
                        failure_ratio = ratio,
                        reset_timeout_ms = self.settings.reset_timeout.as_millis() as u64,
                        "circuit breaker opened, rejecting deliveries"
                    );
                }
            }
            CircuitState::HalfOpen if permit.probe && permit.epoch == data.epoch => {
                data.open(now);
                tracing::warn!("circuit breaker probe failed, reopening");
            }
            _ => {}
        }
    }
}
