use std::collections::HashMap;
use std::num::NonZeroU32;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use governor::clock::DefaultClock;
use governor::state::direct::NotKeyed;
use governor::state::InMemoryState;
use governor::Quota;
use tracing::{debug, warn};

use crate::ProviderId;

type DirectRateLimiter = governor::RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

const MIN_INTERVAL: Duration = Duration::from_micros(1);
const MAX_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

/// Per-provider minimum-interval gate.
///
/// A limiter built from `rps` admits at most one call every `1/rps` seconds.
/// Callers sharing a limiter queue on an async mutex, so they are admitted in
/// call order and never closer together than the interval.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    gate: Option<Arc<Gate>>,
}

struct Gate {
    limiter: DirectRateLimiter,
    interval: Duration,
    turn: tokio::sync::Mutex<()>,
}

impl std::fmt::Debug for Gate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gate")
            .field("interval", &self.interval)
            .finish_non_exhaustive()
    }
}

impl RateLimiter {
    /// Absent or non-positive rates disable limiting. Rates slower than one
    /// call a day are clamped to that interval.
    pub fn new(rps: Option<f64>) -> Self {
        let Some(rps) = rps.filter(|rps| rps.is_finite() && *rps > 0.0) else {
            return Self::disabled();
        };

        let interval = match Duration::try_from_secs_f64(1.0 / rps) {
            Ok(interval) if interval <= MAX_INTERVAL => interval.max(MIN_INTERVAL),
            _ => {
                warn!(
                    rps,
                    max_interval_secs = MAX_INTERVAL.as_secs(),
                    "rate too small, clamping interval"
                );
                MAX_INTERVAL
            }
        };
        let quota = Quota::with_period(interval)
            .expect("interval is always greater than zero")
            .allow_burst(NonZeroU32::MIN);

        Self {
            gate: Some(Arc::new(Gate {
                limiter: governor::RateLimiter::direct(quota),
                interval,
                turn: tokio::sync::Mutex::new(()),
            })),
        }
    }

    pub fn disabled() -> Self {
        Self { gate: None }
    }

    pub fn is_enabled(&self) -> bool {
        self.gate.is_some()
    }

    pub fn min_interval(&self) -> Option<Duration> {
        self.gate.as_ref().map(|gate| gate.interval)
    }

    /// Waits until the provider's next call is permitted and claims that slot.
    pub async fn wait_if_needed(&self) {
        let Some(gate) = &self.gate else {
            return;
        };

        let _turn = gate.turn.lock().await;
        if gate.limiter.check().is_ok() {
            return;
        }
        debug!(interval_ms = gate.interval.as_millis() as u64, "rate limiter delaying call");
        gate.limiter.until_ready().await;
    }
}

/// Hands out one shared [`RateLimiter`] per provider.
#[derive(Debug, Default)]
pub struct RateLimiterRegistry {
    rates: HashMap<ProviderId, f64>,
    limiters: Mutex<HashMap<ProviderId, RateLimiter>>,
}

impl RateLimiterRegistry {
    pub fn new(rates: HashMap<ProviderId, f64>) -> Self {
        Self {
            rates,
            limiters: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_rate(mut self, provider: ProviderId, rps: f64) -> Self {
        self.rates.insert(provider, rps);
        self
    }

    pub fn for_provider(&self, provider: ProviderId) -> RateLimiter {
        let mut limiters = self
            .limiters
            .lock()
            .expect("rate limiter registry lock is not poisoned");
        limiters
            .entry(provider)
            .or_insert_with(|| RateLimiter::new(self.rates.get(&provider).copied()))
            .clone()
    }
}
