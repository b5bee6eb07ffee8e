//! Retry pacing and proposer tuning.
//!
//! [`ProposerConfig`] bundles everything a [`Proposer`](crate::Proposer)
//! needs besides its acceptors: per-phase timeout, attempt budget, backoff
//! curve, a [`Sleep`] to wait on and an RNG for jitter. Tests pass a seeded
//! RNG through [`ProposerConfig::with_seed`] to replay the same schedule.

use std::future::Future;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
#[cfg(feature = "serde")]
use serde::Deserialize;

/// Exponential backoff, capped and jittered.
///
/// The wait before retry `n` is `initial * multiplier^n`, clamped to `max`,
/// then scaled by a uniform factor in `[0.5, 1.5)`.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Deserialize), serde(default))]
pub struct BackoffConfig {
    #[cfg_attr(feature = "serde", serde(with = "millis"))]
    pub initial: Duration,
    #[cfg_attr(feature = "serde", serde(with = "millis"))]
    pub max: Duration,
    pub multiplier: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(10),
            max: Duration::from_secs(1),
            multiplier: 2.0,
        }
    }
}

impl BackoffConfig {
    /// Wait before retry number `attempt` (0-based).
    #[must_use]
    pub fn delay(&self, attempt: u32, rng: &mut impl Rng) -> Duration {
        let growth = self
            .multiplier
            .powi(i32::try_from(attempt).unwrap_or(i32::MAX));
        let ceiling = self.max.as_secs_f64();
        let nominal = (self.initial.as_secs_f64() * growth).min(ceiling);
        Duration::from_secs_f64(nominal * rng.random_range(0.5..1.5))
    }
}

/// Timer used between proposal attempts.
pub trait Sleep: Clone + Send + Sync + 'static {
    fn sleep(&self, duration: Duration) -> impl Future<Output = ()> + Send;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct TokioSleep;

impl Sleep for TokioSleep {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

pub struct ProposerConfig<S: Sleep, R: Rng = StdRng> {
    pub backoff: BackoffConfig,
    /// Budget for each of sequence discovery, prepare and accept
    pub phase_timeout: Duration,
    /// Attempts on a contended slot before reporting `Contended`
    pub max_attempts: u32,
    pub sleep: S,
    pub rng: R,
}

impl<S: Sleep, R: Rng> ProposerConfig<S, R> {
    pub fn new(backoff: BackoffConfig, sleep: S, rng: R) -> Self {
        Self {
            backoff,
            phase_timeout: Duration::from_secs(2),
            max_attempts: 8,
            sleep,
            rng,
        }
    }

    #[must_use]
    pub fn with_backoff(self, backoff: BackoffConfig) -> Self {
        Self { backoff, ..self }
    }

    #[must_use]
    pub fn with_phase_timeout(self, phase_timeout: Duration) -> Self {
        Self {
            phase_timeout,
            ..self
        }
    }

    #[must_use]
    pub fn with_max_attempts(self, max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            ..self
        }
    }
}

impl<S: Sleep> ProposerConfig<S> {
    /// Deterministic jitter from `seed`.
    #[must_use]
    pub fn with_seed(backoff: BackoffConfig, sleep: S, seed: u64) -> Self {
        Self::new(backoff, sleep, StdRng::seed_from_u64(seed))
    }
}

impl Default for ProposerConfig<TokioSleep> {
    fn default() -> Self {
        Self::new(BackoffConfig::default(), TokioSleep, StdRng::from_os_rng())
    }
}

/// Serde adapter reading a `Duration` as integer milliseconds.
#[cfg(feature = "serde")]
pub mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer};

    /// # Errors
    /// Fails if the input is not an unsigned integer.
    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
