//! Probabilistic fault injection for outbound requests.
//!
//! The client calls [`FailureSimulator::maybe_fail`] before every network
//! request so that retry paths get exercised under test and in staging.

use rand::Rng;
use shared_types::ChainError;

/// Fails requests with a configured probability.
///
/// Thread-safe: each call draws from the calling thread's RNG. A rate of
/// zero (the default) is a no-op.
#[derive(Debug, Clone, Copy, Default)]
pub struct FailureSimulator {
    rate: f64,
}

impl FailureSimulator {
    /// Create a simulator failing with probability `rate`, clamped to
    /// `[0, 1]`.
    #[must_use]
    pub fn new(rate: f64) -> Self {
        Self {
            rate: rate.clamp(0.0, 1.0),
        }
    }

    /// A simulator that never fails.
    #[must_use]
    pub fn disabled() -> Self {
        Self::new(0.0)
    }

    /// The configured failure rate.
    #[must_use]
    pub fn rate(&self) -> f64 {
        self.rate
    }

    /// Fail with the configured probability.
    pub fn maybe_fail(&self) -> Result<(), ChainError> {
        if self.rate > 0.0 && rand::thread_rng().gen::<f64>() < self.rate {
            return Err(ChainError::Simulated);
        }
        Ok(())
    }
}
