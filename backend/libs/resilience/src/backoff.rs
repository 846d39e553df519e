/// Backoff strategies for spacing out retry attempts
///
/// Attempt numbers are 1-based and refer to the attempt that just failed:
/// the wait before attempt 2 is `delay(1)`, before attempt 3 is `delay(2)`.
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Backoff {
    /// Same wait before every retry
    Fixed { delay: Duration },
    /// `base * attempt`, capped at `max`
    Linear { base: Duration, max: Duration },
    /// `base * multiplier^(attempt - 1)`, capped at `max`
    Exponential {
        base: Duration,
        multiplier: f64,
        max: Duration,
    },
    /// Exponential value perturbed by ±`jitter` (fraction of the delay)
    ExponentialJitter {
        base: Duration,
        multiplier: f64,
        max: Duration,
        jitter: f64,
    },
}

impl Default for Backoff {
    fn default() -> Self {
        Self::Exponential {
            base: Duration::from_millis(100),
            multiplier: 2.0,
            max: Duration::from_secs(10),
        }
    }
}

impl Backoff {
    pub fn fixed(delay: Duration) -> Self {
        Self::Fixed { delay }
    }

    pub fn linear(base: Duration) -> Self {
        Self::Linear {
            base,
            max: Duration::MAX,
        }
    }

    /// Exponential backoff doubling from `base`, capped at 30s
    pub fn exponential(base: Duration) -> Self {
        Self::Exponential {
            base,
            multiplier: 2.0,
            max: Duration::from_secs(30),
        }
    }

    pub fn exponential_with_jitter(base: Duration, jitter: f64) -> Self {
        Self::ExponentialJitter {
            base,
            multiplier: 2.0,
            max: Duration::from_secs(30),
            jitter: clamp_fraction(jitter),
        }
    }

    /// Replace the cap on linear and exponential variants
    pub fn with_max(self, cap: Duration) -> Self {
        match self {
            Self::Fixed { delay } => Self::Fixed { delay },
            Self::Linear { base, .. } => Self::Linear { base, max: cap },
            Self::Exponential {
                base, multiplier, ..
            } => Self::Exponential {
                base,
                multiplier,
                max: cap,
            },
            Self::ExponentialJitter {
                base,
                multiplier,
                jitter,
                ..
            } => Self::ExponentialJitter {
                base,
                multiplier,
                max: cap,
                jitter,
            },
        }
    }

    /// Replace the growth factor on exponential variants
    pub fn with_multiplier(self, factor: f64) -> Self {
        match self {
            Self::Exponential { base, max, .. } => Self::Exponential {
                base,
                multiplier: factor,
                max,
            },
            Self::ExponentialJitter {
                base, max, jitter, ..
            } => Self::ExponentialJitter {
                base,
                multiplier: factor,
                max,
                jitter,
            },
            other => other,
        }
    }

    /// Nominal delay after the given failed attempt, without any jitter.
    pub fn delay(&self, attempt: u32) -> Duration {
        let attempt = attempt.max(1);
        match self {
            Self::Fixed { delay } => *delay,
            Self::Linear { base, max } => base.saturating_mul(attempt).min(*max),
            Self::Exponential {
                base,
                multiplier,
                max,
            }
            | Self::ExponentialJitter {
                base,
                multiplier,
                max,
                ..
            } => exponential_delay(*base, *multiplier, *max, attempt),
        }
    }

    /// Jitter fraction carried by the strategy itself (0 for the deterministic variants)
    pub fn jitter_fraction(&self) -> f64 {
        match self {
            Self::ExponentialJitter { jitter, .. } => clamp_fraction(*jitter),
            _ => 0.0,
        }
    }

    /// Delay after the given failed attempt, including the strategy's own jitter.
    pub fn compute(&self, attempt: u32) -> Duration {
        apply_jitter(self.delay(attempt), self.jitter_fraction())
    }
}

fn exponential_delay(base: Duration, multiplier: f64, max: Duration, attempt: u32) -> Duration {
    let exponent = i32::try_from(attempt - 1).unwrap_or(i32::MAX);
    let secs = base.as_secs_f64() * multiplier.max(1.0).powi(exponent);

    // inf/NaN fall back to the cap
    Duration::try_from_secs_f64(secs)
        .map(|d| d.min(max))
        .unwrap_or(max)
}

pub(crate) fn clamp_fraction(fraction: f64) -> f64 {
    if fraction.is_finite() {
        fraction.clamp(0.0, 1.0)
    } else {
        0.0
    }
}

/// Perturb `delay` uniformly within `[delay*(1-fraction), delay*(1+fraction)]`.
pub fn apply_jitter(delay: Duration, fraction: f64) -> Duration {
    apply_jitter_with(&mut rand::thread_rng(), delay, fraction)
}

pub fn apply_jitter_with<R: Rng + ?Sized>(rng: &mut R, delay: Duration, fraction: f64) -> Duration {
    let fraction = clamp_fraction(fraction);
    if fraction == 0.0 || delay.is_zero() {
        return delay;
    }

    let factor = rng.gen_range((1.0 - fraction)..=(1.0 + fraction));
    Duration::try_from_secs_f64(delay.as_secs_f64() * factor).unwrap_or(delay)
}
