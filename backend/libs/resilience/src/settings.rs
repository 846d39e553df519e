//! Environment-driven configuration for a protected resource.
//!
//! Variables are read with a caller-chosen prefix, e.g. with `PAYMENTS_`:
//! - `PAYMENTS_TIMEOUT_MS`: per-attempt deadline (default: 30000)
//! - `PAYMENTS_FAILURE_THRESHOLD`: consecutive failures to open (default: 5)
//! - `PAYMENTS_RECOVERY_TIMEOUT_MS`: open → half-open delay (default: 60000)
//! - `PAYMENTS_HALF_OPEN_MAX_TRIALS`: trial calls before closing (default: 2)
//! - `PAYMENTS_MAX_ATTEMPTS`: attempts per call, 0 disables retry (default: 3)
//! - `PAYMENTS_BACKOFF`: fixed | linear | exponential | exponential_jitter
//! - `PAYMENTS_BACKOFF_BASE_MS`, `PAYMENTS_BACKOFF_MAX_MS`, `PAYMENTS_BACKOFF_MULTIPLIER`
//! - `PAYMENTS_JITTER_FRACTION`: 0.0 - 1.0 (default: 0.3)
//! - `PAYMENTS_RETRY_ON_TIMEOUT`: true/false (default: true)

use crate::backoff::Backoff;
use crate::circuit_breaker::CircuitBreakerConfig;
use crate::presets::ServiceConfig;
use crate::retry::RetryConfig;
use crate::timeout::TimeoutConfig;
use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read resilience settings: {0}")]
    Env(#[from] envy::Error),
    #[error("Invalid resilience setting `{field}`: {reason}")]
    Invalid { field: &'static str, reason: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffKind {
    Fixed,
    Linear,
    Exponential,
    ExponentialJitter,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ResilienceSettings {
    pub timeout_ms: u64,
    pub failure_threshold: u32,
    pub recovery_timeout_ms: u64,
    pub half_open_max_trials: u32,
    pub max_attempts: u32,
    pub backoff: BackoffKind,
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
    pub backoff_multiplier: f64,
    pub jitter_fraction: f64,
    pub retry_on_timeout: bool,
}

impl Default for ResilienceSettings {
    fn default() -> Self {
        Self {
            timeout_ms: 30_000,
            failure_threshold: 5,
            recovery_timeout_ms: 60_000,
            half_open_max_trials: 2,
            max_attempts: 3,
            backoff: BackoffKind::ExponentialJitter,
            backoff_base_ms: 100,
            backoff_max_ms: 5_000,
            backoff_multiplier: 2.0,
            jitter_fraction: 0.3,
            retry_on_timeout: true,
        }
    }
}

impl ResilienceSettings {
    /// Load from process environment variables starting with `prefix`
    pub fn from_env(prefix: &str) -> Result<Self, ConfigError> {
        Ok(envy::prefixed(prefix).from_env::<Self>()?)
    }

    /// Load from explicit key/value pairs (keys still carry the prefix)
    pub fn from_vars<I>(prefix: &str, vars: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        Ok(envy::prefixed(prefix).from_iter::<_, Self>(vars)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.timeout_ms == 0 {
            return Err(invalid("timeout_ms", "must be greater than 0"));
        }
        if self.failure_threshold == 0 {
            return Err(invalid("failure_threshold", "must be at least 1"));
        }
        if self.half_open_max_trials == 0 {
            return Err(invalid("half_open_max_trials", "must be at least 1"));
        }
        if !(self.backoff_multiplier.is_finite() && self.backoff_multiplier >= 1.0) {
            return Err(invalid(
                "backoff_multiplier",
                format!("must be >= 1.0, got {}", self.backoff_multiplier),
            ));
        }
        if !(0.0..=1.0).contains(&self.jitter_fraction) {
            return Err(invalid(
                "jitter_fraction",
                format!("must be within 0.0 - 1.0, got {}", self.jitter_fraction),
            ));
        }
        if self.backoff_max_ms < self.backoff_base_ms {
            return Err(invalid("backoff_max_ms", "must not be below backoff_base_ms"));
        }
        Ok(())
    }

    fn backoff(&self) -> Backoff {
        let base = Duration::from_millis(self.backoff_base_ms);
        let max = Duration::from_millis(self.backoff_max_ms);
        match self.backoff {
            BackoffKind::Fixed => Backoff::fixed(base),
            BackoffKind::Linear => Backoff::linear(base).with_max(max),
            BackoffKind::Exponential => Backoff::Exponential {
                base,
                multiplier: self.backoff_multiplier,
                max,
            },
            BackoffKind::ExponentialJitter => Backoff::ExponentialJitter {
                base,
                multiplier: self.backoff_multiplier,
                max,
                jitter: self.jitter_fraction,
            },
        }
    }

    pub fn into_service_config(self) -> Result<ServiceConfig, ConfigError> {
        self.validate()?;

        let retry = (self.max_attempts > 0).then(|| RetryConfig {
            max_attempts: self.max_attempts,
            backoff: self.backoff(),
            // ExponentialJitter carries its own fraction
            jitter_fraction: match self.backoff {
                BackoffKind::ExponentialJitter => 0.0,
                _ => self.jitter_fraction,
            },
            retry_on_timeout: self.retry_on_timeout,
        });

        Ok(ServiceConfig {
            timeout: TimeoutConfig {
                duration: Duration::from_millis(self.timeout_ms),
            },
            circuit_breaker: CircuitBreakerConfig {
                failure_threshold: self.failure_threshold,
                recovery_timeout: Duration::from_millis(self.recovery_timeout_ms),
                half_open_max_trials: self.half_open_max_trials,
            },
            retry,
        })
    }
}

fn invalid(field: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        field,
        reason: reason.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_defaults_when_nothing_set() {
        let settings = ResilienceSettings::from_vars("BILLING_", Vec::new()).unwrap();
        assert_eq!(settings, ResilienceSettings::default());
    }

    #[test]
    fn test_prefixed_overrides() {
        let settings = ResilienceSettings::from_vars(
            "BILLING_",
            vars(&[
                ("BILLING_TIMEOUT_MS", "1500"),
                ("BILLING_FAILURE_THRESHOLD", "7"),
                ("BILLING_BACKOFF", "linear"),
                ("BILLING_RETRY_ON_TIMEOUT", "false"),
                ("OTHER_TIMEOUT_MS", "1"),
            ]),
        )
        .unwrap();

        assert_eq!(settings.timeout_ms, 1500);
        assert_eq!(settings.failure_threshold, 7);
        assert_eq!(settings.backoff, BackoffKind::Linear);
        assert!(!settings.retry_on_timeout);

        let config = settings.into_service_config().unwrap();
        assert_eq!(config.timeout.duration, Duration::from_millis(1500));
        let retry = config.retry.unwrap();
        assert_eq!(retry.backoff.delay(2), Duration::from_millis(200));
        assert_eq!(retry.jitter_fraction, 0.3);
    }

    #[test]
    fn test_zero_attempts_disables_retry() {
        let settings = ResilienceSettings {
            max_attempts: 0,
            ..Default::default()
        };
        assert!(settings.into_service_config().unwrap().retry.is_none());
    }

    #[test]
    fn test_unparseable_value_is_env_error() {
        let result =
            ResilienceSettings::from_vars("X_", vars(&[("X_FAILURE_THRESHOLD", "many")]));
        assert!(matches!(result, Err(ConfigError::Env(_))));
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let bad_jitter = ResilienceSettings {
            jitter_fraction: 1.5,
            ..Default::default()
        };
        assert!(matches!(
            bad_jitter.validate(),
            Err(ConfigError::Invalid {
                field: "jitter_fraction",
                ..
            })
        ));

        let bad_threshold = ResilienceSettings {
            failure_threshold: 0,
            ..Default::default()
        };
        assert!(bad_threshold.into_service_config().is_err());
    }
}
