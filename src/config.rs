use crate::error::{AppError, AppResult};
use crate::models::job::ARTIFACT_VALIDITY_DAYS;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    pub poll: PollPolicy,
    pub retry: RetryConfig,
    pub transport: TransportConfig,
    pub allowlist: AllowListConfig,
    pub artifact: ArtifactConfig,
    pub retention: RetentionConfig,
    pub account_exports: AccountExportsConfig,
}

/// Backoff schedule for status polling.
#[derive(Debug, Clone, PartialEq)]
pub struct PollPolicy {
    pub initial_interval: Duration,
    pub max_interval: Duration,
    pub backoff_multiplier: f64,
    pub max_total_wait: Duration,
}

impl PollPolicy {
    pub fn from_millis(initial_interval_ms: u64, max_interval_ms: u64, backoff_multiplier: f64, max_total_wait_ms: u64) -> Self {
        Self {
            initial_interval: Duration::from_millis(initial_interval_ms),
            max_interval: Duration::from_millis(max_interval_ms),
            backoff_multiplier,
            max_total_wait: Duration::from_millis(max_total_wait_ms),
        }
    }

    pub fn validate(&self) -> AppResult<()> {
        if !self.backoff_multiplier.is_finite() || self.backoff_multiplier < 1.0 {
            return Err(AppError::validation(
                "backoff_multiplier",
                format!("must be a finite number >= 1.0, got {}", self.backoff_multiplier),
            ));
        }
        if self.initial_interval.is_zero() {
            return Err(AppError::validation("initial_interval", "must be greater than zero"));
        }
        if self.max_interval < self.initial_interval {
            return Err(AppError::validation(
                "max_interval",
                format!(
                    "must be at least the initial interval ({:?} < {:?})",
                    self.max_interval, self.initial_interval
                ),
            ));
        }
        Ok(())
    }

    /// Interval to sleep after `current`, capped at `max_interval`.
    pub fn next_interval(&self, current: Duration) -> Duration {
        let next = current.as_secs_f64() * self.backoff_multiplier;
        Duration::from_secs_f64(next.min(self.max_interval.as_secs_f64()))
    }
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self::from_millis(1_000, 30_000, 2.0, 30 * 60 * 1_000)
    }
}

#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(5),
            backoff_multiplier: 2.0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub max_concurrent_requests: usize,
    pub request_timeout: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmailNormalization {
    Preserve,
    Lowercase,
}

impl EmailNormalization {
    pub fn apply(&self, email: &str) -> String {
        match self {
            EmailNormalization::Preserve => email.trim().to_string(),
            EmailNormalization::Lowercase => email.trim().to_lowercase(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AllowListConfig {
    pub email_normalization: EmailNormalization,
    pub cache_enabled: bool,
}

#[derive(Debug, Clone)]
pub struct ArtifactConfig {
    pub validity_days: i64,
    pub require_https: bool,
}

/// Upper bound for any configured day count.
pub const MAX_CONFIG_DAYS: i64 = 36_500;

impl ArtifactConfig {
    pub fn validate(&self) -> AppResult<()> {
        if !(1..=MAX_CONFIG_DAYS).contains(&self.validity_days) {
            return Err(AppError::validation(
                "validity_days",
                format!("must be between 1 and {MAX_CONFIG_DAYS}, got {}", self.validity_days),
            ));
        }
        Ok(())
    }

    /// Artifact window. Out-of-range day counts fall back to the standard
    /// 90-day window.
    pub fn validity(&self) -> chrono::Duration {
        let days = if self.validate().is_ok() {
            self.validity_days
        } else {
            ARTIFACT_VALIDITY_DAYS
        };
        chrono::TimeDelta::try_days(days).unwrap_or_else(|| chrono::TimeDelta::days(ARTIFACT_VALIDITY_DAYS))
    }
}

#[derive(Debug, Clone)]
pub struct RetentionConfig {
    pub enabled: bool,
    pub retention_days: u32,
    pub sweep_interval: Duration,
}

#[derive(Debug, Clone)]
pub struct AccountExportsConfig {
    pub page_size: u32,
}

impl Config {
    /// Checks values that have no safe interpretation when out of range.
    pub fn validate(&self) -> AppResult<()> {
        self.poll.validate()?;
        self.artifact.validate()?;
        if i64::from(self.retention.retention_days) > MAX_CONFIG_DAYS || self.retention.retention_days == 0 {
            return Err(AppError::validation(
                "retention_days",
                format!("must be between 1 and {MAX_CONFIG_DAYS}, got {}", self.retention.retention_days),
            ));
        }
        Ok(())
    }
}

/// Parses a day count, keeping `default` when the value is missing, malformed
/// or outside `1..=MAX_CONFIG_DAYS`.
fn parse_days(raw: Option<String>, default: i64) -> i64 {
    raw.and_then(|s| s.trim().parse::<i64>().ok())
        .filter(|days| (1..=MAX_CONFIG_DAYS).contains(days))
        .unwrap_or(default)
}

impl Default for Config {
    fn default() -> Self {
        let parse_env_var = |key: &str, default: &str| -> String {
            std::env::var(key).unwrap_or_else(|_| default.to_string())
        };

        let parse_env_number = |key: &str, default: u64| -> u64 {
            std::env::var(key)
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(default)
        };

        let parse_env_float = |key: &str, default: f64| -> f64 {
            std::env::var(key)
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(default)
        };

        let parse_env_bool = |key: &str, default: bool| -> bool {
            parse_env_var(key, if default { "true" } else { "false" }).to_lowercase() == "true"
        };

        let parse_env_millis = |key: &str, default_ms: u64| -> Duration {
            Duration::from_millis(parse_env_number(key, default_ms))
        };

        let defaults = PollPolicy::default();
        let retry_defaults = RetryConfig::default();

        Config {
            poll: PollPolicy {
                initial_interval: parse_env_millis("MAILEXPORT_POLL_INITIAL_MS", defaults.initial_interval.as_millis() as u64),
                max_interval: parse_env_millis("MAILEXPORT_POLL_MAX_INTERVAL_MS", defaults.max_interval.as_millis() as u64),
                backoff_multiplier: parse_env_float("MAILEXPORT_POLL_BACKOFF", defaults.backoff_multiplier),
                max_total_wait: parse_env_millis("MAILEXPORT_POLL_MAX_WAIT_MS", defaults.max_total_wait.as_millis() as u64),
            },
            retry: RetryConfig {
                max_attempts: parse_env_number("MAILEXPORT_RETRY_ATTEMPTS", retry_defaults.max_attempts as u64).clamp(1, 10) as u32,
                base_delay: parse_env_millis("MAILEXPORT_RETRY_BASE_MS", retry_defaults.base_delay.as_millis() as u64),
                max_delay: parse_env_millis("MAILEXPORT_RETRY_MAX_MS", retry_defaults.max_delay.as_millis() as u64),
                backoff_multiplier: retry_defaults.backoff_multiplier,
            },
            transport: TransportConfig {
                max_concurrent_requests: parse_env_number("MAILEXPORT_MAX_CONCURRENT_REQUESTS", 8) as usize,
                request_timeout: parse_env_millis("MAILEXPORT_REQUEST_TIMEOUT_MS", 30_000),
            },
            allowlist: AllowListConfig {
                email_normalization: match parse_env_var("MAILEXPORT_EMAIL_NORMALIZATION", "preserve").to_lowercase().as_str() {
                    "lowercase" => EmailNormalization::Lowercase,
                    _ => EmailNormalization::Preserve,
                },
                cache_enabled: parse_env_bool("MAILEXPORT_ALLOWLIST_CACHE", false),
            },
            artifact: ArtifactConfig {
                validity_days: parse_days(std::env::var("MAILEXPORT_ARTIFACT_VALIDITY_DAYS").ok(), ARTIFACT_VALIDITY_DAYS),
                require_https: parse_env_bool("MAILEXPORT_ARTIFACT_REQUIRE_HTTPS", true),
            },
            retention: RetentionConfig {
                enabled: parse_env_bool("MAILEXPORT_RETENTION_ENABLED", true),
                retention_days: parse_days(std::env::var("MAILEXPORT_RETENTION_DAYS").ok(), 120) as u32,
                sweep_interval: Duration::from_secs(parse_env_number("MAILEXPORT_SWEEP_INTERVAL_SECS", 3600)),
            },
            account_exports: AccountExportsConfig {
                page_size: parse_env_number("MAILEXPORT_ACCOUNT_EXPORTS_PAGE_SIZE", 100).clamp(1, 1000) as u32,
            },
        }
    }
}

pub fn load_config() -> Config {
    Config::default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_and_caps() {
        let policy = PollPolicy::from_millis(100, 1000, 2.0, 5000);
        let mut interval = policy.initial_interval;
        let mut seen = Vec::new();
        for _ in 0..5 {
            seen.push(interval.as_millis());
            interval = policy.next_interval(interval);
        }
        assert_eq!(seen, vec![100, 200, 400, 800, 1000]);
    }

    #[test]
    fn rejects_shrinking_backoff() {
        let policy = PollPolicy::from_millis(100, 1000, 0.5, 5000);
        assert!(matches!(policy.validate(), Err(AppError::Validation { .. })));
    }

    #[test]
    fn rejects_max_below_initial() {
        let policy = PollPolicy::from_millis(500, 100, 2.0, 5000);
        assert!(policy.validate().is_err());
        assert!(PollPolicy::from_millis(100, 1000, 2.0, 0).validate().is_ok());
    }

    #[test]
    fn lowercase_normalization_trims() {
        assert_eq!(EmailNormalization::Lowercase.apply("  Ada@Example.COM "), "ada@example.com");
        assert_eq!(EmailNormalization::Preserve.apply("Ada@Example.COM"), "Ada@Example.COM");
    }

    #[test]
    fn defaults_carry_ninety_day_window() {
        let config = Config::default();
        assert_eq!(config.artifact.validity().num_days(), 90);
        assert!(config.poll.validate().is_ok());
    }

    #[test]
    fn day_counts_outside_range_keep_default() {
        assert_eq!(parse_days(Some("30".into()), 90), 30);
        assert_eq!(parse_days(Some("18446744073709551615".into()), 90), 90);
        assert_eq!(parse_days(Some("999999999999999".into()), 90), 90);
        assert_eq!(parse_days(Some("-1".into()), 90), 90);
        assert_eq!(parse_days(Some("0".into()), 90), 90);
        assert_eq!(parse_days(Some("ninety".into()), 90), 90);
        assert_eq!(parse_days(None, 90), 90);
    }

    #[test]
    fn invalid_validity_is_rejected_and_never_panics() {
        for days in [-1, 0, 999_999_999_999_999, i64::MAX, i64::MIN] {
            let artifact = ArtifactConfig {
                validity_days: days,
                require_https: true,
            };
            assert!(matches!(artifact.validate(), Err(AppError::Validation { .. })));
            assert_eq!(artifact.validity().num_days(), ARTIFACT_VALIDITY_DAYS);
        }
    }
}
