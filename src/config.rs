//! Runtime configuration
//!
//! [`LedgerConfig`] is loaded from a TOML file (every field optional) and then
//! overridden by command-line flags. [`BankConfig::new`] sanitizes timer values
//! and logs a warning for every value it has to correct.
//!
//! ```toml
//! identity_format = "teamspeak"
//!
//! [backend]
//! kind = "sled"
//! path = "ledger.sled"
//!
//! [bank]
//! flush_interval_ms = 1000
//! max_flush_wait_ms = 10000
//!
//! [bank.retry]
//! max_retries = 5
//!
//! [currency]
//! name = "Coins"
//! sign = "$"
//! ```

use crate::store::BackendConfig;
use crate::types::{IdentityFormat, LedgerError, LedgerResult};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Bounded exponential backoff for failed flushes
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Retries after the first failed attempt
    pub max_retries: u32,
    pub base_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            base_backoff_ms: 200,
            max_backoff_ms: 30_000,
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (1-based)
    ///
    /// Doubles from `base_backoff_ms` and saturates at `max_backoff_ms`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u64.checked_shl(attempt.saturating_sub(1)).unwrap_or(u64::MAX);
        let millis = self
            .base_backoff_ms
            .saturating_mul(factor)
            .min(self.max_backoff_ms);
        Duration::from_millis(millis)
    }
}

/// Timer settings of the bank and the nickname coalescer
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BankConfig {
    /// Quiet period before queued wallets are flushed; `0` disables caching
    pub flush_interval_ms: u64,
    /// Upper bound between the first queued mutation and its flush
    pub max_flush_wait_ms: u64,
    /// Quiet period before queued nicknames are written
    pub nickname_quiet_ms: u64,
    pub retry: RetryPolicy,
}

impl Default for BankConfig {
    fn default() -> Self {
        Self {
            flush_interval_ms: 1000,
            max_flush_wait_ms: 10_000,
            nickname_quiet_ms: 500,
            retry: RetryPolicy::default(),
        }
    }
}

impl BankConfig {
    /// Create a new BankConfig with custom values
    ///
    /// # Arguments
    ///
    /// * `flush_interval_ms` - Debounce quiet period, `0` for write-through
    /// * `max_flush_wait_ms` - Ceiling for continuous activity; raised to the
    ///   interval when it is smaller
    /// * `nickname_quiet_ms` - Nickname debounce quiet period; `0` falls back to
    ///   the default
    /// * `retry` - Backoff policy for failed flushes
    ///
    /// # Returns
    ///
    /// A sanitized `BankConfig`. Every corrected value is logged as a warning.
    pub fn new(
        flush_interval_ms: u64,
        max_flush_wait_ms: u64,
        nickname_quiet_ms: u64,
        retry: RetryPolicy,
    ) -> Self {
        let default = Self::default();

        let max_flush_wait_ms = if max_flush_wait_ms < flush_interval_ms {
            tracing::warn!(
                max_flush_wait_ms,
                flush_interval_ms,
                "max flush wait below flush interval, raising it to the interval"
            );
            flush_interval_ms
        } else {
            max_flush_wait_ms
        };

        let nickname_quiet_ms = if nickname_quiet_ms == 0 {
            tracing::warn!(
                default = default.nickname_quiet_ms,
                "invalid nickname quiet period (0), using default"
            );
            default.nickname_quiet_ms
        } else {
            nickname_quiet_ms
        };

        let retry = if retry.max_backoff_ms < retry.base_backoff_ms {
            tracing::warn!(
                base_backoff_ms = retry.base_backoff_ms,
                max_backoff_ms = retry.max_backoff_ms,
                "max backoff below base backoff, raising it to the base"
            );
            RetryPolicy {
                max_backoff_ms: retry.base_backoff_ms,
                ..retry
            }
        } else {
            retry
        };

        Self {
            flush_interval_ms,
            max_flush_wait_ms,
            nickname_quiet_ms,
            retry,
        }
    }

    /// Re-run the sanitizer over a deserialized value
    pub fn sanitized(self) -> Self {
        Self::new(
            self.flush_interval_ms,
            self.max_flush_wait_ms,
            self.nickname_quiet_ms,
            self.retry,
        )
    }

    /// Whether wallets are cached between flushes
    pub fn caching_enabled(&self) -> bool {
        self.flush_interval_ms > 0
    }

    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }

    pub fn max_flush_wait(&self) -> Duration {
        Duration::from_millis(self.max_flush_wait_ms)
    }

    pub fn nickname_quiet(&self) -> Duration {
        Duration::from_millis(self.nickname_quiet_ms)
    }
}

/// Currency labels used when printing amounts
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CurrencyConfig {
    pub name: String,
    pub sign: String,
}

impl Default for CurrencyConfig {
    fn default() -> Self {
        Self {
            name: "Coins".to_string(),
            sign: "$".to_string(),
        }
    }
}

impl CurrencyConfig {
    /// Format an amount with the currency sign, e.g. `1500$`
    pub fn format(&self, amount: impl std::fmt::Display) -> String {
        format!("{}{}", amount, self.sign)
    }
}

/// Top-level configuration
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    pub backend: BackendConfig,
    pub identity_format: IdentityFormat,
    pub bank: BankConfig,
    pub currency: CurrencyConfig,
}

impl LedgerConfig {
    /// Parse a TOML document
    pub fn from_toml_str(source: &str) -> LedgerResult<Self> {
        let mut config: LedgerConfig = toml::from_str(source)?;
        config.bank = config.bank.sanitized();
        Ok(config)
    }

    /// Load a TOML file
    pub fn load(path: &Path) -> LedgerResult<Self> {
        let source = std::fs::read_to_string(path).map_err(|e| LedgerError::Config {
            message: format!("cannot read {}: {}", path.display(), e),
        })?;
        Self::from_toml_str(&source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = LedgerConfig::default();
        assert_eq!(config.backend, BackendConfig::Memory);
        assert_eq!(config.identity_format, IdentityFormat::Teamspeak);
        assert_eq!(config.bank.flush_interval(), Duration::from_millis(1000));
        assert_eq!(config.bank.nickname_quiet(), Duration::from_millis(500));
        assert!(config.bank.caching_enabled());
        assert_eq!(config.currency.format(1500), "1500$");
    }

    #[rstest]
    #[case::ceiling_below_interval(2000, 500, 2000)]
    #[case::ceiling_equal(2000, 2000, 2000)]
    #[case::ceiling_above(1000, 10_000, 10_000)]
    #[case::write_through(0, 0, 0)]
    fn test_max_wait_sanitized(#[case] interval: u64, #[case] max_wait: u64, #[case] expected: u64) {
        let config = BankConfig::new(interval, max_wait, 500, RetryPolicy::default());
        assert_eq!(config.max_flush_wait_ms, expected);
    }

    #[test]
    fn test_zero_nickname_quiet_uses_default() {
        let config = BankConfig::new(1000, 1000, 0, RetryPolicy::default());
        assert_eq!(config.nickname_quiet_ms, 500);
    }

    #[rstest]
    #[case::first(1, 100)]
    #[case::second(2, 200)]
    #[case::third(3, 400)]
    #[case::capped(10, 1000)]
    #[case::huge_attempt(200, 1000)]
    fn test_backoff(#[case] attempt: u32, #[case] expected_ms: u64) {
        let policy = RetryPolicy {
            max_retries: 10,
            base_backoff_ms: 100,
            max_backoff_ms: 1000,
        };
        assert_eq!(policy.backoff(attempt), Duration::from_millis(expected_ms));
    }

    #[test]
    fn test_partial_toml() {
        let config = LedgerConfig::from_toml_str(
            r#"
            identity_format = "discord"

            [backend]
            kind = "sled"
            path = "data/ledger"

            [bank]
            flush_interval_ms = 250
            max_flush_wait_ms = 100

            [currency]
            sign = "€"
            "#,
        )
        .unwrap();

        assert_eq!(config.identity_format, IdentityFormat::Discord);
        assert_eq!(
            config.backend,
            BackendConfig::Sled {
                path: "data/ledger".into()
            }
        );
        assert_eq!(config.bank.flush_interval_ms, 250);
        assert_eq!(config.bank.max_flush_wait_ms, 250);
        assert_eq!(config.bank.retry, RetryPolicy::default());
        assert_eq!(config.currency.name, "Coins");
        assert_eq!(config.currency.sign, "€");
    }

    #[test]
    fn test_invalid_toml_is_config_error() {
        let result = LedgerConfig::from_toml_str("bank = 5");
        assert!(matches!(result, Err(LedgerError::Config { .. })));
    }

    #[test]
    fn test_load_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[backend]\nkind = \"memory\"").unwrap();
        let config = LedgerConfig::load(file.path()).unwrap();
        assert_eq!(config.backend, BackendConfig::Memory);
    }

    #[test]
    fn test_load_missing_file() {
        let result = LedgerConfig::load(Path::new("/definitely/not/here.toml"));
        assert!(matches!(result, Err(LedgerError::Config { .. })));
    }
}
