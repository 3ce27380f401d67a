use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub telegram: TelegramConfig,
    pub marketplace: MarketplaceConfig,
    pub database: DatabaseConfig,
    pub watcher: WatcherConfig,
    pub monitoring: MonitoringConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TelegramConfig {
    pub bot_token: String,
    pub api_base: String,
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MarketplaceConfig {
    pub base_url: String,
    pub user_agent: String,
    pub accept_language: String,
    pub request_timeout_secs: u64,
    pub page_size: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub sqlite_path: String,
}

/// Every tunable of the polling engine.
#[derive(Debug, Clone, Deserialize)]
pub struct WatcherConfig {
    pub poll_interval_secs: u64,
    pub poll_jitter_secs: u64,
    pub poll_noise_secs: u64,
    pub account_delay_min_secs: u64,
    pub account_delay_max_secs: u64,
    pub retry_max_attempts: u32,
    pub retry_base_delay_secs: u64,
    pub retry_jitter_min_secs: u64,
    pub retry_jitter_max_secs: u64,
    pub error_threshold: u32,
    pub cooldown_secs: u64,
    pub dequeue_timeout_ms: u64,
    pub drain_timeout_secs: u64,
    pub shutdown_timeout_secs: u64,
    /// Offset used to render pickup windows and the Today/Tomorrow label.
    pub display_utc_offset_minutes: i32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MonitoringConfig {
    pub health_port: u16,
    pub log_level: String,
    pub log_dir: Option<PathBuf>,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 900,
            poll_jitter_secs: 120,
            poll_noise_secs: 10,
            account_delay_min_secs: 20,
            account_delay_max_secs: 40,
            retry_max_attempts: 3,
            retry_base_delay_secs: 5,
            retry_jitter_min_secs: 1,
            retry_jitter_max_secs: 5,
            error_threshold: 5,
            cooldown_secs: 3600,
            dequeue_timeout_ms: 1000,
            drain_timeout_secs: 5,
            shutdown_timeout_secs: 30,
            display_utc_offset_minutes: chrono::Local::now().offset().local_minus_utc() / 60,
        }
    }
}

impl WatcherConfig {
    pub fn account_delay(&self) -> (Duration, Duration) {
        (
            Duration::from_secs(self.account_delay_min_secs),
            Duration::from_secs(self.account_delay_max_secs),
        )
    }

    pub fn dequeue_timeout(&self) -> Duration {
        Duration::from_millis(self.dequeue_timeout_ms)
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_secs(self.drain_timeout_secs)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }

    pub fn validate(&self) -> Result<()> {
        if self.account_delay_min_secs > self.account_delay_max_secs {
            bail!(
                "ACCOUNT_DELAY_MIN_SECS ({}) exceeds ACCOUNT_DELAY_MAX_SECS ({})",
                self.account_delay_min_secs,
                self.account_delay_max_secs
            );
        }
        if self.retry_jitter_min_secs > self.retry_jitter_max_secs {
            bail!(
                "RETRY_JITTER_MIN_SECS ({}) exceeds RETRY_JITTER_MAX_SECS ({})",
                self.retry_jitter_min_secs,
                self.retry_jitter_max_secs
            );
        }
        if self.retry_max_attempts == 0 {
            bail!("RETRY_MAX_ATTEMPTS must be at least 1");
        }
        if self.error_threshold == 0 {
            bail!("ERROR_THRESHOLD must be at least 1");
        }
        Ok(())
    }
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|value| value.trim().parse().ok())
        .unwrap_or(default)
}

fn env_string(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();

        let bot_token =
            env::var("TELEGRAM_BOT_TOKEN").context("TELEGRAM_BOT_TOKEN must be set")?;

        let defaults = WatcherConfig::default();
        let watcher = WatcherConfig {
            poll_interval_secs: env_or("POLL_INTERVAL_SECS", defaults.poll_interval_secs),
            poll_jitter_secs: env_or("POLL_JITTER_SECS", defaults.poll_jitter_secs),
            poll_noise_secs: env_or("POLL_NOISE_SECS", defaults.poll_noise_secs),
            account_delay_min_secs: env_or(
                "ACCOUNT_DELAY_MIN_SECS",
                defaults.account_delay_min_secs,
            ),
            account_delay_max_secs: env_or(
                "ACCOUNT_DELAY_MAX_SECS",
                defaults.account_delay_max_secs,
            ),
            retry_max_attempts: env_or("RETRY_MAX_ATTEMPTS", defaults.retry_max_attempts),
            retry_base_delay_secs: env_or("RETRY_BASE_DELAY_SECS", defaults.retry_base_delay_secs),
            retry_jitter_min_secs: env_or("RETRY_JITTER_MIN_SECS", defaults.retry_jitter_min_secs),
            retry_jitter_max_secs: env_or("RETRY_JITTER_MAX_SECS", defaults.retry_jitter_max_secs),
            error_threshold: env_or("ERROR_THRESHOLD", defaults.error_threshold),
            cooldown_secs: env_or("COOLDOWN_SECS", defaults.cooldown_secs),
            dequeue_timeout_ms: env_or("DEQUEUE_TIMEOUT_MS", defaults.dequeue_timeout_ms),
            drain_timeout_secs: env_or("DRAIN_TIMEOUT_SECS", defaults.drain_timeout_secs),
            shutdown_timeout_secs: env_or("SHUTDOWN_TIMEOUT_SECS", defaults.shutdown_timeout_secs),
            display_utc_offset_minutes: env_or(
                "DISPLAY_UTC_OFFSET_MINUTES",
                defaults.display_utc_offset_minutes,
            ),
        };
        watcher.validate()?;

        Ok(Config {
            telegram: TelegramConfig {
                bot_token,
                api_base: env_string("TELEGRAM_API_BASE", "https://api.telegram.org"),
                request_timeout_secs: env_or("TELEGRAM_TIMEOUT_SECS", 30),
            },
            marketplace: MarketplaceConfig {
                base_url: env_string("TGTG_BASE_URL", "https://apptoogoodtogo.com/api/"),
                user_agent: env_string(
                    "TGTG_USER_AGENT",
                    "TGTG/24.11.0 Dalvik/2.1.0 (Linux; U; Android 14; Pixel 7 Build/UQ1A.240105.004)",
                ),
                accept_language: env_string("TGTG_ACCEPT_LANGUAGE", "en-GB"),
                request_timeout_secs: env_or("TGTG_TIMEOUT_SECS", 30),
                page_size: env_or("TGTG_PAGE_SIZE", 400),
            },
            database: DatabaseConfig {
                sqlite_path: env_string("DATABASE_PATH", "database/bargain_bites.db"),
            },
            watcher,
            monitoring: MonitoringConfig {
                health_port: env_or("HEALTH_PORT", 3000),
                log_level: env_string("LOG_LEVEL", "info"),
                log_dir: match env::var("LOG_DIR") {
                    Ok(dir) if dir.is_empty() => None,
                    Ok(dir) => Some(PathBuf::from(dir)),
                    Err(_) => Some(PathBuf::from("logs")),
                },
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_pacing_is_non_zero() {
        let config = WatcherConfig::default();
        let (min, max) = config.account_delay();
        assert!(min > Duration::ZERO);
        assert!(max >= min);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_inverted_ranges() {
        let config = WatcherConfig {
            account_delay_min_secs: 50,
            account_delay_max_secs: 10,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = WatcherConfig {
            retry_jitter_min_secs: 9,
            retry_jitter_max_secs: 1,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_attempts() {
        let config = WatcherConfig {
            retry_max_attempts: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
