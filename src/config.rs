use std::net::SocketAddr;
use std::time::Duration;

use crate::domain::entities::bot::{BotConfig, BotMode, MAX_LIMIT_OFFSET_PCT};
use crate::infrastructure::alpaca_client::{AlpacaConfig, MARKET_DATA_URL, PAPER_TRADING_URL};
use crate::secrets::{BrokerCredentials, SecretError};

pub const DEFAULT_DATABASE_URL: &str = "sqlite://data/papertrader.db";
pub const DEFAULT_BIND_ADDR: &str = "127.0.0.1:3000";
pub const DEFAULT_API_REQUESTS_PER_MINUTE: u32 = 60;
pub const DEFAULT_ASSET_CACHE_TTL_HOURS: u64 = 24;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing credentials: {0}")]
    Credentials(#[from] SecretError),

    #[error("Invalid bot configuration: {0}")]
    InvalidBotConfig(String),
}

/// Process-level settings
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub alpaca: AlpacaConfig,
    pub database_url: String,
    pub bind_addr: SocketAddr,
    pub api_requests_per_minute: u32,
    pub asset_cache_ttl: Duration,
}

fn env_lookup(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn default_bind_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 3000))
}

impl AppConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<AppConfig, ConfigError> {
        let credentials = BrokerCredentials::from_env()?;
        Ok(Self::from_vars(credentials, env_lookup))
    }

    /// Build from an arbitrary variable source. Invalid values warn and keep defaults.
    pub fn from_vars<F>(credentials: BrokerCredentials, get: F) -> AppConfig
    where
        F: Fn(&str) -> Option<String>,
    {
        let trading_url = get("ALPACA_BASE_URL").unwrap_or_else(|| PAPER_TRADING_URL.to_string());
        let data_url = get("ALPACA_DATA_URL").unwrap_or_else(|| MARKET_DATA_URL.to_string());
        if !trading_url.contains("paper-api") {
            tracing::warn!(
                trading_url = %trading_url,
                "ALPACA_BASE_URL is not a paper trading endpoint"
            );
        }

        let database_url =
            get("DATABASE_URL").unwrap_or_else(|| DEFAULT_DATABASE_URL.to_string());

        let bind_addr = match get("BIND_ADDR") {
            Some(raw) => match raw.parse::<SocketAddr>() {
                Ok(addr) => addr,
                Err(e) => {
                    tracing::warn!(
                        "Invalid BIND_ADDR '{}': {}, using default: {}",
                        raw,
                        e,
                        DEFAULT_BIND_ADDR
                    );
                    default_bind_addr()
                }
            },
            None => default_bind_addr(),
        };

        let mut api_requests_per_minute = DEFAULT_API_REQUESTS_PER_MINUTE;
        if let Some(raw) = get("API_REQUESTS_PER_MINUTE") {
            match raw.parse::<u32>() {
                Ok(value) if (1..=10_000).contains(&value) => api_requests_per_minute = value,
                _ => tracing::warn!(
                    "Invalid API_REQUESTS_PER_MINUTE value: {} (must be 1-10000), using default: {}",
                    raw,
                    api_requests_per_minute
                ),
            }
        }

        let mut ttl_hours = DEFAULT_ASSET_CACHE_TTL_HOURS;
        if let Some(raw) = get("ASSET_CACHE_TTL_HOURS") {
            match raw.parse::<u64>() {
                Ok(value) if (1..=168).contains(&value) => ttl_hours = value,
                _ => tracing::warn!(
                    "Invalid ASSET_CACHE_TTL_HOURS value: {} (must be 1-168), using default: {}",
                    raw,
                    ttl_hours
                ),
            }
        }

        AppConfig {
            alpaca: AlpacaConfig {
                trading_url,
                data_url,
                credentials,
            },
            database_url,
            bind_addr,
            api_requests_per_minute,
            asset_cache_ttl: Duration::from_secs(ttl_hours * 3600),
        }
    }
}

fn parse_fraction(get: &impl Fn(&str) -> Option<String>, key: &str, current: f64) -> f64 {
    match get(key) {
        Some(raw) => match raw.parse::<f64>() {
            Ok(value) if value > 0.0 && value <= 1.0 => value,
            Ok(value) => {
                tracing::warn!(
                    "Invalid {} value: {} (must be in (0, 1]), using default: {}",
                    key,
                    value,
                    current
                );
                current
            }
            Err(e) => {
                tracing::warn!(
                    "Failed to parse {} '{}': {}, using default: {}",
                    key,
                    raw,
                    e,
                    current
                );
                current
            }
        },
        None => current,
    }
}

impl BotConfig {
    /// Mode preset from `BOT_MODE`, then individual overrides
    pub fn from_env() -> BotConfig {
        Self::from_vars(env_lookup)
    }

    pub fn from_vars<F>(get: F) -> BotConfig
    where
        F: Fn(&str) -> Option<String>,
    {
        let mode = match get("BOT_MODE") {
            Some(raw) => BotMode::parse(&raw).unwrap_or_else(|| {
                tracing::warn!("Invalid BOT_MODE '{}', using default: BALANCED", raw);
                BotMode::Balanced
            }),
            None => BotMode::Balanced,
        };
        let mut config = BotConfig::for_mode(mode);

        config.risk_management.min_confidence =
            parse_fraction(&get, "MIN_CONFIDENCE", config.risk_management.min_confidence);
        config.risk_management.max_position_pct =
            parse_fraction(&get, "MAX_POSITION_PCT", config.risk_management.max_position_pct);
        config.execution_settings.order_size_pct =
            parse_fraction(&get, "ORDER_SIZE_PCT", config.execution_settings.order_size_pct);

        if let Some(raw) = get("MAX_ORDERS_PER_DAY") {
            match raw.parse::<u32>() {
                Ok(value) if value > 0 && value <= 500 => {
                    config.execution_settings.max_orders_per_day = value;
                }
                _ => tracing::warn!(
                    "Invalid MAX_ORDERS_PER_DAY value: {} (must be 1-500), using default: {}",
                    raw,
                    config.execution_settings.max_orders_per_day
                ),
            }
        }

        if let Some(raw) = get("LIMIT_OFFSET_PCT") {
            match raw.parse::<f64>() {
                Ok(value) if (0.0..=MAX_LIMIT_OFFSET_PCT).contains(&value) => {
                    config.execution_settings.limit_offset_pct = Some(value);
                }
                _ => tracing::warn!(
                    "Invalid LIMIT_OFFSET_PCT value: {} (must be 0-{}), using market orders",
                    raw,
                    MAX_LIMIT_OFFSET_PCT
                ),
            }
        }

        if let Some(raw) = get("AUTO_EXECUTE") {
            config.execution_settings.auto_execute = raw.to_lowercase() == "true" || raw == "1";
        }

        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn vars(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    fn credentials() -> BrokerCredentials {
        BrokerCredentials::new("PKA1B2C3D4E5F6G7H8I9", "abcdefghijklmnopqrstuvwxyz0123456789ABCD")
    }

    #[test]
    fn test_app_config_defaults() {
        let config = AppConfig::from_vars(credentials(), vars(&[]));
        assert_eq!(config.alpaca.trading_url, PAPER_TRADING_URL);
        assert_eq!(config.alpaca.data_url, MARKET_DATA_URL);
        assert_eq!(config.database_url, DEFAULT_DATABASE_URL);
        assert_eq!(config.bind_addr.to_string(), DEFAULT_BIND_ADDR);
        assert_eq!(config.api_requests_per_minute, 60);
        assert_eq!(config.asset_cache_ttl, Duration::from_secs(24 * 3600));
    }

    #[test]
    fn test_app_config_overrides_and_invalid_values() {
        let config = AppConfig::from_vars(
            credentials(),
            vars(&[
                ("DATABASE_URL", "sqlite::memory:"),
                ("BIND_ADDR", "not-an-address"),
                ("API_REQUESTS_PER_MINUTE", "120"),
                ("ASSET_CACHE_TTL_HOURS", "0"),
            ]),
        );
        assert_eq!(config.database_url, "sqlite::memory:");
        assert_eq!(config.bind_addr.to_string(), DEFAULT_BIND_ADDR);
        assert_eq!(config.api_requests_per_minute, 120);
        assert_eq!(config.asset_cache_ttl, Duration::from_secs(24 * 3600));
    }

    #[test]
    fn test_bot_config_from_vars() {
        let config = BotConfig::from_vars(vars(&[
            ("BOT_MODE", "aggressive"),
            ("MIN_CONFIDENCE", "0.7"),
            ("ORDER_SIZE_PCT", "1.5"),
            ("MAX_ORDERS_PER_DAY", "3"),
            ("AUTO_EXECUTE", "false"),
        ]));
        assert_eq!(config.mode, BotMode::Aggressive);
        assert_eq!(config.risk_management.min_confidence, 0.7);
        // Out of range keeps the preset
        assert_eq!(config.execution_settings.order_size_pct, 0.10);
        assert_eq!(config.execution_settings.max_orders_per_day, 3);
        assert!(!config.execution_settings.auto_execute);
    }

    #[test]
    fn test_bot_config_invalid_mode_falls_back() {
        let config = BotConfig::from_vars(vars(&[("BOT_MODE", "yolo")]));
        assert_eq!(config.mode, BotMode::Balanced);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_limit_offset_from_vars() {
        let config = BotConfig::from_vars(vars(&[("LIMIT_OFFSET_PCT", "0.001")]));
        assert_eq!(config.execution_settings.limit_offset_pct, Some(0.001));

        let config = BotConfig::from_vars(vars(&[("LIMIT_OFFSET_PCT", "0.5")]));
        assert_eq!(config.execution_settings.limit_offset_pct, None);
    }
}
