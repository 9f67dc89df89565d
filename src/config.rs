use config::{Config, ConfigError, Environment, File};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::path::Path;

use crate::domain::LegSpec;

/// Main configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub market: MarketConfig,
    pub pool: PoolConfig,
    pub strategy: StrategyConfig,
    #[serde(default)]
    pub monitor: MonitorConfig,
    pub database: DatabaseConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MarketConfig {
    /// Exchange name used for logging and price lookups
    pub exchange: String,
    /// Price endpoint template; `{pair}` is substituted with the pair symbol
    pub price_url: String,
    /// Decimal places accepted for prices
    #[serde(default = "default_price_precision")]
    pub price_precision: u32,
    /// Decimal places accepted for amounts
    #[serde(default = "default_amount_precision")]
    pub amount_precision: u32,
}

fn default_price_precision() -> u32 {
    2
}

fn default_amount_precision() -> u32 {
    4
}

/// Execution-pool bounds: how many Live groups one owner may hold
#[derive(Debug, Clone, Deserialize)]
pub struct PoolConfig {
    #[serde(default = "default_max_open_groups")]
    pub max_open_groups: u32,
}

fn default_max_open_groups() -> u32 {
    10
}

#[derive(Debug, Clone, Deserialize)]
pub struct StrategyConfig {
    /// DCA ladder expanded into one leg per rung on every admitted signal
    pub ladder: Vec<LegSpec>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MonitorConfig {
    /// Take-profit monitor cadence (seconds)
    #[serde(default = "default_tp_interval")]
    pub take_profit_interval_secs: u64,
    /// Risk offset engine cadence (seconds); deliberately slower than
    /// the take-profit monitor
    #[serde(default = "default_risk_interval")]
    pub risk_interval_secs: u64,
    /// Groups above this PnL are never selected for a risk offset
    #[serde(default = "default_loss_threshold")]
    pub loss_threshold_percent: Decimal,
}

fn default_tp_interval() -> u64 {
    10
}

fn default_risk_interval() -> u64 {
    60
}

fn default_loss_threshold() -> Decimal {
    Decimal::from(-5)
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            take_profit_interval_secs: default_tp_interval(),
            risk_interval_secs: default_risk_interval(),
            loss_threshold_percent: default_loss_threshold(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL
    pub url: String,
    /// Maximum connections in pool
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_max_connections() -> u32 {
    5
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Enable JSON formatted logs
    #[serde(default)]
    pub json: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

impl AppConfig {
    /// Load configuration from files and environment
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from("config")
    }

    /// Load configuration from a specific directory
    pub fn load_from<P: AsRef<Path>>(config_dir: P) -> Result<Self, ConfigError> {
        let config_dir = config_dir.as_ref();

        let builder = Config::builder()
            // Start with default values
            .set_default("logging.level", "info")?
            .set_default("logging.json", false)?
            .set_default("pool.max_open_groups", 10)?
            .set_default("database.max_connections", 5)?
            // Load default config file
            .add_source(File::from(config_dir.join("default.toml")).required(false))
            // Load environment-specific config (e.g., config/production.toml)
            .add_source(
                File::from(config_dir.join(
                    std::env::var("GRIDPOOL_ENV").unwrap_or_else(|_| "development".to_string()),
                ))
                .required(false),
            )
            // Override with environment variables (GRIDPOOL_DATABASE__URL, etc.)
            .add_source(
                Environment::with_prefix("GRIDPOOL")
                    .separator("__")
                    .try_parsing(true),
            );

        builder.build()?.try_deserialize()
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.pool.max_open_groups == 0 {
            errors.push("pool.max_open_groups must be at least 1".to_string());
        }

        if self.strategy.ladder.is_empty() {
            errors.push("strategy.ladder must have at least one rung".to_string());
        }

        for (i, rung) in self.strategy.ladder.iter().enumerate() {
            if rung.capital_weight <= Decimal::ZERO {
                errors.push(format!("ladder rung {i}: capital_weight must be positive"));
            }
            if rung.tp_target <= Decimal::ZERO {
                errors.push(format!("ladder rung {i}: tp_target must be positive"));
            }
            if rung.price_gap <= Decimal::from(-1) {
                errors.push(format!("ladder rung {i}: price_gap must be greater than -1"));
            }
        }

        if self.monitor.take_profit_interval_secs == 0 || self.monitor.risk_interval_secs == 0 {
            errors.push("monitor intervals must be non-zero".to_string());
        }

        if self.monitor.loss_threshold_percent >= Decimal::ZERO {
            errors.push("monitor.loss_threshold_percent must be negative".to_string());
        }

        if !self.market.price_url.contains("{pair}") {
            errors.push("market.price_url must contain a {pair} placeholder".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn sample_config() -> AppConfig {
        AppConfig {
            market: MarketConfig {
                exchange: "binance".to_string(),
                price_url: "https://api.binance.com/api/v3/ticker/price?symbol={pair}".to_string(),
                price_precision: 2,
                amount_precision: 4,
            },
            pool: PoolConfig { max_open_groups: 10 },
            strategy: StrategyConfig {
                ladder: vec![
                    LegSpec::new(dec!(0), dec!(0.2), dec!(0.01)),
                    LegSpec::new(dec!(-0.005), dec!(0.2), dec!(0.005)),
                ],
            },
            monitor: MonitorConfig::default(),
            database: DatabaseConfig {
                url: "postgres://localhost/gridpool".to_string(),
                max_connections: 5,
            },
            logging: LoggingConfig::default(),
        }
    }

    #[test]
    fn valid_config_passes() {
        assert!(sample_config().validate().is_ok());
    }

    #[test]
    fn zero_capacity_rejected() {
        let mut cfg = sample_config();
        cfg.pool.max_open_groups = 0;
        let errors = cfg.validate().unwrap_err();
        assert!(errors.iter().any(|e| e.contains("max_open_groups")));
    }

    #[test]
    fn empty_ladder_rejected() {
        let mut cfg = sample_config();
        cfg.strategy.ladder.clear();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn positive_loss_threshold_rejected() {
        let mut cfg = sample_config();
        cfg.monitor.loss_threshold_percent = dec!(5);
        let errors = cfg.validate().unwrap_err();
        assert!(errors.iter().any(|e| e.contains("loss_threshold_percent")));
    }
}
