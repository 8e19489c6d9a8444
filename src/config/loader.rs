//! Configuration loader

use config::{Config, Environment, File};
use std::path::Path;

use super::types::{AppConfig, AppSettings, DerivConfig, TradingConfig};
use crate::common::errors::{ClientError, Result};

/// Load configuration from file and environment variables
///
/// Priority (highest to lowest):
/// 1. `DERIV_APP_ID`, `DERIV_API_TOKEN`, `DERIV_WS_URL`, `DERIV_SYMBOL`
/// 2. Environment variables prefixed with `APP__` (e.g. `APP__TRADING__TAKE_PROFIT`)
/// 3. Configuration file (TOML format)
/// 4. Default values
pub fn load_config(config_path: Option<&str>) -> Result<AppConfig> {
    let mut builder = Config::builder();

    // Add default config file if it exists
    if let Some(path) = config_path {
        if Path::new(path).exists() {
            builder = builder.add_source(File::with_name(path).required(false));
        }
    }

    // Add environment variables with APP__ prefix
    builder = builder.add_source(
        Environment::with_prefix("APP")
            .prefix_separator("__")
            .separator("__")
            .try_parsing(true),
    );

    // Deriv's conventional variable names
    for (key, var) in DERIV_ENV_OVERRIDES {
        builder = builder
            .set_override_option(key, std::env::var(var).ok())
            .map_err(|e| ClientError::Configuration(e.to_string()))?;
    }

    let config = builder
        .build()
        .map_err(|e| ClientError::Configuration(e.to_string()))?;

    config
        .try_deserialize()
        .map_err(|e| ClientError::Configuration(e.to_string()))
}

const DERIV_ENV_OVERRIDES: [(&str, &str); 4] = [
    ("deriv.app_id", "DERIV_APP_ID"),
    ("deriv.api_token", "DERIV_API_TOKEN"),
    ("deriv.websocket_url", "DERIV_WS_URL"),
    ("deriv.symbol", "DERIV_SYMBOL"),
];

/// Load configuration from environment variables only
pub fn load_from_env() -> Result<AppConfig> {
    // Try to load from .env file
    dotenvy::dotenv().ok();

    let defaults = DerivConfig::default();
    let deriv_config = DerivConfig {
        app_id: std::env::var("DERIV_APP_ID").unwrap_or(defaults.app_id),
        api_token: std::env::var("DERIV_API_TOKEN").ok(),
        websocket_url: std::env::var("DERIV_WS_URL").unwrap_or(defaults.websocket_url),
        symbol: std::env::var("DERIV_SYMBOL").unwrap_or(defaults.symbol),
    };

    Ok(AppConfig {
        deriv: deriv_config,
        trading: TradingConfig::default(),
        settings: AppSettings::default(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::types::{LevelPolicy, SignalConfig};
    use rust_decimal_macros::dec;
    use std::io::Write;

    #[test]
    fn test_load_toml_file() {
        let dir = std::env::temp_dir().join(format!("deriv_trader_cfg_{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(
            file,
            r#"
[deriv]
symbol = "R_50"

[trading]
stake_table = []
base_stake = 1
multiplier = 2
max_level = 3
level_policy = "clamp"
take_profit = 2.5

[trading.signal]
kind = "tick_trend"
run_length = 4
"#
        )
        .unwrap();

        let config = load_config(path.to_str()).unwrap();
        assert_eq!(config.deriv.symbol, "R_50");
        assert!(config.trading.stake_table.is_empty());
        assert_eq!(config.trading.base_stake, dec!(1));
        assert_eq!(config.trading.level_policy, LevelPolicy::Clamp);
        assert_eq!(config.trading.take_profit, dec!(2.5));
        assert_eq!(config.trading.signal, SignalConfig::TickTrend { run_length: 4 });

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_missing_file_falls_back_to_defaults() {
        let config = load_config(Some("does/not/exist.toml")).unwrap();
        assert_eq!(config.deriv.app_id, "1089");
        assert_eq!(config.trading.min_trade_interval_ms, 2000);
    }
}
