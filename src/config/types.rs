//! Configuration types

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::common::types::DurationUnit;

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Deriv connection configuration
    #[serde(default)]
    pub deriv: DerivConfig,
    /// Strategy and risk parameters
    #[serde(default)]
    pub trading: TradingConfig,
    /// General application settings
    #[serde(default)]
    pub settings: AppSettings,
}

/// Deriv platform configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DerivConfig {
    /// Registered application id sent on connect
    #[serde(default = "default_app_id")]
    pub app_id: String,
    /// API token used to authorize the session
    #[serde(default)]
    pub api_token: Option<String>,
    /// WebSocket URL of the API
    #[serde(default = "default_deriv_ws_url")]
    pub websocket_url: String,
    /// Instrument to trade
    #[serde(default = "default_symbol")]
    pub symbol: String,
}

impl Default for DerivConfig {
    fn default() -> Self {
        Self {
            app_id: default_app_id(),
            api_token: None,
            websocket_url: default_deriv_ws_url(),
            symbol: default_symbol(),
        }
    }
}

fn default_app_id() -> String {
    "1089".to_string()
}

fn default_deriv_ws_url() -> String {
    "wss://ws.binaryws.com/websockets/v3".to_string()
}

fn default_symbol() -> String {
    "R_100".to_string()
}

/// What happens to the stake level after a loss at the level cap
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LevelPolicy {
    /// Restart the progression at level 1
    #[default]
    Wrap,
    /// Stay at the cap level
    Clamp,
    /// No cap, keep climbing
    Uncapped,
}

/// Signal function selection and parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SignalConfig {
    /// A run of odd digits trades EVEN, a run of even digits trades ODD
    ParitySequence {
        #[serde(default = "default_parity_run")]
        run_length: usize,
    },
    /// A run of digits above the barrier trades UNDER, below trades OVER
    OverUnder {
        barrier: u8,
        #[serde(default = "default_parity_run")]
        run_length: usize,
    },
    /// The watched digit just printed, bet it does not repeat
    DigitDiffer { digit: u8 },
    /// Trade MATCH on the most frequent digit in a sliding time window
    DigitFrequency {
        #[serde(default = "default_frequency_window")]
        window_ms: u64,
        #[serde(default = "default_frequency_min_count")]
        min_count: usize,
        /// Contract length in ticks, overriding `trading.duration`
        #[serde(default)]
        duration_ticks: Option<u32>,
    },
    /// Strictly rising prices trade CALL, strictly falling trade PUT
    TickTrend {
        #[serde(default = "default_trend_run")]
        run_length: usize,
    },
}

impl Default for SignalConfig {
    fn default() -> Self {
        SignalConfig::ParitySequence {
            run_length: default_parity_run(),
        }
    }
}

fn default_parity_run() -> usize {
    2
}

fn default_frequency_window() -> u64 {
    20_000
}

fn default_frequency_min_count() -> usize {
    2
}

fn default_trend_run() -> usize {
    3
}

/// Strategy and risk parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradingConfig {
    /// Stake at level 0 when no stake table is configured
    #[serde(default = "default_base_stake")]
    pub base_stake: Decimal,
    /// Stake per level; when non-empty it takes precedence over `multiplier`
    #[serde(default = "default_stake_table")]
    pub stake_table: Vec<Decimal>,
    /// Stake multiplier per loss level
    #[serde(default = "default_multiplier")]
    pub multiplier: Decimal,
    /// Highest stake level before `level_policy` applies
    #[serde(default = "default_max_level")]
    pub max_level: u32,
    #[serde(default)]
    pub level_policy: LevelPolicy,
    /// Smallest stake the server accepts
    #[serde(default = "default_base_stake")]
    pub min_stake: Decimal,
    /// Minimum time between trades and between settlement polls
    #[serde(default = "default_min_trade_interval")]
    pub min_trade_interval_ms: u64,
    /// Session profit that ends the session
    #[serde(default = "default_take_profit")]
    pub take_profit: Decimal,
    /// Session profit floor (negative) that ends the session
    #[serde(default = "default_stop_loss")]
    pub stop_loss: Decimal,
    /// Pause after a session ends
    #[serde(default = "default_cooldown")]
    pub cooldown_ms: u64,
    /// Contract length
    #[serde(default = "default_duration")]
    pub duration: u32,
    #[serde(default = "default_duration_unit")]
    pub duration_unit: DurationUnit,
    /// Start trading without waiting for a `start` command
    #[serde(default)]
    pub auto_start: bool,
    /// Trades per session before the engine stops (0 = unlimited)
    #[serde(default)]
    pub max_trades: u32,
    /// Ticks kept for the signal function
    #[serde(default = "default_history_size")]
    pub history_size: usize,
    #[serde(default)]
    pub signal: SignalConfig,
}

impl Default for TradingConfig {
    fn default() -> Self {
        Self {
            base_stake: default_base_stake(),
            stake_table: default_stake_table(),
            multiplier: default_multiplier(),
            max_level: default_max_level(),
            level_policy: LevelPolicy::default(),
            min_stake: default_base_stake(),
            min_trade_interval_ms: default_min_trade_interval(),
            take_profit: default_take_profit(),
            stop_loss: default_stop_loss(),
            cooldown_ms: default_cooldown(),
            duration: default_duration(),
            duration_unit: default_duration_unit(),
            auto_start: false,
            max_trades: 0,
            history_size: default_history_size(),
            signal: SignalConfig::default(),
        }
    }
}

fn default_base_stake() -> Decimal {
    dec!(0.35)
}

fn default_stake_table() -> Vec<Decimal> {
    vec![
        dec!(0.35),
        dec!(0.40),
        dec!(0.80),
        dec!(1.64),
        dec!(3.36),
        dec!(6.88),
        dec!(14.10),
        dec!(28.90),
    ]
}

fn default_multiplier() -> Decimal {
    dec!(2)
}

fn default_max_level() -> u32 {
    8
}

fn default_min_trade_interval() -> u64 {
    2000
}

fn default_take_profit() -> Decimal {
    dec!(5)
}

fn default_stop_loss() -> Decimal {
    dec!(-50)
}

fn default_cooldown() -> u64 {
    60_000
}

fn default_duration() -> u32 {
    1
}

fn default_duration_unit() -> DurationUnit {
    DurationUnit::Tick
}

fn default_history_size() -> usize {
    100
}

/// General application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppSettings {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Delay before the first reconnection attempt in milliseconds, doubled per attempt
    #[serde(default = "default_reconnect_delay")]
    pub reconnect_delay_ms: u64,
    /// Maximum reconnection attempts (0 = infinite)
    #[serde(default)]
    pub max_reconnect_attempts: u32,
    /// Heartbeat/ping interval in seconds
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval_seconds: u64,
    /// Request timeout in seconds (0 = wait until the connection closes)
    #[serde(default = "default_request_timeout")]
    pub request_timeout_seconds: u64,
    /// Port of the liveness endpoint (0 = disabled)
    #[serde(default = "default_liveness_port")]
    pub liveness_port: u16,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            reconnect_delay_ms: default_reconnect_delay(),
            max_reconnect_attempts: 0,
            heartbeat_interval_seconds: default_heartbeat_interval(),
            request_timeout_seconds: default_request_timeout(),
            liveness_port: default_liveness_port(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_reconnect_delay() -> u64 {
    5000
}

fn default_heartbeat_interval() -> u64 {
    10
}

fn default_request_timeout() -> u64 {
    30
}

fn default_liveness_port() -> u16 {
    3000
}
