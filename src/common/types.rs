//! Unified types shared by the Deriv client and the strategy engine

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::errors::TradeError;

/// Pip size assumed when the feed does not report one
pub const DEFAULT_PIP_SIZE: u32 = 2;

/// Largest pip size honoured; feeds reporting more are clamped
pub const MAX_PIP_SIZE: u32 = 10;

/// A single price update for a traded instrument
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tick {
    /// Quoted price
    pub price: Decimal,
    /// Exchange timestamp in epoch seconds
    pub epoch: i64,
    /// Instrument symbol, e.g. `R_100`
    pub symbol: String,
    /// Number of decimals the instrument is quoted with
    #[serde(default = "default_pip_size")]
    pub pip_size: u32,
}

fn default_pip_size() -> u32 {
    DEFAULT_PIP_SIZE
}

impl Tick {
    pub fn new(symbol: impl Into<String>, price: Decimal, epoch: i64) -> Self {
        Self {
            price,
            epoch,
            symbol: symbol.into(),
            pip_size: DEFAULT_PIP_SIZE,
        }
    }

    pub fn with_pip_size(mut self, pip_size: u32) -> Self {
        self.pip_size = pip_size.min(MAX_PIP_SIZE);
        self
    }

    /// Last digit of the price as quoted at `pip_size` decimals.
    ///
    /// `123.40` with a pip size of 2 yields `0`, not `4`.
    pub fn last_digit(&self) -> u8 {
        let mut quoted = self.price.round_dp(self.pip_size.min(MAX_PIP_SIZE));
        quoted.rescale(self.pip_size.min(MAX_PIP_SIZE));
        (quoted.mantissa() % 10).unsigned_abs() as u8
    }

    /// Exchange timestamp as a `DateTime`
    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(self.epoch, 0)
    }
}

/// Binary-option contract types understood by the remote API
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ContractType {
    DigitOver,
    DigitUnder,
    DigitMatch,
    DigitDiff,
    DigitOdd,
    DigitEven,
    Call,
    Put,
}

impl ContractType {
    /// Digit contracts that settle against a barrier digit
    pub fn requires_barrier(&self) -> bool {
        matches!(
            self,
            ContractType::DigitOver
                | ContractType::DigitUnder
                | ContractType::DigitMatch
                | ContractType::DigitDiff
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ContractType::DigitOver => "DIGITOVER",
            ContractType::DigitUnder => "DIGITUNDER",
            ContractType::DigitMatch => "DIGITMATCH",
            ContractType::DigitDiff => "DIGITDIFF",
            ContractType::DigitOdd => "DIGITODD",
            ContractType::DigitEven => "DIGITEVEN",
            ContractType::Call => "CALL",
            ContractType::Put => "PUT",
        }
    }
}

impl std::fmt::Display for ContractType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unit of a contract's duration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DurationUnit {
    #[serde(rename = "t", alias = "tick", alias = "ticks")]
    Tick,
    #[serde(rename = "s", alias = "second", alias = "seconds")]
    Second,
    #[serde(rename = "m", alias = "minute", alias = "minutes")]
    Minute,
    #[serde(rename = "h", alias = "hour", alias = "hours")]
    Hour,
    #[serde(rename = "d", alias = "day", alias = "days")]
    Day,
}

impl std::fmt::Display for DurationUnit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let unit = match self {
            DurationUnit::Tick => "t",
            DurationUnit::Second => "s",
            DurationUnit::Minute => "m",
            DurationUnit::Hour => "h",
            DurationUnit::Day => "d",
        };
        f.write_str(unit)
    }
}

/// Parameters of a contract to be quoted and bought
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContractRequest {
    pub contract_type: ContractType,
    pub stake: Decimal,
    pub duration: u32,
    pub duration_unit: DurationUnit,
    /// Barrier digit 0-9, digit-barrier contracts only
    pub barrier: Option<u8>,
    pub symbol: String,
}

impl ContractRequest {
    /// Check the request before anything is sent to the server
    pub fn validate(&self) -> std::result::Result<(), TradeError> {
        if self.stake <= Decimal::ZERO {
            return Err(TradeError::Invalid(format!(
                "stake must be positive, got {}",
                self.stake
            )));
        }
        if self.duration == 0 {
            return Err(TradeError::Invalid("duration must be positive".to_string()));
        }
        if self.symbol.trim().is_empty() {
            return Err(TradeError::Invalid("symbol is empty".to_string()));
        }
        match (self.contract_type.requires_barrier(), self.barrier) {
            (true, None) => Err(TradeError::Invalid(format!(
                "{} requires a barrier digit",
                self.contract_type
            ))),
            (true, Some(digit)) if digit > 9 => Err(TradeError::Invalid(format!(
                "barrier must be a digit 0-9, got {digit}"
            ))),
            (false, Some(_)) => Err(TradeError::Invalid(format!(
                "{} does not take a barrier",
                self.contract_type
            ))),
            _ => Ok(()),
        }
    }
}

/// A bought contract that has not been observed settling yet
#[derive(Debug, Clone, PartialEq)]
pub struct OpenContract {
    pub contract_id: u64,
    pub contract_type: ContractType,
    pub buy_price: Decimal,
    pub requested_at: DateTime<Utc>,
}

/// Lifecycle state reported for a contract
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContractState {
    Open,
    Won,
    Lost,
    Sold,
    #[serde(other)]
    Other,
}

/// Result of polling a contract
#[derive(Debug, Clone, PartialEq)]
pub struct ContractStatus {
    pub contract_id: u64,
    pub state: ContractState,
    pub is_settled: bool,
    /// Realized profit, present once settled
    pub profit: Option<Decimal>,
}

/// Account details cached after authorization
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountInfo {
    pub login_id: String,
    pub balance: Decimal,
    pub currency: String,
}
