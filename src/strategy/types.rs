use std::collections::VecDeque;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;

use crate::common::errors::TradeError;
use crate::common::types::{ContractType, DurationUnit, OpenContract, Tick};
use crate::strategy::risk::{RiskState, SettlementOutcome};

/// Output of a signal function: what to trade, not how much
///
/// The engine fills in the stake from the risk state and the symbol and
/// default duration from its settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signal {
    pub contract_type: ContractType,
    /// Barrier digit for digit contracts
    pub barrier: Option<u8>,
    /// Overrides the engine's default contract duration
    pub duration: Option<(u32, DurationUnit)>,
    /// Human-readable reason, logged with the trade
    pub reason: String,
}

impl Signal {
    pub fn new(contract_type: ContractType, reason: impl Into<String>) -> Self {
        Self {
            contract_type,
            barrier: None,
            duration: None,
            reason: reason.into(),
        }
    }

    pub fn with_barrier(mut self, digit: u8) -> Self {
        self.barrier = Some(digit);
        self
    }

    pub fn with_duration(mut self, duration: u32, unit: DurationUnit) -> Self {
        self.duration = Some((duration, unit));
        self
    }
}

/// Bounded window of the most recent ticks, oldest first
#[derive(Debug, Clone)]
pub struct TickHistory {
    ticks: VecDeque<Tick>,
    capacity: usize,
}

impl TickHistory {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            ticks: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, tick: Tick) {
        if self.ticks.len() == self.capacity {
            self.ticks.pop_front();
        }
        self.ticks.push_back(tick);
    }

    pub fn len(&self) -> usize {
        self.ticks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ticks.is_empty()
    }

    pub fn clear(&mut self) {
        self.ticks.clear();
    }

    pub fn latest(&self) -> Option<&Tick> {
        self.ticks.back()
    }

    /// Iterate oldest to newest
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &Tick> {
        self.ticks.iter()
    }

    /// The last `n` ticks, oldest first, or `None` if fewer are stored
    pub fn last_n(&self, n: usize) -> Option<Vec<&Tick>> {
        if n == 0 || self.ticks.len() < n {
            return None;
        }
        Some(self.ticks.iter().skip(self.ticks.len() - n).collect())
    }

    /// Last digits of the last `n` ticks, oldest first
    pub fn last_digits(&self, n: usize) -> Option<Vec<u8>> {
        self.last_n(n)
            .map(|ticks| ticks.into_iter().map(Tick::last_digit).collect())
    }
}

/// Lifecycle state of the strategy engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum EngineState {
    /// Not running, ticks are ignored
    Idle,
    /// Running with no open contract
    Armed,
    /// A buy request is in flight, or its outcome is unknown
    TradePending,
    /// Waiting for the open contract to settle
    AwaitingSettlement,
    /// Session boundary crossed, waiting for the cooldown to expire
    Cooldown,
}

impl std::fmt::Display for EngineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            EngineState::Idle => "idle",
            EngineState::Armed => "armed",
            EngineState::TradePending => "trade-pending",
            EngineState::AwaitingSettlement => "awaiting-settlement",
            EngineState::Cooldown => "cooldown",
        };
        f.write_str(name)
    }
}

/// Commands accepted by the engine's run loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineCommand {
    Start,
    Stop,
    Status,
    /// Drop an open or unconfirmed contract without counting its result
    Abandon,
    Shutdown,
}

impl FromStr for EngineCommand {
    type Err = String;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        match input.trim().to_lowercase().as_str() {
            "start" => Ok(EngineCommand::Start),
            "stop" => Ok(EngineCommand::Stop),
            "status" => Ok(EngineCommand::Status),
            "abandon" => Ok(EngineCommand::Abandon),
            "quit" | "exit" => Ok(EngineCommand::Shutdown),
            other => Err(format!(
                "Unknown command: {other}. Type 'start', 'stop', 'status' or 'abandon'."
            )),
        }
    }
}

/// What the engine did with one tick
#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    /// Engine idle or cooling down
    Ignored,
    /// Cooldown expired on this tick; risk state reset
    CooldownEnded,
    /// Open contract not settled yet (or poll paced/failed)
    AwaitingSettlement,
    /// Open contract settled
    Settled(SettlementOutcome),
    /// Minimum trade interval not elapsed
    RateLimited,
    /// Signal did not fire
    NoSignal,
    /// Contract bought
    Traded(OpenContract),
    /// Buy failed; re-armed unless the outcome is unknown
    TradeFailed(TradeError),
    /// A purchase with unknown outcome blocks new trades until abandoned
    PurchaseUnconfirmed,
    /// Engine stopped itself
    Halted(String),
}

/// Point-in-time view of the engine for status reporting
#[derive(Debug, Clone, Serialize)]
pub struct EngineSnapshot {
    pub state: EngineState,
    pub stake_level: u32,
    pub current_stake: Decimal,
    pub session_profit: Decimal,
    pub cooldown_until: Option<DateTime<Utc>>,
    pub open_contract_id: Option<u64>,
    pub purchase_unconfirmed: bool,
    pub trade_count: u32,
}

impl EngineSnapshot {
    pub fn new(
        state: EngineState,
        risk: &RiskState,
        open_contract: Option<&OpenContract>,
        purchase_unconfirmed: bool,
        trade_count: u32,
    ) -> Self {
        Self {
            state,
            stake_level: risk.stake_level,
            current_stake: risk.current_stake,
            session_profit: risk.session_profit,
            cooldown_until: risk.cooldown_until,
            open_contract_id: open_contract.map(|c| c.contract_id),
            purchase_unconfirmed,
            trade_count,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn tick(price: Decimal) -> Tick {
        Tick::new("R_100", price, 0)
    }

    #[test]
    fn test_history_is_bounded() {
        let mut history = TickHistory::new(3);
        for price in [dec!(1.01), dec!(1.02), dec!(1.03), dec!(1.04)] {
            history.push(tick(price));
        }
        assert_eq!(history.len(), 3);
        assert_eq!(history.last_digits(3), Some(vec![2, 3, 4]));
        assert_eq!(history.last_digits(4), None);
    }

    #[test]
    fn test_command_parsing() {
        assert_eq!(" Start ".parse::<EngineCommand>(), Ok(EngineCommand::Start));
        assert_eq!("stop".parse::<EngineCommand>(), Ok(EngineCommand::Stop));
        assert_eq!("abandon".parse::<EngineCommand>(), Ok(EngineCommand::Abandon));
        assert!("launch".parse::<EngineCommand>().is_err());
    }

    #[test]
    fn test_signal_builder() {
        let signal = Signal::new(ContractType::DigitMatch, "top digit")
            .with_barrier(7)
            .with_duration(10, DurationUnit::Tick);
        assert_eq!(signal.barrier, Some(7));
        assert_eq!(signal.duration, Some((10, DurationUnit::Tick)));
    }
}
