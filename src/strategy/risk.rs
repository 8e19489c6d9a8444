//! Martingale stake progression and session limits
//!
//! [`RiskState`] is a plain value. [`settle`] and [`expire_cooldown`] are pure
//! functions from the current state to the next one, so every transition can
//! be checked without a connection.

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Serialize;
use tracing::warn;

use crate::common::errors::ClientError;
use crate::config::types::{LevelPolicy, TradingConfig};

/// Growth applied past the end of a stake table
pub const TABLE_OVERFLOW_MULTIPLIER: Decimal = dec!(2);

/// How the stake grows with the loss level
#[derive(Debug, Clone, PartialEq)]
pub enum StakeProgression {
    /// Explicit stake per level, level 0 first
    Table(Vec<Decimal>),
    /// `base_stake * multiplier^level`
    Multiplier(Decimal),
}

/// Validated risk parameters
#[derive(Debug, Clone)]
pub struct RiskConfig {
    pub base_stake: Decimal,
    pub progression: StakeProgression,
    pub max_level: u32,
    pub level_policy: LevelPolicy,
    pub min_stake: Decimal,
    pub take_profit: Decimal,
    /// Session profit floor, zero or negative
    pub stop_loss: Decimal,
    pub cooldown: Duration,
}

impl RiskConfig {
    /// Build from the trading section of the configuration
    pub fn from_trading(config: &TradingConfig) -> Result<Self, ClientError> {
        let progression = if config.stake_table.is_empty() {
            StakeProgression::Multiplier(config.multiplier)
        } else {
            StakeProgression::Table(config.stake_table.clone())
        };

        let base_stake = match &progression {
            StakeProgression::Table(table) => {
                let first = table[0];
                if first != config.base_stake {
                    warn!(
                        base_stake = %config.base_stake,
                        table_base = %first,
                        "Stake table overrides base_stake"
                    );
                }
                first
            }
            StakeProgression::Multiplier(_) => config.base_stake,
        };

        let risk = Self {
            base_stake,
            progression,
            max_level: config.max_level,
            level_policy: config.level_policy,
            min_stake: config.min_stake,
            take_profit: config.take_profit,
            stop_loss: config.stop_loss,
            cooldown: Duration::milliseconds(config.cooldown_ms as i64),
        };
        risk.validate()?;
        Ok(risk)
    }

    pub fn validate(&self) -> Result<(), ClientError> {
        let invalid = |msg: String| Err(ClientError::Configuration(msg));

        if self.base_stake <= Decimal::ZERO {
            return invalid(format!("base stake must be positive, got {}", self.base_stake));
        }
        match &self.progression {
            StakeProgression::Table(table) => {
                if let Some(stake) = table.iter().find(|stake| **stake <= Decimal::ZERO) {
                    return invalid(format!("stake table entries must be positive, got {stake}"));
                }
            }
            StakeProgression::Multiplier(multiplier) => {
                if *multiplier < Decimal::ONE {
                    return invalid(format!("multiplier must be at least 1, got {multiplier}"));
                }
            }
        }
        if self.max_level == 0 && self.level_policy != LevelPolicy::Uncapped {
            return invalid("max_level must be at least 1 unless uncapped".to_string());
        }
        if self.min_stake < Decimal::ZERO {
            return invalid(format!("min stake cannot be negative, got {}", self.min_stake));
        }
        if self.take_profit <= Decimal::ZERO {
            return invalid(format!("take profit must be positive, got {}", self.take_profit));
        }
        if self.stop_loss > Decimal::ZERO {
            return invalid(format!(
                "stop loss is a profit floor and must not be positive, got {}",
                self.stop_loss
            ));
        }
        if self.cooldown < Duration::zero() {
            return invalid("cooldown cannot be negative".to_string());
        }
        Ok(())
    }

    /// Stake at level 0
    pub fn baseline(&self) -> Decimal {
        self.stake_for(0)
    }

    /// Stake for a level, recomputed from scratch
    ///
    /// Saturates at `Decimal::MAX` instead of overflowing on very deep
    /// uncapped progressions.
    pub fn stake_for(&self, level: u32) -> Decimal {
        match &self.progression {
            StakeProgression::Table(table) => match table.get(level as usize) {
                Some(stake) => *stake,
                None => {
                    let last = table.last().copied().unwrap_or(self.base_stake);
                    let overflow = level as usize + 1 - table.len();
                    grow(last, TABLE_OVERFLOW_MULTIPLIER, overflow)
                }
            },
            StakeProgression::Multiplier(multiplier) => {
                grow(self.base_stake, *multiplier, level as usize)
            }
        }
    }

    /// Level after a loss at `level`
    pub fn next_level(&self, level: u32) -> u32 {
        let raised = level.saturating_add(1);
        match self.level_policy {
            LevelPolicy::Uncapped => raised,
            _ if raised <= self.max_level => raised,
            LevelPolicy::Wrap => 1,
            LevelPolicy::Clamp => self.max_level,
        }
    }
}

fn grow(start: Decimal, multiplier: Decimal, steps: usize) -> Decimal {
    (0..steps).fold(start, |stake, _| {
        stake.checked_mul(multiplier).unwrap_or(Decimal::MAX)
    })
}

/// Stake level, stake and running session profit
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RiskState {
    pub stake_level: u32,
    pub current_stake: Decimal,
    /// Sum of settled profits since the last reset
    pub session_profit: Decimal,
    pub cooldown_until: Option<DateTime<Utc>>,
}

impl RiskState {
    /// Fresh session state
    pub fn baseline(config: &RiskConfig) -> Self {
        Self {
            stake_level: 0,
            current_stake: config.baseline(),
            session_profit: Decimal::ZERO,
            cooldown_until: None,
        }
    }

    pub fn in_cooldown(&self, now: DateTime<Utc>) -> bool {
        self.cooldown_until.map_or(false, |until| now < until)
    }
}

/// Which session limit was crossed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SessionBoundary {
    TakeProfit,
    StopLoss,
}

/// Result of applying one settled contract
#[derive(Debug, Clone, PartialEq)]
pub enum SettlementOutcome {
    /// Keep trading at the new stake
    Continue,
    /// Keep trading, but the stake was cut down to the available balance
    StakeClamped { requested: Decimal, balance: Decimal },
    /// A session limit was crossed, pause until `cooldown_until`
    SessionEnded {
        boundary: SessionBoundary,
        cooldown_until: DateTime<Utc>,
    },
    /// The balance cannot cover even the minimum stake
    Halted { required: Decimal, balance: Decimal },
}

/// Apply a settled contract's profit to the risk state
///
/// `balance` is the best known account balance; `None` skips the balance check.
pub fn settle(
    state: &RiskState,
    profit: Decimal,
    config: &RiskConfig,
    balance: Option<Decimal>,
    now: DateTime<Utc>,
) -> (RiskState, SettlementOutcome) {
    let mut next = state.clone();
    next.session_profit += profit;

    if profit > Decimal::ZERO {
        next.stake_level = 0;
    } else {
        next.stake_level = config.next_level(state.stake_level);
    }
    next.current_stake = config.stake_for(next.stake_level);

    let boundary = if next.session_profit >= config.take_profit {
        Some(SessionBoundary::TakeProfit)
    } else if next.session_profit <= config.stop_loss {
        Some(SessionBoundary::StopLoss)
    } else {
        None
    };
    if let Some(boundary) = boundary {
        let cooldown_until = now + config.cooldown;
        next.cooldown_until = Some(cooldown_until);
        return (
            next,
            SettlementOutcome::SessionEnded {
                boundary,
                cooldown_until,
            },
        );
    }

    if let Some(balance) = balance {
        if next.current_stake > balance {
            if balance >= config.min_stake && balance > Decimal::ZERO {
                let requested = next.current_stake;
                next.current_stake = balance;
                return (next, SettlementOutcome::StakeClamped { requested, balance });
            }
            let required = next.current_stake.min(config.min_stake.max(Decimal::ZERO));
            return (next, SettlementOutcome::Halted { required, balance });
        }
    }

    (next, SettlementOutcome::Continue)
}

/// Reset to baseline once the cooldown has run out
///
/// Returns `None` while the cooldown is still active or if there is none.
pub fn expire_cooldown(
    state: &RiskState,
    config: &RiskConfig,
    now: DateTime<Utc>,
) -> Option<RiskState> {
    match state.cooldown_until {
        Some(until) if now >= until => Some(RiskState::baseline(config)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn multiplier_config(policy: LevelPolicy) -> RiskConfig {
        RiskConfig {
            base_stake: dec!(1),
            progression: StakeProgression::Multiplier(dec!(2)),
            max_level: 3,
            level_policy: policy,
            min_stake: dec!(0.35),
            take_profit: dec!(100),
            stop_loss: dec!(-100),
            cooldown: Duration::milliseconds(60_000),
        }
    }

    fn table_config() -> RiskConfig {
        RiskConfig {
            base_stake: dec!(0.35),
            progression: StakeProgression::Table(vec![
                dec!(0.35),
                dec!(0.40),
                dec!(0.80),
                dec!(1.64),
            ]),
            max_level: 3,
            level_policy: LevelPolicy::Wrap,
            min_stake: dec!(0.35),
            take_profit: dec!(100),
            stop_loss: dec!(-100),
            cooldown: Duration::milliseconds(60_000),
        }
    }

    fn t0() -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).unwrap()
    }

    fn apply(config: &RiskConfig, profits: &[Decimal]) -> (RiskState, Vec<Decimal>) {
        let mut state = RiskState::baseline(config);
        let mut stakes = Vec::new();
        for profit in profits {
            let (next, _) = settle(&state, *profit, config, None, t0());
            stakes.push(next.current_stake);
            state = next;
        }
        (state, stakes)
    }

    #[test]
    fn test_clamp_policy_multiplier_scenario() {
        let config = multiplier_config(LevelPolicy::Clamp);
        let (state, stakes) = apply(&config, &[dec!(-1), dec!(-2), dec!(-4), dec!(-8)]);
        assert_eq!(stakes, vec![dec!(2), dec!(4), dec!(8), dec!(8)]);
        assert_eq!(state.stake_level, 3);
    }

    #[test]
    fn test_wrap_policy_restarts_at_level_one() {
        let config = multiplier_config(LevelPolicy::Wrap);
        let (state, stakes) = apply(&config, &[dec!(-1), dec!(-2), dec!(-4), dec!(-8)]);
        assert_eq!(stakes, vec![dec!(2), dec!(4), dec!(8), dec!(2)]);
        assert_eq!(state.stake_level, 1);
    }

    #[test]
    fn test_uncapped_policy_keeps_doubling() {
        let config = multiplier_config(LevelPolicy::Uncapped);
        let (state, stakes) = apply(&config, &[dec!(-1); 5]);
        assert_eq!(stakes, vec![dec!(2), dec!(4), dec!(8), dec!(16), dec!(32)]);
        assert_eq!(state.stake_level, 5);
    }

    #[test]
    fn test_table_is_used_verbatim() {
        let config = table_config();
        let (_, stakes) = apply(&config, &[dec!(-0.35), dec!(-0.40), dec!(-0.80), dec!(-1.64)]);
        // Level 4 is past the cap and wraps to level 1
        assert_eq!(stakes, vec![dec!(0.40), dec!(0.80), dec!(1.64), dec!(0.40)]);
    }

    #[test]
    fn test_table_extrapolates_past_its_end() {
        let mut config = table_config();
        config.level_policy = LevelPolicy::Uncapped;
        assert_eq!(config.stake_for(3), dec!(1.64));
        assert_eq!(config.stake_for(4), dec!(3.28));
        assert_eq!(config.stake_for(5), dec!(6.56));
    }

    #[test]
    fn test_win_resets_to_baseline_from_any_level() {
        let config = table_config();
        let (state, _) = apply(&config, &[dec!(-0.35), dec!(-0.40), dec!(1.20)]);
        assert_eq!(state.stake_level, 0);
        assert_eq!(state.current_stake, config.baseline());
    }

    #[test]
    fn test_loss_recomputes_stake_from_level() {
        let config = multiplier_config(LevelPolicy::Clamp);
        for level in 0..3 {
            let state = RiskState {
                stake_level: level,
                current_stake: config.stake_for(level),
                session_profit: Decimal::ZERO,
                cooldown_until: None,
            };
            let (next, _) = settle(&state, dec!(-1), &config, None, t0());
            assert_eq!(next.stake_level, level + 1);
            assert_eq!(next.current_stake, config.stake_for(level + 1));
        }
    }

    #[test]
    fn test_session_profit_is_sum_of_profits() {
        let config = multiplier_config(LevelPolicy::Wrap);
        let profits = [dec!(0.9), dec!(-1), dec!(-2), dec!(3.6), dec!(-1)];
        let (state, _) = apply(&config, &profits);
        assert_eq!(state.session_profit, profits.iter().copied().sum::<Decimal>());
    }

    #[test]
    fn test_take_profit_enters_cooldown() {
        let mut config = multiplier_config(LevelPolicy::Wrap);
        config.take_profit = dec!(1.5);
        let state = RiskState::baseline(&config);

        let (state, outcome) = settle(&state, dec!(0.9), &config, None, t0());
        assert_eq!(outcome, SettlementOutcome::Continue);

        let (state, outcome) = settle(&state, dec!(0.9), &config, None, t0());
        let expected_until = t0() + Duration::milliseconds(60_000);
        assert_eq!(
            outcome,
            SettlementOutcome::SessionEnded {
                boundary: SessionBoundary::TakeProfit,
                cooldown_until: expected_until,
            }
        );
        assert_eq!(state.cooldown_until, Some(expected_until));
        assert_eq!(state.session_profit, dec!(1.8));
        assert!(state.in_cooldown(t0()));
    }

    #[test]
    fn test_stop_loss_enters_cooldown() {
        let mut config = multiplier_config(LevelPolicy::Wrap);
        config.stop_loss = dec!(-2);
        let state = RiskState::baseline(&config);

        let (state, _) = settle(&state, dec!(-1), &config, None, t0());
        let (_, outcome) = settle(&state, dec!(-1), &config, None, t0());
        assert!(matches!(
            outcome,
            SettlementOutcome::SessionEnded {
                boundary: SessionBoundary::StopLoss,
                ..
            }
        ));
    }

    #[test]
    fn test_cooldown_expiry_resets_state() {
        let config = multiplier_config(LevelPolicy::Wrap);
        let state = RiskState {
            stake_level: 2,
            current_stake: dec!(4),
            session_profit: dec!(150),
            cooldown_until: Some(t0() + Duration::milliseconds(60_000)),
        };
        assert_eq!(
            expire_cooldown(&state, &config, t0() + Duration::milliseconds(59_999)),
            None
        );
        let reset = expire_cooldown(&state, &config, t0() + Duration::milliseconds(60_000)).unwrap();
        assert_eq!(reset, RiskState::baseline(&config));
    }

    #[test]
    fn test_stake_clamped_to_balance() {
        let config = multiplier_config(LevelPolicy::Clamp);
        let state = RiskState {
            stake_level: 2,
            current_stake: dec!(4),
            session_profit: Decimal::ZERO,
            cooldown_until: None,
        };
        let (next, outcome) = settle(&state, dec!(-4), &config, Some(dec!(5)), t0());
        assert_eq!(next.current_stake, dec!(5));
        assert_eq!(next.stake_level, 3);
        assert_eq!(
            outcome,
            SettlementOutcome::StakeClamped {
                requested: dec!(8),
                balance: dec!(5),
            }
        );
    }

    #[test]
    fn test_halt_below_min_stake() {
        let config = multiplier_config(LevelPolicy::Clamp);
        let state = RiskState::baseline(&config);
        let (_, outcome) = settle(&state, dec!(-1), &config, Some(dec!(0.2)), t0());
        assert!(matches!(outcome, SettlementOutcome::Halted { .. }));
    }

    #[test]
    fn test_from_trading_validates() {
        let mut trading = TradingConfig {
            stake_table: Vec::new(),
            ..TradingConfig::default()
        };
        assert!(RiskConfig::from_trading(&trading).is_ok());

        trading.stop_loss = dec!(5);
        assert!(RiskConfig::from_trading(&trading).is_err());

        trading.stop_loss = dec!(-5);
        trading.multiplier = dec!(0.5);
        assert!(RiskConfig::from_trading(&trading).is_err());
    }

    #[test]
    fn test_default_table_matches_stake_levels() {
        let config = RiskConfig::from_trading(&TradingConfig::default()).unwrap();
        assert_eq!(config.baseline(), dec!(0.35));
        assert_eq!(config.stake_for(7), dec!(28.90));
        assert_eq!(config.stake_for(8), dec!(57.80));
    }
}
