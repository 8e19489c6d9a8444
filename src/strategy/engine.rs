//! Strategy engine: signal evaluation, one open contract at a time, martingale
//! settlement and session cooldowns

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, instrument, warn};

use crate::common::errors::{ClientError, TradeError};
use crate::common::traits::{TickSource, TradeGateway};
use crate::common::types::{ContractRequest, DurationUnit, OpenContract, Tick};
use crate::config::types::{DerivConfig, TradingConfig};
use crate::strategy::risk::{expire_cooldown, settle, RiskConfig, RiskState, SettlementOutcome};
use crate::strategy::signals::build_signal;
use crate::strategy::traits::BoxedSignal;
use crate::strategy::types::{
    EngineCommand, EngineSnapshot, EngineState, Signal, TickHistory, TickOutcome,
};

/// Non-risk parameters of the engine
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub symbol: String,
    pub duration: u32,
    pub duration_unit: DurationUnit,
    /// Gates both new trades and settlement polls
    pub min_trade_interval: Duration,
    /// Trades per session, 0 = unlimited
    pub max_trades: u32,
    pub history_size: usize,
}

impl EngineSettings {
    pub fn from_config(deriv: &DerivConfig, trading: &TradingConfig) -> Self {
        Self {
            symbol: deriv.symbol.clone(),
            duration: trading.duration,
            duration_unit: trading.duration_unit,
            min_trade_interval: Duration::milliseconds(trading.min_trade_interval_ms as i64),
            max_trades: trading.max_trades,
            history_size: trading.history_size,
        }
    }
}

/// Why [`StrategyEngine::run`] returned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunExit {
    /// The tick stream ended, usually because the connection dropped
    StreamEnded,
    /// A shutdown command was received
    Shutdown,
}

pub struct StrategyEngine {
    gateway: Arc<dyn TradeGateway>,
    signal: BoxedSignal,
    risk_config: RiskConfig,
    settings: EngineSettings,
    risk: RiskState,
    state: EngineState,
    open_contract: Option<OpenContract>,
    /// Sent purchase whose result never came back
    unconfirmed_purchase: Option<ContractRequest>,
    history: TickHistory,
    last_trade_at: Option<DateTime<Utc>>,
    last_poll_at: Option<DateTime<Utc>>,
    trade_count: u32,
}

impl StrategyEngine {
    /// Create an idle engine
    pub fn new(
        gateway: Arc<dyn TradeGateway>,
        signal: BoxedSignal,
        risk_config: RiskConfig,
        settings: EngineSettings,
    ) -> Self {
        let risk = RiskState::baseline(&risk_config);
        let history = TickHistory::new(settings.history_size);
        Self {
            gateway,
            signal,
            risk_config,
            settings,
            risk,
            state: EngineState::Idle,
            open_contract: None,
            unconfirmed_purchase: None,
            history,
            last_trade_at: None,
            last_poll_at: None,
            trade_count: 0,
        }
    }

    /// Build an engine from the application configuration
    pub fn from_config(
        gateway: Arc<dyn TradeGateway>,
        deriv: &DerivConfig,
        trading: &TradingConfig,
    ) -> Result<Self, ClientError> {
        let signal = build_signal(&trading.signal)?;
        let risk_config = RiskConfig::from_trading(trading)?;
        let settings = EngineSettings::from_config(deriv, trading);
        Ok(Self::new(gateway, signal, risk_config, settings))
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    pub fn risk(&self) -> &RiskState {
        &self.risk
    }

    pub fn open_contract(&self) -> Option<&OpenContract> {
        self.open_contract.as_ref()
    }

    pub fn unconfirmed_purchase(&self) -> Option<&ContractRequest> {
        self.unconfirmed_purchase.as_ref()
    }

    pub fn snapshot(&self) -> EngineSnapshot {
        EngineSnapshot::new(
            self.state,
            &self.risk,
            self.open_contract.as_ref(),
            self.unconfirmed_purchase.is_some(),
            self.trade_count,
        )
    }

    /// Swap in the session of a new connection
    pub fn set_gateway(&mut self, gateway: Arc<dyn TradeGateway>) {
        self.gateway = gateway;
    }

    /// Begin a new session
    ///
    /// Resets the risk state. A contract still open from before the stop is
    /// reconciled first; an unconfirmed purchase keeps trading blocked.
    pub fn start(&mut self) -> bool {
        if self.state != EngineState::Idle {
            info!("Strategy already running ({})", self.state);
            return false;
        }

        self.risk = RiskState::baseline(&self.risk_config);
        self.trade_count = 0;
        self.last_trade_at = None;
        self.last_poll_at = None;
        self.state = match (&self.open_contract, &self.unconfirmed_purchase) {
            (Some(contract), _) => {
                info!(
                    contract_id = contract.contract_id,
                    "Resuming with open contract"
                );
                EngineState::AwaitingSettlement
            }
            (None, Some(_)) => {
                warn!("Unconfirmed purchase outstanding, type \"abandon\" once it is checked");
                EngineState::TradePending
            }
            (None, None) => EngineState::Armed,
        };
        info!(
            signal = self.signal.name(),
            take_profit = %self.risk_config.take_profit,
            stop_loss = %self.risk_config.stop_loss,
            stake = %self.risk.current_stake,
            ">>> STRATEGY STARTED <<<"
        );
        true
    }

    /// Stop trading; an open contract stays tracked
    pub fn stop(&mut self) -> bool {
        if self.state == EngineState::Idle {
            return false;
        }
        self.state = EngineState::Idle;
        if let Some(contract) = &self.open_contract {
            warn!(
                contract_id = contract.contract_id,
                "Stopped with an open contract, it will be checked on the next start"
            );
        }
        if self.unconfirmed_purchase.is_some() {
            warn!("Stopped with an unconfirmed purchase outstanding");
        }
        info!(">>> STRATEGY STOPPED <<<");
        true
    }

    /// Forget the open contract without applying its result
    pub fn abandon_open_contract(&mut self) -> Option<OpenContract> {
        let contract = self.open_contract.take()?;
        warn!(
            contract_id = contract.contract_id,
            stake = %contract.buy_price,
            "Abandoning open contract, its result will not be counted"
        );
        self.last_poll_at = None;
        if self.state == EngineState::AwaitingSettlement {
            self.state = EngineState::Armed;
        }
        Some(contract)
    }

    /// Forget a purchase whose outcome never came back
    ///
    /// Any contract it opened is not tracked and its result is not counted.
    pub fn release_unconfirmed_purchase(&mut self) -> Option<ContractRequest> {
        let request = self.unconfirmed_purchase.take()?;
        warn!(
            contract_type = %request.contract_type,
            stake = %request.stake,
            "Releasing unconfirmed purchase, a contract it opened will not be counted"
        );
        if self.state == EngineState::TradePending {
            self.state = EngineState::Armed;
        }
        Some(request)
    }

    /// The connection dropped; keep the open contract for reconciliation
    pub fn on_disconnect(&mut self) {
        self.history.clear();
        self.last_poll_at = None;
        if let Some(contract) = &self.open_contract {
            warn!(
                contract_id = contract.contract_id,
                "Disconnected while awaiting settlement"
            );
        }
    }

    /// Stop the engine because trading cannot continue
    pub fn halt(&mut self, reason: &str) {
        error!("Strategy halted: {}", reason);
        self.state = EngineState::Idle;
    }

    /// Feed one tick through the state machine
    pub async fn on_tick(&mut self, tick: &Tick, now: DateTime<Utc>) -> TickOutcome {
        match self.state {
            EngineState::Idle => return TickOutcome::Ignored,
            EngineState::Cooldown => {
                return match expire_cooldown(&self.risk, &self.risk_config, now) {
                    Some(reset) => {
                        self.risk = reset;
                        self.state = EngineState::Armed;
                        self.last_trade_at = Some(now);
                        info!(">>> COOLDOWN COMPLETE - STARTING NEW SESSION <<<");
                        TickOutcome::CooldownEnded
                    }
                    None => TickOutcome::Ignored,
                };
            }
            EngineState::TradePending => return TickOutcome::PurchaseUnconfirmed,
            _ => {}
        }

        self.history.push(tick.clone());
        debug!("Tick: {} (Digit: {})", tick.price, tick.last_digit());

        if self.state == EngineState::AwaitingSettlement {
            return self.check_settlement(now).await;
        }

        if let Some(last) = self.last_trade_at {
            if now - last < self.settings.min_trade_interval {
                return TickOutcome::RateLimited;
            }
        }

        let Some(signal) = self.signal.decide(&self.history, now) else {
            return TickOutcome::NoSignal;
        };

        if self.settings.max_trades > 0 && self.trade_count >= self.settings.max_trades {
            let reason = format!("max trades ({}) reached", self.settings.max_trades);
            self.halt(&reason);
            return TickOutcome::Halted(reason);
        }

        self.place_trade(signal, now).await
    }

    #[instrument(skip(self, signal, now), fields(strategy = self.signal.name()))]
    async fn place_trade(&mut self, signal: Signal, now: DateTime<Utc>) -> TickOutcome {
        let (duration, duration_unit) = signal
            .duration
            .unwrap_or((self.settings.duration, self.settings.duration_unit));
        let request = ContractRequest {
            contract_type: signal.contract_type,
            stake: self.risk.current_stake,
            duration,
            duration_unit,
            barrier: signal.barrier,
            symbol: self.settings.symbol.clone(),
        };

        info!(
            "Signal: {}. Buying {} at {}...",
            signal.reason, request.contract_type, request.stake
        );
        self.state = EngineState::TradePending;
        self.last_trade_at = Some(now);
        self.trade_count += 1;

        let result = self.gateway.buy(&request).await;
        match result {
            Ok(contract) => {
                self.open_contract = Some(contract.clone());
                self.last_poll_at = None;
                self.state = EngineState::AwaitingSettlement;
                TickOutcome::Traded(contract)
            }
            Err(e @ TradeError::OutcomeUnknown(_)) => {
                error!(
                    contract_type = %request.contract_type,
                    stake = %request.stake,
                    "Purchase outcome unknown ({}). A contract may be open on the account; \
                     trading is blocked until it is checked and abandoned",
                    e
                );
                self.unconfirmed_purchase = Some(request);
                TickOutcome::TradeFailed(e)
            }
            Err(e) => {
                warn!("Buy failed: {}", e);
                self.state = EngineState::Armed;
                TickOutcome::TradeFailed(e)
            }
        }
    }

    async fn check_settlement(&mut self, now: DateTime<Utc>) -> TickOutcome {
        let Some(contract_id) = self.open_contract.as_ref().map(|c| c.contract_id) else {
            self.state = EngineState::Armed;
            return TickOutcome::NoSignal;
        };

        if let Some(last) = self.last_poll_at {
            if now - last < self.settings.min_trade_interval {
                return TickOutcome::AwaitingSettlement;
            }
        }
        self.last_poll_at = Some(now);

        match self.gateway.poll_contract(contract_id).await {
            Ok(status) if status.is_settled => {
                let profit = status.profit.unwrap_or(Decimal::ZERO);
                self.apply_settlement(contract_id, profit, now).await
            }
            Ok(_) => TickOutcome::AwaitingSettlement,
            Err(e) => {
                warn!(contract_id, "Contract poll failed: {}", e);
                TickOutcome::AwaitingSettlement
            }
        }
    }

    async fn apply_settlement(
        &mut self,
        contract_id: u64,
        profit: Decimal,
        now: DateTime<Utc>,
    ) -> TickOutcome {
        self.open_contract = None;
        self.last_poll_at = None;
        self.last_trade_at = Some(now);

        let balance = match self.gateway.refresh_balance().await {
            Ok(balance) => Some(balance),
            Err(e) => {
                let cached = self.gateway.balance();
                warn!("Balance refresh failed ({}), using cached {:?}", e, cached);
                cached
            }
        };

        let (next, outcome) = settle(&self.risk, profit, &self.risk_config, balance, now);
        self.risk = next;
        info!(
            contract_id,
            %profit,
            session_profit = %self.risk.session_profit,
            "Contract {} closed",
            contract_id
        );

        match &outcome {
            SettlementOutcome::Continue => {
                if profit > Decimal::ZERO {
                    info!("WIN! Resetting stake.");
                } else {
                    info!(
                        level = self.risk.stake_level,
                        "LOSS. Next stake = {}", self.risk.current_stake
                    );
                }
                self.state = EngineState::Armed;
            }
            SettlementOutcome::StakeClamped { requested, balance } => {
                warn!(
                    %requested,
                    %balance,
                    "Stake clamped to available balance"
                );
                self.state = EngineState::Armed;
            }
            SettlementOutcome::SessionEnded {
                boundary,
                cooldown_until,
            } => {
                info!(
                    ?boundary,
                    %cooldown_until,
                    "Session end. Profit: {}",
                    self.risk.session_profit
                );
                self.state = EngineState::Cooldown;
            }
            SettlementOutcome::Halted { required, balance } => {
                self.halt(&format!(
                    "insufficient balance {balance} for stake {required}"
                ));
            }
        }
        TickOutcome::Settled(outcome)
    }

    /// Apply a console command; returns `false` on shutdown
    pub fn handle_command(&mut self, command: EngineCommand) -> bool {
        match command {
            EngineCommand::Start => {
                self.start();
            }
            EngineCommand::Stop => {
                self.stop();
            }
            EngineCommand::Abandon => {
                let contract = self.abandon_open_contract();
                let purchase = self.release_unconfirmed_purchase();
                if contract.is_none() && purchase.is_none() {
                    info!("Nothing to abandon");
                }
            }
            EngineCommand::Status => match serde_json::to_string(&self.snapshot()) {
                Ok(status) => info!("Status: {}", status),
                Err(e) => warn!("Failed to render status: {}", e),
            },
            EngineCommand::Shutdown => return false,
        }
        true
    }

    /// Drive the engine from a tick source and a command channel
    ///
    /// Commands are only taken between ticks, so a stop never interrupts a
    /// buy or poll in flight. A closed command channel is not fatal.
    pub async fn run<S: TickSource>(
        &mut self,
        ticks: &mut S,
        commands: &mut mpsc::Receiver<EngineCommand>,
    ) -> RunExit {
        let mut commands_open = true;
        loop {
            tokio::select! {
                biased;
                command = commands.recv(), if commands_open => match command {
                    Some(command) => {
                        if !self.handle_command(command) {
                            return RunExit::Shutdown;
                        }
                    }
                    None => {
                        debug!("Command channel closed");
                        commands_open = false;
                    }
                },
                tick = ticks.next_tick() => match tick {
                    Some(tick) => {
                        let outcome = self.on_tick(&tick, Utc::now()).await;
                        debug!(?outcome, state = %self.state, "Tick processed");
                    }
                    None => {
                        self.on_disconnect();
                        return RunExit::StreamEnded;
                    }
                },
            }
        }
    }
}
