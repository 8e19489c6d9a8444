//! Strategy module for trade decision making and risk management
//!
//! One engine drives every strategy variant; variants only differ in the
//! signal function they plug in.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    PER TICK (serial)                        │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Tick arrives                                               │
//! │       │                                                     │
//! │       ▼                                                     │
//! │  StrategyEngine.on_tick()                                   │
//! │    Idle / Cooldown ──► ignored (cooldown expiry checked)    │
//! │    AwaitingSettlement ──► poll contract (paced)             │
//! │         │ settled                                           │
//! │         ▼                                                   │
//! │       risk::settle(RiskState, profit) → RiskState, outcome  │
//! │    Armed ──► SignalStrategy.decide(history) → Signal?       │
//! │         │ (rate limit elapsed)                              │
//! │         ▼                                                   │
//! │       TradeGateway.buy() → OpenContract                     │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Components
//!
//! - [`StrategyEngine`]: the lifecycle state machine
//! - [`SignalStrategy`]: trait for decision functions, see [`signals`]
//! - [`RiskState`] and [`settle`]: martingale progression and session limits
//! - [`EngineCommand`]: console commands delivered over a channel

mod engine;
mod risk;
pub mod signals;
mod traits;
mod types;

pub use engine::{EngineSettings, RunExit, StrategyEngine};

pub use risk::{
    expire_cooldown, settle, RiskConfig, RiskState, SessionBoundary, SettlementOutcome,
    StakeProgression,
};

pub use signals::build_signal;

pub use traits::{BoxedSignal, SignalStrategy};

pub use types::{
    EngineCommand, EngineSnapshot, EngineState, Signal, TickHistory, TickOutcome,
};
