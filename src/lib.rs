//! deriv_trader Library
//!
//! A Rust client for the Deriv WebSocket API and a martingale strategy
//! engine for short binary-option contracts.

pub mod common;
pub mod config;
pub mod deriv;
pub mod liveness;
pub mod strategy;

// Re-export commonly used types
pub use common::errors::{
    AuthError, CallError, ClientError, ConnectionError, QueryError, RemoteError, Result,
    TradeError,
};
pub use common::traits::{RpcTransport, TickSource, TradeGateway};
pub use common::types::{
    AccountInfo, ContractRequest, ContractState, ContractStatus, ContractType, DurationUnit,
    OpenContract, Tick,
};
pub use config::types::AppConfig;
pub use deriv::{DerivSession, DerivTransport, TickStream, TransportOptions};

// Strategy types
pub use strategy::{
    BoxedSignal, EngineCommand, EngineSnapshot, EngineState, RiskConfig, RiskState, RunExit,
    SignalStrategy, StrategyEngine, TickOutcome,
};
