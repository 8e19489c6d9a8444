//! Trait definitions for the seams between transport, session and engine

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde_json::Value;
use tokio::sync::mpsc;

use super::errors::{CallError, QueryError, TradeError};
use super::types::{ContractRequest, ContractStatus, OpenContract, Tick};

/// Request/response multiplexer over a single connection
///
/// Implemented by [`crate::deriv::DerivTransport`]; the session layer only
/// depends on this trait so it can be exercised against scripted responses.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RpcTransport: Send + Sync {
    /// Send a JSON request object and wait for the response carrying the
    /// same correlation id
    async fn call(&self, request: Value) -> Result<Value, CallError>;

    /// Register the single handler for unsolicited stream messages,
    /// replacing any previous one
    async fn subscribe(&self) -> mpsc::UnboundedReceiver<Value>;

    /// Check if the underlying connection is still open
    fn is_connected(&self) -> bool;
}

/// Trading operations the strategy engine needs from a session
#[async_trait]
pub trait TradeGateway: Send + Sync {
    /// Quote and buy a contract
    async fn buy(&self, request: &ContractRequest) -> Result<OpenContract, TradeError>;

    /// Query a contract's current state without waiting for settlement
    async fn poll_contract(&self, contract_id: u64) -> Result<ContractStatus, QueryError>;

    /// Fetch the account balance from the server and update the cache
    async fn refresh_balance(&self) -> Result<Decimal, QueryError>;

    /// Last known balance, if any
    fn balance(&self) -> Option<Decimal>;
}

/// Source of ticks for the engine's run loop
#[async_trait]
pub trait TickSource: Send {
    /// Next tick, or `None` once the stream has ended
    async fn next_tick(&mut self) -> Option<Tick>;
}

#[async_trait]
impl TickSource for mpsc::Receiver<Tick> {
    async fn next_tick(&mut self) -> Option<Tick> {
        self.recv().await
    }
}

#[async_trait]
impl TickSource for mpsc::UnboundedReceiver<Tick> {
    async fn next_tick(&mut self) -> Option<Tick> {
        self.recv().await
    }
}
