//! Deriv API v3 message types
//!
//! Requests are plain serde structs; the transport adds the `req_id`
//! correlation field before sending.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::common::types::{ContractRequest, ContractState, ContractType, DurationUnit};

/// Correlation field echoed by the server in direct responses
pub const REQ_ID_FIELD: &str = "req_id";

/// Message types that are always part of a stream
pub const STREAM_MSG_TYPES: [&str; 2] = ["tick", "ohlc"];

// ============================================================================
// Requests
// ============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct AuthorizeRequest {
    pub authorize: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct TicksRequest {
    pub ticks: String,
    pub subscribe: u8,
}

#[derive(Debug, Clone, Serialize)]
pub struct ForgetRequest {
    pub forget: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct BalanceRequest {
    pub balance: u8,
}

/// Price quote request for a contract
#[derive(Debug, Clone, Serialize)]
pub struct ProposalRequest {
    pub proposal: u8,
    #[serde(with = "rust_decimal::serde::float")]
    pub amount: Decimal,
    pub basis: &'static str,
    pub contract_type: ContractType,
    pub currency: String,
    pub duration: u32,
    pub duration_unit: DurationUnit,
    pub symbol: String,
    /// The API expects the barrier as a string
    #[serde(skip_serializing_if = "Option::is_none")]
    pub barrier: Option<String>,
}

impl ProposalRequest {
    pub fn from_contract(request: &ContractRequest, currency: &str) -> Self {
        Self {
            proposal: 1,
            amount: request.stake,
            basis: "stake",
            contract_type: request.contract_type,
            currency: currency.to_string(),
            duration: request.duration,
            duration_unit: request.duration_unit,
            symbol: request.symbol.clone(),
            barrier: request.barrier.map(|digit| digit.to_string()),
        }
    }
}

/// Confirmation of a quoted proposal
#[derive(Debug, Clone, Serialize)]
pub struct BuyRequest {
    pub buy: String,
    #[serde(with = "rust_decimal::serde::float")]
    pub price: Decimal,
}

#[derive(Debug, Clone, Serialize)]
pub struct OpenContractRequest {
    pub proposal_open_contract: u8,
    pub contract_id: u64,
}

// ============================================================================
// Responses
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct AuthorizeResponse {
    pub authorize: AuthorizeDetails,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthorizeDetails {
    pub balance: Decimal,
    pub currency: String,
    #[serde(default)]
    pub loginid: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BalanceResponse {
    pub balance: BalanceDetails,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BalanceDetails {
    pub balance: Decimal,
    #[serde(default)]
    pub currency: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProposalResponse {
    pub proposal: ProposalDetails,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProposalDetails {
    pub id: String,
    pub ask_price: Decimal,
    #[serde(default)]
    pub payout: Option<Decimal>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BuyResponse {
    pub buy: BuyDetails,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BuyDetails {
    pub contract_id: u64,
    pub buy_price: Decimal,
    #[serde(default)]
    pub transaction_id: Option<u64>,
    #[serde(default)]
    pub longcode: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OpenContractResponse {
    pub proposal_open_contract: OpenContractDetails,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OpenContractDetails {
    pub contract_id: u64,
    /// 1 once the contract has been sold or expired and settled
    #[serde(default)]
    pub is_sold: u8,
    #[serde(default)]
    pub status: Option<ContractState>,
    #[serde(default)]
    pub profit: Option<Decimal>,
}

impl OpenContractDetails {
    pub fn is_settled(&self) -> bool {
        self.is_sold == 1
            || matches!(
                self.status,
                Some(ContractState::Won) | Some(ContractState::Lost) | Some(ContractState::Sold)
            )
    }
}

/// Subscription marker attached to stream messages
#[derive(Debug, Clone, Deserialize)]
pub struct SubscriptionInfo {
    pub id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TickEvent {
    pub tick: TickPayload,
    #[serde(default)]
    pub subscription: Option<SubscriptionInfo>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TickPayload {
    pub quote: Decimal,
    pub epoch: i64,
    pub symbol: String,
    #[serde(default)]
    pub pip_size: Option<u32>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OhlcEvent {
    pub ohlc: OhlcPayload,
    #[serde(default)]
    pub subscription: Option<SubscriptionInfo>,
}

/// Candle update; prices arrive as strings
#[derive(Debug, Clone, Deserialize)]
pub struct OhlcPayload {
    pub close: Decimal,
    pub epoch: i64,
    pub symbol: String,
    #[serde(default)]
    pub pip_size: Option<u32>,
}
