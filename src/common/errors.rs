//! Error types for the application

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias using our ClientError
pub type Result<T> = std::result::Result<T, ClientError>;

/// Error object returned by the remote API inside an `error` field
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteError {
    /// Machine-readable code, e.g. `InvalidToken` or `ContractBuyValidationError`
    #[serde(default)]
    pub code: String,
    /// Human-readable message
    #[serde(default)]
    pub message: String,
}

impl std::fmt::Display for RemoteError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

/// Failure to establish the socket. Fatal to the session.
#[derive(Error, Debug)]
pub enum ConnectionError {
    #[error("Invalid endpoint {endpoint}: {reason}")]
    InvalidEndpoint { endpoint: String, reason: String },

    #[error("WebSocket handshake failed: {0}")]
    Handshake(String),
}

/// Failure of a single correlated request
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CallError {
    #[error("Request timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("Request rejected by server: {0}")]
    Rejected(RemoteError),

    #[error("Connection closed before a response arrived")]
    Disconnected,

    #[error("Request could not be encoded: {0}")]
    Encode(String),
}

/// Authorization failure. Fatal for the session.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AuthError {
    #[error("Authorization rejected ({code}): {message}")]
    Rejected { code: String, message: String },

    #[error("Authorization response missing account details")]
    MalformedResponse,

    #[error("Authorization failed: {0}")]
    Transport(CallError),
}

/// Failure of the two-step proposal/buy protocol. Recoverable.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TradeError {
    #[error("Invalid contract request: {0}")]
    Invalid(String),

    #[error("Session is not authorized")]
    NotAuthorized,

    #[error("Quote rejected: {0}")]
    QuoteRejected(String),

    #[error("Purchase rejected: {0}")]
    PurchaseRejected(String),

    /// The buy request went out but no usable answer came back; a contract
    /// may be open on the account
    #[error("Purchase outcome unknown: {0}")]
    OutcomeUnknown(String),

    #[error("Trade request failed: {0}")]
    Transport(CallError),
}

/// Failure to query contract or account state. Treated as "not yet known".
#[derive(Error, Debug, Clone, PartialEq)]
pub enum QueryError {
    #[error("Query failed: {0}")]
    Call(#[from] CallError),

    #[error("Malformed query response: {0}")]
    Malformed(String),
}

/// Main error type for client operations
#[derive(Error, Debug)]
pub enum ClientError {
    /// WebSocket connection errors
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    #[error(transparent)]
    Call(#[from] CallError),

    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error(transparent)]
    Trade(#[from] TradeError),

    #[error(transparent)]
    Query(#[from] QueryError),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Configuration(String),
}
