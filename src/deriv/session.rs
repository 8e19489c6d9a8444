//! Authenticated trading session on top of a transport

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info, instrument, warn};

use super::messages::*;
use crate::common::errors::{AuthError, CallError, QueryError, TradeError};
use crate::common::traits::{RpcTransport, TickSource, TradeGateway};
use crate::common::types::{
    AccountInfo, ContractRequest, ContractState, ContractStatus, OpenContract, Tick,
    DEFAULT_PIP_SIZE,
};

/// Session bound to one connection: authorization, cached account state and
/// the trading operations used by the strategy engine
pub struct DerivSession<T: RpcTransport> {
    transport: Arc<T>,
    /// Account details from the last authorize or balance call
    account: RwLock<Option<AccountInfo>>,
    /// Balance mirror readable without awaiting the lock
    cached_balance: std::sync::RwLock<Option<Decimal>>,
}

impl<T: RpcTransport> DerivSession<T> {
    pub fn new(transport: Arc<T>) -> Self {
        Self {
            transport,
            account: RwLock::new(None),
            cached_balance: std::sync::RwLock::new(None),
        }
    }

    /// Get a reference to the transport
    pub fn transport(&self) -> &Arc<T> {
        &self.transport
    }

    /// Account details cached by the last authorize/balance call
    pub async fn account(&self) -> Option<AccountInfo> {
        self.account.read().await.clone()
    }

    /// Authorize the connection with an API token and cache the account
    #[instrument(skip(self, token))]
    pub async fn authorize(&self, token: &str) -> Result<AccountInfo, AuthError> {
        info!("Authorizing...");
        let response = self
            .transport
            .call(to_request(&AuthorizeRequest {
                authorize: token.to_string(),
            }))
            .await
            .map_err(|err| match err {
                CallError::Rejected(remote) => AuthError::Rejected {
                    code: remote.code,
                    message: remote.message,
                },
                other => AuthError::Transport(other),
            })?;

        let details: AuthorizeResponse =
            serde_json::from_value(response).map_err(|_| AuthError::MalformedResponse)?;

        let account = AccountInfo {
            login_id: details.authorize.loginid,
            balance: details.authorize.balance,
            currency: details.authorize.currency,
        };
        info!(
            login_id = %account.login_id,
            "Authorized! Balance: {} {}",
            account.balance,
            account.currency
        );
        self.store_balance(account.balance);
        *self.account.write().await = Some(account.clone());
        Ok(account)
    }

    /// Subscribe to the tick stream for a symbol
    ///
    /// The stream handler is registered before the request goes out so the
    /// first tick, which arrives inside the subscribe response, is not lost.
    #[instrument(skip(self))]
    pub async fn subscribe_ticks(&self, symbol: &str) -> Result<TickStream, CallError> {
        info!("Subscribing to {}...", symbol);
        let events = self.transport.subscribe().await;
        let response = self
            .transport
            .call(to_request(&TicksRequest {
                ticks: symbol.to_string(),
                subscribe: 1,
            }))
            .await?;

        let subscription_id = response
            .get("subscription")
            .and_then(|s| s.get("id"))
            .and_then(Value::as_str)
            .map(str::to_string);
        debug!(?subscription_id, "Tick subscription active");

        Ok(TickStream {
            symbol: symbol.to_string(),
            subscription_id,
            events,
        })
    }

    /// Cancel a stream subscription
    #[instrument(skip(self))]
    pub async fn forget(&self, subscription_id: &str) -> Result<(), CallError> {
        self.transport
            .call(to_request(&ForgetRequest {
                forget: subscription_id.to_string(),
            }))
            .await?;
        info!("Subscription {} cancelled", subscription_id);
        Ok(())
    }

    fn store_balance(&self, balance: Decimal) {
        if let Ok(mut guard) = self.cached_balance.write() {
            *guard = Some(balance);
        }
    }

    /// Send a request and decode the typed response
    async fn query<R: DeserializeOwned>(&self, request: Value) -> Result<R, QueryError> {
        let response = self.transport.call(request).await?;
        serde_json::from_value(response).map_err(|e| QueryError::Malformed(e.to_string()))
    }
}

#[async_trait]
impl<T: RpcTransport> TradeGateway for DerivSession<T> {
    /// Two-step purchase: quote the contract, then buy at the quoted price
    #[instrument(skip(self, request), fields(contract_type = %request.contract_type, stake = %request.stake))]
    async fn buy(&self, request: &ContractRequest) -> Result<OpenContract, TradeError> {
        request.validate()?;

        let currency = self
            .account
            .read()
            .await
            .as_ref()
            .map(|account| account.currency.clone())
            .ok_or(TradeError::NotAuthorized)?;

        info!(
            "Attempting to buy {} for {} (Barrier: {:?})...",
            request.contract_type, request.stake, request.barrier
        );

        let response = self
            .transport
            .call(to_request(&ProposalRequest::from_contract(request, &currency)))
            .await
            .map_err(|err| match err {
                CallError::Rejected(remote) => TradeError::QuoteRejected(remote.message),
                other => TradeError::Transport(other),
            })?;
        let proposal: ProposalResponse = serde_json::from_value(response)
            .map_err(|e| TradeError::QuoteRejected(format!("malformed proposal: {e}")))?;
        if proposal.proposal.id.is_empty() {
            return Err(TradeError::QuoteRejected("proposal has no id".to_string()));
        }
        debug!(
            proposal_id = %proposal.proposal.id,
            ask_price = %proposal.proposal.ask_price,
            "Proposal received"
        );

        let response = self
            .transport
            .call(to_request(&BuyRequest {
                buy: proposal.proposal.id,
                price: proposal.proposal.ask_price,
            }))
            .await
            .map_err(|err| match err {
                CallError::Rejected(remote) => TradeError::PurchaseRejected(remote.message),
                CallError::Encode(reason) => TradeError::Invalid(reason),
                other => {
                    warn!("No answer to buy request: {}", other);
                    TradeError::OutcomeUnknown(other.to_string())
                }
            })?;
        let bought: BuyResponse = serde_json::from_value(response)
            .map_err(|e| TradeError::OutcomeUnknown(format!("malformed buy response: {e}")))?;
        if bought.buy.contract_id == 0 {
            return Err(TradeError::OutcomeUnknown(
                "buy response has no contract id".to_string(),
            ));
        }

        info!("Trade Executed! ID: {}", bought.buy.contract_id);
        Ok(OpenContract {
            contract_id: bought.buy.contract_id,
            contract_type: request.contract_type,
            buy_price: bought.buy.buy_price,
            requested_at: Utc::now(),
        })
    }

    #[instrument(skip(self))]
    async fn poll_contract(&self, contract_id: u64) -> Result<ContractStatus, QueryError> {
        let response: OpenContractResponse = self
            .query(to_request(&OpenContractRequest {
                proposal_open_contract: 1,
                contract_id,
            }))
            .await?;
        let details = response.proposal_open_contract;
        let is_settled = details.is_settled();

        let state = match details.status {
            Some(state) => state,
            None if is_settled => match details.profit {
                Some(profit) if profit > Decimal::ZERO => ContractState::Won,
                Some(_) => ContractState::Lost,
                None => ContractState::Sold,
            },
            None => ContractState::Open,
        };

        if is_settled && details.profit.is_none() {
            return Err(QueryError::Malformed(format!(
                "contract {} settled without a profit figure",
                details.contract_id
            )));
        }

        Ok(ContractStatus {
            contract_id: details.contract_id,
            state,
            is_settled,
            profit: if is_settled { details.profit } else { None },
        })
    }

    #[instrument(skip(self))]
    async fn refresh_balance(&self) -> Result<Decimal, QueryError> {
        let response: BalanceResponse = self.query(to_request(&BalanceRequest { balance: 1 })).await?;
        let balance = response.balance.balance;
        self.store_balance(balance);

        let mut account = self.account.write().await;
        match account.as_mut() {
            Some(account) => account.balance = balance,
            None => warn!("Balance refreshed before authorization"),
        }
        debug!("Balance refreshed: {}", balance);
        Ok(balance)
    }

    fn balance(&self) -> Option<Decimal> {
        self.cached_balance.read().ok().and_then(|guard| *guard)
    }
}

/// Lazy, non-restartable sequence of ticks for one symbol
///
/// Ends when the connection closes or the subscription is replaced.
pub struct TickStream {
    symbol: String,
    subscription_id: Option<String>,
    events: mpsc::UnboundedReceiver<Value>,
}

impl TickStream {
    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    /// Server-side id usable with [`DerivSession::forget`]
    pub fn subscription_id(&self) -> Option<&str> {
        self.subscription_id.as_deref()
    }

    /// Wait for the next tick for this stream's symbol
    pub async fn next(&mut self) -> Option<Tick> {
        while let Some(event) = self.events.recv().await {
            if let Some(tick) = self.parse_event(event) {
                return Some(tick);
            }
        }
        None
    }

    /// Translate a raw stream payload into a tick for this symbol
    fn parse_event(&self, event: Value) -> Option<Tick> {
        if let Some(error) = event.get("error") {
            warn!("Stream error: {}", error);
            return None;
        }

        let tick = match event.get("msg_type").and_then(Value::as_str) {
            Some("tick") => match serde_json::from_value::<TickEvent>(event) {
                Ok(event) => Tick::new(event.tick.symbol, event.tick.quote, event.tick.epoch)
                    .with_pip_size(event.tick.pip_size.unwrap_or(DEFAULT_PIP_SIZE)),
                Err(e) => {
                    warn!("Failed to parse tick: {}", e);
                    return None;
                }
            },
            Some("ohlc") => match serde_json::from_value::<OhlcEvent>(event) {
                Ok(event) => Tick::new(event.ohlc.symbol, event.ohlc.close, event.ohlc.epoch)
                    .with_pip_size(event.ohlc.pip_size.unwrap_or(DEFAULT_PIP_SIZE)),
                Err(e) => {
                    warn!("Failed to parse candle: {}", e);
                    return None;
                }
            },
            _ => return None,
        };

        (tick.symbol == self.symbol).then_some(tick)
    }
}

#[async_trait]
impl TickSource for TickStream {
    async fn next_tick(&mut self) -> Option<Tick> {
        self.next().await
    }
}

fn to_request<R: Serialize>(request: &R) -> Value {
    // Request structs only contain plain fields, serialization cannot fail
    serde_json::to_value(request).unwrap_or(Value::Null)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::errors::RemoteError;
    use crate::common::traits::MockRpcTransport;
    use crate::common::types::{ContractType, DurationUnit};
    use pretty_assertions::assert_eq;
    use rust_decimal_macros::dec;
    use serde_json::json;

    fn authorize_ok() -> Value {
        json!({
            "msg_type": "authorize",
            "authorize": {"balance": 1000.5, "currency": "USD", "loginid": "VRTC123"}
        })
    }

    fn rejected(code: &str, message: &str) -> CallError {
        CallError::Rejected(RemoteError {
            code: code.to_string(),
            message: message.to_string(),
        })
    }

    fn digit_request() -> ContractRequest {
        ContractRequest {
            contract_type: ContractType::DigitMatch,
            stake: dec!(0.35),
            duration: 1,
            duration_unit: DurationUnit::Tick,
            barrier: Some(4),
            symbol: "R_100".to_string(),
        }
    }

    async fn authorized_session(mut mock: MockRpcTransport) -> DerivSession<MockRpcTransport> {
        mock.expect_call()
            .withf(|req| req.get("authorize").is_some())
            .times(1)
            .returning(|_| Ok(authorize_ok()));
        let session = DerivSession::new(Arc::new(mock));
        session.authorize("token").await.unwrap();
        session
    }

    #[tokio::test]
    async fn test_authorize_caches_account() {
        let session = authorized_session(MockRpcTransport::new()).await;
        let account = session.account().await.unwrap();
        assert_eq!(account.currency, "USD");
        assert_eq!(account.login_id, "VRTC123");
        assert_eq!(session.balance(), Some(dec!(1000.5)));
    }

    #[tokio::test]
    async fn test_authorize_rejection_is_auth_error() {
        let mut mock = MockRpcTransport::new();
        mock.expect_call()
            .returning(|_| Err(rejected("InvalidToken", "The token is invalid.")));
        let session = DerivSession::new(Arc::new(mock));

        let err = session.authorize("bad").await.unwrap_err();
        assert_eq!(
            err,
            AuthError::Rejected {
                code: "InvalidToken".to_string(),
                message: "The token is invalid.".to_string(),
            }
        );
        assert!(session.balance().is_none());
    }

    #[tokio::test]
    async fn test_buy_requires_authorization() {
        let mock = MockRpcTransport::new();
        let session = DerivSession::new(Arc::new(mock));
        let err = session.buy(&digit_request()).await.unwrap_err();
        assert_eq!(err, TradeError::NotAuthorized);
    }

    #[tokio::test]
    async fn test_buy_two_step_protocol() {
        let mut mock = MockRpcTransport::new();
        mock.expect_call()
            .withf(|req| req.get("proposal").is_some())
            .times(1)
            .returning(|req| {
                assert_eq!(req["barrier"], "4");
                assert_eq!(req["currency"], "USD");
                assert_eq!(req["symbol"], "R_100");
                Ok(json!({"proposal": {"id": "prop-1", "ask_price": 0.35, "payout": 3.1}}))
            });
        mock.expect_call()
            .withf(|req| req.get("buy").is_some())
            .times(1)
            .returning(|req| {
                assert_eq!(req["buy"], "prop-1");
                assert_eq!(req["price"], 0.35);
                Ok(json!({"buy": {"contract_id": 4242, "buy_price": 0.35, "transaction_id": 9}}))
            });
        let session = authorized_session(mock).await;

        let contract = session.buy(&digit_request()).await.unwrap();
        assert_eq!(contract.contract_id, 4242);
        assert_eq!(contract.buy_price, dec!(0.35));
        assert_eq!(contract.contract_type, ContractType::DigitMatch);
    }

    #[tokio::test]
    async fn test_buy_quote_rejected() {
        let mut mock = MockRpcTransport::new();
        mock.expect_call()
            .withf(|req| req.get("proposal").is_some())
            .returning(|_| Err(rejected("MarketIsClosed", "This market is presently closed.")));
        mock.expect_call().withf(|req| req.get("buy").is_some()).never();
        let session = authorized_session(mock).await;

        let err = session.buy(&digit_request()).await.unwrap_err();
        assert_eq!(
            err,
            TradeError::QuoteRejected("This market is presently closed.".to_string())
        );
    }

    #[tokio::test]
    async fn test_buy_purchase_rejected() {
        let mut mock = MockRpcTransport::new();
        mock.expect_call()
            .withf(|req| req.get("proposal").is_some())
            .returning(|_| Ok(json!({"proposal": {"id": "prop-1", "ask_price": 0.35}})));
        mock.expect_call()
            .withf(|req| req.get("buy").is_some())
            .returning(|_| Err(rejected("InsufficientBalance", "Your account balance is insufficient.")));
        let session = authorized_session(mock).await;

        let err = session.buy(&digit_request()).await.unwrap_err();
        assert!(matches!(err, TradeError::PurchaseRejected(_)));
    }

    #[tokio::test]
    async fn test_buy_timeout_after_purchase_sent_is_outcome_unknown() {
        let mut mock = MockRpcTransport::new();
        mock.expect_call()
            .withf(|req| req.get("proposal").is_some())
            .returning(|_| Ok(json!({"proposal": {"id": "prop-1", "ask_price": 0.35}})));
        mock.expect_call()
            .withf(|req| req.get("buy").is_some())
            .times(1)
            .returning(|_| Err(CallError::Timeout(std::time::Duration::from_secs(30))));
        let session = authorized_session(mock).await;

        let err = session.buy(&digit_request()).await.unwrap_err();
        assert!(matches!(err, TradeError::OutcomeUnknown(_)));
    }

    #[tokio::test]
    async fn test_buy_quote_timeout_is_transport_error() {
        let mut mock = MockRpcTransport::new();
        mock.expect_call()
            .withf(|req| req.get("proposal").is_some())
            .returning(|_| Err(CallError::Disconnected));
        mock.expect_call().withf(|req| req.get("buy").is_some()).never();
        let session = authorized_session(mock).await;

        let err = session.buy(&digit_request()).await.unwrap_err();
        assert_eq!(err, TradeError::Transport(CallError::Disconnected));
    }

    #[tokio::test]
    async fn test_buy_validates_before_sending() {
        let mut mock = MockRpcTransport::new();
        mock.expect_call()
            .withf(|req| req.get("proposal").is_some())
            .never();
        let session = authorized_session(mock).await;

        let mut request = digit_request();
        request.barrier = None;
        let err = session.buy(&request).await.unwrap_err();
        assert!(matches!(err, TradeError::Invalid(_)));
    }

    #[tokio::test]
    async fn test_poll_open_and_settled_contract() {
        let mut mock = MockRpcTransport::new();
        let mut polls = 0;
        mock.expect_call()
            .withf(|req| req.get("proposal_open_contract").is_some())
            .times(2)
            .returning(move |_| {
                polls += 1;
                if polls == 1 {
                    Ok(json!({"proposal_open_contract": {"contract_id": 7, "is_sold": 0, "status": "open", "profit": 0.1}}))
                } else {
                    Ok(json!({"proposal_open_contract": {"contract_id": 7, "is_sold": 1, "status": "won", "profit": 0.31}}))
                }
            });
        let session = DerivSession::new(Arc::new(mock));

        let open = session.poll_contract(7).await.unwrap();
        assert!(!open.is_settled);
        assert_eq!(open.profit, None);

        let settled = session.poll_contract(7).await.unwrap();
        assert!(settled.is_settled);
        assert_eq!(settled.state, ContractState::Won);
        assert_eq!(settled.profit, Some(dec!(0.31)));
    }

    #[tokio::test]
    async fn test_poll_disconnected_is_query_error() {
        let mut mock = MockRpcTransport::new();
        mock.expect_call().returning(|_| Err(CallError::Disconnected));
        let session = DerivSession::new(Arc::new(mock));

        let err = session.poll_contract(7).await.unwrap_err();
        assert_eq!(err, QueryError::Call(CallError::Disconnected));
    }

    #[tokio::test]
    async fn test_refresh_balance_updates_cache() {
        let mut mock = MockRpcTransport::new();
        mock.expect_call()
            .withf(|req| req.get("balance").is_some())
            .returning(|_| Ok(json!({"balance": {"balance": 990.25, "currency": "USD"}})));
        let session = authorized_session(mock).await;

        let balance = session.refresh_balance().await.unwrap();
        assert_eq!(balance, dec!(990.25));
        assert_eq!(session.balance(), Some(dec!(990.25)));
        assert_eq!(session.account().await.unwrap().balance, dec!(990.25));
    }

    #[tokio::test]
    async fn test_tick_stream_filters_symbol_and_types() {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut mock = MockRpcTransport::new();
        mock.expect_subscribe().return_once(move || rx);
        mock.expect_call()
            .withf(|req| req.get("ticks").is_some())
            .returning(|_| {
                Ok(json!({"msg_type": "tick", "subscription": {"id": "sub-1"},
                    "tick": {"quote": 100.12, "epoch": 1, "symbol": "R_100", "pip_size": 2}}))
            });
        let session = DerivSession::new(Arc::new(mock));
        let mut stream = session.subscribe_ticks("R_100").await.unwrap();
        assert_eq!(stream.subscription_id(), Some("sub-1"));

        tx.send(json!({"msg_type": "tick", "tick": {"quote": 5.0, "epoch": 2, "symbol": "R_50"}}))
            .unwrap();
        tx.send(json!({"msg_type": "balance", "balance": {"balance": 1}})).unwrap();
        tx.send(json!({"msg_type": "tick", "tick": {"quote": 100.13, "epoch": 3, "symbol": "R_100", "pip_size": 2}}))
            .unwrap();
        tx.send(json!({"msg_type": "ohlc", "ohlc": {"close": "100.14", "epoch": 4, "symbol": "R_100"}}))
            .unwrap();
        drop(tx);

        let first = stream.next().await.unwrap();
        assert_eq!(first.epoch, 3);
        assert_eq!(first.last_digit(), 3);
        let second = stream.next().await.unwrap();
        assert_eq!(second.price, dec!(100.14));
        assert!(stream.next().await.is_none());
    }
}
