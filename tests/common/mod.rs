//! Common test utilities and fixtures

#![allow(dead_code)]

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::{accept_async, tungstenite::protocol::Message};

use deriv_trader::TransportOptions;

/// How long a test waits for the next frame before failing
pub const FRAME_TIMEOUT: Duration = Duration::from_secs(5);

/// Frame the fake server should push to the client
#[derive(Debug)]
pub enum ServerFrame {
    Json(Value),
    Close,
}

/// Single-connection stand-in for the Deriv WebSocket API
///
/// Requests received from the client are queued on `requests`; the test
/// decides what to send back and when.
pub struct FakeDerivServer {
    pub url: String,
    requests: mpsc::UnboundedReceiver<Value>,
    frames: mpsc::UnboundedSender<ServerFrame>,
}

impl FakeDerivServer {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind fake server");
        let addr = listener.local_addr().expect("No local address");
        let (request_tx, requests) = mpsc::unbounded_channel();
        let (frames, mut frame_rx) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            let Ok((stream, _)) = listener.accept().await else {
                return;
            };
            let Ok(ws) = accept_async(stream).await else {
                return;
            };
            let (mut write, mut read) = ws.split();

            loop {
                tokio::select! {
                    msg = read.next() => match msg {
                        Some(Ok(Message::Text(text))) => {
                            if let Ok(value) = serde_json::from_str::<Value>(&text) {
                                let _ = request_tx.send(value);
                            }
                        }
                        Some(Ok(_)) => {}
                        _ => break,
                    },
                    frame = frame_rx.recv() => match frame {
                        Some(ServerFrame::Json(value)) => {
                            if write.send(Message::Text(value.to_string())).await.is_err() {
                                break;
                            }
                        }
                        Some(ServerFrame::Close) | None => {
                            let _ = write.send(Message::Close(None)).await;
                            break;
                        }
                    },
                }
            }
        });

        Self {
            url: format!("ws://{}", addr),
            requests,
            frames,
        }
    }

    /// Next request sent by the client
    pub async fn next_request(&mut self) -> Value {
        timeout(FRAME_TIMEOUT, self.requests.recv())
            .await
            .expect("Timed out waiting for a request")
            .expect("Fake server connection closed")
    }

    /// Sender for pushing frames from another task
    pub fn frame_sender(&self) -> mpsc::UnboundedSender<ServerFrame> {
        self.frames.clone()
    }

    pub fn send(&self, value: Value) {
        self.frames
            .send(ServerFrame::Json(value))
            .expect("Fake server task gone");
    }

    /// Send `body` as the response to `request`
    pub fn reply(&self, request: &Value, body: Value) {
        self.send(with_req_id(request, body));
    }

    pub fn close(&self) {
        let _ = self.frames.send(ServerFrame::Close);
    }

    /// Answer every request with `handler` in a background task
    ///
    /// Returns the frame sender so the test can still push stream events.
    pub fn auto_respond<F>(mut self, handler: F) -> mpsc::UnboundedSender<ServerFrame>
    where
        F: Fn(&Value) -> Option<Value> + Send + 'static,
    {
        let frames = self.frames.clone();
        tokio::spawn(async move {
            while let Some(request) = self.requests.recv().await {
                if let Some(body) = handler(&request) {
                    self.send(with_req_id(&request, body));
                }
            }
        });
        frames
    }
}

/// Copy the request's correlation id onto a response body
pub fn with_req_id(request: &Value, mut body: Value) -> Value {
    body["req_id"] = request["req_id"].clone();
    body
}

/// Transport options suitable for tests
pub fn test_options() -> TransportOptions {
    TransportOptions {
        heartbeat_interval: Duration::from_secs(30),
        request_timeout: Some(Duration::from_secs(5)),
    }
}

/// Sample Deriv API messages
pub mod deriv_messages {
    use super::*;

    pub fn authorize(balance: f64) -> Value {
        json!({
            "msg_type": "authorize",
            "authorize": {
                "balance": balance,
                "currency": "USD",
                "loginid": "VRTC1234567",
                "email": "trader@example.com"
            }
        })
    }

    pub fn balance(balance: f64) -> Value {
        json!({
            "msg_type": "balance",
            "balance": {"balance": balance, "currency": "USD"}
        })
    }

    pub fn tick(symbol: &str, quote: f64, epoch: i64) -> Value {
        json!({
            "msg_type": "tick",
            "tick": {
                "ask": quote,
                "bid": quote,
                "epoch": epoch,
                "id": "b1b1b1b1-0000-0000-0000-000000000000",
                "pip_size": 2,
                "quote": quote,
                "symbol": symbol
            },
            "subscription": {"id": "b1b1b1b1-0000-0000-0000-000000000000"}
        })
    }

    pub fn proposal(id: &str, ask_price: f64) -> Value {
        json!({
            "msg_type": "proposal",
            "proposal": {
                "id": id,
                "ask_price": ask_price,
                "payout": ask_price * 1.95,
                "longcode": "Win payout if the last digit is even."
            }
        })
    }

    pub fn buy(contract_id: u64, buy_price: f64) -> Value {
        json!({
            "msg_type": "buy",
            "buy": {
                "contract_id": contract_id,
                "buy_price": buy_price,
                "transaction_id": contract_id * 2,
                "longcode": "Win payout if the last digit is even."
            }
        })
    }

    pub fn open_contract(contract_id: u64) -> Value {
        json!({
            "msg_type": "proposal_open_contract",
            "proposal_open_contract": {
                "contract_id": contract_id,
                "is_sold": 0,
                "status": "open",
                "profit": 0.1
            }
        })
    }

    pub fn settled_contract(contract_id: u64, profit: f64) -> Value {
        let status = if profit > 0.0 { "won" } else { "lost" };
        json!({
            "msg_type": "proposal_open_contract",
            "proposal_open_contract": {
                "contract_id": contract_id,
                "is_sold": 1,
                "status": status,
                "profit": profit
            }
        })
    }

    pub fn error(msg_type: &str, code: &str, message: &str) -> Value {
        json!({
            "msg_type": msg_type,
            "error": {"code": code, "message": message}
        })
    }
}
