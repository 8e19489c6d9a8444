//! WebSocket transport for the Deriv API
//!
//! One socket carries both correlated request/response pairs and
//! subscription pushes. A single reader task demultiplexes incoming frames:
//! frames echoing a `req_id` resolve the matching pending call, frames
//! carrying a subscription marker go to the registered stream subscriber.
//! A single writer task owns the write half of the socket.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::time::{interval, timeout, MissedTickBehavior};
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message};
use tracing::{debug, error, info, instrument, warn};
use url::Url;

use super::messages::{REQ_ID_FIELD, STREAM_MSG_TYPES};
use crate::common::channels::create_stream_channel;
use crate::common::errors::{CallError, ConnectionError, RemoteError};
use crate::common::traits::RpcTransport;
use crate::config::types::AppSettings;

type Responder = oneshot::Sender<Result<Value, CallError>>;
type PendingCalls = Arc<Mutex<HashMap<u64, Responder>>>;
type StreamSubscriber = Arc<Mutex<Option<mpsc::UnboundedSender<Value>>>>;

/// Connection tuning for [`DerivTransport`]
#[derive(Debug, Clone)]
pub struct TransportOptions {
    /// Interval between WebSocket ping frames
    pub heartbeat_interval: Duration,
    /// Per-call response deadline; `None` waits until the socket closes
    pub request_timeout: Option<Duration>,
}

impl Default for TransportOptions {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(10),
            request_timeout: Some(Duration::from_secs(30)),
        }
    }
}

impl TransportOptions {
    pub fn from_settings(settings: &AppSettings) -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(settings.heartbeat_interval_seconds.max(1)),
            request_timeout: match settings.request_timeout_seconds {
                0 => None,
                secs => Some(Duration::from_secs(secs)),
            },
        }
    }
}

/// Multiplexed request/response client over a single WebSocket
pub struct DerivTransport {
    /// Full URL including the app id query parameter
    url: String,
    /// Frames queued for the writer task
    outgoing: mpsc::UnboundedSender<Message>,
    /// Calls waiting for a response, keyed by correlation id
    pending: PendingCalls,
    /// Handler for subscription pushes
    subscriber: StreamSubscriber,
    /// Last correlation id handed out
    next_id: AtomicU64,
    /// Connected state flag
    is_connected: Arc<AtomicBool>,
    request_timeout: Option<Duration>,
}

impl DerivTransport {
    /// Open the socket and spawn the reader and writer tasks
    #[instrument(skip(options))]
    pub async fn connect(
        endpoint: &str,
        app_id: &str,
        options: TransportOptions,
    ) -> Result<Self, ConnectionError> {
        let url = Self::endpoint_url(endpoint, app_id)?;
        info!("Connecting to Deriv WebSocket: {}", url);

        let (ws_stream, _response) = connect_async(url.as_str())
            .await
            .map_err(|e| ConnectionError::Handshake(e.to_string()))?;

        info!("WebSocket connection established");

        let (mut write, mut read) = ws_stream.split();
        let (outgoing, mut outgoing_rx) = mpsc::unbounded_channel::<Message>();
        let is_connected = Arc::new(AtomicBool::new(true));
        let pending: PendingCalls = Arc::new(Mutex::new(HashMap::new()));
        let subscriber: StreamSubscriber = Arc::new(Mutex::new(None));

        // Writer task: the only place the socket is written to
        let heartbeat_interval = options.heartbeat_interval;
        tokio::spawn(async move {
            let mut ping_interval = interval(heartbeat_interval);
            ping_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            // The first tick completes immediately
            ping_interval.tick().await;

            loop {
                tokio::select! {
                    msg = outgoing_rx.recv() => {
                        match msg {
                            Some(msg) => {
                                let closing = matches!(msg, Message::Close(_));
                                if let Err(e) = write.send(msg).await {
                                    warn!("Failed to write frame: {}", e);
                                    break;
                                }
                                if closing {
                                    break;
                                }
                            }
                            None => {
                                let _ = write.close().await;
                                break;
                            }
                        }
                    }
                    _ = ping_interval.tick() => {
                        if let Err(e) = write.send(Message::Ping(Vec::new())).await {
                            warn!("Failed to send ping: {}", e);
                            break;
                        }
                    }
                }
            }
            debug!("Writer task finished");
        });

        // Reader task: single dispatch point for everything the server sends
        let pending_reader = pending.clone();
        let subscriber_reader = subscriber.clone();
        let is_connected_reader = is_connected.clone();
        tokio::spawn(async move {
            while let Some(msg) = read.next().await {
                match msg {
                    Ok(Message::Text(text)) => {
                        Self::dispatch(&text, &pending_reader, &subscriber_reader).await;
                    }
                    Ok(Message::Ping(_)) => {
                        debug!("Received Ping");
                    }
                    Ok(Message::Pong(_)) => {
                        debug!("Received Pong");
                    }
                    Ok(Message::Close(frame)) => {
                        info!("WebSocket closed: {:?}", frame);
                        break;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        error!("WebSocket error: {}", e);
                        break;
                    }
                }
            }
            info!("WebSocket stream ended");
            Self::teardown(&is_connected_reader, &pending_reader, &subscriber_reader).await;
        });

        Ok(Self {
            url,
            outgoing,
            pending,
            subscriber,
            next_id: AtomicU64::new(0),
            is_connected,
            request_timeout: options.request_timeout,
        })
    }

    /// Full URL this transport connected to
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Number of calls still waiting for a response
    pub async fn pending_count(&self) -> usize {
        self.pending.lock().await.len()
    }

    /// Close the socket. Outstanding calls fail with `Disconnected`.
    #[instrument(skip(self))]
    pub async fn disconnect(&self) {
        let _ = self.outgoing.send(Message::Close(None));
        Self::teardown(&self.is_connected, &self.pending, &self.subscriber).await;
        info!("Disconnected from Deriv");
    }

    /// Build `endpoint?app_id=<id>`
    fn endpoint_url(endpoint: &str, app_id: &str) -> Result<String, ConnectionError> {
        let mut url = Url::parse(endpoint).map_err(|e| ConnectionError::InvalidEndpoint {
            endpoint: endpoint.to_string(),
            reason: e.to_string(),
        })?;
        if !matches!(url.scheme(), "ws" | "wss") {
            return Err(ConnectionError::InvalidEndpoint {
                endpoint: endpoint.to_string(),
                reason: format!("unsupported scheme {}", url.scheme()),
            });
        }
        if !app_id.is_empty() {
            url.query_pairs_mut().append_pair("app_id", app_id);
        }
        Ok(url.to_string())
    }

    /// Route one incoming frame to its pending call and/or the stream subscriber
    async fn dispatch(text: &str, pending: &PendingCalls, subscriber: &StreamSubscriber) {
        let value: Value = match serde_json::from_str(text) {
            Ok(value) => value,
            Err(e) => {
                warn!("Failed to parse message: {} - {}", e, text);
                return;
            }
        };

        let stream_event = is_stream_event(&value);

        if let Some(req_id) = correlation_id(&value) {
            let responder = pending.lock().await.remove(&req_id);
            match responder {
                Some(tx) => {
                    let result = match remote_error(&value) {
                        Some(err) => Err(CallError::Rejected(err)),
                        None => Ok(value.clone()),
                    };
                    // The caller may have timed out and gone away
                    let _ = tx.send(result);
                }
                None if !stream_event => {
                    debug!(req_id, "Response for unknown or expired request");
                }
                None => {}
            }
        }

        if stream_event {
            let mut guard = subscriber.lock().await;
            match guard.as_ref() {
                Some(tx) => {
                    if tx.send(value).is_err() {
                        debug!("Stream subscriber dropped");
                        *guard = None;
                    }
                }
                None => debug!("No stream subscriber registered, dropping event"),
            }
        }
    }

    /// Mark disconnected, fail every pending call and end the stream.
    /// Safe to run more than once.
    async fn teardown(
        is_connected: &AtomicBool,
        pending: &PendingCalls,
        subscriber: &StreamSubscriber,
    ) {
        is_connected.store(false, Ordering::SeqCst);

        let drained: Vec<(u64, Responder)> = pending.lock().await.drain().collect();
        if !drained.is_empty() {
            warn!(count = drained.len(), "Failing pending calls after disconnect");
        }
        for (_, tx) in drained {
            let _ = tx.send(Err(CallError::Disconnected));
        }

        subscriber.lock().await.take();
    }
}

#[async_trait]
impl RpcTransport for DerivTransport {
    async fn call(&self, request: Value) -> Result<Value, CallError> {
        let Value::Object(mut body) = request else {
            return Err(CallError::Encode("request must be a JSON object".to_string()));
        };
        if !self.is_connected() {
            return Err(CallError::Disconnected);
        }

        let req_id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        body.insert(REQ_ID_FIELD.to_string(), Value::from(req_id));
        let text = serde_json::to_string(&body).map_err(|e| CallError::Encode(e.to_string()))?;

        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(req_id, tx);

        // Teardown may have drained the map between the check above and the insert
        if !self.is_connected() {
            self.pending.lock().await.remove(&req_id);
            return Err(CallError::Disconnected);
        }

        debug!(req_id, "Sending request: {}", text);
        if self.outgoing.send(Message::Text(text)).is_err() {
            self.pending.lock().await.remove(&req_id);
            return Err(CallError::Disconnected);
        }

        let response = match self.request_timeout {
            Some(limit) => match timeout(limit, rx).await {
                Ok(response) => response,
                Err(_) => {
                    self.pending.lock().await.remove(&req_id);
                    warn!(req_id, "Request timed out after {:?}", limit);
                    return Err(CallError::Timeout(limit));
                }
            },
            None => rx.await,
        };

        response.map_err(|_| CallError::Disconnected)?
    }

    async fn subscribe(&self) -> mpsc::UnboundedReceiver<Value> {
        let (tx, rx) = create_stream_channel();
        if !self.is_connected() {
            // Dropping the sender ends the stream immediately
            return rx;
        }
        let mut guard = self.subscriber.lock().await;
        if guard.is_some() {
            debug!("Replacing existing stream subscriber");
        }
        *guard = Some(tx);
        rx
    }

    fn is_connected(&self) -> bool {
        self.is_connected.load(Ordering::SeqCst)
    }
}

/// Correlation id echoed by a direct response
fn correlation_id(value: &Value) -> Option<u64> {
    value.get(REQ_ID_FIELD).and_then(Value::as_u64)
}

/// Whether a frame belongs to a subscription stream
fn is_stream_event(value: &Value) -> bool {
    if value.get("subscription").map_or(false, |s| !s.is_null()) {
        return true;
    }
    value
        .get("msg_type")
        .and_then(Value::as_str)
        .map_or(false, |msg_type| STREAM_MSG_TYPES.contains(&msg_type))
}

/// Error object of a rejected request
fn remote_error(value: &Value) -> Option<RemoteError> {
    let error = value.get("error")?;
    match serde_json::from_value::<RemoteError>(error.clone()) {
        Ok(err) => Some(err),
        Err(_) => Some(RemoteError {
            code: "Unknown".to_string(),
            message: error.to_string(),
        }),
    }
}
