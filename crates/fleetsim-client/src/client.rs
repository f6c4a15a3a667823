//! WebSocket client implementation

use crate::{
    BasicAuth, CallHandler, CallRejection, ClientConfig, ClientError, ClientEvent, ConnectionState,
};
use base64::prelude::BASE64_STANDARD;
use base64::Engine;
use dashmap::DashMap;
use fleetsim_messages::OcppAction;
use fleetsim_types::{CallErrorCode, Frame};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, RwLock as StdRwLock, Weak};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::{AUTHORIZATION, SEC_WEBSOCKET_PROTOCOL};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};
use url::Url;

const OCPP_SUBPROTOCOL: &str = "ocpp1.6";

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;
type WsSource = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;
type CallSink = oneshot::Sender<Result<serde_json::Value, ClientError>>;

/// Traffic counters for the admin status endpoint
#[derive(Debug, Default)]
struct ClientStats {
    messages_sent: AtomicU64,
    messages_received: AtomicU64,
    calls_timed_out: AtomicU64,
}

/// Point-in-time view of the traffic counters
#[derive(Debug, Clone, Copy, serde::Serialize)]
pub struct ClientStatsSnapshot {
    pub messages_sent: u64,
    pub messages_received: u64,
    pub calls_timed_out: u64,
}

/// OCPP 1.6 client bound to one charger identifier
pub struct OcppClient {
    config: ClientConfig,
    state: StdRwLock<ConnectionState>,
    writer: Mutex<Option<WsSink>>,
    pending: DashMap<String, CallSink>,
    handler: StdRwLock<Option<Weak<dyn CallHandler>>>,
    event_tx: mpsc::UnboundedSender<ClientEvent>,
    event_rx: StdMutex<Option<mpsc::UnboundedReceiver<ClientEvent>>>,
    inbound_tx: broadcast::Sender<String>,
    write_delay: StdRwLock<Option<Duration>>,
    reader_task: Mutex<Option<JoinHandle<()>>>,
    stats: ClientStats,
}

impl OcppClient {
    pub fn new(config: ClientConfig) -> Arc<Self> {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (inbound_tx, _) = broadcast::channel(64);

        Arc::new(Self {
            config,
            state: StdRwLock::new(ConnectionState::Disconnected),
            writer: Mutex::new(None),
            pending: DashMap::new(),
            handler: StdRwLock::new(None),
            event_tx,
            event_rx: StdMutex::new(Some(event_rx)),
            inbound_tx,
            write_delay: StdRwLock::new(None),
            reader_task: Mutex::new(None),
            stats: ClientStats::default(),
        })
    }

    /// Register the receiver of CSMS-initiated Calls
    pub fn set_handler(&self, handler: Weak<dyn CallHandler>) {
        *self.handler.write().unwrap() = Some(handler);
    }

    /// Take the lifecycle event receiver; only the owner may hold it
    pub fn take_events(&self) -> Option<mpsc::UnboundedReceiver<ClientEvent>> {
        self.event_rx.lock().unwrap().take()
    }

    /// Subscribe to action names of inbound Calls, used by flow `wait_for`
    pub fn subscribe_inbound(&self) -> broadcast::Receiver<String> {
        self.inbound_tx.subscribe()
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.read().unwrap()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    pub fn charger_id(&self) -> &str {
        &self.config.charger_id
    }

    /// Number of outbound Calls still awaiting a response
    pub fn pending_calls(&self) -> usize {
        self.pending.len()
    }

    pub fn stats(&self) -> ClientStatsSnapshot {
        ClientStatsSnapshot {
            messages_sent: self.stats.messages_sent.load(Ordering::Relaxed),
            messages_received: self.stats.messages_received.load(Ordering::Relaxed),
            calls_timed_out: self.stats.calls_timed_out.load(Ordering::Relaxed),
        }
    }

    /// Dial the CSMS and start the reader task.
    ///
    /// The charger identifier is appended to the endpoint path and the
    /// `ocpp1.6` subprotocol is offered; the attempt fails unless the
    /// server echoes it back.
    pub async fn connect(self: &Arc<Self>) -> Result<(), ClientError> {
        *self.state.write().unwrap() = ConnectionState::Connecting;

        let url = self.session_url()?;
        info!(charger_id = %self.config.charger_id, %url, "connecting to CSMS");

        let mut request = url
            .as_str()
            .into_client_request()
            .map_err(|e| ClientError::ConnectFailed(e.to_string()))?;
        request.headers_mut().insert(
            SEC_WEBSOCKET_PROTOCOL,
            OCPP_SUBPROTOCOL
                .parse()
                .expect("static header value is valid"),
        );
        if let Some(BasicAuth { username, password }) = &self.config.basic_auth {
            let encoded = BASE64_STANDARD.encode(format!("{username}:{password}"));
            request.headers_mut().insert(
                AUTHORIZATION,
                format!("Basic {encoded}")
                    .parse()
                    .map_err(|_| ClientError::ConnectFailed("invalid credentials".into()))?,
            );
        }

        let (ws, response) = match timeout(self.config.handshake_timeout, connect_async(request))
            .await
        {
            Err(_) => {
                *self.state.write().unwrap() = ConnectionState::Disconnected;
                return Err(ClientError::ConnectFailed("handshake timed out".into()));
            }
            Ok(Err(e)) => {
                *self.state.write().unwrap() = ConnectionState::Disconnected;
                return Err(ClientError::ConnectFailed(e.to_string()));
            }
            Ok(Ok(pair)) => pair,
        };

        let accepted = response
            .headers()
            .get(SEC_WEBSOCKET_PROTOCOL)
            .and_then(|v| v.to_str().ok())
            == Some(OCPP_SUBPROTOCOL);
        if !accepted {
            *self.state.write().unwrap() = ConnectionState::Disconnected;
            return Err(ClientError::SubprotocolRejected);
        }

        let (sink, source) = ws.split();
        *self.writer.lock().await = Some(sink);
        *self.state.write().unwrap() = ConnectionState::Connected;

        let mut reader_slot = self.reader_task.lock().await;
        if let Some(old) = reader_slot.take() {
            old.abort();
        }
        let this = Arc::clone(self);
        *reader_slot = Some(tokio::spawn(async move {
            this.read_loop(source).await;
        }));
        drop(reader_slot);

        let _ = self.event_tx.send(ClientEvent::Connected);
        info!(charger_id = %self.config.charger_id, "connected to CSMS");
        Ok(())
    }

    /// Graceful shutdown: close frame, bounded wait for the peer, then drop
    pub async fn disconnect(&self) {
        *self.state.write().unwrap() = ConnectionState::Closing;

        {
            let mut guard = self.writer.lock().await;
            if let Some(sink) = guard.as_mut() {
                let _ = sink
                    .send(Message::Close(Some(CloseFrame {
                        code: CloseCode::Normal,
                        reason: "charger disconnecting".into(),
                    })))
                    .await;
            }
        }

        let handle = self.reader_task.lock().await.take();
        if let Some(mut handle) = handle {
            if timeout(self.config.close_timeout, &mut handle).await.is_err() {
                handle.abort();
            }
        }

        *self.writer.lock().await = None;
        self.fail_pending(ClientError::ConnectionClosed);
        *self.state.write().unwrap() = ConnectionState::Disconnected;
        info!(charger_id = %self.config.charger_id, "disconnected from CSMS");
    }

    /// Abrupt teardown with no close frame. Chaos hook.
    pub async fn abort(&self) {
        warn!(charger_id = %self.config.charger_id, "aborting connection");

        *self.writer.lock().await = None;
        if let Some(handle) = self.reader_task.lock().await.take() {
            handle.abort();
        }
        self.fail_pending(ClientError::ConnectionLost);
        *self.state.write().unwrap() = ConnectionState::Disconnected;
        let _ = self.event_tx.send(ClientEvent::Disconnected {
            reason: "connection aborted".into(),
        });
    }

    /// Inject latency into the write path. Chaos hook.
    pub fn set_write_delay(&self, delay: Option<Duration>) {
        *self.write_delay.write().unwrap() = delay;
    }

    /// Write an arbitrary text frame, bypassing serialization. Chaos hook.
    pub async fn send_raw(&self, text: String) -> Result<(), ClientError> {
        self.write_text(text).await
    }

    /// Send a typed Call and await its typed response
    pub async fn send_call<T: OcppAction>(&self, request: &T) -> Result<T::Response, ClientError> {
        self.send_call_with_timeout(request, self.config.call_timeout)
            .await
    }

    /// Send a typed Call with an explicit response deadline
    pub async fn send_call_with_timeout<T: OcppAction>(
        &self,
        request: &T,
        deadline: Duration,
    ) -> Result<T::Response, ClientError> {
        request
            .validate()
            .map_err(|e| ClientError::Payload(e.to_string()))?;
        let payload = serde_json::to_value(request)
            .map_err(|e| ClientError::Payload(e.to_string()))?;
        let response = self
            .send_call_value(T::ACTION_NAME, payload, deadline)
            .await?;
        serde_json::from_value(response).map_err(|e| ClientError::Payload(e.to_string()))
    }

    /// Send a Call with a raw JSON payload and await the raw response
    pub async fn send_call_value(
        &self,
        action: &str,
        payload: serde_json::Value,
        deadline: Duration,
    ) -> Result<serde_json::Value, ClientError> {
        if !self.is_connected() {
            return Err(ClientError::NotConnected);
        }

        let frame = Frame::call(action, payload);
        let message_id = frame.message_id().to_string();

        let (tx, rx) = oneshot::channel();
        self.pending.insert(message_id.clone(), tx);

        debug!(charger_id = %self.config.charger_id, %action, %message_id, "sending call");
        if let Err(err) = self.write_frame(&frame).await {
            self.pending.remove(&message_id);
            return Err(err);
        }

        match timeout(deadline, rx).await {
            Ok(Ok(outcome)) => outcome,
            // sender dropped without an answer: the session died mid-call
            Ok(Err(_)) => Err(ClientError::ConnectionLost),
            Err(_) => {
                self.pending.remove(&message_id);
                self.stats.calls_timed_out.fetch_add(1, Ordering::Relaxed);
                Err(ClientError::Timeout {
                    action: action.to_string(),
                    timeout: deadline,
                })
            }
        }
    }

    fn session_url(&self) -> Result<Url, ClientError> {
        let mut url = Url::parse(&self.config.endpoint)
            .map_err(|e| ClientError::ConnectFailed(format!("invalid endpoint: {e}")))?;
        url.path_segments_mut()
            .map_err(|_| ClientError::ConnectFailed("endpoint cannot be a base".into()))?
            .pop_if_empty()
            .push(&self.config.charger_id);
        Ok(url)
    }

    async fn write_frame(&self, frame: &Frame) -> Result<(), ClientError> {
        self.write_text(frame.to_wire()?).await
    }

    async fn write_text(&self, text: String) -> Result<(), ClientError> {
        let delay = *self.write_delay.read().unwrap();

        let mut guard = self.writer.lock().await;
        let sink = guard.as_mut().ok_or(ClientError::NotConnected)?;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        match sink.send(Message::Text(text)).await {
            Ok(()) => {
                self.stats.messages_sent.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Err(err) => {
                drop(guard);
                warn!(charger_id = %self.config.charger_id, error = %err, "write failed");
                self.fail_pending(ClientError::ConnectionLost);
                *self.state.write().unwrap() = ConnectionState::Disconnected;
                Err(ClientError::ConnectionLost)
            }
        }
    }

    async fn read_loop(self: Arc<Self>, mut source: WsSource) {
        let reason = loop {
            match timeout(self.config.read_idle_timeout, source.next()).await {
                Err(_) => break "read idle timeout".to_string(),
                Ok(None) => break "stream ended".to_string(),
                Ok(Some(Err(err))) => break format!("read error: {err}"),
                Ok(Some(Ok(message))) => match message {
                    Message::Text(text) => {
                        self.stats.messages_received.fetch_add(1, Ordering::Relaxed);
                        self.dispatch(&text).await;
                    }
                    Message::Close(frame) => {
                        break match frame {
                            Some(f) => format!("closed by peer: {}", f.code),
                            None => "closed by peer".to_string(),
                        };
                    }
                    Message::Ping(_) | Message::Pong(_) => {}
                    other => {
                        warn!(charger_id = %self.config.charger_id, frame = ?other, "rejecting non-text frame");
                    }
                },
            }
        };
        self.on_reader_exit(reason).await;
    }

    async fn on_reader_exit(&self, reason: String) {
        let closing = self.state() == ConnectionState::Closing;
        *self.writer.lock().await = None;
        *self.state.write().unwrap() = ConnectionState::Disconnected;

        if closing {
            self.fail_pending(ClientError::ConnectionClosed);
        } else {
            warn!(charger_id = %self.config.charger_id, %reason, "session ended");
            self.fail_pending(ClientError::ConnectionLost);
            let _ = self.event_tx.send(ClientEvent::Disconnected { reason });
        }
    }

    async fn dispatch(self: &Arc<Self>, text: &str) {
        let frame = match Frame::from_wire(text) {
            Ok(frame) => frame,
            Err(err) => {
                // offending frame is discarded, the session stays open
                warn!(charger_id = %self.config.charger_id, error = %err, "discarding malformed frame");
                return;
            }
        };

        match frame {
            Frame::CallResult(result) => {
                match self.pending.remove(&result.message_id) {
                    Some((_, tx)) => {
                        let _ = tx.send(Ok(result.payload));
                    }
                    None => warn!(
                        charger_id = %self.config.charger_id,
                        message_id = %result.message_id,
                        "call result without matching pending call"
                    ),
                }
            }
            Frame::CallError(error) => {
                match self.pending.remove(&error.message_id) {
                    Some((_, tx)) => {
                        let _ = tx.send(Err(ClientError::Rejected {
                            code: error.code,
                            description: error.description,
                        }));
                    }
                    None => warn!(
                        charger_id = %self.config.charger_id,
                        message_id = %error.message_id,
                        "call error without matching pending call"
                    ),
                }
            }
            Frame::Call(call) => {
                debug!(charger_id = %self.config.charger_id, action = %call.action, "inbound call");
                let _ = self.inbound_tx.send(call.action.clone());

                // reply in a spawned task so the handler may itself send
                // calls without stalling the reader
                let this = Arc::clone(self);
                tokio::spawn(async move {
                    let handler = this
                        .handler
                        .read()
                        .unwrap()
                        .as_ref()
                        .and_then(|weak| weak.upgrade());

                    let message_id = call.message_id.clone();
                    let reply = match handler {
                        Some(handler) => handler.handle_call(call).await,
                        None => Err(CallRejection::new(
                            CallErrorCode::NotImplemented,
                            "no handler registered",
                        )),
                    };

                    let frame = match reply {
                        Ok(payload) => Frame::call_result(message_id, payload),
                        Err(rejection) => {
                            Frame::call_error(message_id, rejection.code, rejection.description)
                        }
                    };
                    if let Err(err) = this.write_frame(&frame).await {
                        warn!(
                            charger_id = %this.config.charger_id,
                            error = %err,
                            "failed to answer inbound call"
                        );
                    }
                });
            }
        }
    }

    fn fail_pending(&self, error: ClientError) {
        let ids: Vec<String> = self.pending.iter().map(|e| e.key().clone()).collect();
        for id in ids {
            if let Some((_, tx)) = self.pending.remove(&id) {
                let _ = tx.send(Err(error.clone()));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_url_appends_charger_id() {
        let client = OcppClient::new(ClientConfig::new("CP001", "ws://csms.local:9000/ocpp"));
        let url = client.session_url().unwrap();
        assert_eq!(url.as_str(), "ws://csms.local:9000/ocpp/CP001");
    }

    #[test]
    fn test_session_url_trailing_slash() {
        let client = OcppClient::new(ClientConfig::new("CP002", "ws://csms.local:9000/ocpp/"));
        let url = client.session_url().unwrap();
        assert_eq!(url.as_str(), "ws://csms.local:9000/ocpp/CP002");
    }

    #[test]
    fn test_session_url_invalid_endpoint() {
        let client = OcppClient::new(ClientConfig::new("CP001", "not a url"));
        assert!(client.session_url().is_err());
    }

    #[tokio::test]
    async fn test_send_call_requires_connection() {
        let client = OcppClient::new(ClientConfig::new("CP001", "ws://localhost:9/ocpp"));
        let err = client
            .send_call_value("Heartbeat", serde_json::json!({}), Duration::from_millis(10))
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::NotConnected));
    }

    #[tokio::test]
    async fn test_take_events_is_single_shot() {
        let client = OcppClient::new(ClientConfig::new("CP001", "ws://localhost:9/ocpp"));
        assert!(client.take_events().is_some());
        assert!(client.take_events().is_none());
    }
}
