//! # Fleetsim Client
//!
//! WebSocket session to a CSMS for exactly one charger identifier.
//! Provides send-and-await-response semantics for outbound Calls and a
//! handler interface for CSMS-initiated Calls, plus the chaos hooks the
//! scenario engine drives (abrupt aborts, write latency, raw frames).

pub mod client;

pub use client::{ClientStatsSnapshot, OcppClient};

use fleetsim_types::{CallErrorCode, CallFrame, WireError};
use std::time::Duration;
use thiserror::Error;

/// Connection configuration for one charger session
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Charger identifier, appended to the endpoint path at handshake
    pub charger_id: String,
    /// CSMS base endpoint (ws:// or wss://)
    pub endpoint: String,
    /// Optional HTTP Basic credentials for the upgrade request
    pub basic_auth: Option<BasicAuth>,
    /// Default deadline for a Call awaiting its response
    pub call_timeout: Duration,
    /// WebSocket handshake deadline
    pub handshake_timeout: Duration,
    /// Reader closes the session after this much silence
    pub read_idle_timeout: Duration,
    /// How long a graceful close waits for the peer close frame
    pub close_timeout: Duration,
}

impl ClientConfig {
    pub fn new(charger_id: impl Into<String>, endpoint: impl Into<String>) -> Self {
        Self {
            charger_id: charger_id.into(),
            endpoint: endpoint.into(),
            basic_auth: None,
            call_timeout: Duration::from_secs(30),
            handshake_timeout: Duration::from_secs(10),
            read_idle_timeout: Duration::from_secs(60),
            close_timeout: Duration::from_secs(5),
        }
    }
}

/// HTTP Basic credentials
#[derive(Debug, Clone)]
pub struct BasicAuth {
    pub username: String,
    pub password: String,
}

/// Session state as observed by the owning charger
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Closing,
}

/// Session lifecycle notifications delivered to the owner
#[derive(Debug, Clone)]
pub enum ClientEvent {
    /// Handshake completed and subprotocol accepted
    Connected,
    /// Session ended for the given reason; pending calls have failed
    Disconnected { reason: String },
}

/// Errors surfaced by client operations
#[derive(Error, Debug, Clone)]
pub enum ClientError {
    #[error("not connected to CSMS")]
    NotConnected,

    #[error("connect failed: {0}")]
    ConnectFailed(String),

    #[error("server did not accept the ocpp1.6 subprotocol")]
    SubprotocolRejected,

    #[error("no response for {action} within {timeout:?}")]
    Timeout { action: String, timeout: Duration },

    #[error("connection lost")]
    ConnectionLost,

    #[error("connection closed")]
    ConnectionClosed,

    /// CSMS answered with a CallError
    #[error("call rejected with {code}: {description}")]
    Rejected {
        code: CallErrorCode,
        description: String,
    },

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("invalid payload: {0}")]
    Payload(String),
}

impl From<WireError> for ClientError {
    fn from(err: WireError) -> Self {
        ClientError::Protocol(err.to_string())
    }
}

/// Outcome a handler returns for an inbound Call: a CallResult payload or a
/// CallError to send back
#[derive(Debug)]
pub struct CallRejection {
    pub code: CallErrorCode,
    pub description: String,
}

impl CallRejection {
    pub fn new(code: CallErrorCode, description: impl Into<String>) -> Self {
        Self {
            code,
            description: description.into(),
        }
    }
}

/// Receives decoded CSMS-initiated Calls. The owning charger implements
/// this; the client only holds a weak reference, so no back-reference cycle
/// exists.
#[async_trait::async_trait]
pub trait CallHandler: Send + Sync {
    async fn handle_call(&self, call: CallFrame) -> Result<serde_json::Value, CallRejection>;
}

/// Reconnect backoff: 1s, 2s, 4s ... capped at 30s, with ±20% jitter
pub fn backoff_delay(attempt: u32) -> Duration {
    use rand::Rng;

    let base = 1u64 << attempt.min(5);
    let capped = base.min(30) as f64;
    let jitter = rand::thread_rng().gen_range(0.8..=1.2);
    Duration::from_millis((capped * jitter * 1000.0) as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = ClientConfig::new("CP001", "ws://localhost:9000/ocpp");
        assert_eq!(config.charger_id, "CP001");
        assert_eq!(config.call_timeout, Duration::from_secs(30));
        assert_eq!(config.handshake_timeout, Duration::from_secs(10));
        assert_eq!(config.read_idle_timeout, Duration::from_secs(60));
        assert_eq!(config.close_timeout, Duration::from_secs(5));
        assert!(config.basic_auth.is_none());
    }

    #[test]
    fn test_backoff_grows_and_caps() {
        for attempt in 0..10 {
            let delay = backoff_delay(attempt);
            // jitter keeps each delay within ±20% of the nominal value
            let nominal = (1u64 << attempt.min(5)).min(30) as f64;
            let secs = delay.as_secs_f64();
            assert!(secs >= nominal * 0.8 - 0.001, "attempt {attempt}: {secs}");
            assert!(secs <= nominal * 1.2 + 0.001, "attempt {attempt}: {secs}");
        }
    }
}
