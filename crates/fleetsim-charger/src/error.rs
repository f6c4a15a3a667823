//! Error types for virtual charger operations

use fleetsim_client::ClientError;
use fleetsim_messages::{AuthorizationStatus, ChargePointStatus};
use thiserror::Error;

/// Errors surfaced by charger operations
#[derive(Error, Debug)]
pub enum ChargerError {
    /// Charger configuration violates a structural rule
    #[error("invalid charger configuration: {0}")]
    Config(String),

    /// Dial, handshake or subprotocol negotiation failed
    #[error("connect failed: {0}")]
    ConnectFailed(String),

    /// The local state machine forbids the requested transition
    #[error("operation {operation} not allowed while {state}")]
    InvalidState { operation: String, state: String },

    #[error("invalid connector id {0}")]
    InvalidConnector(u32),

    #[error("connector {connector_id} not available: {status}")]
    ConnectorBusy {
        connector_id: u32,
        status: ChargePointStatus,
    },

    #[error("transaction {0} not found")]
    TransactionNotFound(i32),

    #[error("transaction {0} is not active")]
    TransactionNotActive(i32),

    /// CSMS answered StartTransaction with a non-Accepted idTagInfo
    #[error("authorization rejected: {0:?}")]
    AuthorizationRejected(AuthorizationStatus),

    #[error("timed out waiting for inbound {0}")]
    WaitTimeout(String),

    /// Transport-level failure, propagated unchanged
    #[error(transparent)]
    Client(#[from] ClientError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ChargerError::ConnectorBusy {
            connector_id: 2,
            status: ChargePointStatus::Charging,
        };
        assert_eq!(err.to_string(), "connector 2 not available: Charging");

        let err = ChargerError::InvalidState {
            operation: "StartTransaction".into(),
            state: "offline".into(),
        };
        assert_eq!(
            err.to_string(),
            "operation StartTransaction not allowed while offline"
        );
    }

    #[test]
    fn test_client_error_is_transparent() {
        let err = ChargerError::from(ClientError::ConnectionLost);
        assert_eq!(err.to_string(), "connection lost");
    }
}
