//! Error types for the wire layer

use thiserror::Error;

/// Errors raised while encoding or decoding OCPP frames
#[derive(Error, Debug, Clone, PartialEq)]
pub enum WireError {
    /// First array element is not a known message type id
    #[error("invalid frame type id: {0}")]
    InvalidFrameType(u8),

    /// Frame is not a well-formed OCPP array
    #[error("malformed frame: {0}")]
    MalformedFrame(String),

    /// CallError carried an error code outside the OCPP 1.6 set
    #[error("unknown call error code: {0}")]
    UnknownErrorCode(String),

    /// JSON (de)serialization failure
    #[error("json error: {0}")]
    Json(String),
}

impl From<serde_json::Error> for WireError {
    fn from(err: serde_json::Error) -> Self {
        WireError::Json(err.to_string())
    }
}

/// Result alias for wire operations
pub type WireResult<T> = Result<T, WireError>;

/// OCPP 1.6 CallError codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum CallErrorCode {
    /// Requested Action is not known by receiver
    NotImplemented,
    /// Requested Action is recognized but not supported
    NotSupported,
    /// An internal error prevented the receiver from processing the Action
    InternalError,
    /// Payload for Action is incomplete
    ProtocolError,
    /// A security issue prevented the receiver from completing the Action
    SecurityError,
    /// Payload is syntactically incorrect or does not conform to the PDU structure
    FormationViolation,
    /// Payload is syntactically correct but a field contains an invalid value
    PropertyConstraintViolation,
    /// Payload violates occurrence constraints
    OccurrenceConstraintViolation,
    /// Payload violates data type constraints
    TypeConstraintViolation,
    /// Any other error
    GenericError,
}

impl CallErrorCode {
    /// Wire spelling as defined in the OCPP 1.6 specification
    pub fn as_str(&self) -> &'static str {
        match self {
            CallErrorCode::NotImplemented => "NotImplemented",
            CallErrorCode::NotSupported => "NotSupported",
            CallErrorCode::InternalError => "InternalError",
            CallErrorCode::ProtocolError => "ProtocolError",
            CallErrorCode::SecurityError => "SecurityError",
            CallErrorCode::FormationViolation => "FormationViolation",
            CallErrorCode::PropertyConstraintViolation => "PropertyConstraintViolation",
            CallErrorCode::OccurrenceConstraintViolation => "OccurrenceConstraintViolation",
            CallErrorCode::TypeConstraintViolation => "TypeConstraintViolation",
            CallErrorCode::GenericError => "GenericError",
        }
    }
}

impl std::str::FromStr for CallErrorCode {
    type Err = WireError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "NotImplemented" => Ok(CallErrorCode::NotImplemented),
            "NotSupported" => Ok(CallErrorCode::NotSupported),
            "InternalError" => Ok(CallErrorCode::InternalError),
            "ProtocolError" => Ok(CallErrorCode::ProtocolError),
            "SecurityError" => Ok(CallErrorCode::SecurityError),
            "FormationViolation" => Ok(CallErrorCode::FormationViolation),
            "PropertyConstraintViolation" => Ok(CallErrorCode::PropertyConstraintViolation),
            "OccurrenceConstraintViolation" => Ok(CallErrorCode::OccurrenceConstraintViolation),
            "TypeConstraintViolation" => Ok(CallErrorCode::TypeConstraintViolation),
            "GenericError" => Ok(CallErrorCode::GenericError),
            _ => Err(WireError::UnknownErrorCode(s.to_string())),
        }
    }
}

impl std::fmt::Display for CallErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
