//! OCPP 1.6J frame envelope
//!
//! Frames travel as JSON arrays on text WebSocket frames:
//!
//! - Call: `[2, MessageId, Action, Payload]`
//! - CallResult: `[3, MessageId, Payload]`
//! - CallError: `[4, MessageId, ErrorCode, ErrorDescription, ErrorDetails]`

use crate::{CallErrorCode, WireError, WireResult};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Decoded OCPP frame
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// Request from either peer
    Call(CallFrame),
    /// Successful response to a Call
    CallResult(CallResultFrame),
    /// Error response to a Call
    CallError(CallErrorFrame),
}

impl Frame {
    /// Build a Call frame with a fresh message id
    pub fn call(action: impl Into<String>, payload: serde_json::Value) -> Self {
        Frame::Call(CallFrame {
            message_id: Uuid::new_v4().to_string(),
            action: action.into(),
            payload,
        })
    }

    /// Build a CallResult answering `message_id`
    pub fn call_result(message_id: impl Into<String>, payload: serde_json::Value) -> Self {
        Frame::CallResult(CallResultFrame {
            message_id: message_id.into(),
            payload,
        })
    }

    /// Build a CallError answering `message_id`
    pub fn call_error(
        message_id: impl Into<String>,
        code: CallErrorCode,
        description: impl Into<String>,
    ) -> Self {
        Frame::CallError(CallErrorFrame {
            message_id: message_id.into(),
            code,
            description: description.into(),
            details: serde_json::Value::Object(Default::default()),
        })
    }

    /// Message id shared by all frame kinds
    pub fn message_id(&self) -> &str {
        match self {
            Frame::Call(f) => &f.message_id,
            Frame::CallResult(f) => &f.message_id,
            Frame::CallError(f) => &f.message_id,
        }
    }

    /// Serialize to the wire array representation
    pub fn to_wire(&self) -> WireResult<String> {
        Ok(serde_json::to_string(&RawFrame::from(self.clone()))?)
    }

    /// Parse a wire text frame
    pub fn from_wire(text: &str) -> WireResult<Self> {
        let raw: RawFrame = serde_json::from_str(text)
            .map_err(|e| WireError::MalformedFrame(e.to_string()))?;
        raw.into_frame()
    }
}

/// Call frame: a request awaiting a CallResult or CallError
#[derive(Debug, Clone, PartialEq)]
pub struct CallFrame {
    /// Unique id chosen by the sender
    pub message_id: String,
    /// OCPP action name, e.g. "BootNotification"
    pub action: String,
    /// Action-specific payload object
    pub payload: serde_json::Value,
}

impl CallFrame {
    /// Decode the payload as a concrete request type
    pub fn payload_as<T>(&self) -> WireResult<T>
    where
        T: for<'de> Deserialize<'de>,
    {
        Ok(serde_json::from_value(self.payload.clone())?)
    }
}

/// CallResult frame answering a Call
#[derive(Debug, Clone, PartialEq)]
pub struct CallResultFrame {
    /// Echoes the message id of the Call it answers
    pub message_id: String,
    /// Response payload object
    pub payload: serde_json::Value,
}

impl CallResultFrame {
    /// Decode the payload as a concrete response type
    pub fn payload_as<T>(&self) -> WireResult<T>
    where
        T: for<'de> Deserialize<'de>,
    {
        Ok(serde_json::from_value(self.payload.clone())?)
    }
}

/// CallError frame answering a Call
#[derive(Debug, Clone, PartialEq)]
pub struct CallErrorFrame {
    /// Echoes the message id of the Call it answers
    pub message_id: String,
    /// Machine-readable error code
    pub code: CallErrorCode,
    /// Human-readable description
    pub description: String,
    /// Free-form detail object
    pub details: serde_json::Value,
}

/// Wire representation: untagged tuples serialize as JSON arrays.
///
/// Deserialization tries the variants in order; they are distinguished by
/// arity (4, 3 and 5 elements), the type id is checked in `into_frame`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawFrame {
    /// `[2, "id", "Action", {..}]`
    Call(u8, String, String, serde_json::Value),
    /// `[3, "id", {..}]`
    CallResult(u8, String, serde_json::Value),
    /// `[4, "id", "ErrorCode", "description", {..}]`
    CallError(u8, String, String, String, serde_json::Value),
}

impl RawFrame {
    /// Convert the raw tuple into a typed frame, checking the type id
    pub fn into_frame(self) -> WireResult<Frame> {
        match self {
            RawFrame::Call(type_id, message_id, action, payload) => {
                if type_id != 2 {
                    return Err(WireError::InvalidFrameType(type_id));
                }
                Ok(Frame::Call(CallFrame {
                    message_id,
                    action,
                    payload,
                }))
            }
            RawFrame::CallResult(type_id, message_id, payload) => {
                if type_id != 3 {
                    return Err(WireError::InvalidFrameType(type_id));
                }
                Ok(Frame::CallResult(CallResultFrame {
                    message_id,
                    payload,
                }))
            }
            RawFrame::CallError(type_id, message_id, code, description, details) => {
                if type_id != 4 {
                    return Err(WireError::InvalidFrameType(type_id));
                }
                Ok(Frame::CallError(CallErrorFrame {
                    message_id,
                    code: code.parse()?,
                    description,
                    details,
                }))
            }
        }
    }
}

impl From<Frame> for RawFrame {
    fn from(frame: Frame) -> Self {
        match frame {
            Frame::Call(f) => RawFrame::Call(2, f.message_id, f.action, f.payload),
            Frame::CallResult(f) => RawFrame::CallResult(3, f.message_id, f.payload),
            Frame::CallError(f) => RawFrame::CallError(
                4,
                f.message_id,
                f.code.as_str().to_string(),
                f.description,
                f.details,
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_call_wire_format() {
        let frame = Frame::Call(CallFrame {
            message_id: "m1".to_string(),
            action: "Heartbeat".to_string(),
            payload: json!({}),
        });

        let wire = frame.to_wire().unwrap();
        assert_eq!(wire, r#"[2,"m1","Heartbeat",{}]"#);
    }

    #[test]
    fn test_call_result_wire_format() {
        let frame = Frame::call_result("m1", json!({"status": "Accepted"}));
        let wire = frame.to_wire().unwrap();
        assert_eq!(wire, r#"[3,"m1",{"status":"Accepted"}]"#);
    }

    #[test]
    fn test_call_error_wire_format() {
        let frame = Frame::call_error("m1", CallErrorCode::NotImplemented, "unknown action");
        let wire = frame.to_wire().unwrap();
        assert_eq!(
            wire,
            r#"[4,"m1","NotImplemented","unknown action",{}]"#
        );
    }

    #[test]
    fn test_round_trip() {
        let frames = vec![
            Frame::call("BootNotification", json!({"chargePointVendor": "V"})),
            Frame::call_result("abc", json!({"interval": 30})),
            Frame::call_error("abc", CallErrorCode::InternalError, "boom"),
        ];

        for frame in frames {
            let wire = frame.to_wire().unwrap();
            let parsed = Frame::from_wire(&wire).unwrap();
            assert_eq!(parsed, frame);
        }
    }

    #[test]
    fn test_invalid_type_id() {
        let err = Frame::from_wire(r#"[5,"m1","Heartbeat",{}]"#).unwrap_err();
        assert_eq!(err, WireError::InvalidFrameType(5));
    }

    #[test]
    fn test_malformed_frame() {
        assert!(Frame::from_wire("{}").is_err());
        assert!(Frame::from_wire(r#"[2,"m1"]"#).is_err());
        assert!(Frame::from_wire("not json at all").is_err());
    }

    #[test]
    fn test_unknown_error_code_rejected() {
        let err = Frame::from_wire(r#"[4,"m1","Bogus","x",{}]"#).unwrap_err();
        assert_eq!(err, WireError::UnknownErrorCode("Bogus".to_string()));
    }

    #[test]
    fn test_payload_extraction() {
        #[derive(Debug, PartialEq, Serialize, Deserialize)]
        struct Ping {
            seq: u32,
        }

        let frame = Frame::call("Ping", json!({"seq": 7}));
        if let Frame::Call(call) = frame {
            let ping: Ping = call.payload_as().unwrap();
            assert_eq!(ping, Ping { seq: 7 });
        } else {
            panic!("expected Call");
        }
    }
}
