//! # Fleetsim Messages
//!
//! Typed request/response payloads for the OCPP 1.6J actions the simulator
//! speaks, plus the `OcppAction` trait tying each request to its response
//! shape. Payload schemas follow the OCPP 1.6J JSON specification;
//! optional fields are omitted from the wire when absent.

pub mod types;
pub mod v16j;
pub mod validation;

pub use types::*;
pub use v16j::*;
pub use validation::ValidationError;

use serde::{de::DeserializeOwned, Serialize};

/// Ties a request payload to its action name and response type
pub trait OcppAction: Serialize + DeserializeOwned + Send + Sync {
    /// Action name as it appears in the Call frame
    const ACTION_NAME: &'static str;
    /// Payload type of the matching CallResult
    type Response: Serialize + DeserializeOwned + Send + Sync;

    /// Structural validation beyond what serde enforces
    fn validate(&self) -> Result<(), ValidationError> {
        Ok(())
    }
}

/// Helpers for building and tearing apart frames with typed payloads
pub mod codec {
    use super::*;
    use fleetsim_types::{CallFrame, Frame, WireError, WireResult};

    /// Build a Call frame from a typed request
    pub fn call<T: OcppAction>(request: &T) -> WireResult<Frame> {
        Ok(Frame::call(
            T::ACTION_NAME,
            serde_json::to_value(request)?,
        ))
    }

    /// Decode a Call payload, checking the action name matches
    pub fn decode_call<T: OcppAction>(call: &CallFrame) -> WireResult<T> {
        if call.action != T::ACTION_NAME {
            return Err(WireError::MalformedFrame(format!(
                "expected action '{}', got '{}'",
                T::ACTION_NAME,
                call.action
            )));
        }
        call.payload_as()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleetsim_types::Frame;

    #[test]
    fn test_codec_call() {
        let request = HeartbeatRequest {};
        let frame = codec::call(&request).unwrap();

        match frame {
            Frame::Call(call) => {
                assert_eq!(call.action, "Heartbeat");
                let decoded: HeartbeatRequest = codec::decode_call(&call).unwrap();
                assert_eq!(decoded, request);
            }
            _ => panic!("expected Call frame"),
        }
    }

    #[test]
    fn test_decode_call_wrong_action() {
        let frame = Frame::call("Heartbeat", serde_json::json!({}));
        if let Frame::Call(call) = frame {
            let result: Result<AuthorizeRequest, _> = codec::decode_call(&call);
            assert!(result.is_err());
        }
    }
}
