//! # Fleetsim Types
//!
//! Foundational wire types for the OCPP 1.6J protocol: the frame envelope,
//! message type identifiers and the call error codes shared by every other
//! crate in the workspace.

pub mod error;
pub mod frame;

pub use error::{CallErrorCode, WireError, WireResult};
pub use frame::{CallErrorFrame, CallFrame, CallResultFrame, Frame, RawFrame};

use serde::{Deserialize, Serialize};

/// Message type identifier carried as the first element of every frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FrameType {
    Call = 2,
    CallResult = 3,
    CallError = 4,
}

impl TryFrom<u8> for FrameType {
    type Error = WireError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            2 => Ok(FrameType::Call),
            3 => Ok(FrameType::CallResult),
            4 => Ok(FrameType::CallError),
            _ => Err(WireError::InvalidFrameType(value)),
        }
    }
}

impl From<FrameType> for u8 {
    fn from(frame_type: FrameType) -> Self {
        frame_type as u8
    }
}
