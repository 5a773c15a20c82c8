use crate::Resolution;
use servo_transport::TransportError;
use std::time::Duration;
use thiserror::Error;

pub type Result<T, E = ControlError> = core::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum ControlError {
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
    #[error("no response within {0:?}")]
    Timeout(Duration),
    #[error("protocol error: {message}")]
    Protocol { message: String, raw: Vec<u8> },
    #[error("malformed frame: {resolution} needs {needed} bytes, got {got}")]
    MalformedFrame {
        resolution: Resolution,
        needed: usize,
        got: usize,
    },
    #[error("request cancelled")]
    Cancelled,
    #[error("unknown telemetry channel: {0}")]
    UnknownChannel(String),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

impl ControlError {
    /// Build a protocol error and log the offending bytes.
    pub(crate) fn protocol(message: impl Into<String>, raw: &[u8]) -> Self {
        let message = message.into();
        tracing::warn!(raw = %hex::encode(raw), "{message}");
        ControlError::Protocol {
            message,
            raw: raw.to_vec(),
        }
    }

    /// Errors after which the caller may simply issue the next request.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, ControlError::Transport(_))
    }
}
