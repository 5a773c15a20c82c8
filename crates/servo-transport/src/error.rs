use std::io;
use thiserror::Error;

pub type Result<T, E = TransportError> = core::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum TransportError {
    /// The configured adapter or port does not exist.
    #[error("interface not found: {0}")]
    InterfaceNotFound(String),
    #[error("operation not supported on this backend: {0}")]
    Unsupported(&'static str),
    #[error("I/O error: {0}")]
    Io(String),
    /// Nothing arrived before the receive deadline. Not fatal.
    #[error("timeout")]
    Timeout,
    #[error("invalid frame: {0}")]
    InvalidFrame(&'static str),
    #[error("transport disconnected")]
    Disconnected,
}

impl From<io::Error> for TransportError {
    fn from(e: io::Error) -> Self {
        match e.kind() {
            io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => TransportError::Timeout,
            io::ErrorKind::NotConnected
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::UnexpectedEof => TransportError::Disconnected,
            io::ErrorKind::NotFound => TransportError::InterfaceNotFound(e.to_string()),
            _ => TransportError::Io(e.to_string()),
        }
    }
}

#[cfg(feature = "fdcanusb")]
impl From<serialport::Error> for TransportError {
    fn from(e: serialport::Error) -> Self {
        match e.kind() {
            serialport::ErrorKind::NoDevice => TransportError::InterfaceNotFound(e.description),
            serialport::ErrorKind::Io(kind) => io::Error::new(kind, e.description).into(),
            _ => TransportError::Io(e.description),
        }
    }
}
