use crate::{Frame, Result};
use std::time::Duration;

/// A minimal blocking, half-duplex frame transport.
pub trait Transport: Send {
    /// Human readable name of the underlying interface.
    fn name(&self) -> &str;

    /// Send one frame.
    fn send(&mut self, frame: &Frame) -> Result<()>;

    /// Receive one frame, blocking up to `timeout` (forever when `None`).
    ///
    /// Returns [`crate::TransportError::Timeout`] when nothing arrived in time.
    fn recv(&mut self, timeout: Option<Duration>) -> Result<Frame>;
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn send(&mut self, frame: &Frame) -> Result<()> {
        (**self).send(frame)
    }

    fn recv(&mut self, timeout: Option<Duration>) -> Result<Frame> {
        (**self).recv(timeout)
    }
}
