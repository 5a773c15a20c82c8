use crate::{Frame, Result, Timestamp, Transport, TransportError, MAX_PAYLOAD};
use serialport::{SerialPort, SerialPortType};
use std::io::{ErrorKind, Read, Write};
use std::time::{Duration, Instant};

/// fdcanusb-style text framing over a USB serial adapter.
///
/// Outgoing frames are written as `can send <arb> <hex>` lines, the adapter acknowledges
/// each with `OK`, and incoming frames arrive as `rcv <arb> <hex> [flags...]` lines.
pub struct FdcanusbTransport {
    port_path: String,
    port: Box<dyn SerialPort>,
    acc: Vec<u8>,
}

impl FdcanusbTransport {
    pub fn open(path: &str) -> Result<Self> {
        Self::open_with(path, 115_200)
    }

    pub fn open_with(path: &str, baud: u32) -> Result<Self> {
        let port = serialport::new(path, baud)
            .timeout(Duration::from_millis(200))
            .open()?;
        tracing::info!(path, baud, "fdcanusb adapter opened");
        Ok(Self {
            port_path: path.to_string(),
            port,
            acc: Vec::with_capacity(256),
        })
    }

    /// USB serial ports that could host an adapter.
    pub fn list() -> Result<Vec<String>> {
        let ports = serialport::available_ports()?;
        Ok(ports
            .into_iter()
            .filter(|p| matches!(p.port_type, SerialPortType::UsbPort(_)))
            .map(|p| p.port_name)
            .collect())
    }

    fn encode_frame(frame: &Frame) -> Result<Vec<u8>> {
        if frame.data.len() > MAX_PAYLOAD {
            return Err(TransportError::InvalidFrame("payload > 64"));
        }
        let line = format!(
            "can send {:04x} {}\n",
            frame.arbitration_id(),
            hex::encode(&frame.data)
        );
        Ok(line.into_bytes())
    }

    fn parse_line(line: &str) -> Result<Option<Frame>> {
        let mut parts = line.split_whitespace();
        match parts.next() {
            Some("OK") | None => Ok(None),
            Some("rcv") => {
                let arb = parts
                    .next()
                    .ok_or(TransportError::InvalidFrame("missing id"))?;
                let arb = u16::from_str_radix(arb, 16)
                    .map_err(|_| TransportError::InvalidFrame("id"))?;
                let data = hex::decode(parts.next().unwrap_or(""))
                    .map_err(|_| TransportError::InvalidFrame("data"))?;
                let mut frame = Frame::from_arbitration_id(arb, data)
                    .ok_or(TransportError::InvalidFrame("id range"))?;
                frame.timestamp = Some(Timestamp::now());
                Ok(Some(frame))
            }
            Some("ERR") => Err(TransportError::Io(line.to_string())),
            Some(_) => {
                tracing::debug!(line, "ignoring adapter line");
                Ok(None)
            }
        }
    }

    fn take_line(&mut self) -> Option<String> {
        let pos = self.acc.iter().position(|&b| b == b'\n')?;
        let line = self.acc.drain(..=pos).collect::<Vec<u8>>();
        Some(String::from_utf8_lossy(&line).trim().to_string())
    }
}

impl Transport for FdcanusbTransport {
    fn name(&self) -> &str {
        &self.port_path
    }

    fn send(&mut self, frame: &Frame) -> Result<()> {
        let line = Self::encode_frame(frame)?;
        self.port.write_all(&line)?;
        Ok(())
    }

    fn recv(&mut self, timeout: Option<Duration>) -> Result<Frame> {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut buf = [0u8; 256];
        let mut polled = false;
        loop {
            while let Some(line) = self.take_line() {
                if let Some(frame) = Self::parse_line(&line)? {
                    return Ok(frame);
                }
            }
            let slice = match deadline {
                Some(d) => {
                    let left = d.saturating_duration_since(Instant::now());
                    if left.is_zero() && polled {
                        return Err(TransportError::Timeout);
                    }
                    // A zero timeout still gets one short read of whatever is buffered.
                    left.max(Duration::from_millis(1))
                }
                None => Duration::from_millis(200),
            };
            polled = true;
            self.port.set_timeout(slice)?;
            match self.port.read(&mut buf) {
                Ok(0) => return Err(TransportError::Disconnected),
                Ok(n) => self.acc.extend_from_slice(&buf[..n]),
                Err(e) if e.kind() == ErrorKind::TimedOut => {
                    if deadline.is_some() {
                        return Err(TransportError::Timeout);
                    }
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::DeviceId;

    #[test]
    fn encodes_send_line() {
        let frame = Frame::request(DeviceId::HOST, DeviceId::new(1).unwrap(), b"d stop".to_vec());
        let line = FdcanusbTransport::encode_frame(&frame).unwrap();
        assert_eq!(line, b"can send 8001 642073746f70\n");
    }

    #[test]
    fn parses_rcv_line_and_skips_acks() {
        assert!(FdcanusbTransport::parse_line("OK").unwrap().is_none());
        let frame = FdcanusbTransport::parse_line("rcv 0100 4f4b E B F")
            .unwrap()
            .unwrap();
        assert_eq!(frame.source.raw(), 1);
        assert_eq!(frame.dest, DeviceId::HOST);
        assert_eq!(frame.data, b"OK");
    }
}
