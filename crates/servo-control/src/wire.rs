//! Binary payloads of the register protocol.
//!
//! Binary requests start with a byte >= 0x80 so they never collide with console text:
//!
//! - `0x80 count (reg u16 LE, res u8)*`: register query
//! - `0x81 len text[len] count (reg u16 LE, res u8)*`: console command plus query
//!
//! The reply to either is the concatenation of each register's encoded value.

use crate::codec::{decode_with, encode_with};
use crate::{ControlError, Register, Resolution, Result, ResultFrame};

pub const QUERY: u8 = 0x80;
pub const COMMAND_QUERY: u8 = 0x81;

/// A request as seen by the device.
#[derive(Debug, Clone, PartialEq)]
pub enum Request {
    Text(String),
    Query(Vec<(Register, Resolution)>),
    CommandQuery {
        text: String,
        registers: Vec<(Register, Resolution)>,
    },
}

fn push_registers(out: &mut Vec<u8>, registers: &[(Register, Resolution)]) -> Result<()> {
    let wire: Vec<(Register, u8)> = registers
        .iter()
        .filter_map(|(reg, res)| res.code().map(|c| (*reg, c)))
        .collect();
    let count = u8::try_from(wire.len())
        .map_err(|_| ControlError::InvalidArgument("more than 255 registers".into()))?;
    out.push(count);
    for (reg, code) in wire {
        out.extend_from_slice(&reg.id().to_le_bytes());
        out.push(code);
    }
    Ok(())
}

/// Encode a register query. `Ignore` entries are left off the wire.
pub fn encode_query(registers: &[(Register, Resolution)]) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(2 + registers.len() * 3);
    out.push(QUERY);
    push_registers(&mut out, registers)?;
    Ok(out)
}

pub fn encode_command_query(text: &str, registers: &[(Register, Resolution)]) -> Result<Vec<u8>> {
    let len = u8::try_from(text.len())
        .map_err(|_| ControlError::InvalidArgument("command longer than 255 bytes".into()))?;
    let mut out = Vec::with_capacity(3 + text.len() + registers.len() * 3);
    out.push(COMMAND_QUERY);
    out.push(len);
    out.extend_from_slice(text.as_bytes());
    push_registers(&mut out, registers)?;
    Ok(out)
}

fn take_registers(bytes: &[u8], raw: &[u8]) -> Result<Vec<(Register, Resolution)>> {
    let (&count, mut rest) = bytes
        .split_first()
        .ok_or_else(|| ControlError::protocol("missing register count", raw))?;
    let mut out = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let [lo, hi, code, tail @ ..] = rest else {
            return Err(ControlError::protocol("truncated register list", raw));
        };
        let id = u16::from_le_bytes([*lo, *hi]);
        let reg = Register::from_id(id)
            .ok_or_else(|| ControlError::protocol(format!("unknown register 0x{id:03x}"), raw))?;
        let res = Resolution::from_code(*code)
            .ok_or_else(|| ControlError::protocol(format!("unknown resolution {code}"), raw))?;
        out.push((reg, res));
        rest = tail;
    }
    if !rest.is_empty() {
        return Err(ControlError::protocol("trailing bytes after register list", raw));
    }
    Ok(out)
}

pub fn decode_request(bytes: &[u8]) -> Result<Request> {
    match bytes.split_first() {
        Some((&QUERY, rest)) => Ok(Request::Query(take_registers(rest, bytes)?)),
        Some((&COMMAND_QUERY, rest)) => {
            let (&len, rest) = rest
                .split_first()
                .ok_or_else(|| ControlError::protocol("missing command length", bytes))?;
            let len = len as usize;
            if rest.len() < len {
                return Err(ControlError::protocol("truncated command text", bytes));
            }
            let text = String::from_utf8_lossy(&rest[..len]).into_owned();
            let registers = take_registers(&rest[len..], bytes)?;
            Ok(Request::CommandQuery { text, registers })
        }
        Some((first, _)) if *first >= 0x80 => {
            Err(ControlError::protocol(format!("unknown opcode 0x{first:02x}"), bytes))
        }
        _ => Ok(Request::Text(
            String::from_utf8_lossy(bytes).trim_end().to_string(),
        )),
    }
}

/// Device side: encode `values` in request order.
pub fn encode_values(values: &[(Register, Resolution, Option<f64>)]) -> Vec<u8> {
    let mut out = Vec::new();
    for (reg, res, value) in values {
        out.extend(encode_with(*value, *res, reg.scale(*res)));
    }
    out
}

/// Decode a reply positionally against the registers that were requested.
pub fn decode_reply(bytes: &[u8], registers: &[(Register, Resolution)]) -> Result<ResultFrame> {
    let mut offset = 0;
    let mut frame = ResultFrame::with_capacity(registers.len());
    for (reg, res) in registers {
        if *res == Resolution::Ignore {
            continue;
        }
        let value = decode_with(&bytes[offset..], *res, reg.scale(*res)).map_err(|e| {
            tracing::warn!(raw = %hex::encode(bytes), register = %reg, "short register reply");
            e
        })?;
        offset += res.width();
        frame.push(*reg, value);
    }
    if offset != bytes.len() {
        return Err(ControlError::protocol(
            format!("{} trailing bytes in register reply", bytes.len() - offset),
            bytes,
        ));
    }
    Ok(frame)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registers() -> Vec<(Register, Resolution)> {
        vec![
            (Register::Mode, Resolution::Int8),
            (Register::Position, Resolution::Float32),
            (Register::Voltage, Resolution::Ignore),
            (Register::Velocity, Resolution::Int16),
        ]
    }

    #[test]
    fn query_layout() {
        let bytes = encode_query(&registers()).unwrap();
        assert_eq!(
            bytes,
            vec![QUERY, 3, 0x00, 0x00, 0, 0x01, 0x00, 3, 0x02, 0x00, 1]
        );
        let Request::Query(decoded) = decode_request(&bytes).unwrap() else {
            panic!("expected query");
        };
        assert_eq!(decoded.len(), 3);
        assert_eq!(decoded[2], (Register::Velocity, Resolution::Int16));
    }

    #[test]
    fn command_query_carries_text() {
        let bytes = encode_command_query("d stop", &registers()).unwrap();
        match decode_request(&bytes).unwrap() {
            Request::CommandQuery { text, registers } => {
                assert_eq!(text, "d stop");
                assert_eq!(registers.len(), 3);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn text_is_passed_through() {
        assert_eq!(
            decode_request(b"conf get servo.pid_position.kp\n").unwrap(),
            Request::Text("conf get servo.pid_position.kp".into())
        );
    }

    #[test]
    fn reply_decodes_positionally() {
        let values = [
            (Register::Mode, Resolution::Int8, Some(10.0)),
            (Register::Position, Resolution::Float32, Some(0.5)),
            (Register::Velocity, Resolution::Int16, None),
        ];
        let bytes = encode_values(&values);
        assert_eq!(bytes.len(), 1 + 4 + 2);
        let frame = decode_reply(&bytes, &registers()).unwrap();
        assert_eq!(frame.get(Register::Mode), Some(10.0));
        assert_eq!(frame.get(Register::Position), Some(0.5));
        assert_eq!(frame.get(Register::Velocity), None);
        assert!(frame.contains(Register::Velocity));
        assert!(!frame.contains(Register::Voltage));
    }

    #[test]
    fn short_reply_is_malformed() {
        let err = decode_reply(&[10, 0, 0], &registers()).unwrap_err();
        assert!(matches!(err, ControlError::MalformedFrame { needed: 4, got: 2, .. }));
    }

    #[test]
    fn long_reply_is_protocol_error() {
        let mut bytes = encode_values(&[
            (Register::Mode, Resolution::Int8, Some(0.0)),
            (Register::Position, Resolution::Float32, Some(0.0)),
            (Register::Velocity, Resolution::Int16, Some(0.0)),
        ]);
        bytes.push(0xFF);
        let err = decode_reply(&bytes, &registers()).unwrap_err();
        assert!(matches!(err, ControlError::Protocol { .. }));
    }

    #[test]
    fn unknown_opcode_rejected() {
        assert!(decode_request(&[0x9F, 0]).is_err());
    }
}
