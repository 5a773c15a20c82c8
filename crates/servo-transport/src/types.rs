use core::fmt;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// Largest payload a single frame may carry on an FD-capable bus.
pub const MAX_PAYLOAD: usize = 64;

/// 7-bit bus address of a controller (or of the host, which is always 0)
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct DeviceId(u8);

impl DeviceId {
    pub const HOST: DeviceId = DeviceId(0);
    pub const BROADCAST: DeviceId = DeviceId(0x7F);

    pub fn new(id: u8) -> Option<Self> {
        if id <= 0x7F {
            Some(Self(id))
        } else {
            None
        }
    }

    pub fn raw(&self) -> u8 {
        self.0
    }
}

impl Default for DeviceId {
    fn default() -> Self {
        DeviceId(1)
    }
}

impl TryFrom<u8> for DeviceId {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        DeviceId::new(value).ok_or_else(|| format!("device id out of range: {value}"))
    }
}

impl From<DeviceId> for u8 {
    fn from(id: DeviceId) -> u8 {
        id.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// An addressed frame exchanged with a device.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Frame {
    pub source: DeviceId,
    pub dest: DeviceId,
    pub reply_required: bool,
    pub data: Vec<u8>,
    pub timestamp: Option<Timestamp>,
}

impl Frame {
    pub fn new(source: DeviceId, dest: DeviceId, data: impl Into<Vec<u8>>) -> Self {
        Self {
            source,
            dest,
            reply_required: false,
            data: data.into(),
            timestamp: None,
        }
    }

    /// A host request that expects the device to answer.
    pub fn request(source: DeviceId, dest: DeviceId, data: impl Into<Vec<u8>>) -> Self {
        let mut frame = Self::new(source, dest, data);
        frame.reply_required = true;
        frame
    }

    /// The reply to this frame, addressed back to its sender.
    pub fn reply(&self, data: impl Into<Vec<u8>>) -> Self {
        Self::new(self.dest, self.source, data)
    }

    /// 16-bit arbitration id: reply flag, source and destination.
    pub fn arbitration_id(&self) -> u16 {
        let flag = if self.reply_required { 0x8000 } else { 0 };
        flag | (u16::from(self.source.raw()) << 8) | u16::from(self.dest.raw())
    }

    /// Rebuild addressing from an arbitration id.
    pub fn from_arbitration_id(arb: u16, data: impl Into<Vec<u8>>) -> Option<Self> {
        let source = DeviceId::new(((arb >> 8) & 0x7F) as u8)?;
        let dest = DeviceId::new((arb & 0x7F) as u8)?;
        let mut frame = Self::new(source, dest, data);
        frame.reply_required = arb & 0x8000 != 0;
        Some(frame)
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Timestamp(pub OffsetDateTime);

impl Timestamp {
    pub fn now() -> Self {
        Timestamp(OffsetDateTime::now_utc())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_id_range() {
        assert!(DeviceId::new(0x7F).is_some());
        assert!(DeviceId::new(0x80).is_none());
        assert_eq!(DeviceId::HOST.raw(), 0);
    }

    #[test]
    fn arbitration_id_round_trips_addressing() {
        let host = DeviceId::HOST;
        let servo = DeviceId::new(5).unwrap();
        let frame = Frame::request(host, servo, b"d stop".to_vec());
        assert_eq!(frame.arbitration_id(), 0x8005);

        let reply = frame.reply(b"OK".to_vec());
        assert_eq!(reply.arbitration_id(), 0x0500);

        let parsed = Frame::from_arbitration_id(0x8005, vec![1, 2]).unwrap();
        assert_eq!(parsed.source, host);
        assert_eq!(parsed.dest, servo);
        assert!(parsed.reply_required);
    }
}
