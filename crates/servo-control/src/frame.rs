use crate::Register;
use core::fmt;

/// Operating mode reported in the `mode` register.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceMode {
    Stopped,
    Fault,
    Position,
    /// The command watchdog expired.
    Timeout,
    ZeroVelocity,
    Brake,
    Other(u8),
}

impl DeviceMode {
    pub fn from_raw(raw: u8) -> Self {
        match raw {
            0 => DeviceMode::Stopped,
            1 => DeviceMode::Fault,
            10 => DeviceMode::Position,
            11 => DeviceMode::Timeout,
            12 => DeviceMode::ZeroVelocity,
            15 => DeviceMode::Brake,
            other => DeviceMode::Other(other),
        }
    }

    pub fn raw(self) -> u8 {
        match self {
            DeviceMode::Stopped => 0,
            DeviceMode::Fault => 1,
            DeviceMode::Position => 10,
            DeviceMode::Timeout => 11,
            DeviceMode::ZeroVelocity => 12,
            DeviceMode::Brake => 15,
            DeviceMode::Other(raw) => raw,
        }
    }

    /// Latched until a stop command.
    pub fn is_latched_fault(self) -> bool {
        matches!(self, DeviceMode::Fault | DeviceMode::Timeout)
    }
}

/// Device-reported fault status. Not a channel error; cleared only by a stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceFault {
    pub mode: Option<DeviceMode>,
    pub code: u32,
}

impl fmt::Display for DeviceFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.mode {
            Some(mode) => write!(f, "device fault {} in mode {:?}", self.code, mode),
            None => write!(f, "device fault {}", self.code),
        }
    }
}

/// Decoded register values, in the order they were requested.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ResultFrame {
    values: Vec<(Register, Option<f64>)>,
}

impl ResultFrame {
    pub fn with_capacity(n: usize) -> Self {
        Self {
            values: Vec::with_capacity(n),
        }
    }

    pub fn push(&mut self, register: Register, value: Option<f64>) {
        self.values.push((register, value));
    }

    /// Value of `register`; `None` when not queried or reported as "no value".
    pub fn get(&self, register: Register) -> Option<f64> {
        self.values
            .iter()
            .find(|(r, _)| *r == register)
            .and_then(|(_, v)| *v)
    }

    pub fn contains(&self, register: Register) -> bool {
        self.values.iter().any(|(r, _)| *r == register)
    }

    pub fn iter(&self) -> impl Iterator<Item = (Register, Option<f64>)> + '_ {
        self.values.iter().copied()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn mode(&self) -> Option<DeviceMode> {
        self.get(Register::Mode)
            .map(|m| DeviceMode::from_raw(m.round().clamp(0.0, 255.0) as u8))
    }

    pub fn fault(&self) -> Option<DeviceFault> {
        let mode = self.mode();
        let code = self
            .get(Register::Fault)
            .map(|c| c.round().max(0.0) as u32)
            .unwrap_or(0);
        if code != 0 || mode.is_some_and(DeviceMode::is_latched_fault) {
            Some(DeviceFault { mode, code })
        } else {
            None
        }
    }
}

impl fmt::Display for ResultFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (reg, value)) in self.values.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            match value {
                Some(v) => write!(f, "{reg}={v}")?,
                None => write!(f, "{reg}=-")?,
            }
        }
        Ok(())
    }
}
