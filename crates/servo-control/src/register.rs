use crate::Resolution;
use core::fmt;
use core::str::FromStr;
use serde::{Deserialize, Serialize};

/// Addressable register of the controller's binary protocol.
///
/// The discriminant is the register's wire id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u16)]
pub enum Register {
    Mode = 0x000,
    Position = 0x001,
    Velocity = 0x002,
    Torque = 0x003,
    QCurrent = 0x004,
    DCurrent = 0x005,
    AbsPosition = 0x006,
    MotorTemperature = 0x00a,
    TrajectoryComplete = 0x00b,
    HomeState = 0x00c,
    Voltage = 0x00d,
    Temperature = 0x00e,
    Fault = 0x00f,

    CommandPosition = 0x020,
    CommandVelocity = 0x021,
    CommandFeedforwardTorque = 0x022,
    CommandKpScale = 0x023,
    CommandKdScale = 0x024,
    CommandPositionMaxTorque = 0x025,
    CommandStopPosition = 0x026,
    CommandTimeout = 0x027,
    VelocityLimit = 0x028,
    AccelLimit = 0x029,
    FixedVoltageOverride = 0x02a,

    ControlPosition = 0x060,
    ControlVelocity = 0x061,
    ControlTorque = 0x062,
    PositionError = 0x063,
    VelocityError = 0x064,
    TorqueError = 0x065,

    ModelNumber = 0x100,
    FirmwareVersion = 0x101,
    RegisterMapVersion = 0x102,
}

/// Physical class of a register; selects the integer scale factors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterClass {
    /// Revolutions, rev/s, rev/s^2 and dimensionless gain scales.
    Position,
    /// Newton-meters and amperes.
    Torque,
    Voltage,
    Temperature,
    Time,
    /// Enumerations, flags and counters; stored unscaled.
    Discrete,
}

impl Register {
    pub const ALL: [Register; 33] = [
        Register::Mode,
        Register::Position,
        Register::Velocity,
        Register::Torque,
        Register::QCurrent,
        Register::DCurrent,
        Register::AbsPosition,
        Register::MotorTemperature,
        Register::TrajectoryComplete,
        Register::HomeState,
        Register::Voltage,
        Register::Temperature,
        Register::Fault,
        Register::CommandPosition,
        Register::CommandVelocity,
        Register::CommandFeedforwardTorque,
        Register::CommandKpScale,
        Register::CommandKdScale,
        Register::CommandPositionMaxTorque,
        Register::CommandStopPosition,
        Register::CommandTimeout,
        Register::VelocityLimit,
        Register::AccelLimit,
        Register::FixedVoltageOverride,
        Register::ControlPosition,
        Register::ControlVelocity,
        Register::ControlTorque,
        Register::PositionError,
        Register::VelocityError,
        Register::TorqueError,
        Register::ModelNumber,
        Register::FirmwareVersion,
        Register::RegisterMapVersion,
    ];

    pub fn id(self) -> u16 {
        self as u16
    }

    pub fn from_id(id: u16) -> Option<Self> {
        Self::ALL.iter().copied().find(|r| r.id() == id)
    }

    pub fn name(self) -> &'static str {
        match self {
            Register::Mode => "mode",
            Register::Position => "position",
            Register::Velocity => "velocity",
            Register::Torque => "torque",
            Register::QCurrent => "q_current",
            Register::DCurrent => "d_current",
            Register::AbsPosition => "abs_position",
            Register::MotorTemperature => "motor_temperature",
            Register::TrajectoryComplete => "trajectory_complete",
            Register::HomeState => "home_state",
            Register::Voltage => "voltage",
            Register::Temperature => "temperature",
            Register::Fault => "fault",
            Register::CommandPosition => "command_position",
            Register::CommandVelocity => "command_velocity",
            Register::CommandFeedforwardTorque => "command_feedforward_torque",
            Register::CommandKpScale => "command_kp_scale",
            Register::CommandKdScale => "command_kd_scale",
            Register::CommandPositionMaxTorque => "command_position_max_torque",
            Register::CommandStopPosition => "command_stop_position",
            Register::CommandTimeout => "command_timeout",
            Register::VelocityLimit => "velocity_limit",
            Register::AccelLimit => "accel_limit",
            Register::FixedVoltageOverride => "fixed_voltage_override",
            Register::ControlPosition => "control_position",
            Register::ControlVelocity => "control_velocity",
            Register::ControlTorque => "control_torque",
            Register::PositionError => "position_error",
            Register::VelocityError => "velocity_error",
            Register::TorqueError => "torque_error",
            Register::ModelNumber => "model_number",
            Register::FirmwareVersion => "firmware_version",
            Register::RegisterMapVersion => "register_map_version",
        }
    }

    pub fn class(self) -> RegisterClass {
        use Register::*;
        match self {
            Position | Velocity | AbsPosition | CommandPosition | CommandVelocity
            | CommandKpScale | CommandKdScale | CommandStopPosition | VelocityLimit
            | AccelLimit | ControlPosition | ControlVelocity | PositionError | VelocityError => {
                RegisterClass::Position
            }
            Torque | QCurrent | DCurrent | CommandFeedforwardTorque | CommandPositionMaxTorque
            | ControlTorque | TorqueError => RegisterClass::Torque,
            Voltage | FixedVoltageOverride => RegisterClass::Voltage,
            MotorTemperature | Temperature => RegisterClass::Temperature,
            CommandTimeout => RegisterClass::Time,
            Mode | TrajectoryComplete | HomeState | Fault | ModelNumber | FirmwareVersion
            | RegisterMapVersion => RegisterClass::Discrete,
        }
    }

    /// Scale used to store this register at `resolution` (value = raw / scale).
    pub fn scale(self, resolution: Resolution) -> f64 {
        let (s8, s16, s32) = match self.class() {
            RegisterClass::Position => return resolution.scale(),
            RegisterClass::Torque => (2.0, 100.0, 1_000.0),
            RegisterClass::Voltage => (2.0, 10.0, 1_000.0),
            RegisterClass::Temperature => (1.0, 10.0, 1_000.0),
            RegisterClass::Time => (100.0, 1_000.0, 1_000_000.0),
            RegisterClass::Discrete => (1.0, 1.0, 1.0),
        };
        match resolution {
            Resolution::Int8 => s8,
            Resolution::Int16 => s16,
            Resolution::Int32 => s32,
            Resolution::Float32 | Resolution::Ignore => 1.0,
        }
    }
}

impl fmt::Display for Register {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Register {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|r| r.name() == s)
            .ok_or_else(|| format!("unknown register: {s}"))
    }
}
