use crate::{ControlError, Result};
use core::fmt;
use core::str::FromStr;

/// Target for one control axis.
///
/// `Free` leaves the axis unconstrained; on the wire it is written as `nan`.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum Setpoint {
    #[default]
    Free,
    At(f64),
}

impl Setpoint {
    pub fn value(self) -> Option<f64> {
        match self {
            Setpoint::Free => None,
            Setpoint::At(v) => Some(v),
        }
    }

    fn parse(token: &str) -> Result<Self> {
        parse_optional(token).map(|v| v.map_or(Setpoint::Free, Setpoint::At))
    }
}

impl From<f64> for Setpoint {
    fn from(v: f64) -> Self {
        Setpoint::At(v)
    }
}

impl From<Option<f64>> for Setpoint {
    fn from(v: Option<f64>) -> Self {
        v.map_or(Setpoint::Free, Setpoint::At)
    }
}

impl fmt::Display for Setpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Setpoint::Free => f.write_str("nan"),
            Setpoint::At(v) => write!(f, "{v}"),
        }
    }
}

/// How the device will blend position, velocity and torque for a command.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Motion {
    /// Hold a fixed position.
    Hold { position: f64 },
    /// Pass through `position` while moving at `velocity`.
    Trajectory { position: f64, velocity: f64 },
    /// Pure velocity control.
    Velocity { velocity: f64 },
    /// Both axes free; only the feedforward torque acts.
    Torque { feedforward: f64 },
}

/// Fields of a `d pos` command. Options left as `None` are not sent.
#[derive(Debug, Clone, PartialEq)]
pub struct PositionCommand {
    pub position: Setpoint,
    pub velocity: Setpoint,
    /// `None` uses the device's configured ceiling.
    pub max_torque: Option<f64>,
    pub feedforward_torque: Option<f64>,
    pub kp_scale: Option<f64>,
    pub kd_scale: Option<f64>,
    pub stop_position: Option<f64>,
    pub watchdog_timeout: Option<f64>,
    pub velocity_limit: Option<f64>,
    pub accel_limit: Option<f64>,
    pub fixed_voltage_override: Option<f64>,
}

impl Default for PositionCommand {
    fn default() -> Self {
        Self::new(Setpoint::Free)
    }
}

impl PositionCommand {
    /// Command towards `position` with the default velocity of zero.
    pub fn new(position: impl Into<Setpoint>) -> Self {
        Self {
            position: position.into(),
            velocity: Setpoint::At(0.0),
            max_torque: None,
            feedforward_torque: None,
            kp_scale: None,
            kd_scale: None,
            stop_position: None,
            watchdog_timeout: None,
            velocity_limit: None,
            accel_limit: None,
            fixed_voltage_override: None,
        }
    }

    /// Hold `position` with the velocity axis unconstrained.
    pub fn hold(position: f64) -> Self {
        Self::new(position).with_velocity(Setpoint::Free)
    }

    /// Spin at `velocity` with the position axis unconstrained.
    pub fn spin(velocity: f64) -> Self {
        Self::new(Setpoint::Free).with_velocity(velocity)
    }

    pub fn with_velocity(mut self, velocity: impl Into<Setpoint>) -> Self {
        self.velocity = velocity.into();
        self
    }

    pub fn with_max_torque(mut self, max_torque: f64) -> Self {
        self.max_torque = Some(max_torque);
        self
    }

    pub fn with_feedforward_torque(mut self, torque: f64) -> Self {
        self.feedforward_torque = Some(torque);
        self
    }

    pub fn with_gain_scales(mut self, kp_scale: f64, kd_scale: f64) -> Self {
        self.kp_scale = Some(kp_scale);
        self.kd_scale = Some(kd_scale);
        self
    }

    pub fn with_stop_position(mut self, stop_position: f64) -> Self {
        self.stop_position = Some(stop_position);
        self
    }

    pub fn with_watchdog_timeout(mut self, seconds: f64) -> Self {
        self.watchdog_timeout = Some(seconds);
        self
    }

    pub fn with_limits(mut self, velocity_limit: f64, accel_limit: f64) -> Self {
        self.velocity_limit = Some(velocity_limit);
        self.accel_limit = Some(accel_limit);
        self
    }

    pub fn with_fixed_voltage_override(mut self, volts: f64) -> Self {
        self.fixed_voltage_override = Some(volts);
        self
    }

    pub fn motion(&self) -> Motion {
        match (self.position, self.velocity) {
            (Setpoint::At(position), Setpoint::Free) => Motion::Hold { position },
            (Setpoint::At(position), Setpoint::At(velocity)) if velocity == 0.0 => {
                Motion::Hold { position }
            }
            (Setpoint::At(position), Setpoint::At(velocity)) => {
                Motion::Trajectory { position, velocity }
            }
            (Setpoint::Free, Setpoint::At(velocity)) => Motion::Velocity { velocity },
            (Setpoint::Free, Setpoint::Free) => Motion::Torque {
                feedforward: self.feedforward_torque.unwrap_or(0.0),
            },
        }
    }

    fn options(&self) -> [(char, Option<f64>); 8] {
        [
            ('p', self.kp_scale),
            ('d', self.kd_scale),
            ('s', self.stop_position),
            ('f', self.feedforward_torque),
            ('t', self.watchdog_timeout),
            ('v', self.velocity_limit),
            ('a', self.accel_limit),
            ('o', self.fixed_voltage_override),
        ]
    }

    /// Reject values that cannot be written on the wire.
    pub fn validate(&self) -> Result<()> {
        let fields = [self.position.value(), self.velocity.value(), self.max_torque];
        let options = self.options().map(|(_, v)| v);
        for v in fields.iter().chain(options.iter()).flatten() {
            if !v.is_finite() {
                return Err(ControlError::InvalidArgument(format!(
                    "non-finite value in position command: {v}"
                )));
            }
        }
        Ok(())
    }

    fn write_text(&self, out: &mut String) {
        let max_torque = Setpoint::from(self.max_torque);
        out.push_str(&format!(
            "d pos {} {} {}",
            self.position, self.velocity, max_torque
        ));
        for (letter, value) in self.options() {
            if let Some(v) = value {
                out.push_str(&format!(" {letter}:{v}"));
            }
        }
    }

    fn parse_fields(tokens: &[&str]) -> Result<Self> {
        let [position, velocity, max_torque, options @ ..] = tokens else {
            return Err(ControlError::InvalidArgument(
                "d pos needs position, velocity and max torque".into(),
            ));
        };
        let mut cmd = PositionCommand::new(Setpoint::parse(position)?);
        cmd.velocity = Setpoint::parse(velocity)?;
        cmd.max_torque = parse_optional(max_torque)?;
        for option in options {
            let (letter, value) = option.split_once(':').ok_or_else(|| {
                ControlError::InvalidArgument(format!("bad option: {option}"))
            })?;
            let value = parse_optional(value)?;
            let slot = match letter {
                "p" => &mut cmd.kp_scale,
                "d" => &mut cmd.kd_scale,
                "s" => &mut cmd.stop_position,
                "f" => &mut cmd.feedforward_torque,
                "t" => &mut cmd.watchdog_timeout,
                "v" => &mut cmd.velocity_limit,
                "a" => &mut cmd.accel_limit,
                "o" => &mut cmd.fixed_voltage_override,
                other => {
                    return Err(ControlError::InvalidArgument(format!(
                        "unknown option letter: {other}"
                    )))
                }
            };
            *slot = value;
        }
        Ok(cmd)
    }
}

/// A command understood by the device's diagnostic console.
#[derive(Debug, Clone, PartialEq)]
pub enum ControlCommand {
    Stop,
    Position(PositionCommand),
    Exact { value: f64 },
    ConfigGet { name: String },
    ConfigSet { name: String, value: f64 },
}

impl ControlCommand {
    pub fn to_text(&self) -> String {
        match self {
            ControlCommand::Stop => "d stop".to_string(),
            ControlCommand::Position(cmd) => {
                let mut out = String::with_capacity(64);
                cmd.write_text(&mut out);
                out
            }
            ControlCommand::Exact { value } => format!("d exact {value}"),
            ControlCommand::ConfigGet { name } => format!("conf get {name}"),
            ControlCommand::ConfigSet { name, value } => format!("conf set {name} {value}"),
        }
    }
}

impl fmt::Display for ControlCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_text())
    }
}

impl FromStr for ControlCommand {
    type Err = ControlError;

    fn from_str(s: &str) -> Result<Self> {
        let tokens: Vec<&str> = s.split_whitespace().collect();
        match tokens.as_slice() {
            ["d", "stop"] => Ok(ControlCommand::Stop),
            ["d", "pos", rest @ ..] => {
                Ok(ControlCommand::Position(PositionCommand::parse_fields(rest)?))
            }
            ["d", "exact", value] => Ok(ControlCommand::Exact {
                value: parse_number(value)?,
            }),
            ["conf", "get", name] => Ok(ControlCommand::ConfigGet {
                name: (*name).to_string(),
            }),
            ["conf", "set", name, value] => Ok(ControlCommand::ConfigSet {
                name: (*name).to_string(),
                value: parse_number(value)?,
            }),
            _ => Err(ControlError::InvalidArgument(format!(
                "unrecognized command: {s}"
            ))),
        }
    }
}

fn parse_number(token: &str) -> Result<f64> {
    token
        .parse::<f64>()
        .map_err(|_| ControlError::InvalidArgument(format!("not a number: {token}")))
}

/// `nan` means "not given".
fn parse_optional(token: &str) -> Result<Option<f64>> {
    let v = parse_number(token)?;
    Ok(if v.is_nan() { None } else { Some(v) })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_render_minimal_command() {
        let cmd = ControlCommand::Position(PositionCommand::new(0.5));
        assert_eq!(cmd.to_text(), "d pos 0.5 0 nan");
    }

    #[test]
    fn free_axes_render_as_nan() {
        let text = ControlCommand::Position(PositionCommand::spin(1.0).with_max_torque(1.0)).to_text();
        assert_eq!(text, "d pos nan 1 1");
    }

    #[test]
    fn options_only_when_set() {
        let cmd = PositionCommand::new(0.5)
            .with_limits(3.0, 8.0)
            .with_feedforward_torque(0.2);
        assert_eq!(
            ControlCommand::Position(cmd).to_text(),
            "d pos 0.5 0 nan f:0.2 v:3 a:8"
        );
    }

    #[test]
    fn parses_back_what_it_writes() {
        let cmd = PositionCommand::hold(-0.25)
            .with_max_torque(1.5)
            .with_gain_scales(0.5, 2.0)
            .with_stop_position(1.0)
            .with_watchdog_timeout(0.1)
            .with_fixed_voltage_override(3.0);
        let text = ControlCommand::Position(cmd.clone()).to_text();
        assert_eq!(text.parse::<ControlCommand>().unwrap(), ControlCommand::Position(cmd));
    }

    #[test]
    fn motion_follows_free_axes() {
        assert_eq!(PositionCommand::hold(0.3).motion(), Motion::Hold { position: 0.3 });
        assert_eq!(PositionCommand::new(0.3).motion(), Motion::Hold { position: 0.3 });
        assert_eq!(
            PositionCommand::spin(2.0).motion(),
            Motion::Velocity { velocity: 2.0 }
        );
        assert_eq!(
            PositionCommand::new(1.0).with_velocity(0.5).motion(),
            Motion::Trajectory {
                position: 1.0,
                velocity: 0.5
            }
        );
        assert_eq!(
            PositionCommand::new(Setpoint::Free)
                .with_velocity(Setpoint::Free)
                .with_feedforward_torque(0.1)
                .motion(),
            Motion::Torque { feedforward: 0.1 }
        );
    }

    #[test]
    fn rejects_non_finite_values() {
        assert!(PositionCommand::new(f64::INFINITY).validate().is_err());
        assert!(PositionCommand::new(0.0).with_accel_nan().validate().is_err());
        assert!(PositionCommand::new(0.0).validate().is_ok());
    }

    impl PositionCommand {
        fn with_accel_nan(mut self) -> Self {
            self.accel_limit = Some(f64::NAN);
            self
        }
    }

    #[test]
    fn parses_console_commands() {
        assert_eq!("d stop".parse::<ControlCommand>().unwrap(), ControlCommand::Stop);
        assert_eq!(
            "d exact 0".parse::<ControlCommand>().unwrap(),
            ControlCommand::Exact { value: 0.0 }
        );
        assert_eq!(
            "conf set servopos.position_max 1".parse::<ControlCommand>().unwrap(),
            ControlCommand::ConfigSet {
                name: "servopos.position_max".into(),
                value: 1.0
            }
        );
        assert!("d pos 1 2".parse::<ControlCommand>().is_err());
        assert!("d pos 1 2 3 q:1".parse::<ControlCommand>().is_err());
    }
}
