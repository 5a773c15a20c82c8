//! In-process servo that answers the console, register and telemetry protocols.
//!
//! Plug it into a [`MockTransport`] to exercise sessions without hardware.

use crate::codec::encode_with;
use crate::command::{ControlCommand, Motion};
use crate::frame::DeviceMode;
use crate::telemetry::{ChannelFormat, TelemetrySchema};
use crate::wire::{self, Request};
use crate::{Register, Resolution};
use servo_transport::{DeviceId, Frame, MockTransport};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimSnapshot {
    pub mode: DeviceMode,
    pub position: f64,
    pub velocity: f64,
    pub torque: f64,
    pub fault: u8,
}

struct SimChannel {
    schema: TelemetrySchema,
    values: BTreeMap<String, f64>,
}

struct SimState {
    motion: SimSnapshot,
    voltage: f64,
    temperature: f64,
    silent: bool,
    last_command: Option<ControlCommand>,
    config: BTreeMap<String, String>,
    channels: BTreeMap<String, SimChannel>,
}

impl SimState {
    fn register(&self, reg: Register) -> Option<f64> {
        let m = &self.motion;
        match reg {
            Register::Mode => Some(f64::from(m.mode.raw())),
            Register::Position | Register::ControlPosition => Some(m.position),
            Register::Velocity | Register::ControlVelocity => Some(m.velocity),
            Register::Torque | Register::ControlTorque => Some(m.torque),
            Register::Voltage => Some(self.voltage),
            Register::Temperature => Some(self.temperature),
            Register::Fault => Some(f64::from(m.fault)),
            Register::PositionError | Register::VelocityError | Register::TorqueError => Some(0.0),
            Register::RegisterMapVersion => Some(4.0),
            _ => None,
        }
    }

    fn field(&self, channel: &SimChannel, name: &str) -> Option<f64> {
        if let Some(v) = channel.values.get(name) {
            return Some(*v);
        }
        let reg = name.parse::<Register>().ok()?;
        self.register(reg)
    }

    fn run(&mut self, text: &str) -> Vec<u8> {
        let tokens: Vec<&str> = text.split_whitespace().collect();
        let reply = match tokens.as_slice() {
            ["tel", "list"] => {
                let mut out = String::new();
                for name in self.channels.keys() {
                    out.push_str(name);
                    out.push('\n');
                }
                out.push_str("OK");
                out
            }
            ["tel", "schema", name] => match self.channels.get(*name) {
                Some(ch) => ch.schema.to_text(),
                None => "ERR unknown channel".to_string(),
            },
            ["tel", "get", name] => return self.telemetry(name),
            _ => match text.parse::<ControlCommand>() {
                Ok(cmd) => self.apply(cmd),
                Err(_) => "ERR unknown command".to_string(),
            },
        };
        let mut bytes = reply.into_bytes();
        bytes.extend_from_slice(b"\r\n");
        bytes
    }

    fn apply(&mut self, cmd: ControlCommand) -> String {
        let reply = match &cmd {
            ControlCommand::Stop => {
                self.motion.mode = DeviceMode::Stopped;
                self.motion.velocity = 0.0;
                self.motion.torque = 0.0;
                self.motion.fault = 0;
                "OK".to_string()
            }
            ControlCommand::Position(pos) => {
                // Latched faults ignore motion until stopped.
                if !self.motion.mode.is_latched_fault() {
                    self.motion.mode = DeviceMode::Position;
                    match pos.motion() {
                        Motion::Hold { position } => {
                            self.motion.position = position;
                            self.motion.velocity = 0.0;
                        }
                        Motion::Trajectory { position, velocity } => {
                            self.motion.position = position;
                            self.motion.velocity = velocity;
                        }
                        Motion::Velocity { velocity } => self.motion.velocity = velocity,
                        Motion::Torque { feedforward } => {
                            self.motion.velocity = 0.0;
                            self.motion.torque = feedforward;
                        }
                    }
                }
                "OK".to_string()
            }
            ControlCommand::Exact { value } => {
                self.motion.position = *value;
                "OK".to_string()
            }
            ControlCommand::ConfigGet { name } => match self.config.get(name) {
                Some(value) => value.clone(),
                None => "ERR unknown config".to_string(),
            },
            ControlCommand::ConfigSet { name, value } => {
                self.config.insert(name.clone(), format!("{value:.6}"));
                "OK".to_string()
            }
        };
        self.last_command = Some(cmd);
        reply
    }

    fn telemetry(&self, name: &str) -> Vec<u8> {
        let Some(channel) = self.channels.get(name) else {
            return b"ERR unknown channel\r\n".to_vec();
        };
        let schema = &channel.schema;
        match schema.format {
            ChannelFormat::Binary => {
                let mut out = schema.version.to_le_bytes().to_vec();
                for (field, res) in &schema.fields {
                    out.extend(encode_with(self.field(channel, field), *res, 1.0));
                }
                out
            }
            ChannelFormat::Text => {
                let mut out = format!("version {}\n", schema.version);
                for (field, res) in &schema.fields {
                    let value = match (self.field(channel, field), res) {
                        (None, _) => "nan".to_string(),
                        (Some(v), Resolution::Float32) => v.to_string(),
                        (Some(v), _) => (v.round() as i64).to_string(),
                    };
                    out.push_str(&format!("{field} {value}\n"));
                }
                out.into_bytes()
            }
        }
    }

    fn values(&self, registers: &[(Register, Resolution)]) -> Vec<u8> {
        let values: Vec<_> = registers
            .iter()
            .map(|(reg, res)| (*reg, *res, self.register(*reg)))
            .collect();
        wire::encode_values(&values)
    }

    fn handle(&mut self, data: &[u8]) -> Option<Vec<u8>> {
        if self.silent {
            return None;
        }
        match wire::decode_request(data) {
            Ok(Request::Text(text)) => Some(self.run(&text)),
            Ok(Request::Query(registers)) => Some(self.values(&registers)),
            Ok(Request::CommandQuery { text, registers }) => {
                self.run(&text);
                Some(self.values(&registers))
            }
            Err(_) => Some(b"ERR bad request\r\n".to_vec()),
        }
    }
}

/// A simulated controller. Clones share the same device state.
#[derive(Clone)]
pub struct SimulatedServo {
    id: DeviceId,
    state: Arc<Mutex<SimState>>,
}

impl SimulatedServo {
    pub fn new(id: DeviceId) -> Self {
        let config = [
            ("servopos.position_min", "-1.000000"),
            ("servopos.position_max", "1.000000"),
            ("servo.max_current_A", "20.000000"),
            ("servo.pid_position.kp", "4.000000"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .chain([("id.id".to_string(), id.raw().to_string())])
        .collect();

        let mut channels = BTreeMap::new();
        channels.insert(
            "servo_stats".to_string(),
            SimChannel {
                schema: TelemetrySchema::new(1, ChannelFormat::Binary)
                    .with_field("mode", Resolution::Int8)
                    .with_field("position", Resolution::Float32)
                    .with_field("velocity", Resolution::Float32)
                    .with_field("voltage", Resolution::Float32)
                    .with_field("fault", Resolution::Int8),
                values: BTreeMap::new(),
            },
        );
        channels.insert(
            "system_info".to_string(),
            SimChannel {
                schema: TelemetrySchema::new(1, ChannelFormat::Text)
                    .with_field("uptime_s", Resolution::Int32)
                    .with_field("board_temp", Resolution::Float32),
                values: [("uptime_s".to_string(), 12.0), ("board_temp".to_string(), 31.5)]
                    .into_iter()
                    .collect(),
            },
        );

        let state = SimState {
            motion: SimSnapshot {
                mode: DeviceMode::Stopped,
                position: 0.0,
                velocity: 0.0,
                torque: 0.0,
                fault: 0,
            },
            voltage: 24.0,
            temperature: 30.0,
            silent: false,
            last_command: None,
            config,
            channels,
        };
        Self {
            id,
            state: Arc::new(Mutex::new(state)),
        }
    }

    pub fn id(&self) -> DeviceId {
        self.id
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Answer one frame from the bus. Frames for other addresses get no reply.
    pub fn respond(&self, frame: &Frame) -> Vec<Frame> {
        if frame.dest != self.id || !frame.reply_required {
            return Vec::new();
        }
        match self.lock().handle(&frame.data) {
            Some(data) => vec![frame.reply(data)],
            None => Vec::new(),
        }
    }

    /// A mock bus with only this servo on it.
    pub fn transport(&self) -> MockTransport {
        Self::bus(std::slice::from_ref(self))
    }

    /// A mock bus shared by several servos.
    pub fn bus(servos: &[SimulatedServo]) -> MockTransport {
        let servos = servos.to_vec();
        MockTransport::with_responder("sim", move |frame| {
            servos.iter().flat_map(|s| s.respond(frame)).collect()
        })
    }

    pub fn snapshot(&self) -> SimSnapshot {
        self.lock().motion
    }

    pub fn last_command(&self) -> Option<ControlCommand> {
        self.lock().last_command.clone()
    }

    pub fn config_value(&self, name: &str) -> Option<String> {
        self.lock().config.get(name).cloned()
    }

    /// Latch a fault as the device would on an internal error.
    pub fn inject_fault(&self, code: u8) {
        let mut state = self.lock();
        state.motion.mode = DeviceMode::Fault;
        state.motion.fault = code;
        state.motion.velocity = 0.0;
    }

    /// The command watchdog lapsed.
    pub fn expire_watchdog(&self) {
        let mut state = self.lock();
        if state.motion.mode == DeviceMode::Position {
            state.motion.mode = DeviceMode::Timeout;
            state.motion.velocity = 0.0;
        }
    }

    /// Stop answering requests.
    pub fn set_silent(&self, silent: bool) {
        self.lock().silent = silent;
    }

    pub fn add_channel(&self, name: &str, schema: TelemetrySchema) {
        self.lock().channels.insert(
            name.to_string(),
            SimChannel {
                schema,
                values: BTreeMap::new(),
            },
        );
    }

    pub fn set_field(&self, channel: &str, field: &str, value: f64) {
        if let Some(ch) = self.lock().channels.get_mut(channel) {
            ch.values.insert(field.to_string(), value);
        }
    }

    /// Pretend a firmware update changed the channel's layout.
    pub fn bump_schema(&self, channel: &str) {
        if let Some(ch) = self.lock().channels.get_mut(channel) {
            ch.schema.version += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::decode;

    fn servo() -> SimulatedServo {
        SimulatedServo::new(DeviceId::new(3).unwrap())
    }

    fn ask(servo: &SimulatedServo, data: &[u8]) -> Vec<u8> {
        let frame = Frame::request(DeviceId::HOST, servo.id(), data.to_vec());
        let mut replies = servo.respond(&frame);
        assert_eq!(replies.len(), 1);
        replies.remove(0).data
    }

    #[test]
    fn ignores_other_addresses() {
        let servo = servo();
        let frame = Frame::request(DeviceId::HOST, DeviceId::new(4).unwrap(), b"d stop\n".to_vec());
        assert!(servo.respond(&frame).is_empty());
    }

    #[test]
    fn console_and_register_replies() {
        let servo = servo();
        assert_eq!(ask(&servo, b"d pos 0.25 nan nan\n"), b"OK\r\n");
        assert_eq!(servo.snapshot().mode, DeviceMode::Position);
        assert_eq!(servo.snapshot().position, 0.25);

        let query = wire::encode_query(&[(Register::Position, Resolution::Float32)]).unwrap();
        let reply = ask(&servo, &query);
        assert_eq!(decode(&reply, Resolution::Float32).unwrap(), Some(0.25));

        assert_eq!(ask(&servo, b"conf get nope\n"), b"ERR unknown config\r\n");
        assert_eq!(ask(&servo, b"bogus\n"), b"ERR unknown command\r\n");
    }

    #[test]
    fn fault_ignores_motion_until_stop() {
        let servo = servo();
        servo.inject_fault(33);
        ask(&servo, b"d pos nan 2 nan\n");
        assert_eq!(servo.snapshot().velocity, 0.0);
        ask(&servo, b"d stop\n");
        assert_eq!(servo.snapshot().fault, 0);
        assert_eq!(servo.snapshot().mode, DeviceMode::Stopped);
    }

    #[test]
    fn silent_servo_never_answers() {
        let servo = servo();
        servo.set_silent(true);
        let frame = Frame::request(DeviceId::HOST, servo.id(), b"d stop\n".to_vec());
        assert!(servo.respond(&frame).is_empty());
    }
}
