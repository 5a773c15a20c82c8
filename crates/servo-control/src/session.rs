use crate::channel::DiagnosticChannel;
use crate::command::{ControlCommand, PositionCommand};
use crate::config::SessionConfig;
use crate::telemetry::{TelemetryReader, TelemetryRecord};
use crate::{ControlError, QueryResolution, Result, ResultFrame};
use servo_transport::DeviceId;
use std::sync::Arc;
use tracing::debug;

/// Outcome of [`Controller::execute`].
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    Done,
    Frame(ResultFrame),
    Value(f64),
}

/// Typed control API for one device on a shared [`DiagnosticChannel`].
///
/// The resolution table is fixed for the life of the session; build a new session to
/// change it. Any number of sessions may share one channel.
pub struct Controller {
    id: DeviceId,
    channel: Arc<DiagnosticChannel>,
    query_resolution: QueryResolution,
    telemetry: TelemetryReader,
}

impl Controller {
    pub fn new(
        id: DeviceId,
        channel: Arc<DiagnosticChannel>,
        query_resolution: QueryResolution,
    ) -> Self {
        let telemetry = TelemetryReader::new(Arc::clone(&channel), id);
        Self {
            id,
            channel,
            query_resolution,
            telemetry,
        }
    }

    pub fn from_config(config: &SessionConfig, channel: Arc<DiagnosticChannel>) -> Self {
        Self::new(config.device_id, channel, config.query_resolution())
    }

    pub fn id(&self) -> DeviceId {
        self.id
    }

    pub fn query_resolution(&self) -> &QueryResolution {
        &self.query_resolution
    }

    pub fn channel(&self) -> &Arc<DiagnosticChannel> {
        &self.channel
    }

    pub fn telemetry(&self) -> &TelemetryReader {
        &self.telemetry
    }

    /// Halt and clear any latched fault.
    pub fn stop(&self) -> Result<()> {
        self.command(&ControlCommand::Stop)
    }

    /// Stop and report the resulting state in one transaction.
    pub fn stop_query(&self) -> Result<ResultFrame> {
        self.command_query(&ControlCommand::Stop)
    }

    /// Send a position-mode command, optionally querying the session's registers in the
    /// same transaction.
    pub fn set_position(
        &self,
        cmd: &PositionCommand,
        query: bool,
    ) -> Result<Option<ResultFrame>> {
        cmd.validate()?;
        debug!(device = %self.id, motion = ?cmd.motion(), "position command");
        let cmd = ControlCommand::Position(cmd.clone());
        if query {
            self.command_query(&cmd).map(Some)
        } else {
            self.command(&cmd).map(|()| None)
        }
    }

    /// Redefine the current position as `value` without moving.
    pub fn set_exact(&self, value: f64) -> Result<()> {
        if !value.is_finite() {
            return Err(ControlError::InvalidArgument(format!(
                "exact position must be finite: {value}"
            )));
        }
        self.command(&ControlCommand::Exact { value })
    }

    pub fn config_get(&self, name: &str) -> Result<f64> {
        let raw = self.config_get_raw(name)?;
        raw.trim().parse::<f64>().map_err(|_| {
            ControlError::protocol(format!("{name} is not a number"), raw.as_bytes())
        })
    }

    /// The device's reply to `conf get`, untouched.
    pub fn config_get_raw(&self, name: &str) -> Result<String> {
        check_config_name(name)?;
        let text = ControlCommand::ConfigGet {
            name: name.to_string(),
        }
        .to_text();
        let reply = self.channel.send(self.id, &text, true)?;
        if let Some(msg) = reply.strip_prefix("ERR") {
            return Err(ControlError::protocol(
                format!("device rejected `{text}`:{msg}"),
                reply.as_bytes(),
            ));
        }
        Ok(reply)
    }

    pub fn config_set(&self, name: &str, value: f64) -> Result<()> {
        check_config_name(name)?;
        if !value.is_finite() {
            return Err(ControlError::InvalidArgument(format!(
                "config value must be finite: {value}"
            )));
        }
        self.command(&ControlCommand::ConfigSet {
            name: name.to_string(),
            value,
        })
    }

    /// Read every register the session's resolution table does not ignore.
    pub fn query(&self) -> Result<ResultFrame> {
        self.channel
            .query(self.id, &self.query_resolution.query_list())
    }

    pub fn read_data(&self, channel: &str) -> Result<TelemetryRecord> {
        self.telemetry.read_data(channel)
    }

    /// Run any console command through its typed entry point.
    pub fn execute(&self, cmd: &ControlCommand, query: bool) -> Result<Reply> {
        match cmd {
            ControlCommand::Stop if query => self.stop_query().map(Reply::Frame),
            ControlCommand::Stop => self.stop().map(|()| Reply::Done),
            ControlCommand::Position(pos) => Ok(match self.set_position(pos, query)? {
                Some(frame) => Reply::Frame(frame),
                None => Reply::Done,
            }),
            ControlCommand::Exact { value } => self.set_exact(*value).map(|()| Reply::Done),
            ControlCommand::ConfigGet { name } => self.config_get(name).map(Reply::Value),
            ControlCommand::ConfigSet { name, value } => {
                self.config_set(name, *value).map(|()| Reply::Done)
            }
        }
    }

    fn command(&self, cmd: &ControlCommand) -> Result<()> {
        self.channel.send(self.id, &cmd.to_text(), false).map(|_| ())
    }

    fn command_query(&self, cmd: &ControlCommand) -> Result<ResultFrame> {
        self.channel
            .command_query(self.id, &cmd.to_text(), &self.query_resolution.query_list())
    }
}

fn check_config_name(name: &str) -> Result<()> {
    if name.is_empty() || name.chars().any(char::is_whitespace) {
        return Err(ControlError::InvalidArgument(format!(
            "bad config name: {name:?}"
        )));
    }
    Ok(())
}
