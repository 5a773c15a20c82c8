//! servo-control: register codec, serialized diagnostic channel and controller sessions

mod error;
pub use error::{ControlError, Result};

mod register;
pub use register::{Register, RegisterClass};

pub mod codec;
pub use codec::Resolution;

mod resolution;
pub use resolution::{QueryResolution, ResolutionOverrides};

mod frame;
pub use frame::{DeviceFault, DeviceMode, ResultFrame};

mod command;
pub use command::{ControlCommand, Motion, PositionCommand, Setpoint};

pub mod wire;

mod metrics;
pub use metrics::{ChannelMetrics, MetricsHub};

mod channel;
pub use channel::{CancelToken, ChannelOptions, DiagnosticChannel};

mod cadence;
pub use cadence::Cadence;

mod telemetry;
pub use telemetry::{
    ChannelFormat, Poll, TelemetryReader, TelemetryRecord, TelemetrySchema, TelemetryValue,
};

mod session;
pub use session::{Controller, Reply};

mod config;
pub use config::{load_config_dir, load_config_file, load_config_str, SessionConfig};

#[cfg(any(test, feature = "mock"))]
mod sim;
#[cfg(any(test, feature = "mock"))]
pub use sim::{SimSnapshot, SimulatedServo};
