use crate::channel::{ChannelOptions, DiagnosticChannel};
use crate::{QueryResolution, ResolutionOverrides, Result};
use anyhow::Context;
use serde::{Deserialize, Serialize};
use servo_transport::{open_transport, DeviceId, TransportConfig};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Everything needed to open a session with one device.
///
/// ```yaml
/// device_id: 1
/// timeout_ms: 50
/// query_resolution:
///   control_position: f32
///   voltage: ignore
/// transport:
///   kind: fdcanusb
///   path: /dev/ttyACM0
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionConfig {
    pub device_id: DeviceId,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default)]
    pub query_resolution: ResolutionOverrides,
    #[serde(default)]
    pub transport: TransportConfig,
}

fn default_timeout_ms() -> u64 {
    100
}

impl SessionConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn query_resolution(&self) -> QueryResolution {
        QueryResolution::with_overrides(&self.query_resolution)
    }

    pub fn channel_options(&self) -> ChannelOptions {
        ChannelOptions::default().with_timeout(self.timeout())
    }

    /// Open the configured transport and wrap it in a channel.
    pub fn open_channel(&self) -> Result<DiagnosticChannel> {
        let transport = open_transport(&self.transport)?;
        tracing::info!(transport = transport.name(), device = %self.device_id, "channel opened");
        Ok(DiagnosticChannel::from_boxed(transport, self.channel_options()))
    }
}

pub fn load_config_str(raw: &str) -> anyhow::Result<SessionConfig> {
    serde_yaml::from_str(raw).context("decoding session config")
}

pub fn load_config_file(path: impl AsRef<Path>) -> anyhow::Result<SessionConfig> {
    let path = path.as_ref();
    let raw = fs::read_to_string(path)
        .with_context(|| format!("reading session config: {}", path.display()))?;
    let config: SessionConfig = serde_yaml::from_str(&raw)
        .with_context(|| format!("decoding session config: {}", path.display()))?;
    Ok(config)
}

/// Load every `.yml`/`.yaml` file in `dir`, in file name order.
pub fn load_config_dir(dir: impl AsRef<Path>) -> anyhow::Result<Vec<SessionConfig>> {
    let mut entries: Vec<PathBuf> = Vec::new();
    for entry in fs::read_dir(dir.as_ref())? {
        let path = entry?.path();
        if let Some(ext) = path.extension() {
            if ext == "yml" || ext == "yaml" {
                entries.push(path);
            }
        }
    }
    entries.sort();
    entries.iter().map(load_config_file).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Register, Resolution};
    use std::io::Write;

    #[test]
    fn minimal_config_uses_defaults() -> anyhow::Result<()> {
        let cfg = load_config_str("device_id: 5\n")?;
        assert_eq!(cfg.device_id, DeviceId::new(5).unwrap());
        assert_eq!(cfg.timeout(), Duration::from_millis(100));
        assert_eq!(cfg.transport, TransportConfig::Mock);
        assert_eq!(cfg.query_resolution(), QueryResolution::default());
        Ok(())
    }

    #[test]
    fn overrides_and_transport() -> anyhow::Result<()> {
        let cfg = load_config_str(
            "device_id: 2\ntimeout_ms: 40\nquery_resolution:\n  control_position: f32\n  voltage: ignore\ntransport:\n  kind: fdcanusb\n  path: /dev/ttyACM0\n",
        )?;
        let table = cfg.query_resolution();
        assert_eq!(table.resolve(Register::ControlPosition), Resolution::Float32);
        assert_eq!(table.resolve(Register::Voltage), Resolution::Ignore);
        assert_eq!(table.resolve(Register::Mode), Resolution::Int8);
        assert_eq!(cfg.channel_options().timeout, Duration::from_millis(40));
        assert!(matches!(cfg.transport, TransportConfig::Fdcanusb { .. }));
        Ok(())
    }

    #[test]
    fn rejects_out_of_range_device() {
        assert!(load_config_str("device_id: 200\n").is_err());
        assert!(load_config_str("device_id: 1\nquery_resolution:\n  bogus: f32\n").is_err());
    }

    #[test]
    fn loads_files_from_dir() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        for (name, id) in [("b.yaml", 2), ("a.yml", 1)] {
            let mut f = fs::File::create(dir.path().join(name))?;
            writeln!(f, "device_id: {id}")?;
        }
        fs::write(dir.path().join("notes.txt"), "ignored")?;
        let configs = load_config_dir(dir.path())?;
        let ids: Vec<u8> = configs.iter().map(|c| c.device_id.raw()).collect();
        assert_eq!(ids, vec![1, 2]);
        Ok(())
    }

    #[test]
    fn missing_file_names_path() {
        let err = load_config_file("/nonexistent/servo.yaml").unwrap_err();
        assert!(format!("{err:#}").contains("/nonexistent/servo.yaml"));
    }

    #[test]
    fn opens_mock_channel_for_controller() -> anyhow::Result<()> {
        let cfg = load_config_str("device_id: 4\ntimeout_ms: 10\nquery_resolution:\n  torque: ignore\n")?;
        let channel = std::sync::Arc::new(cfg.open_channel()?);
        assert_eq!(channel.timeout(), Duration::from_millis(10));

        let ctl = crate::Controller::from_config(&cfg, channel);
        assert_eq!(ctl.id(), DeviceId::new(4).unwrap());
        assert_eq!(ctl.query_resolution().resolve(Register::Torque), Resolution::Ignore);
        // Nothing answers on the bare mock bus.
        assert!(matches!(ctl.stop(), Err(crate::ControlError::Timeout(_))));
        Ok(())
    }

    #[test]
    fn fdcanusb_backend_follows_crate_feature() -> anyhow::Result<()> {
        let cfg = load_config_str(
            "device_id: 1\ntransport:\n  kind: fdcanusb\n  path: /nonexistent/ttyACM9\n",
        )?;
        let err = match cfg.open_channel() {
            Ok(_) => anyhow::bail!("opened a port that does not exist"),
            Err(e) => e,
        };
        let unsupported = matches!(
            err,
            crate::ControlError::Transport(servo_transport::TransportError::Unsupported(_))
        );
        assert_eq!(unsupported, !cfg!(feature = "fdcanusb"), "{err}");
        Ok(())
    }
}
