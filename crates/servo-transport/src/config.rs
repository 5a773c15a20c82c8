use crate::{Result, Transport, TransportError};
use serde::{Deserialize, Serialize};

/// Which backend to open, as written in a session configuration file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TransportConfig {
    /// In-process bus with no devices attached.
    #[default]
    Mock,
    Fdcanusb {
        path: String,
        #[serde(default = "default_baud")]
        baud: u32,
    },
}

fn default_baud() -> u32 {
    115_200
}

/// Open the transport described by `config`.
pub fn open_transport(config: &TransportConfig) -> Result<Box<dyn Transport>> {
    match config {
        #[cfg(feature = "mock")]
        TransportConfig::Mock => Ok(Box::new(crate::MockTransport::silent("mock0"))),
        #[cfg(not(feature = "mock"))]
        TransportConfig::Mock => Err(TransportError::Unsupported(
            "mock transport requires the 'mock' feature",
        )),
        #[cfg(feature = "fdcanusb")]
        TransportConfig::Fdcanusb { path, baud } => Ok(Box::new(
            crate::FdcanusbTransport::open_with(path, *baud)?,
        )),
        #[cfg(not(feature = "fdcanusb"))]
        TransportConfig::Fdcanusb { path, .. } => {
            tracing::warn!(path, "fdcanusb backend not compiled in");
            Err(TransportError::Unsupported(
                "fdcanusb transport requires the 'fdcanusb' feature",
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_tagged_config() {
        let cfg: TransportConfig =
            serde_yaml::from_str("kind: fdcanusb\npath: /dev/ttyACM0\n").unwrap();
        assert_eq!(
            cfg,
            TransportConfig::Fdcanusb {
                path: "/dev/ttyACM0".into(),
                baud: 115_200
            }
        );
    }

    #[cfg(feature = "mock")]
    #[test]
    fn opens_mock_backend() -> anyhow::Result<()> {
        let transport = open_transport(&TransportConfig::Mock)?;
        assert_eq!(transport.name(), "mock0");
        Ok(())
    }
}
