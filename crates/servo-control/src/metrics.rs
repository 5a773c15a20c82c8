use prometheus::{Encoder, IntCounter, IntGauge, Registry, TextEncoder};

#[derive(Clone)]
pub struct ChannelMetrics {
    pub tx_frames: IntCounter,
    pub rx_frames: IntCounter,
    pub discarded_frames: IntCounter,
    pub timeouts: IntCounter,
    pub protocol_errors: IntCounter,
    pub pending_requests: IntGauge,
}

#[derive(Clone)]
pub struct MetricsHub {
    pub registry: Registry,
    pub channel: ChannelMetrics,
}

impl MetricsHub {
    pub fn new() -> Result<Self, String> {
        Self::with_registry(Registry::new())
    }

    /// Register the channel collectors on an existing `registry`.
    ///
    /// Fails if the registry already holds collectors with the same names.
    pub fn with_registry(registry: Registry) -> Result<Self, String> {
        let counter = |name: &str, help: &str| {
            IntCounter::new(name, help).map_err(|e| format!("metrics init error: {e}"))
        };
        let channel = ChannelMetrics {
            tx_frames: counter("servo_tx_frames", "Total request frames sent")?,
            rx_frames: counter("servo_rx_frames", "Total reply frames accepted")?,
            discarded_frames: counter(
                "servo_discarded_frames",
                "Frames dropped as out-of-band or stale",
            )?,
            timeouts: counter("servo_timeouts", "Requests that got no reply in time")?,
            protocol_errors: counter(
                "servo_protocol_errors",
                "Replies that did not match the request",
            )?,
            pending_requests: IntGauge::new(
                "servo_pending_requests",
                "Requests queued or in flight on the channel",
            )
            .map_err(|e| format!("metrics init error: {e}"))?,
        };
        let register = |collector: Box<dyn prometheus::core::Collector>| {
            registry
                .register(collector)
                .map_err(|e| format!("metrics registration error: {e}"))
        };
        register(Box::new(channel.tx_frames.clone()))?;
        register(Box::new(channel.rx_frames.clone()))?;
        register(Box::new(channel.discarded_frames.clone()))?;
        register(Box::new(channel.timeouts.clone()))?;
        register(Box::new(channel.protocol_errors.clone()))?;
        register(Box::new(channel.pending_requests.clone()))?;
        Ok(Self { registry, channel })
    }

    pub fn encode_text(&self) -> String {
        let mut buf = Vec::new();
        let encoder = TextEncoder::new();
        if let Err(e) = encoder.encode(&self.registry.gather(), &mut buf) {
            return format!("error encoding metrics: {e}");
        }
        String::from_utf8(buf).unwrap_or_default()
    }
}
