use prometheus::{Encoder, IntCounter, IntGauge, Registry, TextEncoder};

#[derive(Clone)]
pub struct StickMetrics {
    pub tx_packets: IntCounter,
    pub rx_packets: IntCounter,
    pub protocol_errors: IntCounter,
    pub samples_decoded: IntCounter,
    pub streaming: IntGauge,
}

#[derive(Clone)]
pub struct MetricsHub {
    pub registry: Registry,
    pub stick: StickMetrics,
}

impl MetricsHub {
    pub fn new() -> Result<Self, String> {
        let registry = Registry::new();
        let init = |e: prometheus::Error| format!("metrics init error: {e}");
        let stick = StickMetrics {
            tx_packets: IntCounter::new("bno_tx_packets", "Total command frames sent")
                .map_err(init)?,
            rx_packets: IntCounter::new("bno_rx_packets", "Total non-empty receives")
                .map_err(init)?,
            protocol_errors: IntCounter::new(
                "bno_protocol_errors",
                "Received buffers rejected by framing checks",
            )
            .map_err(init)?,
            samples_decoded: IntCounter::new(
                "bno_samples_decoded",
                "Streaming frames decoded into samples",
            )
            .map_err(init)?,
            streaming: IntGauge::new("bno_streaming", "1 while a streaming session is active")
                .map_err(init)?,
        };
        let _ = registry.register(Box::new(stick.tx_packets.clone()));
        let _ = registry.register(Box::new(stick.rx_packets.clone()));
        let _ = registry.register(Box::new(stick.protocol_errors.clone()));
        let _ = registry.register(Box::new(stick.samples_decoded.clone()));
        let _ = registry.register(Box::new(stick.streaming.clone()));
        Ok(Self { registry, stick })
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
