//! Prometheus metrics served on `/metrics`.
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry, TextEncoder,
};

#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    pub inputs: IntCounterVec,
    pub rejections: IntCounterVec,
    pub anomalies: IntCounterVec,
    pub http_latency: HistogramVec,
}

impl Metrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let inputs = IntCounterVec::new(
            Opts::new("intake_inputs_total", "Inputs processed into a record"),
            &["format", "intent", "generation"],
        )?;
        let rejections = IntCounterVec::new(
            Opts::new("intake_rejections_total", "Inputs that produced no stored record"),
            &["code"],
        )?;
        let anomalies = IntCounterVec::new(
            Opts::new("intake_anomalies_total", "Fields flagged on stored records"),
            &["intent", "kind"],
        )?;
        let http_latency = HistogramVec::new(
            HistogramOpts::new("intake_http_request_seconds", "HTTP request latency"),
            &["method", "path", "status"],
        )?;

        registry.register(Box::new(inputs.clone()))?;
        registry.register(Box::new(rejections.clone()))?;
        registry.register(Box::new(anomalies.clone()))?;
        registry.register(Box::new(http_latency.clone()))?;

        Ok(Self {
            registry,
            inputs,
            rejections,
            anomalies,
            http_latency,
        })
    }

    pub fn encode(&self) -> Result<String, prometheus::Error> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8_lossy(&buffer).to_string())
    }
}
