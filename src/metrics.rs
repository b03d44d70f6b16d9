use prometheus::{Encoder, HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry, TextEncoder};

#[derive(Clone)]
pub struct Metrics {
    registry: Registry,

    // Counters
    pub webhooks_total: IntCounterVec,
    pub refunds_total: IntCounterVec,

    // Histograms
    pub http_request_duration_seconds: HistogramVec,
}

impl Metrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let webhooks_total = IntCounterVec::new(
            Opts::new("recon_webhooks_total", "Inbound webhooks by processing outcome"),
            &["outcome"], // reconciled|skipped|failed|rejected
        )?;

        let refunds_total = IntCounterVec::new(
            Opts::new("recon_refunds_total", "Admin refund attempts by result"),
            &["result"], // success or error code
        )?;

        let http_request_duration_seconds = HistogramVec::new(
            HistogramOpts::new("http_request_duration_seconds", "HTTP request duration seconds"),
            &["path", "method", "status"],
        )?;

        registry.register(Box::new(webhooks_total.clone()))?;
        registry.register(Box::new(refunds_total.clone()))?;
        registry.register(Box::new(http_request_duration_seconds.clone()))?;

        Ok(Self {
            registry,
            webhooks_total,
            refunds_total,
            http_request_duration_seconds,
        })
    }

    pub fn render(&self) -> Result<String, String> {
        let encoder = TextEncoder::new();
        let mf = self.registry.gather();
        let mut buf = Vec::new();
        encoder.encode(&mf, &mut buf).map_err(|e| e.to_string())?;
        String::from_utf8(buf).map_err(|e| e.to_string())
    }
}
