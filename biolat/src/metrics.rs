use std::{net::SocketAddr, thread};

use log::{info, warn};
use prometheus::{Encoder, IntCounter, IntGaugeVec, Opts, Registry, TextEncoder};
use tiny_http::{Header, Response, Server};

use crate::{error::SetupError, report::Report};

/// Prometheus view of the reporter: running totals plus the histogram of the
/// most recent interval.
#[derive(Clone)]
pub struct MetricsState {
    pub registry: Registry,
    reports: IntCounter,
    completions: IntCounter,
    dropped: IntCounter,
    interval_slots: IntGaugeVec,
}

impl MetricsState {
    pub fn new() -> Result<Self, SetupError> {
        let registry = Registry::new();

        let reports = IntCounter::new("biolat_reports_total", "Reporting intervals completed")?;
        let completions = IntCounter::new(
            "biolat_completions_total",
            "Block requests measured across all intervals",
        )?;
        let dropped = IntCounter::new(
            "biolat_dropped_total",
            "Block requests not measured because the in-flight table was full",
        )?;
        let interval_slots = IntGaugeVec::new(
            Opts::new(
                "biolat_interval_bucket_count",
                "Completions per latency slot during the last interval",
            ),
            &["slot", "le_us"],
        )?;

        registry.register(Box::new(reports.clone()))?;
        registry.register(Box::new(completions.clone()))?;
        registry.register(Box::new(dropped.clone()))?;
        registry.register(Box::new(interval_slots.clone()))?;

        Ok(MetricsState {
            registry,
            reports,
            completions,
            dropped,
            interval_slots,
        })
    }

    pub fn observe(&self, report: &Report) {
        self.reports.inc();
        self.completions.inc_by(report.total());
        self.dropped.inc_by(report.dropped);
        for row in &report.rows {
            self.interval_slots
                .with_label_values(&[
                    row.slot.to_string().as_str(),
                    row.upper_us.to_string().as_str(),
                ])
                .set(row.count.min(i64::MAX as u64) as i64);
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, prometheus::Error> {
        let mut buf = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buf)?;
        Ok(buf)
    }

    /// Serves the text exposition format on `addr` from a background thread.
    pub fn serve(&self, addr: SocketAddr) -> Result<thread::JoinHandle<()>, SetupError> {
        let server = Server::http(addr).map_err(|e| SetupError::Metrics {
            addr,
            reason: e.to_string(),
        })?;
        info!("serving metrics on http://{addr}/metrics");

        let state = self.clone();
        Ok(thread::spawn(move || {
            let content_type =
                Header::from_bytes(&b"Content-Type"[..], TextEncoder::new().format_type()).ok();

            for request in server.incoming_requests() {
                let body = match state.encode() {
                    Ok(body) => body,
                    Err(e) => {
                        warn!("failed to encode metrics: {e}");
                        continue;
                    }
                };
                let mut response = Response::from_data(body);
                if let Some(header) = content_type.clone() {
                    response = response.with_header(header);
                }
                if let Err(e) = request.respond(response) {
                    warn!("failed to answer metrics request: {e}");
                }
            }
        }))
    }
}
