//! Counters describing what the scanner did, plus the optional Prometheus
//! scrape endpoint.

use log::Level;
use metrics::counter;
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

use crate::config::model::MetricsConfig;

pub const SCANS_TOTAL: &str = "nfc_agent_scans_total";
pub const READ_ERRORS_TOTAL: &str = "nfc_agent_read_errors_total";
pub const UNLOCKS_TOTAL: &str = "nfc_agent_unlocks_total";

/// Outcome label on `nfc_agent_unlocks_total`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnlockOutcome {
    Success,
    Rejected,
    Network,
}

impl UnlockOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            UnlockOutcome::Success => "success",
            UnlockOutcome::Rejected => "rejected",
            UnlockOutcome::Network => "network",
        }
    }
}

pub fn record_scan() {
    counter!(SCANS_TOTAL).increment(1);
}

pub fn record_read_error() {
    counter!(READ_ERRORS_TOTAL).increment(1);
}

pub fn record_unlock(outcome: UnlockOutcome) {
    counter!(UNLOCKS_TOTAL, "outcome" => outcome.as_str()).increment(1);
}

/// Install the Prometheus recorder when a listen address is configured.
/// Must run inside the Tokio runtime.
pub fn install_exporter(cfg: &MetricsConfig) -> Result<bool, BuildError> {
    let Some(addr) = cfg.listen else {
        return Ok(false);
    };
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    nfc_log!(Level::Info, "metrics", "Prometheus endpoint on http://{}/metrics", addr);
    Ok(true)
}
