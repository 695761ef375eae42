//! Alert channel seam. The webhook/pager transport lives outside the crate;
//! the core only needs a sink it can hand a message and a structured payload.

use serde_json::Value;

pub trait AlertSink: Send + Sync + 'static {
    fn alert(&self, message: &str, details: Value);
}

/// Default sink that routes alerts into the structured log stream.
pub struct LogAlerts;

impl AlertSink for LogAlerts {
    fn alert(&self, message: &str, details: Value) {
        tracing::warn!(target: "zkoracle::alerts", details = %details, "{message}");
    }
}
