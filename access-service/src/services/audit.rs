//! Fire-and-forget audit trail.
//!
//! `record` never blocks the request and never fails it; a sink outage is
//! logged and counted. Writes are tracked so shutdown can drain them.

use std::sync::Arc;
use tokio_util::task::TaskTracker;

use super::store::AccessLogSink;
use crate::models::AccessLog;

#[derive(Clone)]
pub struct AccessAuditLogger {
    sink: Arc<dyn AccessLogSink>,
    tracker: TaskTracker,
}

impl AccessAuditLogger {
    pub fn new(sink: Arc<dyn AccessLogSink>) -> Self {
        Self {
            sink,
            tracker: TaskTracker::new(),
        }
    }

    pub fn record(&self, entry: AccessLog) {
        let sink = self.sink.clone();
        self.tracker.spawn(async move {
            if let Err(e) = sink.append(&entry).await {
                tracing::error!(
                    log_id = %entry.id,
                    tenant_id = %entry.tenant_id,
                    action = entry.action.as_str(),
                    error = %e,
                    "Failed to write access log"
                );
                metrics::counter!("access_log_write_failures_total").increment(1);
            }
        });
    }

    /// Number of writes still in flight.
    pub fn pending(&self) -> usize {
        self.tracker.len()
    }

    /// Wait for every write recorded so far.
    pub async fn flush(&self) {
        self.tracker.close();
        self.tracker.wait().await;
        self.tracker.reopen();
    }
}
