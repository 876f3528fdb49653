use market_data::{AuditLog, Broadcaster, IngestWorker};
use std::sync::Arc;

use crate::config::RelayConfig;

#[derive(Clone)]
pub struct AppState {
    pub broadcaster: Arc<Broadcaster>,
    pub worker: Arc<IngestWorker>, // Single upstream connection shared by every session
}

impl AppState {
    pub fn new(config: &RelayConfig) -> Self {
        let audit = Arc::new(AuditLog::with_capacity(config.audit_capacity));
        let broadcaster = Arc::new(Broadcaster::new(audit));
        let worker = Arc::new(IngestWorker::new(
            config.ingest_config(),
            Arc::clone(&broadcaster),
        ));

        Self {
            broadcaster,
            worker,
        }
    }

    pub fn audit_log(&self) -> &Arc<AuditLog> {
        self.broadcaster.audit_log()
    }
}
