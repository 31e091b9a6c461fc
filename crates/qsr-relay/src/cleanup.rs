//! Periodic cleanup: expires codes and reclaims relay memory.
//!
//! Lazy expiry already makes stale codes answer correctly on access; the
//! scheduler exists so that transfers nobody ever touches again still get
//! their bytes reclaimed.

use std::sync::Arc;
use std::time::Duration;

use crate::service::RelayService;

pub struct CleanupScheduler {
    service: Arc<RelayService>,
    interval: Duration,
}

impl CleanupScheduler {
    pub fn new(service: Arc<RelayService>, interval: Duration) -> Self {
        CleanupScheduler { service, interval }
    }

    /// Run sweeps forever. Spawn this on the runtime; it only stops when the
    /// task is dropped at shutdown.
    pub async fn run(self) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // first tick fires immediately; skip it so startup isn't a sweep
        ticker.tick().await;
        loop {
            ticker.tick().await;
            self.sweep_now();
        }
    }

    /// One synchronous sweep. Exposed so tests and shutdown paths can force
    /// a pass without waiting for the ticker.
    pub fn sweep_now(&self) -> usize {
        self.service.sweep()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::PickupCodeRegistry;
    use crate::store::RelayStore;
    use bytes::Bytes;
    use qsr_core::types::{CodeIssue, CreateCodeRequest};

    fn service() -> Arc<RelayService> {
        Arc::new(RelayService::new(
            RelayStore::new(),
            PickupCodeRegistry::new("pepper", 100),
        ))
    }

    fn expired_request() -> CreateCodeRequest {
        CreateCodeRequest {
            file_name: "old.bin".into(),
            file_size: 1,
            mime_type: "application/octet-stream".into(),
            content_hash: None,
            usage_limit: 3,
            ttl: Duration::ZERO,
            reuse_file_id: None,
        }
    }

    #[tokio::test]
    async fn sweep_now_reclaims_expired_entries() {
        let svc = service();
        let issued = match svc.create_code(7, &expired_request()).unwrap() {
            CodeIssue::Issued(issued) => issued,
            CodeIssue::Duplicate { .. } => unreachable!(),
        };
        // bytes parked directly in the store with a past deadline
        svc.store()
            .put_chunk(7, issued.file_id, 0, Bytes::from_static(b"stale"), issued.expires_at);

        let scheduler = CleanupScheduler::new(svc.clone(), Duration::from_secs(60));
        let removed = scheduler.sweep_now();
        assert!(removed >= 1);
        assert!(svc.store().chunk_indices(7, issued.file_id).is_empty());
    }

    #[tokio::test]
    async fn scheduler_runs_in_background() {
        let svc = service();
        let issued = match svc.create_code(7, &expired_request()).unwrap() {
            CodeIssue::Issued(issued) => issued,
            CodeIssue::Duplicate { .. } => unreachable!(),
        };

        let scheduler = CleanupScheduler::new(svc.clone(), Duration::from_millis(10));
        let handle = tokio::spawn(scheduler.run());
        tokio::time::sleep(Duration::from_millis(100)).await;
        handle.abort();

        // a background sweep purged the expired record entirely
        assert!(matches!(
            svc.code_status(7, issued.code.lookup()),
            Err(qsr_core::error::RelayError::CodeNotFound)
        ));
    }
}
