//! Guarded scan transitions.
//!
//! Every job goes through here before doing work or advancing a scan. A guard
//! miss (scan gone, already advanced, already terminal) is a race the pipeline
//! expects, so it is logged and reported as `None`/`false`, never as an error.

use std::sync::Arc;

use anyhow::Result;
use tracing::{debug, error, info};
use uuid::Uuid;

use ideascout_common::{Scan, ScanStatus};
use ideascout_store::ScanStore;

#[derive(Clone)]
pub struct ScanStateMachine {
    store: Arc<dyn ScanStore>,
}

impl ScanStateMachine {
    pub fn new(store: Arc<dyn ScanStore>) -> Self {
        Self { store }
    }

    /// Load the scan if it is currently in one of `expected`.
    pub async fn guard(&self, scan_id: Uuid, expected: &[ScanStatus]) -> Result<Option<Scan>> {
        match self.store.get_scan(scan_id).await? {
            Some(scan) if expected.contains(&scan.status) => Ok(Some(scan)),
            Some(scan) => {
                debug!(
                    %scan_id,
                    status = %scan.status,
                    ?expected,
                    "Scan not in expected stage, skipping"
                );
                Ok(None)
            }
            None => {
                debug!(%scan_id, "Scan no longer exists, skipping");
                Ok(None)
            }
        }
    }

    /// Whether the scan is still in `status`. Checked between items so a
    /// cancelled scan stops picking up new work.
    pub async fn is_in(&self, scan_id: Uuid, status: ScanStatus) -> Result<bool> {
        Ok(self
            .store
            .get_scan(scan_id)
            .await?
            .is_some_and(|s| s.status == status))
    }

    /// Compare-and-set `from -> to`. Returns false when another delivery got
    /// there first.
    pub async fn advance(&self, scan_id: Uuid, from: ScanStatus, to: ScanStatus) -> Result<bool> {
        let applied = self.store.transition(scan_id, from, to).await?;
        if applied {
            info!(%scan_id, %from, %to, "Scan advanced");
        } else {
            debug!(%scan_id, %from, %to, "Transition already applied or scan moved on");
        }
        Ok(applied)
    }

    /// Move a non-terminal scan to `failed`.
    pub async fn fail(&self, scan_id: Uuid, message: &str) -> Result<bool> {
        let applied = self.store.fail_scan(scan_id, message).await?;
        if applied {
            error!(%scan_id, message, "Scan failed");
        } else {
            debug!(%scan_id, "Scan already terminal, not failing");
        }
        Ok(applied)
    }
}
