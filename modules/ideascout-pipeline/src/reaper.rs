use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;
use tracing::info;
use uuid::Uuid;

use ideascout_store::ScanStore;

use crate::state_machine::ScanStateMachine;

pub fn stalled_message(max_age: chrono::Duration) -> String {
    format!("Scan stalled: no progress for {} minutes", max_age.num_minutes())
}

/// Fail every live scan untouched for longer than `max_age`. Returns the ids
/// actually failed.
pub async fn reap_stale_scans(
    store: Arc<dyn ScanStore>,
    max_age: chrono::Duration,
) -> Result<Vec<Uuid>> {
    let cutoff = Utc::now() - max_age;
    let stale = store.stale_scans(cutoff).await?;
    if stale.is_empty() {
        return Ok(Vec::new());
    }

    let machine = ScanStateMachine::new(store);
    let message = stalled_message(max_age);
    let mut reaped = Vec::with_capacity(stale.len());
    for scan in stale {
        if machine.fail(scan.id, &message).await? {
            reaped.push(scan.id);
        }
    }

    info!(reaped = reaped.len(), cutoff = %cutoff, "Reaped stale scans");
    Ok(reaped)
}

#[cfg(test)]
mod tests {
    use ideascout_common::{ScanStatus, Topic};
    use ideascout_store::{MemoryScanStore, NewScan, ScanCreation};

    use super::*;

    async fn scan(store: &MemoryScanStore, name: &str) -> Uuid {
        let topic = Topic::new(name, vec![], vec![]);
        store.create_topic(&topic).await.unwrap();
        let ScanCreation::Created(scan) = store
            .create_scan_if_idle(NewScan {
                topic_id: topic.id,
                window: None,
                initial_window_days: 30,
                rescan_window_days: 7,
            })
            .await
            .unwrap()
        else {
            panic!("expected a new scan");
        };
        scan.id
    }

    #[tokio::test]
    async fn only_stale_live_scans_are_failed() {
        let store = MemoryScanStore::new();
        let stale = scan(&store, "stale").await;
        let fresh = scan(&store, "fresh").await;
        let done = scan(&store, "done").await;
        store.fail_scan(done, "earlier").await.unwrap();

        let long_ago = Utc::now() - chrono::Duration::hours(3);
        store.set_updated_at(stale, long_ago).await;
        store.set_updated_at(done, long_ago).await;

        let reaped = reap_stale_scans(Arc::new(store.clone()), chrono::Duration::minutes(60))
            .await
            .unwrap();
        assert_eq!(reaped, vec![stale]);

        let stale = store.get_scan(stale).await.unwrap().unwrap();
        assert_eq!(stale.status, ScanStatus::Failed);
        assert_eq!(
            stale.error_message.as_deref(),
            Some("Scan stalled: no progress for 60 minutes")
        );
        assert_eq!(store.get_scan(fresh).await.unwrap().unwrap().status, ScanStatus::Pending);
        assert_eq!(
            store.get_scan(done).await.unwrap().unwrap().error_message.as_deref(),
            Some("earlier")
        );
    }
}
