//! Scan entry points for the UI layer and the CLI.

use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info};
use uuid::Uuid;

use ideascout_common::file_config::ScanConfig;
use ideascout_common::{DateWindow, Job, ScanError, ScanStatus, ScanStatusView};
use ideascout_store::{JobQueue, NewScan, ScanCreation, ScanStore};

use crate::deps::PipelineDeps;
use crate::state_machine::ScanStateMachine;

pub const CANCELLED_MESSAGE: &str = "Cancelled by user";

pub type Result<T> = std::result::Result<T, ScanError>;

/// Creates scans and exposes status, cancel and retry.
///
/// Needs only the store and the queue, so the operator CLI can use it
/// without model or source credentials.
#[derive(Clone)]
pub struct ScanOrchestrator {
    store: Arc<dyn ScanStore>,
    queue: Arc<dyn JobQueue>,
    scan_config: ScanConfig,
}

impl ScanOrchestrator {
    pub fn new(
        store: Arc<dyn ScanStore>,
        queue: Arc<dyn JobQueue>,
        scan_config: ScanConfig,
    ) -> Self {
        Self {
            store,
            queue,
            scan_config,
        }
    }

    pub fn from_deps(deps: &PipelineDeps) -> Self {
        Self::new(deps.store.clone(), deps.queue.clone(), deps.config.scan.clone())
    }

    /// Start a scan, or return the topic's active one unchanged.
    ///
    /// The first fetch job is enqueued only after the scan row is committed.
    pub async fn start_scan(
        &self,
        topic_id: Uuid,
        window: Option<DateWindow>,
    ) -> Result<ScanStatusView> {
        let creation = self
            .store
            .create_scan_if_idle(NewScan {
                topic_id,
                window,
                initial_window_days: self.scan_config.initial_window_days,
                rescan_window_days: self.scan_config.rescan_window_days,
            })
            .await?;

        let scan = match creation {
            ScanCreation::Created(scan) => scan,
            ScanCreation::Existing(scan) => {
                info!(
                    %topic_id,
                    scan_id = %scan.id,
                    status = %scan.status,
                    "Topic already has an active scan"
                );
                return Ok(scan.status_view());
            }
            ScanCreation::TopicNotFound => return Err(ScanError::TopicNotFound(topic_id)),
        };

        if let Err(e) = self
            .queue
            .enqueue(&Job::FetchPage { scan_id: scan.id, page: 0 }, Duration::ZERO)
            .await
        {
            error!(scan_id = %scan.id, error = %e, "Failed to dispatch first fetch");
            self.machine()
                .fail(scan.id, &format!("Failed to start pipeline: {e}"))
                .await?;
            return Err(ScanError::Internal(e));
        }

        info!(
            %topic_id,
            scan_id = %scan.id,
            scan_type = %scan.scan_type,
            from = %scan.window.from,
            to = %scan.window.to,
            "Scan started"
        );
        Ok(scan.status_view())
    }

    pub async fn get_scan_status(&self, scan_id: Uuid) -> Result<ScanStatusView> {
        self.store
            .get_scan(scan_id)
            .await?
            .map(|s| s.status_view())
            .ok_or(ScanError::ScanNotFound(scan_id))
    }

    /// Fail a running scan. In-flight jobs notice at their next guard.
    pub async fn cancel_scan(&self, scan_id: Uuid) -> Result<()> {
        let scan = self
            .store
            .get_scan(scan_id)
            .await?
            .ok_or(ScanError::ScanNotFound(scan_id))?;
        if scan.status.is_terminal() {
            return Err(ScanError::NotCancellable {
                scan_id,
                status: scan.status,
            });
        }

        if !self.machine().fail(scan_id, CANCELLED_MESSAGE).await? {
            // Finished or failed between the read and the write.
            let status = self
                .store
                .get_scan(scan_id)
                .await?
                .map(|s| s.status)
                .unwrap_or(ScanStatus::Failed);
            return Err(ScanError::NotCancellable { scan_id, status });
        }
        info!(%scan_id, "Scan cancelled");
        Ok(())
    }

    /// Start a fresh scan over a failed scan's topic and window. The old
    /// checkpoint is not carried over.
    pub async fn retry_scan(&self, scan_id: Uuid) -> Result<Uuid> {
        let scan = self
            .store
            .get_scan(scan_id)
            .await?
            .ok_or(ScanError::ScanNotFound(scan_id))?;
        if scan.status != ScanStatus::Failed {
            return Err(ScanError::NotRetryable {
                scan_id,
                status: scan.status,
            });
        }

        let view = self.start_scan(scan.topic_id, Some(scan.window)).await?;
        info!(old_scan_id = %scan_id, new_scan_id = %view.scan_id, "Scan retried");
        Ok(view.scan_id)
    }

    fn machine(&self) -> ScanStateMachine {
        ScanStateMachine::new(self.store.clone())
    }
}

#[cfg(test)]
mod tests {
    use ideascout_common::{ScanType, Topic};
    use ideascout_store::{MemoryJobQueue, MemoryScanStore};

    use super::*;

    async fn setup() -> (ScanOrchestrator, MemoryScanStore, MemoryJobQueue, Uuid) {
        let store = MemoryScanStore::new();
        let queue = MemoryJobQueue::default();
        let topic = Topic::new("invoicing", vec!["freelance".into()], vec![]);
        store.create_topic(&topic).await.unwrap();
        let orchestrator = ScanOrchestrator::new(
            Arc::new(store.clone()),
            Arc::new(queue.clone()),
            ScanConfig::default(),
        );
        (orchestrator, store, queue, topic.id)
    }

    #[tokio::test]
    async fn start_is_idempotent_while_a_scan_is_active() {
        let (orchestrator, _, queue, topic_id) = setup().await;

        let first = orchestrator.start_scan(topic_id, None).await.unwrap();
        let second = orchestrator.start_scan(topic_id, None).await.unwrap();

        assert_eq!(first.scan_id, second.scan_id);
        assert_eq!(first.status, ScanStatus::Pending);
        assert_eq!(first.progress_percent, 0);
        assert_eq!(first.scan_type, ScanType::Initial);
        // Only the first call dispatched work.
        assert_eq!(
            queue.pending().await,
            vec![Job::FetchPage { scan_id: first.scan_id, page: 0 }]
        );
    }

    #[tokio::test]
    async fn unknown_topic_is_reported() {
        let (orchestrator, ..) = setup().await;
        let err = orchestrator.start_scan(Uuid::new_v4(), None).await.unwrap_err();
        assert!(matches!(err, ScanError::TopicNotFound(_)));
    }

    #[tokio::test]
    async fn explicit_window_is_kept() {
        let (orchestrator, store, _, topic_id) = setup().await;
        let window = DateWindow::last_days(3);
        let view = orchestrator.start_scan(topic_id, Some(window)).await.unwrap();
        let scan = store.get_scan(view.scan_id).await.unwrap().unwrap();
        assert_eq!(scan.window, window);
    }

    #[tokio::test]
    async fn cancel_then_retry_starts_a_fresh_scan() {
        let (orchestrator, store, _, topic_id) = setup().await;
        let view = orchestrator.start_scan(topic_id, None).await.unwrap();

        orchestrator.cancel_scan(view.scan_id).await.unwrap();
        let cancelled = orchestrator.get_scan_status(view.scan_id).await.unwrap();
        assert_eq!(cancelled.status, ScanStatus::Failed);
        assert_eq!(cancelled.error.as_deref(), Some(CANCELLED_MESSAGE));

        let err = orchestrator.cancel_scan(view.scan_id).await.unwrap_err();
        assert!(matches!(err, ScanError::NotCancellable { status: ScanStatus::Failed, .. }));

        let new_id = orchestrator.retry_scan(view.scan_id).await.unwrap();
        assert_ne!(new_id, view.scan_id);
        let old = store.get_scan(view.scan_id).await.unwrap().unwrap();
        let new = store.get_scan(new_id).await.unwrap().unwrap();
        assert_eq!(new.window, old.window);
        assert!(new.checkpoint.is_none());
        // No completed scan yet, so still an initial scan.
        assert_eq!(new.scan_type, ScanType::Initial);
    }

    #[tokio::test]
    async fn only_failed_scans_can_be_retried() {
        let (orchestrator, _, _, topic_id) = setup().await;
        let view = orchestrator.start_scan(topic_id, None).await.unwrap();
        let err = orchestrator.retry_scan(view.scan_id).await.unwrap_err();
        assert!(matches!(err, ScanError::NotRetryable { status: ScanStatus::Pending, .. }));
    }

    #[tokio::test]
    async fn status_of_unknown_scan_is_not_found() {
        let (orchestrator, ..) = setup().await;
        assert!(matches!(
            orchestrator.get_scan_status(Uuid::new_v4()).await,
            Err(ScanError::ScanNotFound(_))
        ));
    }
}
