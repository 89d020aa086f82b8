//! Shared setup for pipeline integration tests: in-memory store and queue,
//! scripted models, one topic.

#![allow(dead_code)]

use std::sync::Arc;

use ideascout_common::{FetchedItem, Scan, ScanStatus, Topic};
use ideascout_pipeline::models::ModelClient;
use ideascout_pipeline::testing::{self, MockSource, ScriptedModel};
use ideascout_pipeline::{PipelineDeps, ScanOrchestrator, Worker};
use ideascout_store::{MemoryJobQueue, MemoryScanStore, NewScan, ScanCreation, ScanStore};

pub struct Harness {
    pub store: MemoryScanStore,
    pub queue: MemoryJobQueue,
    pub source: Arc<MockSource>,
    pub primary: Arc<ScriptedModel>,
    pub secondary: Option<Arc<ScriptedModel>>,
    pub extractor: Arc<ScriptedModel>,
    pub deps: PipelineDeps,
    pub topic: Topic,
}

impl Harness {
    pub async fn dual(
        source: MockSource,
        primary: ScriptedModel,
        secondary: ScriptedModel,
        extractor: ScriptedModel,
    ) -> Self {
        Self::build(source, primary, Some(secondary), extractor).await
    }

    pub async fn single(
        source: MockSource,
        primary: ScriptedModel,
        extractor: ScriptedModel,
    ) -> Self {
        Self::build(source, primary, None, extractor).await
    }

    async fn build(
        source: MockSource,
        primary: ScriptedModel,
        secondary: Option<ScriptedModel>,
        extractor: ScriptedModel,
    ) -> Self {
        let store = MemoryScanStore::new();
        let queue = MemoryJobQueue::new(2);
        let source = Arc::new(source);
        let primary = Arc::new(primary);
        let secondary = secondary.map(Arc::new);
        let extractor = Arc::new(extractor);

        let mut classifiers: Vec<Arc<dyn ModelClient>> = vec![primary.clone()];
        if let Some(ref s) = secondary {
            classifiers.push(s.clone());
        }

        let deps = testing::deps(
            Arc::new(store.clone()),
            Arc::new(queue.clone()),
            source.clone(),
            classifiers,
            extractor.clone(),
        );

        let topic = Topic::new(
            "freelance admin",
            vec!["freelance".into()],
            vec!["invoice".into()],
        );
        store.create_topic(&topic).await.unwrap();

        Self {
            store,
            queue,
            source,
            primary,
            secondary,
            extractor,
            deps,
            topic,
        }
    }

    pub fn worker(&self) -> Worker {
        Worker::new(self.deps.clone())
    }

    pub fn orchestrator(&self) -> ScanOrchestrator {
        ScanOrchestrator::from_deps(&self.deps)
    }

    pub async fn scan(&self, scan_id: uuid::Uuid) -> Scan {
        self.store.get_scan(scan_id).await.unwrap().unwrap()
    }

    /// A scan moved straight to `status` with `items` attached, bypassing fetch.
    pub async fn scan_at(
        &self,
        status: ScanStatus,
        items: Vec<FetchedItem>,
    ) -> (Scan, Vec<uuid::Uuid>) {
        let ScanCreation::Created(scan) = self
            .store
            .create_scan_if_idle(NewScan {
                topic_id: self.topic.id,
                window: None,
                initial_window_days: 30,
                rescan_window_days: 7,
            })
            .await
            .unwrap()
        else {
            panic!("topic already has an active scan");
        };

        let path = [
            ScanStatus::Pending,
            ScanStatus::Fetching,
            ScanStatus::Classifying,
            ScanStatus::Extracting,
        ];
        let mut ids = Vec::new();
        for pair in path.windows(2) {
            if pair[0] == status {
                break;
            }
            self.store.transition(scan.id, pair[0], pair[1]).await.unwrap();
            if pair[1] == ScanStatus::Fetching {
                ids = self.store.seed_items(scan.id, items.clone()).await.unwrap();
            }
        }
        (self.scan(scan.id).await, ids)
    }
}
