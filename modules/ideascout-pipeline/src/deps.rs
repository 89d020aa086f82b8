//! Shared dependency container for every pipeline job.
//!
//! Holds long-lived, cloneable handles. Jobs share nothing else: all
//! coordination goes through the store and the queue.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use apify_client::ApifyClient;
use sqlx::PgPool;
use typed_builder::TypedBuilder;

use ideascout_common::{AppConfig, PipelineConfig};
use ideascout_store::{JobQueue, PgJobQueue, PgScanStore, QueueSettings, ScanStore};

use crate::models::{ModelClient, ModelProvider};
use crate::retry::RetryPolicy;
use crate::sources::ApifyRedditSource;
use crate::state_machine::ScanStateMachine;
use crate::traits::ContentSource;

#[derive(Clone, TypedBuilder)]
pub struct PipelineDeps {
    pub store: Arc<dyn ScanStore>,
    pub queue: Arc<dyn JobQueue>,
    pub source: Arc<dyn ContentSource>,
    /// One entry runs single-provider mode, two run dual consensus.
    pub classifiers: Vec<Arc<dyn ModelClient>>,
    pub extractor: Arc<dyn ModelClient>,
    #[builder(default = Arc::new(PipelineConfig::default()))]
    pub config: Arc<PipelineConfig>,
    #[builder(default)]
    pub retry: RetryPolicy,
}

impl PipelineDeps {
    /// Production wiring: Postgres store and queue, Apify source, configured providers.
    pub fn from_config(pool: PgPool, app: &AppConfig, config: PipelineConfig) -> Result<Self> {
        let settings = QueueSettings {
            lease: Duration::from_secs(config.queue.lease_secs),
            max_attempts: config.queue.max_attempts,
            retry_delay: Duration::from_secs(config.queue.retry_delay_secs),
        };

        let apify_key = app
            .apify_api_key
            .clone()
            .context("APIFY_API_KEY is required to fetch content")?;
        let source = ApifyRedditSource::new(ApifyClient::new(apify_key), &config.fetch);

        let classifiers = config
            .classifiers
            .iter()
            .map(|p| {
                ModelProvider::from_config(p, app).map(|m| Arc::new(m) as Arc<dyn ModelClient>)
            })
            .collect::<Result<Vec<_>>>()?;
        let extractor = ModelProvider::from_config(&config.extractor, app)?;

        Ok(Self::builder()
            .store(Arc::new(PgScanStore::new(pool.clone())))
            .queue(Arc::new(PgJobQueue::new(pool, settings)))
            .source(Arc::new(source))
            .classifiers(classifiers)
            .extractor(Arc::new(extractor))
            .retry(RetryPolicy::from_config(&config.retry))
            .config(Arc::new(config))
            .build())
    }

    pub fn state_machine(&self) -> ScanStateMachine {
        ScanStateMachine::new(self.store.clone())
    }
}
