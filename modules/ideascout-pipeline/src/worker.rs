//! Job routing and the polling worker pools.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use futures::future::join_all;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, info_span, warn, Instrument};

use ideascout_common::{Job, Queue};
use ideascout_store::FailOutcome;

use crate::deps::PipelineDeps;
use crate::{classify, extract, fetch, finalize, reaper};

#[derive(Clone)]
pub struct Worker {
    deps: PipelineDeps,
}

impl Worker {
    pub fn new(deps: PipelineDeps) -> Self {
        Self { deps }
    }

    pub fn deps(&self) -> &PipelineDeps {
        &self.deps
    }

    /// Route one job to its handler. `Err` means "deliver again".
    pub async fn handle(&self, job: &Job) -> Result<()> {
        let deps = &self.deps;
        match job {
            Job::FetchPage { scan_id, page } => fetch::fetch_page(deps, *scan_id, *page).await,
            Job::FetchReplies {
                scan_id,
                page,
                chunk,
                item_ids,
            } => fetch::fetch_replies(deps, *scan_id, *page, *chunk, item_ids).await,
            Job::CheckFetchComplete { scan_id, poll } => {
                fetch::check_fetch_complete(deps, *scan_id, *poll).await
            }
            Job::BeginClassify { scan_id } => finalize::begin_classify(deps, *scan_id).await,
            Job::ClassifyChunk { scan_id, item_ids } => {
                classify::classify_chunk(deps, *scan_id, item_ids).await
            }
            Job::FinalizeClassify { scan_id } => finalize::finalize_classify(deps, *scan_id).await,
            Job::BeginExtract { scan_id } => finalize::begin_extract(deps, *scan_id).await,
            Job::ExtractChunk { scan_id, item_ids } => {
                extract::extract_chunk(deps, *scan_id, item_ids).await
            }
            Job::FinalizeExtract { scan_id } => finalize::finalize_extract(deps, *scan_id).await,
        }
    }

    /// Reserve and run one job from `queues`. Returns false when none was ready.
    pub async fn run_once(&self, queues: &[Queue]) -> Result<bool> {
        let Some(reserved) = self.deps.queue.reserve(queues).await? else {
            return Ok(false);
        };
        let job = &reserved.job;
        let scan_id = job.scan_id();
        let span = info_span!("job", job = job.name(), %scan_id, attempt = reserved.attempts);

        match self.handle(job).instrument(span).await {
            Ok(()) => {
                self.deps.queue.complete(reserved.id).await?;
            }
            Err(e) => {
                warn!(
                    job = job.name(),
                    %scan_id,
                    attempt = reserved.attempts,
                    error = %e,
                    "Job failed"
                );
                let outcome = self.deps.queue.fail(reserved.id, &format!("{e:#}")).await?;
                if outcome == FailOutcome::Buried && job.is_scan_critical() {
                    // Nothing else will advance the scan.
                    let message = format!("Pipeline step {} failed permanently: {e}", job.name());
                    self.deps.state_machine().fail(scan_id, &message).await?;
                }
            }
        }
        Ok(true)
    }

    /// Drain every queue in this task. Returns the number of jobs run.
    pub async fn run_until_idle(&self) -> Result<usize> {
        let mut ran = 0;
        while self.run_once(&Queue::ALL).await? {
            ran += 1;
        }
        debug!(jobs = ran, "Queue drained");
        Ok(ran)
    }
}

/// Polling loops over the durable queue, stopped together by [`WorkerPool::shutdown`].
pub struct WorkerPool {
    worker: Arc<Worker>,
    poll_interval: Duration,
    shutdown: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    pub fn new(worker: Worker, poll_interval: Duration) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            worker: Arc::new(worker),
            poll_interval,
            shutdown,
            handles: Vec::new(),
        }
    }

    /// One pool per queue, sized from the worker config, plus the reaper.
    pub fn start(worker: Worker) -> Self {
        let config = worker.deps().config.clone();
        let mut pool = Self::new(worker, Duration::from_millis(config.workers.poll_interval_ms));
        pool.spawn(Queue::Fetch, config.workers.fetch);
        pool.spawn(Queue::Classify, config.workers.classify);
        pool.spawn(Queue::Extract, config.workers.extract);
        pool.spawn_reaper(
            chrono::Duration::minutes(config.reaper.max_age_minutes),
            Duration::from_secs(config.reaper.interval_secs),
        );
        pool
    }

    /// Run `n` polling loops on `queue`.
    pub fn spawn(&mut self, queue: Queue, n: usize) {
        for slot in 0..n {
            let worker = self.worker.clone();
            let shutdown = self.shutdown.subscribe();
            let poll_interval = self.poll_interval;
            self.handles.push(tokio::spawn(async move {
                poll_loop(worker, queue, slot, poll_interval, shutdown).await;
            }));
        }
        info!(%queue, workers = n, "Worker pool started");
    }

    pub fn spawn_reaper(&mut self, max_age: chrono::Duration, interval: Duration) {
        let store = self.worker.deps().store.clone();
        let mut shutdown = self.shutdown.subscribe();
        self.handles.push(tokio::spawn(async move {
            loop {
                if let Err(e) = reaper::reap_stale_scans(store.clone(), max_age).await {
                    error!(error = %e, "Stale-scan reaper failed");
                }
                tokio::select! {
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                    _ = tokio::time::sleep(interval) => {}
                }
            }
        }));
    }

    /// Signal every loop to stop after its current job and wait for them.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        for result in join_all(self.handles).await {
            if let Err(e) = result {
                error!(error = %e, "Worker task panicked");
            }
        }
        info!("Worker pools stopped");
    }
}

async fn poll_loop(
    worker: Arc<Worker>,
    queue: Queue,
    slot: usize,
    poll_interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    debug!(%queue, slot, "Worker loop running");
    loop {
        if *shutdown.borrow() {
            break;
        }
        match worker.run_once(&[queue]).await {
            Ok(true) => continue,
            Ok(false) => {}
            Err(e) => error!(%queue, slot, error = %e, "Worker loop error"),
        }
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            _ = tokio::time::sleep(poll_interval) => {}
        }
    }
    debug!(%queue, slot, "Worker loop stopped");
}
