//! Stage entry and finalizer jobs for classify and extract.
//!
//! An entry job fans a stage out into a chunk batch; the batch's follow-up is
//! the finalizer, which sweeps for missing results, overwrites the drifted
//! counters from persisted rows and only then advances the scan.

use std::time::Duration;

use anyhow::Result;
use tracing::{debug, info, warn};
use uuid::Uuid;

use ideascout_common::{Job, ScanStatus};

use crate::deps::PipelineDeps;
use crate::dispatch::dispatch_chunks;

/// Reason written on records synthesised by the classify sweep.
pub const GAP_FILL_REASON: &str = "not classified before finalization";

pub async fn begin_classify(deps: &PipelineDeps, scan_id: Uuid) -> Result<()> {
    let machine = deps.state_machine();
    if machine.guard(scan_id, &[ScanStatus::Classifying]).await?.is_none() {
        return Ok(());
    }

    let item_ids = deps.store.unclassified_item_ids(scan_id).await?;
    dispatch_chunks(
        deps.queue.as_ref(),
        scan_id,
        &item_ids,
        deps.config.chunks.classify,
        |scan_id, item_ids| Job::ClassifyChunk { scan_id, item_ids },
        Job::FinalizeClassify { scan_id },
    )
    .await?;
    Ok(())
}

pub async fn finalize_classify(deps: &PipelineDeps, scan_id: Uuid) -> Result<()> {
    let machine = deps.state_machine();
    let Some(scan) = deps.store.get_scan(scan_id).await? else {
        return Ok(());
    };
    match scan.status {
        ScanStatus::Classifying => {}
        ScanStatus::Extracting => {
            debug!(%scan_id, "Already extracting, re-dispatching stage entry");
            return enqueue_now(deps, Job::BeginExtract { scan_id }).await;
        }
        status => {
            debug!(%scan_id, %status, "Scan not classifying, nothing to finalize");
            return Ok(());
        }
    }

    let filled = deps
        .store
        .gap_fill_classifications(scan_id, GAP_FILL_REASON)
        .await?;
    if filled > 0 {
        warn!(%scan_id, filled, "Gap-filled unclassified items with discards");
    }

    let before = scan.counters.items_classified;
    let classified = deps.store.reconcile_classified(scan_id).await?;
    if before != classified {
        info!(%scan_id, before, after = classified, "Reconciled items_classified");
    }

    if machine
        .advance(scan_id, ScanStatus::Classifying, ScanStatus::Extracting)
        .await?
        || machine.is_in(scan_id, ScanStatus::Extracting).await?
    {
        enqueue_now(deps, Job::BeginExtract { scan_id }).await?;
    }
    Ok(())
}

pub async fn begin_extract(deps: &PipelineDeps, scan_id: Uuid) -> Result<()> {
    let machine = deps.state_machine();
    if machine.guard(scan_id, &[ScanStatus::Extracting]).await?.is_none() {
        return Ok(());
    }

    let item_ids = deps.store.extractable_item_ids(scan_id).await?;
    dispatch_chunks(
        deps.queue.as_ref(),
        scan_id,
        &item_ids,
        deps.config.chunks.extract,
        |scan_id, item_ids| Job::ExtractChunk { scan_id, item_ids },
        Job::FinalizeExtract { scan_id },
    )
    .await?;
    Ok(())
}

pub async fn finalize_extract(deps: &PipelineDeps, scan_id: Uuid) -> Result<()> {
    let machine = deps.state_machine();
    let Some(scan) = machine.guard(scan_id, &[ScanStatus::Extracting]).await? else {
        return Ok(());
    };

    // Missing extraction means zero ideas for that item; no sweep needed.
    let before = scan.counters;
    let (extracted, ideas) = deps.store.reconcile_extracted(scan_id).await?;
    if before.items_extracted != extracted || before.ideas_found != ideas {
        info!(
            %scan_id,
            items_before = before.items_extracted,
            items_after = extracted,
            ideas_before = before.ideas_found,
            ideas_after = ideas,
            "Reconciled extraction counters"
        );
    }

    if machine
        .advance(scan_id, ScanStatus::Extracting, ScanStatus::Completed)
        .await?
    {
        info!(%scan_id, items_extracted = extracted, ideas_found = ideas, "Scan completed");
    }
    Ok(())
}

async fn enqueue_now(deps: &PipelineDeps, job: Job) -> Result<()> {
    deps.queue.enqueue(&job, Duration::ZERO).await?;
    Ok(())
}
