//! Extract stage: idea extraction for kept and borderline items.
//!
//! Each item is processed under its row lock, and the ideas, the
//! `extracted_at` mark and the counters commit together. A duplicate chunk
//! either waits on the lock and then finds the item done, or never sees it.

use anyhow::Result;
use tracing::{debug, info, warn};
use uuid::Uuid;

use ideascout_common::{Idea, ScanStatus};

use crate::deps::PipelineDeps;
use crate::models::ExtractRequest;

pub async fn extract_chunk(deps: &PipelineDeps, scan_id: Uuid, item_ids: &[Uuid]) -> Result<()> {
    let machine = deps.state_machine();
    let Some(scan) = machine.guard(scan_id, &[ScanStatus::Extracting]).await? else {
        return Ok(());
    };
    let Some(topic) = deps.store.get_topic(scan.topic_id).await? else {
        return Ok(());
    };
    let max_ideas = deps.config.scan.max_ideas_per_item;

    let mut extracted = 0usize;
    let mut ideas_found = 0usize;
    for &item_id in item_ids {
        if !machine.is_in(scan_id, ScanStatus::Extracting).await? {
            info!(%scan_id, "Scan left extracting, abandoning chunk");
            break;
        }

        let Some(lock) = deps.store.lock_item_for_extraction(item_id).await? else {
            debug!(%scan_id, %item_id, "Already extracted or gone, skipping");
            continue;
        };

        let status = match lock.classification().map(|c| c.final_decision) {
            Some(decision) if decision.is_extractable() => decision,
            other => {
                debug!(%scan_id, %item_id, decision = ?other, "Not extractable, skipping");
                lock.release().await?;
                continue;
            }
        };

        let request = ExtractRequest::new(&topic, lock.item(), max_ideas);
        let raw = match deps
            .retry
            .run("extract", || deps.extractor.extract(&request))
            .await
        {
            Ok(raw) => raw,
            Err(e) => {
                // Final for this chunk: the item stays unmarked and yields no ideas.
                warn!(%scan_id, %item_id, error = %e, "Extraction failed");
                lock.release().await?;
                continue;
            }
        };

        let ideas: Vec<Idea> = raw
            .into_iter()
            .take(max_ideas)
            .map(|idea| Idea::from_extracted(lock.item(), scan_id, status, idea))
            .collect();
        let count = ideas.len();

        if lock.commit(scan_id, &ideas).await? {
            extracted += 1;
            ideas_found += count;
            debug!(%scan_id, %item_id, ideas = count, "Item extracted");
        } else {
            debug!(%scan_id, %item_id, "Scan moved on before commit, dropped");
        }
    }

    info!(%scan_id, chunk = item_ids.len(), extracted, ideas_found, "Extract chunk done");
    Ok(())
}
