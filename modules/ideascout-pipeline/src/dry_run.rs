//! Offline classification debugging.
//!
//! Runs the live consensus path (same providers, retry policy and decision
//! function) over stored items and reports what it would decide. Reads only:
//! nothing is written and nothing is enqueued.

use std::collections::HashMap;

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::info;
use uuid::Uuid;

use ideascout_common::{Decision, Item, ModelSlot, Topic};

use crate::classify::classify_item;
use crate::deps::PipelineDeps;

#[derive(Debug, Clone)]
pub enum DryRunTarget {
    /// Every item currently associated with the scan.
    Scan(Uuid),
    Items(Vec<Uuid>),
}

#[derive(Debug, Clone, Serialize)]
pub struct DryRunDecision {
    pub item_id: Uuid,
    pub title: String,
    pub decision: Decision,
    pub score: f64,
    pub primary: ModelSlot,
    pub secondary: ModelSlot,
    pub reason: Option<String>,
    /// What the live pipeline stored, if the item was classified before.
    pub stored: Option<Decision>,
}

pub async fn dry_run(deps: &PipelineDeps, target: DryRunTarget) -> Result<Vec<DryRunDecision>> {
    let (scan_id, items) = match target {
        DryRunTarget::Scan(scan_id) => {
            deps.store
                .get_scan(scan_id)
                .await?
                .with_context(|| format!("Scan not found: {scan_id}"))?;
            (scan_id, deps.store.scan_items(scan_id).await?)
        }
        DryRunTarget::Items(ids) => {
            let mut items = Vec::with_capacity(ids.len());
            for id in ids {
                let item = deps
                    .store
                    .get_item(id)
                    .await?
                    .with_context(|| format!("Item not found: {id}"))?;
                items.push(item);
            }
            (Uuid::nil(), items)
        }
    };

    let mut topics: HashMap<Uuid, Topic> = HashMap::new();
    let mut decisions = Vec::with_capacity(items.len());
    for item in items {
        let topic = topic_for(deps, &mut topics, &item).await?;
        let record = classify_item(&deps.classifiers, &deps.retry, &topic, &item, scan_id).await;
        let stored = deps
            .store
            .get_classification(item.id)
            .await?
            .filter(|c| c.is_terminal())
            .map(|c| c.final_decision);

        decisions.push(DryRunDecision {
            item_id: item.id,
            title: item.title,
            decision: record.final_decision,
            score: record.combined_score.unwrap_or(0.0),
            primary: record.primary,
            secondary: record.secondary,
            reason: record.reason,
            stored,
        });
    }

    info!(items = decisions.len(), "Dry run finished");
    Ok(decisions)
}

async fn topic_for(
    deps: &PipelineDeps,
    cache: &mut HashMap<Uuid, Topic>,
    item: &Item,
) -> Result<Topic> {
    if let Some(topic) = cache.get(&item.topic_id) {
        return Ok(topic.clone());
    }
    let topic = deps
        .store
        .get_topic(item.topic_id)
        .await?
        .with_context(|| format!("Topic not found: {}", item.topic_id))?;
    cache.insert(topic.id, topic.clone());
    Ok(topic)
}
