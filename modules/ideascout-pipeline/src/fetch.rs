//! Fetch stage.
//!
//! Pagination is a chain of `FetchPage` jobs, each driven by the checkpoint
//! the previous page persisted. Reply retrieval for each page fans out into
//! parallel `FetchReplies` chunks, and a delayed `CheckFetchComplete` job
//! polls the child counters instead of blocking a worker on them.
//!
//! A page's follow-up jobs are enqueued after its commit. A redelivered page
//! that finds itself committed re-enqueues them from the stored chunks and
//! checkpoint, so losing them between commit and enqueue is recoverable.

use std::collections::HashSet;
use std::time::Duration;

use anyhow::Result;
use tracing::{debug, info, warn};
use uuid::Uuid;

use ideascout_common::{FetchedItem, Job, Scan, ScanStatus};
use ideascout_store::ReplyChunk;

use crate::deps::PipelineDeps;

pub async fn fetch_page(deps: &PipelineDeps, scan_id: Uuid, page: i32) -> Result<()> {
    let machine = deps.state_machine();
    let Some(scan) = machine
        .guard(scan_id, &[ScanStatus::Pending, ScanStatus::Fetching])
        .await?
    else {
        return Ok(());
    };

    if scan.status == ScanStatus::Pending {
        machine
            .advance(scan_id, ScanStatus::Pending, ScanStatus::Fetching)
            .await?;
    }
    // Re-read: the checkpoint and page token may have moved under a duplicate delivery.
    let Some(scan) = machine.guard(scan_id, &[ScanStatus::Fetching]).await? else {
        return Ok(());
    };
    if scan.pages_fetched == page + 1 {
        return redispatch_committed_page(deps, &scan, page).await;
    }
    if scan.pages_fetched != page {
        debug!(
            %scan_id,
            page,
            pages_fetched = scan.pages_fetched,
            "Page already committed, skipping"
        );
        return Ok(());
    }

    let Some(topic) = deps.store.get_topic(scan.topic_id).await? else {
        machine.fail(scan_id, "Topic no longer exists").await?;
        return Ok(());
    };

    let checkpoint = scan.checkpoint.as_deref();
    let fetched = deps
        .retry
        .run("fetch", || deps.source.fetch(&topic, &scan.window, checkpoint))
        .await;
    let source_page = match fetched {
        Ok(p) => p,
        Err(e) => {
            machine
                .fail(scan_id, &format!("Fetch failed on page {page}: {e}"))
                .await?;
            return Ok(());
        }
    };

    let items = dedupe(source_page.items);
    let next_cursor = source_page.next_cursor;

    let Some(commit) = deps
        .store
        .commit_page(scan_id, page, items, next_cursor.clone(), deps.config.chunks.replies)
        .await?
    else {
        debug!(%scan_id, page, "Lost page commit race, skipping");
        return Ok(());
    };

    info!(
        %scan_id,
        page,
        items = commit.item_ids.len(),
        more = next_cursor.is_some(),
        "Committed fetch page"
    );

    let more = next_cursor.is_some();
    dispatch_page_followups(deps, scan_id, page, commit.reply_chunks, more).await
}

/// The page committed earlier but its follow-ups may never have been queued.
/// Re-enqueue whatever is still outstanding; duplicates are absorbed downstream.
async fn redispatch_committed_page(deps: &PipelineDeps, scan: &Scan, page: i32) -> Result<()> {
    let pending = deps.store.pending_reply_chunks(scan.id, page).await?;
    debug!(
        scan_id = %scan.id,
        page,
        pending_chunks = pending.len(),
        "Page already committed, re-dispatching follow-ups"
    );
    dispatch_page_followups(deps, scan.id, page, pending, scan.checkpoint.is_some()).await
}

/// Reply chunks for the page, then the next page or the completion poll.
async fn dispatch_page_followups(
    deps: &PipelineDeps,
    scan_id: Uuid,
    page: i32,
    chunks: Vec<ReplyChunk>,
    more: bool,
) -> Result<()> {
    for chunk in chunks {
        deps.queue
            .enqueue(
                &Job::FetchReplies {
                    scan_id,
                    page: chunk.page,
                    chunk: chunk.chunk,
                    item_ids: chunk.item_ids,
                },
                Duration::ZERO,
            )
            .await?;
    }

    if more {
        deps.queue
            .enqueue(&Job::FetchPage { scan_id, page: page + 1 }, Duration::ZERO)
            .await?;
    } else {
        deps.queue
            .enqueue(
                &Job::CheckFetchComplete { scan_id, poll: 0 },
                Duration::from_secs(deps.config.fetch.poll_delay_secs),
            )
            .await?;
    }
    Ok(())
}

/// A source may repeat a record within one page; the store would collapse
/// them and `items_fetched` would overcount.
fn dedupe(items: Vec<FetchedItem>) -> Vec<FetchedItem> {
    let mut seen = HashSet::new();
    items
        .into_iter()
        .filter(|i| seen.insert(i.source_id.clone()))
        .collect()
}

/// Per-item failures are logged and skipped; the chunk always counts as done,
/// but only once however often it is delivered.
pub async fn fetch_replies(
    deps: &PipelineDeps,
    scan_id: Uuid,
    page: i32,
    chunk: i32,
    item_ids: &[Uuid],
) -> Result<()> {
    let machine = deps.state_machine();
    if machine.guard(scan_id, &[ScanStatus::Fetching]).await?.is_none() {
        return Ok(());
    }

    let mut stored = 0usize;
    for &item_id in item_ids {
        let Some(item) = deps.store.get_item(item_id).await? else {
            continue;
        };
        match deps
            .retry
            .run("fetch_replies", || deps.source.fetch_replies(&item))
            .await
        {
            Ok(replies) => {
                deps.store.store_replies(item_id, replies).await?;
                stored += 1;
            }
            Err(e) => warn!(
                %scan_id,
                %item_id,
                error = %e,
                "Reply fetch failed, continuing without replies"
            ),
        }
    }

    if deps.store.record_child_job_done(scan_id, page, chunk).await? {
        debug!(%scan_id, page, chunk, items = item_ids.len(), stored, "Reply chunk done");
    } else {
        debug!(%scan_id, page, chunk, "Reply chunk already counted");
    }
    Ok(())
}

/// The fetch-stage finalizer.
pub async fn check_fetch_complete(deps: &PipelineDeps, scan_id: Uuid, poll: u32) -> Result<()> {
    let machine = deps.state_machine();
    let Some(scan) = deps.store.get_scan(scan_id).await? else {
        return Ok(());
    };

    match scan.status {
        ScanStatus::Fetching => {}
        ScanStatus::Classifying => {
            // A previous run transitioned but may have died before enqueueing.
            debug!(%scan_id, "Already classifying, re-dispatching stage entry");
            deps.queue
                .enqueue(&Job::BeginClassify { scan_id }, Duration::ZERO)
                .await?;
            return Ok(());
        }
        status => {
            debug!(%scan_id, %status, "Scan past fetching, nothing to check");
            return Ok(());
        }
    }

    let done = scan.child_jobs_done >= scan.child_jobs_total;
    let cap = deps.config.fetch.poll_cap;
    if !done && poll < cap {
        debug!(
            %scan_id,
            poll,
            done = scan.child_jobs_done,
            total = scan.child_jobs_total,
            "Reply jobs still running"
        );
        deps.queue
            .enqueue(
                &Job::CheckFetchComplete { scan_id, poll: poll + 1 },
                Duration::from_secs(deps.config.fetch.poll_delay_secs),
            )
            .await?;
        return Ok(());
    }
    if !done {
        warn!(
            %scan_id,
            done = scan.child_jobs_done,
            total = scan.child_jobs_total,
            "Poll cap reached, moving on without all replies"
        );
    }

    if machine
        .advance(scan_id, ScanStatus::Fetching, ScanStatus::Classifying)
        .await?
        || machine.is_in(scan_id, ScanStatus::Classifying).await?
    {
        deps.queue
            .enqueue(&Job::BeginClassify { scan_id }, Duration::ZERO)
            .await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fetched(source_id: &str) -> FetchedItem {
        FetchedItem {
            source_id: source_id.into(),
            title: String::new(),
            body: String::new(),
            url: None,
            author: None,
            subreddit: None,
            upvotes: 0,
            num_comments: 0,
            posted_at: None,
        }
    }

    #[test]
    fn repeated_records_are_dropped_in_order() {
        let out = dedupe(vec![fetched("a"), fetched("b"), fetched("a")]);
        let ids: Vec<&str> = out.iter().map(|i| i.source_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }
}
