use anyhow::Result;
use tracing::info;
use uuid::Uuid;

use ideascout_common::Job;
use ideascout_store::JobQueue;

/// Split `item_ids` into chunks of `size` and enqueue them as one batch whose
/// `then` job runs after the last chunk finishes. With nothing to do the
/// `then` job is enqueued directly. Returns the number of chunks.
pub async fn dispatch_chunks(
    queue: &dyn JobQueue,
    scan_id: Uuid,
    item_ids: &[Uuid],
    size: usize,
    chunk: impl Fn(Uuid, Vec<Uuid>) -> Job,
    then: Job,
) -> Result<usize> {
    let jobs: Vec<Job> = item_ids
        .chunks(size.max(1))
        .map(|ids| chunk(scan_id, ids.to_vec()))
        .collect();
    let count = jobs.len();

    info!(
        %scan_id,
        items = item_ids.len(),
        chunks = count,
        then = then.name(),
        "Dispatching chunk batch"
    );
    queue.enqueue_batch(jobs, then).await?;
    Ok(count)
}

#[cfg(test)]
mod tests {
    use ideascout_store::MemoryJobQueue;

    use super::*;

    #[tokio::test]
    async fn empty_batch_enqueues_the_follow_up_directly() {
        let queue = MemoryJobQueue::default();
        let scan_id = Uuid::new_v4();
        let n = dispatch_chunks(
            &queue,
            scan_id,
            &[],
            10,
            |scan_id, item_ids| Job::ClassifyChunk { scan_id, item_ids },
            Job::FinalizeClassify { scan_id },
        )
        .await
        .unwrap();

        assert_eq!(n, 0);
        assert_eq!(queue.pending().await, vec![Job::FinalizeClassify { scan_id }]);
    }

    #[tokio::test]
    async fn items_are_split_by_chunk_size() {
        let queue = MemoryJobQueue::default();
        let scan_id = Uuid::new_v4();
        let ids: Vec<Uuid> = (0..5).map(|_| Uuid::new_v4()).collect();
        let n = dispatch_chunks(
            &queue,
            scan_id,
            &ids,
            2,
            |scan_id, item_ids| Job::ExtractChunk { scan_id, item_ids },
            Job::FinalizeExtract { scan_id },
        )
        .await
        .unwrap();

        assert_eq!(n, 3);
        assert_eq!(queue.pending().await.len(), 3);
    }
}
