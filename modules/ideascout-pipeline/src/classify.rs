//! Classify stage: consensus over the configured classifiers, one item at a time.

use std::sync::Arc;

use ai_client::AiError;
use anyhow::Result;
use chrono::Utc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use ideascout_common::{Classification, Item, ModelSlot, ModelVerdict, ScanStatus, Topic};

use crate::consensus::{combine, Outcome, Vote, Votes};
use crate::deps::PipelineDeps;
use crate::models::{ClassifyRequest, ModelClient};
use crate::retry::RetryPolicy;

/// Reason stored when no classifier produced an answer.
pub const ALL_FAILED_REASON: &str = "all classifiers failed";

/// One classifier's result, successful or not.
struct SlotResult {
    slot: ModelSlot,
    vote: Option<Vote>,
}

async fn ask(
    model: &Arc<dyn ModelClient>,
    retry: &RetryPolicy,
    request: &ClassifyRequest,
) -> SlotResult {
    let result: Result<ModelVerdict, AiError> = retry
        .run(model.name(), || model.classify(request))
        .await;
    match result {
        Ok(answer) => SlotResult {
            vote: Some(Vote::new(answer.verdict, answer.confidence)),
            slot: ModelSlot::answered(model.name(), &answer),
        },
        Err(e) => {
            warn!(model = model.name(), error = %e, "Classifier gave no usable answer");
            SlotResult {
                slot: ModelSlot::failed(model.name(), &e.to_string()),
                vote: None,
            }
        }
    }
}

/// Run the classifiers for one item and build its terminal record.
///
/// Pure apart from the model calls: nothing is persisted, so the dry runner
/// uses the same path.
pub async fn classify_item(
    classifiers: &[Arc<dyn ModelClient>],
    retry: &RetryPolicy,
    topic: &Topic,
    item: &Item,
    scan_id: Uuid,
) -> Classification {
    let request = ClassifyRequest::new(topic, item);

    let (primary, secondary, votes) = match classifiers {
        [] => (None, None, Votes::SingleProvider(None)),
        [only] => {
            let a = ask(only, retry, &request).await;
            let vote = a.vote;
            (Some(a.slot), None, Votes::SingleProvider(vote))
        }
        [first, second, ..] => {
            let (a, b) = tokio::join!(
                ask(first, retry, &request),
                ask(second, retry, &request)
            );
            let votes = Votes::dual(a.vote, b.vote);
            (Some(a.slot), Some(b.slot), votes)
        }
    };

    let all_failed = matches!(votes, Votes::BothFailed | Votes::SingleProvider(None));
    let Outcome { score, decision } = combine(votes);

    Classification {
        item_id: item.id,
        scan_id,
        primary: primary.unwrap_or_default(),
        secondary: secondary.unwrap_or_default(),
        combined_score: Some(score),
        final_decision: decision,
        reason: all_failed.then(|| ALL_FAILED_REASON.to_string()),
        classified_at: Some(Utc::now()),
    }
}

/// Handle one `ClassifyChunk`. Safe to run any number of times.
pub async fn classify_chunk(deps: &PipelineDeps, scan_id: Uuid, item_ids: &[Uuid]) -> Result<()> {
    let machine = deps.state_machine();
    let Some(scan) = machine.guard(scan_id, &[ScanStatus::Classifying]).await? else {
        return Ok(());
    };
    let Some(topic) = deps.store.get_topic(scan.topic_id).await? else {
        return Ok(());
    };

    let mut written = 0usize;
    for &item_id in item_ids {
        // Cooperative cancellation: stop at the next item boundary.
        if !machine.is_in(scan_id, ScanStatus::Classifying).await? {
            info!(%scan_id, "Scan left classifying, abandoning chunk");
            break;
        }
        let Some(item) = deps.store.get_item(item_id).await? else {
            debug!(%scan_id, %item_id, "Item gone, skipping");
            continue;
        };
        if !deps.store.begin_classification(item_id, scan_id).await? {
            debug!(%scan_id, %item_id, "Already classified, skipping");
            continue;
        }

        let record = classify_item(&deps.classifiers, &deps.retry, &topic, &item, scan_id).await;
        let decision = record.final_decision;
        if deps.store.complete_classification(scan_id, &record).await? {
            written += 1;
            debug!(
                %scan_id,
                %item_id,
                %decision,
                score = ?record.combined_score,
                "Item classified"
            );
        } else {
            debug!(%scan_id, %item_id, "Classification raced or scan moved on, dropped");
        }
    }

    info!(%scan_id, chunk = item_ids.len(), written, "Classify chunk done");
    Ok(())
}

#[cfg(test)]
mod tests {
    use ideascout_common::{Decision, FetchedItem, Verdict};

    use super::*;
    use crate::testing::ScriptedModel;

    fn item(title: &str) -> Item {
        Item::from_fetched(
            Uuid::new_v4(),
            Uuid::new_v4(),
            FetchedItem {
                source_id: title.into(),
                title: title.into(),
                body: String::new(),
                url: None,
                author: None,
                subreddit: None,
                upvotes: 0,
                num_comments: 0,
                posted_at: None,
            },
        )
    }

    fn topic() -> Topic {
        Topic::new("invoicing", vec![], vec![])
    }

    fn model(scripted: ScriptedModel) -> Arc<dyn ModelClient> {
        Arc::new(scripted)
    }

    async fn classify(models: &[Arc<dyn ModelClient>], attempts: u32) -> Classification {
        let retry = RetryPolicy::immediate(attempts);
        classify_item(models, &retry, &topic(), &item("post"), Uuid::new_v4()).await
    }

    #[tokio::test]
    async fn dual_models_combine_through_the_formula() {
        let a = model(ScriptedModel::new("a").verdict("post", Verdict::Keep, 0.7));
        let b = model(ScriptedModel::new("b").verdict("post", Verdict::Keep, 0.8));

        let record = classify(&[a, b], 1).await;
        assert_eq!(record.final_decision, Decision::Keep);
        assert!((record.combined_score.unwrap() - 0.75).abs() < 1e-9);
        assert!(record.primary.completed && record.secondary.completed);
        assert_eq!(record.primary.provider.as_deref(), Some("a"));
        assert!(record.reason.is_none());
    }

    #[tokio::test]
    async fn one_failed_model_halves_the_survivor() {
        let a = model(ScriptedModel::new("a").verdict("post", Verdict::Keep, 0.9));
        let b = model(ScriptedModel::new("b").fail("post", AiError::from_status(401, "bad key")));

        let record = classify(&[a, b], 1).await;
        // 0.9 halved is 0.45: borderline.
        assert_eq!(record.final_decision, Decision::Borderline);
        assert!(!record.secondary.completed);
        assert!(record.secondary.reasoning.unwrap().starts_with("error:"));
    }

    #[tokio::test]
    async fn single_provider_is_not_penalised() {
        let a = model(ScriptedModel::new("a").verdict("post", Verdict::Keep, 0.9));

        let record = classify(&[a], 1).await;
        assert_eq!(record.final_decision, Decision::Keep);
        assert_eq!(record.secondary, ModelSlot::default());
    }

    #[tokio::test]
    async fn total_failure_is_a_terminal_discard() {
        let a = model(ScriptedModel::new("a").fail("post", AiError::from_status(400, "bad")));
        let b = model(ScriptedModel::new("b").fail("post", AiError::Parse("junk".into())));

        let record = classify(&[a, b], 2).await;
        assert_eq!(record.final_decision, Decision::Discard);
        assert_eq!(record.combined_score, Some(0.0));
        assert_eq!(record.reason.as_deref(), Some(ALL_FAILED_REASON));
        assert!(record.is_terminal());
    }
}
