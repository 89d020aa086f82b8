//! End-to-end scan runs over the in-memory store and queue.
//!
//! Each test starts a scan through the orchestrator and drains the queue with
//! a single in-process worker, so job order is deterministic.

mod harness;

use ai_client::AiError;
use ideascout_common::{Decision, Queue, ScanError, ScanStatus, ScanType, Verdict};
use ideascout_pipeline::classify::ALL_FAILED_REASON;
use ideascout_pipeline::orchestrator::CANCELLED_MESSAGE;
use ideascout_pipeline::testing::{idea, post, MockSource, ScriptedModel};
use ideascout_pipeline::traits::SourceError;
use ideascout_store::ScanStore;

use harness::Harness;

const INVOICES: &str = "Invoices eat my weekends";
const CAT: &str = "Look at my cat";
const CRM: &str = "Need a better CRM?";

async fn three_post_harness() -> Harness {
    let source = MockSource::new()
        .page(vec![post("a", INVOICES), post("b", CAT), post("c", CRM)])
        .replies("a", &["same here", "I use a spreadsheet"]);
    let primary = ScriptedModel::new("primary")
        .verdict(INVOICES, Verdict::Keep, 0.9)
        .verdict(CAT, Verdict::Skip, 0.9)
        .verdict(CRM, Verdict::Keep, 0.9);
    let secondary = ScriptedModel::new("secondary")
        .verdict(INVOICES, Verdict::Keep, 0.85)
        .verdict(CAT, Verdict::Skip, 0.9)
        .verdict(CRM, Verdict::Skip, 0.7);
    let extractor = ScriptedModel::new("extractor")
        .ideas(INVOICES, vec![idea("Invoice autopilot"), idea("Late-payment chaser")])
        .ideas(CRM, vec![idea("CRM for solo consultants")]);

    Harness::dual(source, primary, secondary, extractor).await
}

async fn decision_for(h: &Harness, scan_id: uuid::Uuid, title: &str) -> (Decision, Option<f64>) {
    let items = h.store.scan_items(scan_id).await.unwrap();
    let item = items.iter().find(|i| i.title == title).unwrap();
    let record = h.store.get_classification(item.id).await.unwrap().unwrap();
    (record.final_decision, record.combined_score)
}

#[tokio::test]
async fn scan_runs_from_fetch_to_completion() {
    let h = three_post_harness().await;
    let view = h.orchestrator().start_scan(h.topic.id, None).await.unwrap();
    assert_eq!(view.status, ScanStatus::Pending);
    assert_eq!(view.scan_type, ScanType::Initial);

    h.worker().run_until_idle().await.unwrap();

    let scan = h.scan(view.scan_id).await;
    assert_eq!(scan.status, ScanStatus::Completed);
    assert!(scan.completed_at.is_some());
    assert_eq!(scan.counters.items_fetched, 3);
    assert_eq!(scan.counters.items_classified, 3);
    assert_eq!(scan.counters.items_extracted, 2);
    assert_eq!(scan.counters.ideas_found, 3);
    assert_eq!(scan.status_view().progress_percent, 100);

    assert_eq!(decision_for(&h, scan.id, INVOICES).await, (Decision::Keep, Some(1.0)));
    assert_eq!(decision_for(&h, scan.id, CAT).await.0, Decision::Discard);
    let (decision, score) = decision_for(&h, scan.id, CRM).await;
    assert_eq!(decision, Decision::Borderline);
    assert!((score.unwrap() - 0.45).abs() < 1e-9);

    assert_eq!(h.extractor.extract_calls(), 2);

    let items = h.store.scan_items(scan.id).await.unwrap();
    let invoices = items.iter().find(|i| i.title == INVOICES).unwrap();
    assert_eq!(invoices.replies, vec!["same here", "I use a spreadsheet"]);
    assert!(invoices.extracted_at.is_some());
    let cat = items.iter().find(|i| i.title == CAT).unwrap();
    assert!(cat.extracted_at.is_none());

    let ideas = h.store.ideas_for_scan(scan.id).await.unwrap();
    assert_eq!(ideas.len(), 3);
    let crm_idea = ideas.iter().find(|i| i.title == "CRM for solo consultants").unwrap();
    assert_eq!(crm_idea.classification_status, Decision::Borderline);

    assert!(h.queue.is_idle().await);
    assert!(h.queue.buried().await.is_empty());
}

#[tokio::test]
async fn pages_are_followed_until_the_source_runs_dry() {
    let source = MockSource::new()
        .page(vec![post("a", INVOICES)])
        .page(vec![post("b", CAT)])
        .page(vec![post("c", CRM)]);
    let primary = ScriptedModel::new("primary")
        .verdict(INVOICES, Verdict::Keep, 0.9)
        .verdict(CAT, Verdict::Skip, 0.9)
        .verdict(CRM, Verdict::Skip, 0.9);
    let h = Harness::single(source, primary, ScriptedModel::new("extractor")).await;

    let view = h.orchestrator().start_scan(h.topic.id, None).await.unwrap();
    h.worker().run_until_idle().await.unwrap();

    let scan = h.scan(view.scan_id).await;
    assert_eq!(scan.status, ScanStatus::Completed);
    assert_eq!(scan.pages_fetched, 3);
    assert_eq!(scan.counters.items_fetched, 3);
    assert_eq!(scan.child_jobs_total, 3);
    assert_eq!(scan.child_jobs_done, 3);
    assert_eq!(h.source.fetch_calls(), 3);
}

#[tokio::test]
async fn failing_classifiers_discard_the_item_and_the_scan_still_completes() {
    let source = MockSource::new().page(vec![post("a", INVOICES), post("z", "Unscripted rant")]);
    let primary = ScriptedModel::new("primary").verdict(INVOICES, Verdict::Keep, 0.9);
    let secondary = ScriptedModel::new("secondary").verdict(INVOICES, Verdict::Keep, 0.9);
    let h = Harness::dual(source, primary, secondary, ScriptedModel::new("extractor")).await;

    let view = h.orchestrator().start_scan(h.topic.id, None).await.unwrap();
    h.worker().run_until_idle().await.unwrap();

    let scan = h.scan(view.scan_id).await;
    assert_eq!(scan.status, ScanStatus::Completed);
    assert_eq!(scan.counters.items_classified, 2);

    let items = h.store.scan_items(scan.id).await.unwrap();
    let rant = items.iter().find(|i| i.title == "Unscripted rant").unwrap();
    let record = h.store.get_classification(rant.id).await.unwrap().unwrap();
    assert_eq!(record.final_decision, Decision::Discard);
    assert_eq!(record.combined_score, Some(0.0));
    assert_eq!(record.reason.as_deref(), Some(ALL_FAILED_REASON));
    assert!(!record.primary.completed);
    assert!(!record.secondary.completed);
}

#[tokio::test]
async fn transient_model_errors_are_retried() {
    let source = MockSource::new().page(vec![post("a", INVOICES)]);
    let primary = ScriptedModel::new("primary")
        .verdict(INVOICES, Verdict::Keep, 0.9)
        .flaky(INVOICES, 2);
    let h = Harness::single(source, primary, ScriptedModel::new("extractor")).await;

    let view = h.orchestrator().start_scan(h.topic.id, None).await.unwrap();
    h.worker().run_until_idle().await.unwrap();

    assert_eq!(h.primary.classify_calls(), 3);
    let (decision, score) = decision_for(&h, view.scan_id, INVOICES).await;
    assert_eq!(decision, Decision::Keep);
    assert_eq!(score, Some(0.9));
}

#[tokio::test]
async fn permanent_model_errors_are_not_retried() {
    let source = MockSource::new().page(vec![post("a", INVOICES)]);
    let primary = ScriptedModel::new("primary").fail(
        INVOICES,
        AiError::InvalidRequest {
            status: 401,
            message: "bad key".into(),
        },
    );
    let h = Harness::single(source, primary, ScriptedModel::new("extractor")).await;

    h.orchestrator().start_scan(h.topic.id, None).await.unwrap();
    h.worker().run_until_idle().await.unwrap();

    assert_eq!(h.primary.classify_calls(), 1);
}

#[tokio::test]
async fn permanent_fetch_failure_fails_the_scan() {
    let source = MockSource::new().failing(SourceError::Permanent("actor not found".into()));
    let h = Harness::single(
        source,
        ScriptedModel::new("primary"),
        ScriptedModel::new("extractor"),
    )
    .await;

    let view = h.orchestrator().start_scan(h.topic.id, None).await.unwrap();
    h.worker().run_until_idle().await.unwrap();

    let scan = h.scan(view.scan_id).await;
    assert_eq!(scan.status, ScanStatus::Failed);
    let message = scan.error_message.unwrap();
    assert!(message.starts_with("Fetch failed on page 0"), "{message}");
    assert_eq!(h.source.fetch_calls(), 1);
    assert_eq!(h.store.classification_count().await, 0);
}

#[tokio::test]
async fn cancelled_scan_stops_at_the_next_guard() {
    let h = three_post_harness().await;
    let orchestrator = h.orchestrator();
    let view = orchestrator.start_scan(h.topic.id, None).await.unwrap();

    // Fetch page 0 only, then cancel with reply and completion jobs queued.
    assert!(h.worker().run_once(&[Queue::Fetch]).await.unwrap());
    assert_eq!(h.scan(view.scan_id).await.status, ScanStatus::Fetching);
    orchestrator.cancel_scan(view.scan_id).await.unwrap();

    h.worker().run_until_idle().await.unwrap();

    let scan = h.scan(view.scan_id).await;
    assert_eq!(scan.status, ScanStatus::Failed);
    assert_eq!(scan.error_message.as_deref(), Some(CANCELLED_MESSAGE));
    assert_eq!(h.store.classification_count().await, 0);
    assert_eq!(h.primary.classify_calls(), 0);
    assert!(h.queue.is_idle().await);

    let err = orchestrator.cancel_scan(view.scan_id).await.unwrap_err();
    assert!(matches!(err, ScanError::NotCancellable { .. }));
}

#[tokio::test]
async fn retried_scan_runs_to_completion() {
    let h = three_post_harness().await;
    let orchestrator = h.orchestrator();
    let first = orchestrator.start_scan(h.topic.id, None).await.unwrap();
    orchestrator.cancel_scan(first.scan_id).await.unwrap();
    h.worker().run_until_idle().await.unwrap();

    let second = orchestrator.retry_scan(first.scan_id).await.unwrap();
    assert_ne!(second, first.scan_id);
    h.worker().run_until_idle().await.unwrap();

    let retried = h.scan(second).await;
    assert_eq!(retried.status, ScanStatus::Completed);
    assert_eq!(retried.window, h.scan(first.scan_id).await.window);
    assert_eq!(retried.counters.ideas_found, 3);
}

#[tokio::test]
async fn rescan_reuses_terminal_classifications() {
    let h = three_post_harness().await;
    let orchestrator = h.orchestrator();
    let first = orchestrator.start_scan(h.topic.id, None).await.unwrap();
    h.worker().run_until_idle().await.unwrap();
    assert_eq!(h.primary.classify_calls(), 3);

    let second = orchestrator.start_scan(h.topic.id, None).await.unwrap();
    assert_ne!(second.scan_id, first.scan_id);
    assert_eq!(second.scan_type, ScanType::Rescan);
    h.worker().run_until_idle().await.unwrap();

    let rescan = h.scan(second.scan_id).await;
    assert_eq!(rescan.status, ScanStatus::Completed);
    // Same three posts: nothing re-asked, counters rebuilt from stored rows.
    assert_eq!(h.primary.classify_calls(), 3);
    assert_eq!(h.extractor.extract_calls(), 2);
    assert_eq!(rescan.counters.items_fetched, 3);
    assert_eq!(rescan.counters.items_classified, 3);
    assert_eq!(rescan.counters.items_extracted, 2);
    assert_eq!(rescan.counters.ideas_found, 0);
}
