// tests/pipeline_scenarios.rs
//
// End-to-end runs of the queue worker against an in-memory SQLite store,
// a scripted AI backend and a recording notifier.

mod support;

use std::time::Duration;

use serde_json::json;

use companion_risk_analyzer::alert::AlertOutcome;
use companion_risk_analyzer::analyze::AiTask;
use companion_risk_analyzer::error::AiError;
use companion_risk_analyzer::model::{JobStatus, MessageRole, RiskScoreRecord, RiskScores};
use companion_risk_analyzer::store::{AnalysisRecordStore, JobQueue};
use companion_risk_analyzer::worker::{BatchSummary, JobOutcome, NOTE_NOT_RISKY, NOTE_NOT_USER};

use support::{enqueue_message, harness, HarnessOpts, RecordingNotifier, StubAi, GUARDIAN_EMAIL};

#[tokio::test]
async fn benign_message_completes_as_skipped_without_record_or_alert() {
    let h = harness(StubAi::benign(), HarnessOpts::default()).await;
    let (msg, job) = enqueue_message(&h.store, MessageRole::User, "I'm having a great day").await;

    let summary = h.worker.run_batch().await.unwrap();
    assert_eq!(summary.processed, 1);
    assert_eq!(summary.skipped, 1);

    let job = h.store.job(job).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.note.as_deref(), Some(NOTE_NOT_RISKY));
    assert_eq!(h.store.count_records_for_message(msg).await.unwrap(), 0);
    assert_eq!(h.ai.calls(AiTask::Score), 0, "scorer must not run");
    assert_eq!(h.notifier.attempts(), 0);
}

#[tokio::test]
async fn acute_message_is_scored_persisted_and_guardian_notified() {
    let h = harness(StubAi::risky(0.92, 0.85), HarnessOpts::default()).await;
    let text = "I don't want to be here anymore";
    let (msg, job) = enqueue_message(&h.store, MessageRole::User, text).await;

    let summary = h.worker.run_batch().await.unwrap();
    assert_eq!(summary.completed, 1);

    let job = h.store.job(job).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert!(job.note.is_none());

    let record = h.store.latest_record("c1").await.unwrap().unwrap();
    assert_eq!(record.conversation_id, msg);
    assert!(record.is_alert_triggered);
    assert_eq!(record.scores.self_harm_risk_score, 0.92);
    assert_eq!(record.scores.urgency_score, 0.85);

    let sent = h.notifier.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].0, GUARDIAN_EMAIL);
    let alert = &sent[0].1;
    assert_eq!(alert.conversation_id, msg);
    assert_eq!(alert.scores.self_harm_risk_score, 0.92);
    assert_eq!(alert.triggered_by, vec!["self_harm_risk_score", "urgency_score"]);

    // scores travel, the child's words do not
    let payload = serde_json::to_string(alert).unwrap();
    assert!(!payload.contains(text));
}

#[tokio::test]
async fn scorer_timeout_fails_job_with_no_record_and_no_alert() {
    let ai = StubAi::risky(0.92, 0.85).delay(AiTask::Score, Duration::from_millis(800));
    let h = harness(
        ai,
        HarnessOpts {
            call_timeout_ms: 50,
            ..Default::default()
        },
    )
    .await;
    let (msg, job) = enqueue_message(&h.store, MessageRole::User, "everything hurts").await;

    let summary = h.worker.run_batch().await.unwrap();
    assert_eq!(summary.failed, 1);

    let job = h.store.job(job).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    let reason = job.error_message.unwrap();
    assert!(reason.contains("timed out"), "reason: {reason}");
    assert_eq!(h.store.count_records_for_message(msg).await.unwrap(), 0);
    assert_eq!(h.notifier.attempts(), 0);
}

#[tokio::test]
async fn missing_guardian_still_completes_the_job() {
    let h = harness(
        StubAi::risky(0.95, 0.9),
        HarnessOpts {
            with_guardian: false,
            ..Default::default()
        },
    )
    .await;
    let (msg, job_id) = enqueue_message(&h.store, MessageRole::User, "i want to disappear").await;

    let job = h.store.job(job_id).await.unwrap().unwrap();
    let outcome = h.worker.process_job(job).await;
    assert_eq!(
        outcome,
        JobOutcome::Completed {
            alert: Some(AlertOutcome::SkippedNoGuardian)
        }
    );
    assert_eq!(
        h.store.job(job_id).await.unwrap().unwrap().status,
        JobStatus::Completed
    );
    assert_eq!(h.store.count_records_for_message(msg).await.unwrap(), 1);
    assert_eq!(h.notifier.attempts(), 0);
}

#[tokio::test]
async fn storage_failure_does_not_block_the_alert() {
    let h = harness(
        StubAi::risky(0.9, 0.2),
        HarnessOpts {
            failing_records: true,
            ..Default::default()
        },
    )
    .await;
    let (msg, job_id) = enqueue_message(&h.store, MessageRole::User, "nobody would notice").await;

    let job = h.store.job(job_id).await.unwrap().unwrap();
    let outcome = h.worker.process_job(job).await;
    assert_eq!(
        outcome,
        JobOutcome::Completed {
            alert: Some(AlertOutcome::Sent)
        }
    );
    assert_eq!(h.notifier.sent().len(), 1);
    assert_eq!(h.store.count_records_for_message(msg).await.unwrap(), 0);
}

#[tokio::test]
async fn partial_score_response_fails_without_record() {
    let ai = StubAi::risky(0.9, 0.9).respond(
        AiTask::Score,
        Ok(json!({
            "depression_score": 0.5,
            "anxiety_score": 0.5,
            "isolation_score": 0.5,
            "urgency_score": 0.5
        })),
    );
    let h = harness(ai, HarnessOpts::default()).await;
    let (msg, job_id) = enqueue_message(&h.store, MessageRole::User, "leave me alone").await;

    h.worker.run_batch().await.unwrap();

    let job = h.store.job(job_id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert!(job
        .error_message
        .unwrap()
        .contains("self_harm_risk_score"));
    assert_eq!(h.store.count_records_for_message(msg).await.unwrap(), 0);
    assert_eq!(h.notifier.attempts(), 0);
}

#[tokio::test]
async fn classifier_backend_error_fails_safe_to_skip() {
    let ai = StubAi::risky(0.9, 0.9).respond(
        AiTask::Classify,
        Err(AiError::Transport("connection reset".into())),
    );
    let h = harness(ai, HarnessOpts::default()).await;
    let (_, job_id) = enqueue_message(&h.store, MessageRole::User, "bad day").await;

    h.worker.run_batch().await.unwrap();

    let job = h.store.job(job_id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.note.as_deref(), Some(NOTE_NOT_RISKY));
    assert_eq!(h.ai.calls(AiTask::Score), 0);
}

#[tokio::test]
async fn assistant_messages_are_not_analyzed() {
    let h = harness(StubAi::risky(0.9, 0.9), HarnessOpts::default()).await;
    let (_, job_id) = enqueue_message(&h.store, MessageRole::Ai, "I'm here for you").await;

    h.worker.run_batch().await.unwrap();

    let job = h.store.job(job_id).await.unwrap().unwrap();
    assert_eq!(job.note.as_deref(), Some(NOTE_NOT_USER));
    assert_eq!(h.ai.calls(AiTask::Classify), 0);
}

#[tokio::test]
async fn missing_source_message_fails_the_job() {
    let h = harness(StubAi::risky(0.9, 0.9), HarnessOpts::default()).await;
    let job = h.store.enqueue(9_999).await.unwrap();

    h.worker.run_batch().await.unwrap();

    let job = h.store.job(job.id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert!(job.error_message.unwrap().contains("not found"));
}

#[tokio::test]
async fn topics_are_counted_for_every_analyzed_message() {
    let h = harness(StubAi::risky(0.1, 0.1), HarnessOpts::default()).await;
    enqueue_message(&h.store, MessageRole::User, "school was hard").await;
    enqueue_message(&h.store, MessageRole::User, "school again").await;

    h.worker.run_batch().await.unwrap();

    let topics = h.store.top_topics("c1", 10).await.unwrap();
    let school = topics.iter().find(|t| t.topic == "school").unwrap();
    assert_eq!(school.mention_count, 2);
    assert!(topics.iter().any(|t| t.topic == "friends"));
    assert_eq!(h.notifier.attempts(), 0, "below threshold");
}

#[tokio::test]
async fn delivery_failure_is_logged_not_fatal() {
    let h = harness(
        StubAi::risky(0.9, 0.9),
        HarnessOpts {
            notifier: RecordingNotifier::failing(),
            ..Default::default()
        },
    )
    .await;
    let (msg, job_id) = enqueue_message(&h.store, MessageRole::User, "i can't do this").await;

    h.worker.run_batch().await.unwrap();

    assert_eq!(
        h.store.job(job_id).await.unwrap().unwrap().status,
        JobStatus::Completed
    );
    assert_eq!(h.store.count_records_for_message(msg).await.unwrap(), 1);
    assert_eq!(h.notifier.attempts(), 1);
}

#[tokio::test]
async fn batch_is_bounded_and_drains_over_invocations() {
    let h = harness(StubAi::benign(), HarnessOpts::default()).await;
    for i in 0..7 {
        enqueue_message(&h.store, MessageRole::User, &format!("hello {i}")).await;
    }

    let first = h.worker.run_batch().await.unwrap();
    assert_eq!(first.processed, 5);
    let second = h.worker.run_batch().await.unwrap();
    assert_eq!(second.processed, 2);
    assert_eq!(h.worker.run_batch().await.unwrap(), BatchSummary::default());
}

#[tokio::test]
async fn overlapping_invocations_process_each_job_once() {
    let h = harness(StubAi::risky(0.9, 0.9), HarnessOpts::default()).await;
    for i in 0..3 {
        enqueue_message(&h.store, MessageRole::User, &format!("help {i}")).await;
    }
    let jobs = h.store.fetch_pending(5).await.unwrap();

    // two invocations that fetched the same pending set
    let (a, b) = tokio::join!(
        futures::future::join_all(jobs.iter().cloned().map(|j| h.worker.process_job(j))),
        futures::future::join_all(jobs.iter().cloned().map(|j| h.worker.process_job(j))),
    );
    let contended = a
        .iter()
        .chain(b.iter())
        .filter(|o| **o == JobOutcome::Contended)
        .count();
    assert_eq!(contended, 3);
    assert_eq!(h.ai.calls(AiTask::Score), 3);
}

#[tokio::test]
async fn reanalysis_of_the_same_message_does_not_alert_twice() {
    let h = harness(StubAi::risky(0.9, 0.9), HarnessOpts::default()).await;
    let (msg, _) = enqueue_message(&h.store, MessageRole::User, "please help").await;
    h.store.enqueue(msg).await.unwrap();

    let summary = h.worker.run_batch().await.unwrap();
    assert_eq!(summary.completed, 2);
    assert_eq!(h.store.count_records_for_message(msg).await.unwrap(), 1);
    assert_eq!(h.notifier.sent().len(), 1);
}

#[tokio::test]
async fn topics_of_a_reanalyzed_message_are_counted_once() {
    let h = harness(StubAi::risky(0.1, 0.1), HarnessOpts::default()).await;
    let (msg, _) = enqueue_message(&h.store, MessageRole::User, "school was hard").await;
    h.worker.run_batch().await.unwrap();

    h.store.enqueue(msg).await.unwrap();
    h.worker.run_batch().await.unwrap();

    let topics = h.store.top_topics("c1", 10).await.unwrap();
    let school = topics.iter().find(|t| t.topic == "school").unwrap();
    assert_eq!(school.mention_count, 1);
}

#[tokio::test]
async fn rerun_after_save_without_dispatch_still_alerts_once() {
    let h = harness(StubAi::risky(0.95, 0.9), HarnessOpts::default()).await;
    let msg = h
        .store
        .insert_message("c1", MessageRole::User, "i want to disappear")
        .await
        .unwrap();
    // an earlier run stored the record, then died before alerting
    h.store
        .save(&RiskScoreRecord {
            child_id: "c1".into(),
            conversation_id: msg,
            scores: RiskScores {
                depression_score: 0.7,
                anxiety_score: 0.6,
                self_harm_risk_score: 0.95,
                isolation_score: 0.5,
                urgency_score: 0.9,
            },
            is_alert_triggered: true,
            analyzed_at: chrono::Utc::now(),
        })
        .await
        .unwrap();

    let job = h.store.enqueue(msg).await.unwrap();
    let outcome = h.worker.process_job(job).await;
    assert_eq!(
        outcome,
        JobOutcome::Completed {
            alert: Some(AlertOutcome::Sent)
        }
    );
    assert_eq!(h.notifier.sent().len(), 1);
    assert!(h.store.pending_alert("c1", msg).await.unwrap().is_none());

    let again = h.store.enqueue(msg).await.unwrap();
    assert_eq!(
        h.worker.process_job(again).await,
        JobOutcome::Completed { alert: None }
    );
    assert_eq!(h.notifier.sent().len(), 1);
}
