use std::time::Duration;

use futures::StreamExt;

use provisioning_common::models::job::{Job, JobStatus, ResultStatus};

use crate::support::{signer, Fixture};

fn never() -> std::future::Pending<()> {
    std::future::pending()
}

fn raw(job: &Job) -> String {
    serde_json::to_string(job).unwrap()
}

#[tokio::test]
async fn test_successful_install() {
    let fixture = Fixture::new().await;
    let job = fixture.job("hello", &[("greeting", "world"), ("port", "8080")]);

    let result = fixture
        .executor
        .process_entry(&raw(&job), never())
        .await
        .unwrap();

    assert_eq!(result.job_id, job.job_id);
    assert_eq!(result.status, ResultStatus::Success);
    assert_eq!(result.exit_code, 0);
    assert_eq!(result.error, None);
    assert!(result.output.contains("hello world"));
    assert!(result.output.contains("port=8080"));
    assert!(result.output.contains(&format!("job={}", job.job_id)));
    assert!(result.started_at <= result.completed_at);
    assert!(fixture.log_path(&job.job_id).exists());
}

#[tokio::test]
async fn test_handle_entry_publishes_result() {
    let fixture = Fixture::new().await;
    let job = fixture.job("hello", &[("greeting", "world")]);
    let mut updates = fixture.queue.updates(&job.job_id).await.unwrap();

    fixture.executor.handle_entry(&raw(&job), never()).await;

    let stored = fixture.queue.result(&job.job_id).await.unwrap().unwrap();
    assert_eq!(stored.status, ResultStatus::Success);
    assert_eq!(
        fixture.queue.state(&job.job_id).await.unwrap(),
        Some(JobStatus::Success)
    );

    let broadcast = tokio::time::timeout(Duration::from_secs(1), updates.next())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(broadcast, stored);
}

#[tokio::test]
async fn test_nonzero_exit_fails_job() {
    let fixture = Fixture::new().await;
    let job = fixture.job("failing", &[]);

    let result = fixture.executor.execute(&job, never()).await;

    assert_eq!(result.status, ResultStatus::Failed);
    assert_eq!(JobStatus::from(result.status), JobStatus::Failed);
    assert_eq!(result.exit_code, 3);
    assert!(result.output.contains("about to fail"));
    assert!(result.output.contains("oops"));
    assert_eq!(
        result.error.as_deref(),
        Some("Execution failed: script exited with code 3")
    );
}

#[tokio::test]
async fn test_bad_signature_never_runs_script() {
    let fixture = Fixture::new().await;
    let forged = signer("some-other-secret")
        .seal(Job::new(
            "hello",
            crate::support::inputs(&[("greeting", "world")]),
            "agent-001",
            "mallory",
        ))
        .unwrap();

    let result = fixture.executor.execute(&forged, never()).await;

    assert_eq!(result.status, ResultStatus::Failed);
    assert_eq!(result.exit_code, 1);
    assert_eq!(result.error.as_deref(), Some("Invalid job signature"));
    assert!(result.output.is_empty());
    assert!(!fixture.log_path(&forged.job_id).exists());
}

#[tokio::test]
async fn test_forged_job_is_never_marked_running() {
    let fixture = Fixture::new().await;
    let forged = signer("some-other-secret")
        .seal(Job::new(
            "hello",
            crate::support::inputs(&[("greeting", "world")]),
            "agent-001",
            "mallory",
        ))
        .unwrap();

    let result = fixture
        .executor
        .process_entry(&raw(&forged), never())
        .await
        .unwrap();

    assert_eq!(result.error.as_deref(), Some("Invalid job signature"));
    assert_eq!(fixture.queue.state(&forged.job_id).await.unwrap(), None);
}

#[tokio::test]
async fn test_tampered_inputs_fail_verification() {
    let fixture = Fixture::new().await;
    let mut job = fixture.job("hello", &[("greeting", "world")]);
    job.inputs
        .insert("greeting".to_string(), "$(rm -rf /)".to_string());

    let result = fixture.executor.execute(&job, never()).await;
    assert_eq!(result.error.as_deref(), Some("Invalid job signature"));
}

#[tokio::test]
async fn test_unknown_app_rejected_before_validation() {
    let fixture = Fixture::new().await;
    // inputs that would also fail validation; the whitelist check comes first
    let job = fixture.job("ghost", &[("port", "not-a-port")]);

    let result = fixture.executor.execute(&job, never()).await;
    assert_eq!(result.status, ResultStatus::Failed);
    assert_eq!(
        result.error.as_deref(),
        Some("Installer not whitelisted: ghost")
    );
}

#[tokio::test]
async fn test_path_like_app_id_not_whitelisted() {
    let fixture = Fixture::new().await;
    let job = fixture.job("../hello", &[("greeting", "world")]);

    let result = fixture.executor.execute(&job, never()).await;
    assert_eq!(
        result.error.as_deref(),
        Some("Installer not whitelisted: ../hello")
    );
}

#[tokio::test]
async fn test_validation_failure_reports_every_error() {
    let fixture = Fixture::new().await;
    let job = fixture.job("hello", &[("port", "99999")]);

    let result = fixture.executor.execute(&job, never()).await;

    assert_eq!(result.status, ResultStatus::Failed);
    let error = result.error.unwrap();
    assert!(error.starts_with("Input validation failed: "), "{}", error);
    assert!(error.contains("Greeting is required"));
    assert!(error.contains("Port must be between 1 and 65535"));
    assert!(!fixture.log_path(&job.job_id).exists());
}

#[tokio::test]
async fn test_missing_script_fails_job() {
    let fixture = Fixture::new().await;
    let job = fixture.job("scriptless", &[]);

    let result = fixture.executor.execute(&job, never()).await;

    assert_eq!(result.status, ResultStatus::Failed);
    let error = result.error.unwrap();
    assert!(error.starts_with("Install script not found"), "{}", error);
}

#[tokio::test]
async fn test_cancelled_job_fails() {
    let fixture = Fixture::new().await;
    let job = fixture.job("slow", &[]);

    let result = fixture
        .executor
        .execute(&job, tokio::time::sleep(Duration::from_millis(300)))
        .await;

    assert_eq!(result.status, ResultStatus::Failed);
    assert!(result.output.contains("slow started"));
    assert!(!result.output.contains("slow finished"));
    assert_eq!(
        result.error.as_deref(),
        Some("Execution failed: cancelled by agent shutdown")
    );
}

#[tokio::test]
async fn test_malformed_entry_with_job_id_gets_result() {
    let fixture = Fixture::new().await;
    let raw = r#"{"job_id": "abc-123", "app_id": 42}"#;

    let result = fixture
        .executor
        .process_entry(raw, never())
        .await
        .unwrap();

    assert_eq!(result.job_id, "abc-123");
    assert_eq!(result.status, ResultStatus::Failed);
    assert!(result
        .error
        .unwrap()
        .starts_with("Malformed job payload: "));
}

#[tokio::test]
async fn test_malformed_entry_without_job_id_is_dropped() {
    let fixture = Fixture::new().await;

    assert!(fixture
        .executor
        .process_entry("not json at all", never())
        .await
        .is_none());
    assert!(fixture
        .executor
        .process_entry(r#"{"job_id": "../../etc", "app_id": 1}"#, never())
        .await
        .is_none());
}

#[tokio::test]
async fn test_stale_job_is_discarded_without_result() {
    let fixture = Fixture::new().await;
    let mut job = Job::new(
        "hello",
        crate::support::inputs(&[("greeting", "world")]),
        "agent-001",
        "alice",
    );
    job.created_at = (chrono::Utc::now() - chrono::Duration::days(2)).to_rfc3339();
    let job = fixture.signer.seal(job).unwrap();

    fixture.executor.handle_entry(&raw(&job), never()).await;

    assert!(fixture.queue.result(&job.job_id).await.unwrap().is_none());
    assert!(!fixture.queue.is_running(&job.job_id).await.unwrap());
    assert!(!fixture.log_path(&job.job_id).exists());
}

#[tokio::test]
async fn test_publish_failure_does_not_panic() {
    let fixture = Fixture::new().await;
    let job = fixture.job("hello", &[("greeting", "world")]);

    fixture.broker.set_available(false);
    fixture.executor.handle_entry(&raw(&job), never()).await;
    fixture.broker.set_available(true);

    // the script ran but its result was lost with the broker
    assert!(fixture.log_path(&job.job_id).exists());
    assert!(fixture.queue.result(&job.job_id).await.unwrap().is_none());
}
