use std::sync::{Arc, Mutex};
use std::time::Duration;

use secrecy::SecretString;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use provagent::app::options::AppOptions;
use provagent::app::run::run_with_broker;
use provagent::storage::layout::StorageLayout;
use provagent::utils::CooldownOptions;
use provagent::workers::job_runner;
use provisioning_common::broker::MemoryBroker;
use provisioning_common::models::job::{Job, ResultStatus};
use provisioning_common::protocol::JobQueue;

use crate::support::{self, Fixture, SECRET};

fn options() -> job_runner::Options {
    job_runner::Options {
        agent_id: "agent-001".to_string(),
        poll_timeout: Duration::from_millis(100),
        ..Default::default()
    }
}

fn spawn_runner<S, F>(
    fixture: &Fixture,
    options: job_runner::Options,
    sleep_fn: S,
) -> (oneshot::Sender<()>, JoinHandle<()>)
where
    S: Fn(Duration) -> F + Send + 'static,
    F: std::future::Future<Output = ()> + Send,
{
    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    let executor = fixture.executor.clone();
    let handle = tokio::spawn(async move {
        job_runner::run(
            &options,
            executor.as_ref(),
            sleep_fn,
            Box::pin(async move {
                let _ = shutdown_rx.await;
            }),
        )
        .await;
    });
    (shutdown_tx, handle)
}

fn parse_time(text: &str) -> chrono::DateTime<chrono::FixedOffset> {
    chrono::DateTime::parse_from_rfc3339(text).unwrap()
}

#[tokio::test]
async fn test_jobs_run_in_fifo_order_without_overlap() {
    let fixture = Fixture::new().await;
    let first = fixture.job("hello", &[("greeting", "first")]);
    let second = fixture.job("hello", &[("greeting", "second")]);
    fixture.queue.enqueue(&first).await.unwrap();
    fixture.queue.enqueue(&second).await.unwrap();

    let (shutdown_tx, handle) = spawn_runner(&fixture, options(), tokio::time::sleep);

    let a = fixture
        .await_result(&first.job_id, Duration::from_secs(10))
        .await
        .unwrap();
    let b = fixture
        .await_result(&second.job_id, Duration::from_secs(10))
        .await
        .unwrap();

    assert!(a.output.contains("hello first"));
    assert!(b.output.contains("hello second"));
    assert!(parse_time(&a.completed_at) <= parse_time(&b.started_at));

    shutdown_tx.send(()).unwrap();
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn test_duplicate_entries_run_twice() {
    let fixture = Fixture::new().await;
    let job = fixture.job("hello", &[("greeting", "again")]);
    fixture.queue.enqueue(&job).await.unwrap();
    fixture.queue.enqueue(&job).await.unwrap();

    let (shutdown_tx, handle) = spawn_runner(&fixture, options(), tokio::time::sleep);

    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    let log = fixture.log_path(&job.job_id);
    loop {
        let text = std::fs::read_to_string(&log).unwrap_or_default();
        if text.matches("hello again").count() == 2 {
            break;
        }
        assert!(tokio::time::Instant::now() < deadline, "second run never happened");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    shutdown_tx.send(()).unwrap();
    handle.await.unwrap();
}

#[tokio::test]
async fn test_backs_off_while_broker_unavailable_then_recovers() {
    let fixture = Fixture::new().await;
    fixture.broker.set_available(false);

    let waits: Arc<Mutex<Vec<Duration>>> = Arc::new(Mutex::new(Vec::new()));
    let recorded = waits.clone();
    let sleep_fn = move |wait: Duration| {
        recorded.lock().unwrap().push(wait);
        tokio::time::sleep(Duration::from_millis(5))
    };
    let mut opts = options();
    opts.cooldown = CooldownOptions {
        base_delay: Duration::from_secs(1),
        max_delay: Duration::from_secs(4),
        multiplier: 2.0,
    };
    let (shutdown_tx, handle) = spawn_runner(&fixture, opts, sleep_fn);

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while waits.lock().unwrap().len() < 4 {
        assert!(tokio::time::Instant::now() < deadline, "no backoff observed");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    let observed: Vec<Duration> = waits.lock().unwrap().iter().take(4).copied().collect();
    assert_eq!(
        observed,
        vec![
            Duration::from_secs(1),
            Duration::from_secs(2),
            Duration::from_secs(4),
            Duration::from_secs(4),
        ]
    );

    fixture.broker.set_available(true);
    let job = fixture.job("hello", &[("greeting", "back")]);
    fixture.queue.enqueue(&job).await.unwrap();

    let result = fixture
        .await_result(&job.job_id, Duration::from_secs(10))
        .await
        .unwrap();
    assert_eq!(result.status, ResultStatus::Success);

    shutdown_tx.send(()).unwrap();
    handle.await.unwrap();
}

#[tokio::test]
async fn test_shutdown_while_idle() {
    let fixture = Fixture::new().await;
    let (shutdown_tx, handle) = spawn_runner(&fixture, options(), tokio::time::sleep);

    tokio::time::sleep(Duration::from_millis(150)).await;
    shutdown_tx.send(()).unwrap();

    tokio_test::assert_ok!(tokio::time::timeout(Duration::from_secs(2), handle).await);
}

#[tokio::test]
async fn test_shutdown_stops_running_job_and_reports_it() {
    let fixture = Fixture::new().await;
    let job = fixture.job("slow", &[]);
    fixture.queue.enqueue(&job).await.unwrap();

    let (shutdown_tx, handle) = spawn_runner(&fixture, options(), tokio::time::sleep);

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !fixture.queue.is_running(&job.job_id).await.unwrap() {
        assert!(tokio::time::Instant::now() < deadline, "job never started");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    tokio::time::sleep(Duration::from_millis(200)).await;
    shutdown_tx.send(()).unwrap();

    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .unwrap()
        .unwrap();

    let result = fixture.queue.result(&job.job_id).await.unwrap().unwrap();
    assert_eq!(result.status, ResultStatus::Failed);
    assert_eq!(
        result.error.as_deref(),
        Some("Execution failed: cancelled by agent shutdown")
    );
}

#[tokio::test]
async fn test_agent_runs_end_to_end() {
    let fixture = Fixture::new().await;
    let broker = Arc::new(MemoryBroker::new());
    let queue = JobQueue::new(broker.clone());

    let options = AppOptions {
        secret: SecretString::from(SECRET.to_string()),
        storage: StorageLayout::new(
            fixture.tmp.path().join("installers"),
            fixture.tmp.path().join("agent-logs"),
        ),
        job_runner: options(),
        ..Default::default()
    };

    let job = support::signer(SECRET)
        .seal(Job::new(
            "hello",
            support::inputs(&[("greeting", "agent")]),
            "agent-001",
            "alice",
        ))
        .unwrap();
    queue.enqueue(&job).await.unwrap();

    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    let agent = tokio::spawn(run_with_broker(
        "test".to_string(),
        options,
        broker,
        async move {
            let _ = shutdown_rx.await;
        },
    ));

    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    let result = loop {
        if let Some(result) = queue.result(&job.job_id).await.unwrap() {
            break result;
        }
        assert!(tokio::time::Instant::now() < deadline, "no result published");
        tokio::time::sleep(Duration::from_millis(20)).await;
    };
    assert_eq!(result.status, ResultStatus::Success);
    assert!(result.output.contains("hello agent"));
    assert!(fixture
        .tmp
        .path()
        .join("agent-logs")
        .join(format!("{}.log", job.job_id))
        .exists());

    shutdown_tx.send(()).unwrap();
    tokio_test::assert_ok!(agent.await.unwrap());
}

#[tokio::test]
async fn test_agent_refuses_to_start_without_secret() {
    let tmp = tempfile::tempdir().unwrap();
    let options = AppOptions {
        storage: StorageLayout::new(tmp.path().join("installers"), tmp.path().join("logs")),
        ..Default::default()
    };

    let result = run_with_broker(
        "test".to_string(),
        options,
        Arc::new(MemoryBroker::new()),
        std::future::pending::<()>(),
    )
    .await;
    tokio_test::assert_err!(result);
}
