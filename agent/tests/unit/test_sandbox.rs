use std::collections::BTreeMap;
use std::path::Path;
use std::time::{Duration, Instant};

use tempfile::TempDir;

use provagent::errors::AgentError;
use provagent::sandbox::{self, ExecutionRequest, Sandbox, Termination};
use provisioning_common::filesys::dir::Dir;

use crate::support::write_script;

fn sandbox(tmp: &TempDir) -> Sandbox {
    Sandbox::new(
        sandbox::Options {
            grace_period: Duration::from_secs(1),
            ..Default::default()
        },
        Dir::new(tmp.path().join("logs")),
    )
}

fn request(tmp: &TempDir, job_id: &str, body: &str, timeout: Duration) -> ExecutionRequest {
    let script = tmp.path().join(format!("{}.sh", job_id));
    write_script(&script, body);

    let mut env = BTreeMap::new();
    env.insert("PATH".to_string(), "/usr/bin:/bin".to_string());
    ExecutionRequest {
        job_id: job_id.to_string(),
        script,
        working_dir: tmp.path().to_path_buf(),
        env,
        timeout,
    }
}

fn never() -> std::future::Pending<()> {
    std::future::pending()
}

/// Whether `pid` is gone or only left as a zombie
fn is_dead(pid: i32) -> bool {
    match std::fs::read_to_string(format!("/proc/{}/stat", pid)) {
        Err(_) => true,
        Ok(stat) => stat
            .rsplit(')')
            .next()
            .map_or(false, |rest| rest.trim_start().starts_with('Z')),
    }
}

#[tokio::test]
async fn test_exit_code_propagates() {
    let tmp = tempfile::tempdir().unwrap();
    let req = request(&tmp, "exit-7", "echo partial\nexit 7\n", Duration::from_secs(10));

    let outcome = sandbox(&tmp).execute(req, never()).await.unwrap();
    assert_eq!(outcome.termination, Termination::Exited);
    assert_eq!(outcome.exit_code, 7);
    assert_eq!(outcome.output, "partial\n");
}

#[tokio::test]
async fn test_stdout_and_stderr_share_the_log() {
    let tmp = tempfile::tempdir().unwrap();
    let req = request(
        &tmp,
        "both-streams",
        "echo to-stdout\necho to-stderr >&2\n",
        Duration::from_secs(10),
    );

    let outcome = sandbox(&tmp).execute(req, never()).await.unwrap();
    assert_eq!(outcome.exit_code, 0);
    assert!(outcome.output.contains("to-stdout"));
    assert!(outcome.output.contains("to-stderr"));

    let log = std::fs::read_to_string(tmp.path().join("logs/both-streams.log")).unwrap();
    assert_eq!(log, outcome.output);
}

#[tokio::test]
async fn test_rerun_appends_to_log_but_reports_own_output() {
    let tmp = tempfile::tempdir().unwrap();
    let sandbox = sandbox(&tmp);

    let first = sandbox
        .execute(request(&tmp, "rerun", "echo first\n", Duration::from_secs(10)), never())
        .await
        .unwrap();
    let second = sandbox
        .execute(request(&tmp, "rerun", "echo second\n", Duration::from_secs(10)), never())
        .await
        .unwrap();

    assert_eq!(first.output, "first\n");
    assert_eq!(second.output, "second\n");
    let log = std::fs::read_to_string(tmp.path().join("logs/rerun.log")).unwrap();
    assert_eq!(log, "first\nsecond\n");
}

#[tokio::test]
async fn test_death_by_signal_reports_128_plus_signal() {
    let tmp = tempfile::tempdir().unwrap();
    let req = request(&tmp, "self-kill", "kill -KILL $$\n", Duration::from_secs(10));

    let outcome = sandbox(&tmp).execute(req, never()).await.unwrap();
    assert_eq!(outcome.termination, Termination::Exited);
    assert_eq!(outcome.exit_code, 128 + libc::SIGKILL);
}

#[tokio::test]
async fn test_environment_is_exactly_the_request_env() {
    let tmp = tempfile::tempdir().unwrap();
    let mut req = request(&tmp, "env-dump", "env\n", Duration::from_secs(10));
    req.env.insert("APP_PORT".to_string(), "8080".to_string());

    let outcome = sandbox(&tmp).execute(req, never()).await.unwrap();
    assert!(outcome.output.contains("APP_PORT=8080"));
    // cargo sets these for the test process; none may leak through
    assert!(!outcome.output.contains("CARGO_"));
}

#[tokio::test]
async fn test_stdin_is_closed() {
    let tmp = tempfile::tempdir().unwrap();
    let req = request(
        &tmp,
        "reads-stdin",
        "read line\necho \"read=$?\"\n",
        Duration::from_secs(10),
    );

    let outcome = sandbox(&tmp).execute(req, never()).await.unwrap();
    assert!(outcome.output.contains("read=1"));
}

#[tokio::test]
async fn test_runs_in_working_dir() {
    let tmp = tempfile::tempdir().unwrap();
    let req = request(&tmp, "pwd", "pwd\n", Duration::from_secs(10));

    let outcome = sandbox(&tmp).execute(req, never()).await.unwrap();
    let reported = Path::new(outcome.output.trim()).canonicalize().unwrap();
    assert_eq!(reported, tmp.path().canonicalize().unwrap());
}

#[tokio::test]
async fn test_timeout_escalates_to_kill() {
    let tmp = tempfile::tempdir().unwrap();
    let body = r#"
trap 'echo "caught TERM"' TERM
echo started
while true; do sleep 0.1; done
"#;
    let req = request(&tmp, "stubborn", body, Duration::from_secs(1));

    let started = Instant::now();
    let outcome = sandbox(&tmp).execute(req, never()).await.unwrap();
    let elapsed = started.elapsed();

    assert_eq!(outcome.termination, Termination::TimedOut);
    assert_eq!(outcome.exit_code, 124);
    assert!(outcome.output.contains("started"));
    assert!(outcome.output.contains("caught TERM"));
    // timeout plus the full grace period, since TERM was ignored
    assert!(elapsed >= Duration::from_secs(2), "{:?}", elapsed);
    assert!(elapsed < Duration::from_secs(10), "{:?}", elapsed);
}

#[tokio::test]
async fn test_timeout_reaches_background_children() {
    let tmp = tempfile::tempdir().unwrap();
    let pid_file = tmp.path().join("child.pid");
    let body = format!(
        "sleep 300 &\necho $! > {}\nwait\n",
        pid_file.display()
    );
    let req = request(&tmp, "forks", &body, Duration::from_secs(1));

    let outcome = sandbox(&tmp).execute(req, never()).await.unwrap();
    assert_eq!(outcome.termination, Termination::TimedOut);

    let pid: i32 = std::fs::read_to_string(&pid_file)
        .unwrap()
        .trim()
        .parse()
        .unwrap();
    let deadline = Instant::now() + Duration::from_secs(3);
    while !is_dead(pid) && Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert!(is_dead(pid), "background child {} survived", pid);
}

#[tokio::test]
async fn test_timeout_kills_child_that_outlives_the_leader() {
    let tmp = tempfile::tempdir().unwrap();
    let pid_file = tmp.path().join("stubborn.pid");
    let body = format!(
        "bash -c 'trap \"\" TERM; echo $$ > {}; exec sleep 300' &\nsleep 300\n",
        pid_file.display()
    );
    let req = request(&tmp, "outlives-leader", &body, Duration::from_secs(1));

    let outcome = sandbox(&tmp).execute(req, never()).await.unwrap();
    assert_eq!(outcome.termination, Termination::TimedOut);
    assert_eq!(outcome.exit_code, 124);

    let pid: i32 = std::fs::read_to_string(&pid_file)
        .unwrap()
        .trim()
        .parse()
        .unwrap();
    let deadline = Instant::now() + Duration::from_secs(3);
    while !is_dead(pid) && Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert!(is_dead(pid), "child {} ignoring TERM survived", pid);
}

#[tokio::test]
async fn test_cancel_stops_script() {
    let tmp = tempfile::tempdir().unwrap();
    let req = request(&tmp, "cancelled", "echo begin\nsleep 30\necho end\n", Duration::from_secs(60));

    let started = Instant::now();
    let outcome = sandbox(&tmp)
        .execute(req, tokio::time::sleep(Duration::from_millis(300)))
        .await
        .unwrap();

    assert_eq!(outcome.termination, Termination::Cancelled);
    assert_ne!(outcome.exit_code, 0);
    assert!(outcome.output.contains("begin"));
    assert!(!outcome.output.contains("end"));
    assert!(started.elapsed() < Duration::from_secs(10));
}

#[tokio::test]
async fn test_missing_script_is_an_error() {
    let tmp = tempfile::tempdir().unwrap();
    let mut req = request(&tmp, "missing", "true\n", Duration::from_secs(10));
    req.script = tmp.path().join("nope.sh");

    let err = sandbox(&tmp).execute(req, never()).await.unwrap_err();
    assert!(matches!(err, AgentError::ScriptMissing(_)));
    assert!(!tmp.path().join("logs/missing.log").exists());
}

#[tokio::test]
async fn test_unusable_job_id_is_an_error() {
    let tmp = tempfile::tempdir().unwrap();
    let mut req = request(&tmp, "fine", "true\n", Duration::from_secs(10));
    req.job_id = "../escape".to_string();

    tokio_test::assert_err!(sandbox(&tmp).execute(req, never()).await);
}
