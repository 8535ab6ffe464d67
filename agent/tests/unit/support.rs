//! Shared fixtures

use std::collections::BTreeMap;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use secrecy::SecretString;
use tempfile::TempDir;

use provagent::executor::Executor;
use provagent::host::HostProfile;
use provagent::sandbox::{self, Sandbox};
use provisioning_common::broker::MemoryBroker;
use provisioning_common::codec::JobSigner;
use provisioning_common::filesys::dir::Dir;
use provisioning_common::models::job::{Job, JobResult};
use provisioning_common::protocol::JobQueue;
use provisioning_common::registry::ManifestRegistry;

pub const SECRET: &str = "test-secret";

pub const HELLO_MANIFEST: &str = r#"
id: hello
name: Hello
version: "1.0"
description: Prints a greeting
category: demo
timeout_seconds: 60
inputs:
  - name: greeting
    type: string
    label: Greeting
    validation:
      min_length: 2
  - name: port
    type: port
    label: Port
    required: false
  - name: admin_password
    type: password
    label: Admin Password
    required: false
"#;

pub const HELLO_SCRIPT: &str = r#"#!/bin/bash
echo "hello $GREETING"
echo "port=${PORT:-none}"
echo "job=$PROVISIONING_JOB_ID"
"#;

pub const FAILING_MANIFEST: &str = r#"
id: failing
name: Failing
version: "1.0"
description: Always fails
category: demo
"#;

pub const FAILING_SCRIPT: &str = r#"#!/bin/bash
echo "about to fail"
echo "oops" >&2
exit 3
"#;

/// Manifest whose script is never written
pub const SCRIPTLESS_MANIFEST: &str = r#"
id: scriptless
name: Scriptless
version: "1.0"
description: Has no install script on disk
category: demo
"#;

pub const SLOW_MANIFEST: &str = r#"
id: slow
name: Slow
version: "1.0"
description: Runs until stopped
category: demo
"#;

pub const SLOW_SCRIPT: &str = r#"#!/bin/bash
echo "slow started"
sleep 30
echo "slow finished"
"#;

pub fn host() -> HostProfile {
    HostProfile {
        distribution: "ubuntu".to_string(),
        os_version: Some("22.04".to_string()),
        total_ram_mb: 4096,
        available_disk_mb: Some(10_000),
        cpu_cores: 4,
        hostname: "test-host".to_string(),
    }
}

pub fn signer(secret: &str) -> JobSigner {
    JobSigner::new(SecretString::from(secret.to_string())).unwrap()
}

pub fn inputs(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

/// Write an executable script at `path`
pub fn write_script(path: &Path, body: &str) {
    std::fs::write(path, body).unwrap();
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755)).unwrap();
}

/// Installers root, log dir, in-memory broker and an executor over them
pub struct Fixture {
    pub tmp: TempDir,
    pub broker: Arc<MemoryBroker>,
    pub queue: JobQueue,
    pub signer: Arc<JobSigner>,
    pub executor: Arc<Executor>,
}

impl Fixture {
    pub async fn new() -> Self {
        let tmp = tempfile::tempdir().unwrap();
        let installers = tmp.path().join("installers");

        install(&installers, "hello", HELLO_MANIFEST, Some(HELLO_SCRIPT));
        install(&installers, "failing", FAILING_MANIFEST, Some(FAILING_SCRIPT));
        install(&installers, "scriptless", SCRIPTLESS_MANIFEST, None);
        install(&installers, "slow", SLOW_MANIFEST, Some(SLOW_SCRIPT));

        let registry = Arc::new(ManifestRegistry::load(Dir::new(&installers)).await.unwrap());
        let broker = Arc::new(MemoryBroker::new());
        let queue = JobQueue::new(broker.clone());
        let signer = Arc::new(signer(SECRET));
        let sandbox = Sandbox::new(
            sandbox::Options {
                grace_period: Duration::from_secs(1),
                ..Default::default()
            },
            Dir::new(tmp.path().join("logs")),
        );
        let executor = Arc::new(Executor::new(
            queue.clone(),
            signer.clone(),
            registry,
            sandbox,
            host(),
        ));

        Self {
            tmp,
            broker,
            queue,
            signer,
            executor,
        }
    }

    /// A job for `app_id` sealed with the shared secret
    pub fn job(&self, app_id: &str, pairs: &[(&str, &str)]) -> Job {
        let job = Job::new(app_id, inputs(pairs), "agent-001", "alice");
        self.signer.seal(job).unwrap()
    }

    pub fn log_path(&self, job_id: &str) -> PathBuf {
        self.tmp.path().join("logs").join(format!("{}.log", job_id))
    }

    /// Wait up to `timeout` for the result of `job_id` to be stored
    pub async fn await_result(&self, job_id: &str, timeout: Duration) -> Option<JobResult> {
        let deadline = tokio::time::Instant::now() + timeout;
        while tokio::time::Instant::now() < deadline {
            if let Some(result) = self.queue.result(job_id).await.unwrap() {
                return Some(result);
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        None
    }
}

fn install(root: &Path, app_id: &str, manifest: &str, script: Option<&str>) {
    let dir = root.join(app_id);
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(dir.join("manifest.yml"), manifest).unwrap();
    if let Some(body) = script {
        write_script(&dir.join("install.sh"), body);
    }
}
