//! Installer environment
//!
//! The child starts from an empty environment. It receives a fixed base, one
//! variable per declared and supplied input (name upper-cased, value passed
//! verbatim, never through a shell), and the job metadata.

use std::collections::BTreeMap;

use tracing::{debug, warn};

use provisioning_common::models::job::Job;
use provisioning_common::models::manifest::Manifest;

pub const BASE_PATH: &str = "/usr/local/sbin:/usr/local/bin:/usr/sbin:/usr/bin:/sbin:/bin";

/// Names an input may never override
const RESERVED: &[&str] = &[
    "PATH",
    "HOME",
    "LANG",
    "PROVISIONING_JOB",
    "DEBIAN_FRONTEND",
    "PROVISIONING_JOB_ID",
    "PROVISIONING_APP_ID",
];

/// Build the complete environment for running `job` with `manifest`
pub fn build_env(manifest: &Manifest, job: &Job) -> BTreeMap<String, String> {
    let mut env = BTreeMap::from([
        ("PATH".to_string(), BASE_PATH.to_string()),
        ("HOME".to_string(), "/root".to_string()),
        ("LANG".to_string(), "C.UTF-8".to_string()),
    ]);

    for (name, value) in &job.inputs {
        if manifest.input(name).is_none() {
            debug!("Ignoring undeclared input '{}' for job {}", name, job.job_id);
            continue;
        }
        let var = name.to_uppercase();
        if RESERVED.contains(&var.as_str()) {
            warn!(
                "Input '{}' of job {} collides with reserved variable {}, dropping it",
                name, job.job_id, var
            );
            continue;
        }
        env.insert(var, value.clone());
    }

    env.insert("PROVISIONING_JOB".to_string(), "true".to_string());
    env.insert("DEBIAN_FRONTEND".to_string(), "noninteractive".to_string());
    env.insert("PROVISIONING_JOB_ID".to_string(), job.job_id.clone());
    env.insert("PROVISIONING_APP_ID".to_string(), job.app_id.clone());

    env
}
