//! Provisioning Panel - Entry Point
//!
//! Command-line driver for the job manager:
//!
//! ```text
//! provpanel --apps [--query=..] [--category=..] [--tags=a,b]
//! provpanel --install --app=<id> --server=<id> [--user=<id>] [--input.<name>=<value>..] [--wait=<secs>]
//! provpanel --status=<job_id>
//! provpanel --watch=<job_id> [--timeout=<secs>]
//! provpanel --jobs [--user=<id>] [--server=<id>]
//! provpanel --installed --server=<id>
//! provpanel --uninstall=<app_id> --server=<id>
//! ```
//!
//! Every command prints JSON on stdout.

use std::collections::{BTreeMap, HashMap};
use std::env;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context};
use serde_json::json;
use tracing::error;
use tracing_subscriber::{fmt, EnvFilter};

use provisioning_common::broker::RedisBroker;
use provisioning_common::codec::JobSigner;
use provisioning_common::filesys::dir::Dir;
use provisioning_common::protocol::JobQueue;
use provisioning_common::registry::ManifestRegistry;
use provpanel::config::PanelConfig;
use provpanel::errors::PanelError;
use provpanel::job_manager::JobManager;

const INPUT_PREFIX: &str = "input.";
const DEFAULT_WATCH_SECS: u64 = 60;

#[tokio::main]
async fn main() {
    let mut cli_args: HashMap<String, String> = HashMap::new();
    let mut inputs: BTreeMap<String, String> = BTreeMap::new();

    for arg in env::args().skip(1) {
        if let Some((key, value)) = arg.split_once('=') {
            let clean_key = key.trim_start_matches('-');
            match clean_key.strip_prefix(INPUT_PREFIX) {
                Some(name) => {
                    inputs.insert(name.to_string(), value.to_string());
                }
                None => {
                    cli_args.insert(clean_key.to_string(), value.to_string());
                }
            }
        } else if arg.starts_with("--") {
            cli_args.insert(arg.trim_start_matches('-').to_string(), "true".to_string());
        }
    }

    let config = match PanelConfig::from_env(|key| env::var(key).ok()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Refusing to start: {}", e);
            std::process::exit(2);
        }
    };

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.as_str()));
    fmt().with_env_filter(filter).with_writer(std::io::stderr).init();

    match run(&config, &cli_args, inputs).await {
        Ok(output) => println!("{}", output),
        Err(e) => {
            error!("{:#}", e);
            std::process::exit(1);
        }
    }
}

async fn run(
    config: &PanelConfig,
    args: &HashMap<String, String>,
    inputs: BTreeMap<String, String>,
) -> anyhow::Result<String> {
    let registry = Arc::new(ManifestRegistry::load(Dir::new(&config.installers_path)).await?);
    let broker = Arc::new(RedisBroker::open(&config.redis_url)?);
    let signer = Arc::new(JobSigner::new(config.secret.clone())?);
    let manager = JobManager::new(JobQueue::new(broker), signer, registry);

    let arg = |name: &str| args.get(name).map(String::as_str);

    let value = if args.contains_key("apps") {
        let tags: Vec<String> = arg("tags")
            .map(|t| t.split(',').map(|s| s.trim().to_string()).collect())
            .unwrap_or_default();
        let apps = manager.registry().search(arg("query"), arg("category"), &tags);
        json!({ "count": apps.len(), "apps": apps })
    } else if args.contains_key("install") {
        let app_id = arg("app").ok_or_else(|| anyhow!("--app is required"))?;
        let server_id = arg("server").ok_or_else(|| anyhow!("--server is required"))?;
        let job = match manager.create_job(app_id, inputs, server_id, arg("user")).await {
            Ok(job) => job,
            Err(PanelError::ValidationFailed(errors)) => {
                return Ok(json!({ "error": "Input validation failed", "errors": errors })
                    .to_string())
            }
            Err(e) => return Err(e.into()),
        };
        match arg("wait") {
            Some(secs) => {
                let secs: u64 = secs.parse().context("--wait must be a number of seconds")?;
                let result = manager
                    .wait_for_result(&job.job_id, Duration::from_secs(secs))
                    .await?;
                json!({ "job_id": job.job_id, "result": result })
            }
            None => json!({ "job_id": job.job_id, "message": "Installation job created" }),
        }
    } else if let Some(job_id) = arg("status") {
        let job = manager
            .get_job(job_id)
            .await?
            .ok_or_else(|| anyhow!("Job not found: {}", job_id))?;
        json!({
            "job": job,
            "state": manager.job_state(job_id).await?,
            "result": manager.get_result(job_id).await?,
        })
    } else if let Some(job_id) = arg("watch") {
        let secs = match arg("timeout") {
            Some(secs) => secs.parse().context("--timeout must be a number of seconds")?,
            None => DEFAULT_WATCH_SECS,
        };
        let result = manager
            .wait_for_result(job_id, Duration::from_secs(secs))
            .await?;
        json!({ "job_id": job_id, "result": result })
    } else if args.contains_key("jobs") {
        let jobs = manager.list_jobs(arg("user"), arg("server")).await?;
        json!({ "count": jobs.len(), "jobs": jobs })
    } else if args.contains_key("installed") {
        let server_id = arg("server").ok_or_else(|| anyhow!("--server is required"))?;
        let apps = manager.installed().list_installed(server_id).await?;
        json!({ "count": apps.len(), "apps": apps })
    } else if let Some(app_id) = arg("uninstall") {
        let server_id = arg("server").ok_or_else(|| anyhow!("--server is required"))?;
        if !manager.installed().uninstall(app_id, server_id).await? {
            return Err(anyhow!("Application not installed: {}", app_id));
        }
        json!({ "message": format!("Application {} uninstalled", app_id) })
    } else {
        return Err(anyhow!(
            "no command given; use --apps, --install, --status, --watch, --jobs, --installed or --uninstall"
        ));
    };

    Ok(serde_json::to_string_pretty(&value)?)
}
