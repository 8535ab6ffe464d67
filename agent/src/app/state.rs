//! Application state management

use std::sync::Arc;

use tracing::info;

use provisioning_common::broker::Broker;
use provisioning_common::codec::JobSigner;
use provisioning_common::protocol::JobQueue;
use provisioning_common::registry::ManifestRegistry;

use crate::app::options::AppOptions;
use crate::errors::AgentError;
use crate::executor::Executor;
use crate::host::HostProfile;
use crate::sandbox::Sandbox;

/// Main application state
pub struct AppState {
    /// Whitelisted installers, loaded once at startup
    pub registry: Arc<ManifestRegistry>,

    /// Job executor shared with the job runner
    pub executor: Arc<Executor>,
}

impl AppState {
    /// Initialize application state
    pub async fn init(options: &AppOptions, broker: Arc<dyn Broker>) -> Result<Self, AgentError> {
        info!("Initializing application state...");

        let signer = Arc::new(JobSigner::new(options.secret.clone())?);

        options.storage.setup().await?;
        let registry = Arc::new(ManifestRegistry::load(options.storage.installers_dir()).await?);
        let ids: Vec<&str> = registry.list().iter().map(|m| m.id.as_str()).collect();
        info!("Whitelisted installers: [{}]", ids.join(", "));

        let installers_dir = options.storage.installers_dir.clone();
        let host = tokio::task::spawn_blocking(move || HostProfile::collect(&installers_dir))
            .await
            .map_err(|e| AgentError::Internal(format!("host probe failed: {}", e)))?;
        info!(
            "Host {}: {} {}, {} MB RAM, {} cores",
            host.hostname,
            host.distribution,
            host.os_version.as_deref().unwrap_or("?"),
            host.total_ram_mb,
            host.cpu_cores
        );

        let sandbox = Sandbox::new(options.sandbox.clone(), options.storage.logs_dir());
        let executor = Arc::new(Executor::new(
            JobQueue::new(broker),
            signer,
            registry.clone(),
            sandbox,
            host,
        ));

        Ok(Self { registry, executor })
    }
}
