//! Main application run loop

use std::future::Future;
use std::sync::Arc;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{error, info};

use provisioning_common::broker::{Broker, RedisBroker};

use crate::app::options::{AppOptions, LifecycleOptions};
use crate::app::state::AppState;
use crate::errors::AgentError;
use crate::executor::Executor;
use crate::workers::job_runner;

/// Run the provisioning agent against the configured Redis broker
pub async fn run(
    agent_version: String,
    options: AppOptions,
    shutdown_signal: impl Future<Output = ()> + Send + 'static,
) -> Result<(), AgentError> {
    let broker = Arc::new(RedisBroker::open(&options.redis_url)?);
    run_with_broker(agent_version, options, broker, shutdown_signal).await
}

/// Run the provisioning agent against `broker`
pub async fn run_with_broker(
    agent_version: String,
    options: AppOptions,
    broker: Arc<dyn Broker>,
    shutdown_signal: impl Future<Output = ()> + Send + 'static,
) -> Result<(), AgentError> {
    info!("Initializing provisioning agent {}...", agent_version);

    // Create shutdown channel
    let (shutdown_tx, _shutdown_rx): (broadcast::Sender<()>, _) = broadcast::channel(1);
    let mut shutdown_manager = ShutdownManager::new(shutdown_tx.clone(), options.lifecycle.clone());

    if let Err(e) = init(&options, broker, &shutdown_tx, &mut shutdown_manager).await {
        error!("Failed to start agent: {}", e);
        shutdown_manager.shutdown().await?;
        return Err(e);
    }

    shutdown_signal.await;
    info!("Shutdown signal received, shutting down...");

    drop(shutdown_tx);
    shutdown_manager.shutdown().await
}

// =============================== INITIALIZATION ================================== //

async fn init(
    options: &AppOptions,
    broker: Arc<dyn Broker>,
    shutdown_tx: &broadcast::Sender<()>,
    shutdown_manager: &mut ShutdownManager,
) -> Result<(), AgentError> {
    let app_state = AppState::init(options, broker).await?;
    if app_state.registry.list().is_empty() {
        error!(
            "No valid installers under {:?}; every job will be rejected",
            options.storage.installers_dir
        );
    }

    init_job_runner_worker(
        options.job_runner.clone(),
        app_state.executor.clone(),
        shutdown_manager,
        shutdown_tx.subscribe(),
    )
}

fn init_job_runner_worker(
    options: job_runner::Options,
    executor: Arc<Executor>,
    shutdown_manager: &mut ShutdownManager,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), AgentError> {
    info!("Initializing job runner worker...");

    let job_runner_handle = tokio::spawn(async move {
        job_runner::run(
            &options,
            executor.as_ref(),
            tokio::time::sleep,
            Box::pin(async move {
                let _ = shutdown_rx.recv().await;
            }),
        )
        .await;
    });

    shutdown_manager.with_job_runner_handle(job_runner_handle)?;
    Ok(())
}

// ================================= SHUTDOWN ===================================== //

struct ShutdownManager {
    shutdown_tx: broadcast::Sender<()>,
    lifecycle_options: LifecycleOptions,
    job_runner_handle: Option<JoinHandle<()>>,
}

impl ShutdownManager {
    pub fn new(shutdown_tx: broadcast::Sender<()>, lifecycle_options: LifecycleOptions) -> Self {
        Self {
            shutdown_tx,
            lifecycle_options,
            job_runner_handle: None,
        }
    }

    pub fn with_job_runner_handle(&mut self, handle: JoinHandle<()>) -> Result<(), AgentError> {
        if self.job_runner_handle.is_some() {
            return Err(AgentError::ShutdownError("job_runner_handle already set".to_string()));
        }
        self.job_runner_handle = Some(handle);
        Ok(())
    }

    pub async fn shutdown(&mut self) -> Result<(), AgentError> {
        let _ = self.shutdown_tx.send(());

        match tokio::time::timeout(
            self.lifecycle_options.max_shutdown_delay,
            self.shutdown_impl(),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => {
                error!(
                    "Shutdown timed out after {:?}, forcing shutdown...",
                    self.lifecycle_options.max_shutdown_delay
                );
                std::process::exit(1);
            }
        }
    }

    async fn shutdown_impl(&mut self) -> Result<(), AgentError> {
        info!("Shutting down provisioning agent...");

        // The job runner stops its in-flight installer and publishes
        // that job's result before it returns
        if let Some(handle) = self.job_runner_handle.take() {
            handle.await.map_err(|e| AgentError::ShutdownError(e.to_string()))?;
        }

        info!("Shutdown complete");
        Ok(())
    }
}
