//! Job runner worker
//!
//! The agent's single control loop: poll this agent's queue, run whatever
//! arrives, publish the result, poll again. Jobs never overlap; the next
//! poll starts only after the previous result has been published.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use futures::FutureExt;
use tracing::{debug, error, info};

use crate::executor::Executor;
use crate::utils::{calc_exp_backoff, CooldownOptions};

/// Job runner options
#[derive(Debug, Clone)]
pub struct Options {
    /// Identity whose queue is consumed
    pub agent_id: String,

    /// Upper bound for one blocking poll
    pub poll_timeout: Duration,

    /// Backoff while the broker is unreachable
    pub cooldown: CooldownOptions,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            agent_id: "agent-001".to_string(),
            poll_timeout: Duration::from_secs(5),
            cooldown: CooldownOptions::default(),
        }
    }
}

/// Run the job runner worker until `shutdown_signal` resolves
///
/// A poll in flight is never abandoned, since the broker may already have
/// removed the entry; shutdown is observed between polls, during backoff and
/// by the sandbox while an installer runs.
pub async fn run<S, F>(
    options: &Options,
    executor: &Executor,
    sleep_fn: S,
    shutdown_signal: Pin<Box<dyn Future<Output = ()> + Send>>,
) where
    S: Fn(Duration) -> F,
    F: Future<Output = ()>,
{
    info!("Job runner starting for {}...", options.agent_id);

    let shutdown = shutdown_signal.shared();
    let mut failures: u32 = 0;

    loop {
        if shutdown.clone().now_or_never().is_some() {
            info!("Job runner shutting down...");
            return;
        }

        match executor
            .queue()
            .dequeue(&options.agent_id, options.poll_timeout)
            .await
        {
            Ok(Some(raw)) => {
                failures = 0;
                executor.handle_entry(&raw, shutdown.clone()).await;
            }
            Ok(None) => {
                failures = 0;
                debug!("No job for {}", options.agent_id);
            }
            Err(e) => {
                let wait = calc_exp_backoff(&options.cooldown, failures);
                failures = failures.saturating_add(1);
                error!("Broker unavailable while polling: {}. Retrying in {:?}", e, wait);

                tokio::select! {
                    _ = shutdown.clone() => {
                        info!("Job runner shutting down...");
                        return;
                    }
                    _ = sleep_fn(wait) => {}
                }
            }
        }
    }
}
