//! Installed-application records
//!
//! One record per `(server, app)` under `installed:{server_id}:{app_id}`,
//! written when an install job is issued. Records never expire; removing one
//! does not touch the server.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use provisioning_common::broker::Broker;
use provisioning_common::errors::BrokerError;
use provisioning_common::models::job::{now_rfc3339, Job};
use provisioning_common::models::manifest::Manifest;
use provisioning_common::protocol::keys;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstalledApp {
    pub app_id: String,
    pub server_id: String,
    pub job_id: String,
    /// Inputs with sensitive values masked
    pub inputs: BTreeMap<String, String>,
    pub installed_at: String,
}

#[derive(Clone)]
pub struct InstalledApps {
    broker: Arc<dyn Broker>,
}

impl InstalledApps {
    pub fn new(broker: Arc<dyn Broker>) -> Self {
        Self { broker }
    }

    /// Record that `job` installs `manifest` on the job's target
    pub async fn mark_installed(
        &self,
        manifest: &Manifest,
        job: &Job,
    ) -> Result<InstalledApp, BrokerError> {
        let record = InstalledApp {
            app_id: job.app_id.clone(),
            server_id: job.server_id.clone(),
            job_id: job.job_id.clone(),
            inputs: manifest.masked_inputs(&job.inputs),
            installed_at: now_rfc3339(),
        };
        let payload = serde_json::to_string(&record)?;

        self.broker
            .set(&keys::installed(&record.server_id, &record.app_id), &payload, None)
            .await?;
        Ok(record)
    }

    /// Records for `server_id`, sorted by app id
    pub async fn list_installed(&self, server_id: &str) -> Result<Vec<InstalledApp>, BrokerError> {
        let mut apps = Vec::new();
        for key in self.broker.scan(&keys::installed(server_id, "*")).await? {
            let Some(raw) = self.broker.get(&key).await? else {
                continue;
            };
            match serde_json::from_str::<InstalledApp>(&raw) {
                Ok(app) if app.server_id == server_id => apps.push(app),
                Ok(_) => {}
                Err(e) => warn!("Skipping undecodable record {}: {}", key, e),
            }
        }
        apps.sort_by(|a, b| a.app_id.cmp(&b.app_id));
        Ok(apps)
    }

    /// Remove the record; returns whether one existed
    pub async fn uninstall(&self, app_id: &str, server_id: &str) -> Result<bool, BrokerError> {
        let removed = self
            .broker
            .delete(&keys::installed(server_id, app_id))
            .await?;
        if removed {
            info!("Removed installed record for {} on {}", app_id, server_id);
        }
        Ok(removed)
    }
}
