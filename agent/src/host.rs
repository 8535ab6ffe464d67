//! Host facts and manifest preflight
//!
//! A manifest's OS and resource requirements are hints. The agent compares
//! them with the host before running an installer and logs every mismatch;
//! it never refuses a job because of them.

use std::cmp::Ordering;
use std::path::Path;

use serde::{Deserialize, Serialize};
use sysinfo::{Disks, System};

use provisioning_common::models::manifest::Manifest;

const MB: u64 = 1024 * 1024;

/// What the preflight needs to know about the host
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostProfile {
    /// Distribution id as in `/etc/os-release` (`ubuntu`, `debian`, ...)
    pub distribution: String,

    pub os_version: Option<String>,

    pub total_ram_mb: u64,

    /// Free space on the filesystem holding the installers root
    pub available_disk_mb: Option<u64>,

    pub cpu_cores: usize,

    pub hostname: String,
}

impl HostProfile {
    /// Collect host facts; `path` selects the filesystem for the disk check
    pub fn collect(path: &Path) -> Self {
        let mut sys = System::new_all();
        sys.refresh_all();

        let disks = Disks::new_with_refreshed_list();
        let available_disk_mb = disks
            .iter()
            .filter(|disk| path.starts_with(disk.mount_point()))
            .max_by_key(|disk| disk.mount_point().as_os_str().len())
            .map(|disk| disk.available_space() / MB);

        Self {
            distribution: System::distribution_id(),
            os_version: System::os_version(),
            total_ram_mb: sys.total_memory() / MB,
            available_disk_mb,
            cpu_cores: sys.cpus().len(),
            hostname: System::host_name().unwrap_or_else(|| "unknown".to_string()),
        }
    }
}

/// Every way the host falls short of the manifest's hints
pub fn preflight(manifest: &Manifest, host: &HostProfile) -> Vec<String> {
    let mut warnings = Vec::new();

    if let Some(ref os) = manifest.os_requirements {
        if !os.family.is_empty()
            && !os.family.iter().any(|f| f.as_str() == host.distribution)
        {
            let families: Vec<&str> = os.family.iter().map(|f| f.as_str()).collect();
            warnings.push(format!(
                "{} expects one of [{}], host runs {}",
                manifest.id,
                families.join(", "),
                host.distribution
            ));
        }
        if let (Some(min), Some(actual)) = (&os.min_version, &host.os_version) {
            if compare_versions(actual, min) == Ordering::Less {
                warnings.push(format!(
                    "{} expects OS version {} or later, host has {}",
                    manifest.id, min, actual
                ));
            }
        }
    }

    if let Some(ref resources) = manifest.resource_requirements {
        if let Some(min) = resources.min_ram_mb {
            if host.total_ram_mb < min {
                warnings.push(format!(
                    "{} expects {} MB of RAM, host has {} MB",
                    manifest.id, min, host.total_ram_mb
                ));
            }
        }
        if let (Some(min), Some(available)) = (resources.min_disk_mb, host.available_disk_mb) {
            if available < min {
                warnings.push(format!(
                    "{} expects {} MB of free disk, host has {} MB",
                    manifest.id, min, available
                ));
            }
        }
        if let Some(min) = resources.min_cpu_cores {
            if host.cpu_cores < min {
                warnings.push(format!(
                    "{} expects {} CPU cores, host has {}",
                    manifest.id, min, host.cpu_cores
                ));
            }
        }
    }

    warnings
}

/// Compare dotted versions numerically; non-numeric parts compare as 0
fn compare_versions(a: &str, b: &str) -> Ordering {
    let parse = |v: &str| -> Vec<u64> {
        v.split(|c: char| c == '.' || c == '-')
            .map(|part| part.parse().unwrap_or(0))
            .collect()
    };
    let (a, b) = (parse(a), parse(b));
    let len = a.len().max(b.len());
    for i in 0..len {
        match a.get(i).unwrap_or(&0).cmp(b.get(i).unwrap_or(&0)) {
            Ordering::Equal => continue,
            other => return other,
        }
    }
    Ordering::Equal
}
