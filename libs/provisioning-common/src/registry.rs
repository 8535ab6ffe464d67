//! Manifest registry
//!
//! Loaded once from the installers root. Each immediate subdirectory holding
//! a `manifest.yml` whose `id` equals the directory name is one installer.
//! The set of ids in the registry is the execution whitelist.

use std::collections::BTreeMap;
use std::path::PathBuf;

use tracing::{debug, info, warn};

use crate::errors::ManifestError;
use crate::filesys::dir::Dir;
use crate::filesys::file::File;
use crate::models::manifest::{is_valid_app_id, Manifest};

pub const MANIFEST_FILE: &str = "manifest.yml";

/// Immutable view of every valid installer under one root
#[derive(Debug, Clone)]
pub struct ManifestRegistry {
    root: Dir,
    manifests: BTreeMap<String, Manifest>,
}

impl ManifestRegistry {
    /// Read every installer manifest under `root`
    ///
    /// Unreadable or invalid manifests are skipped with a warning. A missing
    /// root yields an empty registry.
    pub async fn load(root: Dir) -> Result<Self, ManifestError> {
        let mut manifests = BTreeMap::new();

        if !root.exists().await {
            warn!("Installers root {:?} does not exist", root.path());
            return Ok(Self { root, manifests });
        }

        for path in root.list_dirs().await? {
            let Some(dir_name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            let manifest_file = File::new(path.join(MANIFEST_FILE));
            if !manifest_file.exists().await {
                debug!("Skipping {:?}: no {}", path, MANIFEST_FILE);
                continue;
            }

            match read_manifest(&manifest_file, dir_name).await {
                Ok(manifest) => {
                    manifests.insert(manifest.id.clone(), manifest);
                }
                Err(e) => warn!("Skipping installer '{}': {}", dir_name, e),
            }
        }

        info!("Loaded {} installer manifests from {:?}", manifests.len(), root.path());
        Ok(Self { root, manifests })
    }

    /// Build a registry from manifests already in memory
    pub fn from_manifests(root: Dir, manifests: impl IntoIterator<Item = Manifest>) -> Self {
        Self {
            root,
            manifests: manifests.into_iter().map(|m| (m.id.clone(), m)).collect(),
        }
    }

    pub fn root(&self) -> &Dir {
        &self.root
    }

    /// Manifest for `app_id`; `None` means the app is not whitelisted
    pub fn get(&self, app_id: &str) -> Option<&Manifest> {
        if !is_valid_app_id(app_id) {
            return None;
        }
        self.manifests.get(app_id)
    }

    pub fn contains(&self, app_id: &str) -> bool {
        self.get(app_id).is_some()
    }

    /// Every manifest, sorted by id
    pub fn list(&self) -> Vec<&Manifest> {
        self.manifests.values().collect()
    }

    /// Directory holding the installer for `app_id`
    pub fn installer_dir(&self, app_id: &str) -> Option<Dir> {
        self.get(app_id).map(|_| self.root.subdir(app_id))
    }

    /// Path of the install script for `app_id`
    pub fn install_script(&self, app_id: &str) -> Option<PathBuf> {
        self.get(app_id)
            .map(|m| self.root.subdir(app_id).path().join(&m.install_script))
    }

    /// Filter manifests
    ///
    /// `query` matches name or description case-insensitively, `category`
    /// must match exactly and `tags` matches when any tag is shared. Absent
    /// filters match everything.
    pub fn search(
        &self,
        query: Option<&str>,
        category: Option<&str>,
        tags: &[String],
    ) -> Vec<&Manifest> {
        let query = query.map(str::to_lowercase);

        self.manifests
            .values()
            .filter(|m| match query {
                Some(ref q) => {
                    m.name.to_lowercase().contains(q) || m.description.to_lowercase().contains(q)
                }
                None => true,
            })
            .filter(|m| category.map_or(true, |c| m.category == c))
            .filter(|m| tags.is_empty() || m.tags.iter().any(|t| tags.contains(t)))
            .collect()
    }
}

async fn read_manifest(file: &File, dir_name: &str) -> Result<Manifest, ManifestError> {
    let manifest: Manifest = file.read_yaml().await?;
    manifest.check()?;
    if manifest.id != dir_name {
        return Err(ManifestError::Invalid(format!(
            "id '{}' does not match directory '{}'",
            manifest.id, dir_name
        )));
    }
    Ok(manifest)
}
