//! Application manifest models
//!
//! A manifest describes one installable application: its metadata, the input
//! fields a user must supply and the installer script that consumes them.

use std::collections::{BTreeMap, HashSet};
use std::sync::{LazyLock, OnceLock};

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::errors::ManifestError;

/// Placeholder written in place of sensitive input values
pub const MASK: &str = "********";

/// Default installer timeout in seconds
pub const DEFAULT_TIMEOUT_SECS: u64 = 600;

/// Allowed installer timeout range in seconds
pub const MIN_TIMEOUT_SECS: u64 = 60;
pub const MAX_TIMEOUT_SECS: u64 = 3600;

const APP_ID_PATTERN: &str = r"^[a-z0-9-]+$";
const INPUT_NAME_PATTERN: &str = r"^[a-z_][a-z0-9_]*$";
const SCRIPT_PATTERN: &str = r"^[a-zA-Z0-9_\-.]+\.sh$";

static APP_ID_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(APP_ID_PATTERN).expect("app id pattern is valid"));
static INPUT_NAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(INPUT_NAME_PATTERN).expect("input name pattern is valid"));
static SCRIPT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(SCRIPT_PATTERN).expect("script pattern is valid"));

/// Input field type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InputType {
    String,
    Integer,
    Boolean,
    Password,
    Select,
    Email,
    Port,
}

/// Declarative constraints applied after type checks
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InputValidation {
    /// Regex anchored at the start of the value
    #[serde(default)]
    pub pattern: Option<String>,

    #[serde(default)]
    pub min_length: Option<usize>,

    #[serde(default)]
    pub max_length: Option<usize>,

    #[serde(default)]
    pub min_value: Option<f64>,

    #[serde(default)]
    pub max_value: Option<f64>,

    /// Closed set of accepted values
    #[serde(default)]
    pub allowed_values: Option<Vec<String>>,

    #[serde(skip)]
    pub(crate) compiled: CompiledPattern,
}

impl InputValidation {
    /// `pattern` anchored at the start of the value, compiled on first use
    ///
    /// `None` without a pattern. The compiled form is kept for the life of
    /// this value, so `pattern` must not change after the first call.
    pub fn pattern_regex(&self) -> Option<Result<&Regex, &regex::Error>> {
        let pattern = self.pattern.as_ref()?;
        let compiled = self.compiled.0.get_or_init(|| {
            // The bare pattern must compile too: wrapping can balance a stray ')'
            Regex::new(pattern).and_then(|_| Regex::new(&format!("^(?:{})", pattern)))
        });
        Some(compiled.as_ref())
    }
}

/// Cached compilation of [`InputValidation::pattern`]
#[derive(Debug, Clone, Default)]
pub(crate) struct CompiledPattern(OnceLock<Result<Regex, regex::Error>>);

// Derived from `pattern`, so it never distinguishes two validations
impl PartialEq for CompiledPattern {
    fn eq(&self, _: &Self) -> bool {
        true
    }
}

/// One declared manifest input
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputField {
    pub name: String,

    #[serde(rename = "type")]
    pub field_type: InputType,

    pub label: String,

    #[serde(default)]
    pub description: Option<String>,

    #[serde(default = "default_true")]
    pub required: bool,

    #[serde(default)]
    pub default: Option<String>,

    #[serde(default)]
    pub validation: Option<InputValidation>,

    /// Field is only required and validated when every listed
    /// field carries the expected value
    #[serde(default)]
    pub visible_if: Option<BTreeMap<String, String>>,

    #[serde(default)]
    pub sensitive: bool,
}

impl InputField {
    /// Whether the value must be masked in logs and stored records
    pub fn is_sensitive(&self) -> bool {
        self.sensitive || self.field_type == InputType::Password
    }
}

/// Supported operating system families
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OsFamily {
    Debian,
    Ubuntu,
    Centos,
    Rhel,
    Fedora,
    Alpine,
}

impl OsFamily {
    /// Distribution identifier as reported by `/etc/os-release`
    pub fn as_str(&self) -> &'static str {
        match self {
            OsFamily::Debian => "debian",
            OsFamily::Ubuntu => "ubuntu",
            OsFamily::Centos => "centos",
            OsFamily::Rhel => "rhel",
            OsFamily::Fedora => "fedora",
            OsFamily::Alpine => "alpine",
        }
    }
}

/// Operating system hint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OsRequirement {
    pub family: Vec<OsFamily>,

    #[serde(default)]
    pub min_version: Option<String>,
}

/// Minimum resource hints
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceRequirements {
    #[serde(default)]
    pub min_ram_mb: Option<u64>,

    #[serde(default)]
    pub min_disk_mb: Option<u64>,

    #[serde(default)]
    pub min_cpu_cores: Option<usize>,
}

/// Complete application manifest
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    pub id: String,
    pub name: String,
    pub version: String,
    pub description: String,
    pub category: String,

    #[serde(default)]
    pub author: Option<String>,

    #[serde(default)]
    pub homepage: Option<String>,

    #[serde(default)]
    pub os_requirements: Option<OsRequirement>,

    #[serde(default)]
    pub resource_requirements: Option<ResourceRequirements>,

    #[serde(default)]
    pub inputs: Vec<InputField>,

    #[serde(default = "default_install_script")]
    pub install_script: String,

    #[serde(default)]
    pub uninstall_script: Option<String>,

    #[serde(default = "default_timeout")]
    pub timeout_seconds: u64,

    #[serde(default = "default_true")]
    pub idempotent: bool,

    #[serde(default)]
    pub tags: Vec<String>,
}

fn default_true() -> bool {
    true
}

fn default_install_script() -> String {
    "install.sh".to_string()
}

fn default_timeout() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

impl Manifest {
    /// Parse a manifest from YAML text and check it against the schema
    pub fn from_yaml(text: &str) -> Result<Self, ManifestError> {
        let manifest: Manifest = serde_yaml::from_str(text)?;
        manifest.check()?;
        Ok(manifest)
    }

    /// Check the structural rules serde cannot express
    pub fn check(&self) -> Result<(), ManifestError> {
        if !is_valid_app_id(&self.id) {
            return Err(ManifestError::Invalid(format!(
                "id '{}' must match {}",
                self.id, APP_ID_PATTERN
            )));
        }

        if !SCRIPT_RE.is_match(&self.install_script) {
            return Err(ManifestError::Invalid(format!(
                "install_script '{}' must be a .sh file with safe characters",
                self.install_script
            )));
        }

        if let Some(ref script) = self.uninstall_script {
            if !SCRIPT_RE.is_match(script) {
                return Err(ManifestError::Invalid(format!(
                    "uninstall_script '{}' must be a .sh file with safe characters",
                    script
                )));
            }
        }

        if !(MIN_TIMEOUT_SECS..=MAX_TIMEOUT_SECS).contains(&self.timeout_seconds) {
            return Err(ManifestError::Invalid(format!(
                "timeout_seconds {} must be between {} and {}",
                self.timeout_seconds, MIN_TIMEOUT_SECS, MAX_TIMEOUT_SECS
            )));
        }

        let mut seen = HashSet::new();
        for field in &self.inputs {
            if !INPUT_NAME_RE.is_match(&field.name) {
                return Err(ManifestError::Invalid(format!(
                    "input name '{}' must match {}",
                    field.name, INPUT_NAME_PATTERN
                )));
            }
            if !seen.insert(field.name.as_str()) {
                return Err(ManifestError::Invalid(format!(
                    "input '{}' is declared more than once",
                    field.name
                )));
            }
            if let Some(Err(e)) = field.validation.as_ref().and_then(|v| v.pattern_regex()) {
                return Err(ManifestError::Invalid(format!(
                    "input '{}' has an invalid pattern: {}",
                    field.name, e
                )));
            }
        }

        Ok(())
    }

    /// Look up a declared input by name
    pub fn input(&self, name: &str) -> Option<&InputField> {
        self.inputs.iter().find(|f| f.name == name)
    }

    /// Copy of `inputs` with every sensitive value replaced by [`MASK`]
    ///
    /// Values for undeclared names are kept as-is; they never reach an
    /// installer and carry no declared sensitivity.
    pub fn masked_inputs(&self, inputs: &BTreeMap<String, String>) -> BTreeMap<String, String> {
        inputs
            .iter()
            .map(|(name, value)| {
                let masked = match self.input(name) {
                    Some(field) if field.is_sensitive() => MASK.to_string(),
                    _ => value.clone(),
                };
                (name.clone(), masked)
            })
            .collect()
    }
}

/// Whether `app_id` is a well-formed application slug
///
/// Slugs double as directory names under the installers root, so anything
/// else is rejected before it touches the filesystem.
pub fn is_valid_app_id(app_id: &str) -> bool {
    APP_ID_RE.is_match(app_id)
}
