//! The artifact: a generated, validated descriptor of a deployable flow.
//!
//! An artifact is named twice: a slug (`eth-price`) used for the file name
//! and the deployment key, and the function identifier (`eth_price`) declared
//! in its source. The two are tied by [`function_identifier_for`] and its
//! inverse [`slug_for`].

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::schedule::CronSchedule;

/// File extension of generated flows.
pub const FLOW_FILE_EXTENSION: &str = "py";

fn slug_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[a-z][a-z0-9]*(-[a-z0-9]+)*$").expect("valid regex"))
}

/// True when `name` is a lowercase, dash-separated slug starting with a letter.
pub fn is_valid_slug(name: &str) -> bool {
    slug_re().is_match(name)
}

/// Derives the function identifier for a slug (`eth-price` -> `eth_price`).
pub fn function_identifier_for(name: &str) -> String {
    name.replace('-', "_")
}

/// Derives the slug for a function identifier (`eth_price` -> `eth-price`).
pub fn slug_for(function_identifier: &str) -> String {
    function_identifier.replace('_', "-")
}

/// A deployable unit of work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Artifact {
    /// Deployment slug, unique per work pool.
    pub name: String,
    /// Name of the callable declared in `source_text`.
    pub function_identifier: String,
    /// Informational summary.
    pub description: String,
    /// Source of exactly one function definition.
    pub source_text: String,
    /// Recurrence, only when the input asked for one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schedule: Option<CronSchedule>,
    /// Default flow parameters.
    #[serde(default)]
    pub parameters: BTreeMap<String, serde_json::Value>,
}

impl Artifact {
    /// Creates an artifact whose function identifier is derived from `name`.
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        source_text: impl Into<String>,
    ) -> Self {
        let name = name.into();
        Self {
            function_identifier: function_identifier_for(&name),
            name,
            description: description.into(),
            source_text: source_text.into(),
            schedule: None,
            parameters: BTreeMap::new(),
        }
    }

    /// Sets the schedule.
    pub fn with_schedule(mut self, schedule: CronSchedule) -> Self {
        self.schedule = Some(schedule);
        self
    }

    /// Adds a default parameter.
    pub fn with_parameter(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.parameters.insert(key.into(), value);
        self
    }

    /// True when the identifier is the one derived from the slug.
    pub fn names_agree(&self) -> bool {
        self.function_identifier == function_identifier_for(&self.name)
    }

    /// Path of the flow file inside `flows_dir`.
    pub fn file_path(&self, flows_dir: &Path) -> PathBuf {
        flows_dir.join(format!("{}.{}", self.name, FLOW_FILE_EXTENSION))
    }

    /// Entrypoint of this artifact once written under `flows_dir`.
    pub fn entrypoint(&self, flows_dir: &Path) -> Entrypoint {
        Entrypoint::new(self.file_path(flows_dir), function_identifier_for(&self.name))
    }
}

/// A `path:function` reference to the callable a deployment runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entrypoint {
    pub path: PathBuf,
    pub function: String,
}

impl Entrypoint {
    pub fn new(path: impl Into<PathBuf>, function: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            function: function.into(),
        }
    }
}

impl fmt::Display for Entrypoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Prefect expects forward slashes regardless of platform.
        let path = self.path.to_string_lossy().replace('\\', "/");
        write!(f, "{}:{}", path, self.function)
    }
}
