// Module: Definition
// The parsed workflow document and its YAML loader.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use anyhow::{Context as _, Result};
use serde::Deserialize;

use crate::client::DEFAULT_TIMEOUT_MS;
use crate::steps::http::CsvMap;
use crate::steps::StepList;

/// A fully parsed workflow document. Immutable during execution.
#[derive(Debug, Deserialize)]
pub struct Definition {
    /// Informational document version.
    #[serde(default)]
    pub version: String,
    /// Prefix applied to relative step URLs.
    #[serde(default)]
    pub base_url: String,
    /// Request timeout in milliseconds for the workflow's HTTP client.
    #[serde(default = "default_timeout")]
    pub timeout: u64,
    /// Variable expressions evaluated once before execution.
    #[serde(default)]
    pub variables: HashMap<String, String>,
    /// Global header expressions evaluated once before execution.
    #[serde(default)]
    pub headers: CsvMap,
    pub steps: StepList,
    /// Output projection expressions evaluated over the final store.
    #[serde(default)]
    pub output: Option<HashMap<String, String>>,
    #[serde(default)]
    pub output_all: bool,
}

fn default_timeout() -> u64 {
    DEFAULT_TIMEOUT_MS
}

/// Loads and parses a workflow config file.
///
/// Relative resources inside the document (request-body files) are resolved
/// against the config file's directory, so parsing is independent of the
/// process working directory.
pub fn parse_file(path: &Path) -> Result<Definition> {
    let source = fs::read_to_string(path)
        .with_context(|| format!("failed to read config '{}'", path.display()))?;

    let mut definition: Definition =
        serde_yaml::from_str(&source).context("failed to parse config")?;

    let base_dir = path.parent().unwrap_or_else(|| Path::new("."));
    definition.steps.finalize(base_dir)?;

    Ok(definition)
}
