use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::outline::node::NodeStatus;

#[derive(Debug, Clone, PartialEq)]
pub struct EffectiveConfig {
    /// Override for the SQLite database path.
    pub database: Option<PathBuf>,
    /// Node statuses the chronicle rollup includes.
    pub chronicle_statuses: Vec<NodeStatus>,
}

impl Default for EffectiveConfig {
    fn default() -> Self {
        Self {
            database: None,
            chronicle_statuses: vec![NodeStatus::Review, NodeStatus::Finished],
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawConfig {
    #[serde(default)]
    database: Option<String>,
    #[serde(default)]
    chronicle: Option<RawChronicle>,
}

#[derive(Debug, Deserialize)]
struct RawChronicle {
    #[serde(default)]
    statuses: Option<Vec<String>>,
}

#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Yaml(serde_yaml::Error),
    InvalidStatus(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(err) => write!(f, "{err}"),
            Self::Yaml(err) => write!(f, "{err}"),
            Self::InvalidStatus(value) => write!(f, "unknown node status `{value}`"),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<serde_yaml::Error> for ConfigError {
    fn from(value: serde_yaml::Error) -> Self {
        Self::Yaml(value)
    }
}

/// User layer first, repo layer last: later layers override the fields they
/// set and leave the rest alone.
pub fn load_effective_config(
    repo_config: Option<&Path>,
    user_config: Option<&Path>,
) -> Result<EffectiveConfig, ConfigError> {
    let mut merged = EffectiveConfig::default();

    if let Some(path) = user_config.filter(|path| path.exists()) {
        merge_layer(&mut merged, load_layer(path)?)?;
    }
    if let Some(path) = repo_config.filter(|path| path.exists()) {
        merge_layer(&mut merged, load_layer(path)?)?;
    }
    Ok(merged)
}

fn load_layer(path: &Path) -> Result<RawConfig, ConfigError> {
    let content = fs::read_to_string(path)?;
    Ok(serde_yaml::from_str(&content)?)
}

fn merge_layer(merged: &mut EffectiveConfig, layer: RawConfig) -> Result<(), ConfigError> {
    if let Some(database) = layer.database {
        merged.database = Some(PathBuf::from(database));
    }
    if let Some(statuses) = layer.chronicle.and_then(|c| c.statuses) {
        let mut parsed = Vec::with_capacity(statuses.len());
        for raw in statuses {
            parsed.push(
                NodeStatus::parse(raw.trim())
                    .ok_or_else(|| ConfigError::InvalidStatus(raw.clone()))?,
            );
        }
        merged.chronicle_statuses = parsed;
    }
    Ok(())
}

pub fn default_config_yaml() -> String {
    r#"# database: /path/to/outline.sqlite3
chronicle:
  statuses:
    - review
    - finished
"#
    .to_string()
}

pub fn expand_tilde(path: &str, home: &Path) -> PathBuf {
    if path == "~" {
        return home.to_path_buf();
    }
    if let Some(rest) = path.strip_prefix("~/") {
        return home.join(rest);
    }
    PathBuf::from(path)
}
