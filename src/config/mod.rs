use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::export::DEFAULT_UNCATEGORIZED_LABEL;
use crate::telemetry::DEFAULT_LOG_FILTER;
use crate::upload::{DEFAULT_ALLOWED_EXTENSIONS, DEFAULT_MAX_FILE_SIZE, UploadPolicy};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EffectiveConfig {
    pub data_dir: Option<String>,
    pub allowed_extensions: Vec<String>,
    pub max_file_size: u64,
    pub uncategorized_label: String,
    pub log: String,
}

impl Default for EffectiveConfig {
    fn default() -> Self {
        Self {
            data_dir: None,
            allowed_extensions: DEFAULT_ALLOWED_EXTENSIONS
                .iter()
                .map(|ext| ext.to_string())
                .collect(),
            max_file_size: DEFAULT_MAX_FILE_SIZE,
            uncategorized_label: DEFAULT_UNCATEGORIZED_LABEL.to_string(),
            log: DEFAULT_LOG_FILTER.to_string(),
        }
    }
}

impl EffectiveConfig {
    pub fn upload_policy(&self) -> UploadPolicy {
        UploadPolicy {
            allowed_extensions: self.allowed_extensions.clone(),
            max_file_size: self.max_file_size,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawConfig {
    #[serde(default)]
    data_dir: Option<String>,
    #[serde(default)]
    allowed_extensions: Option<Vec<String>>,
    #[serde(default)]
    max_file_size: Option<u64>,
    #[serde(default)]
    uncategorized_label: Option<String>,
    #[serde(default)]
    log: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("{path}: {source}")]
    Yaml {
        path: PathBuf,
        source: serde_yaml::Error,
    },
    #[error("{path}: {message}")]
    InvalidValue { path: PathBuf, message: String },
}

pub fn load_effective_config(
    repo_config: Option<&Path>,
    user_config: Option<&Path>,
) -> Result<EffectiveConfig, ConfigError> {
    let mut merged = EffectiveConfig::default();
    for path in [user_config, repo_config].into_iter().flatten() {
        if path.exists() {
            let layer = load_config_layer(path)?;
            merge_layer(&mut merged, layer);
        }
    }
    Ok(merged)
}

pub fn load_config_file(path: &Path) -> Result<EffectiveConfig, ConfigError> {
    let mut merged = EffectiveConfig::default();
    merge_layer(&mut merged, load_config_layer(path)?);
    Ok(merged)
}

fn merge_layer(merged: &mut EffectiveConfig, layer: RawConfig) {
    if let Some(data_dir) = layer.data_dir {
        merged.data_dir = Some(data_dir);
    }
    if let Some(extensions) = layer.allowed_extensions {
        merged.allowed_extensions = extensions;
    }
    if let Some(max_file_size) = layer.max_file_size {
        merged.max_file_size = max_file_size;
    }
    if let Some(label) = layer.uncategorized_label {
        merged.uncategorized_label = label;
    }
    if let Some(log) = layer.log {
        merged.log = log;
    }
}

fn load_config_layer(path: &Path) -> Result<RawConfig, ConfigError> {
    let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse_config_layer(path, &content)
}

fn parse_config_layer(path: &Path, content: &str) -> Result<RawConfig, ConfigError> {
    if content.trim().is_empty() {
        return Ok(RawConfig::default());
    }
    let mut raw: RawConfig = serde_yaml::from_str(content).map_err(|source| ConfigError::Yaml {
        path: path.to_path_buf(),
        source,
    })?;
    let invalid = |message: &str| ConfigError::InvalidValue {
        path: path.to_path_buf(),
        message: message.to_string(),
    };

    if let Some(extensions) = raw.allowed_extensions.take() {
        let normalized = extensions
            .iter()
            .map(|ext| ext.trim().trim_start_matches('.').to_ascii_lowercase())
            .filter(|ext| !ext.is_empty())
            .collect::<Vec<_>>();
        if normalized.is_empty() {
            return Err(invalid("allowed_extensions must list at least one extension"));
        }
        raw.allowed_extensions = Some(normalized);
    }
    if raw.max_file_size == Some(0) {
        return Err(invalid("max_file_size must be greater than zero"));
    }
    if raw
        .uncategorized_label
        .as_deref()
        .is_some_and(|label| label.trim().is_empty())
    {
        return Err(invalid("uncategorized_label must not be empty"));
    }
    Ok(raw)
}

pub fn default_repo_config_yaml() -> String {
    format!(
        r#"# data_dir: ~/invoices
allowed_extensions: [{}]
max_file_size: {DEFAULT_MAX_FILE_SIZE}
uncategorized_label: {DEFAULT_UNCATEGORIZED_LABEL}
log: {DEFAULT_LOG_FILTER}
"#,
        DEFAULT_ALLOWED_EXTENSIONS.join(", ")
    )
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
