use std::{fs, io, path::Path, str::FromStr};

use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io { path: String, source: io::Error },
    #[error("invalid config file: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("invalid value {value:?} for {key}")]
    InvalidValue { key: &'static str, value: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentStoreKind {
    Memory,
    Ipfs,
}

impl FromStr for ContentStoreKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(Self::Memory),
            "ipfs" => Ok(Self::Ipfs),
            other => Err(format!("unknown content store {other:?}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub content_store: ContentStoreKind,
    pub ipfs_api_url: String,
    pub ipfs_gateway_url: String,
    pub grants_root: Option<String>,
    pub store_display_name: Option<String>,
    pub first_grant_id: u64,
    /// Makes the simulated publish client reject every transaction.
    pub publish_fail: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            content_store: ContentStoreKind::Memory,
            ipfs_api_url: "http://127.0.0.1:5001".into(),
            ipfs_gateway_url: "http://127.0.0.1:8080".into(),
            grants_root: None,
            store_display_name: None,
            first_grant_id: 1,
            publish_fail: None,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileSettings {
    content_store: Option<ContentStoreKind>,
    ipfs_api_url: Option<String>,
    ipfs_gateway_url: Option<String>,
    grants_root: Option<String>,
    store_display_name: Option<String>,
    first_grant_id: Option<u64>,
    publish_fail: Option<String>,
}

pub fn load_settings(path: &Path) -> Result<Settings, ConfigError> {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => Some(raw),
        Err(err) if err.kind() == io::ErrorKind::NotFound => None,
        Err(source) => {
            return Err(ConfigError::Io {
                path: path.display().to_string(),
                source,
            })
        }
    };
    settings_from(raw.as_deref(), |key| std::env::var(key).ok())
}

/// Defaults, then the TOML file, then `APP__*` environment variables.
pub fn settings_from(
    raw_file: Option<&str>,
    env: impl Fn(&str) -> Option<String>,
) -> Result<Settings, ConfigError> {
    let mut settings = Settings::default();

    if let Some(raw) = raw_file {
        let file: FileSettings = toml::from_str(raw)?;
        if let Some(v) = file.content_store {
            settings.content_store = v;
        }
        if let Some(v) = file.ipfs_api_url {
            settings.ipfs_api_url = v;
        }
        if let Some(v) = file.ipfs_gateway_url {
            settings.ipfs_gateway_url = v;
        }
        if let Some(v) = file.first_grant_id {
            settings.first_grant_id = v;
        }
        settings.grants_root = file.grants_root.or(settings.grants_root);
        settings.store_display_name = file.store_display_name.or(settings.store_display_name);
        settings.publish_fail = file.publish_fail.or(settings.publish_fail);
    }

    if let Some(v) = env("APP__CONTENT_STORE") {
        settings.content_store = v.parse().map_err(|_| ConfigError::InvalidValue {
            key: "APP__CONTENT_STORE",
            value: v,
        })?;
    }
    if let Some(v) = env("APP__IPFS_API_URL") {
        settings.ipfs_api_url = v;
    }
    if let Some(v) = env("APP__IPFS_GATEWAY_URL") {
        settings.ipfs_gateway_url = v;
    }
    if let Some(v) = env("APP__GRANTS_ROOT") {
        settings.grants_root = Some(v);
    }
    if let Some(v) = env("APP__STORE_DISPLAY_NAME") {
        settings.store_display_name = Some(v);
    }
    if let Some(v) = env("APP__FIRST_GRANT_ID") {
        settings.first_grant_id = v.parse().map_err(|_| ConfigError::InvalidValue {
            key: "APP__FIRST_GRANT_ID",
            value: v,
        })?;
    }
    if let Some(v) = env("APP__PUBLISH_FAIL") {
        settings.publish_fail = Some(v);
    }

    Ok(settings)
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
