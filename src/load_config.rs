//! Loads the optional YAML config file, injects the API token from the
//! command line or environment, and applies command-line overrides.
//!
//! The file never holds secrets. Every section is optional; missing keys fall
//! back to the defaults in [`crate::config`].

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Result};
use serde::Deserialize;
use tracing::{error, info};

use crate::config::{
    ApiConfig, MirrorConfig, RateLimitConfig, RetryConfig, TraversalConfig, DEFAULT_BASE_URL,
};

pub const TOKEN_ENV: &str = "QUIP_API_TOKEN";

const DEFAULT_OUTPUT_DIR: &str = "output";
const DEFAULT_BATCH_SIZE: usize = 50;
const DEFAULT_MAX_CONCURRENT_FOLDERS: usize = 4;
const DEFAULT_MAX_CONCURRENT_DOCUMENTS: usize = 8;

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct StaticConfig {
    api: ApiSection,
    rate_limit: RateLimitConfig,
    retry: RetryConfig,
    mirror: MirrorSection,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ApiSection {
    base_url: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct MirrorSection {
    root_folder_id: Option<String>,
    output_dir: Option<PathBuf>,
    batch_size: Option<usize>,
    max_concurrent_folders: Option<usize>,
    max_concurrent_documents: Option<usize>,
}

/// Values given on the command line. They win over the file.
#[derive(Debug, Default, Clone)]
pub struct ConfigOverrides {
    pub token: Option<String>,
    pub root_folder_id: Option<String>,
    pub output_dir: Option<PathBuf>,
    pub base_url: Option<String>,
}

/// Build a [`MirrorConfig`] from an optional YAML file, the environment and overrides.
pub fn load_config(path: Option<&Path>, overrides: ConfigOverrides) -> Result<MirrorConfig> {
    let static_conf = match path {
        Some(path) => read_static_config(path)?,
        None => {
            info!("No config file given, using defaults");
            StaticConfig::default()
        }
    };

    let token = overrides
        .token
        .or_else(|| std::env::var(TOKEN_ENV).ok())
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty());
    let token = match token {
        Some(token) => {
            info!("API token provided");
            token
        }
        None => {
            error!("{TOKEN_ENV} not set and no --token given");
            bail!("missing API token: pass --token or set {TOKEN_ENV}");
        }
    };

    let root_folder_id = overrides
        .root_folder_id
        .or(static_conf.mirror.root_folder_id)
        .map(|id| id.trim().to_string())
        .filter(|id| !id.is_empty());
    let Some(root_folder_id) = root_folder_id else {
        error!("No root folder id configured");
        bail!("missing root folder id: pass --root-folder or set mirror.root_folder_id");
    };

    let base_url = overrides
        .base_url
        .or(static_conf.api.base_url)
        .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
        .trim_end_matches('/')
        .to_string();

    let config = MirrorConfig {
        api: ApiConfig {
            base_url,
            token,
            batch_size: static_conf.mirror.batch_size.unwrap_or(DEFAULT_BATCH_SIZE),
        },
        rate_limit: static_conf.rate_limit,
        retry: static_conf.retry,
        mirror: TraversalConfig {
            root_folder_id,
            output_dir: overrides
                .output_dir
                .or(static_conf.mirror.output_dir)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_OUTPUT_DIR)),
            max_concurrent_folders: static_conf
                .mirror
                .max_concurrent_folders
                .unwrap_or(DEFAULT_MAX_CONCURRENT_FOLDERS),
            max_concurrent_documents: static_conf
                .mirror
                .max_concurrent_documents
                .unwrap_or(DEFAULT_MAX_CONCURRENT_DOCUMENTS),
        },
    };

    validate(&config)?;
    config.trace_loaded();
    Ok(config)
}

fn read_static_config(path: &Path) -> Result<StaticConfig> {
    info!(config_path = ?path, "Loading configuration from file");

    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) => {
            error!(error = ?e, config_path = ?path, "Failed to read config file");
            bail!("Failed to read config file {:?}: {}", path, e);
        }
    };

    match serde_yaml::from_str::<Option<StaticConfig>>(&content) {
        Ok(conf) => {
            info!(config_path = ?path, "Parsed config YAML successfully");
            Ok(conf.unwrap_or_default())
        }
        Err(e) => {
            error!(error = ?e, config_path = ?path, "Failed to parse config YAML");
            bail!("Failed to parse config YAML: {e}");
        }
    }
}

fn validate(config: &MirrorConfig) -> Result<()> {
    let checks = [
        ("rate_limit.max_requests", config.rate_limit.max_requests as u64),
        ("rate_limit.window_ms", config.rate_limit.window_ms),
        ("mirror.batch_size", config.api.batch_size as u64),
        (
            "mirror.max_concurrent_folders",
            config.mirror.max_concurrent_folders as u64,
        ),
        (
            "mirror.max_concurrent_documents",
            config.mirror.max_concurrent_documents as u64,
        ),
    ];
    for (key, value) in checks {
        if value == 0 {
            error!(key, "Config value must be greater than zero");
            bail!("{key} must be greater than zero");
        }
    }
    Ok(())
}
