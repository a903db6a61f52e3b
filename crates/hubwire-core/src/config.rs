//! Hub configuration loader.
//!
//! Reads a `hub.toml` and deserializes it into [`HubConfig`]. The lenient
//! loader falls back to defaults when the file is missing or malformed; the
//! strict one reports why.

use std::path::{Path, PathBuf};

use hubwire_types::config::HubConfig;
use hubwire_types::error::ConfigError;

/// Default location of `hub.toml`: `~/.hubwire/hub.toml`, or
/// `.hubwire/hub.toml` relative to the working directory when there is no
/// home directory.
pub fn default_config_path() -> PathBuf {
    let base = match dirs::home_dir() {
        Some(home) => home.join(".hubwire"),
        None => PathBuf::from(".hubwire"),
    };
    base.join("hub.toml")
}

/// Load hub configuration from `path`.
///
/// - If the file does not exist, returns [`HubConfig::default()`].
/// - If the file exists but cannot be read or parsed, logs a warning and
///   returns the default.
pub async fn load_hub_config(path: &Path) -> HubConfig {
    match try_load_hub_config(path).await {
        Ok(config) => config,
        Err(ConfigError::Read { source, .. }) if source.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!("No hub config found at {}, using defaults", path.display());
            HubConfig::default()
        }
        Err(err) => {
            tracing::warn!("{err}, using defaults");
            HubConfig::default()
        }
    }
}

/// Load hub configuration from `path`, failing on any read or parse error.
pub async fn try_load_hub_config(path: &Path) -> Result<HubConfig, ConfigError> {
    let content = tokio::fs::read_to_string(path)
        .await
        .map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;

    let config = toml::from_str::<HubConfig>(&content).map_err(|err| ConfigError::Parse {
        path: path.display().to_string(),
        message: err.to_string(),
    })?;
    config.validate().map_err(|message| ConfigError::Invalid {
        path: path.display().to_string(),
        message,
    })?;
    Ok(config)
}
