//! Settings loader for APIBrick.
//!
//! Reads `config.toml` from the home directory (`~/.apibrick/` unless
//! `APIBRICK_HOME` says otherwise) and deserializes it into [`Settings`].
//! Falls back to defaults when the file is missing or malformed.

use std::path::{Path, PathBuf};

use apibrick_types::config::Settings;

/// Environment variable overriding the home directory.
pub const HOME_ENV_VAR: &str = "APIBRICK_HOME";

const CONFIG_FILE: &str = "config.toml";

/// Resolve the APIBrick home directory.
///
/// `$APIBRICK_HOME` wins, then `~/.apibrick`, then `./.apibrick` when no
/// home directory is known.
pub fn resolve_home_dir() -> PathBuf {
    if let Some(dir) = std::env::var_os(HOME_ENV_VAR).filter(|v| !v.is_empty()) {
        return PathBuf::from(dir);
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".apibrick")
}

/// Load settings from `{home_dir}/config.toml`.
pub async fn load_settings(home_dir: &Path) -> Settings {
    load_settings_file(&home_dir.join(CONFIG_FILE)).await
}

/// Load settings from an explicit file.
///
/// - A missing file yields [`Settings::default()`].
/// - An unreadable or unparsable file logs a warning and yields the default.
pub async fn load_settings_file(config_path: &Path) -> Settings {
    let content = match tokio::fs::read_to_string(config_path).await {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!("No config.toml found at {}, using defaults", config_path.display());
            return Settings::default();
        }
        Err(err) => {
            tracing::warn!("Failed to read {}: {err}, using defaults", config_path.display());
            return Settings::default();
        }
    };

    match toml::from_str::<Settings>(&content) {
        Ok(settings) => {
            tracing::debug!(
                path = %config_path.display(),
                datasources = settings.datasources.len(),
                "Loaded settings"
            );
            settings
        }
        Err(err) => {
            tracing::warn!("Failed to parse {}: {err}, using defaults", config_path.display());
            Settings::default()
        }
    }
}
