use std::path::PathBuf;

use directories::ProjectDirs;
use serde::Deserialize;

use crate::measures::FieldFlags;

/// Application configuration loaded from TOML config file.
/// All fields have sensible defaults — the config file is optional.
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    /// Directory holding the input tables (metadata TSV, per-dataset PCV
    /// tables, measure-map trees).
    pub data_dir: Option<PathBuf>,
    /// Directory for tabular exports. Defaults to the current directory.
    pub out_dir: Option<PathBuf>,
    /// Path to the hand-maintained override table.
    pub overrides_file: Option<PathBuf>,
    /// Divergence below or at this value counts as agreement.
    pub acceptable_error: f64,
    /// Default measure-map field flags, overridable per run.
    pub measure_flags: FieldFlags,
}

impl AppConfig {
    /// Load config from `~/.config/choralign/config.toml`.
    /// Returns default config if file doesn't exist.
    /// Logs a warning if the file exists but can't be parsed.
    pub fn load() -> Self {
        let config_path = Self::config_path();
        match config_path {
            Some(path) if path.exists() => match std::fs::read_to_string(&path) {
                Ok(contents) => match toml::from_str::<AppConfig>(&contents) {
                    Ok(config) => {
                        log::info!("Loaded config from {}", path.display());
                        config
                    }
                    Err(e) => {
                        log::warn!("Failed to parse {}: {}. Using defaults.", path.display(), e);
                        Self::default()
                    }
                },
                Err(e) => {
                    log::warn!("Failed to read {}: {}. Using defaults.", path.display(), e);
                    Self::default()
                }
            },
            _ => {
                log::debug!("No config file found, using defaults");
                Self::default()
            }
        }
    }

    /// Get the config file path.
    fn config_path() -> Option<PathBuf> {
        ProjectDirs::from("", "", crate::APP_NAME)
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.acceptable_error, 0.0);
        assert!(config.data_dir.is_none());
        assert!(config.measure_flags.qstamp);
        assert!(!config.measure_flags.name);
    }

    #[test]
    fn test_partial_toml() {
        let config: AppConfig = toml::from_str(
            "acceptable_error = 0.5\n[measure_flags]\nnumber = false\n",
        )
        .unwrap();
        assert_eq!(config.acceptable_error, 0.5);
        assert!(!config.measure_flags.number);
        assert!(config.measure_flags.qstamp);
    }
}
