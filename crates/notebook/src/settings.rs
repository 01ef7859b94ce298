//! Client settings persistence.
//!
//! Settings are stored in a JSON file in the user's config directory:
//! - macOS: ~/Library/Application Support/plas/settings.json
//! - Linux: ~/.config/plas/settings.json
//! - Windows: C:\Users\<User>\AppData\Roaming\plas\settings.json
//!
//! `PLAS_ORIGIN` overrides the stored origin.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Result;
use plas_wire::FrameFormat;
use serde::{Deserialize, Serialize};

use crate::kernel::KernelOptions;

pub const ORIGIN_ENV: &str = "PLAS_ORIGIN";

fn default_origin() -> String {
    "http://localhost:8888".to_string()
}

fn default_retries() -> u32 {
    5
}

fn default_interval_ms() -> u64 {
    500
}

fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientSettings {
    /// Server origin, e.g. `http://localhost:8888`
    #[serde(default = "default_origin")]
    pub origin: String,

    /// Failed idle checks tolerated by run-all before giving up
    #[serde(default = "default_retries")]
    pub execute_all_retries: u32,

    #[serde(default = "default_interval_ms")]
    pub execute_all_interval_ms: u64,

    #[serde(default = "default_timeout_secs")]
    pub request_timeout_secs: u64,

    #[serde(default)]
    pub frame_format: FrameFormat,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            origin: default_origin(),
            execute_all_retries: default_retries(),
            execute_all_interval_ms: default_interval_ms(),
            request_timeout_secs: default_timeout_secs(),
            frame_format: FrameFormat::default(),
        }
    }
}

impl ClientSettings {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn kernel_options(&self) -> KernelOptions {
        KernelOptions {
            frame_format: self.frame_format,
            execute_all_retries: self.execute_all_retries,
            execute_all_interval: Duration::from_millis(self.execute_all_interval_ms),
        }
    }

    /// Apply `PLAS_ORIGIN` if set and non-empty.
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(origin) = std::env::var(ORIGIN_ENV) {
            if !origin.trim().is_empty() {
                self.origin = origin.trim().to_string();
            }
        }
        self
    }
}

/// Get the path to the settings file
pub fn settings_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("plas")
        .join("settings.json")
}

/// Load settings from `path`, returning defaults if it is missing or corrupt
pub fn load_settings_from(path: &Path) -> ClientSettings {
    if path.exists() {
        std::fs::read_to_string(path)
            .ok()
            .and_then(|s| serde_json::from_str(&s).ok())
            .unwrap_or_default()
    } else {
        ClientSettings::default()
    }
}

/// Load settings from the config directory, with environment overrides
pub fn load_settings() -> ClientSettings {
    load_settings_from(&settings_path()).with_env_overrides()
}

pub fn save_settings_to(path: &Path, settings: &ClientSettings) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, serde_json::to_string_pretty(settings)?)?;
    Ok(())
}

/// Save settings to disk
pub fn save_settings(settings: &ClientSettings) -> Result<()> {
    save_settings_to(&settings_path(), settings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn test_default_settings() {
        let settings = ClientSettings::default();
        assert_eq!(settings.origin, "http://localhost:8888");
        assert_eq!(settings.execute_all_retries, 5);
        assert_eq!(settings.execute_all_interval_ms, 500);
        assert_eq!(settings.frame_format, FrameFormat::Identity);
    }

    #[test]
    fn test_deserialize_partial_file() {
        let json = r#"{"origin": "https://plas.example.org", "frame_format": "legacy"}"#;
        let parsed: ClientSettings = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.origin, "https://plas.example.org");
        assert_eq!(parsed.frame_format, FrameFormat::Legacy);
        assert_eq!(parsed.request_timeout_secs, 30);
    }

    #[test]
    fn test_kernel_options_from_settings() {
        let settings = ClientSettings {
            execute_all_retries: 2,
            execute_all_interval_ms: 50,
            ..Default::default()
        };
        let options = settings.kernel_options();
        assert_eq!(options.execute_all_retries, 2);
        assert_eq!(options.execute_all_interval, Duration::from_millis(50));
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("settings.json");
        let settings = ClientSettings {
            origin: "http://10.0.0.5:8888".to_string(),
            ..Default::default()
        };

        save_settings_to(&path, &settings).unwrap();
        assert_eq!(load_settings_from(&path), settings);
    }

    #[test]
    fn test_corrupt_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "{not json").unwrap();
        assert_eq!(load_settings_from(&path), ClientSettings::default());
    }

    #[test]
    #[serial]
    fn test_env_origin_override() {
        std::env::set_var(ORIGIN_ENV, "http://override:9000");
        let settings = ClientSettings::default().with_env_overrides();
        std::env::remove_var(ORIGIN_ENV);
        assert_eq!(settings.origin, "http://override:9000");
    }

    #[test]
    #[serial]
    fn test_blank_env_origin_is_ignored() {
        std::env::set_var(ORIGIN_ENV, "  ");
        let settings = ClientSettings::default().with_env_overrides();
        std::env::remove_var(ORIGIN_ENV);
        assert_eq!(settings.origin, "http://localhost:8888");
    }

    #[test]
    fn test_settings_path_is_valid() {
        assert!(settings_path().ends_with("plas/settings.json"));
    }
}
