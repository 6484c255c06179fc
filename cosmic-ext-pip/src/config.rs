//! Application Configuration
//!
//! Configuration management for the PiP tool. The file lives at
//! `~/.config/cosmic/cosmic-ext-pip/config.toml` and is created with
//! defaults on first start.

use anyhow::{Context, Result};
use cosmic_ext_pip_controller::ControllerConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Application configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Session controller tunables
    #[serde(default)]
    pub controller: ControllerConfig,

    /// Screen capture portal options
    #[serde(default)]
    pub capture: CaptureConfig,

    /// Floating window options
    #[serde(default)]
    pub presenter: PresenterConfig,
}

/// Screen capture configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureConfig {
    /// How the cursor appears in the captured stream
    #[serde(default)]
    pub cursor_mode: CursorModeConfig,

    /// Which kinds of sources the portal picker offers
    #[serde(default = "default_source_types")]
    pub source_types: Vec<SourceTypeConfig>,
}

/// Cursor mode requested from the portal
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CursorModeConfig {
    /// Cursor not shown
    Hidden,
    /// Cursor baked into the video stream
    #[default]
    Embedded,
    /// Cursor sent as separate metadata
    Metadata,
}

/// Capture source kind offered by the portal picker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceTypeConfig {
    /// Whole monitors
    Monitor,
    /// Single windows
    Window,
    /// Virtual outputs
    Virtual,
}

/// Floating window configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresenterConfig {
    /// GStreamer video sink element used for the floating window
    #[serde(default = "default_video_sink")]
    pub video_sink: String,
}

fn default_source_types() -> Vec<SourceTypeConfig> {
    vec![SourceTypeConfig::Monitor, SourceTypeConfig::Window]
}

fn default_video_sink() -> String {
    "autovideosink".to_string()
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            cursor_mode: CursorModeConfig::default(),
            source_types: default_source_types(),
        }
    }
}

impl Default for PresenterConfig {
    fn default() -> Self {
        Self {
            video_sink: default_video_sink(),
        }
    }
}

impl CaptureConfig {
    /// Check whether a source kind is enabled
    pub fn offers(&self, source_type: SourceTypeConfig) -> bool {
        self.source_types.contains(&source_type)
    }
}

impl Config {
    /// Default configuration file path
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from(".config"))
            .join("cosmic")
            .join("cosmic-ext-pip")
            .join("config.toml")
    }

    /// Load configuration from the default path, creating it if not found
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::default_path())
    }

    /// Load configuration from `path`, creating a default file if not found
    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let contents = fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file {}", path.display()))?;
            let config: Config = toml::from_str(&contents)
                .with_context(|| format!("Failed to parse config file {}", path.display()))?;
            Ok(config)
        } else {
            let config = Config::default();
            config.save_to(path)?;
            Ok(config)
        }
    }

    /// Save configuration to `path`
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir).context("Failed to create config directory")?;
        }

        let contents = toml::to_string_pretty(self).context("Failed to serialize config")?;
        fs::write(path, contents).context("Failed to write config file")?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.controller.error_revert_delay(), Duration::from_secs(2));
        assert_eq!(config.capture.cursor_mode, CursorModeConfig::Embedded);
        assert!(config.capture.offers(SourceTypeConfig::Monitor));
        assert!(config.capture.offers(SourceTypeConfig::Window));
        assert!(!config.capture.offers(SourceTypeConfig::Virtual));
        assert_eq!(config.presenter.video_sink, "autovideosink");
    }

    #[test]
    fn test_config_serialization() {
        let config = Config::default();
        let toml_str = toml::to_string(&config).unwrap();
        let parsed: Config = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let config: Config = toml::from_str(
            r#"
            [capture]
            cursor_mode = "metadata"
            source_types = ["window"]
            "#,
        )
        .unwrap();

        assert_eq!(config.capture.cursor_mode, CursorModeConfig::Metadata);
        assert!(!config.capture.offers(SourceTypeConfig::Monitor));
        assert!(config.capture.offers(SourceTypeConfig::Window));
        assert_eq!(config.controller, ControllerConfig::default());
        assert_eq!(config.presenter, PresenterConfig::default());
    }

    #[test]
    fn test_load_creates_default_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config, Config::default());
        assert!(path.exists());

        let reloaded = Config::load_from(&path).unwrap();
        assert_eq!(reloaded, config);
    }

    #[test]
    fn test_load_reads_existing_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(
            &path,
            "[controller]\nerror_revert_delay_ms = 500\n\n[presenter]\nvideo_sink = \"waylandsink\"\n",
        )
        .unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.controller.error_revert_delay_ms, 500);
        assert_eq!(config.presenter.video_sink, "waylandsink");
    }

    #[test]
    fn test_load_rejects_invalid_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "[capture]\ncursor_mode = \"sideways\"\n").unwrap();

        assert!(Config::load_from(&path).is_err());
    }
}
