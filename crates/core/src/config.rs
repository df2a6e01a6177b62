use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::Result;
use crate::paths::Paths;

/// Settings for the browser process the bridge launches and controls.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BrowserConfig {
    /// Run the browser without a visible window. The bridge drives a real,
    /// visible browser by default so a human can watch the agent work.
    #[serde(default)]
    pub headless: bool,
    #[serde(default = "default_window_width")]
    pub window_width: u32,
    #[serde(default = "default_window_height")]
    pub window_height: u32,
    /// Explicit browser binary. If unset, well-known install locations and
    /// `$PATH` are searched.
    #[serde(default)]
    pub binary: Option<String>,
    /// Extra command-line flags appended after the bridge's own flags.
    #[serde(default)]
    pub extra_args: Vec<String>,
}

fn default_window_width() -> u32 {
    1280
}

fn default_window_height() -> u32 {
    720
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            headless: false,
            window_width: default_window_width(),
            window_height: default_window_height(),
            binary: None,
            extra_args: Vec::new(),
        }
    }
}

/// Settings for the control-protocol client attached to the browser.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientConfig {
    /// Command used when registering a protocol client. The client attaches
    /// to the already-running browser; it must never launch one of its own.
    #[serde(default = "default_client_command")]
    pub command: String,
}

fn default_client_command() -> String {
    "browser-mcp".to_string()
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            command: default_client_command(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[serde(default)]
    pub browser: BrowserConfig,
    #[serde(default)]
    pub client: ClientConfig,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&content)?;
        Ok(config)
    }

    pub fn load_or_default(paths: &Paths) -> Result<Self> {
        let config_path = paths.config_file();
        if config_path.exists() {
            Self::load(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = Config::default();
        assert!(!cfg.browser.headless);
        assert_eq!(cfg.browser.window_width, 1280);
        assert_eq!(cfg.browser.window_height, 720);
        assert_eq!(cfg.client.command, "browser-mcp");
    }

    #[test]
    fn test_partial_config_fills_defaults() {
        let raw = r#"{ "browser": { "headless": true } }"#;
        let cfg: Config = serde_json::from_str(raw).unwrap();
        assert!(cfg.browser.headless);
        assert_eq!(cfg.browser.window_width, 1280);
        assert_eq!(cfg.client.command, "browser-mcp");
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");

        let mut cfg = Config::default();
        cfg.browser.headless = true;
        cfg.browser.binary = Some("/usr/bin/chromium".to_string());
        cfg.save(&path).unwrap();

        let loaded = Config::load(&path).unwrap();
        assert!(loaded.browser.headless);
        assert_eq!(loaded.browser.binary.as_deref(), Some("/usr/bin/chromium"));
    }
}
