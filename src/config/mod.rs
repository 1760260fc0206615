//! Configuration management for the MIDI router
//!
//! Handles loading, validating and hot-reloading the YAML configuration file.

pub mod watcher;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::fs;

use crate::action::{ActionBinding, ActionBindings};

pub use watcher::{ConfigChanges, ConfigUpdate, ConfigWatcher};

/// Root configuration structure
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct AppConfig {
    #[serde(default)]
    pub midi: MidiConfig,
    #[serde(default)]
    pub activity: ActivityConfig,
    /// Action bindings; the built-in defaults apply when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bindings: Option<Vec<ActionBinding>>,
}

/// MIDI input/output settings
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct MidiConfig {
    #[serde(default = "default_client_name")]
    pub client_name: String,
    /// Channel filter, 0-15 or -1 for omni
    #[serde(default = "default_channel")]
    pub channel: i8,
    /// Connect devices that have no stored preference
    #[serde(default = "default_true")]
    pub auto_connect_new_devices: bool,
    #[serde(default = "default_scan_interval")]
    pub scan_interval_ms: u64,
    /// Substring of an output port to drive as the synth
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_port: Option<String>,
    /// Channel used on the output port
    #[serde(default)]
    pub output_channel: u8,
}

/// Activity notification settings
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ActivityConfig {
    #[serde(default = "default_activity_window")]
    pub window_ms: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            midi: MidiConfig::default(),
            activity: ActivityConfig::default(),
            bindings: None,
        }
    }
}

impl Default for MidiConfig {
    fn default() -> Self {
        Self {
            client_name: default_client_name(),
            channel: default_channel(),
            auto_connect_new_devices: true,
            scan_interval_ms: default_scan_interval(),
            output_port: None,
            output_channel: 0,
        }
    }
}

impl Default for ActivityConfig {
    fn default() -> Self {
        Self {
            window_ms: default_activity_window(),
        }
    }
}

impl AppConfig {
    /// Load configuration from file with validation
    pub async fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read config file: {}", path))?;

        Self::parse(&contents).with_context(|| format!("Invalid config file: {}", path))
    }

    /// Parse and validate YAML text
    pub fn parse(contents: &str) -> Result<Self> {
        let config: AppConfig =
            serde_yaml::from_str(contents).context("Failed to parse YAML config")?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to file
    pub async fn save(&self, path: &str) -> Result<()> {
        let yaml = serde_yaml::to_string(self).context("Failed to serialize config to YAML")?;

        fs::write(path, yaml)
            .await
            .with_context(|| format!("Failed to write config file: {}", path))?;

        Ok(())
    }

    /// Validate configuration for correctness and consistency
    pub fn validate(&self) -> Result<()> {
        if self.midi.client_name.trim().is_empty() {
            anyhow::bail!("midi.client_name cannot be empty");
        }
        if !(-1..=15).contains(&self.midi.channel) {
            anyhow::bail!(
                "midi.channel must be -1 (omni) or 0-15, got {}",
                self.midi.channel
            );
        }
        if self.midi.output_channel > 15 {
            anyhow::bail!(
                "midi.output_channel must be 0-15, got {}",
                self.midi.output_channel
            );
        }
        if self.midi.scan_interval_ms == 0 {
            anyhow::bail!("midi.scan_interval_ms must be greater than 0");
        }
        if self.activity.window_ms == 0 {
            anyhow::bail!("activity.window_ms must be greater than 0");
        }

        if let Some(bindings) = &self.bindings {
            for (index, binding) in bindings.iter().enumerate() {
                if let Some(controller) = binding.controller {
                    if controller > 127 {
                        anyhow::bail!(
                            "bindings[{}] ({}): controller must be 0-127, got {}",
                            index,
                            binding.action,
                            controller
                        );
                    }
                }
            }
        }

        Ok(())
    }

    pub fn scan_interval(&self) -> Duration {
        Duration::from_millis(self.midi.scan_interval_ms)
    }

    pub fn activity_window(&self) -> Duration {
        Duration::from_millis(self.activity.window_ms)
    }

    /// Bindings to install on the router
    pub fn action_bindings(&self) -> ActionBindings {
        match &self.bindings {
            Some(bindings) => ActionBindings::new(bindings.clone()),
            None => ActionBindings::with_defaults(),
        }
    }
}

fn default_client_name() -> String {
    "midi-router".to_string()
}
fn default_channel() -> i8 {
    -1
}
fn default_true() -> bool {
    true
}
fn default_scan_interval() -> u64 {
    2000
}
fn default_activity_window() -> u64 {
    500
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::{ActionKind, ControllerAction};
    use tempfile::TempDir;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = AppConfig::parse("{}").unwrap();
        assert_eq!(config, AppConfig::default());
        assert_eq!(config.midi.channel, -1);
        assert_eq!(config.activity_window(), Duration::from_millis(500));
        assert!(config.action_bindings().is_bound(112));
    }

    #[test]
    fn test_full_config() {
        let yaml = r#"
midi:
  client_name: "studio"
  channel: 3
  auto_connect_new_devices: false
  scan_interval_ms: 500
  output_port: "FluidSynth"
  output_channel: 2
activity:
  window_ms: 250
bindings:
  - action: delay_mix
    kind: absolute
    controller: 91
  - action: reverb_toggle
    kind: on_off
    controller: 80
"#;
        let config = AppConfig::parse(yaml).unwrap();
        assert_eq!(config.midi.client_name, "studio");
        assert_eq!(config.midi.channel, 3);
        assert!(!config.midi.auto_connect_new_devices);
        assert_eq!(config.midi.output_port.as_deref(), Some("FluidSynth"));
        assert_eq!(config.scan_interval(), Duration::from_millis(500));

        let bindings = config.action_bindings();
        assert!(!bindings.is_bound(112));
        let bound: Vec<_> = bindings.for_controller(80).collect();
        assert_eq!(bound[0].action, ControllerAction::ReverbToggle);
        assert_eq!(bound[0].kind, Some(ActionKind::OnOff));
    }

    #[test]
    fn test_empty_binding_list_disables_defaults() {
        let config = AppConfig::parse("bindings: []").unwrap();
        assert!(config.action_bindings().bindings().is_empty());
    }

    #[test]
    fn test_validation_errors() {
        assert!(AppConfig::parse("midi:\n  channel: 16").is_err());
        assert!(AppConfig::parse("midi:\n  channel: -2").is_err());
        assert!(AppConfig::parse("midi:\n  scan_interval_ms: 0").is_err());
        assert!(AppConfig::parse("midi:\n  client_name: ' '").is_err());
        assert!(AppConfig::parse("activity:\n  window_ms: 0").is_err());
        assert!(AppConfig::parse("bindings:\n  - action: delay_mix\n    controller: 200").is_err());
        assert!(AppConfig::parse("bindings:\n  - action: nonsense").is_err());
    }

    #[tokio::test]
    async fn test_save_and_load() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let path = temp_dir.path().join("config.yaml");
        let path = path.to_string_lossy().to_string();

        let mut config = AppConfig::default();
        config.midi.channel = 5;
        config.save(&path).await?;

        let loaded = AppConfig::load(&path).await?;
        assert_eq!(loaded, config);
        Ok(())
    }

    #[tokio::test]
    async fn test_load_missing_file() {
        assert!(AppConfig::load("/nonexistent/config.yaml").await.is_err());
    }
}
