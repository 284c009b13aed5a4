//! Configuration loading and management

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::hotkey::ComboModifier;
use crate::remap::{EditCommandClass, RemapConfig};

/// Remote desktop clients known out of the box
pub const DEFAULT_RDP_BUNDLE_IDS: [&str; 4] = [
    "com.microsoft.rdc.macos",
    "com.microsoft.rdc.macos.beta",
    "com.microsoft.rdc",
    "com.lemonmojo.RoyalTSX.App",
];

/// Daemon configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Path to the Unix domain socket for IPC
    pub socket_path: PathBuf,

    /// Directory for runtime data
    pub data_dir: PathBuf,

    /// Persisted user settings
    pub settings_path: PathBuf,
}

impl Config {
    /// Load configuration from environment and defaults
    pub fn load() -> Result<Self> {
        let home = std::env::var("HOME").context("HOME is not set")?;
        Ok(Self::with_data_dir(
            PathBuf::from(&home)
                .join(".local")
                .join("share")
                .join("layout-switcher"),
        ))
    }

    pub fn with_data_dir(data_dir: PathBuf) -> Self {
        Self {
            socket_path: data_dir.join("daemon.sock"),
            settings_path: data_dir.join("settings.json"),
            data_dir,
        }
    }

    /// Ensure data directory exists
    pub fn ensure_dirs(&self) -> Result<()> {
        std::fs::create_dir_all(&self.data_dir)
            .with_context(|| format!("failed to create {}", self.data_dir.display()))?;
        Ok(())
    }
}

/// User-facing options toggled from the menu bar
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Master switch for both filters
    pub enabled: bool,
    /// Second key of the Shift + X layout chord
    pub combo_modifier: ComboModifier,
    pub edit_classes: BTreeSet<EditCommandClass>,
    pub rdp_bundle_identifiers: BTreeSet<String>,
    /// Apply the Control -> Command remap inside remote desktop clients too
    pub rdp_remap_enabled: bool,
    pub ignore_fn_for_edit_combos: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            enabled: true,
            combo_modifier: ComboModifier::default(),
            edit_classes: BTreeSet::new(),
            rdp_bundle_identifiers: DEFAULT_RDP_BUNDLE_IDS
                .iter()
                .map(|id| id.to_string())
                .collect(),
            rdp_remap_enabled: true,
            ignore_fn_for_edit_combos: false,
        }
    }
}

impl Settings {
    /// Read settings, falling back to defaults when the file is missing or
    /// unreadable
    pub fn load(path: &Path) -> Self {
        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(?path, "no settings file, using defaults");
                return Self::default();
            }
            Err(e) => {
                warn!(?path, error = %e, "failed to read settings, using defaults");
                return Self::default();
            }
        };

        match serde_json::from_str(&raw) {
            Ok(settings) => settings,
            Err(e) => {
                warn!(?path, error = %e, "corrupt settings file, using defaults");
                Self::default()
            }
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).context("failed to create settings directory")?;
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)
            .with_context(|| format!("failed to write {}", path.display()))?;
        Ok(())
    }

    /// Remap view of these settings for the key-down filter
    pub fn remap_config(&self) -> RemapConfig {
        RemapConfig::new(
            self.edit_classes.clone(),
            self.rdp_bundle_identifiers.clone(),
            self.rdp_remap_enabled,
            self.ignore_fn_for_edit_combos,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_load() {
        let config = Config::load().unwrap();
        assert!(config.socket_path.to_string_lossy().contains("layout-switcher"));
        assert!(config.settings_path.ends_with("settings.json"));
    }

    #[test]
    fn test_default_settings() {
        let settings = Settings::default();
        assert!(settings.enabled);
        assert_eq!(settings.combo_modifier, ComboModifier::Control);
        assert!(settings.edit_classes.is_empty());
        assert!(settings.rdp_bundle_identifiers.contains("com.microsoft.rdc.macos"));
        assert!(settings.rdp_remap_enabled);
        assert!(!settings.ignore_fn_for_edit_combos);
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings::load(&dir.path().join("settings.json"));
        assert_eq!(settings, Settings::default());
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("settings.json");

        let mut settings = Settings::default();
        settings.combo_modifier = ComboModifier::Fn;
        settings.edit_classes.insert(EditCommandClass::CopyPaste);
        settings.rdp_remap_enabled = false;
        settings.save(&path).unwrap();

        assert_eq!(Settings::load(&path), settings);
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"edit_classes":["undo_redo","find"]}"#).unwrap();

        let settings = Settings::load(&path);
        assert!(settings.enabled);
        assert_eq!(settings.edit_classes.len(), 2);
        assert_eq!(settings.rdp_bundle_identifiers.len(), 4);
    }

    #[test]
    fn test_saved_disabled_switch_overrides_default() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"enabled":false}"#).unwrap();

        let settings = Settings::load(&path);
        assert!(!settings.enabled);
        assert_eq!(settings.combo_modifier, ComboModifier::Control);
    }

    #[test]
    fn test_corrupt_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "{not json").unwrap();

        assert_eq!(Settings::load(&path), Settings::default());
    }

    #[test]
    fn test_remap_config_derives_key_codes() {
        let mut settings = Settings::default();
        settings.edit_classes.insert(EditCommandClass::UndoRedo);
        let remap = settings.remap_config();
        assert!(remap.enabled_key_codes().contains(&6));
        assert!(remap.is_rdp_app("com.lemonmojo.RoyalTSX.App"));
    }
}
