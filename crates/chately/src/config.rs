use anyhow::{Context, Result};
use chately_sync::SyncConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// CLI configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Signed-in user id
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,

    /// Display name written to the profile on first sign-in
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,

    /// Tunables passed to the sync engine
    #[serde(default)]
    pub sync: SyncConfig,

    /// Path to the config file
    #[serde(skip)]
    pub path: PathBuf,
}

impl Config {
    /// Load config from the data directory
    pub fn load(data_dir: &Path) -> Result<Self> {
        let config_path = data_dir.join("config.json");

        if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)
                .context("Failed to read config file")?;
            let mut config: Config = serde_json::from_str(&content)
                .context("Failed to parse config file")?;
            config.sync.validate().context("Invalid sync settings")?;
            config.path = config_path;
            Ok(config)
        } else {
            Ok(Config {
                path: config_path,
                ..Default::default()
            })
        }
    }

    /// Save config to disk
    pub fn save(&self) -> Result<()> {
        let content = serde_json::to_string_pretty(self)
            .context("Failed to serialize config")?;
        std::fs::write(&self.path, content)
            .context("Failed to write config file")?;
        Ok(())
    }

    pub fn set_user(&mut self, uid: &str, display_name: Option<String>) -> Result<()> {
        self.user = Some(uid.to_string());
        self.display_name = display_name;
        self.save()
    }

    pub fn clear_user(&mut self) -> Result<()> {
        self.user = None;
        self.display_name = None;
        self.save()
    }

    pub fn is_logged_in(&self) -> bool {
        self.user.is_some()
    }
}
