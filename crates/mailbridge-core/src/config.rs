//! Process-wide configuration and state.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{PoisonError, RwLock};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::{Error, Result};

/// Directory name used under the platform config and cache directories.
const APP_DIR: &str = "mailbridge";

/// File holding persisted preferences.
const PREFERENCES_FILE: &str = "prefs.json";

/// Preferences that persist across sessions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Preferences {
    /// Buffer size of the update channel consumed by the protocol server.
    pub update_channel_capacity: usize,
    /// Whether the API may be reached through an alternative proxy.
    pub allow_proxy: bool,
}

impl Default for Preferences {
    fn default() -> Self {
        Self {
            update_channel_capacity: 64,
            allow_proxy: false,
        }
    }
}

/// Configuration and process-wide state shared by the session layer.
#[derive(Debug)]
pub struct Config {
    config_dir: PathBuf,
    cache_dir: PathBuf,
    preferences: RwLock<Preferences>,
    /// One-way flag: once set it stays set until the process restarts.
    outdated: AtomicBool,
}

impl Config {
    /// Creates a configuration rooted at the given directories, with default preferences.
    #[must_use]
    pub fn new(config_dir: impl Into<PathBuf>, cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            config_dir: config_dir.into(),
            cache_dir: cache_dir.into(),
            preferences: RwLock::new(Preferences::default()),
            outdated: AtomicBool::new(false),
        }
    }

    /// Creates a configuration in the platform's config and cache directories.
    ///
    /// # Errors
    ///
    /// Returns an error if the platform directories cannot be determined.
    pub fn default_paths() -> Result<Self> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| Error::Config("no config directory on this platform".into()))?
            .join(APP_DIR);
        let cache_dir = dirs::cache_dir()
            .ok_or_else(|| Error::Config("no cache directory on this platform".into()))?
            .join(APP_DIR);
        Ok(Self::new(config_dir, cache_dir))
    }

    /// Creates a configuration and loads persisted preferences.
    ///
    /// # Errors
    ///
    /// Returns an error if the preferences file exists but cannot be read.
    pub async fn load(config_dir: impl Into<PathBuf>, cache_dir: impl Into<PathBuf>) -> Result<Self> {
        let config = Self::new(config_dir, cache_dir);
        config.load_preferences().await?;
        Ok(config)
    }

    /// Returns the configuration directory.
    #[must_use]
    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    /// Returns the cache directory (mail stores live below it).
    #[must_use]
    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Returns the path of the preferences file.
    #[must_use]
    pub fn preferences_path(&self) -> PathBuf {
        self.config_dir.join(PREFERENCES_FILE)
    }

    /// Returns the current preferences.
    #[must_use]
    pub fn preferences(&self) -> Preferences {
        self.preferences
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Reloads preferences from disk. A missing file yields the defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub async fn load_preferences(&self) -> Result<Preferences> {
        let path = self.preferences_path();
        let preferences = if path.exists() {
            let contents = tokio::fs::read_to_string(&path).await?;
            serde_json::from_str(&contents)?
        } else {
            debug!("No preferences file at {:?}, using defaults", path);
            Preferences::default()
        };

        self.set_preferences(preferences.clone());
        Ok(preferences)
    }

    /// Stores preferences in memory and on disk.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub async fn save_preferences(&self, preferences: Preferences) -> Result<()> {
        tokio::fs::create_dir_all(&self.config_dir).await?;

        let path = self.preferences_path();
        let contents = serde_json::to_string_pretty(&preferences)?;
        tokio::fs::write(&path, contents).await?;
        self.set_preferences(preferences);

        info!("Preferences saved to {:?}", path);
        Ok(())
    }

    /// Removes cached data and preferences, resetting preferences to defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if an existing file or directory cannot be removed.
    pub async fn clear_data(&self) -> Result<()> {
        if self.cache_dir.exists() {
            tokio::fs::remove_dir_all(&self.cache_dir).await?;
        }

        let path = self.preferences_path();
        if path.exists() {
            tokio::fs::remove_file(&path).await?;
        }

        self.set_preferences(Preferences::default());
        info!("Cleared cache and preferences");
        Ok(())
    }

    /// Marks the application as too old for the API.
    ///
    /// There is no way back: a restart with an upgraded binary clears it.
    pub fn mark_application_outdated(&self) {
        if !self.outdated.swap(true, Ordering::SeqCst) {
            warn!("Application is outdated and must be upgraded");
        }
    }

    /// Returns true once the application was marked outdated.
    #[must_use]
    pub fn is_application_outdated(&self) -> bool {
        self.outdated.load(Ordering::SeqCst)
    }

    fn set_preferences(&self, preferences: Preferences) {
        *self
            .preferences
            .write()
            .unwrap_or_else(PoisonError::into_inner) = preferences;
    }
}
