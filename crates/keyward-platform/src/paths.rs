use std::ffi::OsString;
use std::path::{Path, PathBuf};

use thiserror::Error;

const APP_DIR: &str = "keyward";
const HOME_OVERRIDE_VAR: &str = "KEYWARD_HOME";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("Could not determine the user {0} directory; set {HOME_OVERRIDE_VAR} instead")]
pub struct AppPathsError(&'static str);

/// Where keyward keeps its settings, downloads and log.
///
/// Settings live under the config directory. Everything that can be thrown
/// away (staged downloads, the log) lives under the cache directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppPaths {
    pub config_dir: PathBuf,
    pub cache_dir: PathBuf,
}

impl AppPaths {
    /// Resolve directories from `KEYWARD_HOME`, falling back to the
    /// platform's per-user config and cache directories.
    ///
    /// # Errors
    /// Returns an error when no override is set and the platform directories
    /// cannot be determined.
    pub fn new() -> Result<Self, AppPathsError> {
        Self::resolve(std::env::var_os(HOME_OVERRIDE_VAR))
    }

    fn resolve(home_override: Option<OsString>) -> Result<Self, AppPathsError> {
        if let Some(root) = home_override.filter(|root| !root.is_empty()) {
            return Ok(Self::rooted_at(Path::new(&root)));
        }
        let config = dirs::config_dir().ok_or(AppPathsError("config"))?;
        let cache = dirs::cache_dir().ok_or(AppPathsError("cache"))?;
        Ok(Self {
            config_dir: config.join(APP_DIR),
            cache_dir: cache.join(APP_DIR),
        })
    }

    #[must_use]
    pub fn rooted_at(root: &Path) -> Self {
        Self {
            config_dir: root.join("config"),
            cache_dir: root.join("cache"),
        }
    }

    #[must_use]
    pub fn settings_file(&self) -> PathBuf {
        self.config_dir.join("settings.json")
    }

    #[must_use]
    pub fn download_dir(&self) -> PathBuf {
        self.cache_dir.join("downloads")
    }

    #[must_use]
    pub fn log_file(&self) -> PathBuf {
        self.cache_dir.join("keyward.log")
    }

    /// # Errors
    /// Returns an error if the config or download directory cannot be created.
    pub fn ensure_dirs(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.config_dir)?;
        std::fs::create_dir_all(self.download_dir())
    }
}
