use std::path::{Path, PathBuf};
use std::time::Duration;

use keyward_core::{DEFAULT_API_BASE_URL, DEFAULT_DIST_BASE_URL, DistributionEndpoint};
use keyward_platform::AppPaths;
use serde::{Deserialize, Serialize};

pub const LICENSE_ENV: &str = "KEYWARD_LICENSE";
pub const DEBUG_ENV: &str = "KEYWARD_DEBUG";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppSettings {
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,

    #[serde(default = "default_dist_base_url")]
    pub dist_base_url: String,

    #[serde(default)]
    pub account: String,

    #[serde(default)]
    pub product: String,

    #[serde(default = "default_check_interval")]
    pub check_interval_secs: u64,

    #[serde(default = "default_http_timeout")]
    pub http_timeout_secs: u64,

    #[serde(default = "default_progress_interval")]
    pub progress_interval_ms: u64,

    #[serde(default)]
    pub download_dir: Option<PathBuf>,

    #[serde(default)]
    pub debug_logging: bool,

    #[serde(default = "default_max_log_size_bytes")]
    pub max_log_size_bytes: u64,
}

fn default_api_base_url() -> String {
    DEFAULT_API_BASE_URL.to_string()
}

fn default_dist_base_url() -> String {
    DEFAULT_DIST_BASE_URL.to_string()
}

fn default_check_interval() -> u64 {
    15 * 60
}

fn default_http_timeout() -> u64 {
    30
}

fn default_progress_interval() -> u64 {
    50
}

fn default_max_log_size_bytes() -> u64 {
    5 * 1024 * 1024
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            api_base_url: default_api_base_url(),
            dist_base_url: default_dist_base_url(),
            account: String::new(),
            product: String::new(),
            check_interval_secs: default_check_interval(),
            http_timeout_secs: default_http_timeout(),
            progress_interval_ms: default_progress_interval(),
            download_dir: None,
            debug_logging: false,
            max_log_size_bytes: default_max_log_size_bytes(),
        }
    }
}

impl AppSettings {
    pub fn load() -> Self {
        let Ok(paths) = AppPaths::new() else {
            return Self::default();
        };
        let mut settings = Self::load_from(&paths.settings_file());
        if env_flag(std::env::var(DEBUG_ENV).ok().as_deref()) {
            settings.debug_logging = true;
        }
        settings
    }

    pub fn load_from(path: &Path) -> Self {
        if !path.exists() {
            return Self::default();
        }
        match std::fs::read_to_string(path) {
            Ok(content) => serde_json::from_str(&content).unwrap_or_else(|error| {
                log::warn!("Ignoring unreadable settings {}: {error}", path.display());
                Self::default()
            }),
            Err(_) => Self::default(),
        }
    }

    pub fn save(&self) -> Result<(), std::io::Error> {
        let paths = AppPaths::new().map_err(std::io::Error::other)?;
        paths.ensure_dirs()?;
        self.save_to(&paths.settings_file())
    }

    pub fn save_to(&self, path: &Path) -> Result<(), std::io::Error> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)
    }

    pub fn is_configured(&self) -> bool {
        !self.account.trim().is_empty() && !self.product.trim().is_empty()
    }

    pub fn endpoint(&self) -> DistributionEndpoint {
        DistributionEndpoint::new(self.account.trim(), self.product.trim())
            .with_api_base_url(self.api_base_url.trim())
            .with_dist_base_url(self.dist_base_url.trim())
    }

    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_secs.max(1))
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs.max(1))
    }

    pub fn progress_interval(&self) -> Duration {
        Duration::from_millis(self.progress_interval_ms)
    }

    pub fn download_dir(&self, paths: &AppPaths) -> PathBuf {
        self.download_dir
            .clone()
            .unwrap_or_else(|| paths.download_dir())
    }
}

fn env_flag(value: Option<&str>) -> bool {
    matches!(
        value.map(|v| v.trim().to_ascii_lowercase()).as_deref(),
        Some("1" | "true" | "yes" | "on")
    )
}
