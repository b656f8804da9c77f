#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppErrorDetail {
    Message(String),
    Io {
        kind: std::io::ErrorKind,
        message: String,
    },
}

impl std::fmt::Display for AppErrorDetail {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Message(message) => write!(f, "{message}"),
            Self::Io { kind, message } => write!(f, "{kind}: {message}"),
        }
    }
}

impl From<String> for AppErrorDetail {
    fn from(value: String) -> Self {
        Self::Message(value)
    }
}

impl From<&str> for AppErrorDetail {
    fn from(value: &str) -> Self {
        Self::Message(value.to_string())
    }
}

impl From<std::io::Error> for AppErrorDetail {
    fn from(error: std::io::Error) -> Self {
        Self::Io {
            kind: error.kind(),
            message: error.to_string(),
        }
    }
}

impl From<keyward_platform::AppPathsError> for AppErrorDetail {
    fn from(value: keyward_platform::AppPathsError) -> Self {
        Self::Message(value.to_string())
    }
}

impl From<keyward_core::LicenseError> for AppErrorDetail {
    fn from(value: keyward_core::LicenseError) -> Self {
        Self::Message(value.to_string())
    }
}

impl From<keyward_core::UpdateError> for AppErrorDetail {
    fn from(value: keyward_core::UpdateError) -> Self {
        Self::Message(value.to_string())
    }
}

impl From<keyward_core::DownloadError> for AppErrorDetail {
    fn from(value: keyward_core::DownloadError) -> Self {
        Self::Message(value.to_string())
    }
}

impl From<keyward_core::InstallError> for AppErrorDetail {
    fn from(value: keyward_core::InstallError) -> Self {
        Self::Message(value.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppError {
    NotConfigured {
        settings_file: String,
    },
    PathsUnavailable {
        details: AppErrorDetail,
    },
    ClientSetupFailed {
        component: &'static str,
        details: AppErrorDetail,
    },
    LicenseCheckFailed {
        details: AppErrorDetail,
    },
    LicenseMissing,
    UpdateFailed {
        release: String,
        details: AppErrorDetail,
    },
}

impl AppError {
    pub fn not_configured(settings_file: &std::path::Path) -> Self {
        Self::NotConfigured {
            settings_file: settings_file.display().to_string(),
        }
    }

    pub fn paths_unavailable(details: impl Into<AppErrorDetail>) -> Self {
        Self::PathsUnavailable {
            details: details.into(),
        }
    }

    pub fn client_setup_failed(component: &'static str, details: impl Into<AppErrorDetail>) -> Self {
        Self::ClientSetupFailed {
            component,
            details: details.into(),
        }
    }

    pub fn license_check_failed(details: impl Into<AppErrorDetail>) -> Self {
        Self::LicenseCheckFailed {
            details: details.into(),
        }
    }

    pub fn update_failed(release: impl Into<String>, details: impl Into<AppErrorDetail>) -> Self {
        Self::UpdateFailed {
            release: release.into(),
            details: details.into(),
        }
    }
}

impl std::fmt::Display for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotConfigured { settings_file } => write!(
                f,
                "No account or product configured; set them in {settings_file}"
            ),
            Self::PathsUnavailable { details } => {
                write!(f, "Could not locate application directories: {details}")
            }
            Self::ClientSetupFailed { component, details } => {
                write!(f, "Failed to set up {component}: {details}")
            }
            Self::LicenseCheckFailed { details } => {
                write!(f, "License validation failed: {details}")
            }
            Self::LicenseMissing => write!(f, "No valid license key entered"),
            Self::UpdateFailed { release, details } => {
                write!(f, "Update {release} failed: {details}")
            }
        }
    }
}

impl std::error::Error for AppError {}
