use keyward_platform::TargetPlatform;

pub const DEFAULT_API_BASE_URL: &str = "https://api.keygen.sh";
pub const DEFAULT_DIST_BASE_URL: &str = "https://dist.keygen.sh";

/// Identifier of the running build. Compared by the distribution service, never
/// locally.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Version(String);

impl Version {
    #[must_use]
    pub fn new(version: impl Into<String>) -> Self {
        Self(version.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for Version {
    fn default() -> Self {
        Self::new(env!("CARGO_PKG_VERSION"))
    }
}

impl std::fmt::Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// License key the process was unlocked with.
#[derive(Clone, PartialEq, Eq)]
pub struct License(String);

impl License {
    #[must_use]
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    #[must_use]
    pub fn key(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for License {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("License(<redacted>)")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DistributionEndpoint {
    pub api_base_url: String,
    pub dist_base_url: String,
    pub account: String,
    pub product: String,
}

impl DistributionEndpoint {
    #[must_use]
    pub fn new(account: impl Into<String>, product: impl Into<String>) -> Self {
        Self {
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            dist_base_url: DEFAULT_DIST_BASE_URL.to_string(),
            account: account.into(),
            product: product.into(),
        }
    }

    #[must_use]
    pub fn with_api_base_url(mut self, url: impl Into<String>) -> Self {
        self.api_base_url = url.into();
        self
    }

    #[must_use]
    pub fn with_dist_base_url(mut self, url: impl Into<String>) -> Self {
        self.dist_base_url = url.into();
        self
    }
}

/// Everything an update check needs to know about who is asking.
///
/// Built once after the license gate passes and handed to the checker and
/// orchestrator; nothing reads these values from global state.
#[derive(Debug, Clone)]
pub struct UpdateContext {
    pub endpoint: DistributionEndpoint,
    pub platform: TargetPlatform,
    pub version: Version,
    pub license: License,
}

impl UpdateContext {
    #[must_use]
    pub fn new(endpoint: DistributionEndpoint, license: License) -> Self {
        Self {
            endpoint,
            platform: TargetPlatform::current(),
            version: Version::default(),
            license,
        }
    }

    #[must_use]
    pub fn with_version(mut self, version: Version) -> Self {
        self.version = version;
        self
    }

    #[must_use]
    pub fn with_platform(mut self, platform: TargetPlatform) -> Self {
        self.platform = platform;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::{DistributionEndpoint, License, UpdateContext, Version};

    #[test]
    fn license_debug_output_is_redacted() {
        let license = License::new("ABCD-1234-SECRET");
        let debug = format!("{license:?}");
        assert!(!debug.contains("SECRET"));

        let context = UpdateContext::new(DistributionEndpoint::new("acct", "prod"), license);
        assert!(!format!("{context:?}").contains("SECRET"));
    }

    #[test]
    fn default_version_is_package_version() {
        assert_eq!(Version::default().as_str(), env!("CARGO_PKG_VERSION"));
    }

    #[test]
    fn endpoint_builders_override_base_urls() {
        let endpoint = DistributionEndpoint::new("acct", "prod")
            .with_api_base_url("http://127.0.0.1:9000")
            .with_dist_base_url("http://127.0.0.1:9001");
        assert_eq!(endpoint.api_base_url, "http://127.0.0.1:9000");
        assert_eq!(endpoint.dist_base_url, "http://127.0.0.1:9001");
        assert_eq!(endpoint.account, "acct");
    }
}
