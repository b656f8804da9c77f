/// Platform identifier understood by the distribution service.
///
/// The service names platforms the way Go toolchains do (`darwin`, `amd64`,
/// ...), so Rust's `std::env::consts` values are translated before use.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TargetPlatform {
    pub os: String,
    pub arch: String,
}

impl TargetPlatform {
    /// The platform this binary was compiled for.
    #[must_use]
    pub fn current() -> Self {
        Self::from_rust(std::env::consts::OS, std::env::consts::ARCH)
    }

    #[must_use]
    pub fn from_rust(os: &str, arch: &str) -> Self {
        let os = match os {
            "macos" => "darwin",
            other => other,
        };
        let arch = match arch {
            "x86_64" => "amd64",
            "aarch64" => "arm64",
            "x86" => "386",
            "powerpc64" => "ppc64",
            "loongarch64" => "loong64",
            other => other,
        };
        Self {
            os: os.to_string(),
            arch: arch.to_string(),
        }
    }
}

impl std::fmt::Display for TargetPlatform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}", self.os, self.arch)
    }
}

#[cfg(test)]
mod tests {
    use super::TargetPlatform;

    #[test]
    fn rust_names_map_to_distribution_names() {
        assert_eq!(
            TargetPlatform::from_rust("macos", "aarch64").to_string(),
            "darwin-arm64"
        );
        assert_eq!(
            TargetPlatform::from_rust("linux", "x86_64").to_string(),
            "linux-amd64"
        );
        assert_eq!(
            TargetPlatform::from_rust("windows", "x86").to_string(),
            "windows-386"
        );
    }

    #[test]
    fn unknown_names_pass_through() {
        let platform = TargetPlatform::from_rust("freebsd", "riscv64");
        assert_eq!(platform.os, "freebsd");
        assert_eq!(platform.arch, "riscv64");
    }

    #[test]
    fn current_platform_is_never_empty() {
        let platform = TargetPlatform::current();
        assert!(!platform.os.is_empty());
        assert!(!platform.arch.is_empty());
        assert_ne!(platform.os, "macos");
        assert_ne!(platform.arch, "x86_64");
    }
}
