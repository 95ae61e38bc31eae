//! # Version & Platform Resolution
//!
//! Works out *which* compiler binary an invocation needs: the protoc version
//! (from flags, the project file, or [`DEFAULT_PROTOC_VERSION`]) and the host
//! operating system / architecture pair. Together they form the [`CacheKey`].
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// The protoc release used when nothing else is configured.
pub const DEFAULT_PROTOC_VERSION: &str = "29.3";

#[derive(Debug, thiserror::Error)]
pub enum PlatformError {
    #[error("Invalid protoc version '{0}'")]
    InvalidVersion(String),
    #[error("Unsupported platform: os '{os}', architecture '{arch}'")]
    Unsupported { os: String, arch: String },
}

/// A protoc release label such as `29.3` or `3.20.3`.
///
/// Selected once per invocation and never changed afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ToolchainVersion(String);

impl ToolchainVersion {
    pub fn parse(raw: &str) -> Result<Self, PlatformError> {
        let raw = raw.trim().trim_start_matches('v');

        let valid = !raw.is_empty()
            && raw.starts_with(|c: char| c.is_ascii_digit())
            && raw
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '-');

        if valid {
            Ok(Self(raw.to_string()))
        } else {
            Err(PlatformError::InvalidVersion(raw.to_string()))
        }
    }

    /// Version label for binaries fetched from an explicit URL.
    ///
    /// The label is derived from the URL so that two different overrides never
    /// share a cache slot, and neither collides with a release version.
    pub fn custom(url: &str) -> Self {
        let digest = hex::encode(Sha256::digest(url.as_bytes()));
        Self(format!("custom-{}", &digest[..16]))
    }

    /// Picks the effective version: an explicit value wins over the default.
    pub fn resolve(configured: Option<&str>) -> Result<Self, PlatformError> {
        Self::parse(configured.unwrap_or(DEFAULT_PROTOC_VERSION))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ToolchainVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Os {
    Linux,
    Macos,
    Windows,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Arch {
    X86_64,
    Aarch64,
    X86,
    Powerpc64le,
    S390x,
}

impl Os {
    pub fn as_str(&self) -> &'static str {
        match self {
            Os::Linux => "linux",
            Os::Macos => "macos",
            Os::Windows => "windows",
        }
    }
}

impl Arch {
    pub fn as_str(&self) -> &'static str {
        match self {
            Arch::X86_64 => "x86_64",
            Arch::Aarch64 => "aarch64",
            Arch::X86 => "x86",
            Arch::Powerpc64le => "powerpc64le",
            Arch::S390x => "s390x",
        }
    }
}

/// An operating system / architecture pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Platform {
    pub os: Os,
    pub arch: Arch,
}

impl Platform {
    /// The platform this process runs on.
    pub fn current() -> Result<Self, PlatformError> {
        Self::from_names(std::env::consts::OS, std::env::consts::ARCH)
    }

    /// Maps Rust's `std::env::consts` names onto a supported platform.
    pub fn from_names(os: &str, arch: &str) -> Result<Self, PlatformError> {
        let unsupported = || PlatformError::Unsupported {
            os: os.to_string(),
            arch: arch.to_string(),
        };

        let parsed_os = match os {
            "linux" => Os::Linux,
            "macos" => Os::Macos,
            "windows" => Os::Windows,
            _ => return Err(unsupported()),
        };

        let parsed_arch = match arch {
            "x86_64" => Arch::X86_64,
            "aarch64" => Arch::Aarch64,
            "x86" => Arch::X86,
            "powerpc64" | "powerpc64le" => Arch::Powerpc64le,
            "s390x" => Arch::S390x,
            _ => return Err(unsupported()),
        };

        let platform = Self {
            os: parsed_os,
            arch: parsed_arch,
        };

        // Fail early for pairs protoc is not released for
        platform.release_label().ok_or_else(unsupported)?;
        Ok(platform)
    }

    /// The platform suffix used in protoc release asset names.
    pub fn release_label(&self) -> Option<&'static str> {
        match (self.os, self.arch) {
            (Os::Linux, Arch::X86_64) => Some("linux-x86_64"),
            (Os::Linux, Arch::Aarch64) => Some("linux-aarch_64"),
            (Os::Linux, Arch::X86) => Some("linux-x86_32"),
            (Os::Linux, Arch::Powerpc64le) => Some("linux-ppcle_64"),
            (Os::Linux, Arch::S390x) => Some("linux-s390_64"),
            (Os::Macos, Arch::X86_64) => Some("osx-x86_64"),
            (Os::Macos, Arch::Aarch64) => Some("osx-aarch_64"),
            (Os::Windows, Arch::X86_64) => Some("win64"),
            (Os::Windows, Arch::X86) => Some("win32"),
            _ => None,
        }
    }

    /// File name of the compiler executable on this platform.
    pub fn executable_name(&self) -> &'static str {
        match self.os {
            Os::Windows => "protoc.exe",
            _ => "protoc",
        }
    }
}

/// Uniquely identifies one cached compiler binary.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub version: ToolchainVersion,
    pub platform: Platform,
}

impl CacheKey {
    pub fn new(version: ToolchainVersion, platform: Platform) -> Self {
        Self { version, platform }
    }

    /// Relative directory of this key inside the cache root.
    pub fn relative_dir(&self) -> std::path::PathBuf {
        std::path::PathBuf::from(self.version.as_str()).join(format!(
            "{}-{}",
            self.platform.os.as_str(),
            self.platform.arch.as_str()
        ))
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "protoc {} ({}/{})",
            self.version,
            self.platform.os.as_str(),
            self.platform.arch.as_str()
        )
    }
}
