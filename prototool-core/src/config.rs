//! # Project Configuration
//!
//! The optional `prototool.json` file in the working directory. Every key is
//! optional; command-line flags override whatever is set here.
use serde::Deserialize;
use std::path::{Path, PathBuf};

pub const CONFIG_FILE_NAME: &str = "prototool.json";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read '{path}': '{source}'")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Invalid configuration in '{path}': '{source}'")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProjectConfig {
    pub protoc: ProtocConfig,
    pub lint: LintConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProtocConfig {
    /// Compiler version, e.g. `29.3`.
    pub version: Option<String>,
    /// Expected hex SHA-256 of the downloaded release archive.
    pub sha256: Option<String>,
    /// Extra import paths, relative to the working directory.
    pub includes: Vec<PathBuf>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LintConfig {
    /// Rule ids to disable.
    pub exclude: Vec<String>,
}

impl ProjectConfig {
    /// Loads `prototool.json` from `dir`, or the defaults if there is none.
    pub fn load(dir: &Path) -> Result<Self, ConfigError> {
        let path = dir.join(CONFIG_FILE_NAME);

        let raw = match std::fs::read(&path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(source) => return Err(ConfigError::Read { path, source }),
        };

        serde_json::from_slice(&raw).map_err(|source| ConfigError::Parse { path, source })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_means_defaults() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(ProjectConfig::load(dir.path()).unwrap(), ProjectConfig::default());
    }

    #[test]
    fn partial_files_fill_in_defaults() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(CONFIG_FILE_NAME),
            r#"{ "protoc": { "version": "3.20.1", "includes": ["vendor"] } }"#,
        )
        .unwrap();

        let config = ProjectConfig::load(dir.path()).unwrap();
        assert_eq!(config.protoc.version.as_deref(), Some("3.20.1"));
        assert_eq!(config.protoc.includes, [PathBuf::from("vendor")]);
        assert!(config.protoc.sha256.is_none());
        assert!(config.lint.exclude.is_empty());
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(CONFIG_FILE_NAME), r#"{ "protocc": {} }"#).unwrap();

        assert!(matches!(
            ProjectConfig::load(dir.path()),
            Err(ConfigError::Parse { .. })
        ));
    }
}
