//! Configuration types for pactproxy

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use crate::pact::{Info, OperatingMode, RecordingMode, RequestMatching};
use crate::preprocess::{Preprocessor, PreprocessorConfig};
use crate::{ProxyError, Result};

/// Main configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Address the proxy listens on
    #[serde(default = "default_listen")]
    pub listen: SocketAddr,
    /// Backend the proxy forwards to
    #[serde(default)]
    pub base_url: String,
    /// Tenant stored in new pacts
    #[serde(default)]
    pub tenant: Option<String>,
    /// Backend version tag stored in new pacts
    #[serde(default)]
    pub version: Option<String>,
    /// Pact made current at startup
    #[serde(default)]
    pub pact_id: Option<String>,
    /// Operating mode
    #[serde(default)]
    pub mode: OperatingMode,
    /// Recording mode
    #[serde(default)]
    pub recording_mode: RecordingMode,
    /// Reject undeclared properties when validating in apply mode
    #[serde(default)]
    pub strict_matching: bool,
    /// Skip recording requests already present in the pact
    #[serde(default)]
    pub suppress_duplicates: bool,
    /// Reuse consumed records when no unconsumed one matches
    #[serde(default)]
    pub sequential_fallback: bool,
    /// Upstream request timeout in milliseconds
    #[serde(default = "default_upstream_timeout_ms")]
    pub upstream_timeout_ms: u64,
    /// Pact storage
    #[serde(default)]
    pub storage: StorageConfig,
    /// Matching options for new pacts
    #[serde(default)]
    pub request_matching: RequestMatching,
    /// Redaction rules
    #[serde(default)]
    pub preprocessor: PreprocessorConfig,
    /// Resource limits
    #[serde(default)]
    pub limits: LimitsConfig,
}

fn default_listen() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8181))
}

fn default_upstream_timeout_ms() -> u64 {
    60_000
}

/// Storage adapter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageKind {
    /// One JSON file per pact in a directory
    #[default]
    File,
    /// All pacts in a single binary archive
    Archive,
}

/// Storage configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Adapter
    #[serde(default)]
    pub kind: StorageKind,
    /// Directory (file) or archive path (archive)
    #[serde(default)]
    pub location: PathBuf,
}

/// Resource limits
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Maximum concurrent connections
    pub max_connections: usize,
    /// Maximum request size in bytes
    pub max_request_size: usize,
    /// Maximum response size in bytes
    pub max_response_size: usize,
    /// Maximum headers per request/response
    pub max_headers: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_connections: 1024,
            max_request_size: 16 * 1024 * 1024,   // 16 MB
            max_response_size: 256 * 1024 * 1024, // 256 MB
            max_headers: 128,
        }
    }
}

impl Config {
    /// Create a configuration with defaults for everything but the backend and storage
    #[must_use]
    pub fn new(base_url: &str, location: impl Into<PathBuf>) -> Self {
        Self {
            listen: default_listen(),
            base_url: base_url.to_string(),
            tenant: None,
            version: None,
            pact_id: None,
            mode: OperatingMode::default(),
            recording_mode: RecordingMode::default(),
            strict_matching: false,
            suppress_duplicates: false,
            sequential_fallback: false,
            upstream_timeout_ms: default_upstream_timeout_ms(),
            storage: StorageConfig {
                kind: StorageKind::File,
                location: location.into(),
            },
            request_matching: RequestMatching::default(),
            preprocessor: PreprocessorConfig::default(),
            limits: LimitsConfig::default(),
        }
    }

    /// Load configuration from TOML file
    ///
    /// # Errors
    ///
    /// Returns error if file cannot be read or parsed
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ProxyError::Config(format!("Failed to read config file: {e}")))?;

        let config: Self = toml::from_str(&content)
            .map_err(|e| ProxyError::Config(format!("Failed to parse config: {e}")))?;

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    ///
    /// # Errors
    ///
    /// Returns error if the backend URL, storage location, limits or
    /// preprocessor rules are invalid
    pub fn validate(&self) -> Result<()> {
        validate_base_url(&self.base_url)?;
        self.validate_storage()?;

        if self.upstream_timeout_ms == 0 {
            return Err(ProxyError::Config(
                "upstream_timeout_ms must be > 0".to_string(),
            ));
        }

        let limits = [
            ("max_connections", self.limits.max_connections),
            ("max_request_size", self.limits.max_request_size),
            ("max_response_size", self.limits.max_response_size),
            ("max_headers", self.limits.max_headers),
        ];
        if let Some((name, _)) = limits.iter().find(|(_, value)| *value == 0) {
            return Err(ProxyError::Config(format!("{name} must be > 0")));
        }

        Preprocessor::new(&self.preprocessor)?;

        Ok(())
    }

    fn validate_storage(&self) -> Result<()> {
        let location = &self.storage.location;
        if location.as_os_str().is_empty() {
            return Err(ProxyError::Config(
                "Storage location is not configured".to_string(),
            ));
        }

        match self.storage.kind {
            StorageKind::File => {
                if !location.is_dir() {
                    return Err(ProxyError::Config(format!(
                        "Storage directory does not exist: {}",
                        location.display()
                    )));
                }
            }
            StorageKind::Archive => {
                let parent = location
                    .parent()
                    .filter(|p| !p.as_os_str().is_empty())
                    .unwrap_or_else(|| Path::new("."));
                if !parent.is_dir() {
                    return Err(ProxyError::Config(format!(
                        "Archive directory does not exist: {}",
                        parent.display()
                    )));
                }
                if location.is_dir() {
                    return Err(ProxyError::Config(format!(
                        "Archive path is a directory: {}",
                        location.display()
                    )));
                }
            }
        }
        Ok(())
    }

    /// Metadata stored in pacts created by this configuration
    #[must_use]
    pub fn info(&self) -> Info {
        Info {
            base_url: self.base_url.trim_end_matches('/').to_string(),
            tenant: self.tenant.clone(),
            version: self.version.clone(),
            request_matching: self.request_matching.clone(),
        }
    }
}

fn validate_base_url(base_url: &str) -> Result<()> {
    if base_url.trim().is_empty() {
        return Err(ProxyError::Config("base_url is not configured".to_string()));
    }

    let rest = base_url
        .strip_prefix("http://")
        .or_else(|| base_url.strip_prefix("https://"))
        .ok_or_else(|| {
            ProxyError::Config(format!(
                "base_url must start with http:// or https://: {base_url}"
            ))
        })?;

    let authority = rest.split('/').next().unwrap_or_default();
    if authority.is_empty() || authority.contains(char::is_whitespace) {
        return Err(ProxyError::Config(format!(
            "base_url has no host: {base_url}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::{NamedTempFile, TempDir};

    #[test]
    fn test_config_parse() {
        let config_toml = r#"
            listen = "0.0.0.0:9000"
            base_url = "https://tenant.example.com"
            mode = "record"
            recording_mode = "refresh"
            suppress_duplicates = true

            [storage]
            kind = "archive"
            location = "/tmp/pacts.arc"

            [request_matching]
            ignore_url_parameters = ["dateFrom"]

            [preprocessor]
            obfuscate = ["body.password"]
            obfuscation_pattern = "<redacted>"

            [limits]
            max_connections = 8
            max_request_size = 1024
            max_response_size = 2048
            max_headers = 16
        "#;

        let config: Config = toml::from_str(config_toml).unwrap();
        assert_eq!(config.listen.port(), 9000);
        assert_eq!(config.mode, OperatingMode::Record);
        assert_eq!(config.recording_mode, RecordingMode::Refresh);
        assert!(config.suppress_duplicates);
        assert_eq!(config.storage.kind, StorageKind::Archive);
        assert_eq!(config.request_matching.ignore_url_parameters, vec!["dateFrom"]);
        assert!(config.request_matching.base_url_relative);
        assert_eq!(config.preprocessor.obfuscation_pattern, "<redacted>");
        assert_eq!(config.limits.max_connections, 8);
    }

    #[test]
    fn test_defaults() {
        let config: Config = toml::from_str(r#"base_url = "http://localhost:8080""#).unwrap();

        assert_eq!(config.mode, OperatingMode::Forward);
        assert_eq!(config.recording_mode, RecordingMode::Append);
        assert_eq!(config.upstream_timeout_ms, 60_000);
        assert_eq!(config.storage.kind, StorageKind::File);
        assert!(!config.strict_matching);
        assert_eq!(config.preprocessor, PreprocessorConfig::default());
    }

    #[test]
    fn test_from_file() {
        let dir = TempDir::new().unwrap();
        let mut file = NamedTempFile::new().unwrap();
        let config_toml = format!(
            "base_url = \"http://localhost:8080/\"\nmode = \"mock\"\n[storage]\nlocation = {:?}\n",
            dir.path().display().to_string()
        );
        file.write_all(config_toml.as_bytes()).unwrap();

        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.mode, OperatingMode::Mock);
        assert_eq!(config.info().base_url, "http://localhost:8080");
    }

    #[test]
    fn test_missing_base_url() {
        let dir = TempDir::new().unwrap();
        let mut config = Config::new("", dir.path());
        assert!(matches!(config.validate(), Err(ProxyError::Config(_))));

        config.base_url = "localhost:8080".to_string();
        assert!(config.validate().is_err());

        config.base_url = "http://".to_string();
        assert!(config.validate().is_err());

        config.base_url = "http://localhost:8080".to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_storage_location() {
        let dir = TempDir::new().unwrap();

        let missing = Config::new("http://localhost", dir.path().join("absent"));
        assert!(missing.validate().is_err());

        let unset = Config::new("http://localhost", "");
        assert!(unset.validate().is_err());

        let mut archive = Config::new("http://localhost", dir.path().join("pacts.arc"));
        archive.storage.kind = StorageKind::Archive;
        assert!(archive.validate().is_ok());

        archive.storage.location = dir.path().join("absent").join("pacts.arc");
        assert!(archive.validate().is_err());
    }

    #[test]
    fn test_invalid_limits_and_rules() {
        let dir = TempDir::new().unwrap();

        let mut config = Config::new("http://localhost", dir.path());
        config.limits.max_headers = 0;
        assert!(config.validate().is_err());

        let mut config = Config::new("http://localhost", dir.path());
        config.preprocessor.obfuscate = vec!["query.token".to_string()];
        assert!(config.validate().is_err());
    }
}
