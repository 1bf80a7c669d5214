//! Server configuration
//!
//! Layered: defaults, then an optional TOML file, then environment
//! variables. The binary applies CLI flags last and calls
//! [`ServerConfig::validate`].

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{Result, StratusError};
use crate::runtime::RuntimeConfig;
use crate::storage::S3Config;
use crate::upload::{PoolConfig, UploadConfig};

/// Object store implementation to run against
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    S3,
    Memory,
}

impl std::str::FromStr for StoreBackend {
    type Err = StratusError;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "s3" => Ok(StoreBackend::S3),
            "memory" => Ok(StoreBackend::Memory),
            other => Err(StratusError::InvalidConfig {
                reason: format!("unknown store backend '{}' (expected s3 or memory)", other),
            }),
        }
    }
}

/// Log output format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter when `RUST_LOG` is unset
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: LogFormat::Text,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    /// Address the HTTP API listens on
    pub bind_addr: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8080".into(),
        }
    }
}

/// Complete server configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub store: StoreBackend,
    pub http: HttpConfig,
    pub s3: S3Config,
    pub upload: UploadConfig,
    pub pool: PoolConfig,
    pub runtime: RuntimeConfig,
    pub logging: LoggingConfig,
}

impl ServerConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| StratusError::InvalidConfig {
            reason: format!("cannot read {}: {}", path.display(), e),
        })?;
        Self::from_toml_str(&content)
    }

    /// Load configuration from a TOML string
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| StratusError::InvalidConfig {
            reason: e.to_string(),
        })
    }

    /// Apply overrides from the process environment
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_env_from(|name| std::env::var(name).ok())
    }

    /// Apply overrides from `lookup`
    pub fn apply_env_from<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(endpoint) = lookup("S3_ENDPOINT") {
            self.s3.endpoint = endpoint;
        }
        if let Some(bucket) = lookup("S3_BUCKET") {
            self.s3.bucket = bucket;
        }
        if let Some(region) = lookup("S3_REGION") {
            self.s3.region = region;
        }
        if let Some(access) = lookup("AWS_ACCESS_KEY_ID").or_else(|| lookup("S3_ACCESS_KEY")) {
            self.s3.access_key_id = Some(access);
        }
        if let Some(secret) = lookup("AWS_SECRET_ACCESS_KEY").or_else(|| lookup("S3_SECRET_KEY")) {
            self.s3.secret_access_key = Some(secret);
        }
        if let Some(bind) = lookup("BIND_ADDR") {
            self.http.bind_addr = bind;
        }
        if let Some(part_size) = lookup("UPLOAD_PART_SIZE") {
            self.upload.part_size = parse_number("UPLOAD_PART_SIZE", &part_size)?;
        }
        if let Some(parallelism) = lookup("UPLOAD_PARALLELISM") {
            self.pool.parallelism = parse_number("UPLOAD_PARALLELISM", &parallelism)?;
        }
        if let Some(backend) = lookup("STORE_BACKEND") {
            self.store = backend.parse()?;
        }
        Ok(())
    }

    /// Reject settings the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.upload.part_size == 0 {
            return Err(invalid("upload.part_size must be greater than zero"));
        }
        if self.upload.progress_interval == 0 {
            return Err(invalid("upload.progress_interval must be greater than zero"));
        }
        if self.pool.parallelism == 0 {
            return Err(invalid("pool.parallelism must be greater than zero"));
        }
        if self.http.bind_addr.parse::<std::net::SocketAddr>().is_err() {
            return Err(invalid(&format!(
                "http.bind_addr '{}' is not a socket address",
                self.http.bind_addr
            )));
        }
        if self.store == StoreBackend::S3 && self.s3.bucket.trim().is_empty() {
            return Err(invalid("s3.bucket is required for the s3 backend"));
        }
        Ok(())
    }
}

fn invalid(reason: &str) -> StratusError {
    StratusError::InvalidConfig {
        reason: reason.to_string(),
    }
}

fn parse_number<T: std::str::FromStr>(name: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| invalid(&format!("{} must be a number, got '{}'", name, value)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::upload::PermitScope;
    use std::collections::HashMap;

    #[test]
    fn test_defaults_are_valid() {
        let config = ServerConfig::default();
        config.validate().unwrap();
        assert_eq!(config.upload.part_size, 50 * 1024 * 1024);
        assert_eq!(config.store, StoreBackend::S3);
    }

    #[test]
    fn test_toml_partial_sections() {
        let config = ServerConfig::from_toml_str(
            r#"
            store = "memory"

            [upload]
            part_size = 8388608

            [pool]
            parallelism = 2
            permit_scope = "per_session"

            [logging]
            format = "json"
            "#,
        )
        .unwrap();

        assert_eq!(config.store, StoreBackend::Memory);
        assert_eq!(config.upload.part_size, 8 * 1024 * 1024);
        assert_eq!(config.upload.progress_interval, 50 * 1024 * 1024);
        assert_eq!(config.pool.permit_scope, PermitScope::PerSession);
        assert_eq!(config.logging.format, LogFormat::Json);
        assert_eq!(config.s3.bucket, "stratus");
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("S3_ENDPOINT", "http://minio:9000"),
            ("S3_ACCESS_KEY", "minio"),
            ("AWS_SECRET_ACCESS_KEY", "minio123"),
            ("UPLOAD_PARALLELISM", "8"),
            ("STORE_BACKEND", "Memory"),
        ]
        .into_iter()
        .collect();

        let mut config = ServerConfig::default();
        config
            .apply_env_from(|name| env.get(name).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.s3.endpoint, "http://minio:9000");
        assert_eq!(config.s3.access_key_id.as_deref(), Some("minio"));
        assert_eq!(config.s3.secret_access_key.as_deref(), Some("minio123"));
        assert_eq!(config.pool.parallelism, 8);
        assert_eq!(config.store, StoreBackend::Memory);
    }

    #[test]
    fn test_bad_env_number() {
        let mut config = ServerConfig::default();
        let result = config.apply_env_from(|name| {
            (name == "UPLOAD_PART_SIZE").then(|| "fifty".to_string())
        });
        assert!(matches!(result, Err(StratusError::InvalidConfig { .. })));
    }

    #[test]
    fn test_validate_rejects_zero() {
        let mut config = ServerConfig::default();
        config.pool.parallelism = 0;
        assert!(config.validate().is_err());

        let mut config = ServerConfig::default();
        config.upload.part_size = 0;
        assert!(config.validate().is_err());

        let mut config = ServerConfig::default();
        config.http.bind_addr = "nowhere".into();
        assert!(config.validate().is_err());
    }
}
