//! Configuration module
//!
//! Runtime configuration for the ingestion engine: metadata database, object
//! storage, quota policy and per-operation timeouts. Values come from the
//! environment (a `.env` file is loaded first when present).

use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::content_type::DEFAULT_ALLOWED_CONTENT_TYPES;
use crate::storage_types::{MetadataBackend, StorageBackend};

const GIB: u64 = 1024 * 1024 * 1024;

pub const MAX_FILE_SIZE_BYTES: u64 = GIB;
pub const MAX_PROJECT_SIZE_BYTES: u64 = 10 * GIB;
pub const MAX_SAMPLE_FILES: usize = 100;

const MAX_CONNECTIONS: u32 = 20;
const CONNECTION_TIMEOUT_SECS: u64 = 30;
const UPLOAD_TIMEOUT_SECS: u64 = 600;
const DOWNLOAD_TIMEOUT_SECS: u64 = 300;
const DELETE_TIMEOUT_SECS: u64 = 300;
const PRESIGNED_URL_TTL_SECS: u64 = 24 * 60 * 60;
const DEFAULT_S3_REGION: &str = "us-east-1";
const DEFAULT_PUBLIC_BASE_URL: &str = "http://localhost:9000";

/// Size and type limits applied during ingestion.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QuotaPolicy {
    pub max_file_size: u64,
    pub max_project_size: u64,
    pub max_sample_files: usize,
    pub allowed_content_types: Vec<String>,
}

impl Default for QuotaPolicy {
    fn default() -> Self {
        Self {
            max_file_size: MAX_FILE_SIZE_BYTES,
            max_project_size: MAX_PROJECT_SIZE_BYTES,
            max_sample_files: MAX_SAMPLE_FILES,
            allowed_content_types: DEFAULT_ALLOWED_CONTENT_TYPES
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

impl QuotaPolicy {
    pub fn is_allowed(&self, content_type: &str) -> bool {
        self.allowed_content_types
            .iter()
            .any(|allowed| allowed.eq_ignore_ascii_case(content_type))
    }

    pub fn with_max_file_size(mut self, bytes: u64) -> Self {
        self.max_file_size = bytes;
        self
    }

    pub fn with_max_project_size(mut self, bytes: u64) -> Self {
        self.max_project_size = bytes;
        self
    }

    pub fn with_max_sample_files(mut self, count: usize) -> Self {
        self.max_sample_files = count;
        self
    }

    pub fn with_allowed_content_types<I, S>(mut self, types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed_content_types = types.into_iter().map(Into::into).collect();
        self
    }
}

/// Time budgets for object storage operations
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OperationTimeouts {
    pub upload: Duration,
    pub download: Duration,
    pub delete: Duration,
}

impl Default for OperationTimeouts {
    fn default() -> Self {
        Self {
            upload: Duration::from_secs(UPLOAD_TIMEOUT_SECS),
            download: Duration::from_secs(DOWNLOAD_TIMEOUT_SECS),
            delete: Duration::from_secs(DELETE_TIMEOUT_SECS),
        }
    }
}

#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub backend: MetadataBackend,
    pub url: Option<String>,
    pub max_connections: u32,
    pub timeout_seconds: u64,
}

#[derive(Clone, Debug)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    pub bucket: Option<String>,
    pub region: String,
    /// Custom endpoint for S3-compatible providers (MinIO etc.)
    pub endpoint: Option<String>,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    /// Base for URLs handed out by backends that cannot sign
    pub public_base_url: String,
    pub presigned_url_ttl: Duration,
    pub timeouts: OperationTimeouts,
}

#[derive(Clone, Debug)]
pub struct Config {
    pub environment: String,
    pub database: DatabaseConfig,
    pub storage: StorageConfig,
    pub quota: QuotaPolicy,
    /// Where the validator spools uploads; system temp dir when unset
    pub spool_dir: Option<PathBuf>,
}

impl Config {
    pub fn from_env() -> Result<Self, anyhow::Error> {
        dotenvy::dotenv().ok();

        let environment = env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string());

        let metadata_backend = env::var("METADATA_BACKEND")
            .unwrap_or_else(|_| "postgres".to_string())
            .parse::<MetadataBackend>()?;

        let database = DatabaseConfig {
            backend: metadata_backend,
            url: env::var("DATABASE_URL").ok(),
            max_connections: number_from_env("DB_MAX_CONNECTIONS", MAX_CONNECTIONS)?,
            timeout_seconds: number_from_env("DB_TIMEOUT_SECONDS", CONNECTION_TIMEOUT_SECS)?,
        };

        let storage_backend = env::var("STORAGE_BACKEND")
            .unwrap_or_else(|_| "s3".to_string())
            .parse::<StorageBackend>()?;

        let timeouts = OperationTimeouts {
            upload: secs_from_env("UPLOAD_TIMEOUT_SECS", UPLOAD_TIMEOUT_SECS)?,
            download: secs_from_env("DOWNLOAD_TIMEOUT_SECS", DOWNLOAD_TIMEOUT_SECS)?,
            delete: secs_from_env("DELETE_TIMEOUT_SECS", DELETE_TIMEOUT_SECS)?,
        };

        let storage = StorageConfig {
            backend: storage_backend,
            bucket: env::var("S3_BUCKET").ok(),
            region: env::var("S3_REGION").unwrap_or_else(|_| DEFAULT_S3_REGION.to_string()),
            endpoint: env::var("S3_ENDPOINT").ok(),
            access_key_id: env::var("S3_ACCESS_KEY_ID").ok(),
            secret_access_key: env::var("S3_SECRET_ACCESS_KEY").ok(),
            public_base_url: env::var("STORAGE_PUBLIC_BASE_URL")
                .unwrap_or_else(|_| DEFAULT_PUBLIC_BASE_URL.to_string()),
            presigned_url_ttl: secs_from_env("PRESIGNED_URL_TTL_SECS", PRESIGNED_URL_TTL_SECS)?,
            timeouts,
        };

        let mut quota = QuotaPolicy {
            max_file_size: number_from_env("MAX_FILE_SIZE_BYTES", MAX_FILE_SIZE_BYTES)?,
            max_project_size: number_from_env("MAX_PROJECT_SIZE_BYTES", MAX_PROJECT_SIZE_BYTES)?,
            max_sample_files: number_from_env("MAX_SAMPLE_FILES", MAX_SAMPLE_FILES)?,
            ..QuotaPolicy::default()
        };
        if let Ok(v) = env::var("ALLOWED_CONTENT_TYPES") {
            quota.allowed_content_types = parse_list(&v);
        }

        let config = Config {
            environment,
            database,
            storage,
            quota,
            spool_dir: env::var("SPOOL_DIR").ok().map(PathBuf::from),
        };
        config.validate()?;
        Ok(config)
    }

    /// Check cross-field requirements that single env vars cannot express
    pub fn validate(&self) -> Result<(), anyhow::Error> {
        if self.database.backend == MetadataBackend::Postgres && self.database.url.is_none() {
            return Err(anyhow::anyhow!(
                "DATABASE_URL must be set when METADATA_BACKEND is postgres"
            ));
        }
        if self.storage.backend == StorageBackend::S3 && self.storage.bucket.is_none() {
            return Err(anyhow::anyhow!(
                "S3_BUCKET must be set when STORAGE_BACKEND is s3"
            ));
        }
        if self.quota.max_file_size == 0 || self.quota.max_project_size == 0 {
            return Err(anyhow::anyhow!("size limits must be greater than zero"));
        }
        if self.quota.allowed_content_types.is_empty() {
            return Err(anyhow::anyhow!("ALLOWED_CONTENT_TYPES cannot be empty"));
        }
        Ok(())
    }

    pub fn is_production(&self) -> bool {
        let env = self.environment.to_lowercase();
        env == "production" || env == "prod"
    }

    /// In-process configuration with memory backends and default quotas
    pub fn in_memory() -> Self {
        Config {
            environment: "test".to_string(),
            database: DatabaseConfig {
                backend: MetadataBackend::Memory,
                url: None,
                max_connections: MAX_CONNECTIONS,
                timeout_seconds: CONNECTION_TIMEOUT_SECS,
            },
            storage: StorageConfig {
                backend: StorageBackend::Memory,
                bucket: None,
                region: DEFAULT_S3_REGION.to_string(),
                endpoint: None,
                access_key_id: None,
                secret_access_key: None,
                public_base_url: DEFAULT_PUBLIC_BASE_URL.to_string(),
                presigned_url_ttl: Duration::from_secs(PRESIGNED_URL_TTL_SECS),
                timeouts: OperationTimeouts::default(),
            },
            quota: QuotaPolicy::default(),
            spool_dir: None,
        }
    }
}

/// `default` when `value` is unset, an error naming `key` when it does not parse
fn parse_number<T: FromStr>(key: &str, value: Option<String>, default: T) -> Result<T, anyhow::Error> {
    match value {
        None => Ok(default),
        Some(v) => v
            .trim()
            .parse()
            .map_err(|_| anyhow::anyhow!("{} must be a valid number, got {:?}", key, v)),
    }
}

fn number_from_env<T: FromStr>(key: &str, default: T) -> Result<T, anyhow::Error> {
    parse_number(key, env::var(key).ok(), default)
}

fn secs_from_env(key: &str, default: u64) -> Result<Duration, anyhow::Error> {
    number_from_env(key, default).map(Duration::from_secs)
}

fn parse_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|s| s.trim().to_lowercase())
        .filter(|s| !s.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_quota_policy() {
        let policy = QuotaPolicy::default();
        assert_eq!(policy.max_file_size, 1024 * 1024 * 1024);
        assert_eq!(policy.max_project_size, 10 * 1024 * 1024 * 1024);
        assert_eq!(policy.max_sample_files, 100);
        assert!(policy.is_allowed("audio/wav"));
        assert!(policy.is_allowed("AUDIO/X-FLP"));
        assert!(!policy.is_allowed("text/plain"));
    }

    #[test]
    fn test_policy_builders() {
        let policy = QuotaPolicy::default()
            .with_max_file_size(10)
            .with_max_sample_files(2)
            .with_allowed_content_types(["audio/wav"]);
        assert_eq!(policy.max_file_size, 10);
        assert_eq!(policy.max_sample_files, 2);
        assert!(!policy.is_allowed("application/octet-stream"));
    }

    #[test]
    fn test_parse_list_trims_and_drops_empty() {
        assert_eq!(
            parse_list(" audio/wav, Audio/MPEG ,,"),
            vec!["audio/wav".to_string(), "audio/mpeg".to_string()]
        );
    }

    #[test]
    fn test_validate_requires_backend_settings() {
        let config = Config::in_memory();
        assert!(config.validate().is_ok());

        let mut pg = Config::in_memory();
        pg.database.backend = MetadataBackend::Postgres;
        assert!(pg.validate().is_err());
        pg.database.url = Some("postgres://localhost/dawhub".to_string());
        assert!(pg.validate().is_ok());

        let mut s3 = Config::in_memory();
        s3.storage.backend = StorageBackend::S3;
        assert!(s3.validate().is_err());
    }

    #[test]
    fn test_parse_number() {
        assert_eq!(parse_number("DB_MAX_CONNECTIONS", None, 20u32).unwrap(), 20);
        assert_eq!(
            parse_number("DB_MAX_CONNECTIONS", Some(" 5 ".to_string()), 20u32).unwrap(),
            5
        );

        let err = parse_number("DB_MAX_CONNECTIONS", Some("lots".to_string()), 20u32).unwrap_err();
        assert!(err.to_string().contains("DB_MAX_CONNECTIONS"));
        assert!(parse_number("DB_TIMEOUT_SECONDS", Some("-1".to_string()), 30u64).is_err());
        assert!(parse_number("DB_TIMEOUT_SECONDS", Some(String::new()), 30u64).is_err());
    }

    #[test]
    fn test_default_timeouts() {
        let timeouts = OperationTimeouts::default();
        assert_eq!(timeouts.upload, Duration::from_secs(600));
        assert_eq!(timeouts.download, Duration::from_secs(300));
        assert_eq!(timeouts.delete, Duration::from_secs(300));
    }
}
