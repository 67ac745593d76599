//! Typed, validated configuration (§6), loaded from a YAML file:
//! `load`/`load_or_default`/`default_path`, per-section `Default` impls,
//! and an explicit `validate()` pass.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Top-level configuration for a single mount.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    pub mount: MountConfig,
    pub listing: ListingConfig,
    pub read: ReadConfig,
    pub retry: RetryConfig,
    #[serde(rename = "read-stall")]
    pub read_stall: ReadStallConfig,
    #[serde(rename = "metadata-cache")]
    pub metadata_cache: MetadataCacheConfig,
    #[serde(rename = "file-cache")]
    pub file_cache: FileCacheConfig,
    pub write: WriteConfig,
    pub attrs: AttrConfig,
    pub transport: TransportConfig,
    pub auth: AuthConfig,
    pub logging: LoggingConfig,
    /// §5: when true (the default), a blocked `read` completes rather than
    /// being cancelled on an interrupt signal.
    #[serde(rename = "ignore-interrupts")]
    pub ignore_interrupts: bool,
    /// §4.2: outer bound in seconds on kernel-visible directory-entry
    /// caching; `0` disables kernel caching, `-1` caches until explicit
    /// invalidation.
    #[serde(rename = "kernel-list-cache-ttl-secs")]
    pub kernel_list_cache_ttl_secs: i64,
    /// §6: use hierarchical-bucket RPCs (`create_folder`/`rename_folder`) when available.
    #[serde(rename = "enable-hns")]
    pub enable_hns: bool,
    /// §6: walk the whole tree at mount to pre-populate caches.
    #[serde(rename = "experimental-metadata-prefetch-on-mount")]
    pub metadata_prefetch: PrefetchMode,
    /// §6: exit the process (rather than merely log) on an `InvariantViolation`.
    #[serde(rename = "exit-on-invariant-violation")]
    pub exit_on_invariant_violation: bool,
}

impl Default for ReadStallConfig {
    fn default() -> Self {
        Self {
            enable: true,
            min_req_timeout_ms: 500,
            max_req_timeout_ms: 30_000,
            initial_req_timeout_ms: 5_000,
            req_target_percentile: 0.99,
            req_increase_rate: 15.0,
        }
    }
}

/// §6: the two positional mount arguments plus the `only-dir` subtree restriction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MountConfig {
    pub bucket: Option<String>,
    pub mount_point: PathBuf,
    #[serde(rename = "only-dir")]
    pub only_dir: Option<String>,
}

impl Default for MountConfig {
    fn default() -> Self {
        Self {
            bucket: None,
            mount_point: PathBuf::from("/mnt/bucketfs"),
            only_dir: None,
        }
    }
}

/// §4.4: directory-listing policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListingConfig {
    #[serde(rename = "implicit-dirs")]
    pub implicit_dirs: bool,
    #[serde(rename = "rename-dir-limit")]
    pub rename_dir_limit: u64,
}

impl Default for ListingConfig {
    fn default() -> Self {
        Self {
            implicit_dirs: false,
            rename_dir_limit: 0,
        }
    }
}

/// §4.6: read-path classifier and prefetch window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadConfig {
    #[serde(rename = "sequential-read-size-mb")]
    pub sequential_read_size_mb: u32,
    pub random_seek_threshold: u32,
}

impl Default for ReadConfig {
    fn default() -> Self {
        Self {
            sequential_read_size_mb: 200,
            random_seek_threshold: 3,
        }
    }
}

/// §4.1, C10: exponential backoff policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(rename = "max-retry-sleep")]
    pub max_retry_sleep_secs: u64,
    pub multiplier: f64,
    #[serde(rename = "max-retry-attempts")]
    pub max_retry_attempts: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retry_sleep_secs: 30,
            multiplier: 2.0,
            max_retry_attempts: 10,
        }
    }
}

/// §4.1, C10: adaptive per-request stall timeout.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadStallConfig {
    pub enable: bool,
    pub min_req_timeout_ms: u64,
    pub max_req_timeout_ms: u64,
    pub initial_req_timeout_ms: u64,
    pub req_target_percentile: f64,
    pub req_increase_rate: f64,
}

/// §4.2: stat cache / type cache / negative cache sizing and TTLs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetadataCacheConfig {
    #[serde(rename = "stat-cache-max-size-mb")]
    pub stat_cache_max_size_mb: i64,
    /// `-1` means effectively unlimited (§9 open question); never stored
    /// literally as a duration, see [`MetadataCacheConfig::ttl`].
    #[serde(rename = "ttl-secs")]
    pub ttl_secs: i64,
    #[serde(rename = "negative-ttl-secs")]
    pub negative_ttl_secs: i64,
    #[serde(rename = "type-cache-max-size-mb")]
    pub type_cache_max_size_mb: i64,
}

impl MetadataCacheConfig {
    /// `-1` is resolved to a duration far beyond any process lifetime
    /// rather than a literal `i64::MAX` of nanoseconds, which would
    /// overflow `std::time::Duration` arithmetic; see DESIGN.md for the
    /// Open Question this resolves.
    pub fn ttl(&self) -> std::time::Duration {
        if self.ttl_secs < 0 {
            std::time::Duration::from_secs(315_360_000) // ~10 years
        } else {
            std::time::Duration::from_secs(self.ttl_secs as u64)
        }
    }

    pub fn negative_ttl(&self) -> std::time::Duration {
        if self.negative_ttl_secs < 0 {
            std::time::Duration::from_secs(315_360_000)
        } else {
            std::time::Duration::from_secs(self.negative_ttl_secs as u64)
        }
    }
}

impl Default for MetadataCacheConfig {
    fn default() -> Self {
        Self {
            stat_cache_max_size_mb: 32,
            ttl_secs: 60,
            negative_ttl_secs: 5,
            type_cache_max_size_mb: 4,
        }
    }
}

/// §4.7: on-disk file cache.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileCacheConfig {
    pub cache_dir: PathBuf,
    #[serde(rename = "max-size-mb")]
    pub max_size_mb: i64,
    #[serde(rename = "cache-file-for-range-read")]
    pub cache_file_for_range_read: bool,
    #[serde(rename = "enable-crc")]
    pub enable_crc: bool,
    #[serde(rename = "enable-parallel-downloads")]
    pub enable_parallel_downloads: bool,
    #[serde(rename = "parallel-downloads-per-file")]
    pub parallel_downloads_per_file: u32,
    #[serde(rename = "max-parallel-downloads")]
    pub max_parallel_downloads: u32,
    #[serde(rename = "download-chunk-size-mb")]
    pub download_chunk_size_mb: u32,
}

impl Default for FileCacheConfig {
    fn default() -> Self {
        Self {
            cache_dir: dirs::cache_dir()
                .unwrap_or_else(|| PathBuf::from("/tmp"))
                .join("bucketfs"),
            max_size_mb: -1,
            cache_file_for_range_read: false,
            enable_crc: true,
            enable_parallel_downloads: true,
            parallel_downloads_per_file: 4,
            max_parallel_downloads: 16,
            download_chunk_size_mb: 8,
        }
    }
}

/// §4.8: write-path buffering and streaming policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WriteConfig {
    #[serde(rename = "create-empty-file")]
    pub create_empty_file: bool,
    #[serde(rename = "enable-streaming-writes")]
    pub enable_streaming_writes: bool,
    #[serde(rename = "block-size-mb")]
    pub block_size_mb: u32,
    #[serde(rename = "max-blocks-per-file")]
    pub max_blocks_per_file: u32,
    #[serde(rename = "global-max-blocks")]
    pub global_max_blocks: u32,
    #[serde(rename = "enable-rapid-appends")]
    pub enable_rapid_appends: bool,
}

impl Default for WriteConfig {
    fn default() -> Self {
        Self {
            create_empty_file: false,
            enable_streaming_writes: true,
            block_size_mb: 8,
            max_blocks_per_file: 4,
            global_max_blocks: 32,
            enable_rapid_appends: false,
        }
    }
}

/// §6: inode attribute synthesis.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttrConfig {
    /// `-1` means "use the invoking user's uid".
    pub uid: i64,
    /// `-1` means "use the invoking user's gid".
    pub gid: i64,
    pub file_mode: u32,
    pub dir_mode: u32,
}

impl Default for AttrConfig {
    fn default() -> Self {
        Self {
            uid: -1,
            gid: -1,
            file_mode: 0o644,
            dir_mode: 0o755,
        }
    }
}

/// §6: transport (HTTP client) tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ClientProtocol {
    #[default]
    Http1,
    Http2,
    Grpc,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    #[serde(rename = "client-protocol")]
    pub client_protocol: ClientProtocol,
    #[serde(rename = "max-conns-per-host")]
    pub max_conns_per_host: u32,
    #[serde(rename = "max-idle-conns-per-host")]
    pub max_idle_conns_per_host: u32,
    #[serde(rename = "http-client-timeout")]
    pub http_client_timeout_secs: u64,
    #[serde(rename = "enable-http-dns-cache")]
    pub enable_http_dns_cache: bool,
    /// Override the object-store endpoint (testing).
    #[serde(rename = "custom-endpoint")]
    pub custom_endpoint: Option<String>,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            client_protocol: ClientProtocol::default(),
            max_conns_per_host: 100,
            max_idle_conns_per_host: 100,
            http_client_timeout_secs: 30,
            enable_http_dns_cache: true,
            custom_endpoint: None,
        }
    }
}

/// §6: credentials and requester-pays.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthConfig {
    #[serde(rename = "anonymous-access")]
    pub anonymous_access: bool,
    #[serde(rename = "key-file")]
    pub key_file: Option<PathBuf>,
    #[serde(rename = "token-url")]
    pub token_url: Option<String>,
    #[serde(rename = "reuse-token-from-url")]
    pub reuse_token_from_url: Option<String>,
    #[serde(rename = "billing-project")]
    pub billing_project: Option<String>,
}

/// §6.2: structured logging.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub file: Option<PathBuf>,
    pub max_size_mb: u64,
    pub max_files: u32,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: None,
            max_size_mb: 50,
            max_files: 5,
        }
    }
}

/// §6: `experimental-metadata-prefetch-on-mount`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PrefetchMode {
    #[default]
    Disabled,
    Sync,
    Async,
}

/// A single validation error found in the configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

const VALID_LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

impl Config {
    /// Loads configuration from a YAML file at `path`.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Tries to load from `path`; falls back to [`Config::default`] on any error.
    pub fn load_or_default(path: &Path) -> Self {
        Self::load(path).unwrap_or_default()
    }

    /// Platform-appropriate default path for the configuration file:
    /// `$XDG_CONFIG_HOME/bucketfs/config.yaml` on Linux.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("~/.config"))
            .join("bucketfs")
            .join("config.yaml")
    }

    /// Validates cross-field and range constraints the type system alone
    /// doesn't enforce. An empty vector means the configuration is valid.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if !VALID_LOG_LEVELS.contains(&self.logging.level.as_str()) {
            errors.push(ValidationError {
                field: "logging.level".into(),
                message: format!("must be one of {VALID_LOG_LEVELS:?}"),
            });
        }

        if !(1..=1024).contains(&self.read.sequential_read_size_mb) {
            errors.push(ValidationError {
                field: "read.sequential-read-size-mb".into(),
                message: "must be between 1 and 1024".into(),
            });
        }

        if self.retry.multiplier <= 1.0 {
            errors.push(ValidationError {
                field: "retry.multiplier".into(),
                message: "must be greater than 1.0 for backoff to grow".into(),
            });
        }

        if self.read_stall.min_req_timeout_ms > self.read_stall.max_req_timeout_ms {
            errors.push(ValidationError {
                field: "read-stall.min_req_timeout".into(),
                message: "must not exceed max_req_timeout".into(),
            });
        }
        if !(0.0..=1.0).contains(&self.read_stall.req_target_percentile) {
            errors.push(ValidationError {
                field: "read-stall.req_target_percentile".into(),
                message: "must be between 0.0 and 1.0".into(),
            });
        }

        if self.file_cache.parallel_downloads_per_file == 0 {
            errors.push(ValidationError {
                field: "file-cache.parallel-downloads-per-file".into(),
                message: "must be greater than 0".into(),
            });
        }
        if self.file_cache.max_parallel_downloads < self.file_cache.parallel_downloads_per_file {
            errors.push(ValidationError {
                field: "file-cache.max-parallel-downloads".into(),
                message: "must be >= parallel-downloads-per-file".into(),
            });
        }

        if self.write.max_blocks_per_file > self.write.global_max_blocks {
            errors.push(ValidationError {
                field: "write.max-blocks-per-file".into(),
                message: "must not exceed write.global-max-blocks".into(),
            });
        }

        errors
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates_clean() {
        assert!(Config::default().validate().is_empty());
    }

    #[test]
    fn invalid_log_level_is_rejected() {
        let mut config = Config::default();
        config.logging.level = "verbose".into();
        let errors = config.validate();
        assert!(errors.iter().any(|e| e.field == "logging.level"));
    }

    #[test]
    fn ttl_negative_one_resolves_to_effectively_unlimited() {
        let cache = MetadataCacheConfig {
            ttl_secs: -1,
            ..MetadataCacheConfig::default()
        };
        assert!(cache.ttl() > std::time::Duration::from_secs(60 * 60 * 24 * 365));
    }

    #[test]
    fn load_roundtrips_through_yaml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        let config = Config::default();
        std::fs::write(&path, serde_yaml::to_string(&config).unwrap()).unwrap();
        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded.retry.max_retry_attempts, config.retry.max_retry_attempts);
    }

    #[test]
    fn load_or_default_falls_back_on_missing_file() {
        let config = Config::load_or_default(Path::new("/nonexistent/path/config.yaml"));
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn max_parallel_downloads_below_per_file_is_rejected() {
        let mut config = Config::default();
        config.file_cache.parallel_downloads_per_file = 8;
        config.file_cache.max_parallel_downloads = 4;
        let errors = config.validate();
        assert!(errors
            .iter()
            .any(|e| e.field == "file-cache.max-parallel-downloads"));
    }
}
