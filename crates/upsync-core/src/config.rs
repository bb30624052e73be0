//! Configuration module for upsync.
//!
//! Typed configuration structs that map to the YAML configuration file,
//! with loading, saving, validation, defaults, and a builder for
//! programmatic use.

use std::path::{Path, PathBuf};

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::domain::headers::{HeaderSet, GZIP_ENCODING};

/// Default file name of the fingerprint cache
pub const DEFAULT_CACHE_FILE: &str = ".upsync-cache.txt";

/// Default file name of the configuration file
pub const DEFAULT_CONFIG_FILE: &str = ".upsync.yaml";

// ---------------------------------------------------------------------------
// Config struct with sub-sections
// ---------------------------------------------------------------------------

/// Top-level configuration for upsync.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub upload: UploadConfig,
    pub retry: RetryConfig,
    pub store: StoreConfig,
    /// Ordered header rules; the first matching pattern wins.
    pub headers: Vec<HeaderRuleConfig>,
    pub logging: LoggingConfig,
}

/// What to upload and where.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadConfig {
    /// Destination bucket.
    pub bucket: String,
    /// Local directory whose contents are uploaded.
    pub source: PathBuf,
    /// Fingerprint cache location.
    pub cache_file: PathBuf,
    /// Number of concurrent upload workers.
    pub workers: usize,
    /// Request server-side encryption for every object.
    pub encrypt: bool,
    /// Reuse cached hashes for files whose size and mtime are unchanged.
    pub trust_mtime: bool,
}

/// Retry and backoff policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Attempts per file before it is rejected.
    pub max_tries: u32,
    /// Base of the exponential backoff, in milliseconds.
    pub base_delay_ms: u64,
    /// Cap on items waiting on a backoff timer at once.
    pub max_pending_retries: usize,
}

/// Which client talks to the object store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// AWS SDK with SigV4 signing and the default credential chain.
    #[default]
    S3,
    /// Plain HTTP `PUT` with an optional bearer token.
    Http,
}

impl std::fmt::Display for StoreBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreBackend::S3 => write!(f, "s3"),
            StoreBackend::Http => write!(f, "http"),
        }
    }
}

impl std::str::FromStr for StoreBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "s3" => Ok(StoreBackend::S3),
            "http" => Ok(StoreBackend::Http),
            other => Err(format!("unknown backend '{other}'; valid options: s3, http")),
        }
    }
}

/// Remote endpoint settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    /// Base URL of the object store. Required for `http`; for `s3` it
    /// overrides the AWS endpoint and switches to path-style addressing.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    /// AWS region; falls back to the environment and profile.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    /// Named AWS profile for credentials and region.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub profile: Option<String>,
    /// Environment variable holding the bearer token (`http` only).
    pub token_env: String,
    /// Per-request timeout in seconds.
    pub timeout_secs: u64,
}

/// One header rule as written in the configuration file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeaderRuleConfig {
    /// Regular expression searched in the relative path.
    pub pattern: String,
    #[serde(flatten)]
    pub headers: HeaderSet,
}

/// Logging / tracing settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: `trace`, `debug`, `info`, `warn`, or `error`.
    pub level: String,
}

// ---------------------------------------------------------------------------
// Config::load() / save()
// ---------------------------------------------------------------------------

impl Config {
    /// Load configuration from a YAML file at `path`.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Try to load from `path`; fall back to [`Config::default`] on any error.
    pub fn load_or_default(path: &Path) -> Self {
        Self::load(path).unwrap_or_default()
    }

    /// Write the configuration as YAML, replacing `path` atomically.
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        let yaml = serde_yaml::to_string(self)?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let mut tmp_name = path.as_os_str().to_owned();
        tmp_name.push(".tmp");
        let tmp_path = PathBuf::from(tmp_name);
        std::fs::write(&tmp_path, yaml)?;
        std::fs::rename(&tmp_path, path)?;
        Ok(())
    }

    /// Default configuration file, looked up in the working directory.
    pub fn default_path() -> PathBuf {
        PathBuf::from(DEFAULT_CONFIG_FILE)
    }
}

// ---------------------------------------------------------------------------
// Defaults
// ---------------------------------------------------------------------------

impl Default for Config {
    fn default() -> Self {
        Self {
            upload: UploadConfig::default(),
            retry: RetryConfig::default(),
            store: StoreConfig::default(),
            headers: default_header_rules(),
            logging: LoggingConfig::default(),
        }
    }
}

/// Two workers per available core.
pub fn default_workers() -> usize {
    std::thread::available_parallelism().map_or(1, std::num::NonZeroUsize::get) * 2
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            bucket: String::new(),
            source: PathBuf::from("output"),
            cache_file: PathBuf::from(DEFAULT_CACHE_FILE),
            workers: default_workers(),
            encrypt: false,
            trust_mtime: false,
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_tries: 10,
            base_delay_ms: 100,
            max_pending_retries: 1024,
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::S3,
            endpoint: None,
            region: None,
            profile: None,
            token_env: "UPSYNC_TOKEN".to_string(),
            timeout_secs: 300,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// Header profile for a statically generated web site.
///
/// Pages and text assets are gzipped with short cache lifetimes for HTML and
/// long ones for fingerprinted assets; images are cached but not recompressed.
pub fn default_header_rules() -> Vec<HeaderRuleConfig> {
    let gzip = |max_age: u32| {
        HeaderSet::empty()
            .with_content_encoding("gzip")
            .with_cache_control(format!("max-age={max_age}"))
    };
    let cache_only = |max_age: u32| HeaderSet::empty().with_cache_control(format!("max-age={max_age}"));

    [
        (r"index\.html", gzip(1800)),
        (r"articole.*\.html$", gzip(3600)),
        (r"[^/]*\.html$", gzip(3600)),
        (r"\.xml$", gzip(1800)),
        (r"\.ico$", gzip(31_536_000)),
        (r"\.(js|css)$", gzip(31_536_000)),
        (r"images/articole/.*(jpg|JPG|png|PNG)$", cache_only(31_536_000)),
        (r"\.(jpg|JPG|png|PNG)$", cache_only(31_536_000)),
    ]
    .into_iter()
    .map(|(pattern, headers)| HeaderRuleConfig {
        pattern: pattern.to_string(),
        headers,
    })
    .collect()
}

// ---------------------------------------------------------------------------
// Config::validate()
// ---------------------------------------------------------------------------

/// A single validation error found in the configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Dotted path to the offending field, e.g. `"retry.max_tries"`.
    pub field: String,
    /// Human-readable explanation.
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Valid values for `logging.level`.
const VALID_LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

impl Config {
    /// Validate the configuration and return all errors found.
    ///
    /// An empty vector means the configuration is valid. The source
    /// directory is not checked here; see [`Config::validate_paths`].
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();
        let mut push = |field: &str, message: String| {
            errors.push(ValidationError {
                field: field.into(),
                message,
            });
        };

        // --- upload ---
        if self.upload.bucket.trim().is_empty() {
            push("upload.bucket", "must not be empty".into());
        } else if self.upload.bucket.contains('/') {
            push(
                "upload.bucket",
                format!("must not contain '/': {}", self.upload.bucket),
            );
        }
        if self.upload.workers == 0 {
            push("upload.workers", "must be greater than 0".into());
        }
        if self.upload.cache_file.as_os_str().is_empty() {
            push("upload.cache_file", "must not be empty".into());
        }

        // --- retry ---
        if self.retry.max_tries == 0 {
            push("retry.max_tries", "must be greater than 0".into());
        }
        if self.retry.base_delay_ms == 0 {
            push("retry.base_delay_ms", "must be greater than 0".into());
        }
        if self.retry.max_pending_retries == 0 {
            push("retry.max_pending_retries", "must be greater than 0".into());
        }

        // --- store ---
        match self.store.endpoint.as_deref() {
            Some(endpoint) if !(endpoint.starts_with("http://") || endpoint.starts_with("https://")) => {
                push(
                    "store.endpoint",
                    format!("must be an http(s) URL: '{endpoint}'"),
                );
            }
            None if self.store.backend == StoreBackend::Http => {
                push("store.endpoint", "required by the http backend".into());
            }
            _ => {}
        }
        if self.store.timeout_secs == 0 {
            push("store.timeout_secs", "must be greater than 0".into());
        }

        // --- headers ---
        for (index, rule) in self.headers.iter().enumerate() {
            if let Err(e) = Regex::new(&rule.pattern) {
                push(
                    &format!("headers[{index}].pattern"),
                    format!("invalid pattern '{}': {e}", rule.pattern),
                );
            }
            if let Some(encoding) = rule.headers.content_encoding.as_deref() {
                if !encoding.eq_ignore_ascii_case(GZIP_ENCODING) {
                    push(
                        &format!("headers[{index}].content_encoding"),
                        format!("unsupported encoding '{encoding}'; only {GZIP_ENCODING} is applied"),
                    );
                }
            }
        }

        // --- logging ---
        if !VALID_LOG_LEVELS.contains(&self.logging.level.as_str()) {
            push(
                "logging.level",
                format!(
                    "invalid level '{}'; valid options: {}",
                    self.logging.level,
                    VALID_LOG_LEVELS.join(", ")
                ),
            );
        }

        errors
    }

    /// Check that the configured source directory exists.
    pub fn validate_paths(&self) -> Vec<ValidationError> {
        if self.upload.source.is_dir() {
            Vec::new()
        } else {
            vec![ValidationError {
                field: "upload.source".into(),
                message: format!(
                    "directory does not exist: {}",
                    self.upload.source.display()
                ),
            }]
        }
    }
}

// ---------------------------------------------------------------------------
// ConfigBuilder
// ---------------------------------------------------------------------------

/// Builder for constructing a [`Config`] programmatically.
///
/// Starts from [`Config::default`] and allows selective overrides.
///
/// # Example
///
/// ```rust,no_run
/// use upsync_core::config::ConfigBuilder;
///
/// let config = ConfigBuilder::new()
///     .bucket("www.example.com")
///     .source("public")
///     .workers(4)
///     .build();
/// ```
#[derive(Debug, Clone)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Create a new builder initialised with [`Config::default`] values.
    pub fn new() -> Self {
        Self {
            config: Config::default(),
        }
    }

    /// Start from an existing configuration, e.g. one loaded from disk.
    pub fn from_config(config: Config) -> Self {
        Self { config }
    }

    // --- upload ---

    pub fn bucket(mut self, bucket: impl Into<String>) -> Self {
        self.config.upload.bucket = bucket.into();
        self
    }

    pub fn source(mut self, source: impl Into<PathBuf>) -> Self {
        self.config.upload.source = source.into();
        self
    }

    pub fn cache_file(mut self, cache_file: impl Into<PathBuf>) -> Self {
        self.config.upload.cache_file = cache_file.into();
        self
    }

    pub fn workers(mut self, workers: usize) -> Self {
        self.config.upload.workers = workers;
        self
    }

    pub fn encrypt(mut self, encrypt: bool) -> Self {
        self.config.upload.encrypt = encrypt;
        self
    }

    pub fn trust_mtime(mut self, trust_mtime: bool) -> Self {
        self.config.upload.trust_mtime = trust_mtime;
        self
    }

    // --- retry ---

    pub fn max_tries(mut self, max_tries: u32) -> Self {
        self.config.retry.max_tries = max_tries;
        self
    }

    pub fn base_delay_ms(mut self, ms: u64) -> Self {
        self.config.retry.base_delay_ms = ms;
        self
    }

    pub fn max_pending_retries(mut self, n: usize) -> Self {
        self.config.retry.max_pending_retries = n;
        self
    }

    // --- store ---

    pub fn backend(mut self, backend: StoreBackend) -> Self {
        self.config.store.backend = backend;
        self
    }

    pub fn endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.config.store.endpoint = Some(endpoint.into());
        self
    }

    pub fn region(mut self, region: impl Into<String>) -> Self {
        self.config.store.region = Some(region.into());
        self
    }

    pub fn profile(mut self, profile: impl Into<String>) -> Self {
        self.config.store.profile = Some(profile.into());
        self
    }

    pub fn token_env(mut self, var: impl Into<String>) -> Self {
        self.config.store.token_env = var.into();
        self
    }

    pub fn timeout_secs(mut self, secs: u64) -> Self {
        self.config.store.timeout_secs = secs;
        self
    }

    // --- headers ---

    pub fn header_rules(mut self, rules: Vec<HeaderRuleConfig>) -> Self {
        self.config.headers = rules;
        self
    }

    // --- logging ---

    pub fn logging_level(mut self, level: impl Into<String>) -> Self {
        self.config.logging.level = level.into();
        self
    }

    // --- build ---

    /// Consume the builder and return the finished [`Config`].
    pub fn build(self) -> Config {
        self.config
    }

    /// Build and validate in one step. Returns `Err` with the list of
    /// validation errors if the configuration is invalid.
    pub fn build_validated(self) -> Result<Config, Vec<ValidationError>> {
        let config = self.build();
        let errors = config.validate();
        if errors.is_empty() {
            Ok(config)
        } else {
            Err(errors)
        }
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
