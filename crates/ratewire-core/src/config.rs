//! Configuration module for Ratewire.
//!
//! Provides typed configuration structs that map to the YAML configuration file,
//! with loading, validation, defaults, and a builder pattern for programmatic use.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

// ---------------------------------------------------------------------------
// Config struct with sub-sections
// ---------------------------------------------------------------------------

/// Top-level configuration for Ratewire.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub rest: RestConfig,
    pub auth: AuthConfig,
    pub rate_limiting: RateLimitingConfig,
    pub logging: LoggingConfig,
}

/// HTTP transport settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RestConfig {
    /// Base URL that relative request URLs are joined onto.
    pub base_url: String,
    /// Value of the `User-Agent` header.
    pub user_agent: String,
    /// Deadline for a single wire attempt, in seconds.
    pub attempt_timeout_secs: u64,
    /// Overall budget for one logical request including retries, in seconds.
    /// `None` means the caller imposes no budget.
    pub request_deadline_secs: Option<u64>,
}

/// Authorization settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// API token. `None` sends requests without an `Authorization` header.
    pub token: Option<String>,
    /// Scheme prefixed to the token, e.g. `Bot` or `Bearer`.
    pub scheme: String,
}

/// Rate-limit and retry settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitingConfig {
    /// Requests admitted per global window.
    pub global_max_requests: u32,
    /// Length of the global window, in milliseconds.
    pub global_window_ms: u64,
    /// Preemptive wait handed to callers while a route's bucket is being discovered.
    pub discovery_window_ms: u64,
    /// Maximum retries on throttles. `None` retries forever; `0` disables
    /// retrying and preemptive gating altogether.
    pub max_retries: Option<u32>,
    /// Wait used when a throttle carries no retry-after.
    pub retry_fallback_ms: u64,
    /// Buckets untouched for this long are eligible for cleanup.
    pub bucket_idle_secs: u64,
    /// Interval between background cleanup sweeps.
    pub cleanup_interval_secs: u64,
}

/// Logging / tracing settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: `trace`, `debug`, `info`, `warn`, or `error`.
    pub level: String,
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
}

// ---------------------------------------------------------------------------
// Config::load()
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

    /// Platform-appropriate default path for the configuration file.
    ///
    /// Typically `$XDG_CONFIG_HOME/ratewire/config.yaml` on Linux.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("~/.config"))
            .join("ratewire")
            .join("config.yaml")
    }
}

// ---------------------------------------------------------------------------
// Defaults
// ---------------------------------------------------------------------------

impl Default for RestConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.example.com/v10".to_string(),
            user_agent: format!(
                "ratewire (https://github.com/ratewire/ratewire, {})",
                env!("CARGO_PKG_VERSION")
            ),
            attempt_timeout_secs: 30,
            request_deadline_secs: Some(120),
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            token: None,
            scheme: "Bot".to_string(),
        }
    }
}

impl Default for RateLimitingConfig {
    fn default() -> Self {
        Self {
            global_max_requests: 50,
            global_window_ms: 1_000,
            discovery_window_ms: 200,
            max_retries: None,
            retry_fallback_ms: 2_500,
            bucket_idle_secs: 60,
            cleanup_interval_secs: 60,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

impl RestConfig {
    pub fn attempt_timeout(&self) -> Duration {
        Duration::from_secs(self.attempt_timeout_secs)
    }

    pub fn request_deadline(&self) -> Option<Duration> {
        self.request_deadline_secs.map(Duration::from_secs)
    }
}

impl RateLimitingConfig {
    pub fn global_window(&self) -> Duration {
        Duration::from_millis(self.global_window_ms)
    }

    pub fn discovery_window(&self) -> Duration {
        Duration::from_millis(self.discovery_window_ms)
    }

    pub fn retry_fallback(&self) -> Duration {
        Duration::from_millis(self.retry_fallback_ms)
    }

    pub fn bucket_idle(&self) -> Duration {
        Duration::from_secs(self.bucket_idle_secs)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs)
    }

    /// True when throttles are never retried.
    pub fn retries_disabled(&self) -> bool {
        self.max_retries == Some(0)
    }
}

impl AuthConfig {
    /// Full `Authorization` header value, if a token is configured.
    pub fn authorization(&self) -> Option<String> {
        self.token.as_ref().map(|token| {
            if self.scheme.is_empty() {
                token.clone()
            } else {
                format!("{} {}", self.scheme, token)
            }
        })
    }
}

// ---------------------------------------------------------------------------
// Config::validate()
// ---------------------------------------------------------------------------

/// A single validation error found in the configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Dotted path to the offending field, e.g. `"rate_limiting.global_window_ms"`.
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
    /// An empty vector means the configuration is valid.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();
        let mut positive = |field: &str, value: u64| {
            if value == 0 {
                errors.push(ValidationError {
                    field: field.into(),
                    message: "must be greater than 0".into(),
                });
            }
        };

        // --- rest ---
        positive("rest.attempt_timeout_secs", self.rest.attempt_timeout_secs);
        if let Some(deadline) = self.rest.request_deadline_secs {
            positive("rest.request_deadline_secs", deadline);
        }

        // --- rate_limiting ---
        positive(
            "rate_limiting.global_max_requests",
            u64::from(self.rate_limiting.global_max_requests),
        );
        positive(
            "rate_limiting.global_window_ms",
            self.rate_limiting.global_window_ms,
        );
        positive(
            "rate_limiting.discovery_window_ms",
            self.rate_limiting.discovery_window_ms,
        );
        positive(
            "rate_limiting.retry_fallback_ms",
            self.rate_limiting.retry_fallback_ms,
        );
        positive(
            "rate_limiting.cleanup_interval_secs",
            self.rate_limiting.cleanup_interval_secs,
        );

        // --- rest.base_url ---
        let base = self.rest.base_url.as_str();
        match Url::parse(base) {
            Ok(url) if !matches!(url.scheme(), "http" | "https") => errors.push(ValidationError {
                field: "rest.base_url".into(),
                message: format!("must be an http(s) URL, got '{base}'"),
            }),
            Ok(_) => {}
            Err(e) => errors.push(ValidationError {
                field: "rest.base_url".into(),
                message: format!("invalid URL '{base}': {e}"),
            }),
        }
        if self.rest.user_agent.trim().is_empty() {
            errors.push(ValidationError {
                field: "rest.user_agent".into(),
                message: "must not be empty".into(),
            });
        }
        if let (Some(deadline), attempt) = (
            self.rest.request_deadline_secs,
            self.rest.attempt_timeout_secs,
        ) {
            if deadline > 0 && deadline < attempt {
                errors.push(ValidationError {
                    field: "rest.request_deadline_secs".into(),
                    message: format!(
                        "request_deadline_secs ({deadline}) must not be shorter than attempt_timeout_secs ({attempt})"
                    ),
                });
            }
        }

        // --- auth ---
        if let Some(token) = &self.auth.token {
            if token.trim().is_empty() || token.contains(['\r', '\n']) {
                errors.push(ValidationError {
                    field: "auth.token".into(),
                    message: "must be a non-empty single-line string".into(),
                });
            }
        }

        // --- logging ---
        if !VALID_LOG_LEVELS.contains(&self.logging.level.as_str()) {
            errors.push(ValidationError {
                field: "logging.level".into(),
                message: format!(
                    "invalid level '{}'; valid options: {}",
                    self.logging.level,
                    VALID_LOG_LEVELS.join(", ")
                ),
            });
        }

        errors
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
/// use ratewire_core::config::ConfigBuilder;
///
/// let config = ConfigBuilder::new()
///     .rest_base_url("https://api.example.com/v10")
///     .auth_token("secret")
///     .rate_limiting_max_retries(Some(3))
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

    // --- rest ---

    pub fn rest_base_url(mut self, url: impl Into<String>) -> Self {
        self.config.rest.base_url = url.into();
        self
    }

    pub fn rest_user_agent(mut self, agent: impl Into<String>) -> Self {
        self.config.rest.user_agent = agent.into();
        self
    }

    pub fn rest_attempt_timeout_secs(mut self, seconds: u64) -> Self {
        self.config.rest.attempt_timeout_secs = seconds;
        self
    }

    pub fn rest_request_deadline_secs(mut self, seconds: Option<u64>) -> Self {
        self.config.rest.request_deadline_secs = seconds;
        self
    }

    // --- auth ---

    pub fn auth_token(mut self, token: impl Into<String>) -> Self {
        self.config.auth.token = Some(token.into());
        self
    }

    pub fn auth_scheme(mut self, scheme: impl Into<String>) -> Self {
        self.config.auth.scheme = scheme.into();
        self
    }

    // --- rate_limiting ---

    pub fn rate_limiting_global_max_requests(mut self, n: u32) -> Self {
        self.config.rate_limiting.global_max_requests = n;
        self
    }

    pub fn rate_limiting_global_window_ms(mut self, ms: u64) -> Self {
        self.config.rate_limiting.global_window_ms = ms;
        self
    }

    pub fn rate_limiting_discovery_window_ms(mut self, ms: u64) -> Self {
        self.config.rate_limiting.discovery_window_ms = ms;
        self
    }

    pub fn rate_limiting_max_retries(mut self, n: Option<u32>) -> Self {
        self.config.rate_limiting.max_retries = n;
        self
    }

    pub fn rate_limiting_retry_fallback_ms(mut self, ms: u64) -> Self {
        self.config.rate_limiting.retry_fallback_ms = ms;
        self
    }

    pub fn rate_limiting_bucket_idle_secs(mut self, seconds: u64) -> Self {
        self.config.rate_limiting.bucket_idle_secs = seconds;
        self
    }

    pub fn rate_limiting_cleanup_interval_secs(mut self, seconds: u64) -> Self {
        self.config.rate_limiting.cleanup_interval_secs = seconds;
        self
    }

    // --- logging ---

    pub fn logging_level(mut self, level: impl Into<String>) -> Self {
        self.config.logging.level = level.into();
        self
    }

    pub fn logging_json(mut self, json: bool) -> Self {
        self.config.logging.json = json;
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

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    // -- Defaults --

    #[test]
    fn default_config_has_sensible_values() {
        let cfg = Config::default();
        assert!(cfg.rest.base_url.starts_with("https://"));
        assert_eq!(cfg.rest.attempt_timeout_secs, 30);
        assert_eq!(cfg.rest.request_deadline_secs, Some(120));
        assert!(cfg.auth.token.is_none());
        assert_eq!(cfg.auth.scheme, "Bot");
        assert_eq!(cfg.rate_limiting.global_max_requests, 50);
        assert_eq!(cfg.rate_limiting.global_window_ms, 1_000);
        assert_eq!(cfg.rate_limiting.discovery_window_ms, 200);
        assert!(cfg.rate_limiting.max_retries.is_none());
        assert_eq!(cfg.rate_limiting.retry_fallback_ms, 2_500);
        assert_eq!(cfg.rate_limiting.bucket_idle_secs, 60);
        assert_eq!(cfg.rate_limiting.cleanup_interval_secs, 60);
        assert_eq!(cfg.logging.level, "info");
        assert!(!cfg.logging.json);
    }

    #[test]
    fn default_config_passes_validation() {
        let errors = Config::default().validate();
        assert!(errors.is_empty(), "unexpected validation errors: {errors:?}");
    }

    #[test]
    fn duration_accessors() {
        let cfg = Config::default();
        assert_eq!(cfg.rate_limiting.global_window(), Duration::from_secs(1));
        assert_eq!(
            cfg.rate_limiting.discovery_window(),
            Duration::from_millis(200)
        );
        assert_eq!(cfg.rest.request_deadline(), Some(Duration::from_secs(120)));
        assert!(!cfg.rate_limiting.retries_disabled());
    }

    #[test]
    fn authorization_header_value() {
        let mut auth = AuthConfig::default();
        assert!(auth.authorization().is_none());
        auth.token = Some("abc".into());
        assert_eq!(auth.authorization().as_deref(), Some("Bot abc"));
        auth.scheme = String::new();
        assert_eq!(auth.authorization().as_deref(), Some("abc"));
    }

    // -- Loading --

    #[test]
    fn load_from_yaml_file() {
        let yaml = r#"
rest:
  base_url: http://localhost:8080/api
  user_agent: test-agent
  attempt_timeout_secs: 5
  request_deadline_secs: null
auth:
  token: "secret-token"
  scheme: Bearer
rate_limiting:
  global_max_requests: 2
  global_window_ms: 500
  discovery_window_ms: 50
  max_retries: 3
  retry_fallback_ms: 100
  bucket_idle_secs: 10
  cleanup_interval_secs: 5
logging:
  level: debug
  json: true
"#;
        let mut tmp = tempfile::NamedTempFile::new().expect("create temp file");
        tmp.write_all(yaml.as_bytes()).unwrap();
        tmp.flush().unwrap();

        let cfg = Config::load(tmp.path()).expect("load config");
        assert_eq!(cfg.rest.base_url, "http://localhost:8080/api");
        assert_eq!(cfg.rest.user_agent, "test-agent");
        assert!(cfg.rest.request_deadline_secs.is_none());
        assert_eq!(cfg.auth.authorization().as_deref(), Some("Bearer secret-token"));
        assert_eq!(cfg.rate_limiting.global_max_requests, 2);
        assert_eq!(cfg.rate_limiting.max_retries, Some(3));
        assert_eq!(cfg.rate_limiting.bucket_idle_secs, 10);
        assert_eq!(cfg.logging.level, "debug");
        assert!(cfg.logging.json);
        assert!(cfg.validate().is_empty());
    }

    #[test]
    fn load_partial_yaml_fills_defaults() {
        let yaml = "rate_limiting:\n  max_retries: 0\n";
        let mut tmp = tempfile::NamedTempFile::new().expect("create temp file");
        tmp.write_all(yaml.as_bytes()).unwrap();

        let cfg = Config::load(tmp.path()).expect("load config");
        assert!(cfg.rate_limiting.retries_disabled());
        assert_eq!(cfg.rate_limiting.global_max_requests, 50);
        assert_eq!(cfg.logging.level, "info");
    }

    #[test]
    fn load_or_default_on_missing_file() {
        let cfg = Config::load_or_default(Path::new("/nonexistent/ratewire/config.yaml"));
        assert_eq!(cfg.rate_limiting.global_max_requests, 50);
    }

    #[test]
    fn load_invalid_yaml_is_error() {
        let mut tmp = tempfile::NamedTempFile::new().expect("create temp file");
        tmp.write_all(b"rate_limiting: [not, a, map]").unwrap();
        assert!(Config::load(tmp.path()).is_err());
    }

    #[test]
    fn default_path_ends_with_config_yaml() {
        let path = Config::default_path();
        assert!(path.ends_with("ratewire/config.yaml"));
    }

    // -- Validation --

    #[test]
    fn validate_catches_zero_values() {
        let cfg = ConfigBuilder::new()
            .rate_limiting_global_max_requests(0)
            .rate_limiting_global_window_ms(0)
            .rate_limiting_retry_fallback_ms(0)
            .build();
        let fields: Vec<_> = cfg.validate().into_iter().map(|e| e.field).collect();
        assert!(fields.contains(&"rate_limiting.global_max_requests".to_string()));
        assert!(fields.contains(&"rate_limiting.global_window_ms".to_string()));
        assert!(fields.contains(&"rate_limiting.retry_fallback_ms".to_string()));
    }

    #[test]
    fn validate_rejects_bad_base_url_and_level() {
        let cfg = ConfigBuilder::new()
            .rest_base_url("ftp://example.com")
            .logging_level("verbose")
            .build();
        let errors = cfg.validate();
        assert!(errors.iter().any(|e| e.field == "rest.base_url"));
        assert!(errors.iter().any(|e| e.field == "logging.level"));
    }

    #[test]
    fn validate_checks_base_url_with_url_parser() {
        for bad in ["https://", "not a url", "/v10"] {
            let cfg = ConfigBuilder::new().rest_base_url(bad).build();
            assert!(
                cfg.validate().iter().any(|e| e.field == "rest.base_url"),
                "{bad} should be rejected"
            );
        }
        let cfg = ConfigBuilder::new()
            .rest_base_url("HTTPS://API.example.com/v10")
            .build();
        assert!(cfg.validate().is_empty());
    }

    #[test]
    fn validate_rejects_deadline_shorter_than_attempt() {
        let cfg = ConfigBuilder::new()
            .rest_attempt_timeout_secs(30)
            .rest_request_deadline_secs(Some(10))
            .build();
        let errors = cfg.validate();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].field, "rest.request_deadline_secs");
    }

    #[test]
    fn validate_rejects_multiline_token() {
        let cfg = ConfigBuilder::new().auth_token("abc\ndef").build();
        assert!(cfg.validate().iter().any(|e| e.field == "auth.token"));
    }

    #[test]
    fn validation_error_display() {
        let err = ValidationError {
            field: "logging.level".into(),
            message: "bad".into(),
        };
        assert_eq!(err.to_string(), "logging.level: bad");
    }

    // -- Builder --

    #[test]
    fn builder_overrides() {
        let cfg = ConfigBuilder::new()
            .rest_base_url("http://127.0.0.1:9000")
            .rest_user_agent("agent/1.0")
            .auth_scheme("Bearer")
            .auth_token("t")
            .rate_limiting_discovery_window_ms(10)
            .rate_limiting_max_retries(Some(2))
            .rate_limiting_bucket_idle_secs(1)
            .rate_limiting_cleanup_interval_secs(1)
            .logging_json(true)
            .build();
        assert_eq!(cfg.rest.base_url, "http://127.0.0.1:9000");
        assert_eq!(cfg.rest.user_agent, "agent/1.0");
        assert_eq!(cfg.auth.authorization().as_deref(), Some("Bearer t"));
        assert_eq!(cfg.rate_limiting.discovery_window_ms, 10);
        assert_eq!(cfg.rate_limiting.max_retries, Some(2));
        assert!(cfg.logging.json);
    }

    #[test]
    fn build_validated_returns_errors() {
        let result = ConfigBuilder::new().logging_level("nope").build_validated();
        let errors = result.unwrap_err();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].field, "logging.level");
    }

    #[test]
    fn build_validated_ok() {
        assert!(ConfigBuilder::default().build_validated().is_ok());
    }
}
