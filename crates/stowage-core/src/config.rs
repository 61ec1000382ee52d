//! Configuration module
//!
//! Scalar settings are read once at startup from the process environment (a
//! `.env` file is honoured through dotenvy). Values that fail to parse fall back
//! to their defaults; [`Config::validate`] rejects values that parse but make no
//! sense.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

// Common constants
const SERVER_PORT: u16 = 3000;
const HTTP_RATE_LIMIT_PER_WINDOW: u32 = 100;
const HTTP_RATE_LIMIT_WINDOW_SECS: u64 = 60;
const BYTES_PER_MB: u64 = 1024 * 1024;

/// Output format of the log subscriber
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

impl LogFormat {
    fn parse(value: &str) -> Self {
        match value.trim().to_lowercase().as_str() {
            "json" => LogFormat::Json,
            _ => LogFormat::Pretty,
        }
    }
}

/// Credentials for the optional basic-auth guard on the upload route
#[derive(Clone)]
pub struct BasicAuthCredentials {
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for BasicAuthCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BasicAuthCredentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Base configuration for the HTTP surface
#[derive(Clone, Debug)]
pub struct BaseConfig {
    pub server_port: u16,
    pub environment: String,
    pub log_format: LogFormat,
    pub basic_auth: Option<BasicAuthCredentials>,
    /// Requests allowed per client per window; 0 disables throttling
    pub http_rate_limit_per_window: u32,
    pub http_rate_limit_window_secs: u64,
    /// Reverse proxies in front of the service; 0 ignores `X-Forwarded-For`
    pub trusted_proxy_count: usize,
}

/// What a file must look like to be accepted.
#[derive(Clone, Debug, PartialEq)]
pub struct UploadPolicy {
    pub max_file_size_bytes: u64,
    /// Lower-cased media type without parameters, e.g. `text/csv`
    pub allowed_content_type: String,
    /// Lower-cased extension including the leading dot, e.g. `.csv`
    pub allowed_extension: String,
}

impl UploadPolicy {
    pub fn new(
        max_file_size_bytes: u64,
        allowed_content_type: impl AsRef<str>,
        allowed_extension: impl AsRef<str>,
    ) -> Self {
        let content_type = allowed_content_type
            .as_ref()
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_lowercase();
        let extension = allowed_extension.as_ref().trim().to_lowercase();
        let extension = if extension.starts_with('.') {
            extension
        } else {
            format!(".{}", extension)
        };

        Self {
            max_file_size_bytes,
            allowed_content_type: content_type,
            allowed_extension: extension,
        }
    }

    /// Short human label for the allowed type: `text/csv` becomes `CSV`.
    pub fn type_label(&self) -> String {
        self.allowed_content_type
            .rsplit('/')
            .next()
            .unwrap_or(&self.allowed_content_type)
            .to_uppercase()
    }
}

impl Default for UploadPolicy {
    fn default() -> Self {
        Self::new(250 * BYTES_PER_MB, "text/csv", ".csv")
    }
}

/// Host-saturation thresholds used by the admission gate
#[derive(Clone, Debug, PartialEq)]
pub struct AdmissionConfig {
    /// Minimum fraction of memory that must be free, in `[0, 1]`
    pub memory_free_ratio_threshold: f64,
    /// Allowed one-minute load average per logical CPU
    pub cpu_load_multiplier: f64,
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            memory_free_ratio_threshold: 0.2,
            cpu_load_multiplier: 1.5,
        }
    }
}

/// Circuit breaker tuning
#[derive(Clone, Debug, PartialEq)]
pub struct CircuitBreakerConfig {
    /// Per-call timeout; an expired call counts as a failure
    pub timeout: Duration,
    /// Trip when the window's failure rate is strictly above this percentage
    pub error_threshold_percentage: f64,
    /// How long the breaker stays open before admitting a trial call
    pub reset_timeout: Duration,
    /// Length of the rolling statistics window
    pub rolling_window: Duration,
    /// Number of buckets the rolling window is split into
    pub rolling_buckets: u32,
    /// Minimum calls in the window before the breaker may trip
    pub volume_threshold: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(10_000),
            error_threshold_percentage: 50.0,
            reset_timeout: Duration::from_millis(30_000),
            rolling_window: Duration::from_millis(10_000),
            rolling_buckets: 10,
            volume_threshold: 0,
        }
    }
}

/// Upload service configuration
#[derive(Clone, Debug)]
pub struct UploadServiceConfig {
    pub base: BaseConfig,
    pub storage_root: PathBuf,
    pub upload: UploadPolicy,
    pub admission: AdmissionConfig,
    pub max_concurrent_uploads: usize,
    pub circuit_breaker: CircuitBreakerConfig,
}

/// Application configuration.
#[derive(Clone, Debug)]
pub struct Config(pub Box<UploadServiceConfig>);

impl Config {
    fn as_service(&self) -> &UploadServiceConfig {
        &self.0
    }

    /// Check if the application is running in production mode
    pub fn is_production(&self) -> bool {
        let environment = self.as_service().base.environment.to_lowercase();
        environment == "production" || environment == "prod"
    }

    pub fn from_env() -> Result<Self, anyhow::Error> {
        let config = UploadServiceConfig::from_env()?;
        Ok(Config(Box::new(config)))
    }

    pub fn validate(&self) -> Result<(), anyhow::Error> {
        self.as_service().validate()
    }

    // Convenience getters for common fields
    pub fn server_port(&self) -> u16 {
        self.as_service().base.server_port
    }

    pub fn environment(&self) -> &str {
        &self.as_service().base.environment
    }

    pub fn log_format(&self) -> LogFormat {
        self.as_service().base.log_format
    }

    pub fn basic_auth(&self) -> Option<&BasicAuthCredentials> {
        self.as_service().base.basic_auth.as_ref()
    }

    pub fn http_rate_limit_per_window(&self) -> u32 {
        self.as_service().base.http_rate_limit_per_window
    }

    pub fn http_rate_limit_window(&self) -> Duration {
        Duration::from_secs(self.as_service().base.http_rate_limit_window_secs)
    }

    pub fn trusted_proxy_count(&self) -> usize {
        self.as_service().base.trusted_proxy_count
    }

    pub fn storage_root(&self) -> &PathBuf {
        &self.as_service().storage_root
    }

    pub fn upload_policy(&self) -> &UploadPolicy {
        &self.as_service().upload
    }

    pub fn max_file_size_bytes(&self) -> u64 {
        self.as_service().upload.max_file_size_bytes
    }

    pub fn admission(&self) -> &AdmissionConfig {
        &self.as_service().admission
    }

    pub fn max_concurrent_uploads(&self) -> usize {
        self.as_service().max_concurrent_uploads
    }

    pub fn circuit_breaker(&self) -> &CircuitBreakerConfig {
        &self.as_service().circuit_breaker
    }
}

impl UploadServiceConfig {
    pub fn from_env() -> Result<Self, anyhow::Error> {
        dotenvy::dotenv().ok();
        Self::from_vars(|key| env::var(key).ok())
    }

    /// Build the configuration from an arbitrary key lookup.
    pub fn from_vars<F>(lookup: F) -> Result<Self, anyhow::Error>
    where
        F: Fn(&str) -> Option<String>,
    {
        const UPLOAD_DIR: &str = "./uploads";
        const MAX_FILE_SIZE: u64 = 250 * BYTES_PER_MB;
        const ALLOWED_MIMETYPE: &str = "text/csv";
        const ALLOWED_EXTENSION: &str = ".csv";
        const MEMORY_THRESHOLD: f64 = 0.2;
        const CPU_LOAD_MULTIPLIER: f64 = 1.5;
        const MAX_CONCURRENT: usize = 5;
        const BREAKER_TIMEOUT_MS: u64 = 10_000;
        const BREAKER_ERROR_THRESHOLD_PERCENTAGE: f64 = 50.0;
        const BREAKER_RESET_TIMEOUT_MS: u64 = 30_000;
        const BREAKER_ROLLING_WINDOW_MS: u64 = 10_000;
        const BREAKER_ROLLING_BUCKETS: u32 = 10;
        const BREAKER_VOLUME_THRESHOLD: u32 = 0;

        fn parsed<T: std::str::FromStr>(raw: Option<String>, default: T) -> T {
            raw.and_then(|value| value.trim().parse().ok())
                .unwrap_or(default)
        }

        let environment = lookup("ENVIRONMENT")
            .or_else(|| lookup("APP_ENV"))
            .unwrap_or_else(|| "development".to_string());

        let basic_auth = match (lookup("BASIC_AUTH_USER"), lookup("BASIC_AUTH_PASS")) {
            (Some(username), Some(password)) if !username.is_empty() && !password.is_empty() => {
                Some(BasicAuthCredentials { username, password })
            }
            _ => None,
        };

        let base = BaseConfig {
            server_port: parsed(lookup("PORT"), SERVER_PORT),
            environment,
            log_format: LogFormat::parse(&lookup("LOG_FORMAT").unwrap_or_default()),
            basic_auth,
            http_rate_limit_per_window: parsed(
                lookup("HTTP_RATE_LIMIT_PER_WINDOW"),
                HTTP_RATE_LIMIT_PER_WINDOW,
            ),
            http_rate_limit_window_secs: parsed(
                lookup("HTTP_RATE_LIMIT_WINDOW_SECS"),
                HTTP_RATE_LIMIT_WINDOW_SECS,
            ),
            trusted_proxy_count: parsed(lookup("TRUSTED_PROXY_COUNT"), 0),
        };

        let upload = UploadPolicy::new(
            parsed(lookup("MAX_FILE_SIZE"), MAX_FILE_SIZE),
            lookup("ALLOWED_MIMETYPE").unwrap_or_else(|| ALLOWED_MIMETYPE.to_string()),
            lookup("ALLOWED_EXTENSION").unwrap_or_else(|| ALLOWED_EXTENSION.to_string()),
        );

        let admission = AdmissionConfig {
            memory_free_ratio_threshold: parsed(lookup("MEMORY_THRESHOLD"), MEMORY_THRESHOLD),
            cpu_load_multiplier: parsed(lookup("CPU_LOAD_MULTIPLIER"), CPU_LOAD_MULTIPLIER),
        };

        let circuit_breaker = CircuitBreakerConfig {
            timeout: Duration::from_millis(parsed(
                lookup("BREAKER_TIMEOUT_MS"),
                BREAKER_TIMEOUT_MS,
            )),
            error_threshold_percentage: parsed(
                lookup("BREAKER_ERROR_THRESHOLD_PERCENTAGE"),
                BREAKER_ERROR_THRESHOLD_PERCENTAGE,
            ),
            reset_timeout: Duration::from_millis(parsed(
                lookup("BREAKER_RESET_TIMEOUT_MS"),
                BREAKER_RESET_TIMEOUT_MS,
            )),
            rolling_window: Duration::from_millis(parsed(
                lookup("BREAKER_ROLLING_WINDOW_MS"),
                BREAKER_ROLLING_WINDOW_MS,
            )),
            rolling_buckets: parsed(lookup("BREAKER_ROLLING_BUCKETS"), BREAKER_ROLLING_BUCKETS),
            volume_threshold: parsed(
                lookup("BREAKER_VOLUME_THRESHOLD"),
                BREAKER_VOLUME_THRESHOLD,
            ),
        };

        Ok(Self {
            base,
            storage_root: PathBuf::from(
                lookup("UPLOAD_DIR").unwrap_or_else(|| UPLOAD_DIR.to_string()),
            ),
            upload,
            admission,
            max_concurrent_uploads: parsed(lookup("MAX_CONCURRENT"), MAX_CONCURRENT),
            circuit_breaker,
        })
    }

    pub fn validate(&self) -> Result<(), anyhow::Error> {
        if self.upload.max_file_size_bytes == 0 {
            return Err(anyhow::anyhow!("MAX_FILE_SIZE must be greater than 0"));
        }

        if self.upload.allowed_content_type.is_empty() {
            return Err(anyhow::anyhow!("ALLOWED_MIMETYPE must not be empty"));
        }

        if self.upload.allowed_extension.len() < 2 {
            return Err(anyhow::anyhow!("ALLOWED_EXTENSION must not be empty"));
        }

        let ratio = self.admission.memory_free_ratio_threshold;
        if !(0.0..=1.0).contains(&ratio) {
            return Err(anyhow::anyhow!(
                "MEMORY_THRESHOLD must be between 0 and 1, got {}",
                ratio
            ));
        }

        if self.admission.cpu_load_multiplier <= 0.0 {
            return Err(anyhow::anyhow!(
                "CPU_LOAD_MULTIPLIER must be positive, got {}",
                self.admission.cpu_load_multiplier
            ));
        }

        if self.max_concurrent_uploads == 0 {
            return Err(anyhow::anyhow!("MAX_CONCURRENT must be at least 1"));
        }

        let breaker = &self.circuit_breaker;
        if breaker.error_threshold_percentage <= 0.0 || breaker.error_threshold_percentage > 100.0
        {
            return Err(anyhow::anyhow!(
                "BREAKER_ERROR_THRESHOLD_PERCENTAGE must be in (0, 100], got {}",
                breaker.error_threshold_percentage
            ));
        }

        if breaker.timeout.is_zero() || breaker.reset_timeout.is_zero() {
            return Err(anyhow::anyhow!(
                "BREAKER_TIMEOUT_MS and BREAKER_RESET_TIMEOUT_MS must be greater than 0"
            ));
        }

        if breaker.rolling_window.is_zero() || breaker.rolling_buckets == 0 {
            return Err(anyhow::anyhow!(
                "BREAKER_ROLLING_WINDOW_MS and BREAKER_ROLLING_BUCKETS must be greater than 0"
            ));
        }

        if self.base.http_rate_limit_per_window > 0 && self.base.http_rate_limit_window_secs == 0
        {
            return Err(anyhow::anyhow!(
                "HTTP_RATE_LIMIT_WINDOW_SECS must be greater than 0 when throttling is enabled"
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> UploadServiceConfig {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        UploadServiceConfig::from_vars(|key| vars.get(key).cloned()).unwrap()
    }

    #[test]
    fn test_defaults() {
        let config = config_from(&[]);
        assert_eq!(config.base.server_port, 3000);
        assert_eq!(config.upload.max_file_size_bytes, 250 * 1024 * 1024);
        assert_eq!(config.upload.allowed_content_type, "text/csv");
        assert_eq!(config.upload.allowed_extension, ".csv");
        assert_eq!(config.admission, AdmissionConfig::default());
        assert_eq!(config.max_concurrent_uploads, 5);
        assert_eq!(config.circuit_breaker, CircuitBreakerConfig::default());
        assert!(config.base.basic_auth.is_none());
        assert_eq!(config.base.log_format, LogFormat::Pretty);
        assert_eq!(config.base.trusted_proxy_count, 0);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_overrides_are_applied() {
        let config = config_from(&[
            ("MAX_FILE_SIZE", "1048576"),
            ("ALLOWED_MIMETYPE", "Application/JSON; charset=utf-8"),
            ("ALLOWED_EXTENSION", "JSON"),
            ("MEMORY_THRESHOLD", "0.1"),
            ("MAX_CONCURRENT", "2"),
            ("BREAKER_RESET_TIMEOUT_MS", "500"),
            ("LOG_FORMAT", "json"),
            ("BASIC_AUTH_USER", "admin"),
            ("BASIC_AUTH_PASS", "secret"),
            ("TRUSTED_PROXY_COUNT", "1"),
        ]);
        assert_eq!(config.upload.max_file_size_bytes, 1_048_576);
        assert_eq!(config.base.trusted_proxy_count, 1);
        assert_eq!(config.upload.allowed_content_type, "application/json");
        assert_eq!(config.upload.allowed_extension, ".json");
        assert_eq!(config.admission.memory_free_ratio_threshold, 0.1);
        assert_eq!(config.max_concurrent_uploads, 2);
        assert_eq!(
            config.circuit_breaker.reset_timeout,
            Duration::from_millis(500)
        );
        assert_eq!(config.base.log_format, LogFormat::Json);
        assert_eq!(
            config.base.basic_auth.as_ref().map(|c| c.username.as_str()),
            Some("admin")
        );
    }

    #[test]
    fn test_unparseable_values_fall_back_to_defaults() {
        let config = config_from(&[("PORT", "not-a-port"), ("MAX_CONCURRENT", "-3")]);
        assert_eq!(config.base.server_port, 3000);
        assert_eq!(config.max_concurrent_uploads, 5);
    }

    #[test]
    fn test_basic_auth_requires_both_values() {
        let config = config_from(&[("BASIC_AUTH_USER", "admin")]);
        assert!(config.base.basic_auth.is_none());
    }

    #[test]
    fn test_validate_rejects_out_of_range_values() {
        let config = config_from(&[("MEMORY_THRESHOLD", "1.5")]);
        assert!(config.validate().is_err());

        let config = config_from(&[("MAX_CONCURRENT", "0")]);
        assert!(config.validate().is_err());

        let config = config_from(&[("BREAKER_ERROR_THRESHOLD_PERCENTAGE", "0")]);
        assert!(config.validate().is_err());

        let config = config_from(&[("CPU_LOAD_MULTIPLIER", "0")]);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_type_label() {
        assert_eq!(UploadPolicy::default().type_label(), "CSV");
        assert_eq!(
            UploadPolicy::new(1, "application/json", ".json").type_label(),
            "JSON"
        );
    }

    #[test]
    fn test_debug_redacts_password() {
        let creds = BasicAuthCredentials {
            username: "admin".to_string(),
            password: "hunter2".to_string(),
        };
        let rendered = format!("{:?}", creds);
        assert!(rendered.contains("admin"));
        assert!(!rendered.contains("hunter2"));
    }
}
