use std::env;
use std::fmt;
use std::time::Duration;

const DEFAULT_MAX_TRAVERSAL_DEPTH: usize = 10;
const DEFAULT_TRANSACTION_TIMEOUT_SECS: u64 = 300;
const DEFAULT_PACKAGE_VALIDITY_DAYS: i64 = 365;

/// Distinguishes runtime behavior for different stages of the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppEnvironment {
    Development,
    Test,
    Production,
}

impl AppEnvironment {
    fn from_str(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "prod" | "production" => Self::Production,
            "test" | "ci" => Self::Test,
            _ => Self::Development,
        }
    }
}

/// Top-level configuration for the engine and its command line driver.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub environment: AppEnvironment,
    pub engine: EngineSettings,
    pub telemetry: TelemetryConfig,
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let environment = AppEnvironment::from_str(
            &env::var("MLM_ENV").unwrap_or_else(|_| "development".to_string()),
        );

        let max_traversal_depth = parse_var(
            "MLM_MAX_TRAVERSAL_DEPTH",
            DEFAULT_MAX_TRAVERSAL_DEPTH,
            ConfigError::InvalidTraversalDepth,
        )?;
        if max_traversal_depth == 0 {
            return Err(ConfigError::InvalidTraversalDepth);
        }

        let timeout_secs = parse_var(
            "MLM_TRANSACTION_TIMEOUT_SECS",
            DEFAULT_TRANSACTION_TIMEOUT_SECS,
            ConfigError::InvalidTransactionTimeout,
        )?;
        if timeout_secs == 0 {
            return Err(ConfigError::InvalidTransactionTimeout);
        }

        let validity_days = parse_var(
            "MLM_PACKAGE_VALIDITY_DAYS",
            DEFAULT_PACKAGE_VALIDITY_DAYS,
            ConfigError::InvalidValidityWindow,
        )?;
        if validity_days <= 0 {
            return Err(ConfigError::InvalidValidityWindow);
        }

        let fallback_enabled = match env::var("MLM_FALLBACK_ENABLED") {
            Ok(raw) => parse_flag(&raw).ok_or(ConfigError::InvalidFallbackFlag)?,
            Err(_) => true,
        };

        let log_level = env::var("MLM_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
        let log_format = match env::var("MLM_LOG_FORMAT") {
            Ok(raw) => LogFormat::parse(&raw).ok_or(ConfigError::InvalidLogFormat)?,
            Err(_) => LogFormat::default_for(environment),
        };

        Ok(Self {
            environment,
            engine: EngineSettings {
                max_traversal_depth,
                transaction_timeout: Duration::from_secs(timeout_secs),
                package_validity_days: validity_days,
                fallback_enabled,
            },
            telemetry: TelemetryConfig {
                log_level,
                format: log_format,
            },
        })
    }
}

fn parse_var<T: std::str::FromStr>(
    key: &str,
    default: T,
    error: ConfigError,
) -> Result<T, ConfigError> {
    match env::var(key) {
        Ok(raw) => raw.trim().parse::<T>().map_err(|_| error),
        Err(_) => Ok(default),
    }
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Knobs consumed by the approval engine itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineSettings {
    /// Maximum number of parent hops (or child levels) any traversal follows.
    pub max_traversal_depth: usize,
    /// Budget for the atomic attempt. Rank qualification dominates, so this is minutes.
    pub transaction_timeout: Duration,
    pub package_validity_days: i64,
    pub fallback_enabled: bool,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            max_traversal_depth: DEFAULT_MAX_TRAVERSAL_DEPTH,
            transaction_timeout: Duration::from_secs(DEFAULT_TRANSACTION_TIMEOUT_SECS),
            package_validity_days: DEFAULT_PACKAGE_VALIDITY_DAYS,
            fallback_enabled: true,
        }
    }
}

/// Tracing controls.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    pub log_level: String,
    pub format: LogFormat,
}

/// Line format for emitted events. `Json` suits log shippers that index payout fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Compact,
    Json,
}

impl LogFormat {
    /// Production ships structured lines unless `MLM_LOG_FORMAT` says otherwise.
    fn default_for(environment: AppEnvironment) -> Self {
        match environment {
            AppEnvironment::Production => Self::Json,
            AppEnvironment::Development | AppEnvironment::Test => Self::Compact,
        }
    }

    fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" | "text" => Some(Self::Compact),
            "json" => Some(Self::Json),
            _ => None,
        }
    }
}

#[derive(Debug)]
pub enum ConfigError {
    InvalidTraversalDepth,
    InvalidTransactionTimeout,
    InvalidValidityWindow,
    InvalidFallbackFlag,
    InvalidLogFormat,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::InvalidTraversalDepth => {
                write!(f, "MLM_MAX_TRAVERSAL_DEPTH must be a positive integer")
            }
            ConfigError::InvalidTransactionTimeout => {
                write!(f, "MLM_TRANSACTION_TIMEOUT_SECS must be a positive number of seconds")
            }
            ConfigError::InvalidValidityWindow => {
                write!(f, "MLM_PACKAGE_VALIDITY_DAYS must be a positive number of days")
            }
            ConfigError::InvalidFallbackFlag => {
                write!(f, "MLM_FALLBACK_ENABLED must be true/false")
            }
            ConfigError::InvalidLogFormat => {
                write!(f, "MLM_LOG_FORMAT must be `compact` or `json`")
            }
        }
    }
}

impl std::error::Error for ConfigError {}
