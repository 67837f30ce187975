use thiserror::Error;

#[derive(Error, Debug)]
pub enum LoadTestError {
    #[error("HTTP client error: {0}")]
    HttpClientError(#[from] reqwest::Error),

    #[error("CSV export error: {0}")]
    CsvError(#[from] csv::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Task join error: {0}")]
    TaskJoinError(#[from] tokio::task::JoinError),

    #[error("Configuration error: {message}")]
    ConfigError { message: String },

    #[error("Configuration validation failed for '{field}': {message}")]
    ConfigValidationError { field: String, message: String },

    #[error("Invalid value '{value}' for '{field}': {reason}")]
    InvalidConfigValueError {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Missing required configuration: {field}")]
    MissingConfigError { field: String },

    #[error("Invalid duration '{value}': {reason}")]
    InvalidDurationError { value: String, reason: String },

    #[error("Invalid threshold '{expression}': {reason}")]
    InvalidThresholdError { expression: String, reason: String },

    #[error("Setup failed: {message}")]
    SetupError { message: String },

    #[error("Scenario '{scenario}' failed: {message}")]
    ScenarioError { scenario: String, message: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Configuration,
    Network,
    Io,
    Execution,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ErrorSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl LoadTestError {
    pub fn config(message: impl Into<String>) -> Self {
        Self::ConfigError {
            message: message.into(),
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::HttpClientError(_) => ErrorCategory::Network,
            Self::CsvError(_) | Self::IoError(_) | Self::SerializationError(_) => ErrorCategory::Io,
            Self::ConfigError { .. }
            | Self::ConfigValidationError { .. }
            | Self::InvalidConfigValueError { .. }
            | Self::MissingConfigError { .. }
            | Self::InvalidDurationError { .. }
            | Self::InvalidThresholdError { .. } => ErrorCategory::Configuration,
            Self::TaskJoinError(_) | Self::SetupError { .. } | Self::ScenarioError { .. } => {
                ErrorCategory::Execution
            }
        }
    }

    pub fn severity(&self) -> ErrorSeverity {
        match self {
            // 目標服務暫時無法連線，重跑即可
            Self::HttpClientError(_) | Self::SetupError { .. } => ErrorSeverity::Medium,
            Self::CsvError(_) | Self::SerializationError(_) => ErrorSeverity::Low,
            Self::TaskJoinError(_) => ErrorSeverity::Critical,
            Self::IoError(_) | Self::ScenarioError { .. } => ErrorSeverity::High,
            _ => ErrorSeverity::High,
        }
    }

    pub fn recovery_suggestion(&self) -> &'static str {
        match self.category() {
            ErrorCategory::Configuration => {
                "Check the load profile TOML (durations like '30s', thresholds like 'p(95)<500') or run with --list-profiles"
            }
            ErrorCategory::Network => {
                "Make sure the gateway is reachable at the configured base_url and try again"
            }
            ErrorCategory::Io => "Check that the export path exists and is writable",
            ErrorCategory::Execution => "Re-run with --verbose to see per-iteration logs",
        }
    }

    pub fn user_friendly_message(&self) -> String {
        match self.category() {
            ErrorCategory::Configuration => format!("Invalid load test configuration: {}", self),
            ErrorCategory::Network => format!("Could not talk to the gateway: {}", self),
            ErrorCategory::Io => format!("Could not write results: {}", self),
            ErrorCategory::Execution => format!("Load test aborted: {}", self),
        }
    }
}

pub type Result<T> = std::result::Result<T, LoadTestError>;
