mod llm;
mod observability;
mod rate_limit;
mod server;
mod tools;

pub use llm::*;
pub use observability::*;
pub use rate_limit::*;
pub use server::*;
pub use tools::*;

use serde::{Deserialize, Serialize};
use std::fmt;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub tools: ToolsConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Config validation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Severity level for a configuration issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSeverity {
    Error,
    Warning,
}

/// A single configuration validation issue.
#[derive(Debug, Clone)]
pub struct ConfigError {
    pub severity: ConfigSeverity,
    pub field: String,
    pub message: String,
}

impl ConfigError {
    fn error(field: &str, message: &str) -> Self {
        Self {
            severity: ConfigSeverity::Error,
            field: field.into(),
            message: message.into(),
        }
    }

    fn warning(field: &str, message: &str) -> Self {
        Self {
            severity: ConfigSeverity::Warning,
            field: field.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self.severity {
            ConfigSeverity::Error => "ERROR",
            ConfigSeverity::Warning => "WARN",
        };
        write!(f, "[{tag}] {}: {}", self.field, self.message)
    }
}

impl Config {
    /// Validate the configuration and return a list of issues.
    ///
    /// An empty vec means the config is usable as-is. Callers refuse to
    /// start when any issue has [`ConfigSeverity::Error`].
    pub fn validate(&self) -> Vec<ConfigError> {
        let mut errors = Vec::new();

        if self.server.port == 0 {
            errors.push(ConfigError::error("server.port", "port must be greater than 0"));
        }
        if self.server.host.is_empty() {
            errors.push(ConfigError::error("server.host", "host must not be empty"));
        }
        if self.server.max_concurrent_requests == 0 {
            errors.push(ConfigError::error(
                "server.max_concurrent_requests",
                "must be greater than 0",
            ));
        }

        if self.llm.base_url.trim().is_empty() {
            errors.push(ConfigError::error("llm.base_url", "base_url must not be empty"));
        }
        if self.llm.default_model.trim().is_empty() {
            errors.push(ConfigError::error("llm.default_model", "model must not be empty"));
        }
        if self.llm.auth.mode == AuthMode::None {
            errors.push(ConfigError::warning(
                "llm.auth.mode",
                "upstream requests will be sent without credentials",
            ));
        }

        if self.rate_limit.window_secs == 0 {
            errors.push(ConfigError::error(
                "rate_limit.window_secs",
                "window must be at least 1 second",
            ));
        }
        if self.rate_limit.max_requests == 0 {
            errors.push(ConfigError::error(
                "rate_limit.max_requests",
                "max_requests must be greater than 0",
            ));
        }

        if self.tools.web_fetch.timeout_secs == 0 {
            errors.push(ConfigError::error(
                "tools.web_fetch.timeout_secs",
                "timeout must be at least 1 second",
            ));
        }
        if self.tools.web_fetch.max_chars == 0 {
            errors.push(ConfigError::error(
                "tools.web_fetch.max_chars",
                "max_chars must be greater than 0",
            ));
        }

        if !(0.0..=1.0).contains(&self.observability.sample_rate) {
            errors.push(ConfigError::error(
                "observability.sample_rate",
                "sample_rate must be between 0.0 and 1.0",
            ));
        }

        if self.server.cors.allowed_origins.len() == 1
            && self.server.cors.allowed_origins[0] == "*"
        {
            errors.push(ConfigError::warning(
                "server.cors.allowed_origins",
                "wildcard \"*\" allows all origins (not recommended for production)",
            ));
        }

        errors
    }

    pub fn has_errors(&self) -> bool {
        self.validate()
            .iter()
            .any(|e| e.severity == ConfigSeverity::Error)
    }
}
