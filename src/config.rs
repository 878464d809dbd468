use std::fmt;
use std::time::Duration;

use tracing::Level;

use crate::relay::DEFAULT_SYSTEM_PROMPT;

pub const DEFAULT_UPSTREAM_BASE_URL: &str = "https://api.groq.com/openai/v1";
pub const DEFAULT_MODEL: &str = "llama-3.3-70b-versatile";
pub const API_KEY_ENV: &str = "GROQ_API_KEY";

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for field '{field}': {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Incompatible configuration: {reason}")]
    IncompatibleConfig { reason: String },

    #[error("Missing required field: {field}")]
    MissingRequired { field: String },
}

/// Result type for configuration operations
pub type ConfigResult<T> = Result<T, ConfigError>;

#[derive(Clone)]
pub struct RelayConfig {
    pub host: String,
    pub port: u16,
    pub upstream_base_url: String,
    pub api_key: String,
    pub model: String,
    pub system_prompt: String,
    /// Upper bound for one upstream call, body streaming included.
    pub request_timeout_secs: u64,
    pub connect_timeout_secs: u64,
    pub max_payload_size: usize,
    /// Text emitted in-band when the upstream stream breaks mid-response.
    pub stream_error_marker: Option<String>,
    pub log_level: Level,
    pub log_dir: Option<String>,
    pub log_json: bool,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            upstream_base_url: DEFAULT_UPSTREAM_BASE_URL.to_string(),
            api_key: String::new(),
            model: DEFAULT_MODEL.to_string(),
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            request_timeout_secs: 600,
            connect_timeout_secs: 10,
            max_payload_size: 1024 * 1024,
            stream_error_marker: None,
            log_level: Level::INFO,
            log_dir: None,
            log_json: false,
        }
    }
}

// Hand-written so the credential never ends up in logs.
impl fmt::Debug for RelayConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RelayConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("upstream_base_url", &self.upstream_base_url)
            .field("api_key", &"<redacted>")
            .field("model", &self.model)
            .field("system_prompt", &self.system_prompt)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("connect_timeout_secs", &self.connect_timeout_secs)
            .field("max_payload_size", &self.max_payload_size)
            .field("stream_error_marker", &self.stream_error_marker)
            .field("log_level", &self.log_level)
            .field("log_dir", &self.log_dir)
            .field("log_json", &self.log_json)
            .finish()
    }
}

impl RelayConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// Full URL of the upstream chat completions endpoint.
    pub fn completions_url(&self) -> String {
        format!(
            "{}/chat/completions",
            self.upstream_base_url.trim_end_matches('/')
        )
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.api_key.trim().is_empty() {
            return Err(ConfigError::MissingRequired {
                field: format!("api_key (set {})", API_KEY_ENV),
            });
        }

        if !(self.upstream_base_url.starts_with("http://")
            || self.upstream_base_url.starts_with("https://"))
        {
            return Err(ConfigError::InvalidValue {
                field: "upstream_base_url".to_string(),
                value: self.upstream_base_url.clone(),
                reason: "URL must start with http:// or https://".to_string(),
            });
        }

        Self::require_non_empty("model", &self.model)?;
        Self::require_non_empty("system_prompt", &self.system_prompt)?;
        Self::require_positive("request_timeout_secs", self.request_timeout_secs)?;
        Self::require_positive("connect_timeout_secs", self.connect_timeout_secs)?;
        Self::require_positive("max_payload_size", self.max_payload_size as u64)?;

        if self.connect_timeout_secs > self.request_timeout_secs {
            return Err(ConfigError::IncompatibleConfig {
                reason: format!(
                    "connect_timeout_secs ({}) must not exceed request_timeout_secs ({})",
                    self.connect_timeout_secs, self.request_timeout_secs
                ),
            });
        }

        if let Some(marker) = &self.stream_error_marker {
            Self::require_non_empty("stream_error_marker", marker)?;
        }

        Ok(())
    }

    fn require_non_empty(field: &str, value: &str) -> ConfigResult<()> {
        if value.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: field.to_string(),
                value: value.to_string(),
                reason: "must not be empty".to_string(),
            });
        }
        Ok(())
    }

    fn require_positive(field: &str, value: u64) -> ConfigResult<()> {
        if value == 0 {
            return Err(ConfigError::InvalidValue {
                field: field.to_string(),
                value: value.to_string(),
                reason: "must be greater than 0".to_string(),
            });
        }
        Ok(())
    }
}
