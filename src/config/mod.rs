#[cfg(feature = "cli")]
pub mod cli;
pub mod toml_config;

pub use toml_config::ProbeConfig;

use crate::domain::ports::{ConfigProvider, RetryPolicy};
use crate::utils::error::Result;
use crate::utils::validation::{self, Validate};
use std::time::Duration;

pub const DEFAULT_BASE_URL: &str = "http://localhost:8080";
pub const DEFAULT_AUTH_PATH: &str = "/api/users/sign-in";

/// Connection settings after defaults, profile and command-line flags have been layered.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientSettings {
    pub base_url: String,
    pub auth_path: String,
    pub timeout: Duration,
    pub retry: RetryPolicy,
    pub forwarded_for: Option<String>,
}

impl ClientSettings {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Self::default()
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            auth_path: DEFAULT_AUTH_PATH.to_string(),
            timeout: Duration::from_secs(10),
            retry: RetryPolicy::default(),
            forwarded_for: None,
        }
    }
}

impl ConfigProvider for ClientSettings {
    fn base_url(&self) -> &str {
        &self.base_url
    }

    fn request_timeout(&self) -> Duration {
        self.timeout
    }

    fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    fn forwarded_for(&self) -> Option<&str> {
        self.forwarded_for.as_deref()
    }

    fn auth_path(&self) -> &str {
        &self.auth_path
    }
}

impl Validate for ClientSettings {
    fn validate(&self) -> Result<()> {
        validation::validate_url("base_url", &self.base_url)?;
        validation::validate_api_path("auth_path", &self.auth_path)?;
        if self.timeout.is_zero() {
            return Err(crate::utils::error::ProbeError::InvalidConfigValueError {
                field: "timeout".to_string(),
                value: "0".to_string(),
                reason: "Every request needs a timeout".to_string(),
            });
        }
        if let Some(xff) = &self.forwarded_for {
            validation::validate_non_empty_string("forwarded_for", xff)?;
        }
        Ok(())
    }
}
