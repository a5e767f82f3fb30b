use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProbeError {
    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("CSV processing error: {0}")]
    CsvError(#[from] csv::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Sign-in failed ({login_id}): {status} {body}")]
    AuthFailed {
        login_id: String,
        status: u16,
        body: String,
    },

    #[error("Token not found in sign-in response for {login_id}")]
    TokenMissing { login_id: String },

    #[error("Unexpected status {status} from {endpoint}: {body}")]
    UnexpectedStatus {
        endpoint: String,
        status: u16,
        body: String,
    },

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

    #[error("Input data error: {message}")]
    DataError { message: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Authentication,
    HttpStatus,
    Network,
    Configuration,
    Data,
    Io,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ErrorSeverity {
    Medium,
    High,
    Critical,
}

impl ProbeError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            ProbeError::AuthFailed { .. } | ProbeError::TokenMissing { .. } => {
                ErrorCategory::Authentication
            }
            ProbeError::UnexpectedStatus { .. } => ErrorCategory::HttpStatus,
            ProbeError::HttpError(e) if e.status().is_some() => ErrorCategory::HttpStatus,
            ProbeError::HttpError(_) => ErrorCategory::Network,
            ProbeError::ConfigValidationError { .. }
            | ProbeError::InvalidConfigValueError { .. }
            | ProbeError::MissingConfigError { .. } => ErrorCategory::Configuration,
            ProbeError::CsvError(_) | ProbeError::SerializationError(_) | ProbeError::DataError { .. } => {
                ErrorCategory::Data
            }
            ProbeError::IoError(_) => ErrorCategory::Io,
        }
    }

    /// Exit code policy: bad input is a usage problem, a dead server is retryable.
    pub fn severity(&self) -> ErrorSeverity {
        match self.category() {
            ErrorCategory::HttpStatus => ErrorSeverity::Medium,
            ErrorCategory::Network => ErrorSeverity::Medium,
            ErrorCategory::Authentication => ErrorSeverity::High,
            ErrorCategory::Configuration | ErrorCategory::Data => ErrorSeverity::High,
            ErrorCategory::Io => ErrorSeverity::Critical,
        }
    }

    pub fn exit_code(&self) -> i32 {
        match self.severity() {
            ErrorSeverity::Medium => 2,
            ErrorSeverity::High => 1,
            ErrorSeverity::Critical => 3,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, ProbeError::HttpError(e) if e.is_timeout())
    }

    pub fn user_friendly_message(&self) -> String {
        match self {
            ProbeError::AuthFailed { login_id, status, .. } => {
                format!("Could not sign in as '{}' (HTTP {})", login_id, status)
            }
            ProbeError::TokenMissing { login_id } => {
                format!("Signed in as '{}' but the server returned no access token", login_id)
            }
            ProbeError::HttpError(e) if e.is_timeout() => "The server did not answer in time".to_string(),
            ProbeError::HttpError(e) if e.is_connect() => "Could not connect to the server".to_string(),
            ProbeError::MissingConfigError { field } => format!("Missing setting: {}", field),
            ProbeError::InvalidConfigValueError { field, reason, .. } => {
                format!("Invalid setting {}: {}", field, reason)
            }
            other => other.to_string(),
        }
    }

    pub fn recovery_suggestion(&self) -> &'static str {
        match self.category() {
            ErrorCategory::Authentication => "Check the login id/password or pass a valid --token",
            ErrorCategory::HttpStatus => "Check that the account has the required role and the endpoint exists",
            ErrorCategory::Network => "Check --base-url and that the server is reachable; consider raising --timeout",
            ErrorCategory::Configuration => "Review the command-line flags and the --config TOML file",
            ErrorCategory::Data => "Check the input CSV/JSON file for missing columns or malformed rows",
            ErrorCategory::Io => "Check that the file paths exist and are writable",
        }
    }
}

impl From<toml::de::Error> for ProbeError {
    fn from(e: toml::de::Error) -> Self {
        ProbeError::ConfigValidationError {
            field: "toml_parsing".to_string(),
            message: e.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, ProbeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auth_errors_are_high_severity() {
        let e = ProbeError::AuthFailed {
            login_id: "alice".to_string(),
            status: 401,
            body: "bad credentials".to_string(),
        };
        assert_eq!(e.category(), ErrorCategory::Authentication);
        assert_eq!(e.exit_code(), 1);
        assert!(e.user_friendly_message().contains("alice"));
    }

    #[test]
    fn test_config_errors_map_to_configuration() {
        let e = ProbeError::MissingConfigError {
            field: "admin.password".to_string(),
        };
        assert_eq!(e.category(), ErrorCategory::Configuration);
        assert!(!e.is_timeout());
    }

    #[test]
    fn test_every_failure_exits_non_zero() {
        let status = ProbeError::UnexpectedStatus {
            endpoint: "/api/admin/member".to_string(),
            status: 403,
            body: String::new(),
        };
        assert_eq!(status.severity(), ErrorSeverity::Medium);
        assert_eq!(status.exit_code(), 2);

        let data = ProbeError::DataError {
            message: "no rows".to_string(),
        };
        assert_eq!(data.exit_code(), 1);
        assert!(ErrorSeverity::Medium < ErrorSeverity::High);
    }

    #[test]
    fn test_io_errors_are_critical() {
        let e = ProbeError::IoError(std::io::Error::new(std::io::ErrorKind::Other, "disk"));
        assert_eq!(e.severity(), ErrorSeverity::Critical);
        assert_eq!(e.exit_code(), 3);
    }
}
