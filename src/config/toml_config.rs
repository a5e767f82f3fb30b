use crate::config::ClientSettings;
use crate::utils::error::{ProbeError, Result};
use crate::utils::validation::{self, Validate};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::OnceLock;
use std::time::Duration;

/// A saved target profile, e.g. `profiles/local.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProbeConfig {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub http: HttpSection,
    #[serde(default)]
    pub admin: Option<AdminSection>,
    #[serde(default)]
    pub load: LoadSection,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServerSection {
    pub base_url: Option<String>,
    pub auth_path: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HttpSection {
    pub timeout_seconds: Option<u64>,
    pub retries: Option<u32>,
    pub backoff_ms: Option<u64>,
    pub forwarded_for: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdminSection {
    pub login_id: String,
    pub password: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoadSection {
    pub workers: Option<usize>,
    pub stagger_ms: Option<u64>,
}

impl ProbeConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let processed = Self::substitute_env_vars(content);
        toml::from_str(&processed).map_err(|e| ProbeError::ConfigValidationError {
            field: "toml_parsing".to_string(),
            message: format!("TOML parsing error: {}", e),
        })
    }

    /// Replaces `${VAR}` with the environment value; unknown variables are left as written.
    fn substitute_env_vars(content: &str) -> String {
        static ENV_VAR: OnceLock<Regex> = OnceLock::new();
        let re = ENV_VAR.get_or_init(|| Regex::new(r"\$\{([^}]+)\}").expect("valid pattern"));

        re.replace_all(content, |caps: &regex::Captures| {
            let var_name = &caps[1];
            std::env::var(var_name).unwrap_or_else(|_| format!("${{{}}}", var_name))
        })
        .into_owned()
    }

    /// Defaults overlaid with whatever this profile sets.
    pub fn client_settings(&self) -> ClientSettings {
        let mut settings = ClientSettings::default();
        if let Some(url) = &self.server.base_url {
            settings.base_url = url.clone();
        }
        if let Some(path) = &self.server.auth_path {
            settings.auth_path = path.clone();
        }
        if let Some(secs) = self.http.timeout_seconds {
            settings.timeout = Duration::from_secs(secs);
        }
        let mut retry = settings.retry;
        if let Some(retries) = self.http.retries {
            retry.max_retries = retries;
        }
        if let Some(ms) = self.http.backoff_ms {
            retry.backoff = Duration::from_millis(ms);
        }
        settings.retry = retry;
        if let Some(xff) = &self.http.forwarded_for {
            settings.forwarded_for = Some(xff.clone());
        }
        settings
    }

    pub fn admin_credentials(&self) -> Option<(&str, &str)> {
        self.admin
            .as_ref()
            .map(|a| (a.login_id.as_str(), a.password.as_str()))
    }

    pub fn workers(&self) -> Option<usize> {
        self.load.workers
    }

    pub fn stagger(&self) -> Option<Duration> {
        self.load.stagger_ms.map(Duration::from_millis)
    }
}

impl Validate for ProbeConfig {
    fn validate(&self) -> Result<()> {
        if let Some(url) = &self.server.base_url {
            validation::validate_url("server.base_url", url)?;
        }
        if let Some(path) = &self.server.auth_path {
            validation::validate_api_path("server.auth_path", path)?;
        }
        if let Some(secs) = self.http.timeout_seconds {
            validation::validate_range("http.timeout_seconds", secs, 1, 600)?;
        }
        if let Some(retries) = self.http.retries {
            validation::validate_range("http.retries", retries, 0, 10)?;
        }
        if let Some(workers) = self.load.workers {
            validation::validate_positive_number("load.workers", workers, 1)?;
        }
        if let Some(admin) = &self.admin {
            validation::validate_non_empty_string("admin.login_id", &admin.login_id)?;
            validation::validate_non_empty_string("admin.password", &admin.password)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ports::{ConfigProvider, RetryPolicy};
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_parse_full_profile() {
        let toml_content = r#"
[server]
base_url = "https://ctf.example.com"
auth_path = "/api/v2/sign-in"

[http]
timeout_seconds = 3
retries = 4
backoff_ms = 50
forwarded_for = "10.1.2.3"

[admin]
login_id = "admin"
password = "1234"

[load]
workers = 16
stagger_ms = 100
"#;

        let config = ProbeConfig::from_toml_str(toml_content).unwrap();
        config.validate().unwrap();

        let settings = config.client_settings();
        assert_eq!(settings.base_url(), "https://ctf.example.com");
        assert_eq!(settings.auth_path(), "/api/v2/sign-in");
        assert_eq!(settings.request_timeout(), Duration::from_secs(3));
        assert_eq!(settings.retry_policy().max_retries, 4);
        assert_eq!(settings.retry_policy().backoff, Duration::from_millis(50));
        assert_eq!(settings.forwarded_for(), Some("10.1.2.3"));
        assert_eq!(config.admin_credentials(), Some(("admin", "1234")));
        assert_eq!(config.workers(), Some(16));
        assert_eq!(config.stagger(), Some(Duration::from_millis(100)));
    }

    #[test]
    fn test_empty_profile_keeps_defaults() {
        let config = ProbeConfig::from_toml_str("").unwrap();
        let settings = config.client_settings();
        assert_eq!(settings.base_url(), "http://localhost:8080");
        assert_eq!(settings.auth_path(), "/api/users/sign-in");
        assert_eq!(settings.retry_policy(), RetryPolicy::default());
        assert!(config.admin_credentials().is_none());
    }

    #[test]
    fn test_env_var_substitution() {
        std::env::set_var("CTF_PROBE_TEST_ADMIN_PW", "s3cret!");

        let toml_content = r#"
[admin]
login_id = "admin"
password = "${CTF_PROBE_TEST_ADMIN_PW}"

[server]
base_url = "${CTF_PROBE_TEST_UNSET_URL}"
"#;

        let config = ProbeConfig::from_toml_str(toml_content).unwrap();
        assert_eq!(config.admin_credentials(), Some(("admin", "s3cret!")));
        assert_eq!(
            config.server.base_url.as_deref(),
            Some("${CTF_PROBE_TEST_UNSET_URL}")
        );
        assert!(config.validate().is_err());

        std::env::remove_var("CTF_PROBE_TEST_ADMIN_PW");
    }

    #[test]
    fn test_config_validation() {
        let bad_path = ProbeConfig::from_toml_str("[server]\nauth_path = \"api/sign-in\"\n").unwrap();
        assert!(bad_path.validate().is_err());

        let zero_workers = ProbeConfig::from_toml_str("[load]\nworkers = 0\n").unwrap();
        assert!(zero_workers.validate().is_err());

        let malformed = ProbeConfig::from_toml_str("[http]\ntimeout_seconds = \"fast\"\n");
        assert!(matches!(
            malformed,
            Err(ProbeError::ConfigValidationError { .. })
        ));
    }

    #[test]
    fn test_config_from_file() {
        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file
            .write_all(b"[server]\nbase_url = \"http://127.0.0.1:9000\"\n")
            .unwrap();

        let config = ProbeConfig::from_file(temp_file.path()).unwrap();
        assert_eq!(config.client_settings().base_url, "http://127.0.0.1:9000");
    }
}
