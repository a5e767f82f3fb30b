use crate::adapters::http::AuthStyle;
use crate::app::attack::{AttackOptions, Probe};
use crate::app::flag_submit::{SelectionMode, SubmitOptions};
use crate::app::index_perf::{PerfMode, PerfOptions};
use crate::app::provision::{AdminAuth, LoginCase, PasswordMode, ProvisionOptions};
use crate::app::race::{RaceSetup, DEFAULT_RESULTS, DEFAULT_TEST_DATA};
use crate::config::{ClientSettings, ProbeConfig};
use crate::utils::error::Result;
use crate::utils::validation::{self, Validate};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_WORKERS: usize = 8;
const DEFAULT_STAGGER: Duration = Duration::from_millis(100);

#[derive(Debug, Parser)]
#[command(name = "ctf-probe")]
#[command(about = "Provisioning, load and security probes for a CTF platform REST API")]
pub struct Cli {
    #[command(flatten)]
    pub connection: ConnectionArgs,

    #[command(subcommand)]
    pub command: Command,
}

/// Flags shared by every subcommand. Each one overrides the `--config` profile.
#[derive(Debug, Clone, Default, Args)]
pub struct ConnectionArgs {
    #[arg(long, global = true, help = "TOML profile with server, http, admin and load sections")]
    pub config: Option<PathBuf>,

    #[arg(long, global = true, help = "Platform base URL (default http://localhost:8080)")]
    pub base_url: Option<String>,

    #[arg(long, global = true, help = "Per-request timeout in seconds")]
    pub timeout: Option<u64>,

    #[arg(long, global = true, help = "Extra attempts on connect errors and 429/5xx")]
    pub retries: Option<u32>,

    #[arg(long, global = true)]
    pub backoff_ms: Option<u64>,

    #[arg(long, global = true, help = "Send this X-Forwarded-For value")]
    pub xff: Option<String>,

    #[arg(long, global = true, help = "Sign-in path (default /api/users/sign-in)")]
    pub auth_endpoint: Option<String>,

    #[arg(short, long, global = true, help = "Enable verbose output")]
    pub verbose: bool,

    #[arg(long, global = true, help = "Emit logs as JSON")]
    pub log_json: bool,

    #[arg(long, global = true, help = "Log the driver's own CPU and memory per phase")]
    pub monitor: bool,
}

impl ConnectionArgs {
    pub fn load_profile(&self) -> Result<Option<ProbeConfig>> {
        match &self.config {
            Some(path) => {
                let profile = ProbeConfig::from_file(path)?;
                profile.validate()?;
                tracing::debug!("Loaded profile from {}", path.display());
                Ok(Some(profile))
            }
            None => Ok(None),
        }
    }

    /// Defaults, then the profile, then these flags.
    pub fn client_settings(&self, profile: Option<&ProbeConfig>) -> ClientSettings {
        let mut settings = profile.map(ProbeConfig::client_settings).unwrap_or_default();
        if let Some(url) = &self.base_url {
            settings.base_url = url.clone();
        }
        if let Some(path) = &self.auth_endpoint {
            settings.auth_path = path.clone();
        }
        if let Some(secs) = self.timeout {
            settings.timeout = Duration::from_secs(secs);
        }
        if let Some(retries) = self.retries {
            settings.retry.max_retries = retries;
        }
        if let Some(ms) = self.backoff_ms {
            settings.retry.backoff = Duration::from_millis(ms);
        }
        if let Some(xff) = &self.xff {
            settings.forwarded_for = Some(xff.clone());
        }
        settings
    }
}

#[derive(Debug, Clone, Args)]
pub struct AdminArgs {
    #[arg(long, help = "Admin access token; skips the admin sign-in")]
    pub token: Option<String>,

    #[arg(long = "login-id", help = "Admin login id")]
    pub login_id: Option<String>,

    #[arg(long, help = "Admin password")]
    pub password: Option<String>,

    #[arg(long, default_value = "Authorization")]
    pub auth_header: String,

    #[arg(long, default_value = "Bearer", help = "Token scheme; empty sends the bare token")]
    pub auth_scheme: String,

    #[arg(long, help = "Also send the token as this cookie")]
    pub auth_cookie: Option<String>,
}

impl AdminArgs {
    /// Flags first, then the profile's `[admin]` section.
    pub fn resolve(&self, profile: Option<&ProbeConfig>) -> Result<AdminAuth> {
        let from_profile = profile.and_then(ProbeConfig::admin_credentials);
        AdminAuth::resolve(
            self.token.clone(),
            self.login_id
                .clone()
                .or_else(|| from_profile.map(|(id, _)| id.to_string())),
            self.password
                .clone()
                .or_else(|| from_profile.map(|(_, pw)| pw.to_string())),
        )
    }

    pub fn auth_style(&self) -> AuthStyle {
        AuthStyle {
            header: self.auth_header.clone(),
            scheme: self.auth_scheme.clone(),
            cookie_name: self.auth_cookie.clone(),
        }
    }
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Register members from a CSV, create their teams and assign them
    Provision(ProvisionArgs),

    /// Submit one flag from one account per team, concurrently
    Submit(SubmitArgs),

    /// Concurrent submission race against a single challenge
    Race {
        #[command(subcommand)]
        action: RaceCommand,
    },

    /// Latency before and after a database index change
    IndexPerf {
        #[command(subcommand)]
        action: IndexPerfCommand,
    },

    /// Probe the platform's blocking of hostile traffic
    Attack(AttackArgs),
}

#[derive(Debug, Clone, Args)]
pub struct ProvisionArgs {
    #[arg(help = "Member CSV with email, univ and role columns")]
    pub csv: PathBuf,

    #[command(flatten)]
    pub admin: AdminArgs,

    #[arg(long, default_value = "teamName")]
    pub team_column: String,

    #[arg(long, default_value = "team")]
    pub team_prefix: String,

    #[arg(long, default_value = "2", help = "Members per generated team when the CSV has no team column")]
    pub per_team: usize,

    #[arg(long, value_enum, default_value_t = PasswordMode::Policy)]
    pub password_mode: PasswordMode,

    #[arg(long, default_value = "16")]
    pub password_length: usize,

    #[arg(long, value_enum, default_value_t = LoginCase::Lower)]
    pub login_case: LoginCase,

    #[arg(long, help = "Write teamName,name,loginId,email,password to this CSV")]
    pub export_passwords: Option<String>,

    #[arg(long, default_value = "200", help = "Pause between admin calls in milliseconds")]
    pub sleep_ms: u64,

    #[arg(long)]
    pub cleanup_members: bool,

    #[arg(long)]
    pub cleanup_teams: bool,

    #[arg(long, help = "Only clean up; implies both targets when neither is given")]
    pub cleanup_only: bool,
}

impl ProvisionArgs {
    pub fn options(&self) -> ProvisionOptions {
        ProvisionOptions {
            csv_path: self.csv.clone(),
            team_column: self.team_column.clone(),
            team_prefix: self.team_prefix.clone(),
            per_team: self.per_team,
            password_mode: self.password_mode,
            password_length: self.password_length,
            login_case: self.login_case,
            export_path: self.export_passwords.clone(),
            sleep: Duration::from_millis(self.sleep_ms),
            cleanup_members: self.cleanup_members,
            cleanup_teams: self.cleanup_teams,
            cleanup_only: self.cleanup_only,
        }
    }
}

impl Validate for ProvisionArgs {
    fn validate(&self) -> Result<()> {
        validation::validate_path("csv", &self.csv.to_string_lossy())?;
        validation::validate_non_empty_string("team_column", &self.team_column)?;
        validation::validate_positive_number("per_team", self.per_team, 1)?;
        validation::validate_range("password_length", self.password_length, 8, 256)?;
        Ok(())
    }
}

#[derive(Debug, Clone, Args)]
pub struct SubmitArgs {
    #[arg(long, default_value = "generated_passwords.csv")]
    pub csv: PathBuf,

    #[arg(long, default_value = "1")]
    pub challenge_id: u64,

    #[arg(long)]
    pub flag: String,

    #[arg(long, help = "Concurrent workers (default from profile, else 8)")]
    pub workers: Option<usize>,

    #[arg(long, help = "Pause between task launches in milliseconds (default from profile, else 100)")]
    pub sleep_ms: Option<u64>,

    #[arg(long, value_enum, default_value_t = SelectionMode::OddPerTeam)]
    pub select: SelectionMode,
}

impl SubmitArgs {
    pub fn options(&self, profile: Option<&ProbeConfig>) -> SubmitOptions {
        SubmitOptions {
            challenge_id: self.challenge_id,
            flag: self.flag.clone(),
            workers: self
                .workers
                .or_else(|| profile.and_then(ProbeConfig::workers))
                .unwrap_or(DEFAULT_WORKERS),
            stagger: self
                .sleep_ms
                .map(Duration::from_millis)
                .or_else(|| profile.and_then(ProbeConfig::stagger))
                .unwrap_or(DEFAULT_STAGGER),
        }
    }
}

impl Validate for SubmitArgs {
    fn validate(&self) -> Result<()> {
        validation::validate_path("csv", &self.csv.to_string_lossy())?;
        validation::validate_non_empty_string("flag", &self.flag)?;
        if let Some(workers) = self.workers {
            validation::validate_positive_number("workers", workers, 1)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Args)]
pub struct RaceFiles {
    #[arg(long, default_value = DEFAULT_TEST_DATA)]
    pub data: String,

    #[arg(long, default_value = DEFAULT_RESULTS)]
    pub results: String,

    #[arg(long, default_value = ".", help = "Directory the data and result files live in")]
    pub dir: PathBuf,
}

#[derive(Debug, Clone, Args)]
pub struct RaceSetupArgs {
    #[command(flatten)]
    pub admin: AdminArgs,

    #[arg(long, default_value = "100")]
    pub users: usize,

    #[arg(long, default_value = "1", help = "Id the created challenge will get")]
    pub challenge_id: u64,

    #[arg(long, default_value = "FLAG{test_concurrency_2025}")]
    pub flag: String,

    #[arg(long, default_value = "mju.ac.kr")]
    pub email_domain: String,

    #[arg(long, default_value = "50")]
    pub sleep_ms: u64,
}

impl RaceSetupArgs {
    pub fn options(&self) -> RaceSetup {
        RaceSetup {
            users: self.users,
            teams: self.users,
            challenge_id: self.challenge_id,
            flag: self.flag.clone(),
            email_domain: self.email_domain.clone(),
            sleep: Duration::from_millis(self.sleep_ms),
            ..RaceSetup::default()
        }
    }
}

#[derive(Debug, Subcommand)]
pub enum RaceCommand {
    /// Create the test users, teams and challenge and save the fixture
    Setup {
        #[command(flatten)]
        setup: RaceSetupArgs,
        #[command(flatten)]
        files: RaceFiles,
    },

    /// Fire the concurrent submissions against a saved fixture
    Run {
        #[arg(long, default_value = "100")]
        concurrency: usize,
        #[command(flatten)]
        files: RaceFiles,
    },

    /// Setup, a pause, then run
    All {
        #[command(flatten)]
        setup: RaceSetupArgs,
        #[arg(long, default_value = "100")]
        concurrency: usize,
        #[arg(long, default_value = "5", help = "Seconds to wait between setup and run")]
        settle_secs: u64,
        #[command(flatten)]
        files: RaceFiles,
    },
}

#[derive(Debug, Clone, Args)]
pub struct PerfArgs {
    #[arg(long, default_value = "100")]
    pub users: usize,

    #[arg(long, default_value = "1")]
    pub challenge_id: u64,

    #[arg(long, default_value = DEFAULT_TEST_DATA)]
    pub data: String,

    #[arg(long, default_value = "generated_passwords.csv")]
    pub csv: String,

    #[arg(long, default_value = "3", help = "Seconds to wait before the run")]
    pub warmup_secs: u64,
}

impl PerfArgs {
    pub fn options(&self, mode: PerfMode) -> PerfOptions {
        PerfOptions {
            mode,
            users: self.users,
            challenge_id: self.challenge_id,
            data_path: self.data.clone(),
            csv_path: self.csv.clone(),
            warmup: Duration::from_secs(self.warmup_secs),
        }
    }
}

#[derive(Debug, Subcommand)]
pub enum IndexPerfCommand {
    /// Measure before the index is created
    Baseline {
        #[command(flatten)]
        args: PerfArgs,
        #[arg(long, default_value = ".")]
        dir: PathBuf,
    },

    /// Measure after the index is created
    Indexed {
        #[command(flatten)]
        args: PerfArgs,
        #[arg(long, default_value = ".")]
        dir: PathBuf,
    },

    /// Compare the two saved runs
    Compare {
        #[arg(long, default_value = ".")]
        dir: PathBuf,
    },
}

#[derive(Debug, Clone, Args)]
pub struct AttackArgs {
    #[arg(long = "probe", value_enum, help = "Probe to run; repeat for several (default: all)")]
    pub probes: Vec<Probe>,

    #[command(flatten)]
    pub admin: AdminArgs,

    #[arg(long, default_value = "1")]
    pub challenge_id: u64,

    #[arg(long, default_value = "test_user", help = "Account the login brute force targets")]
    pub target_login: String,

    #[arg(long, help = "Send every attempt back to back")]
    pub no_delay: bool,
}

impl AttackArgs {
    pub fn probes(&self) -> Vec<Probe> {
        if self.probes.is_empty() {
            Probe::ALL.to_vec()
        } else {
            self.probes.clone()
        }
    }

    pub fn options(&self) -> AttackOptions {
        let options = AttackOptions {
            challenge_id: self.challenge_id,
            target_login: self.target_login.clone(),
            ..AttackOptions::default()
        };
        if self.no_delay {
            options.without_delays()
        } else {
            options
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_override_profile() {
        let profile = ProbeConfig::from_toml_str(
            r#"
            [server]
            base_url = "http://profile:8080"
            [http]
            timeout_seconds = 30
            retries = 5
            "#,
        )
        .unwrap();
        let cli = Cli::parse_from([
            "ctf-probe",
            "--base-url",
            "http://flag:9090",
            "--retries",
            "0",
            "submit",
            "--flag",
            "FLAG{x}",
        ]);

        let settings = cli.connection.client_settings(Some(&profile));
        assert_eq!(settings.base_url, "http://flag:9090");
        assert_eq!(settings.timeout, Duration::from_secs(30));
        assert_eq!(settings.retry.max_retries, 0);
    }

    #[test]
    fn test_submit_workers_fall_back_to_profile() {
        let profile = ProbeConfig::from_toml_str("[load]\nworkers = 7\nstagger_ms = 25\n").unwrap();
        let cli = Cli::parse_from(["ctf-probe", "submit", "--flag", "FLAG{x}"]);
        let Command::Submit(args) = cli.command else {
            panic!("expected submit");
        };
        let options = args.options(Some(&profile));
        assert_eq!(options.workers, 7);
        assert_eq!(options.stagger, Duration::from_millis(25));
    }

    #[test]
    fn test_submit_defaults_without_flags_or_profile() {
        let cli = Cli::parse_from(["ctf-probe", "submit", "--flag", "FLAG{x}"]);
        let Command::Submit(args) = cli.command else {
            panic!("expected submit");
        };
        let options = args.options(None);
        assert_eq!(options.workers, 8);
        assert_eq!(options.stagger, Duration::from_millis(100));

        let cli = Cli::parse_from(["ctf-probe", "submit", "--flag", "FLAG{x}", "--sleep-ms", "0"]);
        let Command::Submit(args) = cli.command else {
            panic!("expected submit");
        };
        assert_eq!(args.options(None).stagger, Duration::ZERO);
    }

    #[test]
    fn test_provision_args_map_to_options() {
        let cli = Cli::parse_from([
            "ctf-probe",
            "provision",
            "members.csv",
            "--token",
            "t",
            "--password-mode",
            "hex32",
            "--cleanup-only",
        ]);
        let Command::Provision(args) = cli.command else {
            panic!("expected provision");
        };
        let options = args.options();
        assert_eq!(options.password_mode, PasswordMode::Hex32);
        assert_eq!(options.cleanup_targets(), (true, true));
        assert!(matches!(args.admin.resolve(None).unwrap(), AdminAuth::Token(t) if t == "t"));
    }

    #[test]
    fn test_admin_credentials_from_profile() {
        let profile =
            ProbeConfig::from_toml_str("[admin]\nlogin_id = \"admin\"\npassword = \"pw\"\n").unwrap();
        let cli = Cli::parse_from(["ctf-probe", "attack"]);
        let Command::Attack(args) = cli.command else {
            panic!("expected attack");
        };
        let auth = args.admin.resolve(Some(&profile)).unwrap();
        assert!(matches!(auth, AdminAuth::Credentials { login_id, .. } if login_id == "admin"));
        assert!(args.admin.resolve(None).is_err());
        assert_eq!(args.admin.auth_style(), AuthStyle::default());
    }

    #[test]
    fn test_attack_defaults_to_every_probe() {
        let cli = Cli::parse_from(["ctf-probe", "attack", "--probe", "rate-limit", "--no-delay"]);
        let Command::Attack(args) = cli.command else {
            panic!("expected attack");
        };
        assert_eq!(args.probes(), vec![Probe::RateLimit]);
        assert!(args.options().rate_limit_delay.is_zero());

        let cli = Cli::parse_from(["ctf-probe", "attack"]);
        let Command::Attack(args) = cli.command else {
            panic!("expected attack");
        };
        assert_eq!(args.probes().len(), 6);
    }
}
