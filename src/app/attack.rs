//! Security-control probes.
//!
//! Each probe fires a fixed sequence of hostile-looking requests and stops at the first 403,
//! which is how the platform's IP blocking reports itself. A probe passes when it was blocked.

use crate::adapters::http::{ApiResponse, CtfClient, SignInRequest};
use crate::app::provision::AdminAuth;
use crate::domain::ports::RetryPolicy;
use crate::utils::console;
use crate::utils::error::Result;
use serde::Serialize;
use std::collections::BTreeMap;
use std::time::Duration;
use url::Url;

const BLOCKED: u16 = 403;

const SQL_PAYLOADS: [&str; 5] = [
    "1' OR '1'='1",
    "1' UNION SELECT NULL--",
    "1'; DROP TABLE users--",
    "1' AND 1=1--",
    "admin'--",
];

const XSS_PAYLOADS: [&str; 5] = [
    "<script>alert('XSS')</script>",
    "<img src=x onerror=alert(1)>",
    "javascript:alert(1)",
    "<iframe src='javascript:alert(1)'>",
    "<svg/onload=alert(1)>",
];

const TRAVERSAL_PAYLOADS: [&str; 5] = [
    "../../../etc/passwd",
    "..\\..\\..\\windows\\system32\\config\\sam",
    "....//....//....//etc/passwd",
    "%2e%2e%2f%2e%2e%2f%2e%2e%2fetc%2fpasswd",
    "../../../../../../etc/shadow",
];

#[cfg_attr(feature = "cli", derive(clap::ValueEnum))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Probe {
    SqlInjection,
    Xss,
    PathTraversal,
    BruteForceFlag,
    BruteForceLogin,
    RateLimit,
}

impl Probe {
    pub const ALL: [Probe; 6] = [
        Probe::SqlInjection,
        Probe::Xss,
        Probe::PathTraversal,
        Probe::BruteForceFlag,
        Probe::BruteForceLogin,
        Probe::RateLimit,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Probe::SqlInjection => "sql-injection",
            Probe::Xss => "xss",
            Probe::PathTraversal => "path-traversal",
            Probe::BruteForceFlag => "brute-force-flag",
            Probe::BruteForceLogin => "brute-force-login",
            Probe::RateLimit => "rate-limit",
        }
    }

    /// Payload probes keep going after a network error; the rest give up.
    fn stops_on_error(&self) -> bool {
        matches!(self, Probe::BruteForceFlag | Probe::BruteForceLogin | Probe::RateLimit)
    }
}

#[derive(Debug, Clone)]
pub struct AttackOptions {
    pub challenge_id: u64,
    pub target_login: String,
    pub brute_force_attempts: usize,
    pub rate_limit_requests: usize,
    pub payload_delay: Duration,
    pub brute_force_delay: Duration,
    pub rate_limit_delay: Duration,
    pub between_probes: Duration,
}

impl Default for AttackOptions {
    fn default() -> Self {
        Self {
            challenge_id: 1,
            target_login: "test_user".to_string(),
            brute_force_attempts: 54,
            rate_limit_requests: 300,
            payload_delay: Duration::from_millis(500),
            brute_force_delay: Duration::from_millis(100),
            rate_limit_delay: Duration::from_millis(33),
            between_probes: Duration::from_secs(2),
        }
    }
}

impl AttackOptions {
    /// Same request counts with every pause removed.
    pub fn without_delays(mut self) -> Self {
        self.payload_delay = Duration::ZERO;
        self.brute_force_delay = Duration::ZERO;
        self.rate_limit_delay = Duration::ZERO;
        self.between_probes = Duration::ZERO;
        self
    }

    fn delay_for(&self, probe: Probe) -> Duration {
        match probe {
            Probe::SqlInjection | Probe::Xss | Probe::PathTraversal => self.payload_delay,
            Probe::BruteForceFlag | Probe::BruteForceLogin => self.brute_force_delay,
            Probe::RateLimit => self.rate_limit_delay,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ProbeReport {
    pub probe: String,
    pub attempts: usize,
    pub blocked_at: Option<usize>,
    pub errors: usize,
    pub statuses: BTreeMap<u16, usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skipped: Option<String>,
}

impl ProbeReport {
    fn new(probe: Probe) -> Self {
        Self {
            probe: probe.name().to_string(),
            ..Self::default()
        }
    }

    fn skipped(probe: Probe, reason: impl Into<String>) -> Self {
        Self {
            skipped: Some(reason.into()),
            ..Self::new(probe)
        }
    }

    pub fn passed(&self) -> bool {
        self.blocked_at.is_some()
    }
}

/// One request of a probe.
#[derive(Debug, Clone, PartialEq)]
enum Attempt {
    Query { path: String, key: &'static str, value: String },
    File(String),
    SubmitFlag { challenge_id: u64, flag: String },
    SignIn { login_id: String, password: String },
    List,
}

impl Attempt {
    fn label(&self) -> &str {
        match self {
            Attempt::Query { value, .. } => value,
            Attempt::File(payload) => payload,
            Attempt::SubmitFlag { flag, .. } => flag,
            Attempt::SignIn { password, .. } => password,
            Attempt::List => "GET /api/challenges",
        }
    }

    async fn fire(&self, client: &CtfClient) -> Result<ApiResponse> {
        match self {
            Attempt::Query { path, key, value } => client.get_with_query(path, &[(*key, value.as_str())]).await,
            Attempt::File(payload) => client.get_url(file_url(client, payload)?).await,
            Attempt::SubmitFlag { challenge_id, flag } => client.submit_flag(*challenge_id, flag).await,
            Attempt::SignIn { login_id, password } => {
                let body = SignInRequest { login_id, password };
                client.post_json(client.auth_path(), &body).await
            }
            Attempt::List => client.get("/api/challenges").await,
        }
    }
}

/// `/api/files/<payload>` as one path segment. A payload that already carries
/// percent escapes is appended as written so the server sees `%2e`, not `%252e`.
fn file_url(client: &CtfClient, payload: &str) -> Result<Url> {
    if !is_percent_encoded(payload) {
        return client.url_from_segments(&["api", "files", payload]);
    }
    let mut url = client.url_from_segments(&["api", "files"])?;
    let path = format!("{}/{}", url.path(), payload);
    url.set_path(&path);
    Ok(url)
}

fn is_percent_encoded(payload: &str) -> bool {
    payload
        .as_bytes()
        .windows(3)
        .any(|w| w[0] == b'%' && w[1].is_ascii_hexdigit() && w[2].is_ascii_hexdigit())
}

fn attempts_for(probe: Probe, options: &AttackOptions) -> Vec<Attempt> {
    let challenge_path = format!("/api/challenges/{}", options.challenge_id);
    let query = |key: &'static str, payloads: &[&str]| {
        payloads
            .iter()
            .map(|p| Attempt::Query {
                path: challenge_path.clone(),
                key,
                value: p.to_string(),
            })
            .collect::<Vec<_>>()
    };

    match probe {
        Probe::SqlInjection => query("search", &SQL_PAYLOADS),
        Probe::Xss => query("name", &XSS_PAYLOADS),
        Probe::PathTraversal => TRAVERSAL_PAYLOADS.iter().map(|p| Attempt::File(p.to_string())).collect(),
        Probe::BruteForceFlag => (1..=options.brute_force_attempts)
            .map(|i| Attempt::SubmitFlag {
                challenge_id: options.challenge_id,
                flag: format!("FLAG{{fake_flag_{:03}}}", i),
            })
            .collect(),
        Probe::BruteForceLogin => (1..=options.brute_force_attempts)
            .map(|i| Attempt::SignIn {
                login_id: options.target_login.clone(),
                password: format!("wrong_password_{:03}", i),
            })
            .collect(),
        Probe::RateLimit => vec![Attempt::List; options.rate_limit_requests],
    }
}

/// Sends `probe`'s attempts in order until one comes back 403.
pub async fn run_probe(client: &CtfClient, probe: Probe, options: &AttackOptions) -> ProbeReport {
    let attempts = attempts_for(probe, options);
    let total = attempts.len();
    let delay = options.delay_for(probe);
    let mut report = ProbeReport::new(probe);

    console::header(&format!("{} probe", probe.name()));
    if probe == Probe::RateLimit {
        console::info(&format!("{} requests, one every {:?}", total, delay));
    }

    for (index, attempt) in attempts.iter().enumerate() {
        let n = index + 1;
        report.attempts = n;
        if probe != Probe::RateLimit {
            console::info(&format!("Attempt {}/{}: {}", n, total, attempt.label()));
        }

        match attempt.fire(client).await {
            Ok(response) => {
                *report.statuses.entry(response.status).or_default() += 1;
                if response.status == BLOCKED {
                    console::warning(&format!("Blocked (status {}) after {} attempts", BLOCKED, n));
                    report.blocked_at = Some(n);
                    break;
                }
                if probe != Probe::RateLimit {
                    console::success(&format!("Response: {}", response.status));
                } else if n % 50 == 0 {
                    console::success(&format!("{} requests done", n));
                }
            }
            Err(e) => {
                report.errors += 1;
                console::error(&format!("Error: {}", e.user_friendly_message()));
                if probe.stops_on_error() {
                    break;
                }
            }
        }

        if n < total && !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }

    tracing::info!(
        probe = probe.name(),
        attempts = report.attempts,
        blocked_at = ?report.blocked_at,
        errors = report.errors,
        "Probe finished"
    );
    report
}

/// Runs `probes` in order. Retries are turned off so that rate-limit responses are seen as sent.
pub async fn run(
    client: &CtfClient,
    admin: Option<&AdminAuth>,
    probes: &[Probe],
    options: &AttackOptions,
) -> Vec<ProbeReport> {
    let client = client.clone().with_retry_policy(RetryPolicy::none());
    let mut reports = Vec::with_capacity(probes.len());

    for (index, probe) in probes.iter().copied().enumerate() {
        if index > 0 && !options.between_probes.is_zero() {
            tokio::time::sleep(options.between_probes).await;
        }

        let report = if probe == Probe::BruteForceFlag {
            match admin {
                None => {
                    console::warning("brute-force-flag needs admin credentials; skipped");
                    ProbeReport::skipped(probe, "no admin credentials")
                }
                Some(admin) => match admin.session(&client).await {
                    Ok(authed) => {
                        console::success("Admin token issued");
                        run_probe(&authed, probe, options).await
                    }
                    Err(e) => {
                        console::error(&format!("Token issue failed: {}", e.user_friendly_message()));
                        ProbeReport::skipped(probe, e.to_string())
                    }
                },
            }
        } else {
            run_probe(&client, probe, options).await
        };
        reports.push(report);
    }

    print_summary(&reports);
    reports
}

pub fn print_summary(reports: &[ProbeReport]) {
    console::header("Probe summary");
    for report in reports {
        let line = match (&report.skipped, report.blocked_at) {
            (Some(reason), _) => format!("{:18} skipped ({})", report.probe, reason),
            (None, Some(at)) => format!("{:18} blocked after {} attempts", report.probe, at),
            (None, None) => format!(
                "{:18} not blocked ({} attempts, {} errors)",
                report.probe, report.attempts, report.errors
            ),
        };
        match (&report.skipped, report.passed()) {
            (Some(_), _) => console::warning(&line),
            (None, true) => console::success(&line),
            (None, false) => console::error(&line),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ClientSettings;
    use httpmock::prelude::*;

    fn client(server: &MockServer) -> CtfClient {
        CtfClient::new(&ClientSettings::new(server.base_url()).with_retry(RetryPolicy::none())).unwrap()
    }

    fn quick() -> AttackOptions {
        AttackOptions::default().without_delays()
    }

    #[test]
    fn test_attempt_lists() {
        let options = quick();
        assert_eq!(attempts_for(Probe::SqlInjection, &options).len(), 5);
        let flags = attempts_for(Probe::BruteForceFlag, &options);
        assert_eq!(flags.len(), 54);
        assert_eq!(flags[0].label(), "FLAG{fake_flag_001}");
        assert_eq!(flags[53].label(), "FLAG{fake_flag_054}");
        let logins = attempts_for(Probe::BruteForceLogin, &options);
        assert_eq!(logins[9].label(), "wrong_password_010");
        assert_eq!(attempts_for(Probe::RateLimit, &options).len(), 300);
    }

    #[tokio::test]
    async fn test_rate_limit_stops_at_first_403() {
        let server = MockServer::start_async().await;
        let blocked = server
            .mock_async(|when, then| {
                when.method(GET).path("/api/challenges");
                then.status(403);
            })
            .await;

        let report = run_probe(&client(&server), Probe::RateLimit, &quick()).await;
        assert_eq!(report.blocked_at, Some(1));
        assert_eq!(report.attempts, 1);
        assert!(report.passed());
        blocked.assert_hits_async(1).await;
    }

    #[tokio::test]
    async fn test_sql_probe_without_blocking_sends_every_payload() {
        let server = MockServer::start_async().await;
        let ok = server
            .mock_async(|when, then| {
                when.method(GET).path("/api/challenges/1").query_param_exists("search");
                then.status(200).body("{}");
            })
            .await;

        let report = run_probe(&client(&server), Probe::SqlInjection, &quick()).await;
        assert!(!report.passed());
        assert_eq!(report.attempts, 5);
        assert_eq!(report.statuses.get(&200), Some(&5));
        ok.assert_hits_async(5).await;
    }

    #[tokio::test]
    async fn test_login_brute_force_blocked_after_threshold() {
        let server = MockServer::start_async().await;
        let blocked = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/api/users/sign-in")
                    .json_body_partial(r#"{"loginId":"test_user","password":"wrong_password_006"}"#);
                then.status(403);
            })
            .await;
        let rejected = server
            .mock_async(|when, then| {
                when.method(POST).path("/api/users/sign-in");
                then.status(401);
            })
            .await;

        let report = run_probe(&client(&server), Probe::BruteForceLogin, &quick()).await;
        assert_eq!(report.blocked_at, Some(6));
        assert_eq!(report.statuses.get(&401), Some(&5));
        blocked.assert_hits_async(1).await;
        rejected.assert_hits_async(5).await;
    }

    #[test]
    fn test_traversal_payloads_go_out_as_one_file_segment() {
        let client = CtfClient::new(&ClientSettings::new("https://ctf.example.com/backend")).unwrap();
        let paths: Vec<String> = TRAVERSAL_PAYLOADS
            .iter()
            .map(|p| file_url(&client, p).unwrap().path().to_string())
            .collect();

        assert_eq!(paths[0], "/backend/api/files/..%2F..%2F..%2Fetc%2Fpasswd");
        assert_eq!(paths[1], "/backend/api/files/..%5C..%5C..%5Cwindows%5Csystem32%5Cconfig%5Csam");
        assert_eq!(paths[2], "/backend/api/files/....%2F%2F....%2F%2F....%2F%2Fetc%2Fpasswd");
        assert_eq!(paths[3], "/backend/api/files/%2e%2e%2f%2e%2e%2f%2e%2e%2fetc%2fpasswd");
        assert_eq!(paths[4], "/backend/api/files/..%2F..%2F..%2F..%2F..%2F..%2Fetc%2Fshadow");
        assert!(!paths.iter().any(|p| p.contains("%25")));
    }

    #[tokio::test]
    async fn test_path_traversal_sends_every_payload_to_files() {
        let server = MockServer::start_async().await;
        let files = server
            .mock_async(|when, then| {
                when.method(GET).path_contains("/api/files/");
                then.status(404);
            })
            .await;

        let report = run_probe(&client(&server), Probe::PathTraversal, &quick()).await;
        assert_eq!(report.attempts, 5);
        assert_eq!(report.blocked_at, None);
        files.assert_hits_async(5).await;
    }

    #[tokio::test]
    async fn test_network_errors_stop_brute_force_but_not_payload_probes() {
        let unreachable = CtfClient::new(
            &ClientSettings::new("http://127.0.0.1:1")
                .with_timeout(Duration::from_millis(200))
                .with_retry(RetryPolicy::none()),
        )
        .unwrap();

        let flags = run_probe(&unreachable, Probe::BruteForceFlag, &quick()).await;
        assert_eq!((flags.attempts, flags.errors), (1, 1));

        let xss = run_probe(&unreachable, Probe::Xss, &quick()).await;
        assert_eq!((xss.attempts, xss.errors), (5, 5));
    }

    #[tokio::test]
    async fn test_flag_probe_is_skipped_without_admin() {
        let server = MockServer::start_async().await;
        let reports = run(&client(&server), None, &[Probe::BruteForceFlag], &quick()).await;
        assert_eq!(reports.len(), 1);
        assert!(reports[0].skipped.is_some());
        assert!(!reports[0].passed());
    }
}
