//! Bulk member and team provisioning through the admin API.
//!
//! Members come from a CSV sheet. Login ids are derived from the email local part and
//! passwords are generated to the platform's password policy before anything is sent.
//! Calls run one after another with a pause in between, so a large sheet does not trip
//! the server's rate limiter.

use crate::adapters::http::{classify_create, classify_delete, AddMemberRequest, ApiResponse, CtfClient};
use crate::domain::model::{Credential, Member, Outcome, TaskResult};
use crate::domain::ports::Storage;
use crate::utils::console;
use crate::utils::error::{ProbeError, Result};
use base64::Engine;
use rand::seq::SliceRandom;
use rand::Rng;
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Duration;

const LOWER: &[u8] = b"abcdefghijklmnopqrstuvwxyz";
const UPPER: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ";
const DIGITS: &[u8] = b"0123456789";
const SPECIAL: &[u8] = b"!@#$%^&*";
const MIN_PASSWORD_LENGTH: usize = 8;

#[cfg_attr(feature = "cli", derive(clap::ValueEnum))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PasswordMode {
    /// Keep whatever the sheet has.
    None,
    #[default]
    Policy,
    Hex64,
    Hex32,
    Sha256,
    Base64,
}

#[cfg_attr(feature = "cli", derive(clap::ValueEnum))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoginCase {
    #[default]
    Lower,
    Original,
}

#[derive(Debug, Clone)]
pub enum AdminAuth {
    Token(String),
    Credentials { login_id: String, password: String },
}

impl AdminAuth {
    /// An explicit token wins; otherwise both login id and password are needed.
    pub fn resolve(
        token: Option<String>,
        login_id: Option<String>,
        password: Option<String>,
    ) -> Result<Self> {
        match (token, login_id, password) {
            (Some(token), _, _) if !token.is_empty() => Ok(AdminAuth::Token(token)),
            (_, Some(login_id), Some(password)) => Ok(AdminAuth::Credentials { login_id, password }),
            _ => Err(ProbeError::MissingConfigError {
                field: "--token or --login-id/--password".to_string(),
            }),
        }
    }

    /// A client that sends the admin token on every call.
    pub async fn session(&self, client: &CtfClient) -> Result<CtfClient> {
        match self {
            AdminAuth::Token(token) => Ok(client.with_token(token.clone())),
            AdminAuth::Credentials { login_id, password } => {
                let token = client.sign_in(login_id, password).await?;
                tracing::info!("Signed in as admin '{}'", login_id);
                Ok(client.with_token(token))
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProvisionOptions {
    pub csv_path: PathBuf,
    pub team_column: String,
    pub team_prefix: String,
    pub per_team: usize,
    pub password_mode: PasswordMode,
    pub password_length: usize,
    pub login_case: LoginCase,
    pub export_path: Option<String>,
    pub sleep: Duration,
    pub cleanup_members: bool,
    pub cleanup_teams: bool,
    pub cleanup_only: bool,
}

impl Default for ProvisionOptions {
    fn default() -> Self {
        Self {
            csv_path: PathBuf::from("members.csv"),
            team_column: "teamName".to_string(),
            team_prefix: "team".to_string(),
            per_team: 2,
            password_mode: PasswordMode::Policy,
            password_length: 16,
            login_case: LoginCase::Lower,
            export_path: None,
            sleep: Duration::from_millis(200),
            cleanup_members: false,
            cleanup_teams: false,
            cleanup_only: false,
        }
    }
}

impl ProvisionOptions {
    /// Cleanup-only without an explicit target cleans both members and teams.
    pub fn cleanup_targets(&self) -> (bool, bool) {
        if self.cleanup_only && !(self.cleanup_members || self.cleanup_teams) {
            (true, true)
        } else {
            (self.cleanup_members, self.cleanup_teams)
        }
    }
}

#[derive(Debug, Clone)]
pub struct MemberSheet {
    pub members: Vec<Member>,
    pub has_team_column: bool,
    pub has_name_column: bool,
}

pub fn load_members(path: &Path, team_column: &str) -> Result<MemberSheet> {
    let content = std::fs::read_to_string(path)?;
    parse_members(&content, team_column)
}

pub fn parse_members(content: &str, team_column: &str) -> Result<MemberSheet> {
    let content = content.trim_start_matches('\u{feff}');
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .flexible(true)
        .from_reader(content.as_bytes());

    let headers = reader.headers()?.clone();
    let column = |name: &str| headers.iter().position(|h| h == name);
    let team_idx = column(team_column);
    let name_idx = column("name");
    let required = [("email", column("email")), ("univ", column("univ")), ("role", column("role"))];
    let login_idx = column("loginId");
    let password_idx = column("password");

    let mut members = Vec::new();
    for (row, record) in reader.records().enumerate() {
        let record = record?;
        let field = |idx: Option<usize>| {
            idx.and_then(|i| record.get(i))
                .unwrap_or_default()
                .to_string()
        };

        for (key, idx) in required {
            if field(idx).is_empty() {
                return Err(ProbeError::DataError {
                    message: format!("CSV row {} missing required field '{}'", row + 2, key),
                });
            }
        }

        members.push(Member {
            email: field(required[0].1),
            login_id: field(login_idx),
            password: field(password_idx),
            univ: field(required[1].1),
            role: field(required[2].1),
            team_name: team_idx.map(|i| field(Some(i))).filter(|t| !t.is_empty()),
            name: name_idx.map(|i| field(Some(i))).filter(|n| !n.is_empty()),
        });
    }

    if members.is_empty() {
        return Err(ProbeError::DataError {
            message: "CSV appears empty".to_string(),
        });
    }

    Ok(MemberSheet {
        members,
        has_team_column: team_idx.is_some(),
        has_name_column: name_idx.is_some(),
    })
}

/// Login id from the email local part: alphanumerics only, unique within `used`.
pub fn derive_login_id(email: &str, used: &mut HashSet<String>, case: LoginCase) -> String {
    let local = email.split('@').next().unwrap_or_default();
    let mut base: String = local.chars().filter(|c| c.is_ascii_alphanumeric()).collect();
    if case == LoginCase::Lower {
        base = base.to_ascii_lowercase();
    }
    if base.is_empty() {
        let mut rng = rand::rng();
        base = format!("user{:03}", rng.random_range(0..1000));
    }

    let mut candidate = base.clone();
    let mut suffix = 2;
    while used.contains(&candidate) {
        candidate = format!("{}{}", base, suffix);
        suffix += 1;
    }
    used.insert(candidate.clone());
    candidate
}

pub fn derive_login_ids(members: &mut [Member], case: LoginCase) {
    let mut used = HashSet::with_capacity(members.len());
    for member in members.iter_mut() {
        member.login_id = derive_login_id(&member.email, &mut used, case);
    }
}

fn pick(rng: &mut impl Rng, alphabet: &[u8]) -> char {
    alphabet[rng.random_range(0..alphabet.len())] as char
}

/// Random password with at least one lower, upper, digit and special character.
pub fn generate_policy_password(length: usize) -> String {
    let length = length.max(MIN_PASSWORD_LENGTH);
    let all: Vec<u8> = [LOWER, UPPER, DIGITS, SPECIAL].concat();
    let mut rng = rand::rng();

    let mut chars = vec![
        pick(&mut rng, LOWER),
        pick(&mut rng, UPPER),
        pick(&mut rng, DIGITS),
        pick(&mut rng, SPECIAL),
    ];
    while chars.len() < length {
        chars.push(pick(&mut rng, &all));
    }
    chars.shuffle(&mut rng);
    chars.into_iter().collect()
}

pub fn validate_password_policy(password: &str) -> bool {
    let has = |set: &[u8]| password.bytes().any(|b| set.contains(&b));
    password.len() >= MIN_PASSWORD_LENGTH
        && has(LOWER)
        && has(UPPER)
        && has(DIGITS)
        && has(SPECIAL)
        && password
            .bytes()
            .all(|b| LOWER.contains(&b) || UPPER.contains(&b) || DIGITS.contains(&b) || SPECIAL.contains(&b))
}

/// Candidate password for `mode`; `None` for [`PasswordMode::None`].
pub fn generate_password(mode: PasswordMode, length: usize) -> Option<String> {
    let mut bytes = [0u8; 32];
    rand::rng().fill(&mut bytes);

    match mode {
        PasswordMode::None => None,
        PasswordMode::Policy => Some(generate_policy_password(length)),
        PasswordMode::Hex64 => Some(hex::encode(bytes)),
        PasswordMode::Hex32 => Some(hex::encode(&bytes[..16])),
        PasswordMode::Sha256 => Some(hex::encode(Sha256::digest(bytes))),
        PasswordMode::Base64 => Some(base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes)),
    }
}

/// Gives every member a fresh password; anything failing the policy is replaced by a policy password.
pub fn assign_passwords(members: &mut [Member], mode: PasswordMode, length: usize) {
    for member in members.iter_mut() {
        let Some(candidate) = generate_password(mode, length) else {
            return;
        };
        member.password = if validate_password_policy(&candidate) {
            candidate
        } else {
            generate_policy_password(length)
        };
    }
}

/// Team names in creation order. Without a team column, members are chunked into `<prefix>-NN`.
pub fn assign_teams(
    members: &mut [Member],
    has_team_column: bool,
    prefix: &str,
    per_team: usize,
) -> Result<Vec<String>> {
    let mut names = Vec::new();

    if has_team_column {
        let mut seen = HashSet::new();
        for member in members.iter() {
            let Some(team) = member.team_name.as_deref() else {
                return Err(ProbeError::DataError {
                    message: format!("teamName missing for member {}", member.email),
                });
            };
            if seen.insert(team.to_string()) {
                names.push(team.to_string());
            }
        }
    } else {
        for (idx, chunk) in members.chunks_mut(per_team.max(1)).enumerate() {
            let name = format!("{}-{:02}", prefix, idx + 1);
            for member in chunk {
                member.team_name = Some(name.clone());
            }
            names.push(name);
        }
    }

    Ok(names)
}

#[derive(Debug, Clone, Default)]
pub struct ProvisionReport {
    pub registrations: Vec<TaskResult>,
    pub teams: Vec<TaskResult>,
    pub assignments: Vec<TaskResult>,
    pub member_deletions: Vec<TaskResult>,
    pub team_deletions: Vec<TaskResult>,
    pub credentials: Vec<Credential>,
    pub exported: Option<String>,
}

impl ProvisionReport {
    pub fn failures(&self) -> usize {
        [
            &self.registrations,
            &self.teams,
            &self.assignments,
            &self.member_deletions,
            &self.team_deletions,
        ]
        .iter()
        .flat_map(|step| step.iter())
        .filter(|r| matches!(r.outcome, Outcome::Rejected | Outcome::Error))
        .count()
    }
}

async fn admin_step<F>(id: &str, action: &str, call: F, classify: fn(u16) -> Outcome) -> TaskResult
where
    F: Future<Output = Result<ApiResponse>>,
{
    match call.await {
        Ok(response) => {
            let outcome = classify(response.status);
            let detail = match outcome {
                Outcome::Success => format!("{}: {}", action, id),
                Outcome::AlreadyDone => format!("{} skipped ({}): {}", action, response.status, id),
                _ => format!("{} failed: {} | {} | {}", action, id, response.status, response.preview()),
            };
            console::outcome(outcome, &detail);
            tracing::debug!(status = response.status, "{}", detail);
            TaskResult::new(id, outcome, detail, response.latency_ms)
        }
        Err(e) => {
            let detail = format!("{} failed: {} | {}", action, id, e);
            console::outcome(Outcome::Error, &detail);
            tracing::warn!("{}", detail);
            TaskResult::error(id, detail)
        }
    }
}

async fn pause(sleep: Duration) {
    if !sleep.is_zero() {
        tokio::time::sleep(sleep).await;
    }
}

fn user_id_text(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::Number(n) => Some(n.to_string()),
        serde_json::Value::String(s) if !s.is_empty() => Some(s.clone()),
        _ => None,
    }
}

async fn delete_members(admin: &CtfClient, members: &[Member], sleep: Duration) -> Vec<TaskResult> {
    let records = match admin.list_members().await {
        Ok(records) => records,
        Err(e) => {
            console::warning(&format!("Failed to fetch member list: {}", e));
            return Vec::new();
        }
    };

    let lookup: HashMap<String, serde_json::Value> = records
        .into_iter()
        .filter_map(|r| {
            let email = r.email.filter(|e| !e.is_empty())?.to_lowercase();
            Some((email, r.user_id.unwrap_or(serde_json::Value::Null)))
        })
        .collect();
    if lookup.is_empty() {
        console::warning("User lookup empty, skipping member deletions.");
        return Vec::new();
    }

    let mut results = Vec::with_capacity(members.len());
    for member in members {
        let Some(user_id) = lookup.get(&member.email.to_lowercase()) else {
            let detail = format!("User email not found: {}", member.email);
            console::outcome(Outcome::AlreadyDone, &detail);
            results.push(TaskResult::new(&member.email, Outcome::AlreadyDone, detail, 0.0));
            continue;
        };
        let Some(user_id) = user_id_text(user_id) else {
            let detail = format!("userId missing for email: {}", member.email);
            console::outcome(Outcome::AlreadyDone, &detail);
            results.push(TaskResult::new(&member.email, Outcome::AlreadyDone, detail, 0.0));
            continue;
        };

        results.push(
            admin_step(
                &member.email,
                "Deleted user",
                admin.delete_member(&user_id),
                classify_delete,
            )
            .await,
        );
        pause(sleep).await;
    }
    results
}

pub fn credentials_csv(credentials: &[Credential]) -> Result<Vec<u8>> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    for credential in credentials {
        writer.serialize(credential)?;
    }
    writer.into_inner().map_err(|e| ProbeError::IoError(e.into_error()))
}

/// Registers the sheet's members, creates their teams and assigns them, then runs any cleanup.
pub async fn run(
    admin: &CtfClient,
    storage: &impl Storage,
    options: &ProvisionOptions,
) -> Result<ProvisionReport> {
    let sheet = load_members(&options.csv_path, &options.team_column)?;
    let mut members = sheet.members;
    tracing::info!(
        "Loaded {} members from {} (team column: {}, name column: {})",
        members.len(),
        options.csv_path.display(),
        sheet.has_team_column,
        sheet.has_name_column
    );

    derive_login_ids(&mut members, options.login_case);
    let (cleanup_members, cleanup_teams) = options.cleanup_targets();

    if !options.cleanup_only {
        assign_passwords(&mut members, options.password_mode, options.password_length);
    }

    let team_names = assign_teams(
        &mut members,
        sheet.has_team_column,
        &options.team_prefix,
        options.per_team,
    )?;

    let mut report = ProvisionReport::default();

    if !options.cleanup_only {
        console::header("Registering members");
        for member in &members {
            let request = AddMemberRequest {
                email: member.email.clone(),
                login_id: member.login_id.clone(),
                password: member.password.clone(),
                univ: member.univ.clone(),
                role: member.role.clone(),
                name: None,
            };
            report.registrations.push(
                admin_step(&member.email, "Registered", admin.add_member(&request), classify_create).await,
            );
            pause(options.sleep).await;
        }

        console::header(&format!("Creating {} teams", team_names.len()));
        for team in &team_names {
            let created = admin_step(team, "Team created", admin.create_team(team), classify_create).await;
            let usable = matches!(created.outcome, Outcome::Success | Outcome::AlreadyDone);
            report.teams.push(created);
            if !usable {
                console::warning(&format!("Skipping additions for team: {}", team));
                continue;
            }

            for member in members.iter().filter(|m| m.team_name.as_deref() == Some(team)) {
                let id = format!("{} -> {}", member.email, team);
                report.assignments.push(
                    admin_step(
                        &id,
                        "Added to team",
                        admin.add_team_member(team, &member.email),
                        classify_create,
                    )
                    .await,
                );
                pause(options.sleep).await;
            }
        }
    }

    if cleanup_members {
        console::header("Deleting members listed in CSV");
        report.member_deletions = delete_members(admin, &members, options.sleep).await;
    }

    if cleanup_teams {
        console::header(&format!("Deleting {} team(s)", team_names.len()));
        for team in &team_names {
            report
                .team_deletions
                .push(admin_step(team, "Deleted team", admin.delete_team(team), classify_delete).await);
            pause(options.sleep).await;
        }
    }

    report.credentials = members.iter().map(Member::to_credential).collect();

    if let Some(path) = options.export_path.as_deref().filter(|_| !options.cleanup_only) {
        storage.write_file(path, &credentials_csv(&report.credentials)?).await?;
        console::success(&format!("Exported: {}", path));
        tracing::info!("Exported {} credentials to {}", report.credentials.len(), path);
        report.exported = Some(path.to_string());
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn member(email: &str, team: Option<&str>) -> Member {
        Member {
            email: email.to_string(),
            login_id: String::new(),
            password: String::new(),
            univ: "MJU".to_string(),
            role: "ROLE_USER".to_string(),
            team_name: team.map(str::to_string),
            name: None,
        }
    }

    #[test]
    fn test_derive_login_id_sanitizes_and_dedupes() {
        let mut used = HashSet::new();
        assert_eq!(derive_login_id("Kim.Dev@mju.ac.kr", &mut used, LoginCase::Lower), "kimdev");
        assert_eq!(derive_login_id("kim-dev@other.kr", &mut used, LoginCase::Lower), "kimdev2");
        assert_eq!(derive_login_id("kimdev@x.kr", &mut used, LoginCase::Lower), "kimdev3");
        assert_eq!(derive_login_id("Kim.Dev@x.kr", &mut used, LoginCase::Original), "KimDev");
    }

    #[test]
    fn test_derive_login_id_falls_back_to_random_user() {
        let mut used = HashSet::new();
        let id = derive_login_id("...@mju.ac.kr", &mut used, LoginCase::Lower);
        assert!(id.starts_with("user"));
        assert_eq!(id.len(), 7);
        assert!(id[4..].chars().all(|c| c.is_ascii_digit()));
    }

    #[test]
    fn test_policy_passwords_always_pass_policy() {
        for length in [0, 8, 16, 40] {
            let pw = generate_policy_password(length);
            assert_eq!(pw.len(), length.max(8));
            assert!(validate_password_policy(&pw), "{} failed policy", pw);
        }
    }

    #[test]
    fn test_password_policy_rules() {
        assert!(validate_password_policy("Aa1!aaaa"));
        assert!(!validate_password_policy("Aa1!aaa"));
        assert!(!validate_password_policy("aa1!aaaa"));
        assert!(!validate_password_policy("Aa1aaaaa"));
        assert!(!validate_password_policy("Aa1!aaa~"));
    }

    #[test]
    fn test_non_policy_modes_are_replaced_by_policy_passwords() {
        assert_eq!(generate_password(PasswordMode::Hex64, 16).unwrap().len(), 64);
        assert_eq!(generate_password(PasswordMode::Hex32, 16).unwrap().len(), 32);
        assert_eq!(generate_password(PasswordMode::Sha256, 16).unwrap().len(), 64);
        assert_eq!(generate_password(PasswordMode::Base64, 16).unwrap().len(), 43);
        assert!(generate_password(PasswordMode::None, 16).is_none());

        let mut members = vec![member("a@x.kr", None), member("b@x.kr", None)];
        assign_passwords(&mut members, PasswordMode::Hex64, 12);
        for m in &members {
            assert!(validate_password_policy(&m.password));
            assert_eq!(m.password.len(), 12);
        }

        let mut untouched = vec![member("a@x.kr", None)];
        untouched[0].password = "from-sheet".to_string();
        assign_passwords(&mut untouched, PasswordMode::None, 12);
        assert_eq!(untouched[0].password, "from-sheet");
    }

    #[test]
    fn test_team_column_groups_in_first_seen_order() {
        let mut members = vec![
            member("a@x.kr", Some("Blue")),
            member("b@x.kr", Some("Red")),
            member("c@x.kr", Some("Blue")),
        ];
        let names = assign_teams(&mut members, true, "team", 2).unwrap();
        assert_eq!(names, vec!["Blue", "Red"]);

        members[1].team_name = None;
        assert!(matches!(
            assign_teams(&mut members, true, "team", 2),
            Err(ProbeError::DataError { .. })
        ));
    }

    #[test]
    fn test_auto_teams_are_chunked_with_two_digit_suffix() {
        let mut members: Vec<Member> = (0..5).map(|i| member(&format!("u{}@x.kr", i), None)).collect();
        let names = assign_teams(&mut members, false, "crew", 2).unwrap();
        assert_eq!(names, vec!["crew-01", "crew-02", "crew-03"]);
        assert_eq!(members[4].team_name.as_deref(), Some("crew-03"));
    }

    #[test]
    fn test_parse_members_with_bom_and_optional_columns() {
        let csv = "\u{feff}email,univ,role,teamName,name\n kim@mju.ac.kr ,MJU,ROLE_USER,Blue,Kim\nlee@mju.ac.kr,MJU,ROLE_USER,,\n";
        let sheet = parse_members(csv, "teamName").unwrap();
        assert!(sheet.has_team_column);
        assert!(sheet.has_name_column);
        assert_eq!(sheet.members[0].email, "kim@mju.ac.kr");
        assert_eq!(sheet.members[0].team_name.as_deref(), Some("Blue"));
        assert_eq!(sheet.members[1].team_name, None);
        assert_eq!(sheet.members[1].name, None);
    }

    #[test]
    fn test_parse_members_rejects_missing_fields_and_empty_sheets() {
        let missing_role = "email,univ,role\nkim@mju.ac.kr,MJU,\n";
        let err = parse_members(missing_role, "teamName").unwrap_err();
        assert!(err.to_string().contains("role"));

        assert!(parse_members("email,univ,role\n", "teamName").is_err());
    }

    #[test]
    fn test_admin_auth_resolution() {
        assert!(matches!(
            AdminAuth::resolve(Some("tok".into()), None, None),
            Ok(AdminAuth::Token(_))
        ));
        assert!(matches!(
            AdminAuth::resolve(None, Some("admin".into()), Some("pw".into())),
            Ok(AdminAuth::Credentials { .. })
        ));
        assert!(matches!(
            AdminAuth::resolve(None, Some("admin".into()), None),
            Err(ProbeError::MissingConfigError { .. })
        ));
    }

    #[test]
    fn test_cleanup_only_implies_both_targets() {
        let options = ProvisionOptions {
            cleanup_only: true,
            ..ProvisionOptions::default()
        };
        assert_eq!(options.cleanup_targets(), (true, true));

        let teams_only = ProvisionOptions {
            cleanup_only: true,
            cleanup_teams: true,
            ..ProvisionOptions::default()
        };
        assert_eq!(teams_only.cleanup_targets(), (false, true));
    }

    #[test]
    fn test_credentials_csv_header() {
        let mut m = member("kim@mju.ac.kr", Some("Blue"));
        m.login_id = "kim".to_string();
        m.password = "Aa1!aaaa".to_string();
        let bytes = credentials_csv(&[m.to_credential()]).unwrap();
        let text = String::from_utf8(bytes).unwrap();
        assert_eq!(
            text,
            "teamName,name,loginId,email,password\nBlue,kim,kim,kim@mju.ac.kr,Aa1!aaaa\n"
        );
    }
}
