//! Bulk flag submission: one selected account per team signs in and submits the same flag.

use crate::adapters::http::{ApiResponse, CtfClient};
use crate::core::fanout::{FanOut, FanOutTask};
use crate::core::stats::OutcomeTally;
use crate::domain::model::{Credential, Outcome, SubmitVerdict, TaskResult};
use crate::utils::console;
use crate::utils::error::{ProbeError, Result};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

const CREDENTIAL_COLUMNS: [&str; 5] = ["teamName", "name", "loginId", "email", "password"];

#[cfg_attr(feature = "cli", derive(clap::ValueEnum))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SelectionMode {
    /// The member whose login id ends in an odd number, else the first member.
    #[default]
    OddPerTeam,
    FirstPerTeam,
}

#[derive(Debug, Clone)]
pub struct SubmitOptions {
    pub challenge_id: u64,
    pub flag: String,
    pub workers: usize,
    pub stagger: Duration,
}

impl FanOutTask for Credential {
    fn task_id(&self) -> String {
        format!("{}/{}", self.team_name, self.login_id)
    }
}

pub fn load_credentials(path: &Path) -> Result<Vec<Credential>> {
    let content = std::fs::read_to_string(path)?;
    parse_credentials(&content)
}

pub fn parse_credentials(content: &str) -> Result<Vec<Credential>> {
    let content = content.trim_start_matches('\u{feff}');
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(content.as_bytes());

    let headers = reader.headers()?.clone();
    if let Some(missing) = CREDENTIAL_COLUMNS
        .iter()
        .find(|col| !headers.iter().any(|h| h == **col))
    {
        return Err(ProbeError::DataError {
            message: format!(
                "CSV missing column '{}'. Found: {}",
                missing,
                headers.iter().collect::<Vec<_>>().join(",")
            ),
        });
    }

    let credentials = reader
        .deserialize::<Credential>()
        .collect::<std::result::Result<Vec<_>, _>>()?;
    if credentials.is_empty() {
        return Err(ProbeError::DataError {
            message: "CSV appears empty".to_string(),
        });
    }
    Ok(credentials)
}

fn ends_with_odd_number(login_id: &str) -> bool {
    login_id
        .chars()
        .last()
        .and_then(|c| c.to_digit(10))
        .is_some_and(|d| d % 2 == 1)
}

/// One account per team, teams in first-seen order.
pub fn select_accounts(credentials: &[Credential], mode: SelectionMode) -> Vec<Credential> {
    let mut order: Vec<&str> = Vec::new();
    let mut by_team: HashMap<&str, Vec<&Credential>> = HashMap::new();
    for credential in credentials {
        let team = credential.team_name.as_str();
        by_team
            .entry(team)
            .or_insert_with(|| {
                order.push(team);
                Vec::new()
            })
            .push(credential);
    }

    order
        .into_iter()
        .filter_map(|team| {
            let members = by_team.get(team)?;
            let pick = match mode {
                SelectionMode::OddPerTeam => members
                    .iter()
                    .find(|c| ends_with_odd_number(&c.login_id))
                    .or_else(|| members.first()),
                SelectionMode::FirstPerTeam => members.first(),
            };
            pick.map(|c| (*c).clone())
        })
        .collect()
}

/// 200 is a success carrying the server's verdict; 400/409 mean the team already solved it.
pub fn classify_submission(response: &ApiResponse) -> (Outcome, Option<SubmitVerdict>) {
    match response.status {
        200 => (Outcome::Success, response.verdict()),
        400 | 409 => (Outcome::AlreadyDone, None),
        _ => (Outcome::Rejected, None),
    }
}

/// Sign in as `login_id`, then submit `flag`. Latency covers the submission call only.
pub async fn submit_as(
    client: &CtfClient,
    id: String,
    login_id: &str,
    password: &str,
    challenge_id: u64,
    flag: &str,
) -> TaskResult {
    let token = match client.sign_in(login_id, password).await {
        Ok(token) => token,
        Err(e) => return TaskResult::error(id, e.user_friendly_message()),
    };

    match client.with_token(token).submit_flag(challenge_id, flag).await {
        Ok(response) => {
            let (outcome, verdict) = classify_submission(&response);
            let detail = match (&verdict, response.status) {
                (Some(v), 200) => format!("submitted (200) {}", v),
                (None, 200) => "submitted (200)".to_string(),
                (_, status) => format!("{} {}", status, response.preview()),
            };
            let result = TaskResult::new(id, outcome, detail, response.latency_ms);
            match verdict {
                Some(v) => result.with_verdict(v),
                None => result,
            }
        }
        Err(e) => TaskResult::error(id, e.user_friendly_message()),
    }
}

/// Fans the selected accounts out over `options.workers`, printing a line per finished task.
pub async fn run(client: &CtfClient, accounts: Vec<Credential>, options: &SubmitOptions) -> Vec<TaskResult> {
    console::info(&format!("Selected accounts: {} teams", accounts.len()));
    tracing::info!(
        "Submitting to challenge {} with {} workers",
        options.challenge_id,
        options.workers
    );

    let client = Arc::new(client.clone());
    let flag: Arc<str> = Arc::from(options.flag.as_str());
    let challenge_id = options.challenge_id;

    FanOut::new(options.workers)
        .with_stagger(options.stagger)
        .run_with_progress(
            accounts,
            move |credential: Credential| {
                let client = Arc::clone(&client);
                let flag = Arc::clone(&flag);
                async move {
                    submit_as(
                        &client,
                        credential.task_id(),
                        &credential.login_id,
                        &credential.password,
                        challenge_id,
                        &flag,
                    )
                    .await
                }
            },
            |result: &TaskResult| console::outcome(result.outcome, &format!("{}: {}", result.id, result.detail)),
        )
        .await
}

pub fn print_summary(results: &[TaskResult]) -> OutcomeTally {
    let tally = OutcomeTally::from_results(results);
    console::header("SUMMARY");
    println!(
        "OK: {}, SKIP/ALREADY: {}, FAIL: {}, TOTAL: {}",
        tally.success,
        tally.already_done,
        tally.failed(),
        tally.total()
    );
    tracing::info!(
        ok = tally.success,
        skipped = tally.already_done,
        failed = tally.failed(),
        "Bulk submission finished"
    );
    tally
}
