//! Single-challenge race: many distinct accounts submit the same correct flag at once.
//!
//! Exactly one `Correct` is expected; every other account should see `Submitted` (its team
//! already solved the challenge) rather than a second award or a server error.

use crate::adapters::http::{classify_create, AddMemberRequest, ChallengeDraft, CtfClient};
use crate::app::flag_submit::submit_as;
use crate::core::fanout::{FanOut, FanOutTask};
use crate::core::stats::{LatencySummary, VerdictTally};
use crate::domain::model::{ChallengeRef, Outcome, TaskResult, TestData, TestUser};
use crate::domain::ports::Storage;
use crate::utils::console;
use crate::utils::error::{ProbeError, Result};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};

pub const DEFAULT_TEST_DATA: &str = "test_data.json";
pub const DEFAULT_RESULTS: &str = "test_results.json";

#[derive(Debug, Clone)]
pub struct RaceSetup {
    pub users: usize,
    pub teams: usize,
    pub password: String,
    pub email_domain: String,
    pub univ: String,
    pub challenge_id: u64,
    pub challenge_title: String,
    pub flag: String,
    pub points: u32,
    pub sleep: Duration,
}

impl Default for RaceSetup {
    fn default() -> Self {
        Self {
            users: 100,
            teams: 100,
            password: "Test1234@".to_string(),
            email_domain: "mju.ac.kr".to_string(),
            univ: "MJU".to_string(),
            challenge_id: 1,
            challenge_title: "Concurrency test challenge".to_string(),
            flag: "FLAG{test_concurrency_2025}".to_string(),
            points: 500,
            sleep: Duration::from_millis(50),
        }
    }
}

impl FanOutTask for TestUser {
    fn task_id(&self) -> String {
        self.login_id.clone()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Grade {
    Pass,
    Partial,
    Fail,
}

impl Grade {
    pub fn from_rate(success_rate: f64) -> Self {
        if success_rate >= 95.0 {
            Grade::Pass
        } else if success_rate >= 80.0 {
            Grade::Partial
        } else {
            Grade::Fail
        }
    }
}

/// Contents of `test_results.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RaceReport {
    pub timestamp: String,
    pub total_requests: usize,
    pub total_time: f64,
    pub success_rate: f64,
    pub grade: Grade,
    pub summary: VerdictTally,
    pub latency: Option<LatencySummary>,
    pub details: Vec<TaskResult>,
}

impl RaceReport {
    pub fn from_results(results: Vec<TaskResult>, total_time: Duration) -> Self {
        let summary = VerdictTally::from_results(&results);
        let success_rate = summary.success_rate(results.len());
        let durations: Vec<f64> = results
            .iter()
            .filter(|r| r.verdict.is_some() && r.latency_ms > 0.0)
            .map(|r| r.latency_ms)
            .collect();

        Self {
            timestamp: chrono::Local::now().to_rfc3339(),
            total_requests: results.len(),
            total_time: total_time.as_secs_f64(),
            success_rate,
            grade: Grade::from_rate(success_rate),
            summary,
            latency: LatencySummary::from_samples(&durations),
            details: results,
        }
    }

    pub fn print(&self) {
        console::header("Race results");
        println!("   Correct:   {:3}", self.summary.correct);
        println!("   Submitted: {:3}", self.summary.submitted);
        println!("   Wait:      {:3}", self.summary.wait);
        println!("   Wrong:     {:3}", self.summary.wrong);
        if self.summary.other > 0 {
            println!("   Other:     {:3}", self.summary.other);
        }
        println!("   Error:     {:3}", self.summary.error);

        if let Some(l) = &self.latency {
            println!();
            println!("   avg {:.1}ms  min {:.1}ms  max {:.1}ms", l.avg, l.min, l.max);
            println!("   median {:.1}ms  p95 {:.1}ms", l.median, l.p95);
        }
        println!();
        println!("   Total time: {:.2}s", self.total_time);
        console::rule();

        let line = format!("success rate {:.1}%", self.success_rate);
        match self.grade {
            Grade::Pass => console::success(&format!("Passed ({})", line)),
            Grade::Partial => console::warning(&format!("Partially passed ({})", line)),
            Grade::Fail => console::error(&format!("Failed ({})", line)),
        }
        if self.summary.correct > 1 {
            console::error(&format!(
                "{} submissions were accepted as Correct for one challenge",
                self.summary.correct
            ));
        }
    }
}

/// Creates `testuser{i}` accounts and `TestTeam{i}` teams, pairs them 1:1, creates the
/// challenge and saves the fixture.
pub async fn setup(
    admin: &CtfClient,
    storage: &impl Storage,
    options: &RaceSetup,
    data_path: &str,
) -> Result<TestData> {
    console::header(&format!("Creating {} test users", options.users));
    let mut users = Vec::with_capacity(options.users);
    for i in 1..=options.users {
        let login_id = format!("testuser{}", i);
        let request = AddMemberRequest {
            email: format!("{}@{}", login_id, options.email_domain),
            login_id: login_id.clone(),
            password: options.password.clone(),
            univ: options.univ.clone(),
            role: "ROLE_USER".to_string(),
            name: Some(login_id.clone()),
        };

        match admin.add_member(&request).await {
            Ok(response) if classify_create(response.status) != Outcome::Rejected => {
                users.push(TestUser {
                    login_id,
                    password: options.password.clone(),
                });
                if i % 10 == 0 {
                    console::info(&format!("{}/{} users created", i, options.users));
                }
            }
            Ok(response) => console::error(&format!(
                "{}: {} {}",
                login_id,
                response.status,
                response.preview()
            )),
            Err(e) => console::error(&format!("{}: {}", login_id, e)),
        }
        pause(options.sleep).await;
    }
    tracing::info!("Created {} of {} users", users.len(), options.users);

    console::header(&format!("Creating {} test teams", options.teams));
    let mut teams = Vec::with_capacity(options.teams);
    for i in 1..=options.teams {
        let team_name = format!("TestTeam{}", i);
        match admin.create_team(&team_name).await {
            Ok(response) if classify_create(response.status) != Outcome::Rejected => {
                teams.push(team_name);
            }
            Ok(response) => console::error(&format!("{}: {}", team_name, response.status)),
            Err(e) => console::error(&format!("{}: {}", team_name, e)),
        }
        pause(options.sleep).await;
    }
    tracing::info!("Created {} of {} teams", teams.len(), options.teams);

    let mut assigned = 0;
    for (user, team) in users.iter().zip(&teams) {
        let email = format!("{}@{}", user.login_id, options.email_domain);
        match admin.add_team_member(team, &email).await {
            Ok(response) if classify_create(response.status) != Outcome::Rejected => assigned += 1,
            Ok(response) => console::error(&format!("{} -> {}: {}", user.login_id, team, response.status)),
            Err(e) => console::error(&format!("{} -> {}: {}", user.login_id, team, e)),
        }
        pause(options.sleep).await;
    }
    console::success(&format!("{} users assigned to teams", assigned));

    let draft = ChallengeDraft::open_for_a_week(
        &options.challenge_title,
        &options.flag,
        options.points,
        chrono::Local::now().naive_local(),
    );
    let response = admin.create_challenge(&draft).await?;
    if response.status != 200 {
        return Err(ProbeError::UnexpectedStatus {
            endpoint: "/api/admin/create/challenge-no-file".to_string(),
            status: response.status,
            body: response.preview().to_string(),
        });
    }
    // The API does not echo the new id.
    console::success(&format!(
        "Challenge created; using challenge id {}",
        options.challenge_id
    ));

    let data = TestData {
        users,
        teams,
        challenge: ChallengeRef {
            id: options.challenge_id,
            flag: options.flag.clone(),
        },
    };
    storage
        .write_file(data_path, &serde_json::to_vec_pretty(&data)?)
        .await?;
    console::success(&format!("Test data saved to {}", data_path));
    Ok(data)
}

pub async fn load_test_data(storage: &impl Storage, data_path: &str) -> Result<TestData> {
    if !storage.exists(data_path).await {
        return Err(ProbeError::DataError {
            message: format!("{} not found; run `race setup` first", data_path),
        });
    }
    let bytes = storage.read_file(data_path).await?;
    Ok(serde_json::from_slice(&bytes)?)
}

/// Fires sign-in + submit for the first `concurrency` users with as many workers, then grades the race.
pub async fn run(
    client: &CtfClient,
    storage: &impl Storage,
    data_path: &str,
    results_path: &str,
    concurrency: usize,
) -> Result<RaceReport> {
    let data = load_test_data(storage, data_path).await?;
    let challenge_id = data.challenge.id;
    let users: Vec<TestUser> = data.users.into_iter().take(concurrency).collect();

    console::info(&format!(
        "Challenge {} | {} concurrent submissions",
        challenge_id,
        users.len()
    ));

    let client = Arc::new(client.clone());
    let flag: Arc<str> = Arc::from(data.challenge.flag.as_str());
    let started = Instant::now();

    let results: Vec<TaskResult> = FanOut::new(users.len())
        .run(users, move |user: TestUser| {
            let client = Arc::clone(&client);
            let flag = Arc::clone(&flag);
            async move {
                let mut result = submit_as(
                    &client,
                    user.task_id(),
                    &user.login_id,
                    &user.password,
                    challenge_id,
                    &flag,
                )
                .await;
                if let Some(verdict) = &result.verdict {
                    result.outcome = verdict.outcome();
                }
                result
            }
        })
        .await;

    let report = RaceReport::from_results(results, started.elapsed());
    storage
        .write_file(results_path, &serde_json::to_vec_pretty(&report)?)
        .await?;
    tracing::info!(
        correct = report.summary.correct,
        submitted = report.summary.submitted,
        success_rate = report.success_rate,
        "Race finished"
    );
    Ok(report)
}

/// `setup`, a pause to let the server settle, then `run`.
#[allow(clippy::too_many_arguments)]
pub async fn setup_and_run(
    client: &CtfClient,
    admin: &CtfClient,
    storage: &impl Storage,
    options: &RaceSetup,
    data_path: &str,
    results_path: &str,
    concurrency: usize,
    settle: Duration,
) -> Result<RaceReport> {
    setup(admin, storage, options, data_path).await?;
    console::info(&format!("Waiting {}s before the race...", settle.as_secs()));
    pause(settle).await;
    run(client, storage, data_path, results_path, concurrency).await
}

async fn pause(sleep: Duration) {
    if !sleep.is_zero() {
        tokio::time::sleep(sleep).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::model::SubmitVerdict;

    fn result(id: &str, verdict: Option<SubmitVerdict>, latency_ms: f64) -> TaskResult {
        let outcome = verdict.as_ref().map(|v| v.outcome()).unwrap_or(Outcome::Error);
        let r = TaskResult::new(id, outcome, "", latency_ms);
        match verdict {
            Some(v) => r.with_verdict(v),
            None => r,
        }
    }

    #[test]
    fn test_grade_thresholds() {
        assert_eq!(Grade::from_rate(100.0), Grade::Pass);
        assert_eq!(Grade::from_rate(95.0), Grade::Pass);
        assert_eq!(Grade::from_rate(94.9), Grade::Partial);
        assert_eq!(Grade::from_rate(80.0), Grade::Partial);
        assert_eq!(Grade::from_rate(79.9), Grade::Fail);
    }

    #[test]
    fn test_report_counts_and_latency_exclude_errors() {
        let results = vec![
            result("u1", Some(SubmitVerdict::Correct), 10.0),
            result("u2", Some(SubmitVerdict::Submitted), 20.0),
            result("u3", Some(SubmitVerdict::Submitted), 30.0),
            result("u4", None, 0.0),
        ];
        let report = RaceReport::from_results(results, Duration::from_millis(1500));

        assert_eq!(report.total_requests, 4);
        assert_eq!(report.summary.correct, 1);
        assert_eq!(report.summary.submitted, 2);
        assert_eq!(report.summary.error, 1);
        assert_eq!(report.success_rate, 75.0);
        assert_eq!(report.grade, Grade::Fail);
        assert_eq!(report.total_time, 1.5);

        let latency = report.latency.unwrap();
        assert_eq!(latency.min, 10.0);
        assert_eq!(latency.median, 20.0);
    }

    #[test]
    fn test_report_json_shape() {
        let report = RaceReport::from_results(
            vec![result("u1", Some(SubmitVerdict::Correct), 5.0)],
            Duration::from_secs(1),
        );
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["summary"]["correct"], 1);
        assert_eq!(json["grade"], "pass");
        assert_eq!(json["details"][0]["id"], "u1");
    }
}
