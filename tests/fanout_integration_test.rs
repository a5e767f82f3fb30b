use anyhow::Result;
use ctf_probe::app::{flag_submit, race};
use ctf_probe::config::ClientSettings;
use ctf_probe::core::{FanOut, Outcome, RetryPolicy, Storage};
use ctf_probe::domain::model::{ChallengeRef, Credential, TestData, TestUser};
use ctf_probe::{CtfClient, LocalStorage};
use httpmock::prelude::*;
use std::collections::HashSet;
use std::time::Duration;
use tempfile::TempDir;

fn client(server: &MockServer, timeout: Duration) -> CtfClient {
    let settings = ClientSettings::new(server.base_url())
        .with_timeout(timeout)
        .with_retry(RetryPolicy::none());
    CtfClient::new(&settings).unwrap()
}

fn credential(team: usize, member: usize) -> Credential {
    let login_id = format!("t{}m{}", team, member);
    Credential {
        team_name: format!("team-{:02}", team),
        name: login_id.clone(),
        email: format!("{}@ctf.test", login_id),
        login_id,
        password: "Aa1!aaaa".to_string(),
    }
}

/// Sign-in answers with a token derived from the login id.
async fn mock_sign_in_per_user(server: &MockServer, login_ids: &[String]) {
    for login_id in login_ids {
        let body = format!(r#"{{"loginId":"{}"}}"#, login_id);
        let token = format!("tok-{}", login_id);
        server
            .mock_async(|when, then| {
                when.method(POST).path("/api/users/sign-in").json_body_partial(body);
                then.status(200)
                    .json_body(serde_json::json!({ "data": { "accessToken": token } }));
            })
            .await;
    }
}

#[tokio::test]
async fn test_single_winner_race_yields_exactly_one_correct() -> Result<()> {
    let server = MockServer::start_async().await;
    let users: Vec<TestUser> = (1..=100)
        .map(|i| TestUser {
            login_id: format!("testuser{}", i),
            password: "Test1234@".to_string(),
        })
        .collect();
    let login_ids: Vec<String> = users.iter().map(|u| u.login_id.clone()).collect();
    mock_sign_in_per_user(&server, &login_ids).await;

    // The first matching mock wins, so the winner's mock goes in before the catch-all.
    let winner = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/api/challenges/1/submit")
                .header("Authorization", "Bearer tok-testuser42");
            then.status(200).json_body(serde_json::json!({ "data": "Correct" }));
        })
        .await;
    let losers = server
        .mock_async(|when, then| {
            when.method(POST).path("/api/challenges/1/submit");
            then.status(200).json_body(serde_json::json!({ "data": "Submitted" }));
        })
        .await;

    let dir = TempDir::new()?;
    let storage = LocalStorage::new(dir.path());
    let data = TestData {
        users,
        teams: (1..=100).map(|i| format!("TestTeam{}", i)).collect(),
        challenge: ChallengeRef {
            id: 1,
            flag: "FLAG{test_concurrency_2025}".to_string(),
        },
    };
    storage
        .write_file("test_data.json", &serde_json::to_vec(&data)?)
        .await?;

    let report = race::run(
        &client(&server, Duration::from_secs(10)),
        &storage,
        "test_data.json",
        "test_results.json",
        100,
    )
    .await?;

    assert_eq!(report.total_requests, 100);
    assert_eq!(report.summary.correct, 1);
    assert_eq!(report.summary.submitted, 99);
    assert_eq!(report.summary.error, 0);
    assert_eq!(report.success_rate, 100.0);
    winner.assert_hits_async(1).await;
    losers.assert_hits_async(99).await;
    assert!(storage.exists("test_results.json").await);
    Ok(())
}

#[tokio::test]
async fn test_every_task_gets_one_record_regardless_of_workers() -> Result<()> {
    let server = MockServer::start_async().await;
    let accounts: Vec<Credential> = (1..=12).map(|t| credential(t, 1)).collect();
    let login_ids: Vec<String> = accounts.iter().map(|c| c.login_id.clone()).collect();
    mock_sign_in_per_user(&server, &login_ids).await;

    server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/api/challenges/7/submit")
                .header("Authorization", "Bearer tok-t3m1");
            then.status(409);
        })
        .await;
    server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/api/challenges/7/submit")
                .json_body_partial(r#"{"submitFlag":"FLAG{x}"}"#);
            then.status(200).json_body(serde_json::json!({ "data": "Wrong" }));
        })
        .await;

    let client = client(&server, Duration::from_secs(10));
    let mut outcomes_by_workers = Vec::new();
    for workers in [1, 4, 12] {
        let options = flag_submit::SubmitOptions {
            challenge_id: 7,
            flag: "FLAG{x}".to_string(),
            workers,
            stagger: Duration::ZERO,
        };
        let results = flag_submit::run(&client, accounts.clone(), &options).await;

        assert_eq!(results.len(), accounts.len());
        let ids: HashSet<&str> = results.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids.len(), accounts.len());

        let tally = flag_submit::print_summary(&results);
        assert_eq!(tally.success, 11);
        assert_eq!(tally.already_done, 1);

        let mut outcomes: Vec<(String, Outcome)> =
            results.iter().map(|r| (r.id.clone(), r.outcome)).collect();
        outcomes.sort();
        outcomes_by_workers.push(outcomes);
    }

    assert_eq!(outcomes_by_workers[0], outcomes_by_workers[1]);
    assert_eq!(outcomes_by_workers[1], outcomes_by_workers[2]);
    Ok(())
}

#[tokio::test]
async fn test_slow_task_times_out_without_affecting_others() -> Result<()> {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/api/users/sign-in")
                .json_body_partial(r#"{"loginId":"t2m1"}"#);
            then.status(200)
                .delay(Duration::from_secs(3))
                .json_body(serde_json::json!({ "accessToken": "late" }));
        })
        .await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/api/users/sign-in");
            then.status(200).json_body(serde_json::json!({ "accessToken": "ok" }));
        })
        .await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/api/challenges/1/submit");
            then.status(200).json_body(serde_json::json!({ "data": "Correct" }));
        })
        .await;

    let accounts: Vec<Credential> = (1..=4).map(|t| credential(t, 1)).collect();
    let options = flag_submit::SubmitOptions {
        challenge_id: 1,
        flag: "FLAG{x}".to_string(),
        workers: 4,
        stagger: Duration::ZERO,
    };
    let results = flag_submit::run(&client(&server, Duration::from_millis(500)), accounts, &options).await;

    assert_eq!(results.len(), 4);
    for result in &results {
        if result.id == "team-02/t2m1" {
            assert_eq!(result.outcome, Outcome::Error);
        } else {
            assert_eq!(result.outcome, Outcome::Success, "{}", result.detail);
        }
    }
    Ok(())
}

#[tokio::test]
async fn test_panicking_task_is_reported_for_its_own_id() {
    let tasks: Vec<Credential> = (1..=5).map(|t| credential(t, 1)).collect();
    let results = FanOut::new(2)
        .run(tasks, |c: Credential| async move {
            if c.login_id == "t4m1" {
                panic!("boom");
            }
            ctf_probe::core::TaskResult::new(
                format!("{}/{}", c.team_name, c.login_id),
                Outcome::Success,
                "ok",
                0.0,
            )
        })
        .await;

    assert_eq!(results.len(), 5);
    let failed: Vec<_> = results.iter().filter(|r| r.outcome == Outcome::Error).collect();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].id, "team-04/t4m1");
}
