use anyhow::Result;
use ctf_probe::app::index_perf::{self, PerfMode, PerfOptions, PerfStats};
use ctf_probe::config::ClientSettings;
use ctf_probe::core::{RetryPolicy, Storage};
use ctf_probe::{CtfClient, LocalStorage, ProbeError};
use httpmock::prelude::*;
use std::time::Duration;
use tempfile::TempDir;

const CREDENTIALS: &str = "teamName,name,loginId,email,password\n\
Blue,a,alice,a@x.kr,Aa1!aaaa\n\
Blue,b,bob,b@x.kr,Aa1!aaaa\n\
Red,c,carol,c@x.kr,Aa1!aaaa\n\
Red,d,dave,d@x.kr,wrong\n";

async fn mock_platform(server: &MockServer) {
    server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/api/users/sign-in")
                .json_body_partial(r#"{"password":"wrong"}"#);
            then.status(401);
        })
        .await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/api/users/sign-in");
            then.status(200)
                .json_body(serde_json::json!({ "data": { "accessToken": "tok" } }));
        })
        .await;
    server
        .mock_async(|when, then| {
            when.method(GET)
                .path("/api/challenges/1")
                .header("Authorization", "Bearer tok");
            then.status(200).json_body(serde_json::json!({ "id": 1 }));
        })
        .await;
    server
        .mock_async(|when, then| {
            when.method(GET)
                .path("/api/teams/ranking")
                .header("Authorization", "Bearer tok");
            then.status(200).json_body(serde_json::json!([]));
        })
        .await;
}

fn options(mode: PerfMode) -> PerfOptions {
    PerfOptions {
        users: 10,
        csv_path: "creds.csv".to_string(),
        warmup: Duration::ZERO,
        ..PerfOptions::new(mode)
    }
}

#[tokio::test]
async fn test_baseline_then_indexed_then_compare() -> Result<()> {
    let server = MockServer::start_async().await;
    mock_platform(&server).await;
    let client = CtfClient::new(&ClientSettings::new(server.base_url()).with_retry(RetryPolicy::none()))?;

    let dir = TempDir::new()?;
    let storage = LocalStorage::new(dir.path());
    storage.write_file("creds.csv", CREDENTIALS.as_bytes()).await?;

    let baseline = index_perf::run(&client, &storage, &options(PerfMode::Baseline)).await?;
    assert_eq!(baseline.total_requests, 4);
    assert_eq!(baseline.successful_requests, 3);
    assert_eq!(baseline.success_rate, 75.0);
    assert!(baseline.total.min >= baseline.login.min);

    let saved: PerfStats = serde_json::from_slice(&storage.read_file("performance_baseline.json").await?)?;
    assert_eq!(saved.mode, "baseline");

    index_perf::run(&client, &storage, &options(PerfMode::Indexed)).await?;
    let comparison = index_perf::compare(&storage).await?;
    let metrics: Vec<&str> = comparison.metrics.iter().map(|m| m.metric).collect();
    assert_eq!(metrics, vec!["login", "challenge", "leaderboard", "total"]);
    Ok(())
}

#[tokio::test]
async fn test_run_without_users_is_a_data_error() -> Result<()> {
    let server = MockServer::start_async().await;
    let client = CtfClient::new(&ClientSettings::new(server.base_url()))?;
    let dir = TempDir::new()?;

    let err = index_perf::run(&client, &LocalStorage::new(dir.path()), &options(PerfMode::Baseline))
        .await
        .unwrap_err();
    assert!(matches!(err, ProbeError::DataError { .. }));

    let err = index_perf::compare(&LocalStorage::new(dir.path())).await.unwrap_err();
    assert!(err.to_string().contains("performance_baseline.json"));
    Ok(())
}
