//! Index performance comparison.
//!
//! `baseline` and `indexed` run the same concurrent user flow (sign-in, challenge lookup,
//! leaderboard) before and after a database index change and save the latency distribution;
//! `compare` reads both files back and reports the improvement per metric.

use crate::adapters::http::CtfClient;
use crate::app::race::DEFAULT_TEST_DATA;
use crate::core::fanout::{FanOut, FanOutReport};
use crate::core::stats::{improvement, rate, LatencySummary};
use crate::domain::model::{TestData, TestUser};
use crate::domain::ports::Storage;
use crate::utils::console;
use crate::utils::error::{ProbeError, Result};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};

#[cfg_attr(feature = "cli", derive(clap::ValueEnum))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PerfMode {
    Baseline,
    Indexed,
}

impl PerfMode {
    pub fn label(&self) -> &'static str {
        match self {
            PerfMode::Baseline => "baseline",
            PerfMode::Indexed => "indexed",
        }
    }

    pub fn stats_file(&self) -> String {
        format!("performance_{}.json", self.label())
    }
}

#[derive(Debug, Clone)]
pub struct PerfOptions {
    pub mode: PerfMode,
    pub users: usize,
    pub challenge_id: u64,
    pub data_path: String,
    pub csv_path: String,
    pub warmup: Duration,
}

impl PerfOptions {
    pub fn new(mode: PerfMode) -> Self {
        Self {
            mode,
            users: 100,
            challenge_id: 1,
            data_path: DEFAULT_TEST_DATA.to_string(),
            csv_path: "generated_passwords.csv".to_string(),
            warmup: Duration::from_secs(3),
        }
    }
}

/// Timings of one user's flow, in milliseconds.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserFlow {
    pub login_id: String,
    pub login_success: bool,
    pub login_time: f64,
    pub challenge_success: bool,
    pub challenge_time: f64,
    pub leaderboard_success: bool,
    pub leaderboard_time: f64,
    pub total_time: f64,
}

impl FanOutReport for UserFlow {
    fn worker_failed(task_id: String, reason: String) -> Self {
        tracing::warn!("Flow for {} failed: {}", task_id, reason);
        UserFlow {
            login_id: task_id,
            ..UserFlow::default()
        }
    }
}

/// Contents of `performance_<mode>.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerfStats {
    pub mode: String,
    pub timestamp: String,
    pub total_requests: usize,
    pub successful_requests: usize,
    pub success_rate: f64,
    pub login: LatencySummary,
    pub challenge: LatencySummary,
    pub leaderboard: LatencySummary,
    pub total: LatencySummary,
}

fn elapsed_ms(started: Instant) -> f64 {
    started.elapsed().as_secs_f64() * 1000.0
}

/// Timed sign-in, then (only when it succeeded) timed challenge and leaderboard lookups.
pub async fn run_flow(client: &CtfClient, user: &TestUser, challenge_id: u64) -> UserFlow {
    let mut flow = UserFlow {
        login_id: user.login_id.clone(),
        ..UserFlow::default()
    };
    let started = Instant::now();

    let token = match client.sign_in(&user.login_id, &user.password).await {
        Ok(token) => {
            flow.login_success = true;
            Some(token)
        }
        Err(e) => {
            tracing::debug!("Sign-in failed for {}: {}", user.login_id, e);
            None
        }
    };
    flow.login_time = elapsed_ms(started);

    if let Some(token) = token {
        let authed = client.with_token(token);

        let step = Instant::now();
        flow.challenge_success = matches!(authed.get_challenge(challenge_id).await, Ok(r) if r.status == 200);
        flow.challenge_time = elapsed_ms(step);

        let step = Instant::now();
        flow.leaderboard_success = matches!(authed.get_ranking().await, Ok(r) if r.status == 200);
        flow.leaderboard_time = elapsed_ms(step);
    }

    flow.total_time = elapsed_ms(started);
    flow
}

/// Latency statistics over the flows whose sign-in succeeded; `None` when none did.
pub fn analyze(flows: &[UserFlow], mode: PerfMode) -> Option<PerfStats> {
    let ok: Vec<&UserFlow> = flows.iter().filter(|f| f.login_success).collect();
    let metric = |pick: fn(&UserFlow) -> f64| {
        let samples: Vec<f64> = ok.iter().map(|f| pick(f)).collect();
        LatencySummary::from_samples(&samples)
    };

    Some(PerfStats {
        mode: mode.label().to_string(),
        timestamp: chrono::Local::now().to_rfc3339(),
        total_requests: flows.len(),
        successful_requests: ok.len(),
        success_rate: rate(ok.len(), flows.len()),
        login: metric(|f| f.login_time)?,
        challenge: metric(|f| f.challenge_time)?,
        leaderboard: metric(|f| f.leaderboard_time)?,
        total: metric(|f| f.total_time)?,
    })
}

/// Users from the race fixture when present, else from the exported credentials CSV.
pub async fn load_users(storage: &impl Storage, data_path: &str, csv_path: &str) -> Result<Vec<TestUser>> {
    if storage.exists(data_path).await {
        let data: TestData = serde_json::from_slice(&storage.read_file(data_path).await?)?;
        if !data.users.is_empty() {
            console::success(&format!("Loaded {} users from {}", data.users.len(), data_path));
            return Ok(data.users);
        }
    }

    if storage.exists(csv_path).await {
        let bytes = storage.read_file(csv_path).await?;
        let users = parse_user_csv(&bytes)?;
        if !users.is_empty() {
            console::success(&format!("Loaded {} users from {}", users.len(), csv_path));
            return Ok(users);
        }
    }

    Err(ProbeError::DataError {
        message: format!(
            "No test users found; run `race setup` or `provision --export-passwords {}` first",
            csv_path
        ),
    })
}

/// `loginId` and `password` columns by header name; other columns are ignored.
pub fn parse_user_csv(bytes: &[u8]) -> Result<Vec<TestUser>> {
    let bytes = bytes.strip_prefix("\u{feff}".as_bytes()).unwrap_or(bytes);
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(bytes);
    let users = reader
        .deserialize::<TestUser>()
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(users)
}

pub async fn run(client: &CtfClient, storage: &impl Storage, options: &PerfOptions) -> Result<PerfStats> {
    let mut users = load_users(storage, &options.data_path, &options.csv_path).await?;
    if users.len() < options.users {
        console::warning(&format!(
            "Requested {} users but only {} are available",
            options.users,
            users.len()
        ));
    }
    users.truncate(options.users);

    console::header(&format!("{} run: {} concurrent users", options.mode.label(), users.len()));
    if !options.warmup.is_zero() {
        tokio::time::sleep(options.warmup).await;
    }

    let client = Arc::new(client.clone());
    let challenge_id = options.challenge_id;
    let started = Instant::now();

    let flows: Vec<UserFlow> = FanOut::new(users.len())
        .run_with_progress(
            users,
            move |user: TestUser| {
                let client = Arc::clone(&client);
                async move { run_flow(&client, &user, challenge_id).await }
            },
            |flow: &UserFlow| {
                println!(
                    "  {} {:20} | login {:6.0}ms | challenge {:6.0}ms | ranking {:6.0}ms | total {:6.0}ms",
                    if flow.login_success { "✓" } else { "✗" },
                    flow.login_id,
                    flow.login_time,
                    flow.challenge_time,
                    flow.leaderboard_time,
                    flow.total_time
                )
            },
        )
        .await;

    console::info(&format!("Total time: {:.2}s", started.elapsed().as_secs_f64()));

    let stats = analyze(&flows, options.mode).ok_or_else(|| ProbeError::DataError {
        message: "No successful sign-ins to analyse".to_string(),
    })?;
    print_stats(&stats);

    let path = options.mode.stats_file();
    storage
        .write_file(&path, &serde_json::to_vec_pretty(&stats)?)
        .await?;
    console::success(&format!("Results saved to {}", path));
    Ok(stats)
}

fn print_stats(stats: &PerfStats) {
    console::header(&format!("Performance [{}]", stats.mode.to_uppercase()));
    println!(
        "Success rate: {:.1}% ({}/{})",
        stats.success_rate, stats.successful_requests, stats.total_requests
    );
    println!();
    println!(
        "{:<14} {:>9} {:>9} {:>9} {:>9} {:>9}",
        "metric", "min", "avg", "median", "p95", "max"
    );
    for (name, s) in [
        ("login", &stats.login),
        ("challenge", &stats.challenge),
        ("leaderboard", &stats.leaderboard),
        ("total", &stats.total),
    ] {
        println!(
            "{:<14} {:>7.0}ms {:>7.0}ms {:>7.0}ms {:>7.0}ms {:>7.0}ms",
            name, s.min, s.avg, s.median, s.p95, s.max
        );
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ImprovementGrade {
    Major,
    Significant,
    Improved,
    NotImproved,
}

impl ImprovementGrade {
    pub fn from_improvement(percent: f64) -> Self {
        if percent > 50.0 {
            ImprovementGrade::Major
        } else if percent > 20.0 {
            ImprovementGrade::Significant
        } else if percent > 0.0 {
            ImprovementGrade::Improved
        } else {
            ImprovementGrade::NotImproved
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricDelta {
    pub metric: &'static str,
    pub avg_before: f64,
    pub avg_after: f64,
    pub avg_improvement: f64,
    pub p95_before: f64,
    pub p95_after: f64,
    pub p95_improvement: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct Comparison {
    pub metrics: Vec<MetricDelta>,
    pub overall: f64,
    pub grade: ImprovementGrade,
}

pub fn compare_stats(before: &PerfStats, after: &PerfStats) -> Comparison {
    let metrics = [
        ("login", &before.login, &after.login),
        ("challenge", &before.challenge, &after.challenge),
        ("leaderboard", &before.leaderboard, &after.leaderboard),
        ("total", &before.total, &after.total),
    ]
    .into_iter()
    .map(|(metric, b, a)| MetricDelta {
        metric,
        avg_before: b.avg,
        avg_after: a.avg,
        avg_improvement: improvement(b.avg, a.avg),
        p95_before: b.p95,
        p95_after: a.p95,
        p95_improvement: improvement(b.p95, a.p95),
    })
    .collect();

    let overall = improvement(before.total.avg, after.total.avg);
    Comparison {
        metrics,
        overall,
        grade: ImprovementGrade::from_improvement(overall),
    }
}

pub async fn compare(storage: &impl Storage) -> Result<Comparison> {
    let mut loaded = Vec::with_capacity(2);
    for mode in [PerfMode::Baseline, PerfMode::Indexed] {
        let path = mode.stats_file();
        if !storage.exists(&path).await {
            return Err(ProbeError::DataError {
                message: format!("{} not found; run the baseline and indexed modes first", path),
            });
        }
        let stats: PerfStats = serde_json::from_slice(&storage.read_file(&path).await?)?;
        loaded.push(stats);
    }

    let comparison = compare_stats(&loaded[0], &loaded[1]);
    print_comparison(&comparison);
    Ok(comparison)
}

fn print_comparison(comparison: &Comparison) {
    console::header("Index performance comparison");
    println!(
        "{:<14} {:>12} {:>12} {:>10} {:>12} {:>12} {:>10}",
        "metric", "avg before", "avg after", "avg Δ", "p95 before", "p95 after", "p95 Δ"
    );
    for m in &comparison.metrics {
        println!(
            "{:<14} {:>10.0}ms {:>10.0}ms {:>+9.1}% {:>10.0}ms {:>10.0}ms {:>+9.1}%",
            m.metric,
            m.avg_before,
            m.avg_after,
            m.avg_improvement,
            m.p95_before,
            m.p95_after,
            m.p95_improvement
        );
    }
    println!();

    let overall = comparison.overall;
    match comparison.grade {
        ImprovementGrade::Major => console::success(&format!("Major improvement: total response time {:.1}% faster", overall)),
        ImprovementGrade::Significant => {
            console::success(&format!("Significant improvement: total response time {:.1}% faster", overall))
        }
        ImprovementGrade::Improved => console::info(&format!("Improved: total response time {:.1}% faster", overall)),
        ImprovementGrade::NotImproved => console::warning("Not improved. Check the index configuration."),
    }
}
