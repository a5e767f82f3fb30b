use clap::Parser;
use ctf_probe::app::{attack, flag_submit, index_perf, provision, race};
use ctf_probe::config::cli::{AdminArgs, Cli, Command, IndexPerfCommand, RaceCommand};
use ctf_probe::utils::monitor::DriverMonitor;
use ctf_probe::utils::{console, logger, validation::Validate};
use ctf_probe::{CtfClient, LocalStorage, ProbeConfig, Result};
use std::time::Duration;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if cli.connection.log_json {
        logger::init_json_logger(cli.connection.verbose);
    } else {
        logger::init_cli_logger(cli.connection.verbose);
    }

    tracing::info!("Starting ctf-probe");
    if cli.connection.verbose {
        tracing::debug!("CLI: {:?}", cli);
    }

    let monitor = DriverMonitor::new(cli.connection.monitor);
    if monitor.is_enabled() {
        tracing::info!("🔍 Driver monitoring enabled");
    }

    match execute(cli, &monitor).await {
        Ok(()) => {
            monitor.log_phase("finished");
            tracing::info!("✅ Completed");
        }
        Err(e) => {
            tracing::error!(
                "❌ Command failed: {} (Category: {:?}, Severity: {:?})",
                e,
                e.category(),
                e.severity()
            );
            tracing::error!("💡 Recovery suggestion: {}", e.recovery_suggestion());

            eprintln!("❌ {}", e.user_friendly_message());
            eprintln!("💡 {}", e.recovery_suggestion());

            std::process::exit(e.exit_code());
        }
    }
}

/// A client for admin calls, signed in with the flags or the profile's `[admin]` section.
async fn admin_session(client: &CtfClient, args: &AdminArgs, profile: Option<&ProbeConfig>) -> Result<CtfClient> {
    let auth = args.resolve(profile)?;
    auth.session(&client.clone().with_auth_style(args.auth_style()))
        .await
}

async fn execute(cli: Cli, monitor: &DriverMonitor) -> Result<()> {
    let profile = cli.connection.load_profile()?;
    let settings = cli.connection.client_settings(profile.as_ref());
    settings.validate()?;
    tracing::info!("Target: {}", settings.base_url);
    let client = CtfClient::new(&settings)?;

    match cli.command {
        Command::Provision(args) => {
            args.validate()?;
            let admin = admin_session(&client, &args.admin, profile.as_ref()).await?;
            monitor.log_phase("admin sign-in");

            let report = provision::run(&admin, &LocalStorage::default(), &args.options()).await?;
            monitor.log_phase("provisioning");
            if report.failures() > 0 {
                console::warning(&format!("{} admin call(s) failed", report.failures()));
            }
        }

        Command::Submit(args) => {
            args.validate()?;
            let credentials = flag_submit::load_credentials(&args.csv)?;
            let accounts = flag_submit::select_accounts(&credentials, args.select);
            let results = flag_submit::run(&client, accounts, &args.options(profile.as_ref())).await;
            monitor.log_phase("submissions");
            flag_submit::print_summary(&results);
        }

        Command::Race { action } => match action {
            RaceCommand::Setup { setup, files } => {
                let admin = admin_session(&client, &setup.admin, profile.as_ref()).await?;
                let storage = LocalStorage::new(&files.dir);
                race::setup(&admin, &storage, &setup.options(), &files.data).await?;
                monitor.log_phase("race setup");
            }
            RaceCommand::Run { concurrency, files } => {
                let storage = LocalStorage::new(&files.dir);
                let report = race::run(&client, &storage, &files.data, &files.results, concurrency).await?;
                monitor.log_phase("race");
                report.print();
            }
            RaceCommand::All {
                setup,
                concurrency,
                settle_secs,
                files,
            } => {
                let admin = admin_session(&client, &setup.admin, profile.as_ref()).await?;
                let storage = LocalStorage::new(&files.dir);
                let report = race::setup_and_run(
                    &client,
                    &admin,
                    &storage,
                    &setup.options(),
                    &files.data,
                    &files.results,
                    concurrency,
                    Duration::from_secs(settle_secs),
                )
                .await?;
                monitor.log_phase("race");
                report.print();
            }
        },

        Command::IndexPerf { action } => match action {
            IndexPerfCommand::Baseline { args, dir } => {
                let options = args.options(index_perf::PerfMode::Baseline);
                index_perf::run(&client, &LocalStorage::new(&dir), &options).await?;
                monitor.log_phase("baseline");
            }
            IndexPerfCommand::Indexed { args, dir } => {
                let options = args.options(index_perf::PerfMode::Indexed);
                index_perf::run(&client, &LocalStorage::new(&dir), &options).await?;
                monitor.log_phase("indexed");
            }
            IndexPerfCommand::Compare { dir } => {
                index_perf::compare(&LocalStorage::new(&dir)).await?;
            }
        },

        Command::Attack(args) => {
            // Only the flag brute force needs an admin; the other probes run without one.
            let admin = args.admin.resolve(profile.as_ref()).ok();
            let attacker = client.clone().with_auth_style(args.admin.auth_style());
            let reports = attack::run(&attacker, admin.as_ref(), &args.probes(), &args.options()).await;
            monitor.log_phase("probes");
            let blocked = reports.iter().filter(|r| r.passed()).count();
            tracing::info!(blocked, total = reports.len(), "Probes finished");
        }
    }

    Ok(())
}
