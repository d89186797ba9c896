//! # Subtrack — subscription renewal job engine
//!
//! Runs the daily reminder and rollover sweeps at a fixed wall-clock time.
//!
//! Usage:
//!   subtrack                          # Run the daily scheduler (Ctrl-C to stop)
//!   subtrack --config ./subtrack.toml # Explicit config file
//!   subtrack --run-now all            # Run the sweeps once and exit
//!   subtrack --demo --run-now all     # In-memory data, log-only notifier

use anyhow::Result;
use chrono::{TimeDelta, Utc};
use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use subtrack_core::config::{SubTrackConfig, SweepKind};
use subtrack_core::traits::{Notifier, SubscriptionRepository};
use subtrack_core::types::DueSubscription;
use subtrack_db::PgRepository;
use subtrack_mailer::{LogNotifier, SmtpMailer};
use subtrack_scheduler::{Background, DailyReport, DailyTrigger, InMemoryRepository, Scheduler, SweepEngine};

/// How long in-flight sweeps get to finish after Ctrl-C.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

#[derive(Parser)]
#[command(
    name = "subtrack",
    version,
    about = "⏰ Subtrack — subscription renewal reminders and rollover"
)]
struct Cli {
    /// Config file (default: ~/.subtrack/config.toml)
    #[arg(short, long)]
    config: Option<String>,

    /// Run sweeps once immediately and exit
    #[arg(long, value_enum)]
    run_now: Option<RunNow>,

    /// Use an in-memory repository seeded with sample data and log instead of mailing
    #[arg(long)]
    demo: bool,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Clone, Copy, ValueEnum)]
enum RunNow {
    Reminders,
    Rollover,
    All,
}

impl RunNow {
    fn sweeps(self, configured: &[SweepKind]) -> Vec<SweepKind> {
        match self {
            RunNow::Reminders => vec![SweepKind::Reminders],
            RunNow::Rollover => vec![SweepKind::Rollover],
            RunNow::All => configured.to_vec(),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        "subtrack=debug,subtrack_scheduler=debug,subtrack_core=debug,subtrack_db=debug,subtrack_mailer=debug"
    } else {
        "subtrack=info,subtrack_scheduler=info,subtrack_core=info,subtrack_db=info,subtrack_mailer=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_target(false)
        .init();

    let config = load_config(cli.config.as_deref())?;

    let repo: Arc<dyn SubscriptionRepository> = if cli.demo {
        tracing::info!("🧪 Demo mode: in-memory repository with sample data");
        Arc::new(demo_repository())
    } else {
        Arc::new(PgRepository::connect(&config.database).await?)
    };

    let notifier: Arc<dyn Notifier> = if cli.demo || !config.mailer.enabled {
        tracing::info!("📭 Mail delivery disabled, reminders will be logged only");
        Arc::new(LogNotifier)
    } else {
        Arc::new(SmtpMailer::new(&config.mailer)?)
    };

    let shutdown = CancellationToken::new();
    let background = Background::with_shutdown(shutdown.clone());
    let engine = SweepEngine::new(repo, notifier, &config, shutdown);

    // --run-now: one pass, then exit
    if let Some(which) = cli.run_now {
        let sweeps = which.sweeps(engine.sweeps());
        let report = tokio::select! {
            report = engine.run_once(&background, sweeps) => report?,
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("⏹️ Interrupted, waiting for in-flight work...");
                if tokio::time::timeout(SHUTDOWN_GRACE, background.shutdown()).await.is_err() {
                    tracing::warn!("⚠️ {} task(s) still running, exiting anyway", background.outstanding());
                }
                return Ok(());
            }
        };
        print_summary(&report);
        return Ok(());
    }

    let trigger = DailyTrigger::new(config.scheduler.hour, config.scheduler.minute);
    let scheduler = Scheduler::new(trigger, background.clone());
    tracing::info!(
        "🚀 Subtrack scheduler started — daily sweeps at {:02}:{:02} ({})",
        config.scheduler.hour,
        config.scheduler.minute,
        engine
            .sweeps()
            .iter()
            .map(|s| s.to_string())
            .collect::<Vec<_>>()
            .join(", ")
    );

    let _scheduler = background.run("scheduler", async move {
        scheduler
            .run_daily(move || {
                let engine = engine.clone();
                async move {
                    engine.run_daily_sweeps().await;
                }
            })
            .await;
    });

    tokio::signal::ctrl_c().await?;
    tracing::info!("⏹️ Shutdown requested, waiting for in-flight work...");
    if tokio::time::timeout(SHUTDOWN_GRACE, background.shutdown()).await.is_err() {
        tracing::warn!(
            "⚠️ {} task(s) still running after {:?}, exiting anyway",
            background.outstanding(),
            SHUTDOWN_GRACE
        );
    }
    tracing::info!("👋 Subtrack stopped");
    Ok(())
}

fn load_config(path: Option<&str>) -> Result<SubTrackConfig> {
    let config = match path {
        Some(p) => {
            let path = PathBuf::from(shellexpand::tilde(p).to_string());
            let mut config = SubTrackConfig::load_from(&path)?;
            config.apply_env();
            config
        }
        None => SubTrackConfig::load()?,
    };
    Ok(config)
}

fn print_summary(report: &DailyReport) {
    if let Some(r) = &report.reminders {
        println!("📬 Reminders:");
        for h in &r.horizons {
            println!(
                "   {:>2}d  selected {:>3}  skipped {:>3}  completed {:>3}/{}",
                h.horizon, h.selected, h.skipped, h.completed, h.submitted
            );
        }
    }
    if let Some(r) = &report.rollover {
        println!(
            "🔄 Rollover: selected {}, skipped {}, updated {}",
            r.selected, r.skipped, r.updated
        );
    }
    let errors = report
        .reminders
        .iter()
        .flat_map(|r| r.errors.iter())
        .chain(report.rollover.iter().flat_map(|r| r.errors.iter()));
    for e in errors {
        println!("   ⚠️  {e}");
    }
    println!("✅ Done ({} error(s))", report.error_count());
}

/// A small data set that touches every sweep path.
fn demo_repository() -> InMemoryRepository {
    let repo = InMemoryRepository::new();
    let now = Utc::now();
    let ada = repo.add_user("ada@example.com");
    let grace = repo.add_user("grace@example.com");

    let add = |user: Uuid, name: &str, end: chrono::DateTime<Utc>, duration: &str, cancelled: bool| {
        repo.add_subscription(DueSubscription {
            id: Uuid::new_v4(),
            user_id: user,
            name: name.to_string(),
            start_date: end - TimeDelta::days(30),
            end_date: end,
            duration: duration.to_string(),
            is_cancelled: cancelled,
        });
    };

    let soon = |days: i64| now + TimeDelta::days(days) - TimeDelta::hours(2);
    add(ada, "Netflix subscription", soon(7), "monthly", false);
    add(grace, "Spotify subscription", soon(5), "monthly", false);
    add(ada, "iCloud subscription", soon(3), "yearly", false);
    add(grace, "Gym subscription", soon(1), "6 months", false);
    add(grace, "Newspaper subscription", soon(1), "weekly", true);
    // Owner no longer exists: recorded as an error, siblings unaffected.
    add(Uuid::new_v4(), "Orphaned subscription", soon(3), "monthly", false);

    let lapsed = now - TimeDelta::hours(3);
    add(ada, "Cloud storage subscription", lapsed, "monthly", false);
    add(grace, "Magazine subscription", lapsed, "weekly", false);
    add(ada, "Legacy subscription", lapsed, "quarterly", false);

    repo
}
