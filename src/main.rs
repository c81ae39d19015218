//! Cadence 命令行入口
//!
//! 用法：
//!   cadence run                 # 按活跃时段持续运行
//!   cadence once [--force]      # 只跑一轮（--force 忽略活跃时段）
//!   cadence stats               # 配额用量与最近的审计事件
//!   cadence accept <URL>        # 记录外部检测到的接受
//!   cadence reject <URL>        # 记录外部检测到的拒绝
//!   cadence check-config        # 校验配置并打印生效的调度

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use chrono::{Local, Utc};
use clap::{Parser, Subcommand};

use cadence::config::{load_config, AppConfig, REQUIRED_DELAY_CATEGORIES};
use cadence::observability;
use cadence::outreach::OutreachStateMachine;
use cadence::phases::canonical_profile_url;
use cadence::quota::QuotaTracker;
use cadence::schedule::ActivityScheduler;
use cadence::store::{OutreachStore, RequestStatus, SqliteStore};

#[derive(Parser)]
#[command(
    name = "cadence",
    version,
    about = "Paced, quota-aware outreach workflow runner"
)]
struct Cli {
    /// Extra config file layered over config/default.toml
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run cycles continuously inside the active window
    Run,
    /// Run a single cycle
    Once {
        /// Ignore the active window
        #[arg(long)]
        force: bool,
    },
    /// Show quota usage and recent activity
    Stats {
        /// Number of recent events to show
        #[arg(long, default_value_t = 20)]
        events: usize,
    },
    /// Record that a pending request was accepted
    Accept { url: String },
    /// Record that a pending request was rejected
    Reject { url: String },
    /// Validate configuration and print the effective schedule
    CheckConfig,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = load_config(cli.config.clone()).context("Failed to load configuration")?;
    observability::init(&config.logging, cli.verbose).context("Failed to initialise logging")?;

    match cli.command {
        Command::CheckConfig => check_config(&config),
        Command::Stats { events } => show_stats(&config, events),
        Command::Accept { url } => record_response(&config, &url, RequestStatus::Accepted),
        Command::Reject { url } => record_response(&config, &url, RequestStatus::Rejected),
        Command::Run => run_workflow(config, None).await,
        Command::Once { force } => run_workflow(config, Some(force)).await,
    }
}

fn open_store(config: &AppConfig) -> anyhow::Result<Arc<SqliteStore>> {
    let store = SqliteStore::open(&config.app.database_path).with_context(|| {
        format!(
            "Failed to open database {}",
            config.app.database_path.display()
        )
    })?;
    Ok(Arc::new(store))
}

fn check_config(config: &AppConfig) -> anyhow::Result<()> {
    let scheduler = ActivityScheduler::from_config(&config.scheduling)?;
    let window = scheduler.window();
    println!("Configuration OK");
    println!("  database:      {}", config.app.database_path.display());
    println!("  active days:   {:?}", scheduler.active_days());
    println!("  active hours:  {:02}:00 -> {:02}:00", window.start(), window.end());
    let now = Local::now();
    println!(
        "  active now:    {} (next eligible: {})",
        scheduler.is_active_at(&now),
        scheduler.next_eligible_instant(&now).format("%Y-%m-%d %H:%M")
    );
    for (name, limit) in [
        ("connections", config.rate_limits.connections),
        ("messages", config.rate_limits.messages),
        ("searches", config.rate_limits.searches),
    ] {
        println!("  {name:<12} {}/hour, {}/day", limit.per_hour, limit.per_day);
    }
    for name in REQUIRED_DELAY_CATEGORIES {
        if let Some(band) = config.pacing.delays.get(name) {
            println!("  delay {name:<7} {}-{} ms", band.min, band.max);
        }
    }
    println!("  search queries: {}", config.search.queries.len());
    match config.require_automation_settings() {
        Ok(()) => println!("  automation:    ready"),
        Err(e) => println!("  automation:    not ready ({e})"),
    }
    Ok(())
}

fn show_stats(config: &AppConfig, events: usize) -> anyhow::Result<()> {
    let store = open_store(config)?;
    let quota = QuotaTracker::new(store.clone(), &config.rate_limits);
    let now = Local::now();

    println!("{:<20} {:>12} {:>12}", "kind", "last hour", "today");
    for usage in quota.usage(&now)? {
        println!(
            "{:<20} {:>12} {:>12}",
            usage.kind,
            format!("{}/{}", usage.last_hour, usage.per_hour),
            format!("{}/{}", usage.today, usage.per_day)
        );
    }

    println!();
    for event in store.recent_events(events)? {
        println!(
            "{}  {:<20} {:<14} {}  {}",
            event.at.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S"),
            event.kind,
            event.outcome,
            event.target_url.as_deref().unwrap_or("-"),
            event.detail
        );
    }
    Ok(())
}

fn record_response(config: &AppConfig, url: &str, status: RequestStatus) -> anyhow::Result<()> {
    let store = open_store(config)?;
    let quota = Arc::new(QuotaTracker::new(store.clone(), &config.rate_limits));
    let outreach = OutreachStateMachine::new(
        store,
        quota,
        chrono::Duration::hours(i64::from(config.messaging.delay_after_acceptance_hours)),
    );
    let url = canonical_profile_url(url, url).unwrap_or_else(|| url.to_string());
    let request = outreach
        .record_response(&url, status, Utc::now())
        .with_context(|| format!("Cannot mark {url} as {status}"))?;
    println!("{} -> {}", request.target_url, request.status);
    Ok(())
}

#[cfg(feature = "browser")]
async fn run_workflow(config: AppConfig, once: Option<bool>) -> anyhow::Result<()> {
    use cadence::core::{CycleError, ShutdownManager, ShutdownReason};
    use cadence::interaction::chrome::ChromeDriver;
    use cadence::WorkflowBuilder;

    config
        .require_automation_settings()
        .context("Configuration incomplete for browser automation")?;

    let shutdown = Arc::new(ShutdownManager::new());
    shutdown.install_signal_handlers();

    let driver = ChromeDriver::launch(&config.browser)
        .await
        .context("Failed to launch browser")?;
    let mut builder = WorkflowBuilder::new(config, Arc::new(driver)).with_cancel(shutdown.token());
    if once == Some(true) {
        builder = builder.ignore_active_window();
    }
    let orchestrator = builder.build()?;

    match once {
        Some(force) => {
            let now = Local::now();
            let scheduler = orchestrator.scheduler();
            if !force && !scheduler.is_active_at(&now) {
                anyhow::bail!(
                    "Outside the active window (next eligible: {}); pass --force to run anyway",
                    scheduler.next_eligible_instant(&now).format("%Y-%m-%d %H:%M")
                );
            }
            let report = orchestrator.run_cycle().await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        None => {
            if let Err(e) = orchestrator.run_forever().await {
                if let CycleError::Blocked { snapshot, .. } = &e {
                    if let Some(path) = snapshot {
                        eprintln!("Snapshot saved to {}", path.display());
                    }
                }
                shutdown.shutdown(ShutdownReason::FatalError(e.to_string()));
                return Err(e.into());
            }
        }
    }
    if let Some(reason) = shutdown.reason() {
        eprintln!("Stopped: {reason:?}");
    }
    Ok(())
}

#[cfg(not(feature = "browser"))]
async fn run_workflow(_config: AppConfig, _once: Option<bool>) -> anyhow::Result<()> {
    anyhow::bail!("This build has no browser driver; rebuild with `--features browser`")
}
