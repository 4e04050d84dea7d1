//! sitepulse - analytics reporting and maintenance jobs
//!
//! Each subcommand is one short-lived, stateless run meant to be driven by
//! cron or an admin by hand: dispatch digest reports, run the doctor
//! battery, sync project repositories, or check friend links.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Duration as ChronoDuration;
use clap::{Parser, Subcommand};

use sitepulse_core::channels::{
    DbNoticeChannel, DisabledEmailChannel, EmailChannel, HttpEmailChannel,
};
use sitepulse_core::cron::link_check::{self, LinkCheckSettings};
use sitepulse_core::cron::project_sync::{self, GithubClient};
use sitepulse_core::cron::doctor;
use sitepulse_core::flush::{FlushEngine, FlushSummary, HttpFlushEngine};
use sitepulse_core::report;
use sitepulse_core::settings::Settings;
use sitepulse_core::stats::collect_range_stats;
use sitepulse_core::timebucket::{current_local_date, Range};
use sitepulse_core::{Config, Database};

#[derive(Parser)]
#[command(name = "sitepulse", version, about = "Site analytics reporting and maintenance jobs")]
struct Cli {
    /// Config file path (defaults to the XDG location)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Dispatch due digest reports over the configured channels
    Report,
    /// Run the doctor probe battery and persist a snapshot
    Doctor,
    /// Sync project repository metadata from the code-hosting API
    SyncProjects,
    /// Check friend-link liveness and back-links
    CheckLinks,
    /// Print traffic stats for the last N days
    Stats {
        #[arg(long, default_value_t = 7)]
        days: i64,
        /// IANA timezone (defaults to the configured report timezone)
        #[arg(long)]
        timezone: Option<String>,
    },
    /// Show recent health-check snapshots
    History {
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => Config::load_from(path).context("failed to load configuration")?,
        None => Config::load().context("failed to load configuration")?,
    };

    let _log_guard =
        sitepulse_core::logging::init(&config.logging).context("failed to initialize logging")?;

    let db_path = config.resolved_database_path();
    tracing::info!(path = %db_path.display(), "Opening database");
    let db = Arc::new(Database::open(&db_path).context("failed to open database")?);
    db.migrate().context("failed to run database migrations")?;

    match cli.command {
        Command::Report => run_report(&config, db).await,
        Command::Doctor => run_doctor(&config, &db).await,
        Command::SyncProjects => run_sync_projects(&config, &db).await,
        Command::CheckLinks => run_check_links(&config, &db).await,
        Command::Stats { days, timezone } => run_stats(&db, days, timezone),
        Command::History { limit } => run_history(&db, limit),
    }
}

fn build_flush_engine(config: &Config) -> Result<Option<HttpFlushEngine>> {
    match &config.upstream.base_url {
        Some(base_url) => {
            let engine = HttpFlushEngine::new(
                base_url,
                config.upstream.api_key.as_deref(),
                Duration::from_secs(config.http.timeout_secs),
            )?;
            Ok(Some(engine))
        }
        None => Ok(None),
    }
}

async fn run_report(config: &Config, db: Arc<Database>) -> Result<()> {
    let flush_engine = build_flush_engine(config)?;

    // Flush first so the digest carries fresh counts; a failed flush only
    // drops the summary line from the report body.
    let flush_summary: Option<FlushSummary> = match &flush_engine {
        Some(engine) => match engine.flush_events().await {
            Ok(summary) => Some(summary),
            Err(e) => {
                tracing::warn!(error = %e, "Flush before dispatch failed");
                None
            }
        },
        None => None,
    };

    let notice = DbNoticeChannel::new(db.clone());
    let email: Box<dyn EmailChannel> = match &config.upstream.mail_endpoint {
        Some(endpoint) => Box::new(HttpEmailChannel::new(
            endpoint,
            config.upstream.api_key.as_deref(),
            Duration::from_secs(config.http.timeout_secs),
        )?),
        None => Box::new(DisabledEmailChannel),
    };

    let outcome =
        report::dispatch_reports(&db, &notice, email.as_ref(), flush_summary.as_ref()).await;

    println!(
        "recipients: {}  notices: {}  emails: {}",
        outcome.recipient_count, outcome.notices_sent, outcome.emails_sent
    );
    for cycle in &outcome.cycles {
        println!(
            "  {}: {} notices, {} emails, {} errors",
            cycle.cycle.label(),
            cycle.notices_sent,
            cycle.emails_sent,
            cycle.error_count
        );
    }
    for error in &outcome.errors {
        println!("  error: {}", error);
    }
    Ok(())
}

async fn run_doctor(config: &Config, db: &Database) -> Result<()> {
    let flush_engine = build_flush_engine(config)?;
    let http = config.http.build_client()?;
    let site_url = Settings::new(db).get_opt_string(report::keys::SITE_URL);

    let snapshot = doctor::run_doctor(
        db,
        flush_engine.as_ref().map(|e| e as &dyn FlushEngine),
        &http,
        site_url.as_deref(),
    )
    .await?;

    println!(
        "overall: {}  (ok {}, warning {}, error {})",
        snapshot.status.as_str(),
        snapshot.ok_count,
        snapshot.warning_count,
        snapshot.error_count
    );
    for check in &snapshot.checks {
        let value = check
            .value
            .map(|v| format!("{:.1}", v))
            .unwrap_or_else(|| "-".into());
        println!(
            "  {:<16} {:<8} value={:<10} {}ms  {}",
            check.name,
            check.status.as_str(),
            value,
            check.duration_ms,
            check.detail.as_deref().unwrap_or("")
        );
    }
    Ok(())
}

async fn run_sync_projects(config: &Config, db: &Database) -> Result<()> {
    let client = GithubClient::new(
        config.github.token.as_deref(),
        Duration::from_secs(config.github.timeout_secs),
    )?;

    let outcome = project_sync::sync_projects(db, &client).await?;
    println!("synced: {}  failed: {}", outcome.synced, outcome.failed);
    for result in outcome.results.iter().filter(|r| !r.success) {
        println!(
            "  {}: {}",
            result.project_id,
            result.error.as_deref().unwrap_or("unknown")
        );
    }
    Ok(())
}

async fn run_check_links(config: &Config, db: &Database) -> Result<()> {
    let http = config.http.build_client()?;
    let settings = LinkCheckSettings::load(db);

    let outcome = link_check::check_links(db, &http, &settings).await?;
    println!(
        "checked: {}  healthy: {}  disconnected: {}  missing backlink: {}  status changes: {}",
        outcome.checked,
        outcome.healthy,
        outcome.disconnected,
        outcome.missing_backlink,
        outcome.status_changes
    );
    for result in &outcome.results {
        if let Some(status) = result.status_changed {
            println!("  {} -> {}", result.link_id, status.as_str());
        }
    }
    Ok(())
}

fn run_stats(db: &Database, days: i64, timezone: Option<String>) -> Result<()> {
    let report_settings = report::ReportSettings::load(db);
    let tz = match timezone {
        Some(name) => name
            .parse::<chrono_tz::Tz>()
            .map_err(|_| anyhow::anyhow!("invalid timezone: {}", name))?,
        None => report_settings.timezone,
    };

    let today = current_local_date(tz);
    let range = Range::new(today - ChronoDuration::days(days), today);
    let stats = collect_range_stats(db, &range, tz, true)?;

    println!("{} ({})", range.label(), tz);
    println!("views: {}  unique visitors: {}", stats.total_views, stats.unique_visitors);
    if !stats.top_paths.is_empty() {
        println!("top pages:");
        for (path, count) in &stats.top_paths {
            println!("  {:<40} {}", path, count);
        }
    }
    if !stats.top_referers.is_empty() {
        println!("top referers:");
        for (referer, count) in &stats.top_referers {
            println!("  {:<40} {}", referer, count);
        }
    }
    Ok(())
}

fn run_history(db: &Database, limit: usize) -> Result<()> {
    let checks = db.latest_health_checks(limit)?;
    if checks.is_empty() {
        println!("no health checks recorded yet");
        return Ok(());
    }
    for check in checks {
        println!(
            "{}  {}  (ok {}, warning {}, error {})",
            check.run_at.format("%Y-%m-%d %H:%M:%S"),
            check.status.as_str(),
            check.ok_count,
            check.warning_count,
            check.error_count
        );
    }
    Ok(())
}
