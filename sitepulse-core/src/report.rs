//! Periodic digest report dispatcher
//!
//! One dispatch run is a single pass: load settings, work out which cycles
//! are due today in the configured timezone, resolve recipients, then for
//! each due cycle collect stats, compare against the previous period and fan
//! the rendered digest out over the notice and email channels. Every failure
//! along the way is captured into the returned [`DispatchReport`]; this
//! function never fails the run itself.

use chrono::{Datelike, NaiveDate, Weekday};
use chrono_tz::Tz;
use futures_util::future::join_all;

use crate::channels::{EmailChannel, EmailMessage, NoticeChannel};
use crate::db::Database;
use crate::error::Result;
use crate::flush::FlushSummary;
use crate::settings::Settings;
use crate::stats::{collect_range_stats, RangeStats};
use crate::timebucket::{current_local_date, cycle_range, previous_range, Cycle, Range};
use crate::trend::{trend, Trend};
use crate::types::{Recipient, UserRole};

/// Setting keys read by the dispatcher.
pub mod keys {
    pub const MODE: &str = "report.mode";
    pub const DAILY: &str = "report.daily";
    pub const WEEKLY: &str = "report.weekly";
    pub const MONTHLY: &str = "report.monthly";
    pub const RECIPIENTS: &str = "report.recipients";
    pub const TIMEZONE: &str = "report.timezone";
    pub const SITE_NAME: &str = "site.name";
    pub const SITE_URL: &str = "site.url";
}

/// Delivery mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportMode {
    None,
    Notice,
    Email,
    NoticeEmail,
}

impl ReportMode {
    /// Parse a stored mode string; anything unrecognized is None.
    pub fn from_storage(value: &str) -> Self {
        match value.trim().to_ascii_uppercase().as_str() {
            "NOTICE" => ReportMode::Notice,
            "EMAIL" => ReportMode::Email,
            "NOTICE_EMAIL" => ReportMode::NoticeEmail,
            "NONE" => ReportMode::None,
            other => {
                if !other.is_empty() {
                    tracing::warn!(mode = other, "Unrecognized report mode, treating as NONE");
                }
                ReportMode::None
            }
        }
    }

    pub fn includes_notice(&self) -> bool {
        matches!(self, ReportMode::Notice | ReportMode::NoticeEmail)
    }

    pub fn includes_email(&self) -> bool {
        matches!(self, ReportMode::Email | ReportMode::NoticeEmail)
    }
}

/// Dispatcher configuration assembled from the settings store. Loading never
/// fails: bad values fall back to safe defaults (UTC, mode NONE).
#[derive(Debug, Clone)]
pub struct ReportSettings {
    pub mode: ReportMode,
    pub daily_enabled: bool,
    pub weekly_enabled: bool,
    pub monthly_enabled: bool,
    /// Explicit recipient allow-list; empty means role-based fallback
    pub recipient_uids: Vec<i64>,
    pub timezone: Tz,
    pub site_name: String,
    pub site_url: Option<String>,
}

impl ReportSettings {
    pub fn load(db: &Database) -> Self {
        let settings = Settings::new(db);

        let tz_name = settings.get_string(keys::TIMEZONE, "UTC");
        let timezone = tz_name.parse::<Tz>().unwrap_or_else(|_| {
            tracing::warn!(timezone = %tz_name, "Unparsable report timezone, falling back to UTC");
            chrono_tz::UTC
        });

        Self {
            mode: ReportMode::from_storage(&settings.get_string(keys::MODE, "NONE")),
            daily_enabled: settings.get_bool(keys::DAILY, true),
            weekly_enabled: settings.get_bool(keys::WEEKLY, true),
            monthly_enabled: settings.get_bool(keys::MONTHLY, true),
            recipient_uids: settings.get_uid_list(keys::RECIPIENTS),
            timezone,
            site_name: settings.get_string(keys::SITE_NAME, "Site"),
            site_url: settings.get_opt_string(keys::SITE_URL),
        }
    }
}

/// Which cycles are due for "today": daily on every run, weekly on Mondays,
/// monthly on the first of the month. Each is gated on its enable flag.
pub fn due_cycles(settings: &ReportSettings, today: NaiveDate) -> Vec<Cycle> {
    let mut due = Vec::new();
    if settings.daily_enabled {
        due.push(Cycle::Daily);
    }
    if settings.weekly_enabled && today.weekday() == Weekday::Mon {
        due.push(Cycle::Weekly);
    }
    if settings.monthly_enabled && today.day() == 1 {
        due.push(Cycle::Monthly);
    }
    due
}

/// Resolve the audience: explicit allow-list, else all admins and editors.
pub fn resolve_recipients(db: &Database, settings: &ReportSettings) -> Result<Vec<Recipient>> {
    if !settings.recipient_uids.is_empty() {
        db.users_by_uids(&settings.recipient_uids)
    } else {
        db.users_by_roles(&[UserRole::Admin, UserRole::Editor])
    }
}

/// Rendered digest for one cycle.
#[derive(Debug, Clone)]
pub struct ReportContent {
    pub title: String,
    pub body: String,
    pub html: String,
}

fn render_report(
    settings: &ReportSettings,
    cycle: Cycle,
    range: &Range,
    current: &RangeStats,
    previous: &RangeStats,
    views_trend: &Trend,
    visitors_trend: &Trend,
    flush: Option<&FlushSummary>,
) -> ReportContent {
    let title = format!(
        "[{}] {} traffic report · {}",
        settings.site_name,
        cycle.display_name(),
        range.label()
    );

    let mut lines = Vec::new();
    lines.push(format!("Period: {}", range.label()));
    lines.push(format!(
        "Views: {} {} {} (previous {})",
        current.total_views, views_trend.symbol, views_trend.text, previous.total_views
    ));
    lines.push(format!(
        "Unique visitors: {} {} {} (previous {})",
        current.unique_visitors,
        visitors_trend.symbol,
        visitors_trend.text,
        previous.unique_visitors
    ));

    if !current.top_paths.is_empty() {
        lines.push("Top pages:".to_string());
        for (i, (path, count)) in current.top_paths.iter().enumerate() {
            lines.push(format!("  {}. {} — {} views", i + 1, path, count));
        }
    }
    if !current.top_referers.is_empty() {
        lines.push("Top referers:".to_string());
        for (i, (referer, count)) in current.top_referers.iter().enumerate() {
            lines.push(format!("  {}. {} — {} views", i + 1, referer, count));
        }
    }
    if let Some(summary) = flush {
        lines.push(summary.summary_line());
    }

    let body = lines.join("\n");

    let mut html = String::new();
    html.push_str(&format!("<h2>{}</h2>\n", title));
    for line in &lines {
        html.push_str(&format!("<p>{}</p>\n", line));
    }

    ReportContent { title, body, html }
}

/// Per-cycle delivery tally.
#[derive(Debug, Clone, serde::Serialize)]
pub struct CycleOutcome {
    pub cycle: Cycle,
    pub notices_sent: usize,
    pub emails_sent: usize,
    pub error_count: usize,
}

/// Aggregated outcome of one dispatch run. Errors are data, never panics or
/// propagated failures.
#[derive(Debug, Clone, Default)]
pub struct DispatchReport {
    pub recipient_count: usize,
    pub notices_sent: usize,
    pub emails_sent: usize,
    pub cycles: Vec<CycleOutcome>,
    pub errors: Vec<String>,
}

/// Run a dispatch for "today" in the configured timezone.
pub async fn dispatch_reports(
    db: &Database,
    notice: &dyn NoticeChannel,
    email: &dyn EmailChannel,
    flush: Option<&FlushSummary>,
) -> DispatchReport {
    let settings = ReportSettings::load(db);
    let today = current_local_date(settings.timezone);
    dispatch_reports_for_date(db, notice, email, flush, &settings, today).await
}

/// Dispatch with an explicit settings snapshot and calendar date. The date
/// parameter keeps scheduling decisions testable.
pub async fn dispatch_reports_for_date(
    db: &Database,
    notice: &dyn NoticeChannel,
    email: &dyn EmailChannel,
    flush: Option<&FlushSummary>,
    settings: &ReportSettings,
    today: NaiveDate,
) -> DispatchReport {
    let mut report = DispatchReport::default();

    if settings.mode == ReportMode::None {
        tracing::debug!("Report mode is NONE, skipping dispatch");
        return report;
    }

    let due = due_cycles(settings, today);
    if due.is_empty() {
        tracing::debug!(%today, "No report cycles due");
        return report;
    }

    let recipients = match resolve_recipients(db, settings) {
        Ok(recipients) => recipients,
        Err(e) => {
            report.errors.push(format!("failed to resolve recipients: {}", e));
            return report;
        }
    };
    report.recipient_count = recipients.len();
    if recipients.is_empty() {
        report.errors.push(
            "no report recipients resolved (configure report.recipients or add admin/editor accounts)"
                .to_string(),
        );
        return report;
    }

    // Cycles run sequentially so resource usage stays predictable and error
    // attribution stays per-cycle; recipients within a cycle fan out
    // concurrently.
    for cycle in due {
        let outcome = dispatch_cycle(
            db, notice, email, flush, settings, cycle, today, &recipients, &mut report.errors,
        )
        .await;
        report.notices_sent += outcome.notices_sent;
        report.emails_sent += outcome.emails_sent;
        report.cycles.push(outcome);
    }

    audit_run(db, &report);

    tracing::info!(
        recipients = report.recipient_count,
        notices = report.notices_sent,
        emails = report.emails_sent,
        errors = report.errors.len(),
        "Report dispatch complete"
    );

    report
}

#[allow(clippy::too_many_arguments)]
async fn dispatch_cycle(
    db: &Database,
    notice: &dyn NoticeChannel,
    email: &dyn EmailChannel,
    flush: Option<&FlushSummary>,
    settings: &ReportSettings,
    cycle: Cycle,
    today: NaiveDate,
    recipients: &[Recipient],
    errors: &mut Vec<String>,
) -> CycleOutcome {
    let mut outcome = CycleOutcome {
        cycle,
        notices_sent: 0,
        emails_sent: 0,
        error_count: 0,
    };

    let range = cycle_range(cycle, today);
    let prev_range = previous_range(cycle, &range);

    let current = match collect_range_stats(db, &range, settings.timezone, true) {
        Ok(stats) => stats,
        Err(e) => {
            errors.push(format!("{} report: stats collection failed: {}", cycle.label(), e));
            outcome.error_count += 1;
            return outcome;
        }
    };
    // Previous period only needs totals; skip the breakdown queries.
    let previous = match collect_range_stats(db, &prev_range, settings.timezone, false) {
        Ok(stats) => stats,
        Err(e) => {
            errors.push(format!(
                "{} report: previous-period stats failed: {}",
                cycle.label(),
                e
            ));
            outcome.error_count += 1;
            return outcome;
        }
    };

    let views_trend = trend(current.total_views, previous.total_views);
    let visitors_trend = trend(current.unique_visitors, previous.unique_visitors);
    let content = render_report(
        settings,
        cycle,
        &range,
        &current,
        &previous,
        &views_trend,
        &visitors_trend,
        flush,
    );

    let deliveries = recipients
        .iter()
        .map(|recipient| deliver_to(recipient, cycle, &content, settings, notice, email));
    for (notice_sent, email_sent, mut recipient_errors) in join_all(deliveries).await {
        if notice_sent {
            outcome.notices_sent += 1;
        }
        if email_sent {
            outcome.emails_sent += 1;
        }
        outcome.error_count += recipient_errors.len();
        errors.append(&mut recipient_errors);
    }

    outcome
}

/// Deliver one cycle's digest to one recipient over the enabled channels.
/// Returns (notice_sent, email_sent, errors); failures never escape.
async fn deliver_to(
    recipient: &Recipient,
    cycle: Cycle,
    content: &ReportContent,
    settings: &ReportSettings,
    notice: &dyn NoticeChannel,
    email: &dyn EmailChannel,
) -> (bool, bool, Vec<String>) {
    let mut notice_sent = false;
    let mut email_sent = false;
    let mut errors = Vec::new();

    if settings.mode.includes_notice() {
        match notice
            .send_notice(
                recipient.uid,
                &content.title,
                &content.body,
                Some("/admin/analytics"),
                true,
            )
            .await
        {
            Ok(()) => notice_sent = true,
            Err(e) => errors.push(format!(
                "notice to {} failed ({} report): {}",
                recipient.username,
                cycle.label(),
                e
            )),
        }
    }

    if settings.mode.includes_email() {
        match recipient.email.as_deref() {
            Some(address) if recipient.email_verified => {
                let message = EmailMessage {
                    to: address.to_string(),
                    subject: content.title.clone(),
                    html: content.html.clone(),
                    text: content.body.clone(),
                };
                let result = email.send_email(&message).await;
                if result.success {
                    email_sent = true;
                } else {
                    errors.push(format!(
                        "email to {} failed ({} report): {}",
                        recipient.username,
                        cycle.label(),
                        result.error.unwrap_or_else(|| "unknown".into())
                    ));
                }
            }
            _ => {
                // Unverified or missing address: skip the email channel only.
                tracing::debug!(
                    uid = recipient.uid,
                    "Skipping email delivery for unverified recipient"
                );
            }
        }
    }

    (notice_sent, email_sent, errors)
}

/// Best-effort audit record; a failure here is logged, not surfaced.
fn audit_run(db: &Database, report: &DispatchReport) {
    let cycles = match serde_json::to_value(&report.cycles) {
        Ok(value) => value,
        Err(e) => {
            tracing::warn!(error = %e, "Failed to encode report audit cycles");
            return;
        }
    };
    if let Err(e) = db.insert_report_run(
        &cycles,
        report.notices_sent as i64,
        report.emails_sent as i64,
        &report.errors,
    ) {
        tracing::warn!(error = %e, "Failed to write report audit record");
    }
}
