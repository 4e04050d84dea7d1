//! Friend-link liveness checks
//!
//! Every link outside the Trusted whitelist gets a timed GET against an
//! SSRF-validated URL, a classification into {NONE, DISCONNECT, NO_BACKLINK}
//! and an entry in its rolling 30-check history. With auto management on,
//! a link flips to its failure status after 30/30 failed checks and back to
//! PUBLISHED on the first success. Links are checked in fixed-size batches
//! to bound concurrent outbound connections.

use std::net::IpAddr;
use std::time::{Duration, Instant};

use chrono::Utc;
use futures_util::future::join_all;
use url::{Host, Url};

use crate::db::Database;
use crate::error::Result;
use crate::settings::Settings;
use crate::types::{IssueType, Link, LinkCheckRecord, LinkStatus};

/// Rolling history cap per link
pub const HISTORY_LIMIT: usize = 30;

/// Response body read cap for the back-link scan
pub const MAX_BODY_BYTES: usize = 512 * 1024;

/// Setting keys for the checker.
pub mod keys {
    pub const BACKLINK_CHECK: &str = "links.backlink_check";
    pub const AUTO_MANAGE: &str = "links.auto_manage";
    pub const TIMEOUT_SECS: &str = "links.timeout_secs";
    pub const BATCH_SIZE: &str = "links.batch_size";
}

/// Checker configuration. The back-link target domain comes from `site.url`;
/// without one, back-link verification is effectively disabled.
#[derive(Debug, Clone)]
pub struct LinkCheckSettings {
    pub backlink_check: bool,
    pub auto_manage: bool,
    pub site_domain: Option<String>,
    pub timeout: Duration,
    pub batch_size: usize,
}

impl Default for LinkCheckSettings {
    fn default() -> Self {
        Self {
            backlink_check: true,
            auto_manage: false,
            site_domain: None,
            timeout: Duration::from_secs(10),
            batch_size: 100,
        }
    }
}

impl LinkCheckSettings {
    pub fn load(db: &Database) -> Self {
        let settings = Settings::new(db);
        let defaults = Self::default();

        let site_domain = settings
            .get_opt_string(crate::report::keys::SITE_URL)
            .and_then(|raw| Url::parse(&raw).ok())
            .and_then(|url| url.host_str().map(|h| h.to_string()));

        Self {
            backlink_check: settings.get_bool(keys::BACKLINK_CHECK, defaults.backlink_check),
            auto_manage: settings.get_bool(keys::AUTO_MANAGE, defaults.auto_manage),
            site_domain,
            timeout: Duration::from_secs(
                settings
                    .get_i64(keys::TIMEOUT_SECS, defaults.timeout.as_secs() as i64)
                    .max(1) as u64,
            ),
            batch_size: settings
                .get_i64(keys::BATCH_SIZE, defaults.batch_size as i64)
                .max(1) as usize,
        }
    }
}

/// Validate that a URL is a public HTTP(S) target: rejects non-HTTP schemes,
/// localhost, and loopback/private/link-local address literals.
pub fn validate_public_url(raw: &str) -> std::result::Result<Url, String> {
    let url = Url::parse(raw).map_err(|e| format!("unparsable URL: {}", e))?;

    match url.scheme() {
        "http" | "https" => {}
        other => return Err(format!("scheme {} not allowed", other)),
    }

    match url.host() {
        None => Err("URL has no host".into()),
        Some(Host::Domain(domain)) => {
            if domain.eq_ignore_ascii_case("localhost") || domain.ends_with(".localhost") {
                Err("localhost not allowed".into())
            } else {
                Ok(url)
            }
        }
        Some(Host::Ipv4(addr)) => {
            if addr.is_loopback()
                || addr.is_private()
                || addr.is_link_local()
                || addr.is_unspecified()
                || addr.is_broadcast()
            {
                Err(format!("address {} is not public", addr))
            } else {
                Ok(url)
            }
        }
        Some(Host::Ipv6(addr)) => {
            let segments = addr.segments();
            let unique_local = (segments[0] & 0xfe00) == 0xfc00;
            let link_local = (segments[0] & 0xffc0) == 0xfe80;
            let mapped_private = match addr.to_ipv4_mapped() {
                Some(v4) => {
                    v4.is_loopback() || v4.is_private() || v4.is_link_local() || v4.is_unspecified()
                }
                None => false,
            };
            if addr.is_loopback() || addr.is_unspecified() || unique_local || link_local
                || mapped_private
            {
                Err(format!("address {} is not public", IpAddr::V6(addr)))
            } else {
                Ok(url)
            }
        }
    }
}

/// Classify a completed (or failed) fetch.
///
/// `body` is None when no 2xx response arrived. Back-link verification only
/// runs when requested and a target domain is known; a missing back-link on
/// an otherwise healthy page classifies as NO_BACKLINK.
pub fn classify(
    status_code: Option<u16>,
    body: Option<&str>,
    check_backlink: bool,
    site_domain: Option<&str>,
) -> (IssueType, Option<bool>) {
    let body = match (status_code, body) {
        (Some(code), Some(body)) if (200..300).contains(&(code as i64)) => body,
        _ => return (IssueType::Disconnect, None),
    };

    if !check_backlink {
        return (IssueType::None, None);
    }
    let Some(domain) = site_domain else {
        return (IssueType::None, None);
    };

    let has_backlink = body.to_lowercase().contains(&domain.to_lowercase());
    if has_backlink {
        (IssueType::None, Some(true))
    } else {
        (IssueType::NoBacklink, Some(false))
    }
}

/// Prepend the newest record, keeping at most [`HISTORY_LIMIT`] entries.
pub fn roll_history(history: &mut Vec<LinkCheckRecord>, record: LinkCheckRecord) {
    history.insert(0, record);
    history.truncate(HISTORY_LIMIT);
}

/// Decide an automatic status transition, if any.
///
/// - Latest check succeeded while the link sat in a failure status → back to
///   PUBLISHED.
/// - All of the last [`HISTORY_LIMIT`] checks failed → the latest failure's
///   status.
pub fn next_status(
    current: LinkStatus,
    history: &[LinkCheckRecord],
    auto_manage: bool,
) -> Option<LinkStatus> {
    if !auto_manage || !current.auto_manageable() {
        return None;
    }
    let latest = history.first()?;

    if !latest.issue_type.is_failure() {
        if matches!(current, LinkStatus::Disconnect | LinkStatus::NoBacklink) {
            return Some(LinkStatus::Published);
        }
        return None;
    }

    if history.len() == HISTORY_LIMIT && history.iter().all(|r| r.issue_type.is_failure()) {
        let target = match latest.issue_type {
            IssueType::Disconnect => LinkStatus::Disconnect,
            IssueType::NoBacklink => LinkStatus::NoBacklink,
            IssueType::None => return None,
        };
        if target != current {
            return Some(target);
        }
    }
    None
}

/// Per-link outcome, correlated by link id.
#[derive(Debug, Clone)]
pub struct LinkCheckOutcome {
    pub link_id: String,
    pub issue_type: IssueType,
    pub response_time: Option<i64>,
    pub status_code: Option<i64>,
    pub has_backlink: Option<bool>,
    /// Automatic status transition applied by this run, if any
    pub status_changed: Option<LinkStatus>,
}

/// Batch outcome.
#[derive(Debug, Clone, Default)]
pub struct LinkCheckReport {
    pub checked: usize,
    pub healthy: usize,
    pub disconnected: usize,
    pub missing_backlink: usize,
    pub status_changes: usize,
    pub results: Vec<LinkCheckOutcome>,
}

/// Check every non-Trusted link in bounded concurrent batches.
pub async fn check_links(
    db: &Database,
    http: &reqwest::Client,
    settings: &LinkCheckSettings,
) -> Result<LinkCheckReport> {
    let links: Vec<Link> = db
        .all_links()?
        .into_iter()
        .filter(|link| link.status != LinkStatus::Trusted)
        .collect();

    let mut report = LinkCheckReport::default();
    for batch in links.chunks(settings.batch_size) {
        let outcomes = join_all(batch.iter().map(|link| check_one(db, http, settings, link))).await;
        for outcome in outcomes {
            report.checked += 1;
            match outcome.issue_type {
                IssueType::None => report.healthy += 1,
                IssueType::Disconnect => report.disconnected += 1,
                IssueType::NoBacklink => report.missing_backlink += 1,
            }
            if outcome.status_changed.is_some() {
                report.status_changes += 1;
            }
            report.results.push(outcome);
        }
    }

    tracing::info!(
        checked = report.checked,
        healthy = report.healthy,
        disconnected = report.disconnected,
        missing_backlink = report.missing_backlink,
        status_changes = report.status_changes,
        "Friend-link check complete"
    );
    Ok(report)
}

async fn check_one(
    db: &Database,
    http: &reqwest::Client,
    settings: &LinkCheckSettings,
    link: &Link,
) -> LinkCheckOutcome {
    let check_backlink = settings.backlink_check && !link.ignore_backlink;
    let record = fetch_and_classify(http, link, settings, check_backlink).await;

    let mut history = link.check_history.clone();
    roll_history(&mut history, record.clone());

    let status_changed = next_status(link.status, &history, settings.auto_manage);
    let new_status = status_changed.unwrap_or(link.status);
    if let Some(status) = status_changed {
        tracing::info!(
            link_id = %link.id,
            from = link.status.as_str(),
            to = status.as_str(),
            "Auto-managing link status"
        );
    }

    if let Err(e) = db.apply_link_check(&link.id, new_status, &history) {
        tracing::warn!(link_id = %link.id, error = %e, "Failed to persist link check");
    }

    LinkCheckOutcome {
        link_id: link.id.clone(),
        issue_type: record.issue_type,
        response_time: record.response_time,
        status_code: record.status_code,
        has_backlink: record.has_backlink,
        status_changed,
    }
}

async fn fetch_and_classify(
    http: &reqwest::Client,
    link: &Link,
    settings: &LinkCheckSettings,
    check_backlink: bool,
) -> LinkCheckRecord {
    let now = Utc::now();
    let fail = |issue_type: IssueType| LinkCheckRecord {
        time: now,
        response_time: None,
        status_code: None,
        issue_type,
        has_backlink: None,
    };

    let url = match validate_public_url(&link.url) {
        Ok(url) => url,
        Err(reason) => {
            tracing::warn!(link_id = %link.id, url = %link.url, %reason, "Rejected link URL");
            return fail(IssueType::Disconnect);
        }
    };

    let started = Instant::now();
    let response = match http
        .get(url)
        .timeout(settings.timeout)
        .send()
        .await
    {
        Ok(response) => response,
        Err(e) => {
            tracing::debug!(link_id = %link.id, error = %e, "Link request failed");
            return fail(IssueType::Disconnect);
        }
    };

    let status_code = response.status().as_u16();
    let body = if response.status().is_success() {
        read_capped(response).await
    } else {
        None
    };
    let response_time = started.elapsed().as_millis() as i64;

    let (issue_type, has_backlink) = classify(
        Some(status_code),
        body.as_deref(),
        check_backlink,
        settings.site_domain.as_deref(),
    );

    LinkCheckRecord {
        time: now,
        response_time: Some(response_time),
        status_code: Some(status_code as i64),
        issue_type,
        has_backlink,
    }
}

/// Read a response body up to [`MAX_BODY_BYTES`]; None on a read error.
async fn read_capped(mut response: reqwest::Response) -> Option<String> {
    let mut body: Vec<u8> = Vec::new();
    loop {
        match response.chunk().await {
            Ok(Some(chunk)) => {
                let remaining = MAX_BODY_BYTES.saturating_sub(body.len());
                body.extend_from_slice(&chunk[..chunk.len().min(remaining)]);
                if body.len() >= MAX_BODY_BYTES {
                    break;
                }
            }
            Ok(None) => break,
            Err(_) => return None,
        }
    }
    Some(String::from_utf8_lossy(&body).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(issue_type: IssueType) -> LinkCheckRecord {
        LinkCheckRecord {
            time: Utc::now(),
            response_time: Some(50),
            status_code: Some(200),
            issue_type,
            has_backlink: None,
        }
    }

    #[test]
    fn test_validate_public_url() {
        assert!(validate_public_url("https://friend.example/about").is_ok());
        assert!(validate_public_url("http://93.184.216.34").is_ok());

        assert!(validate_public_url("ftp://friend.example").is_err());
        assert!(validate_public_url("file:///etc/passwd").is_err());
        assert!(validate_public_url("https://localhost/x").is_err());
        assert!(validate_public_url("https://foo.localhost/x").is_err());
        assert!(validate_public_url("http://127.0.0.1:8080").is_err());
        assert!(validate_public_url("http://10.1.2.3").is_err());
        assert!(validate_public_url("http://192.168.0.1").is_err());
        assert!(validate_public_url("http://169.254.1.1").is_err());
        assert!(validate_public_url("http://[::1]").is_err());
        assert!(validate_public_url("http://[fe80::1]").is_err());
        assert!(validate_public_url("http://[fd00::1]").is_err());
        assert!(validate_public_url("not a url").is_err());
    }

    #[test]
    fn test_classify_outcomes() {
        // Transport failure
        assert_eq!(
            classify(None, None, true, Some("blog.example")),
            (IssueType::Disconnect, None)
        );
        // Non-2xx
        assert_eq!(
            classify(Some(503), None, true, Some("blog.example")),
            (IssueType::Disconnect, None)
        );
        // Healthy with back-link
        assert_eq!(
            classify(
                Some(200),
                Some("<a href=\"https://BLOG.example\">me</a>"),
                true,
                Some("blog.example")
            ),
            (IssueType::None, Some(true))
        );
        // Healthy without back-link
        assert_eq!(
            classify(Some(200), Some("<p>nothing here</p>"), true, Some("blog.example")),
            (IssueType::NoBacklink, Some(false))
        );
        // Back-link verification disabled
        assert_eq!(
            classify(Some(200), Some("<p>nothing here</p>"), false, Some("blog.example")),
            (IssueType::None, None)
        );
        // No configured domain to look for
        assert_eq!(
            classify(Some(200), Some("<p>nothing here</p>"), true, None),
            (IssueType::None, None)
        );
    }

    #[test]
    fn test_roll_history_caps_at_limit() {
        let mut history = Vec::new();
        for _ in 0..40 {
            roll_history(&mut history, record(IssueType::Disconnect));
        }
        assert_eq!(history.len(), HISTORY_LIMIT);

        roll_history(&mut history, record(IssueType::None));
        assert_eq!(history.len(), HISTORY_LIMIT);
        // Newest entry is first
        assert_eq!(history[0].issue_type, IssueType::None);
    }

    #[test]
    fn test_next_status_flips_after_full_failed_window() {
        let history: Vec<LinkCheckRecord> = (0..HISTORY_LIMIT)
            .map(|_| record(IssueType::Disconnect))
            .collect();

        assert_eq!(
            next_status(LinkStatus::Published, &history, true),
            Some(LinkStatus::Disconnect)
        );
        // Without auto management nothing happens
        assert_eq!(next_status(LinkStatus::Published, &history, false), None);
        // Already in the target status: no redundant transition
        assert_eq!(next_status(LinkStatus::Disconnect, &history, true), None);
        // Not auto-manageable
        assert_eq!(next_status(LinkStatus::Auditing, &history, true), None);
    }

    #[test]
    fn test_next_status_requires_full_window() {
        let history: Vec<LinkCheckRecord> = (0..HISTORY_LIMIT - 1)
            .map(|_| record(IssueType::Disconnect))
            .collect();
        assert_eq!(next_status(LinkStatus::Published, &history, true), None);

        // A single success inside the window blocks the flip
        let mut mixed: Vec<LinkCheckRecord> = (0..HISTORY_LIMIT)
            .map(|_| record(IssueType::Disconnect))
            .collect();
        mixed[15] = record(IssueType::None);
        assert_eq!(next_status(LinkStatus::Published, &mixed, true), None);
    }

    #[test]
    fn test_next_status_recovers_on_success() {
        let mut history: Vec<LinkCheckRecord> = (0..HISTORY_LIMIT)
            .map(|_| record(IssueType::Disconnect))
            .collect();
        roll_history(&mut history, record(IssueType::None));

        assert_eq!(
            next_status(LinkStatus::Disconnect, &history, true),
            Some(LinkStatus::Published)
        );
        assert_eq!(
            next_status(LinkStatus::NoBacklink, &history, true),
            Some(LinkStatus::Published)
        );
        // A healthy published link stays put
        assert_eq!(next_status(LinkStatus::Published, &history, true), None);
    }

    #[test]
    fn test_no_backlink_window_flips_to_no_backlink() {
        let history: Vec<LinkCheckRecord> = (0..HISTORY_LIMIT)
            .map(|_| record(IssueType::NoBacklink))
            .collect();
        assert_eq!(
            next_status(LinkStatus::Published, &history, true),
            Some(LinkStatus::NoBacklink)
        );
    }

    #[tokio::test]
    async fn test_check_links_skips_trusted() {
        let db = Database::open_in_memory().unwrap();
        db.migrate().unwrap();
        db.upsert_link(&Link {
            id: "t1".into(),
            name: "trusted".into(),
            url: "https://trusted.example".into(),
            status: LinkStatus::Trusted,
            ignore_backlink: false,
            check_history: Vec::new(),
            updated_at: Utc::now(),
        })
        .unwrap();

        let http = reqwest::Client::new();
        let settings = LinkCheckSettings::default();
        let report = check_links(&db, &http, &settings).await.unwrap();

        assert_eq!(report.checked, 0);
        assert!(report.results.is_empty());
        // History untouched
        let link = db.get_link("t1").unwrap().unwrap();
        assert!(link.check_history.is_empty());
    }
}
