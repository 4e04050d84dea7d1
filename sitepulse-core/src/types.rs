//! Core domain types for sitepulse
//!
//! These types cover the analytics data model (hot page views, cold per-day
//! archives), the health-check snapshot, and the entities the background
//! jobs act on (users, notices, projects, friend links).
//!
//! ## Hot vs cold storage
//!
//! A page view lives in exactly one place at a time: either as a raw row in
//! `page_views` (recent retention window) or folded into the single
//! [`PageViewArchive`] row for its calendar day. The flush engine owns that
//! transition; everything in this crate only reads the two stores and sums
//! them without overlap.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

// ============================================
// Page views (hot store)
// ============================================

/// One raw visit event in the hot store. Append-only.
#[derive(Debug, Clone)]
pub struct PageView {
    /// Row id (0 until inserted)
    pub id: i64,
    /// When the visit happened
    pub ts: DateTime<Utc>,
    /// Visited path, e.g. `/posts/hello-world`
    pub path: String,
    /// Raw referer header value, if any
    pub referer: Option<String>,
    /// Opaque visitor fingerprint
    pub visitor_id: String,
}

// ============================================
// Per-day archive (cold store)
// ============================================

/// Pre-aggregated rollup of one calendar day, written by the flush engine
/// once the day leaves the hot retention window. Immutable after creation.
#[derive(Debug, Clone)]
pub struct PageViewArchive {
    /// Calendar day this row covers (timezone-naive at day granularity)
    pub date: NaiveDate,
    /// Total views for the day
    pub total_views: i64,
    /// Distinct visitors for the day
    pub unique_visitors: i64,
    /// Views per path
    pub path_stats: HashMap<String, i64>,
    /// Views per normalized referer
    pub referer_stats: HashMap<String, i64>,
    /// When the archive row was created
    pub created_at: DateTime<Utc>,
}

/// Decode a JSON count map, tolerating both plain numbers and the older
/// `{"views": n}` object shape; anything unreadable counts as zero.
pub fn decode_count_map(value: &serde_json::Value) -> HashMap<String, i64> {
    let mut out = HashMap::new();
    if let Some(obj) = value.as_object() {
        for (key, v) in obj {
            let count = v
                .as_i64()
                .or_else(|| v.get("views").and_then(|n| n.as_i64()))
                .or_else(|| v.get("count").and_then(|n| n.as_i64()))
                .unwrap_or(0);
            out.insert(key.clone(), count);
        }
    }
    out
}

// ============================================
// Users and notices
// ============================================

/// Account roles in the user directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserRole {
    Admin,
    Editor,
    Author,
    Reader,
}

impl UserRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserRole::Admin => "admin",
            UserRole::Editor => "editor",
            UserRole::Author => "author",
            UserRole::Reader => "reader",
        }
    }

    /// Parse a stored role string; unknown values demote to Reader.
    pub fn from_storage(value: &str) -> Self {
        match value {
            "admin" => UserRole::Admin,
            "editor" => UserRole::Editor,
            "author" => UserRole::Author,
            _ => UserRole::Reader,
        }
    }
}

/// Read-only projection of a user account, as needed for report delivery.
#[derive(Debug, Clone)]
pub struct Recipient {
    pub uid: i64,
    pub username: String,
    pub nickname: Option<String>,
    pub email: Option<String>,
    pub email_verified: bool,
}

impl Recipient {
    /// Preferred display name: nickname when set, username otherwise.
    pub fn display_name(&self) -> &str {
        self.nickname.as_deref().unwrap_or(&self.username)
    }
}

/// An in-app notice delivered to one user.
#[derive(Debug, Clone)]
pub struct Notice {
    pub id: i64,
    pub uid: i64,
    pub title: String,
    pub body: String,
    pub link: Option<String>,
    pub created_at: DateTime<Utc>,
    pub read: bool,
}

// ============================================
// Health checks
// ============================================

/// Three-tier probe grading. Ordering is by severity, worst last.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ProbeStatus {
    Ok,
    Warning,
    Error,
}

impl ProbeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProbeStatus::Ok => "OK",
            ProbeStatus::Warning => "WARNING",
            ProbeStatus::Error => "ERROR",
        }
    }

    pub fn from_storage(value: &str) -> Self {
        match value {
            "OK" => ProbeStatus::Ok,
            "WARNING" => ProbeStatus::Warning,
            _ => ProbeStatus::Error,
        }
    }
}

/// Outcome of a single doctor probe.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeResult {
    /// Probe name, e.g. `db-latency`
    pub name: String,
    /// Measured value (ms, pages, MiB...), None when the probe failed outright
    pub value: Option<f64>,
    /// How long the probe itself took
    pub duration_ms: i64,
    /// Graded status
    pub status: ProbeStatus,
    /// Free-form diagnostic detail
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// One immutable snapshot per doctor run.
#[derive(Debug, Clone)]
pub struct HealthCheck {
    pub id: i64,
    pub run_at: DateTime<Utc>,
    /// Worst severity across all probes
    pub status: ProbeStatus,
    pub ok_count: i64,
    pub warning_count: i64,
    pub error_count: i64,
    pub checks: Vec<ProbeResult>,
}

// ============================================
// Projects (code-hosting sync)
// ============================================

/// A showcased project, optionally synced against its code-hosting repo.
#[derive(Debug, Clone)]
pub struct Project {
    pub id: String,
    pub name: String,
    /// Repository reference, `owner/name` or a full repo URL
    pub repo: Option<String>,
    pub sync_enabled: bool,
    /// Whether README content is synced in addition to metadata
    pub content_sync_enabled: bool,
    pub stars: i64,
    pub forks: i64,
    pub license: Option<String>,
    /// Language breakdown, language -> bytes
    pub languages: HashMap<String, i64>,
    pub readme: Option<String>,
    pub synced_at: Option<DateTime<Utc>>,
}

// ============================================
// Friend links
// ============================================

/// Lifecycle status of a friend link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LinkStatus {
    Published,
    /// Whitelisted: never health-checked
    Trusted,
    Auditing,
    Banned,
    Disconnect,
    NoBacklink,
}

impl LinkStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LinkStatus::Published => "PUBLISHED",
            LinkStatus::Trusted => "TRUSTED",
            LinkStatus::Auditing => "AUDITING",
            LinkStatus::Banned => "BANNED",
            LinkStatus::Disconnect => "DISCONNECT",
            LinkStatus::NoBacklink => "NO_BACKLINK",
        }
    }

    pub fn from_storage(value: &str) -> Self {
        match value {
            "TRUSTED" => LinkStatus::Trusted,
            "AUDITING" => LinkStatus::Auditing,
            "BANNED" => LinkStatus::Banned,
            "DISCONNECT" => LinkStatus::Disconnect,
            "NO_BACKLINK" => LinkStatus::NoBacklink,
            _ => LinkStatus::Published,
        }
    }

    /// Statuses the checker may flip automatically. Auditing and Banned are
    /// moderation decisions and stay manual; Trusted is never checked.
    pub fn auto_manageable(&self) -> bool {
        matches!(
            self,
            LinkStatus::Published | LinkStatus::Disconnect | LinkStatus::NoBacklink
        )
    }
}

/// Classification of a single liveness check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IssueType {
    None,
    Disconnect,
    NoBacklink,
}

impl IssueType {
    pub fn is_failure(&self) -> bool {
        !matches!(self, IssueType::None)
    }
}

/// One entry in a link's rolling check history. Serialized as JSON with the
/// wire field names the admin surface expects.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkCheckRecord {
    /// When the check ran (ISO-8601 instant)
    pub time: DateTime<Utc>,
    /// Round-trip time in ms; None when the request never completed
    pub response_time: Option<i64>,
    /// HTTP status code; None when the request never completed
    pub status_code: Option<i64>,
    pub issue_type: IssueType,
    /// Only present when back-link verification ran
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub has_backlink: Option<bool>,
}

/// A friend link with its rolling check history (newest first, capped).
#[derive(Debug, Clone)]
pub struct Link {
    pub id: String,
    pub name: String,
    pub url: String,
    pub status: LinkStatus,
    /// Skip back-link verification for this link even when globally enabled
    pub ignore_backlink: bool,
    pub check_history: Vec<LinkCheckRecord>,
    pub updated_at: DateTime<Utc>,
}
