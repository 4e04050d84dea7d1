//! Flush/archive engine collaborator
//!
//! The hot-counter flush (cache → row store → per-day archive) lives in the
//! host application; this crate only consumes its summary and asks it for a
//! cache ping during health checks. [`HttpFlushEngine`] is the thin client
//! for the host's analytics endpoint.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Result of one flush run, reported verbatim in digest bodies.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FlushSummary {
    pub success: bool,
    /// Raw events drained from the cache layer
    pub flushed_count: i64,
    /// Per-page counter rows brought up to date
    pub synced_view_count_rows: i64,
    /// Calendar days rolled into the archive
    pub archived_date_groups: i64,
    /// Raw page-view rows deleted after archiving
    pub archived_raw_page_view_deleted: i64,
    /// Archive rows deleted by retention expiry
    pub expired_archive_deleted: i64,
}

impl FlushSummary {
    /// One plain-text line for report bodies.
    pub fn summary_line(&self) -> String {
        format!(
            "Flush: {} events drained, {} counter rows synced, {} days archived, {} raw rows pruned, {} expired archives removed",
            self.flushed_count,
            self.synced_view_count_rows,
            self.archived_date_groups,
            self.archived_raw_page_view_deleted,
            self.expired_archive_deleted,
        )
    }
}

/// Interface to the host application's flush/archive engine.
#[async_trait]
pub trait FlushEngine: Send + Sync {
    /// Trigger a flush run and return its summary.
    async fn flush_events(&self) -> Result<FlushSummary>;

    /// Round-trip the engine's cache layer; returns latency in milliseconds.
    async fn ping_cache(&self) -> Result<f64>;
}

/// HTTP client for a remotely hosted flush engine.
pub struct HttpFlushEngine {
    http: reqwest::Client,
    base_url: String,
}

impl HttpFlushEngine {
    pub fn new(base_url: &str, api_key: Option<&str>, timeout: Duration) -> Result<Self> {
        let mut headers = reqwest::header::HeaderMap::new();
        if let Some(key) = api_key {
            let value = reqwest::header::HeaderValue::from_str(&format!("Bearer {}", key))
                .map_err(|e| Error::Config(format!("invalid upstream api_key: {}", e)))?;
            headers.insert(reqwest::header::AUTHORIZATION, value);
        }

        let http = reqwest::Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()
            .map_err(|e| Error::Config(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl FlushEngine for HttpFlushEngine {
    async fn flush_events(&self) -> Result<FlushSummary> {
        let url = format!("{}/analytics/flush", self.base_url);
        let response = self
            .http
            .post(&url)
            .send()
            .await
            .map_err(|e| Error::Upstream(format!("flush request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_else(|_| "unknown".into());
            return Err(Error::Upstream(format!(
                "flush endpoint error ({}): {}",
                status, body
            )));
        }

        response
            .json::<FlushSummary>()
            .await
            .map_err(|e| Error::Upstream(format!("failed to parse flush summary: {}", e)))
    }

    async fn ping_cache(&self) -> Result<f64> {
        let url = format!("{}/cache/ping", self.base_url);
        let started = Instant::now();
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| Error::Upstream(format!("cache ping failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(Error::Upstream(format!(
                "cache ping error ({})",
                response.status()
            )));
        }
        Ok(started.elapsed().as_secs_f64() * 1000.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summary_decodes_wire_names() {
        let json = r#"{
            "success": true,
            "flushedCount": 120,
            "syncedViewCountRows": 40,
            "archivedDateGroups": 2,
            "archivedRawPageViewDeleted": 300,
            "expiredArchiveDeleted": 1
        }"#;
        let summary: FlushSummary = serde_json::from_str(json).unwrap();
        assert!(summary.success);
        assert_eq!(summary.flushed_count, 120);
        assert_eq!(summary.archived_date_groups, 2);
    }

    #[test]
    fn test_summary_tolerates_missing_fields() {
        let summary: FlushSummary = serde_json::from_str(r#"{"success": false}"#).unwrap();
        assert!(!summary.success);
        assert_eq!(summary.flushed_count, 0);
    }

    #[test]
    fn test_summary_line_mentions_counts() {
        let summary = FlushSummary {
            success: true,
            flushed_count: 5,
            synced_view_count_rows: 3,
            archived_date_groups: 1,
            archived_raw_page_view_deleted: 9,
            expired_archive_deleted: 0,
        };
        let line = summary.summary_line();
        assert!(line.contains("5 events"));
        assert!(line.contains("1 days archived"));
    }
}
