//! Doctor health check
//!
//! Runs a fixed battery of probes concurrently, grades each numeric probe
//! against two-tier warning/error thresholds and persists one immutable
//! snapshot per run. Probe failures degrade that probe to ERROR; they never
//! abort the run.

use std::time::Instant;

use chrono::Utc;

use crate::db::Database;
use crate::error::Result;
use crate::flush::FlushEngine;
use crate::settings::Settings;
use crate::types::{HealthCheck, ProbeResult, ProbeStatus};

/// Setting keys for threshold overrides.
pub mod keys {
    pub const DB_LATENCY_WARN: &str = "doctor.db_latency_warn_ms";
    pub const DB_LATENCY_ERROR: &str = "doctor.db_latency_error_ms";
    pub const WAL_BACKLOG_WARN: &str = "doctor.wal_backlog_warn_frames";
    pub const WAL_BACKLOG_ERROR: &str = "doctor.wal_backlog_error_frames";
    pub const DB_SIZE_WARN: &str = "doctor.db_size_warn_mib";
    pub const DB_SIZE_ERROR: &str = "doctor.db_size_error_mib";
    pub const CACHE_LATENCY_WARN: &str = "doctor.cache_latency_warn_ms";
    pub const CACHE_LATENCY_ERROR: &str = "doctor.cache_latency_error_ms";
    pub const SITE_LATENCY_WARN: &str = "doctor.site_latency_warn_ms";
    pub const SITE_LATENCY_ERROR: &str = "doctor.site_latency_error_ms";
}

/// Two-tier grading threshold.
#[derive(Debug, Clone, Copy)]
pub struct Threshold {
    pub warn: f64,
    pub error: f64,
}

impl Threshold {
    pub const fn new(warn: f64, error: f64) -> Self {
        Self { warn, error }
    }

    /// Below warn → OK, below error → WARNING, else ERROR.
    pub fn grade(&self, value: f64) -> ProbeStatus {
        if value < self.warn {
            ProbeStatus::Ok
        } else if value < self.error {
            ProbeStatus::Warning
        } else {
            ProbeStatus::Error
        }
    }
}

/// Per-probe thresholds, overridable through settings.
#[derive(Debug, Clone, Copy)]
pub struct DoctorThresholds {
    pub db_latency_ms: Threshold,
    pub wal_backlog_frames: Threshold,
    pub db_size_mib: Threshold,
    pub cache_latency_ms: Threshold,
    pub site_latency_ms: Threshold,
}

impl Default for DoctorThresholds {
    fn default() -> Self {
        Self {
            db_latency_ms: Threshold::new(100.0, 300.0),
            wal_backlog_frames: Threshold::new(1_000.0, 10_000.0),
            db_size_mib: Threshold::new(512.0, 2_048.0),
            cache_latency_ms: Threshold::new(50.0, 200.0),
            site_latency_ms: Threshold::new(500.0, 1_500.0),
        }
    }
}

impl DoctorThresholds {
    pub fn load(db: &Database) -> Self {
        let settings = Settings::new(db);
        let defaults = Self::default();
        Self {
            db_latency_ms: Threshold::new(
                settings.get_f64(keys::DB_LATENCY_WARN, defaults.db_latency_ms.warn),
                settings.get_f64(keys::DB_LATENCY_ERROR, defaults.db_latency_ms.error),
            ),
            wal_backlog_frames: Threshold::new(
                settings.get_f64(keys::WAL_BACKLOG_WARN, defaults.wal_backlog_frames.warn),
                settings.get_f64(keys::WAL_BACKLOG_ERROR, defaults.wal_backlog_frames.error),
            ),
            db_size_mib: Threshold::new(
                settings.get_f64(keys::DB_SIZE_WARN, defaults.db_size_mib.warn),
                settings.get_f64(keys::DB_SIZE_ERROR, defaults.db_size_mib.error),
            ),
            cache_latency_ms: Threshold::new(
                settings.get_f64(keys::CACHE_LATENCY_WARN, defaults.cache_latency_ms.warn),
                settings.get_f64(keys::CACHE_LATENCY_ERROR, defaults.cache_latency_ms.error),
            ),
            site_latency_ms: Threshold::new(
                settings.get_f64(keys::SITE_LATENCY_WARN, defaults.site_latency_ms.warn),
                settings.get_f64(keys::SITE_LATENCY_ERROR, defaults.site_latency_ms.error),
            ),
        }
    }
}

/// Fold a probe list into a snapshot: counts per bucket, overall = worst.
pub fn summarize(checks: Vec<ProbeResult>) -> HealthCheck {
    let ok_count = checks.iter().filter(|c| c.status == ProbeStatus::Ok).count() as i64;
    let warning_count = checks
        .iter()
        .filter(|c| c.status == ProbeStatus::Warning)
        .count() as i64;
    let error_count = checks
        .iter()
        .filter(|c| c.status == ProbeStatus::Error)
        .count() as i64;
    let status = checks
        .iter()
        .map(|c| c.status)
        .max()
        .unwrap_or(ProbeStatus::Ok);

    HealthCheck {
        id: 0,
        run_at: Utc::now(),
        status,
        ok_count,
        warning_count,
        error_count,
        checks,
    }
}

/// Run the full battery, persist one snapshot and return it.
///
/// `flush` is the optional flush-engine collaborator (cache ping + flush
/// delegation probes degrade to WARNING when absent); `site_url` is probed
/// with a plain GET for self-latency.
pub async fn run_doctor(
    db: &Database,
    flush: Option<&dyn FlushEngine>,
    http: &reqwest::Client,
    site_url: Option<&str>,
) -> Result<HealthCheck> {
    let thresholds = DoctorThresholds::load(db);

    let (db_latency, wal_backlog, db_size, cache, site, flush_run) = tokio::join!(
        probe_db_latency(db, thresholds.db_latency_ms),
        probe_wal_backlog(db, thresholds.wal_backlog_frames),
        probe_db_size(db, thresholds.db_size_mib),
        probe_cache(flush, thresholds.cache_latency_ms),
        probe_site(http, site_url, thresholds.site_latency_ms),
        probe_flush(flush),
    );

    let mut snapshot = summarize(vec![db_latency, wal_backlog, db_size, cache, site, flush_run]);
    snapshot.id = db.insert_health_check(&snapshot)?;

    tracing::info!(
        status = snapshot.status.as_str(),
        ok = snapshot.ok_count,
        warning = snapshot.warning_count,
        error = snapshot.error_count,
        "Health check complete"
    );

    Ok(snapshot)
}

fn elapsed_ms(started: Instant) -> f64 {
    started.elapsed().as_secs_f64() * 1000.0
}

async fn probe_db_latency(db: &Database, threshold: Threshold) -> ProbeResult {
    let started = Instant::now();
    match db.ping() {
        Ok(()) => {
            let ms = elapsed_ms(started);
            ProbeResult {
                name: "db-latency".into(),
                value: Some(ms),
                duration_ms: ms as i64,
                status: threshold.grade(ms),
                detail: None,
            }
        }
        Err(e) => ProbeResult {
            name: "db-latency".into(),
            value: None,
            duration_ms: elapsed_ms(started) as i64,
            status: ProbeStatus::Error,
            detail: Some(e.to_string()),
        },
    }
}

async fn probe_wal_backlog(db: &Database, threshold: Threshold) -> ProbeResult {
    let started = Instant::now();
    match db.wal_backlog_frames() {
        Ok(frames) => ProbeResult {
            name: "db-wal-backlog".into(),
            value: Some(frames as f64),
            duration_ms: elapsed_ms(started) as i64,
            status: threshold.grade(frames as f64),
            detail: None,
        },
        Err(e) => ProbeResult {
            name: "db-wal-backlog".into(),
            value: None,
            duration_ms: elapsed_ms(started) as i64,
            status: ProbeStatus::Error,
            detail: Some(e.to_string()),
        },
    }
}

async fn probe_db_size(db: &Database, threshold: Threshold) -> ProbeResult {
    let started = Instant::now();
    match db.database_size_bytes() {
        Ok(bytes) => {
            let mib = bytes as f64 / (1024.0 * 1024.0);
            ProbeResult {
                name: "db-size".into(),
                value: Some(mib),
                duration_ms: elapsed_ms(started) as i64,
                status: threshold.grade(mib),
                detail: None,
            }
        }
        Err(e) => ProbeResult {
            name: "db-size".into(),
            value: None,
            duration_ms: elapsed_ms(started) as i64,
            status: ProbeStatus::Error,
            detail: Some(e.to_string()),
        },
    }
}

async fn probe_cache(flush: Option<&dyn FlushEngine>, threshold: Threshold) -> ProbeResult {
    let Some(engine) = flush else {
        return ProbeResult {
            name: "cache-ping".into(),
            value: None,
            duration_ms: 0,
            status: ProbeStatus::Warning,
            detail: Some("flush engine not configured".into()),
        };
    };

    let started = Instant::now();
    match engine.ping_cache().await {
        Ok(ms) => ProbeResult {
            name: "cache-ping".into(),
            value: Some(ms),
            duration_ms: elapsed_ms(started) as i64,
            status: threshold.grade(ms),
            detail: None,
        },
        Err(e) => ProbeResult {
            name: "cache-ping".into(),
            value: None,
            duration_ms: elapsed_ms(started) as i64,
            status: ProbeStatus::Error,
            detail: Some(e.to_string()),
        },
    }
}

async fn probe_site(
    http: &reqwest::Client,
    site_url: Option<&str>,
    threshold: Threshold,
) -> ProbeResult {
    let Some(url) = site_url else {
        return ProbeResult {
            name: "site-latency".into(),
            value: None,
            duration_ms: 0,
            status: ProbeStatus::Warning,
            detail: Some("site.url not configured".into()),
        };
    };

    let started = Instant::now();
    match http.get(url).send().await {
        Ok(response) if response.status().is_success() => {
            let ms = elapsed_ms(started);
            ProbeResult {
                name: "site-latency".into(),
                value: Some(ms),
                duration_ms: ms as i64,
                status: threshold.grade(ms),
                detail: None,
            }
        }
        Ok(response) => ProbeResult {
            name: "site-latency".into(),
            value: None,
            duration_ms: elapsed_ms(started) as i64,
            status: ProbeStatus::Error,
            detail: Some(format!("site returned {}", response.status())),
        },
        Err(e) => ProbeResult {
            name: "site-latency".into(),
            value: None,
            duration_ms: elapsed_ms(started) as i64,
            status: ProbeStatus::Error,
            detail: Some(e.to_string()),
        },
    }
}

async fn probe_flush(flush: Option<&dyn FlushEngine>) -> ProbeResult {
    let Some(engine) = flush else {
        return ProbeResult {
            name: "flush-engine".into(),
            value: None,
            duration_ms: 0,
            status: ProbeStatus::Warning,
            detail: Some("flush engine not configured".into()),
        };
    };

    let started = Instant::now();
    match engine.flush_events().await {
        Ok(summary) if summary.success => ProbeResult {
            name: "flush-engine".into(),
            value: Some(summary.flushed_count as f64),
            duration_ms: elapsed_ms(started) as i64,
            status: ProbeStatus::Ok,
            detail: Some(summary.summary_line()),
        },
        Ok(_) => ProbeResult {
            name: "flush-engine".into(),
            value: None,
            duration_ms: elapsed_ms(started) as i64,
            status: ProbeStatus::Error,
            detail: Some("flush engine reported failure".into()),
        },
        Err(e) => ProbeResult {
            name: "flush-engine".into(),
            value: None,
            duration_ms: elapsed_ms(started) as i64,
            status: ProbeStatus::Error,
            detail: Some(e.to_string()),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    use crate::error::Error;
    use crate::flush::FlushSummary;

    #[test]
    fn test_grade_tiers() {
        let threshold = Threshold::new(100.0, 300.0);
        assert_eq!(threshold.grade(50.0), ProbeStatus::Ok);
        assert_eq!(threshold.grade(99.9), ProbeStatus::Ok);
        assert_eq!(threshold.grade(100.0), ProbeStatus::Warning);
        assert_eq!(threshold.grade(299.9), ProbeStatus::Warning);
        assert_eq!(threshold.grade(300.0), ProbeStatus::Error);
        assert_eq!(threshold.grade(2_000.0), ProbeStatus::Error);
    }

    fn probe(name: &str, status: ProbeStatus) -> ProbeResult {
        ProbeResult {
            name: name.into(),
            value: None,
            duration_ms: 1,
            status,
            detail: None,
        }
    }

    #[test]
    fn test_summarize_counts_and_worst_status() {
        // db latency 50ms under 100/300 → OK; redis ping failed → ERROR;
        // site latency 2000ms over 500/1500 → ERROR
        let db_status = Threshold::new(100.0, 300.0).grade(50.0);
        let site_status = Threshold::new(500.0, 1_500.0).grade(2_000.0);

        let snapshot = summarize(vec![
            probe("db-latency", db_status),
            probe("cache-ping", ProbeStatus::Error),
            probe("site-latency", site_status),
        ]);

        assert_eq!(snapshot.status, ProbeStatus::Error);
        assert_eq!(snapshot.ok_count, 1);
        assert_eq!(snapshot.warning_count, 0);
        assert_eq!(snapshot.error_count, 2);
    }

    #[test]
    fn test_summarize_empty_is_ok() {
        let snapshot = summarize(Vec::new());
        assert_eq!(snapshot.status, ProbeStatus::Ok);
    }

    struct StubEngine {
        fail_ping: bool,
    }

    #[async_trait]
    impl crate::flush::FlushEngine for StubEngine {
        async fn flush_events(&self) -> crate::error::Result<FlushSummary> {
            Ok(FlushSummary {
                success: true,
                flushed_count: 3,
                ..Default::default()
            })
        }

        async fn ping_cache(&self) -> crate::error::Result<f64> {
            if self.fail_ping {
                Err(Error::Upstream("cache unreachable".into()))
            } else {
                Ok(5.0)
            }
        }
    }

    #[tokio::test]
    async fn test_run_doctor_persists_snapshot() {
        let db = Database::open_in_memory().unwrap();
        db.migrate().unwrap();
        let engine = StubEngine { fail_ping: false };
        let http = reqwest::Client::new();

        let snapshot = run_doctor(&db, Some(&engine), &http, None).await.unwrap();

        assert!(snapshot.id > 0);
        assert_eq!(snapshot.checks.len(), 6);
        // Missing site URL degrades that probe to WARNING, everything else OK
        assert_eq!(snapshot.status, ProbeStatus::Warning);
        assert_eq!(snapshot.warning_count, 1);
        assert_eq!(snapshot.ok_count, 5);

        let stored = db.latest_health_checks(1).unwrap();
        assert_eq!(stored[0].checks.len(), 6);
        assert_eq!(stored[0].status, ProbeStatus::Warning);
    }

    #[tokio::test]
    async fn test_run_doctor_cache_failure_is_error() {
        let db = Database::open_in_memory().unwrap();
        db.migrate().unwrap();
        let engine = StubEngine { fail_ping: true };
        let http = reqwest::Client::new();

        let snapshot = run_doctor(&db, Some(&engine), &http, None).await.unwrap();

        assert_eq!(snapshot.status, ProbeStatus::Error);
        assert_eq!(snapshot.error_count, 1);
        let cache = snapshot
            .checks
            .iter()
            .find(|c| c.name == "cache-ping")
            .unwrap();
        assert_eq!(cache.status, ProbeStatus::Error);
        assert!(cache.detail.as_ref().unwrap().contains("unreachable"));
    }
}
