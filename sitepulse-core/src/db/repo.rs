//! Database repository layer
//!
//! Provides query and insert operations for all entity types.

use crate::error::{Error, Result};
use crate::types::*;
use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use std::path::PathBuf;
use std::sync::Mutex;

/// Database handle with a single pooled connection
pub struct Database {
    conn: Mutex<Connection>,
}

fn parse_ts(value: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

fn parse_opt_ts(value: Option<String>) -> Option<DateTime<Utc>> {
    value
        .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
        .map(|dt| dt.with_timezone(&Utc))
}

fn date_key(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

impl Database {
    /// Open or create a database at the given path
    pub fn open(path: &PathBuf) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;

        // Enable foreign keys and WAL mode for better concurrency
        conn.execute_batch(
            "
            PRAGMA foreign_keys = ON;
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            ",
        )?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute("PRAGMA foreign_keys = ON", [])?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Run migrations on this database
    pub fn migrate(&self) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        super::schema::run_migrations(&conn)
    }

    /// Get the underlying connection (for advanced use)
    pub fn connection(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn.lock().unwrap()
    }

    // ============================================
    // Page views (hot store)
    // ============================================

    /// Append a raw page view row
    pub fn insert_page_view(&self, view: &PageView) -> Result<i64> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO page_views (ts, path, referer, visitor_id) VALUES (?1, ?2, ?3, ?4)",
            params![
                view.ts.to_rfc3339(),
                view.path,
                view.referer,
                view.visitor_id,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Total views with `start <= ts < end`
    pub fn count_views_between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<i64> {
        let conn = self.conn.lock().unwrap();
        let count = conn.query_row(
            "SELECT COUNT(*) FROM page_views WHERE ts >= ?1 AND ts < ?2",
            params![start.to_rfc3339(), end.to_rfc3339()],
            |r| r.get(0),
        )?;
        Ok(count)
    }

    /// Distinct visitors with `start <= ts < end`
    pub fn count_unique_visitors_between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<i64> {
        let conn = self.conn.lock().unwrap();
        let count = conn.query_row(
            "SELECT COUNT(DISTINCT visitor_id) FROM page_views WHERE ts >= ?1 AND ts < ?2",
            params![start.to_rfc3339(), end.to_rfc3339()],
            |r| r.get(0),
        )?;
        Ok(count)
    }

    /// Per-path view counts for the window, unordered
    pub fn path_counts_between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<(String, i64)>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT path, COUNT(*) FROM page_views WHERE ts >= ?1 AND ts < ?2 GROUP BY path",
        )?;
        let rows = stmt
            .query_map(params![start.to_rfc3339(), end.to_rfc3339()], |r| {
                Ok((r.get::<_, String>(0)?, r.get::<_, i64>(1)?))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Per-raw-referer view counts for the window; NULL referers come back
    /// as the empty string so normalization can fold them into one bucket.
    pub fn referer_counts_between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<(String, i64)>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT COALESCE(referer, ''), COUNT(*)
             FROM page_views WHERE ts >= ?1 AND ts < ?2
             GROUP BY COALESCE(referer, '')",
        )?;
        let rows = stmt
            .query_map(params![start.to_rfc3339(), end.to_rfc3339()], |r| {
                Ok((r.get::<_, String>(0)?, r.get::<_, i64>(1)?))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    // ============================================
    // Per-day archive (cold store)
    // ============================================

    /// Insert an archive day (used by tests and seed tooling; the flush
    /// engine is the production writer).
    pub fn insert_archive(&self, archive: &PageViewArchive) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            r#"
            INSERT INTO page_view_archive
                (date, total_views, unique_visitors, path_stats, referer_stats, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ON CONFLICT(date) DO UPDATE SET
                total_views = excluded.total_views,
                unique_visitors = excluded.unique_visitors,
                path_stats = excluded.path_stats,
                referer_stats = excluded.referer_stats
            "#,
            params![
                date_key(archive.date),
                archive.total_views,
                archive.unique_visitors,
                serde_json::to_string(&archive.path_stats)?,
                serde_json::to_string(&archive.referer_stats)?,
                archive.created_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// Archive rows whose calendar date falls in `[start, end)`
    pub fn archives_between(&self, start: NaiveDate, end: NaiveDate) -> Result<Vec<PageViewArchive>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT date, total_views, unique_visitors, path_stats, referer_stats, created_at
             FROM page_view_archive WHERE date >= ?1 AND date < ?2 ORDER BY date",
        )?;
        let rows = stmt
            .query_map(params![date_key(start), date_key(end)], Self::row_to_archive)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    fn row_to_archive(row: &Row) -> rusqlite::Result<PageViewArchive> {
        let date_str: String = row.get("date")?;
        let path_stats_str: String = row.get("path_stats")?;
        let referer_stats_str: String = row.get("referer_stats")?;
        let created_at_str: String = row.get("created_at")?;

        let path_stats = serde_json::from_str(&path_stats_str)
            .map(|v| decode_count_map(&v))
            .unwrap_or_default();
        let referer_stats = serde_json::from_str(&referer_stats_str)
            .map(|v| decode_count_map(&v))
            .unwrap_or_default();

        Ok(PageViewArchive {
            date: NaiveDate::parse_from_str(&date_str, "%Y-%m-%d")
                .unwrap_or_else(|_| Utc::now().date_naive()),
            total_views: row.get("total_views")?,
            unique_visitors: row.get("unique_visitors")?,
            path_stats,
            referer_stats,
            created_at: parse_ts(&created_at_str),
        })
    }

    // ============================================
    // Users
    // ============================================

    /// Insert or update a user (read-side directory; used by seed and tests)
    pub fn upsert_user(&self, recipient: &Recipient, role: UserRole) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            r#"
            INSERT INTO users (uid, username, nickname, email, email_verified, role)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ON CONFLICT(uid) DO UPDATE SET
                username = excluded.username,
                nickname = excluded.nickname,
                email = excluded.email,
                email_verified = excluded.email_verified,
                role = excluded.role
            "#,
            params![
                recipient.uid,
                recipient.username,
                recipient.nickname,
                recipient.email,
                recipient.email_verified as i64,
                role.as_str(),
            ],
        )?;
        Ok(())
    }

    /// Look up users by explicit uid list; unknown uids are skipped.
    pub fn users_by_uids(&self, uids: &[i64]) -> Result<Vec<Recipient>> {
        if uids.is_empty() {
            return Ok(Vec::new());
        }
        let conn = self.conn.lock().unwrap();
        let placeholders = vec!["?"; uids.len()].join(", ");
        let sql = format!(
            "SELECT uid, username, nickname, email, email_verified FROM users
             WHERE uid IN ({}) ORDER BY uid",
            placeholders
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params_from_iter(uids.iter()), Self::row_to_recipient)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// All users holding any of the given roles.
    pub fn users_by_roles(&self, roles: &[UserRole]) -> Result<Vec<Recipient>> {
        if roles.is_empty() {
            return Ok(Vec::new());
        }
        let conn = self.conn.lock().unwrap();
        let placeholders = vec!["?"; roles.len()].join(", ");
        let sql = format!(
            "SELECT uid, username, nickname, email, email_verified FROM users
             WHERE role IN ({}) ORDER BY uid",
            placeholders
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(
                params_from_iter(roles.iter().map(|r| r.as_str())),
                Self::row_to_recipient,
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    fn row_to_recipient(row: &Row) -> rusqlite::Result<Recipient> {
        Ok(Recipient {
            uid: row.get("uid")?,
            username: row.get("username")?,
            nickname: row.get("nickname")?,
            email: row.get("email")?,
            email_verified: row.get::<_, i64>("email_verified")? != 0,
        })
    }

    // ============================================
    // Notices
    // ============================================

    /// Append an in-app notice for one user
    pub fn insert_notice(
        &self,
        uid: i64,
        title: &str,
        body: &str,
        link: Option<&str>,
    ) -> Result<i64> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO notices (uid, title, body, link, created_at, read)
             VALUES (?1, ?2, ?3, ?4, ?5, 0)",
            params![uid, title, body, link, Utc::now().to_rfc3339()],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Most recent notices for a user, newest first
    pub fn notices_for_user(&self, uid: i64, limit: usize) -> Result<Vec<Notice>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, uid, title, body, link, created_at, read
             FROM notices WHERE uid = ?1 ORDER BY id DESC LIMIT ?2",
        )?;
        let rows = stmt
            .query_map(params![uid, limit as i64], |row| {
                let created_at_str: String = row.get("created_at")?;
                Ok(Notice {
                    id: row.get("id")?,
                    uid: row.get("uid")?,
                    title: row.get("title")?,
                    body: row.get("body")?,
                    link: row.get("link")?,
                    created_at: parse_ts(&created_at_str),
                    read: row.get::<_, i64>("read")? != 0,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    // ============================================
    // Health checks
    // ============================================

    /// Persist one doctor snapshot; returns the new row id.
    pub fn insert_health_check(&self, check: &HealthCheck) -> Result<i64> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO health_checks (run_at, status, ok_count, warning_count, error_count, checks)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                check.run_at.to_rfc3339(),
                check.status.as_str(),
                check.ok_count,
                check.warning_count,
                check.error_count,
                serde_json::to_string(&check.checks)?,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Most recent snapshots, newest first
    pub fn latest_health_checks(&self, limit: usize) -> Result<Vec<HealthCheck>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, run_at, status, ok_count, warning_count, error_count, checks
             FROM health_checks ORDER BY id DESC LIMIT ?1",
        )?;
        let rows = stmt
            .query_map(params![limit as i64], |row| {
                let run_at_str: String = row.get("run_at")?;
                let status_str: String = row.get("status")?;
                let checks_str: String = row.get("checks")?;
                Ok(HealthCheck {
                    id: row.get("id")?,
                    run_at: parse_ts(&run_at_str),
                    status: ProbeStatus::from_storage(&status_str),
                    ok_count: row.get("ok_count")?,
                    warning_count: row.get("warning_count")?,
                    error_count: row.get("error_count")?,
                    checks: serde_json::from_str(&checks_str).unwrap_or_default(),
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    // ============================================
    // Projects
    // ============================================

    /// Insert or update a project definition
    pub fn upsert_project(&self, project: &Project) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            r#"
            INSERT INTO projects
                (id, name, repo, sync_enabled, content_sync_enabled, stars, forks,
                 license, languages, readme, synced_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
            ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                repo = excluded.repo,
                sync_enabled = excluded.sync_enabled,
                content_sync_enabled = excluded.content_sync_enabled
            "#,
            params![
                project.id,
                project.name,
                project.repo,
                project.sync_enabled as i64,
                project.content_sync_enabled as i64,
                project.stars,
                project.forks,
                project.license,
                serde_json::to_string(&project.languages)?,
                project.readme,
                project.synced_at.map(|t| t.to_rfc3339()),
            ],
        )?;
        Ok(())
    }

    /// Projects with repository sync enabled
    pub fn projects_with_sync_enabled(&self) -> Result<Vec<Project>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, name, repo, sync_enabled, content_sync_enabled, stars, forks,
                    license, languages, readme, synced_at
             FROM projects WHERE sync_enabled = 1 ORDER BY id",
        )?;
        let rows = stmt
            .query_map([], Self::row_to_project)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Get a project by id
    pub fn get_project(&self, id: &str) -> Result<Option<Project>> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT id, name, repo, sync_enabled, content_sync_enabled, stars, forks,
                    license, languages, readme, synced_at
             FROM projects WHERE id = ?1",
            [id],
            Self::row_to_project,
        )
        .optional()
        .map_err(Error::from)
    }

    /// Write fetched repository metadata onto a project. README is only
    /// overwritten when a new value was fetched.
    pub fn apply_project_sync(
        &self,
        id: &str,
        stars: i64,
        forks: i64,
        license: Option<&str>,
        languages: &std::collections::HashMap<String, i64>,
        readme: Option<&str>,
    ) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE projects SET stars = ?2, forks = ?3, license = ?4, languages = ?5,
                    readme = COALESCE(?6, readme), synced_at = ?7
             WHERE id = ?1",
            params![
                id,
                stars,
                forks,
                license,
                serde_json::to_string(languages)?,
                readme,
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    fn row_to_project(row: &Row) -> rusqlite::Result<Project> {
        let languages_str: String = row.get("languages")?;
        let synced_at: Option<String> = row.get("synced_at")?;
        Ok(Project {
            id: row.get("id")?,
            name: row.get("name")?,
            repo: row.get("repo")?,
            sync_enabled: row.get::<_, i64>("sync_enabled")? != 0,
            content_sync_enabled: row.get::<_, i64>("content_sync_enabled")? != 0,
            stars: row.get("stars")?,
            forks: row.get("forks")?,
            license: row.get("license")?,
            languages: serde_json::from_str(&languages_str)
                .map(|v| decode_count_map(&v))
                .unwrap_or_default(),
            readme: row.get("readme")?,
            synced_at: parse_opt_ts(synced_at),
        })
    }

    // ============================================
    // Friend links
    // ============================================

    /// Insert or update a friend link definition
    pub fn upsert_link(&self, link: &Link) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            r#"
            INSERT INTO links (id, name, url, status, ignore_backlink, check_history, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                url = excluded.url,
                status = excluded.status,
                ignore_backlink = excluded.ignore_backlink
            "#,
            params![
                link.id,
                link.name,
                link.url,
                link.status.as_str(),
                link.ignore_backlink as i64,
                serde_json::to_string(&link.check_history)?,
                link.updated_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// All friend links
    pub fn all_links(&self) -> Result<Vec<Link>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, name, url, status, ignore_backlink, check_history, updated_at
             FROM links ORDER BY id",
        )?;
        let rows = stmt
            .query_map([], Self::row_to_link)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Get one link by id
    pub fn get_link(&self, id: &str) -> Result<Option<Link>> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT id, name, url, status, ignore_backlink, check_history, updated_at
             FROM links WHERE id = ?1",
            [id],
            Self::row_to_link,
        )
        .optional()
        .map_err(Error::from)
    }

    /// Persist a link's new status and rolling history after a check
    pub fn apply_link_check(
        &self,
        id: &str,
        status: LinkStatus,
        history: &[LinkCheckRecord],
    ) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE links SET status = ?2, check_history = ?3, updated_at = ?4 WHERE id = ?1",
            params![
                id,
                status.as_str(),
                serde_json::to_string(history)?,
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    fn row_to_link(row: &Row) -> rusqlite::Result<Link> {
        let status_str: String = row.get("status")?;
        let history_str: String = row.get("check_history")?;
        let updated_at_str: String = row.get("updated_at")?;
        Ok(Link {
            id: row.get("id")?,
            name: row.get("name")?,
            url: row.get("url")?,
            status: LinkStatus::from_storage(&status_str),
            ignore_backlink: row.get::<_, i64>("ignore_backlink")? != 0,
            check_history: serde_json::from_str(&history_str).unwrap_or_default(),
            updated_at: parse_ts(&updated_at_str),
        })
    }

    // ============================================
    // Report audit
    // ============================================

    /// Append one dispatch audit record
    pub fn insert_report_run(
        &self,
        cycles: &serde_json::Value,
        notices_sent: i64,
        emails_sent: i64,
        errors: &[String],
    ) -> Result<i64> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO report_runs (ran_at, cycles, notices_sent, emails_sent, errors)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                Utc::now().to_rfc3339(),
                cycles.to_string(),
                notices_sent,
                emails_sent,
                serde_json::to_string(errors)?,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    // ============================================
    // Settings (application-level key/value store)
    // ============================================

    /// Read one setting value
    pub fn get_setting(&self, key: &str) -> Result<Option<String>> {
        let conn = self.conn.lock().unwrap();
        conn.query_row("SELECT value FROM settings WHERE key = ?1", [key], |r| {
            r.get(0)
        })
        .optional()
        .map_err(Error::from)
    }

    /// Write one setting value
    pub fn set_setting(&self, key: &str, value: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO settings (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key, value],
        )?;
        Ok(())
    }

    // ============================================
    // Storage health probes
    // ============================================

    /// Minimal round-trip query, used by the doctor latency probe
    pub fn ping(&self) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let _: i64 = conn.query_row("SELECT 1", [], |r| r.get(0))?;
        Ok(())
    }

    /// Database size in bytes (page_count * page_size)
    pub fn database_size_bytes(&self) -> Result<i64> {
        let conn = self.conn.lock().unwrap();
        let page_count: i64 = conn.query_row("PRAGMA page_count", [], |r| r.get(0))?;
        let page_size: i64 = conn.query_row("PRAGMA page_size", [], |r| r.get(0))?;
        Ok(page_count * page_size)
    }

    /// Frames sitting in the WAL that have not been checkpointed yet.
    /// Returns 0 when the database is not in WAL mode (in-memory databases).
    pub fn wal_backlog_frames(&self) -> Result<i64> {
        let conn = self.conn.lock().unwrap();
        let row: Option<(i64, i64, i64)> = conn
            .query_row("PRAGMA wal_checkpoint(PASSIVE)", [], |r| {
                Ok((r.get(0)?, r.get(1)?, r.get(2)?))
            })
            .optional()?;
        Ok(row.map(|(_busy, log_frames, _ckpt)| log_frames.max(0)).unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::collections::HashMap;

    fn test_db() -> Database {
        let db = Database::open_in_memory().unwrap();
        db.migrate().unwrap();
        db
    }

    #[test]
    fn test_open_creates_parent_directories() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("nested").join("data.db");
        let db = Database::open(&path).unwrap();
        db.migrate().unwrap();
        assert!(path.exists());
        assert!(db.database_size_bytes().unwrap() > 0);
        assert!(db.wal_backlog_frames().unwrap() >= 0);
        db.ping().unwrap();
    }

    fn view_at(ts: DateTime<Utc>, path: &str, referer: Option<&str>, visitor: &str) -> PageView {
        PageView {
            id: 0,
            ts,
            path: path.to_string(),
            referer: referer.map(|s| s.to_string()),
            visitor_id: visitor.to_string(),
        }
    }

    #[test]
    fn test_page_view_window_queries() {
        let db = test_db();
        let t0 = Utc.with_ymd_and_hms(2026, 3, 10, 12, 0, 0).unwrap();
        let t1 = Utc.with_ymd_and_hms(2026, 3, 11, 12, 0, 0).unwrap();

        db.insert_page_view(&view_at(t0, "/a", Some("https://x.example"), "v1"))
            .unwrap();
        db.insert_page_view(&view_at(t0, "/a", None, "v1")).unwrap();
        db.insert_page_view(&view_at(t1, "/b", None, "v2")).unwrap();

        let start = Utc.with_ymd_and_hms(2026, 3, 10, 0, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2026, 3, 11, 0, 0, 0).unwrap();

        assert_eq!(db.count_views_between(start, end).unwrap(), 2);
        assert_eq!(db.count_unique_visitors_between(start, end).unwrap(), 1);

        let paths = db.path_counts_between(start, end).unwrap();
        assert_eq!(paths, vec![("/a".to_string(), 2)]);

        let referers = db.referer_counts_between(start, end).unwrap();
        assert_eq!(referers.len(), 2); // "" and the real referer
    }

    #[test]
    fn test_archive_round_trip_tolerates_object_counts() {
        let db = test_db();
        let date = NaiveDate::from_ymd_opt(2026, 2, 1).unwrap();

        // Write an archive row whose maps use the `{views: n}` object shape
        db.connection()
            .execute(
                "INSERT INTO page_view_archive
                 (date, total_views, unique_visitors, path_stats, referer_stats, created_at)
                 VALUES ('2026-02-01', 10, 4, '{\"/a\":{\"views\":6},\"/b\":4}', '{}', ?1)",
                params![Utc::now().to_rfc3339()],
            )
            .unwrap();

        let rows = db
            .archives_between(date, date.succ_opt().unwrap())
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].total_views, 10);
        assert_eq!(rows[0].path_stats.get("/a"), Some(&6));
        assert_eq!(rows[0].path_stats.get("/b"), Some(&4));
    }

    #[test]
    fn test_user_lookup_by_uid_and_role() {
        let db = test_db();
        let admin = Recipient {
            uid: 1,
            username: "root".into(),
            nickname: Some("Root".into()),
            email: Some("root@example.com".into()),
            email_verified: true,
        };
        let editor = Recipient {
            uid: 2,
            username: "ed".into(),
            nickname: None,
            email: None,
            email_verified: false,
        };
        db.upsert_user(&admin, UserRole::Admin).unwrap();
        db.upsert_user(&editor, UserRole::Editor).unwrap();

        let by_uid = db.users_by_uids(&[2, 99]).unwrap();
        assert_eq!(by_uid.len(), 1);
        assert_eq!(by_uid[0].username, "ed");

        let by_role = db
            .users_by_roles(&[UserRole::Admin, UserRole::Editor])
            .unwrap();
        assert_eq!(by_role.len(), 2);
    }

    #[test]
    fn test_health_check_round_trip() {
        let db = test_db();
        let check = HealthCheck {
            id: 0,
            run_at: Utc::now(),
            status: ProbeStatus::Warning,
            ok_count: 2,
            warning_count: 1,
            error_count: 0,
            checks: vec![ProbeResult {
                name: "db-latency".into(),
                value: Some(12.5),
                duration_ms: 13,
                status: ProbeStatus::Ok,
                detail: None,
            }],
        };
        let id = db.insert_health_check(&check).unwrap();
        assert!(id > 0);

        let latest = db.latest_health_checks(5).unwrap();
        assert_eq!(latest.len(), 1);
        assert_eq!(latest[0].status, ProbeStatus::Warning);
        assert_eq!(latest[0].checks.len(), 1);
        assert_eq!(latest[0].checks[0].name, "db-latency");
    }

    #[test]
    fn test_link_check_persistence() {
        let db = test_db();
        let link = Link {
            id: "l1".into(),
            name: "friend".into(),
            url: "https://friend.example".into(),
            status: LinkStatus::Published,
            ignore_backlink: false,
            check_history: Vec::new(),
            updated_at: Utc::now(),
        };
        db.upsert_link(&link).unwrap();

        let history = vec![LinkCheckRecord {
            time: Utc::now(),
            response_time: None,
            status_code: None,
            issue_type: IssueType::Disconnect,
            has_backlink: None,
        }];
        db.apply_link_check("l1", LinkStatus::Disconnect, &history)
            .unwrap();

        let reloaded = db.get_link("l1").unwrap().unwrap();
        assert_eq!(reloaded.status, LinkStatus::Disconnect);
        assert_eq!(reloaded.check_history.len(), 1);
        assert_eq!(reloaded.check_history[0].issue_type, IssueType::Disconnect);
    }

    #[test]
    fn test_settings_round_trip() {
        let db = test_db();
        assert!(db.get_setting("report.mode").unwrap().is_none());
        db.set_setting("report.mode", "NOTICE").unwrap();
        db.set_setting("report.mode", "NOTICE_EMAIL").unwrap();
        assert_eq!(
            db.get_setting("report.mode").unwrap().as_deref(),
            Some("NOTICE_EMAIL")
        );
    }

    #[test]
    fn test_project_sync_application() {
        let db = test_db();
        let project = Project {
            id: "p1".into(),
            name: "demo".into(),
            repo: Some("octo/demo".into()),
            sync_enabled: true,
            content_sync_enabled: false,
            stars: 0,
            forks: 0,
            license: None,
            languages: HashMap::new(),
            readme: None,
            synced_at: None,
        };
        db.upsert_project(&project).unwrap();

        let mut languages = HashMap::new();
        languages.insert("Rust".to_string(), 1024_i64);
        db.apply_project_sync("p1", 42, 7, Some("MIT"), &languages, None)
            .unwrap();

        let reloaded = db.get_project("p1").unwrap().unwrap();
        assert_eq!(reloaded.stars, 42);
        assert_eq!(reloaded.forks, 7);
        assert_eq!(reloaded.license.as_deref(), Some("MIT"));
        assert_eq!(reloaded.languages.get("Rust"), Some(&1024));
        assert!(reloaded.synced_at.is_some());
        // README untouched when none was fetched
        assert!(reloaded.readme.is_none());
    }
}
