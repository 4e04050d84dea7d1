//! Database schema and migrations
//!
//! Uses SQLite with embedded migrations managed via PRAGMA user_version.

use rusqlite::Connection;

/// Current schema version
pub const SCHEMA_VERSION: i32 = 1;

/// SQL migrations, indexed by version number
const MIGRATIONS: &[&str] = &[
    // Version 1: initial schema
    r#"
    -- ============================================
    -- Analytics: hot store + per-day archive
    -- ============================================

    CREATE TABLE IF NOT EXISTS page_views (
        id               INTEGER PRIMARY KEY AUTOINCREMENT,
        ts               TEXT NOT NULL,
        path             TEXT NOT NULL,
        referer          TEXT,
        visitor_id       TEXT NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_page_views_ts ON page_views(ts);
    CREATE INDEX IF NOT EXISTS idx_page_views_path ON page_views(path);

    -- One row per calendar day; written by the flush engine, immutable
    -- afterwards except for expiry deletion.
    CREATE TABLE IF NOT EXISTS page_view_archive (
        date             TEXT PRIMARY KEY,   -- 'YYYY-MM-DD'
        total_views      INTEGER NOT NULL,
        unique_visitors  INTEGER NOT NULL,
        path_stats       JSON NOT NULL,
        referer_stats    JSON NOT NULL,
        created_at       TEXT NOT NULL
    );

    -- ============================================
    -- Health checks
    -- ============================================

    CREATE TABLE IF NOT EXISTS health_checks (
        id               INTEGER PRIMARY KEY AUTOINCREMENT,
        run_at           TEXT NOT NULL,
        status           TEXT NOT NULL,      -- 'OK', 'WARNING', 'ERROR'
        ok_count         INTEGER NOT NULL,
        warning_count    INTEGER NOT NULL,
        error_count      INTEGER NOT NULL,
        checks           JSON NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_health_checks_run_at ON health_checks(run_at DESC);

    -- ============================================
    -- Users and notices
    -- ============================================

    CREATE TABLE IF NOT EXISTS users (
        uid              INTEGER PRIMARY KEY,
        username         TEXT NOT NULL UNIQUE,
        nickname         TEXT,
        email            TEXT,
        email_verified   INTEGER NOT NULL DEFAULT 0,
        role             TEXT NOT NULL DEFAULT 'reader'
    );

    CREATE INDEX IF NOT EXISTS idx_users_role ON users(role);

    CREATE TABLE IF NOT EXISTS notices (
        id               INTEGER PRIMARY KEY AUTOINCREMENT,
        uid              INTEGER NOT NULL REFERENCES users(uid),
        title            TEXT NOT NULL,
        body             TEXT NOT NULL,
        link             TEXT,
        created_at       TEXT NOT NULL,
        read             INTEGER NOT NULL DEFAULT 0
    );

    CREATE INDEX IF NOT EXISTS idx_notices_uid ON notices(uid, read);

    -- ============================================
    -- Projects and friend links
    -- ============================================

    CREATE TABLE IF NOT EXISTS projects (
        id                   TEXT PRIMARY KEY,
        name                 TEXT NOT NULL,
        repo                 TEXT,
        sync_enabled         INTEGER NOT NULL DEFAULT 0,
        content_sync_enabled INTEGER NOT NULL DEFAULT 0,
        stars                INTEGER NOT NULL DEFAULT 0,
        forks                INTEGER NOT NULL DEFAULT 0,
        license              TEXT,
        languages            JSON NOT NULL DEFAULT '{}',
        readme               TEXT,
        synced_at            TEXT
    );

    CREATE TABLE IF NOT EXISTS links (
        id               TEXT PRIMARY KEY,
        name             TEXT NOT NULL,
        url              TEXT NOT NULL,
        status           TEXT NOT NULL DEFAULT 'PUBLISHED',
        ignore_backlink  INTEGER NOT NULL DEFAULT 0,
        check_history    JSON NOT NULL DEFAULT '[]',
        updated_at       TEXT NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_links_status ON links(status);

    -- ============================================
    -- Report audit + settings
    -- ============================================

    CREATE TABLE IF NOT EXISTS report_runs (
        id               INTEGER PRIMARY KEY AUTOINCREMENT,
        ran_at           TEXT NOT NULL,
        cycles           JSON NOT NULL,
        notices_sent     INTEGER NOT NULL,
        emails_sent      INTEGER NOT NULL,
        errors           JSON NOT NULL
    );

    CREATE TABLE IF NOT EXISTS settings (
        key              TEXT PRIMARY KEY,
        value            TEXT NOT NULL
    );
    "#,
];

/// Run all pending migrations
pub fn run_migrations(conn: &Connection) -> crate::error::Result<()> {
    let current_version: i32 = conn
        .query_row("PRAGMA user_version", [], |r| r.get(0))
        .unwrap_or(0);

    tracing::info!(
        current_version,
        target_version = SCHEMA_VERSION,
        "Checking database migrations"
    );

    for (i, migration) in MIGRATIONS.iter().enumerate() {
        let version = (i + 1) as i32;
        if version > current_version {
            tracing::info!(version, "Running migration");
            conn.execute_batch(migration)?;
            conn.execute(&format!("PRAGMA user_version = {}", version), [])?;
        }
    }

    Ok(())
}

/// Get the current schema version from the database
pub fn get_schema_version(conn: &Connection) -> crate::error::Result<i32> {
    let version: i32 = conn.query_row("PRAGMA user_version", [], |r| r.get(0))?;
    Ok(version)
}
