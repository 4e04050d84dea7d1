//! # sitepulse-core
//!
//! Core library for sitepulse - analytics aggregation and periodic
//! reporting for a content site.
//!
//! This library provides:
//! - Timezone-aware calendar bucketing for reporting cycles
//! - A range-stats collector that merges hot page-view rows with
//!   per-day archive rollups
//! - Period-over-period trend comparison
//! - A multi-channel digest dispatcher (in-app notice + email)
//! - Background jobs: doctor health checks, project repository sync and
//!   friend-link liveness checks
//!
//! ## Data flow
//!
//! ```text
//! raw events ──► flush engine (external) ──► page_views + page_view_archive
//!                                              │
//!                                              ▼
//!                                      stats::collect_range_stats
//!                                              │
//!                                              ▼
//!                              trend ──► report::dispatch_reports
//!                                              │
//!                                    ┌─────────┴─────────┐
//!                                    ▼                   ▼
//!                              notice channel      email channel
//! ```
//!
//! ## Example
//!
//! ```rust,no_run
//! use sitepulse_core::{Config, Database};
//!
//! let config = Config::load().expect("failed to load config");
//! let db = Database::open(&config.resolved_database_path()).expect("failed to open database");
//! db.migrate().expect("failed to run migrations");
//! ```

// Re-export commonly used items at the crate root
pub use config::Config;
pub use db::Database;
pub use error::{Error, Result};
pub use types::*;

// Public modules
pub mod channels;
pub mod config;
pub mod cron;
pub mod db;
pub mod error;
pub mod flush;
pub mod logging;
pub mod report;
pub mod settings;
pub mod stats;
pub mod timebucket;
pub mod trend;
pub mod types;
