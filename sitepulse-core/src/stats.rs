//! Range statistics collector
//!
//! Merges the hot row store and the per-day archive into unified totals and
//! top-N breakdowns for an arbitrary calendar range. For any given day the
//! data lives in exactly one of the two stores, so summing both never double
//! counts.

use std::collections::HashMap;

use chrono_tz::Tz;
use url::Url;

use crate::db::Database;
use crate::error::Result;
use crate::timebucket::{range_instants, Range};

/// Breakdown list cap
pub const TOP_N: usize = 5;

/// Bucket for empty/placeholder referers
pub const DIRECT_REFERER: &str = "direct";

/// Unified statistics for one calendar range.
#[derive(Debug, Clone, Default)]
pub struct RangeStats {
    pub total_views: i64,
    /// Hot-range distinct visitors plus per-day archive distinct counts.
    /// Archived days are pre-aggregated, so a visitor returning across days
    /// counts once per day.
    pub unique_visitors: i64,
    /// Top paths by views, descending, at most [`TOP_N`]
    pub top_paths: Vec<(String, i64)>,
    /// Top normalized referers by views, descending, at most [`TOP_N`]
    pub top_referers: Vec<(String, i64)>,
}

/// Collect stats for `range` interpreted in `tz`.
///
/// Hot rows are matched by converting the range's local midnights into UTC
/// instants; archive rows are matched on their naive calendar date. With
/// `include_top_n = false` the per-path/per-referer work is skipped entirely
/// (previous-period comparisons only need totals).
pub fn collect_range_stats(
    db: &Database,
    range: &Range,
    tz: Tz,
    include_top_n: bool,
) -> Result<RangeStats> {
    let (start, end) = range_instants(range, tz);

    let mut stats = RangeStats {
        total_views: db.count_views_between(start, end)?,
        unique_visitors: db.count_unique_visitors_between(start, end)?,
        ..Default::default()
    };

    let archives = db.archives_between(range.start, range.end)?;
    for day in &archives {
        stats.total_views += day.total_views;
        stats.unique_visitors += day.unique_visitors;
    }

    if include_top_n {
        let mut paths: HashMap<String, i64> = HashMap::new();
        for (path, count) in db.path_counts_between(start, end)? {
            *paths.entry(path).or_insert(0) += count;
        }
        for day in &archives {
            for (path, count) in &day.path_stats {
                *paths.entry(path.clone()).or_insert(0) += count;
            }
        }

        let mut referers: HashMap<String, i64> = HashMap::new();
        for (raw, count) in db.referer_counts_between(start, end)? {
            *referers.entry(normalize_referer(&raw)).or_insert(0) += count;
        }
        for day in &archives {
            // Archive keys were normalized at flush time; normalization is
            // idempotent, so running it again is safe and guards old rows.
            for (raw, count) in &day.referer_stats {
                *referers.entry(normalize_referer(raw)).or_insert(0) += count;
            }
        }

        stats.top_paths = top_n(paths);
        stats.top_referers = top_n(referers);
    }

    tracing::debug!(
        range = %range.label(),
        total_views = stats.total_views,
        unique_visitors = stats.unique_visitors,
        archived_days = archives.len(),
        "Collected range stats"
    );

    Ok(stats)
}

/// Reduce a raw referer to `scheme://host`, folding empty and placeholder
/// values into the [`DIRECT_REFERER`] bucket. Idempotent: a normalized value
/// normalizes to itself.
pub fn normalize_referer(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return DIRECT_REFERER.to_string();
    }
    match trimmed.to_ascii_lowercase().as_str() {
        "unknown" | "null" | "direct" => return DIRECT_REFERER.to_string(),
        _ => {}
    }

    match Url::parse(trimmed) {
        Ok(url) => match url.host_str() {
            Some(host) => format!("{}://{}", url.scheme(), host),
            None => DIRECT_REFERER.to_string(),
        },
        Err(_) => DIRECT_REFERER.to_string(),
    }
}

/// Sort a count map descending, ties broken by key, truncated to [`TOP_N`].
fn top_n(map: HashMap<String, i64>) -> Vec<(String, i64)> {
    let mut entries: Vec<(String, i64)> = map.into_iter().filter(|(_, n)| *n > 0).collect();
    entries.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    entries.truncate(TOP_N);
    entries
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{PageView, PageViewArchive};
    use chrono::{NaiveDate, TimeZone, Utc};

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn test_db() -> Database {
        let db = Database::open_in_memory().unwrap();
        db.migrate().unwrap();
        db
    }

    fn seed_view(db: &Database, ts: chrono::DateTime<Utc>, path: &str, referer: Option<&str>, v: &str) {
        db.insert_page_view(&PageView {
            id: 0,
            ts,
            path: path.into(),
            referer: referer.map(String::from),
            visitor_id: v.into(),
        })
        .unwrap();
    }

    fn seed_archive(db: &Database, date: NaiveDate, views: i64, visitors: i64, path: &str) {
        let mut path_stats = HashMap::new();
        path_stats.insert(path.to_string(), views);
        let mut referer_stats = HashMap::new();
        referer_stats.insert("https://news.example".to_string(), views);
        db.insert_archive(&PageViewArchive {
            date,
            total_views: views,
            unique_visitors: visitors,
            path_stats,
            referer_stats,
            created_at: Utc::now(),
        })
        .unwrap();
    }

    #[test]
    fn test_normalize_referer_buckets_and_hosts() {
        assert_eq!(normalize_referer(""), "direct");
        assert_eq!(normalize_referer("  "), "direct");
        assert_eq!(normalize_referer("unknown"), "direct");
        assert_eq!(normalize_referer("NULL"), "direct");
        assert_eq!(normalize_referer("direct"), "direct");
        assert_eq!(
            normalize_referer("https://example.com/campaign?x=1"),
            "https://example.com"
        );
        assert_eq!(
            normalize_referer("https://example.com/other"),
            "https://example.com"
        );
        assert_eq!(normalize_referer("not a url"), "direct");
    }

    #[test]
    fn test_normalize_referer_idempotent() {
        for raw in ["", "unknown", "https://example.com/a?b=c", "direct", "junk"] {
            let once = normalize_referer(raw);
            assert_eq!(normalize_referer(&once), once);
        }
    }

    #[test]
    fn test_hot_and_cold_merge_without_double_counting() {
        let db = test_db();
        let tz = chrono_tz::UTC;

        // Cold: Mar 1 archived; hot: Mar 2 raw rows. Same path on both sides.
        seed_archive(&db, d(2026, 3, 1), 10, 4, "/hello");
        let t = Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap();
        seed_view(&db, t, "/hello", Some("https://news.example/some/post"), "v1");
        seed_view(&db, t, "/world", None, "v2");

        let range = Range::new(d(2026, 3, 1), d(2026, 3, 3));
        let stats = collect_range_stats(&db, &range, tz, true).unwrap();

        assert_eq!(stats.total_views, 12);
        assert_eq!(stats.unique_visitors, 6);
        // Path counts accumulate across sources
        assert_eq!(stats.top_paths[0], ("/hello".to_string(), 11));
        // Referer merged post-normalization across sources: 10 archived + 1 hot
        assert!(stats
            .top_referers
            .contains(&("https://news.example".to_string(), 11)));
        assert!(stats.top_referers.contains(&("direct".to_string(), 1)));
    }

    #[test]
    fn test_additivity_across_split_point() {
        let db = test_db();
        let tz = chrono_tz::UTC;

        seed_archive(&db, d(2026, 3, 1), 5, 2, "/a");
        seed_archive(&db, d(2026, 3, 2), 7, 3, "/b");
        for hour in [1, 5, 9] {
            let t = Utc.with_ymd_and_hms(2026, 3, 3, hour, 0, 0).unwrap();
            seed_view(&db, t, "/c", None, &format!("v{}", hour));
        }

        let whole = Range::new(d(2026, 3, 1), d(2026, 3, 4));
        let left = Range::new(d(2026, 3, 1), d(2026, 3, 2));
        let right = Range::new(d(2026, 3, 2), d(2026, 3, 4));

        let sw = collect_range_stats(&db, &whole, tz, false).unwrap();
        let sl = collect_range_stats(&db, &left, tz, false).unwrap();
        let sr = collect_range_stats(&db, &right, tz, false).unwrap();

        assert_eq!(sw.total_views, sl.total_views + sr.total_views);
        assert_eq!(sw.unique_visitors, sl.unique_visitors + sr.unique_visitors);
    }

    #[test]
    fn test_timezone_shifts_hot_window() {
        let db = test_db();

        // 2026-03-02T02:00Z is still Mar 1 in New York (UTC-5)
        let t = Utc.with_ymd_and_hms(2026, 3, 2, 2, 0, 0).unwrap();
        seed_view(&db, t, "/late-night", None, "v1");

        let mar1 = Range::new(d(2026, 3, 1), d(2026, 3, 2));
        let utc_stats = collect_range_stats(&db, &mar1, chrono_tz::UTC, false).unwrap();
        let ny_stats =
            collect_range_stats(&db, &mar1, chrono_tz::America::New_York, false).unwrap();

        assert_eq!(utc_stats.total_views, 0);
        assert_eq!(ny_stats.total_views, 1);
    }

    #[test]
    fn test_skip_top_n() {
        let db = test_db();
        let t = Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap();
        seed_view(&db, t, "/a", None, "v1");

        let range = Range::new(d(2026, 3, 2), d(2026, 3, 3));
        let stats = collect_range_stats(&db, &range, chrono_tz::UTC, false).unwrap();
        assert_eq!(stats.total_views, 1);
        assert!(stats.top_paths.is_empty());
        assert!(stats.top_referers.is_empty());
    }

    #[test]
    fn test_top_n_caps_at_five() {
        let mut map = HashMap::new();
        for i in 0..8 {
            map.insert(format!("/p{}", i), 10 - i as i64);
        }
        let top = top_n(map);
        assert_eq!(top.len(), TOP_N);
        assert_eq!(top[0].1, 10);
    }
}
