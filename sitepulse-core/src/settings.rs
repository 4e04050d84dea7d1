//! Application-level settings store
//!
//! Feature flags, recipient lists and thresholds live in the `settings`
//! key/value table so the admin surface can change them without a deploy.
//! Every accessor is defensive: a missing or malformed value falls back to
//! the caller's default instead of failing the run.

use crate::db::Database;

/// Typed read access over the `settings` table.
pub struct Settings<'a> {
    db: &'a Database,
}

impl<'a> Settings<'a> {
    pub fn new(db: &'a Database) -> Self {
        Self { db }
    }

    /// Raw value, if present
    pub fn raw(&self, key: &str) -> Option<String> {
        match self.db.get_setting(key) {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!(key, error = %e, "Failed to read setting");
                None
            }
        }
    }

    pub fn get_string(&self, key: &str, default: &str) -> String {
        self.raw(key).unwrap_or_else(|| default.to_string())
    }

    pub fn get_opt_string(&self, key: &str) -> Option<String> {
        self.raw(key).filter(|s| !s.trim().is_empty())
    }

    pub fn get_bool(&self, key: &str, default: bool) -> bool {
        match self.raw(key) {
            Some(value) => parse_bool(&value).unwrap_or(default),
            None => default,
        }
    }

    pub fn get_i64(&self, key: &str, default: i64) -> i64 {
        self.raw(key)
            .and_then(|v| v.trim().parse::<i64>().ok())
            .unwrap_or(default)
    }

    pub fn get_f64(&self, key: &str, default: f64) -> f64 {
        self.raw(key)
            .and_then(|v| v.trim().parse::<f64>().ok())
            .unwrap_or(default)
    }

    /// Numeric uid list, accepted either as a JSON array (`[1, 2]`) or a
    /// comma-separated string (`"1, 2"`). Malformed entries are dropped.
    pub fn get_uid_list(&self, key: &str) -> Vec<i64> {
        match self.raw(key) {
            Some(value) => parse_uid_list(&value),
            None => Vec::new(),
        }
    }
}

/// Parse the usual boolean spellings; None when unrecognized.
pub fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Parse a uid list from JSON-array or comma-separated form.
pub fn parse_uid_list(value: &str) -> Vec<i64> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Vec::new();
    }

    if trimmed.starts_with('[') {
        if let Ok(serde_json::Value::Array(items)) = serde_json::from_str(trimmed) {
            return items
                .iter()
                .filter_map(|v| {
                    v.as_i64()
                        .or_else(|| v.as_str().and_then(|s| s.trim().parse().ok()))
                })
                .collect();
        }
        return Vec::new();
    }

    trimmed
        .split(',')
        .filter_map(|part| part.trim().parse::<i64>().ok())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_db() -> Database {
        let db = Database::open_in_memory().unwrap();
        db.migrate().unwrap();
        db
    }

    #[test]
    fn test_parse_bool_spellings() {
        assert_eq!(parse_bool("true"), Some(true));
        assert_eq!(parse_bool(" ON "), Some(true));
        assert_eq!(parse_bool("0"), Some(false));
        assert_eq!(parse_bool("nope"), None);
    }

    #[test]
    fn test_parse_uid_list_forms() {
        assert_eq!(parse_uid_list("[1, 2, 3]"), vec![1, 2, 3]);
        assert_eq!(parse_uid_list("[\"4\", 5]"), vec![4, 5]);
        assert_eq!(parse_uid_list("1,2, 3"), vec![1, 2, 3]);
        assert_eq!(parse_uid_list("1, x, 3"), vec![1, 3]);
        assert_eq!(parse_uid_list(""), Vec::<i64>::new());
        assert_eq!(parse_uid_list("[not json"), Vec::<i64>::new());
    }

    #[test]
    fn test_defaults_when_missing_or_malformed() {
        let db = test_db();
        let settings = Settings::new(&db);

        assert_eq!(settings.get_string("site.name", "My Site"), "My Site");
        assert!(!settings.get_bool("report.daily", false));
        assert_eq!(settings.get_i64("links.batch_size", 100), 100);

        db.set_setting("links.batch_size", "not-a-number").unwrap();
        assert_eq!(settings.get_i64("links.batch_size", 100), 100);

        db.set_setting("report.daily", "yes").unwrap();
        assert!(settings.get_bool("report.daily", false));
    }

    #[test]
    fn test_opt_string_blank_is_none() {
        let db = test_db();
        let settings = Settings::new(&db);
        db.set_setting("site.url", "   ").unwrap();
        assert!(settings.get_opt_string("site.url").is_none());
        db.set_setting("site.url", "https://blog.example").unwrap();
        assert_eq!(
            settings.get_opt_string("site.url").as_deref(),
            Some("https://blog.example")
        );
    }
}
