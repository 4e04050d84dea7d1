//! Calendar bucketing for reporting cycles
//!
//! All ranges are half-open `[start, end)` over calendar dates, computed in
//! the audience's IANA timezone. Date arithmetic stays on `NaiveDate` and
//! local midnights are resolved through the timezone, so a report window is
//! the same set of local days on both sides of a DST transition.

use chrono::offset::LocalResult;
use chrono::{DateTime, Datelike, Duration, NaiveDate, TimeZone, Utc};
use chrono_tz::Tz;

/// Reporting cadence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Cycle {
    Daily,
    Weekly,
    Monthly,
}

impl Cycle {
    pub fn label(&self) -> &'static str {
        match self {
            Cycle::Daily => "daily",
            Cycle::Weekly => "weekly",
            Cycle::Monthly => "monthly",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Cycle::Daily => "Daily",
            Cycle::Weekly => "Weekly",
            Cycle::Monthly => "Monthly",
        }
    }
}

/// Half-open calendar-date interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Range {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl Range {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        Self { start, end }
    }

    pub fn len_days(&self) -> i64 {
        (self.end - self.start).num_days()
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        date >= self.start && date < self.end
    }

    /// Human-readable label: the single day, or `start – last-day`.
    pub fn label(&self) -> String {
        let last = self.end - Duration::days(1);
        if self.start == last {
            self.start.format("%Y-%m-%d").to_string()
        } else {
            format!(
                "{} – {}",
                self.start.format("%Y-%m-%d"),
                last.format("%Y-%m-%d")
            )
        }
    }
}

/// "Today" in the given timezone, right now.
pub fn current_local_date(tz: Tz) -> NaiveDate {
    local_date_at(Utc::now(), tz)
}

/// The calendar date an instant falls on in the given timezone.
pub fn local_date_at(instant: DateTime<Utc>, tz: Tz) -> NaiveDate {
    instant.with_timezone(&tz).date_naive()
}

/// The reporting window for a cycle, relative to "today".
///
/// - daily: yesterday
/// - weekly: the 7 days ending at the most recent Monday on or before today
///   (ISO weeks; a Sunday counts as 6 days past Monday)
/// - monthly: the previous full calendar month
pub fn cycle_range(cycle: Cycle, today: NaiveDate) -> Range {
    match cycle {
        Cycle::Daily => Range::new(today - Duration::days(1), today),
        Cycle::Weekly => {
            let days_past_monday = today.weekday().num_days_from_monday() as i64;
            let week_start = today - Duration::days(days_past_monday);
            Range::new(week_start - Duration::days(7), week_start)
        }
        Cycle::Monthly => {
            let this_month = first_of_month(today);
            Range::new(previous_month_start(this_month), this_month)
        }
    }
}

/// The immediately preceding period of equal length. Monthly walks back one
/// calendar month (28–31 days); daily/weekly shift by the day count.
pub fn previous_range(cycle: Cycle, current: &Range) -> Range {
    match cycle {
        Cycle::Monthly => Range::new(previous_month_start(current.start), current.start),
        _ => {
            let len = current.len_days();
            Range::new(current.start - Duration::days(len), current.start)
        }
    }
}

/// Resolve a range's local midnight boundaries into UTC instants for hot
/// storage queries. A local midnight skipped or doubled by a DST transition
/// resolves to the earliest valid instant of the day.
pub fn range_instants(range: &Range, tz: Tz) -> (DateTime<Utc>, DateTime<Utc>) {
    (local_midnight(range.start, tz), local_midnight(range.end, tz))
}

fn local_midnight(date: NaiveDate, tz: Tz) -> DateTime<Utc> {
    for hour in 0..24 {
        let naive = match date.and_hms_opt(hour, 0, 0) {
            Some(naive) => naive,
            None => continue,
        };
        match tz.from_local_datetime(&naive) {
            LocalResult::Single(dt) => return dt.with_timezone(&Utc),
            LocalResult::Ambiguous(earliest, _) => return earliest.with_timezone(&Utc),
            LocalResult::None => continue,
        }
    }
    // Unreachable for real zones; fall back to naive UTC midnight
    date.and_hms_opt(0, 0, 0).unwrap().and_utc()
}

fn first_of_month(date: NaiveDate) -> NaiveDate {
    NaiveDate::from_ymd_opt(date.year(), date.month(), 1).unwrap()
}

fn previous_month_start(month_start: NaiveDate) -> NaiveDate {
    if month_start.month() == 1 {
        NaiveDate::from_ymd_opt(month_start.year() - 1, 12, 1).unwrap()
    } else {
        NaiveDate::from_ymd_opt(month_start.year(), month_start.month() - 1, 1).unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Weekday;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn test_daily_range_is_one_day_ending_today() {
        for day in 1..=28 {
            let today = d(2026, 2, day);
            let range = cycle_range(Cycle::Daily, today);
            assert_eq!(range.len_days(), 1);
            assert_eq!(range.end, today);
        }
    }

    #[test]
    fn test_weekly_range_is_monday_aligned() {
        // 2026-08-03 is a Monday
        let monday = d(2026, 8, 3);
        assert_eq!(monday.weekday(), Weekday::Mon);

        let range = cycle_range(Cycle::Weekly, monday);
        assert_eq!(range, Range::new(d(2026, 7, 27), d(2026, 8, 3)));
        assert_eq!(range.len_days(), 7);

        // A Sunday belongs to the week that started 6 days earlier
        let sunday = d(2026, 8, 9);
        assert_eq!(sunday.weekday(), Weekday::Sun);
        let range = cycle_range(Cycle::Weekly, sunday);
        assert_eq!(range, Range::new(d(2026, 7, 27), d(2026, 8, 3)));
    }

    #[test]
    fn test_weekly_previous_is_adjacent() {
        let range = cycle_range(Cycle::Weekly, d(2026, 8, 3));
        let previous = previous_range(Cycle::Weekly, &range);
        assert_eq!(previous.end, range.start);
        assert_eq!(previous.len_days(), 7);
    }

    #[test]
    fn test_monthly_range_and_previous() {
        let range = cycle_range(Cycle::Monthly, d(2026, 3, 1));
        assert_eq!(range, Range::new(d(2026, 2, 1), d(2026, 3, 1)));
        assert_eq!(range.len_days(), 28);

        let previous = previous_range(Cycle::Monthly, &range);
        assert_eq!(previous, Range::new(d(2026, 1, 1), d(2026, 2, 1)));
        assert_eq!(previous.len_days(), 31);

        // Year boundary
        let range = cycle_range(Cycle::Monthly, d(2026, 1, 15));
        assert_eq!(range, Range::new(d(2025, 12, 1), d(2026, 1, 1)));
    }

    #[test]
    fn test_local_date_honors_timezone() {
        // 2026-03-01T03:00Z is Feb 28 in New York (UTC-5), Mar 1 in Tokyo
        let instant = Utc.with_ymd_and_hms(2026, 3, 1, 3, 0, 0).unwrap();
        assert_eq!(
            local_date_at(instant, chrono_tz::America::New_York),
            d(2026, 2, 28)
        );
        assert_eq!(local_date_at(instant, chrono_tz::Asia::Tokyo), d(2026, 3, 1));
    }

    #[test]
    fn test_range_instants_across_dst() {
        // US spring-forward: 2026-03-08, the local day is only 23 hours long.
        let range = Range::new(d(2026, 3, 8), d(2026, 3, 9));
        let (start, end) = range_instants(&range, chrono_tz::America::New_York);
        assert_eq!((end - start).num_hours(), 23);

        // Fall-back day is 25 hours long.
        let range = Range::new(d(2026, 11, 1), d(2026, 11, 2));
        let (start, end) = range_instants(&range, chrono_tz::America::New_York);
        assert_eq!((end - start).num_hours(), 25);
    }

    #[test]
    fn test_range_label() {
        assert_eq!(Range::new(d(2026, 8, 6), d(2026, 8, 7)).label(), "2026-08-06");
        assert_eq!(
            Range::new(d(2026, 7, 27), d(2026, 8, 3)).label(),
            "2026-07-27 – 2026-08-02"
        );
    }
}
