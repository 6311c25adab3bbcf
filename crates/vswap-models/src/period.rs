//! Calendar month windows for monthly quotas.

use chrono::{DateTime, Datelike, Local, NaiveDate, NaiveTime, TimeZone, Utc};

/// Half-open interval `[start, end)` covering one calendar month.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonthWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    /// Calendar month in the zone the window was built in.
    year: i32,
    month: u32,
}

impl MonthWindow {
    /// Month containing `now`, with boundaries at local midnight in `now`'s zone.
    pub fn containing<Tz: TimeZone>(now: &DateTime<Tz>) -> Self {
        let tz = now.timezone();
        let (year, month) = (now.year(), now.month());
        let (next_year, next_month) = if month == 12 {
            (year + 1, 1)
        } else {
            (year, month + 1)
        };

        Self {
            start: first_of_month(&tz, year, month),
            end: first_of_month(&tz, next_year, next_month),
            year,
            month,
        }
    }

    /// Current month in the server's local time zone.
    pub fn current() -> Self {
        Self::containing(&Local::now())
    }

    pub fn contains(&self, t: &DateTime<Utc>) -> bool {
        *t >= self.start && *t < self.end
    }

    /// "YYYY-MM" key of the local calendar month.
    pub fn key(&self) -> String {
        format!("{:04}-{:02}", self.year, self.month)
    }
}

fn first_of_month<Tz: TimeZone>(tz: &Tz, year: i32, month: u32) -> DateTime<Utc> {
    let naive = NaiveDate::from_ymd_opt(year, month, 1)
        .unwrap_or_default()
        .and_time(NaiveTime::MIN);

    // A DST gap at midnight has no local representation; fall back to UTC midnight.
    tz.from_local_datetime(&naive)
        .earliest()
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|| naive.and_utc())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::FixedOffset;

    #[test]
    fn test_window_in_utc() {
        let now = Utc.with_ymd_and_hms(2025, 3, 15, 12, 0, 0).unwrap();
        let w = MonthWindow::containing(&now);
        assert_eq!(w.start, Utc.with_ymd_and_hms(2025, 3, 1, 0, 0, 0).unwrap());
        assert_eq!(w.end, Utc.with_ymd_and_hms(2025, 4, 1, 0, 0, 0).unwrap());
        assert_eq!(w.key(), "2025-03");
    }

    #[test]
    fn test_december_rolls_into_next_year() {
        let now = Utc.with_ymd_and_hms(2025, 12, 31, 23, 59, 59).unwrap();
        let w = MonthWindow::containing(&now);
        assert_eq!(w.end, Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap());
    }

    #[test]
    fn test_window_is_half_open() {
        let now = Utc.with_ymd_and_hms(2025, 3, 15, 12, 0, 0).unwrap();
        let w = MonthWindow::containing(&now);
        assert!(w.contains(&w.start));
        assert!(!w.contains(&w.end));
        assert!(!w.contains(&(w.start - chrono::Duration::seconds(1))));
    }

    #[test]
    fn test_window_respects_local_offset() {
        // UTC-3: local midnight of March 1st is 03:00 UTC
        let tz = FixedOffset::west_opt(3 * 3600).unwrap();
        let now = tz.with_ymd_and_hms(2025, 3, 10, 8, 0, 0).unwrap();
        let w = MonthWindow::containing(&now);
        assert_eq!(w.start, Utc.with_ymd_and_hms(2025, 3, 1, 3, 0, 0).unwrap());
        assert_eq!(w.end, Utc.with_ymd_and_hms(2025, 4, 1, 3, 0, 0).unwrap());

        // 01:00 UTC on March 1st is still February locally
        let late_feb = Utc.with_ymd_and_hms(2025, 3, 1, 1, 0, 0).unwrap();
        assert!(!w.contains(&late_feb));
    }

    #[test]
    fn test_key_names_the_local_month() {
        // Local midnight of May 1st in UTC+2 is still April 30th in UTC
        let tz = FixedOffset::east_opt(2 * 3600).unwrap();
        let now = tz.with_ymd_and_hms(2026, 5, 15, 12, 0, 0).unwrap();
        let w = MonthWindow::containing(&now);
        assert_eq!(w.start, Utc.with_ymd_and_hms(2026, 4, 30, 22, 0, 0).unwrap());
        assert_eq!(w.key(), "2026-05");
    }
}
