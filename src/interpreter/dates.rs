//! Calendar arithmetic for relative date phrases. All ranges are inclusive.

use chrono::{Datelike, Duration, NaiveDate};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateRange {
    pub from: NaiveDate,
    pub to: NaiveDate,
}

pub fn today(today: NaiveDate) -> DateRange {
    DateRange {
        from: today,
        to: today,
    }
}

/// The `n` days ending today, today included.
pub fn last_n_days(today: NaiveDate, n: u32) -> DateRange {
    let span = i64::from(n.max(1)) - 1;
    DateRange {
        from: today - Duration::days(span),
        to: today,
    }
}

pub fn this_week(today: NaiveDate) -> DateRange {
    let monday = today - Duration::days(i64::from(today.weekday().num_days_from_monday()));
    DateRange {
        from: monday,
        to: today,
    }
}

/// Monday through Sunday of the previous calendar week.
pub fn last_week(today: NaiveDate) -> DateRange {
    let this_monday = this_week(today).from;
    DateRange {
        from: this_monday - Duration::days(7),
        to: this_monday - Duration::days(1),
    }
}

pub fn this_month(today: NaiveDate) -> Option<DateRange> {
    Some(DateRange {
        from: today.with_day(1)?,
        to: today,
    })
}

/// The whole previous calendar month.
pub fn last_month(today: NaiveDate) -> Option<DateRange> {
    let first_of_this = today.with_day(1)?;
    let last_of_prior = first_of_this.pred_opt()?;
    Some(DateRange {
        from: last_of_prior.with_day(1)?,
        to: last_of_prior,
    })
}

pub fn this_year(today: NaiveDate) -> Option<DateRange> {
    Some(DateRange {
        from: NaiveDate::from_ymd_opt(today.year(), 1, 1)?,
        to: today,
    })
}

pub fn last_year(today: NaiveDate) -> Option<DateRange> {
    let year = today.year() - 1;
    Some(DateRange {
        from: NaiveDate::from_ymd_opt(year, 1, 1)?,
        to: NaiveDate::from_ymd_opt(year, 12, 31)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn test_last_month_crosses_year_boundary() {
        let range = last_month(d("2026-01-15")).unwrap();
        assert_eq!(range.from, d("2025-12-01"));
        assert_eq!(range.to, d("2025-12-31"));

        let range = last_month(d("2024-03-31")).unwrap();
        assert_eq!(range.from, d("2024-02-01"));
        assert_eq!(range.to, d("2024-02-29"));
    }

    #[test]
    fn test_last_n_days_includes_today() {
        let range = last_n_days(d("2026-10-19"), 30);
        assert_eq!(range.from, d("2026-09-20"));
        assert_eq!(range.to, d("2026-10-19"));
    }

    #[test]
    fn test_weeks_start_on_monday() {
        // 2026-10-19 is a Monday.
        assert_eq!(this_week(d("2026-10-21")).from, d("2026-10-19"));
        let prior = last_week(d("2026-10-21"));
        assert_eq!(prior.from, d("2026-10-12"));
        assert_eq!(prior.to, d("2026-10-18"));
    }

    #[test]
    fn test_year_ranges() {
        assert_eq!(this_year(d("2026-10-19")).unwrap().from, d("2026-01-01"));
        let prior = last_year(d("2026-10-19")).unwrap();
        assert_eq!((prior.from, prior.to), (d("2025-01-01"), d("2025-12-31")));
    }
}
