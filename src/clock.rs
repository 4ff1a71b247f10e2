use chrono::{Datelike, Local, NaiveDate};

/// Source of "today" for period classification and date defaults.
pub trait Clock: Send + Sync {
    fn today(&self) -> NaiveDate;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn today(&self) -> NaiveDate {
        Local::now().date_naive()
    }
}

/// Clock pinned to one date.
pub struct FixedClock(pub NaiveDate);

impl Clock for FixedClock {
    fn today(&self) -> NaiveDate {
        self.0
    }
}

/// A period is closed once its (year, month) lies strictly before today's.
/// The current month stays open because costs can still be added to it.
pub fn is_closed(year: i32, month: u32, today: NaiveDate) -> bool {
    (year, month) < (today.year(), today.month())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(year: i32, month: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(year, month, day).unwrap()
    }

    #[test]
    fn earlier_months_are_closed() {
        let today = date(2026, 10, 18);
        assert!(is_closed(2026, 9, today));
        assert!(is_closed(2025, 12, today));
        assert!(is_closed(1900, 1, today));
    }

    #[test]
    fn current_and_future_months_are_open() {
        let today = date(2026, 10, 18);
        assert!(!is_closed(2026, 10, today));
        assert!(!is_closed(2026, 11, today));
        assert!(!is_closed(2027, 1, today));
    }

    #[test]
    fn year_is_compared_before_month() {
        let today = date(2026, 1, 1);
        assert!(is_closed(2025, 12, today));
        assert!(!is_closed(2027, 1, today));
    }

    #[test]
    fn fixed_clock_returns_its_date() {
        let clock = FixedClock(date(2020, 2, 29));
        assert_eq!(clock.today(), date(2020, 2, 29));
    }
}
