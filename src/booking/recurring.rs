use chrono::{Datelike, NaiveDate, NaiveTime, TimeZone, Utc};

use crate::booking::{BookingError, BookingResult, TimeRange};

pub const MAX_RECURRING_DAYS: i64 = 366;

/// Weekly pattern, interpreted in UTC.
#[derive(Debug, Clone)]
pub struct WeeklyPattern {
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    /// 0 = Sunday .. 6 = Saturday
    pub days_of_week: Vec<u8>,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
}

pub fn parse_time(value: &str) -> BookingResult<NaiveTime> {
    NaiveTime::parse_from_str(value, "%H:%M")
        .map_err(|_| BookingError::InvalidValue(format!("time `{value}`, expected HH:MM")))
}

impl WeeklyPattern {
    fn validate(&self) -> BookingResult<()> {
        if self.end_time <= self.start_time {
            return Err(BookingError::InvalidTimeRange);
        }
        if self.end_date < self.start_date {
            return Err(BookingError::InvalidValue(String::from(
                "end_date is before start_date",
            )));
        }
        if (self.end_date - self.start_date).num_days() > MAX_RECURRING_DAYS {
            return Err(BookingError::InvalidValue(format!(
                "recurring range exceeds {MAX_RECURRING_DAYS} days"
            )));
        }
        if self.days_of_week.is_empty() || self.days_of_week.iter().any(|d| *d > 6) {
            return Err(BookingError::InvalidValue(String::from(
                "days_of_week must hold values 0..=6",
            )));
        }
        Ok(())
    }

    /// Concrete occurrences in chronological order, both dates inclusive.
    pub fn expand(&self) -> BookingResult<Vec<TimeRange>> {
        self.validate()?;

        let mut out = Vec::new();
        for day in self.start_date.iter_days() {
            if day > self.end_date {
                break;
            }
            let weekday = day.weekday().num_days_from_sunday() as u8;
            if !self.days_of_week.contains(&weekday) {
                continue;
            }
            let start = Utc.from_utc_datetime(&day.and_time(self.start_time));
            let end = Utc.from_utc_datetime(&day.and_time(self.end_time));
            out.push(TimeRange::new(start, end)?);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn march(from: u32, to: u32, days: Vec<u8>) -> WeeklyPattern {
        WeeklyPattern {
            start_time: parse_time("18:00").unwrap(),
            end_time: parse_time("19:30").unwrap(),
            days_of_week: days,
            start_date: NaiveDate::from_ymd_opt(2025, 3, from).unwrap(),
            end_date: NaiveDate::from_ymd_opt(2025, 3, to).unwrap(),
        }
    }

    #[test]
    fn expands_selected_weekdays() {
        // 2025-03-03 is a Monday
        let slots = march(3, 16, vec![1, 3]).expand().unwrap();
        assert_eq!(slots.len(), 4);
        assert_eq!(slots[0].start().date_naive(), NaiveDate::from_ymd_opt(2025, 3, 3).unwrap());
        assert_eq!(slots[1].start().date_naive(), NaiveDate::from_ymd_opt(2025, 3, 5).unwrap());
        assert_eq!(slots[0].minutes(), 90);
    }

    #[test]
    fn sunday_is_zero_and_end_date_is_inclusive() {
        // 2025-03-09 is a Sunday
        let slots = march(3, 9, vec![0]).expand().unwrap();
        assert_eq!(slots.len(), 1);
        assert_eq!(slots[0].start().date_naive(), NaiveDate::from_ymd_opt(2025, 3, 9).unwrap());
    }

    #[test]
    fn rejects_bad_patterns() {
        assert!(march(3, 9, vec![7]).expand().is_err());
        assert!(march(3, 9, vec![]).expand().is_err());
        assert!(march(9, 3, vec![1]).expand().is_err());
        assert!(parse_time("25:00").is_err());

        let mut inverted = march(3, 9, vec![1]);
        inverted.end_time = parse_time("17:00").unwrap();
        assert_eq!(inverted.expand().unwrap_err(), BookingError::InvalidTimeRange);
    }

    #[test]
    fn range_is_capped() {
        let mut long = march(1, 1, vec![1]);
        long.end_date = long.start_date + chrono::Duration::days(MAX_RECURRING_DAYS + 1);
        assert!(matches!(long.expand(), Err(BookingError::InvalidValue(_))));

        long.end_date = long.start_date + chrono::Duration::days(MAX_RECURRING_DAYS);
        assert!(long.expand().is_ok());
    }
}
