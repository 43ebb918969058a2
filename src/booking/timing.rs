use chrono::{DateTime, Duration, Utc};

/// When the deferred charge for a lesson becomes due.
pub fn execution_time(start: DateTime<Utc>, window: Duration) -> DateTime<Utc> {
    start - window
}

pub fn should_execute_now(start: DateTime<Utc>, now: DateTime<Utc>, window: Duration) -> bool {
    execution_time(start, window) <= now
}

/// Lesson start bounds scanned by one execution pass: `[now - lookback, now + window]`.
pub fn scan_window(
    now: DateTime<Utc>,
    window: Duration,
    lookback: Duration,
) -> (DateTime<Utc>, DateTime<Utc>) {
    (now - lookback, now + window)
}

#[cfg(test)]
mod test {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn charge_is_due_two_hours_before_start() {
        let now = Utc.with_ymd_and_hms(2025, 1, 1, 10, 0, 0).unwrap();
        let window = Duration::minutes(120);

        assert!(should_execute_now(now + Duration::minutes(120), now, window));
        assert!(should_execute_now(now + Duration::minutes(30), now, window));
        assert!(!should_execute_now(now + Duration::minutes(121), now, window));
        assert_eq!(
            execution_time(now + Duration::hours(5), window),
            now + Duration::hours(3)
        );
    }

    #[test]
    fn scan_window_looks_back_a_little() {
        let now = Utc.with_ymd_and_hms(2025, 1, 1, 10, 0, 0).unwrap();
        let (from, to) = scan_window(now, Duration::minutes(120), Duration::minutes(5));
        assert_eq!(from, now - Duration::minutes(5));
        assert_eq!(to, now + Duration::minutes(120));
    }
}
