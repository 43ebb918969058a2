use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::booking::{BookingError, BookingResult};

/// Half-open `[start, end)` interval in UTC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
}

impl TimeRange {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> BookingResult<Self> {
        if end <= start {
            return Err(BookingError::InvalidTimeRange);
        }
        Ok(Self { start, end })
    }

    pub fn start(&self) -> DateTime<Utc> {
        self.start
    }

    pub fn end(&self) -> DateTime<Utc> {
        self.end
    }

    pub fn minutes(&self) -> i64 {
        (self.end - self.start).num_minutes()
    }

    /// Touching ranges (`a.end == b.start`) do not overlap.
    pub fn overlaps(&self, other: &TimeRange) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn contains(&self, other: &TimeRange) -> bool {
        self.start <= other.start && other.end <= self.end
    }

    /// Picks the booked part of a slot, defaulting to the whole slot.
    pub fn narrow(
        &self,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> BookingResult<TimeRange> {
        let booked = TimeRange::new(start.unwrap_or(self.start), end.unwrap_or(self.end))?;
        if !self.contains(&booked) {
            return Err(BookingError::OutsideSlot);
        }
        Ok(booked)
    }
}

/// Slot price scaled down to the booked minutes, rounded toward zero.
pub fn prorated_amount(slot_price: i64, slot: &TimeRange, booked: &TimeRange) -> i64 {
    let total = slot.minutes();
    if total <= 0 || booked.minutes() >= total {
        return slot_price;
    }
    let scaled = i128::from(slot_price) * i128::from(booked.minutes()) / i128::from(total);
    // booked < total, so the result never exceeds slot_price
    i64::try_from(scaled).unwrap_or(slot_price)
}
