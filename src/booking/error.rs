use thiserror::Error;

use crate::booking::ReservationStatus;

pub type BookingResult<T> = std::result::Result<T, BookingError>;

/// Violations of the booking rules. Mapped onto 4xx responses by the web layer.
#[derive(Debug, Error, PartialEq)]
pub enum BookingError {
    #[error("end time must be after start time")]
    InvalidTimeRange,
    #[error("booked range must lie inside the slot")]
    OutsideSlot,
    #[error("invalid value: {0}")]
    InvalidValue(String),
    #[error("unknown {kind} value `{value}`")]
    UnknownValue { kind: &'static str, value: String },
    #[error("slot overlaps with another slot of the same mentor")]
    SlotConflict,
    #[error("slot is not available for booking")]
    SlotUnavailable,
    #[error("slot still holds active reservations")]
    SlotInUse,
    #[error("student already holds an overlapping reservation")]
    OverlappingReservation,
    #[error("cannot move reservation from {from} to {to}")]
    InvalidTransition {
        from: ReservationStatus,
        to: ReservationStatus,
    },
    #[error("reservation quota of the current plan is exhausted")]
    QuotaExceeded,
    #[error("cancellation reason `{0}` is not allowed for this role")]
    ReasonNotAllowed(String),
    #[error("cancellation deadline passed {hours_until_start}h before the lesson")]
    DeadlinePassed { hours_until_start: i64 },
    #[error("reservation in state {0} takes no payment")]
    NotPayable(ReservationStatus),
    #[error("payment setup already completed")]
    SetupAlreadyCompleted,
    #[error("nothing left to refund")]
    NothingToRefund,
    #[error("the lesson charge is in progress, try again shortly")]
    ChargeInProgress,
}
