use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::booking::{BookingError, BookingResult, status::text_enum};

pub const STUDENT_DEADLINE_HOURS: i64 = 24;
pub const MENTOR_DEADLINE_HOURS: i64 = 2;

text_enum! {
    CancelReason, "cancel reason" {
        StudentRequest => "STUDENT_REQUEST",
        MentorRequest => "MENTOR_REQUEST",
        AdminRequest => "ADMIN_REQUEST",
        Emergency => "EMERGENCY",
        SystemError => "SYSTEM_ERROR",
    }
}

impl CancelReason {
    /// Reasons that bypass deadlines and fees.
    pub fn is_exceptional(self) -> bool {
        matches!(self, Self::Emergency | Self::SystemError)
    }
}

/// Who is canceling, relative to the reservation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, utoipa::ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum CancelActor {
    Student,
    Mentor,
    Admin,
}

impl CancelActor {
    /// Admin wins over slot ownership, which wins over being the booking student.
    pub fn resolve(is_admin: bool, is_mentor: bool, is_student: bool) -> Option<Self> {
        if is_admin {
            Some(Self::Admin)
        } else if is_mentor {
            Some(Self::Mentor)
        } else if is_student {
            Some(Self::Student)
        } else {
            None
        }
    }

    pub fn deadline_hours(self) -> i64 {
        match self {
            Self::Student => STUDENT_DEADLINE_HOURS,
            Self::Mentor => MENTOR_DEADLINE_HOURS,
            Self::Admin => 0,
        }
    }

    pub fn allows_reason(self, reason: CancelReason) -> bool {
        match self {
            Self::Student => matches!(reason, CancelReason::StudentRequest | CancelReason::Emergency),
            Self::Mentor => matches!(reason, CancelReason::MentorRequest | CancelReason::Emergency),
            Self::Admin => true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, utoipa::ToSchema)]
pub struct CancellationPreview {
    pub actor: CancelActor,
    pub can_cancel: bool,
    pub cancellation_fee: i64,
    pub deadline_hours: i64,
    /// Negative once the deadline has passed.
    pub minutes_until_deadline: i64,
}

/// Outcome of a permitted cancellation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CancellationDecision {
    pub fee: i64,
}

impl CancellationDecision {
    pub fn refundable(&self, amount: i64) -> i64 {
        (amount - self.fee).max(0)
    }
}

fn within_deadline(actor: CancelActor, start: DateTime<Utc>, now: DateTime<Utc>) -> bool {
    if actor == CancelActor::Admin {
        return true;
    }
    // truncated whole hours
    (start - now).num_hours() >= actor.deadline_hours()
}

pub fn cancellation_fee(
    actor: CancelActor,
    reason: Option<CancelReason>,
    start: DateTime<Utc>,
    now: DateTime<Utc>,
    amount: i64,
) -> i64 {
    if reason.is_some_and(CancelReason::is_exceptional) {
        return 0;
    }
    if actor == CancelActor::Admin || reason == Some(CancelReason::MentorRequest) {
        return 0;
    }
    if actor == CancelActor::Student && !within_deadline(actor, start, now) {
        return amount;
    }
    0
}

/// Validates a cancellation request and prices it.
pub fn evaluate(
    actor: CancelActor,
    reason: CancelReason,
    start: DateTime<Utc>,
    now: DateTime<Utc>,
    amount: i64,
) -> BookingResult<CancellationDecision> {
    if !actor.allows_reason(reason) {
        return Err(BookingError::ReasonNotAllowed(reason.to_string()));
    }

    if !reason.is_exceptional() && !within_deadline(actor, start, now) {
        return Err(BookingError::DeadlinePassed {
            hours_until_start: (start - now).num_hours(),
        });
    }

    Ok(CancellationDecision {
        fee: cancellation_fee(actor, Some(reason), start, now, amount),
    })
}

pub fn preview(
    actor: CancelActor,
    start: DateTime<Utc>,
    now: DateTime<Utc>,
    amount: i64,
) -> CancellationPreview {
    if actor == CancelActor::Admin {
        return CancellationPreview {
            actor,
            can_cancel: true,
            cancellation_fee: 0,
            deadline_hours: 0,
            minutes_until_deadline: 0,
        };
    }

    let minutes_until_deadline = (start - now).num_minutes() - actor.deadline_hours() * 60;
    CancellationPreview {
        actor,
        can_cancel: within_deadline(actor, start, now),
        cancellation_fee: cancellation_fee(actor, None, start, now, amount),
        deadline_hours: actor.deadline_hours(),
        minutes_until_deadline,
    }
}
