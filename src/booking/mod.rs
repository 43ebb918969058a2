//! Booking rules that do not touch the database: state machines, overlap,
//! cancellation policy, charge timing, recurring expansion, plan limits and mentor matching.

mod error;
pub use error::{BookingError, BookingResult};

mod status;
pub use status::{PaymentStatus, ReservationStatus, SlotStatus, SubscriptionTier};
pub(crate) use status::text_enum;

mod overlap;
pub use overlap::{TimeRange, prorated_amount};

pub mod cancellation;
pub use cancellation::{CancelActor, CancelReason, CancellationPreview};

pub mod timing;

pub mod recurring;
pub use recurring::WeeklyPattern;

mod limits;
pub use limits::{UNLIMITED, UsageLimits};

pub mod matching;
pub use matching::{MatchPreferences, MentorMatch, MentorProfile, SkillLevel, StudentNeeds};
