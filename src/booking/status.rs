//! Textual state enums stored as `TEXT` columns.

use crate::booking::{BookingError, BookingResult};

/// Declares a unit enum with a fixed wire/database spelling per variant.
macro_rules! text_enum {
    (
        $(#[$meta:meta])*
        $name:ident, $kind:literal {
            $($variant:ident => $text:literal),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, Hash,
            serde::Serialize, serde::Deserialize, utoipa::ToSchema,
        )]
        pub enum $name {
            $(
                #[serde(rename = $text)]
                $variant,
            )+
        }

        impl $name {
            pub const ALL: &'static [Self] = &[$(Self::$variant),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $text,)+
                }
            }

            /// Reads a stored column, logging and falling back on an unknown spelling.
            pub fn from_column(value: &str, fallback: Self) -> Self {
                value.parse().unwrap_or_else(|e| {
                    tracing::warn!(error = %e, %fallback, "unknown value in database column");
                    fallback
                })
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl std::str::FromStr for $name {
            type Err = $crate::booking::BookingError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok(Self::$variant),)+
                    other => Err($crate::booking::BookingError::UnknownValue {
                        kind: $kind,
                        value: other.to_string(),
                    }),
                }
            }
        }
    };
}

pub(crate) use text_enum;

text_enum! {
    ReservationStatus, "reservation status" {
        PendingApproval => "PENDING_APPROVAL",
        Approved => "APPROVED",
        Rejected => "REJECTED",
        Confirmed => "CONFIRMED",
        Completed => "COMPLETED",
        Canceled => "CANCELED",
    }
}

impl ReservationStatus {
    pub fn can_transition_to(self, next: Self) -> bool {
        use ReservationStatus::*;

        matches!(
            (self, next),
            (PendingApproval, Approved | Rejected | Canceled)
                | (Approved, Confirmed | Canceled)
                | (Confirmed, Completed | Canceled)
        )
    }

    pub fn transition(self, next: Self) -> BookingResult<Self> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(BookingError::InvalidTransition {
                from: self,
                to: next,
            })
        }
    }

    /// Holds slot capacity and blocks overlapping bookings of the same student.
    pub fn is_active(self) -> bool {
        matches!(self, Self::PendingApproval | Self::Approved | Self::Confirmed)
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Rejected | Self::Completed | Self::Canceled)
    }

    /// Database spelling of the active states, for `status = ANY($n)`.
    pub const ACTIVE: &'static [&'static str] = &["PENDING_APPROVAL", "APPROVED", "CONFIRMED"];
}

text_enum! {
    SlotStatus, "slot status" {
        Available => "available",
        Booked => "booked",
        Cancelled => "cancelled",
    }
}

text_enum! {
    PaymentStatus, "payment status" {
        Pending => "PENDING",
        SetupCompleted => "SETUP_COMPLETED",
        Processing => "PROCESSING",
        Succeeded => "SUCCEEDED",
        Failed => "FAILED",
        Canceled => "CANCELED",
        Refunded => "REFUNDED",
    }
}

impl PaymentStatus {
    /// Money has not moved yet, so the payment can simply be voided.
    pub fn is_uncharged(self) -> bool {
        matches!(self, Self::Pending | Self::SetupCompleted | Self::Failed)
    }
}

text_enum! {
    SubscriptionTier, "subscription tier" {
        Freemium => "freemium",
        Starter => "starter",
        Basic => "basic",
        Premium => "premium",
    }
}

impl SubscriptionTier {
    pub fn is_paid(self) -> bool {
        self != Self::Freemium
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn reservation_transitions_follow_workflow() {
        use ReservationStatus::*;

        let allowed = [
            (PendingApproval, Approved),
            (PendingApproval, Rejected),
            (PendingApproval, Canceled),
            (Approved, Confirmed),
            (Approved, Canceled),
            (Confirmed, Completed),
            (Confirmed, Canceled),
        ];

        for from in ReservationStatus::ALL {
            for to in ReservationStatus::ALL {
                let expected = allowed.contains(&(*from, *to));
                assert_eq!(from.can_transition_to(*to), expected, "{from} -> {to}");
            }
        }
    }

    #[test]
    fn terminal_states_reject_everything() {
        let err = ReservationStatus::Completed
            .transition(ReservationStatus::Canceled)
            .unwrap_err();
        assert_eq!(
            err,
            BookingError::InvalidTransition {
                from: ReservationStatus::Completed,
                to: ReservationStatus::Canceled,
            }
        );
        assert!(ReservationStatus::Rejected.is_terminal());

        for status in ReservationStatus::ALL {
            assert_eq!(status.is_active(), ReservationStatus::ACTIVE.contains(&status.as_str()));
        }
        assert!(!ReservationStatus::Approved.is_terminal());
    }

    #[test]
    fn parses_database_spelling() {
        assert_eq!(
            "PENDING_APPROVAL".parse::<ReservationStatus>().unwrap(),
            ReservationStatus::PendingApproval
        );
        assert_eq!("booked".parse::<SlotStatus>().unwrap(), SlotStatus::Booked);
        assert_eq!(PaymentStatus::SetupCompleted.to_string(), "SETUP_COMPLETED");
        assert!(matches!(
            "gold".parse::<SubscriptionTier>(),
            Err(BookingError::UnknownValue { kind: "subscription tier", .. })
        ));
    }

    #[test]
    fn corrupt_columns_fall_back() {
        assert_eq!(
            PaymentStatus::from_column("SUCCEEDED", PaymentStatus::Failed),
            PaymentStatus::Succeeded
        );
        assert_eq!(
            PaymentStatus::from_column("succeeded?", PaymentStatus::Failed),
            PaymentStatus::Failed
        );
        assert_eq!(SlotStatus::from_column("", SlotStatus::Cancelled), SlotStatus::Cancelled);
    }

    #[test]
    fn serde_uses_the_same_spelling() {
        let json = serde_json::to_string(&ReservationStatus::Confirmed).unwrap();
        assert_eq!(json, "\"CONFIRMED\"");
        let tier: SubscriptionTier = serde_json::from_str("\"premium\"").unwrap();
        assert_eq!(tier, SubscriptionTier::Premium);
    }
}
