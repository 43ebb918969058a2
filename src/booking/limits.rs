use serde::Serialize;

use crate::booking::SubscriptionTier;

/// `-1` in responses means unlimited.
pub const UNLIMITED: i64 = -1;

impl SubscriptionTier {
    pub fn reservation_limit(self) -> Option<i64> {
        match self {
            Self::Freemium | Self::Starter => Some(1),
            Self::Basic => Some(5),
            Self::Premium => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, utoipa::ToSchema)]
pub struct UsageLimits {
    pub tier: SubscriptionTier,
    pub reservations_limit: i64,
    pub reservations_used: i64,
    pub reservations_remaining: i64,
    pub can_create_reservation: bool,
}

impl UsageLimits {
    pub fn new(tier: SubscriptionTier, used: i64) -> Self {
        match tier.reservation_limit() {
            Some(limit) => {
                let remaining = (limit - used).max(0);
                Self {
                    tier,
                    reservations_limit: limit,
                    reservations_used: used,
                    reservations_remaining: remaining,
                    can_create_reservation: remaining > 0,
                }
            }
            None => Self {
                tier,
                reservations_limit: UNLIMITED,
                reservations_used: used,
                reservations_remaining: UNLIMITED,
                can_create_reservation: true,
            },
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn limits_per_tier() {
        assert_eq!(SubscriptionTier::Freemium.reservation_limit(), Some(1));
        assert_eq!(SubscriptionTier::Starter.reservation_limit(), Some(1));
        assert_eq!(SubscriptionTier::Basic.reservation_limit(), Some(5));
        assert_eq!(SubscriptionTier::Premium.reservation_limit(), None);
    }

    #[test]
    fn usage_is_clamped_and_unlimited_is_minus_one() {
        let free = UsageLimits::new(SubscriptionTier::Freemium, 3);
        assert_eq!(free.reservations_remaining, 0);
        assert!(!free.can_create_reservation);

        let basic = UsageLimits::new(SubscriptionTier::Basic, 2);
        assert_eq!(basic.reservations_remaining, 3);
        assert!(basic.can_create_reservation);

        let premium = UsageLimits::new(SubscriptionTier::Premium, 40);
        assert_eq!(premium.reservations_limit, UNLIMITED);
        assert_eq!(premium.reservations_remaining, UNLIMITED);
        assert!(premium.can_create_reservation);
    }
}
