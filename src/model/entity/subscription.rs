use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgConnection;
use sqlx::prelude::FromRow;
use uuid::Uuid;

use crate::booking::{SubscriptionTier, UsageLimits};
use crate::model::repo::ResourceTyped;
use crate::model::{ModelManager, error::DatabaseResult};

#[derive(Debug, Clone, Serialize, Deserialize, FromRow, utoipa::ToSchema)]
pub struct Subscription {
    id: Uuid,
    user_id: Uuid,
    tier: String,
    status: String,
    stripe_customer_id: Option<String>,
    stripe_subscription_id: Option<String>,
    current_period_start: Option<DateTime<Utc>>,
    current_period_end: Option<DateTime<Utc>>,
    cancel_at_period_end: bool,
    reservations_used: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl ResourceTyped for Subscription {
    fn get_resource_type() -> crate::model::ResourceType {
        crate::model::ResourceType::Subscription
    }
}

/// Subscription state as reported by Stripe.
#[derive(Debug, Clone)]
pub struct SubscriptionSync {
    pub stripe_subscription_id: String,
    pub tier: Option<SubscriptionTier>,
    pub status: String,
    pub current_period_start: Option<DateTime<Utc>>,
    pub current_period_end: Option<DateTime<Utc>>,
    pub cancel_at_period_end: bool,
}

impl Subscription {
    pub fn user_id(&self) -> Uuid {
        self.user_id
    }

    pub fn tier(&self) -> SubscriptionTier {
        SubscriptionTier::from_column(&self.tier, SubscriptionTier::Freemium)
    }

    pub fn status(&self) -> &str {
        &self.status
    }

    pub fn stripe_subscription_id(&self) -> Option<&str> {
        self.stripe_subscription_id.as_deref()
    }

    pub fn reservations_used(&self) -> i64 {
        self.reservations_used
    }

    pub fn limits(&self) -> UsageLimits {
        UsageLimits::new(self.tier(), self.reservations_used)
    }

    pub async fn find_by_user(mm: &ModelManager, user_id: Uuid) -> DatabaseResult<Option<Self>> {
        let found = sqlx::query_as("SELECT * FROM subscriptions WHERE user_id = $1")
            .bind(user_id)
            .fetch_optional(mm.executor())
            .await?;
        Ok(found)
    }

    /// Locks the user's row, creating a freemium one first when missing.
    pub async fn lock_for_user(conn: &mut PgConnection, user_id: Uuid) -> DatabaseResult<Self> {
        sqlx::query(
            "INSERT INTO subscriptions (id, user_id, tier) VALUES ($1,$2,$3) ON CONFLICT (user_id) DO NOTHING",
        )
        .bind(Uuid::new_v4())
        .bind(user_id)
        .bind(SubscriptionTier::Freemium.as_str())
        .execute(&mut *conn)
        .await?;

        let found = sqlx::query_as("SELECT * FROM subscriptions WHERE user_id = $1 FOR UPDATE")
            .bind(user_id)
            .fetch_one(&mut *conn)
            .await?;
        Ok(found)
    }

    pub async fn increment_usage(conn: &mut PgConnection, user_id: Uuid) -> DatabaseResult<()> {
        sqlx::query(
            "UPDATE subscriptions SET reservations_used = reservations_used + 1, updated_at = now() WHERE user_id = $1",
        )
        .bind(user_id)
        .execute(&mut *conn)
        .await?;
        Ok(())
    }

    /// Result of a completed subscription checkout.
    pub async fn activate(
        mm: &ModelManager,
        user_id: Uuid,
        tier: SubscriptionTier,
        stripe_customer_id: Option<&str>,
        stripe_subscription_id: Option<&str>,
    ) -> DatabaseResult<Self> {
        let sub = sqlx::query_as(
            r#"
            INSERT INTO subscriptions
                (id, user_id, tier, status, stripe_customer_id, stripe_subscription_id)
            VALUES ($1,$2,$3,'active',$4,$5)
            ON CONFLICT (user_id) DO UPDATE
            SET tier = EXCLUDED.tier,
                status = 'active',
                stripe_customer_id = COALESCE(EXCLUDED.stripe_customer_id, subscriptions.stripe_customer_id),
                stripe_subscription_id = COALESCE(EXCLUDED.stripe_subscription_id, subscriptions.stripe_subscription_id),
                cancel_at_period_end = FALSE,
                updated_at = now()
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(user_id)
        .bind(tier.as_str())
        .bind(stripe_customer_id)
        .bind(stripe_subscription_id)
        .fetch_one(mm.executor())
        .await?;
        Ok(sub)
    }

    /// Applies a `customer.subscription.updated` event. A new billing period resets usage.
    pub async fn sync(mm: &ModelManager, data: &SubscriptionSync) -> DatabaseResult<Option<Self>> {
        let sub = sqlx::query_as(
            r#"
            UPDATE subscriptions
            SET tier = COALESCE($2, tier),
                status = $3,
                reservations_used = CASE
                    WHEN $4::timestamptz IS NOT NULL
                         AND current_period_start IS DISTINCT FROM $4
                         AND current_period_start IS NOT NULL
                    THEN 0
                    ELSE reservations_used
                END,
                current_period_start = COALESCE($4, current_period_start),
                current_period_end = COALESCE($5, current_period_end),
                cancel_at_period_end = $6,
                updated_at = now()
            WHERE stripe_subscription_id = $1
            RETURNING *
            "#,
        )
        .bind(&data.stripe_subscription_id)
        .bind(data.tier.map(|t| t.as_str()))
        .bind(&data.status)
        .bind(data.current_period_start)
        .bind(data.current_period_end)
        .bind(data.cancel_at_period_end)
        .fetch_optional(mm.executor())
        .await?;
        Ok(sub)
    }

    pub async fn downgrade(mm: &ModelManager, stripe_subscription_id: &str) -> DatabaseResult<Option<Self>> {
        let sub = sqlx::query_as(
            r#"
            UPDATE subscriptions
            SET tier = $2, status = 'canceled', cancel_at_period_end = FALSE, updated_at = now()
            WHERE stripe_subscription_id = $1
            RETURNING *
            "#,
        )
        .bind(stripe_subscription_id)
        .bind(SubscriptionTier::Freemium.as_str())
        .fetch_optional(mm.executor())
        .await?;
        Ok(sub)
    }
}
