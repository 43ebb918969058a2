use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgConnection;
use sqlx::prelude::FromRow;
use uuid::Uuid;

use crate::booking::{BookingError, PaymentStatus, ReservationStatus};
use crate::model::repo::ResourceTyped;
use crate::model::{ModelManager, error::DatabaseResult};

#[derive(Debug, Clone, Serialize, Deserialize, FromRow, utoipa::ToSchema)]
pub struct Payment {
    id: Uuid,
    reservation_id: Uuid,
    amount: i64,
    currency: String,
    status: String,
    stripe_customer_id: Option<String>,
    stripe_checkout_session_id: Option<String>,
    stripe_setup_intent_id: Option<String>,
    stripe_payment_method_id: Option<String>,
    stripe_payment_intent_id: Option<String>,
    charge_executed_at: Option<DateTime<Utc>>,
    attempts: i32,
    last_error: Option<String>,
    refunded_at: Option<DateTime<Utc>>,
    refund_amount: i64,
    refund_reason: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl ResourceTyped for Payment {
    fn get_resource_type() -> crate::model::ResourceType {
        crate::model::ResourceType::Payment
    }
}

/// Reservation a due payment belongs to, joined in by the execution scan.
#[derive(Debug, Clone, FromRow)]
pub struct DueCharge {
    #[sqlx(flatten)]
    pub payment: Payment,
    pub booked_start_time: DateTime<Utc>,
}

impl Payment {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn reservation_id(&self) -> Uuid {
        self.reservation_id
    }

    pub fn amount(&self) -> i64 {
        self.amount
    }

    pub fn currency(&self) -> &str {
        &self.currency
    }

    pub fn status(&self) -> PaymentStatus {
        PaymentStatus::from_column(&self.status, PaymentStatus::Failed)
    }

    pub fn stripe_customer_id(&self) -> Option<&str> {
        self.stripe_customer_id.as_deref()
    }

    pub fn stripe_payment_method_id(&self) -> Option<&str> {
        self.stripe_payment_method_id.as_deref()
    }

    pub fn stripe_payment_intent_id(&self) -> Option<&str> {
        self.stripe_payment_intent_id.as_deref()
    }

    pub fn charge_executed_at(&self) -> Option<DateTime<Utc>> {
        self.charge_executed_at
    }

    pub fn attempts(&self) -> i32 {
        self.attempts
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn refund_amount(&self) -> i64 {
        self.refund_amount
    }

    pub fn refunded_at(&self) -> Option<DateTime<Utc>> {
        self.refunded_at
    }

    /// What is still refundable of the captured amount.
    pub fn refundable(&self) -> i64 {
        (self.amount - self.refund_amount).max(0)
    }

    pub async fn find_by_reservation(
        mm: &ModelManager,
        reservation_id: Uuid,
    ) -> DatabaseResult<Option<Self>> {
        let found = sqlx::query_as("SELECT * FROM payments WHERE reservation_id = $1")
            .bind(reservation_id)
            .fetch_optional(mm.executor())
            .await?;
        Ok(found)
    }

    pub async fn find_by_session(mm: &ModelManager, session_id: &str) -> DatabaseResult<Option<Self>> {
        let found = sqlx::query_as("SELECT * FROM payments WHERE stripe_checkout_session_id = $1")
            .bind(session_id)
            .fetch_optional(mm.executor())
            .await?;
        Ok(found)
    }

    /// Creates or refreshes the PENDING payment of a reservation for a new setup session.
    /// A failed payment may be set up again.
    pub async fn upsert_pending(
        mm: &ModelManager,
        reservation_id: Uuid,
        amount: i64,
        currency: &str,
        customer_id: &str,
        session_id: &str,
    ) -> DatabaseResult<Self> {
        let found: Option<Self> = sqlx::query_as(
            r#"
            INSERT INTO payments
                (id, reservation_id, amount, currency, status, stripe_customer_id, stripe_checkout_session_id)
            VALUES ($1,$2,$3,$4,$5,$6,$7)
            ON CONFLICT (reservation_id) DO UPDATE
            SET amount = EXCLUDED.amount,
                currency = EXCLUDED.currency,
                stripe_customer_id = EXCLUDED.stripe_customer_id,
                stripe_checkout_session_id = EXCLUDED.stripe_checkout_session_id,
                status = EXCLUDED.status,
                charge_executed_at = NULL,
                attempts = 0,
                updated_at = now()
            WHERE payments.status = ANY($8)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(reservation_id)
        .bind(amount)
        .bind(currency)
        .bind(PaymentStatus::Pending.as_str())
        .bind(customer_id)
        .bind(session_id)
        .bind([PaymentStatus::Pending.as_str(), PaymentStatus::Failed.as_str()].as_slice())
        .fetch_optional(mm.executor())
        .await?;

        found.ok_or_else(|| BookingError::SetupAlreadyCompleted.into())
    }

    /// PENDING -> SETUP_COMPLETED. `None` when the payment moved on already.
    pub async fn complete_setup(
        mm: &ModelManager,
        id: Uuid,
        setup_intent_id: &str,
        payment_method_id: &str,
    ) -> DatabaseResult<Option<Self>> {
        let updated = sqlx::query_as(
            r#"
            UPDATE payments
            SET status = $2, stripe_setup_intent_id = $3, stripe_payment_method_id = $4,
                last_error = NULL, updated_at = now()
            WHERE id = $1 AND status = $5
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(PaymentStatus::SetupCompleted.as_str())
        .bind(setup_intent_id)
        .bind(payment_method_id)
        .bind(PaymentStatus::Pending.as_str())
        .fetch_optional(mm.executor())
        .await?;
        Ok(updated)
    }

    /// Setup-completed payments of approved reservations starting within `[from, to]`.
    pub async fn due_for_charge(
        mm: &ModelManager,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> DatabaseResult<Vec<DueCharge>> {
        let due = sqlx::query_as(
            r#"
            SELECT p.*, r.booked_start_time
            FROM payments p
            JOIN reservations r ON r.id = p.reservation_id
            WHERE r.status = $1
              AND p.status = $2
              AND p.charge_executed_at IS NULL
              AND r.booked_start_time BETWEEN $3 AND $4
            ORDER BY r.booked_start_time
            "#,
        )
        .bind(ReservationStatus::Approved.as_str())
        .bind(PaymentStatus::SetupCompleted.as_str())
        .bind(from)
        .bind(to)
        .fetch_all(mm.executor())
        .await?;
        Ok(due)
    }

    /// Marks the payment as being charged. Exactly one caller wins, the rest get `None`.
    pub async fn claim(mm: &ModelManager, id: Uuid, now: DateTime<Utc>) -> DatabaseResult<Option<Self>> {
        let claimed = sqlx::query_as(
            r#"
            UPDATE payments p
            SET charge_executed_at = $2, status = $3, attempts = attempts + 1, updated_at = $2
            WHERE p.id = $1
              AND p.charge_executed_at IS NULL
              AND p.status = $4
              AND EXISTS (
                  SELECT 1 FROM reservations r WHERE r.id = p.reservation_id AND r.status = $5
              )
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(now)
        .bind(PaymentStatus::Processing.as_str())
        .bind(PaymentStatus::SetupCompleted.as_str())
        .bind(ReservationStatus::Approved.as_str())
        .fetch_optional(mm.executor())
        .await?;
        Ok(claimed)
    }

    /// Gives a claimed payment back to the scheduler after a transient failure.
    pub async fn release_claim(mm: &ModelManager, id: Uuid, error: &str) -> DatabaseResult<()> {
        sqlx::query(
            r#"
            UPDATE payments
            SET charge_executed_at = NULL, status = $2, last_error = $3, updated_at = now()
            WHERE id = $1 AND status = $4
            "#,
        )
        .bind(id)
        .bind(PaymentStatus::SetupCompleted.as_str())
        .bind(error)
        .bind(PaymentStatus::Processing.as_str())
        .execute(mm.executor())
        .await?;
        Ok(())
    }

    pub async fn mark_failed(
        mm: &ModelManager,
        id: Uuid,
        error: &str,
        intent_id: Option<&str>,
    ) -> DatabaseResult<()> {
        sqlx::query(
            r#"
            UPDATE payments
            SET status = $2, last_error = $3,
                stripe_payment_intent_id = COALESCE($4, stripe_payment_intent_id),
                updated_at = now()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(PaymentStatus::Failed.as_str())
        .bind(error)
        .bind(intent_id)
        .execute(mm.executor())
        .await?;
        Ok(())
    }

    /// Records the intent of a charge. `status` is SUCCEEDED or PROCESSING.
    pub async fn record_charge(
        conn: &mut PgConnection,
        id: Uuid,
        intent_id: &str,
        status: PaymentStatus,
    ) -> DatabaseResult<()> {
        sqlx::query(
            r#"
            UPDATE payments
            SET status = $2, stripe_payment_intent_id = $3, last_error = NULL, updated_at = now()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(status.as_str())
        .bind(intent_id)
        .execute(&mut *conn)
        .await?;
        Ok(())
    }

    /// Voids a payment that has not been charged so the scheduler skips it.
    pub async fn void_for_reservation(conn: &mut PgConnection, reservation_id: Uuid) -> DatabaseResult<()> {
        sqlx::query(
            r#"
            UPDATE payments
            SET status = $2, updated_at = now()
            WHERE reservation_id = $1 AND status = ANY($3) AND charge_executed_at IS NULL
            "#,
        )
        .bind(reservation_id)
        .bind(PaymentStatus::Canceled.as_str())
        .bind([
            PaymentStatus::Pending.as_str(),
            PaymentStatus::SetupCompleted.as_str(),
            PaymentStatus::Failed.as_str(),
        ]
        .as_slice())
        .execute(&mut *conn)
        .await?;
        Ok(())
    }

    pub async fn lock_by_reservation(
        conn: &mut PgConnection,
        reservation_id: Uuid,
    ) -> DatabaseResult<Option<Self>> {
        let found = sqlx::query_as("SELECT * FROM payments WHERE reservation_id = $1 FOR UPDATE")
            .bind(reservation_id)
            .fetch_optional(&mut *conn)
            .await?;
        Ok(found)
    }

    /// Reserves the payment for one refund call. Holding `refunded_at` keeps concurrent refunds out.
    pub async fn start_refund(conn: &mut PgConnection, id: Uuid) -> DatabaseResult<()> {
        sqlx::query("UPDATE payments SET refunded_at = now(), updated_at = now() WHERE id = $1")
            .bind(id)
            .execute(&mut *conn)
            .await?;
        Ok(())
    }

    /// Undoes `start_refund` after the provider refused the refund.
    pub async fn abort_refund(mm: &ModelManager, id: Uuid) -> DatabaseResult<()> {
        sqlx::query(
            "UPDATE payments SET refunded_at = NULL, updated_at = now() WHERE id = $1 AND status = $2",
        )
        .bind(id)
        .bind(PaymentStatus::Succeeded.as_str())
        .execute(mm.executor())
        .await?;
        Ok(())
    }

    pub async fn record_refund(
        conn: &mut PgConnection,
        id: Uuid,
        amount: i64,
        reason: &str,
    ) -> DatabaseResult<Self> {
        let updated = sqlx::query_as(
            r#"
            UPDATE payments
            SET status = $2, refunded_at = now(), refund_amount = refund_amount + $3,
                refund_reason = $4, updated_at = now()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(PaymentStatus::Refunded.as_str())
        .bind(amount)
        .bind(reason)
        .fetch_one(&mut *conn)
        .await?;
        Ok(updated)
    }

    /// `payment_intent.succeeded`. Returns the reservation to confirm.
    pub async fn succeed_by_intent(conn: &mut PgConnection, intent_id: &str) -> DatabaseResult<Option<Uuid>> {
        let reservation_id = sqlx::query_scalar(
            r#"
            UPDATE payments
            SET status = $2, last_error = NULL, updated_at = now()
            WHERE stripe_payment_intent_id = $1 AND status = ANY($3)
            RETURNING reservation_id
            "#,
        )
        .bind(intent_id)
        .bind(PaymentStatus::Succeeded.as_str())
        .bind([
            PaymentStatus::Processing.as_str(),
            PaymentStatus::Failed.as_str(),
            PaymentStatus::Succeeded.as_str(),
        ]
        .as_slice())
        .fetch_optional(&mut *conn)
        .await?;
        Ok(reservation_id)
    }

    /// `payment_intent.payment_failed`.
    pub async fn fail_by_intent(mm: &ModelManager, intent_id: &str, error: &str) -> DatabaseResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE payments
            SET status = $2, last_error = $3, updated_at = now()
            WHERE stripe_payment_intent_id = $1 AND status = ANY($4)
            "#,
        )
        .bind(intent_id)
        .bind(PaymentStatus::Failed.as_str())
        .bind(error)
        .bind([PaymentStatus::Processing.as_str(), PaymentStatus::Failed.as_str()].as_slice())
        .execute(mm.executor())
        .await?;
        Ok(result.rows_affected() > 0)
    }
}
