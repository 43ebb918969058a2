use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgConnection;
use sqlx::prelude::FromRow;
use uuid::Uuid;

use crate::booking::{
    BookingError, CancelReason, PaymentStatus, ReservationStatus, TimeRange, UsageLimits,
    prorated_amount,
};
use crate::model::access::HasParticipants;
use crate::model::entity::{LessonSlot, Payment, Subscription};
use crate::model::repo::ResourceTyped;
use crate::model::{DatabaseError, ModelManager, Page, error::DatabaseResult};
use crate::web::AuthenticatedUser;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow, utoipa::ToSchema)]
pub struct Reservation {
    id: Uuid,
    slot_id: Uuid,
    student_id: Uuid,
    mentor_id: Uuid,
    status: String,
    booked_start_time: DateTime<Utc>,
    booked_end_time: DateTime<Utc>,
    total_amount: i64,
    notes: Option<String>,
    approved_at: Option<DateTime<Utc>>,
    approved_by: Option<Uuid>,
    rejected_reason: Option<String>,
    canceled_at: Option<DateTime<Utc>>,
    canceled_by: Option<Uuid>,
    cancel_reason: Option<String>,
    completed_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl ResourceTyped for Reservation {
    fn get_resource_type() -> crate::model::ResourceType {
        crate::model::ResourceType::Reservation
    }
}

impl HasParticipants for Reservation {
    fn participants(&self) -> Vec<Uuid> {
        vec![self.student_id, self.mentor_id]
    }
}

impl Reservation {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn slot_id(&self) -> Uuid {
        self.slot_id
    }

    pub fn student_id(&self) -> Uuid {
        self.student_id
    }

    pub fn mentor_id(&self) -> Uuid {
        self.mentor_id
    }

    pub fn status(&self) -> ReservationStatus {
        // rows are only ever written through `ReservationStatus::as_str`
        ReservationStatus::from_column(&self.status, ReservationStatus::Canceled)
    }

    pub fn booked_start_time(&self) -> DateTime<Utc> {
        self.booked_start_time
    }

    pub fn booked_end_time(&self) -> DateTime<Utc> {
        self.booked_end_time
    }

    pub fn total_amount(&self) -> i64 {
        self.total_amount
    }

    pub fn notes(&self) -> Option<&str> {
        self.notes.as_deref()
    }

    pub fn approved_by(&self) -> Option<Uuid> {
        self.approved_by
    }

    pub fn rejected_reason(&self) -> Option<&str> {
        self.rejected_reason.as_deref()
    }

    pub fn canceled_by(&self) -> Option<Uuid> {
        self.canceled_by
    }

    pub fn cancel_reason(&self) -> Option<CancelReason> {
        self.cancel_reason.as_deref().and_then(|r| r.parse().ok())
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, utoipa::ToSchema)]
pub struct ReservationCreate {
    pub slot_id: Uuid,
    pub booked_start_time: Option<DateTime<Utc>>,
    pub booked_end_time: Option<DateTime<Utc>>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, utoipa::IntoParams)]
pub struct ReservationFilter {
    pub status: Option<ReservationStatus>,
    pub slot_id: Option<Uuid>,
}

async fn lock_reservation(conn: &mut PgConnection, id: Uuid) -> DatabaseResult<Reservation> {
    let found = sqlx::query_as("SELECT * FROM reservations WHERE id = $1 FOR UPDATE")
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;
    found.ok_or(DatabaseError::NotFound)
}

/// Whether `student` already holds a reservation in `statuses` overlapping `range`.
async fn student_overlaps(
    conn: &mut PgConnection,
    student: Uuid,
    range: &TimeRange,
    statuses: &[&str],
    except: Option<Uuid>,
) -> DatabaseResult<bool> {
    let found = sqlx::query_scalar(
        r#"
        SELECT EXISTS (
            SELECT 1 FROM reservations
            WHERE student_id = $1
              AND status = ANY($2)
              AND booked_start_time < $4
              AND $3 < booked_end_time
              AND ($5::uuid IS NULL OR id <> $5)
        )
        "#,
    )
    .bind(student)
    .bind(statuses)
    .bind(range.start())
    .bind(range.end())
    .bind(except)
    .fetch_one(&mut *conn)
    .await?;
    Ok(found)
}

async fn set_status(
    conn: &mut PgConnection,
    current: &Reservation,
    next: ReservationStatus,
) -> DatabaseResult<()> {
    current.status().transition(next)?;
    sqlx::query("UPDATE reservations SET status = $2, updated_at = now() WHERE id = $1")
        .bind(current.id)
        .bind(next.as_str())
        .execute(&mut *conn)
        .await?;
    Ok(())
}

/// Locks the payment row. A claimed charge blocks the reservation until the gateway answered.
async fn ensure_no_running_charge(conn: &mut PgConnection, id: Uuid) -> DatabaseResult<()> {
    let payment = Payment::lock_by_reservation(conn, id).await?;
    if payment.is_some_and(|p| p.status() == PaymentStatus::Processing) {
        return Err(BookingError::ChargeInProgress.into());
    }
    Ok(())
}

async fn reload(conn: &mut PgConnection, id: Uuid) -> DatabaseResult<Reservation> {
    let found = sqlx::query_as("SELECT * FROM reservations WHERE id = $1")
        .bind(id)
        .fetch_one(&mut *conn)
        .await?;
    Ok(found)
}

impl Reservation {
    /// Books a slot: capacity claim, insert and usage increment in one transaction.
    #[tracing::instrument(skip(mm, data), fields(slot_id = %data.slot_id))]
    pub async fn create(
        mm: &ModelManager,
        student_id: Uuid,
        data: ReservationCreate,
    ) -> DatabaseResult<Self> {
        let mut tx = mm.begin().await?;

        // one booking attempt per student at a time
        sqlx::query("SELECT id FROM users WHERE id = $1 FOR UPDATE")
            .bind(student_id)
            .execute(&mut *tx)
            .await?;

        let slot = LessonSlot::lock(&mut tx, data.slot_id)
            .await?
            .ok_or(DatabaseError::NotFound)?;
        if slot.mentor_id() == student_id {
            return Err(DatabaseError::Forbidden);
        }
        if !slot.is_bookable() {
            return Err(BookingError::SlotUnavailable.into());
        }

        let slot_range = slot.range()?;
        let booked = slot_range.narrow(data.booked_start_time, data.booked_end_time)?;
        if student_overlaps(&mut tx, student_id, &booked, ReservationStatus::ACTIVE, None).await? {
            return Err(BookingError::OverlappingReservation.into());
        }

        let subscription = Subscription::lock_for_user(&mut tx, student_id).await?;
        let limits = UsageLimits::new(subscription.tier(), subscription.reservations_used());
        if !limits.can_create_reservation {
            return Err(BookingError::QuotaExceeded.into());
        }

        LessonSlot::claim_capacity(&mut tx, slot.id())
            .await?
            .ok_or(BookingError::SlotUnavailable)?;

        let amount = prorated_amount(slot.price(), &slot_range, &booked);
        let reservation: Reservation = sqlx::query_as(
            r#"
            INSERT INTO reservations
                (id, slot_id, student_id, mentor_id, status, booked_start_time, booked_end_time,
                 total_amount, notes)
            VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(slot.id())
        .bind(student_id)
        .bind(slot.mentor_id())
        .bind(ReservationStatus::PendingApproval.as_str())
        .bind(booked.start())
        .bind(booked.end())
        .bind(amount)
        .bind(&data.notes)
        .fetch_one(&mut *tx)
        .await?;

        Subscription::increment_usage(&mut tx, student_id).await?;
        tx.commit().await?;

        tracing::info!(reservation_id = %reservation.id, amount, "reservation created");
        Ok(reservation)
    }

    pub async fn find_by_id(mm: &ModelManager, id: Uuid) -> DatabaseResult<Option<Self>> {
        let result = sqlx::query_as("SELECT * FROM reservations WHERE id = $1")
            .bind(id)
            .fetch_optional(mm.executor())
            .await?;
        Ok(result)
    }

    /// Students see their bookings, mentors also the bookings on their slots, admins everything.
    pub async fn search(
        mm: &ModelManager,
        actor: &AuthenticatedUser,
        filter: &ReservationFilter,
        limit: i64,
        offset: i64,
    ) -> DatabaseResult<Page<Self>> {
        const WHERE: &str = r#"
            WHERE ($1 OR student_id = $2 OR mentor_id = $2)
              AND ($3::text IS NULL OR status = $3)
              AND ($4::uuid IS NULL OR slot_id = $4)
        "#;
        let status = filter.status.map(|s| s.as_str());

        let items = sqlx::query_as(&format!(
            "SELECT * FROM reservations {WHERE} ORDER BY booked_start_time DESC LIMIT $5 OFFSET $6"
        ))
        .bind(actor.is_admin())
        .bind(actor.user_id())
        .bind(status)
        .bind(filter.slot_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(mm.executor())
        .await?;

        let total: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM reservations {WHERE}"))
            .bind(actor.is_admin())
            .bind(actor.user_id())
            .bind(status)
            .bind(filter.slot_id)
            .fetch_one(mm.executor())
            .await?;

        Ok(Page::new(items, total, limit, offset))
    }

    pub async fn approve(mm: &ModelManager, id: Uuid, approved_by: Uuid) -> DatabaseResult<Self> {
        let mut tx = mm.begin().await?;
        let current = lock_reservation(&mut tx, id).await?;
        current.status().transition(ReservationStatus::Approved)?;

        let range = TimeRange::new(current.booked_start_time, current.booked_end_time)?;
        let committed = [
            ReservationStatus::Approved.as_str(),
            ReservationStatus::Confirmed.as_str(),
        ];
        if student_overlaps(&mut tx, current.student_id, &range, &committed, Some(id)).await? {
            return Err(BookingError::OverlappingReservation.into());
        }

        set_status(&mut tx, &current, ReservationStatus::Approved).await?;
        sqlx::query("UPDATE reservations SET approved_at = now(), approved_by = $2 WHERE id = $1")
            .bind(id)
            .bind(approved_by)
            .execute(&mut *tx)
            .await?;
        let updated = reload(&mut tx, id).await?;
        tx.commit().await?;

        tracing::info!(reservation_id = %id, %approved_by, "reservation approved");
        Ok(updated)
    }

    pub async fn reject(
        mm: &ModelManager,
        id: Uuid,
        reason: Option<&str>,
    ) -> DatabaseResult<Self> {
        let mut tx = mm.begin().await?;
        let current = lock_reservation(&mut tx, id).await?;
        current.status().transition(ReservationStatus::Rejected)?;
        ensure_no_running_charge(&mut tx, id).await?;
        set_status(&mut tx, &current, ReservationStatus::Rejected).await?;

        sqlx::query("UPDATE reservations SET rejected_reason = $2 WHERE id = $1")
            .bind(id)
            .bind(reason)
            .execute(&mut *tx)
            .await?;
        LessonSlot::release_capacity(&mut tx, current.slot_id).await?;
        Payment::void_for_reservation(&mut tx, id).await?;

        let updated = reload(&mut tx, id).await?;
        tx.commit().await?;

        tracing::info!(reservation_id = %id, "reservation rejected");
        Ok(updated)
    }

    /// Cancels, releases the seat and voids an uncharged payment. `notes` are appended.
    pub async fn cancel(
        mm: &ModelManager,
        id: Uuid,
        canceled_by: Uuid,
        reason: CancelReason,
        notes: Option<&str>,
    ) -> DatabaseResult<Self> {
        let mut tx = mm.begin().await?;
        let updated = Self::cancel_in(&mut tx, id, canceled_by, reason, notes).await?;
        tx.commit().await?;
        Ok(updated)
    }

    pub async fn cancel_in(
        conn: &mut PgConnection,
        id: Uuid,
        canceled_by: Uuid,
        reason: CancelReason,
        notes: Option<&str>,
    ) -> DatabaseResult<Self> {
        let current = lock_reservation(conn, id).await?;
        current.status().transition(ReservationStatus::Canceled)?;
        ensure_no_running_charge(conn, id).await?;
        set_status(conn, &current, ReservationStatus::Canceled).await?;

        sqlx::query(
            r#"
            UPDATE reservations
            SET canceled_at = now(), canceled_by = $2, cancel_reason = $3,
                notes = CASE
                    WHEN $4::text IS NULL THEN notes
                    WHEN notes IS NULL OR notes = '' THEN $4
                    ELSE notes || E'\n' || $4
                END
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(canceled_by)
        .bind(reason.as_str())
        .bind(notes)
        .execute(&mut *conn)
        .await?;
        LessonSlot::release_capacity(conn, current.slot_id).await?;
        Payment::void_for_reservation(conn, id).await?;

        tracing::info!(reservation_id = %id, %canceled_by, reason = %reason, "reservation canceled");
        reload(conn, id).await
    }

    pub async fn complete(mm: &ModelManager, id: Uuid) -> DatabaseResult<Self> {
        let mut tx = mm.begin().await?;
        let current = lock_reservation(&mut tx, id).await?;
        set_status(&mut tx, &current, ReservationStatus::Completed).await?;
        sqlx::query("UPDATE reservations SET completed_at = now() WHERE id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        let updated = reload(&mut tx, id).await?;
        tx.commit().await?;
        Ok(updated)
    }

    pub async fn status_in(conn: &mut PgConnection, id: Uuid) -> DatabaseResult<ReservationStatus> {
        Ok(reload(conn, id).await?.status())
    }

    /// APPROVED -> CONFIRMED once the lesson is paid. No-op in any other state.
    pub async fn confirm(conn: &mut PgConnection, id: Uuid) -> DatabaseResult<bool> {
        let result = sqlx::query(
            "UPDATE reservations SET status = $2, updated_at = now() WHERE id = $1 AND status = $3",
        )
        .bind(id)
        .bind(ReservationStatus::Confirmed.as_str())
        .bind(ReservationStatus::Approved.as_str())
        .execute(&mut *conn)
        .await?;
        Ok(result.rows_affected() == 1)
    }
}
