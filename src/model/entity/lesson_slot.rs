use crate::booking::{BookingError, BookingResult, ReservationStatus, SlotStatus, TimeRange};
use crate::model::access::HasOwner;
use crate::model::repo::ResourceTyped;
use crate::model::{ModelManager, Page, error::DatabaseResult, repo::CrudRepository};
use crate::web::AuthenticatedUser;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgConnection;
use sqlx::prelude::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow, utoipa::ToSchema)]
pub struct LessonSlot {
    id: Uuid,
    mentor_id: Uuid,
    start_time: DateTime<Utc>,
    end_time: DateTime<Utc>,
    price: i64,
    max_capacity: i32,
    current_capacity: i32,
    status: String,
    tags: Vec<String>,
    recurring_id: Option<Uuid>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl ResourceTyped for LessonSlot {
    fn get_resource_type() -> crate::model::ResourceType {
        crate::model::ResourceType::LessonSlot
    }
}

impl LessonSlot {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn mentor_id(&self) -> Uuid {
        self.mentor_id
    }

    pub fn start_time(&self) -> DateTime<Utc> {
        self.start_time
    }

    pub fn end_time(&self) -> DateTime<Utc> {
        self.end_time
    }

    pub fn range(&self) -> BookingResult<TimeRange> {
        TimeRange::new(self.start_time, self.end_time)
    }

    pub fn price(&self) -> i64 {
        self.price
    }

    pub fn max_capacity(&self) -> i32 {
        self.max_capacity
    }

    pub fn current_capacity(&self) -> i32 {
        self.current_capacity
    }

    pub fn status(&self) -> SlotStatus {
        SlotStatus::from_column(&self.status, SlotStatus::Cancelled)
    }

    pub fn tags(&self) -> &[String] {
        &self.tags
    }

    pub fn recurring_id(&self) -> Option<Uuid> {
        self.recurring_id
    }

    pub fn is_bookable(&self) -> bool {
        self.status() == SlotStatus::Available && self.current_capacity < self.max_capacity
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, utoipa::ToSchema)]
pub struct LessonSlotCreate {
    pub mentor_id: Uuid,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub price: i64,
    pub max_capacity: i32,
    pub tags: Vec<String>,
    pub recurring_id: Option<Uuid>,
}

impl LessonSlotCreate {
    pub fn validate(&self) -> Result<TimeRange, BookingError> {
        let range = TimeRange::new(self.start_time, self.end_time)?;
        if self.price < 0 {
            return Err(BookingError::InvalidValue(String::from("price must not be negative")));
        }
        if self.max_capacity < 1 {
            return Err(BookingError::InvalidValue(String::from(
                "max_capacity must be at least 1",
            )));
        }
        Ok(range)
    }
}

#[derive(Debug, Clone, Default, Deserialize, utoipa::IntoParams)]
pub struct SlotFilter {
    pub mentor_id: Option<Uuid>,
    pub status: Option<SlotStatus>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    /// Only future slots with free capacity.
    #[serde(default)]
    pub available: bool,
}

/// Serializes slot writes of one mentor by locking their user row.
async fn lock_mentor(conn: &mut PgConnection, mentor_id: Uuid) -> DatabaseResult<()> {
    let found: Option<Uuid> = sqlx::query_scalar("SELECT id FROM users WHERE id = $1 FOR UPDATE")
        .bind(mentor_id)
        .fetch_optional(&mut *conn)
        .await?;
    found.map(|_| ()).ok_or(crate::model::DatabaseError::NotFound)
}

async fn ensure_no_conflict(
    conn: &mut PgConnection,
    mentor_id: Uuid,
    range: &TimeRange,
    except: Option<Uuid>,
) -> DatabaseResult<()> {
    let conflict: bool = sqlx::query_scalar(
        r#"
        SELECT EXISTS (
            SELECT 1 FROM lesson_slots
            WHERE mentor_id = $1
              AND status <> 'cancelled'
              AND start_time < $3
              AND $2 < end_time
              AND ($4::uuid IS NULL OR id <> $4)
        )
        "#,
    )
    .bind(mentor_id)
    .bind(range.start())
    .bind(range.end())
    .bind(except)
    .fetch_one(&mut *conn)
    .await?;

    if conflict {
        return Err(BookingError::SlotConflict.into());
    }
    Ok(())
}

async fn insert_slot(conn: &mut PgConnection, data: &LessonSlotCreate) -> DatabaseResult<LessonSlot> {
    let slot = sqlx::query_as(
        r#"
        INSERT INTO lesson_slots
            (id, mentor_id, start_time, end_time, price, max_capacity, tags, recurring_id)
        VALUES ($1,$2,$3,$4,$5,$6,$7,$8)
        RETURNING *
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(data.mentor_id)
    .bind(data.start_time)
    .bind(data.end_time)
    .bind(data.price)
    .bind(data.max_capacity)
    .bind(&data.tags)
    .bind(data.recurring_id)
    .fetch_one(&mut *conn)
    .await?;
    Ok(slot)
}

async fn count_active_reservations(conn: &mut PgConnection, slot_id: Uuid) -> DatabaseResult<i64> {
    let count = sqlx::query_scalar(
        "SELECT COUNT(*) FROM reservations WHERE slot_id = $1 AND status = ANY($2)",
    )
    .bind(slot_id)
    .bind(ReservationStatus::ACTIVE)
    .fetch_one(&mut *conn)
    .await?;
    Ok(count)
}

#[async_trait]
impl CrudRepository<LessonSlot, LessonSlotCreate, Uuid> for LessonSlot {
    async fn create(
        mm: &ModelManager,
        _actor: &AuthenticatedUser,
        data: LessonSlotCreate,
    ) -> DatabaseResult<Self> {
        let range = data.validate()?;

        let mut tx = mm.begin().await?;
        lock_mentor(&mut tx, data.mentor_id).await?;
        ensure_no_conflict(&mut tx, data.mentor_id, &range, None).await?;
        let slot = insert_slot(&mut tx, &data).await?;
        tx.commit().await?;

        tracing::debug!(slot_id = %slot.id, mentor_id = %slot.mentor_id, "lesson slot created");
        Ok(slot)
    }

    async fn update(
        self,
        mm: &ModelManager,
        _actor: &AuthenticatedUser,
        data: LessonSlotCreate,
    ) -> DatabaseResult<Self> {
        let range = data.validate()?;

        let mut tx = mm.begin().await?;
        lock_mentor(&mut tx, self.mentor_id).await?;
        let current: LessonSlot = sqlx::query_as("SELECT * FROM lesson_slots WHERE id = $1 FOR UPDATE")
            .bind(self.id)
            .fetch_one(&mut *tx)
            .await?;

        let times_changed =
            current.start_time != data.start_time || current.end_time != data.end_time;
        if times_changed && current.current_capacity > 0 {
            return Err(BookingError::SlotInUse.into());
        }
        if data.max_capacity < current.current_capacity {
            return Err(BookingError::InvalidValue(String::from(
                "max_capacity is below the number of bookings",
            ))
            .into());
        }
        ensure_no_conflict(&mut tx, current.mentor_id, &range, Some(current.id)).await?;

        let updated = sqlx::query_as(
            r#"
            UPDATE lesson_slots
            SET start_time = $2, end_time = $3, price = $4, max_capacity = $5, tags = $6,
                status = CASE
                    WHEN status = 'cancelled' THEN status
                    WHEN current_capacity >= $5 THEN 'booked'
                    ELSE 'available'
                END,
                updated_at = now()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(current.id)
        .bind(data.start_time)
        .bind(data.end_time)
        .bind(data.price)
        .bind(data.max_capacity)
        .bind(&data.tags)
        .fetch_one(&mut *tx)
        .await?;
        tx.commit().await?;

        Ok(updated)
    }

    async fn delete(self, mm: &ModelManager, _actor: &AuthenticatedUser) -> DatabaseResult<()> {
        let mut tx = mm.begin().await?;
        let any: bool =
            sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM reservations WHERE slot_id = $1)")
                .bind(self.id)
                .fetch_one(&mut *tx)
                .await?;
        if any {
            return Err(BookingError::SlotInUse.into());
        }

        sqlx::query("DELETE FROM lesson_slots WHERE id = $1")
            .bind(self.id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn find_by_id(
        mm: &ModelManager,
        _actor: &AuthenticatedUser,
        id: Uuid,
    ) -> DatabaseResult<Option<Self>> {
        let result = sqlx::query_as("SELECT * FROM lesson_slots WHERE id = $1")
            .bind(id)
            .fetch_optional(mm.executor())
            .await?;
        Ok(result)
    }

    async fn list(
        mm: &ModelManager,
        _actor: &AuthenticatedUser,
        limit: i64,
        offset: i64,
    ) -> DatabaseResult<Vec<Self>> {
        let result =
            sqlx::query_as("SELECT * FROM lesson_slots ORDER BY start_time LIMIT $1 OFFSET $2")
                .bind(limit)
                .bind(offset)
                .fetch_all(mm.executor())
                .await?;
        Ok(result)
    }

    async fn count(mm: &ModelManager, _actor: &AuthenticatedUser) -> DatabaseResult<i64> {
        let result: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM lesson_slots")
            .fetch_one(mm.executor())
            .await?;
        Ok(result)
    }
}

#[async_trait]
impl HasOwner for LessonSlot {
    type OwnerId = Uuid;

    async fn get_owner_id(
        &self,
        _mm: &ModelManager,
        _actor: &AuthenticatedUser,
    ) -> DatabaseResult<Self::OwnerId> {
        Ok(self.mentor_id)
    }
}

const FILTER_CLAUSE: &str = r#"
    WHERE ($1::uuid IS NULL OR mentor_id = $1)
      AND ($2::text IS NULL OR status = $2)
      AND ($3::timestamptz IS NULL OR start_time >= $3)
      AND ($4::timestamptz IS NULL OR start_time < $4)
      AND (NOT $5 OR (status = 'available' AND start_time > now() AND current_capacity < max_capacity))
"#;

impl LessonSlot {
    pub async fn search(
        mm: &ModelManager,
        filter: &SlotFilter,
        limit: i64,
        offset: i64,
    ) -> DatabaseResult<Page<Self>> {
        let status = filter.status.map(|s| s.as_str());

        let items = sqlx::query_as(&format!(
            "SELECT * FROM lesson_slots {FILTER_CLAUSE} ORDER BY start_time LIMIT $6 OFFSET $7"
        ))
        .bind(filter.mentor_id)
        .bind(status)
        .bind(filter.from)
        .bind(filter.to)
        .bind(filter.available)
        .bind(limit)
        .bind(offset)
        .fetch_all(mm.executor())
        .await?;

        let total: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM lesson_slots {FILTER_CLAUSE}"))
            .bind(filter.mentor_id)
            .bind(status)
            .bind(filter.from)
            .bind(filter.to)
            .bind(filter.available)
            .fetch_one(mm.executor())
            .await?;

        Ok(Page::new(items, total, limit, offset))
    }

    /// Inserts a whole recurring series, all or nothing.
    pub async fn create_series(
        mm: &ModelManager,
        template: LessonSlotCreate,
        ranges: &[TimeRange],
    ) -> DatabaseResult<Vec<Self>> {
        template.validate()?;

        let mut tx = mm.begin().await?;
        lock_mentor(&mut tx, template.mentor_id).await?;

        let mut created = Vec::with_capacity(ranges.len());
        for range in ranges {
            ensure_no_conflict(&mut tx, template.mentor_id, range, None).await?;
            let data = LessonSlotCreate {
                start_time: range.start(),
                end_time: range.end(),
                ..template.clone()
            };
            created.push(insert_slot(&mut tx, &data).await?);
        }
        tx.commit().await?;

        tracing::info!(
            mentor_id = %template.mentor_id,
            recurring_id = ?template.recurring_id,
            count = created.len(),
            "recurring slots created"
        );
        Ok(created)
    }

    pub async fn cancel(self, mm: &ModelManager) -> DatabaseResult<Self> {
        let mut tx = mm.begin().await?;
        sqlx::query("SELECT id FROM lesson_slots WHERE id = $1 FOR UPDATE")
            .bind(self.id)
            .execute(&mut *tx)
            .await?;

        if count_active_reservations(&mut tx, self.id).await? > 0 {
            return Err(BookingError::SlotInUse.into());
        }

        let slot = sqlx::query_as(
            "UPDATE lesson_slots SET status = 'cancelled', updated_at = now() WHERE id = $1 RETURNING *",
        )
        .bind(self.id)
        .fetch_one(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(slot)
    }

    /// Cancels the future, unbooked slots of a series. Returns how many were cancelled.
    pub async fn cancel_series(
        mm: &ModelManager,
        recurring_id: Uuid,
        now: DateTime<Utc>,
    ) -> DatabaseResult<u64> {
        let result = sqlx::query(
            r#"
            UPDATE lesson_slots s
            SET status = 'cancelled', updated_at = now()
            WHERE s.recurring_id = $1
              AND s.start_time > $2
              AND s.status <> 'cancelled'
              AND s.current_capacity = 0
              AND NOT EXISTS (
                  SELECT 1 FROM reservations r WHERE r.slot_id = s.id AND r.status = ANY($3)
              )
            "#,
        )
        .bind(recurring_id)
        .bind(now)
        .bind(ReservationStatus::ACTIVE)
        .execute(mm.executor())
        .await?;
        Ok(result.rows_affected())
    }

    pub async fn series_owner(mm: &ModelManager, recurring_id: Uuid) -> DatabaseResult<Option<Uuid>> {
        let owner = sqlx::query_scalar("SELECT mentor_id FROM lesson_slots WHERE recurring_id = $1 LIMIT 1")
            .bind(recurring_id)
            .fetch_optional(mm.executor())
            .await?;
        Ok(owner)
    }

    pub async fn lock(conn: &mut PgConnection, id: Uuid) -> DatabaseResult<Option<Self>> {
        let slot = sqlx::query_as("SELECT * FROM lesson_slots WHERE id = $1 FOR UPDATE")
            .bind(id)
            .fetch_optional(&mut *conn)
            .await?;
        Ok(slot)
    }

    /// Takes one seat. `None` when the slot is cancelled or already full.
    pub async fn claim_capacity(conn: &mut PgConnection, id: Uuid) -> DatabaseResult<Option<Self>> {
        let slot = sqlx::query_as(
            r#"
            UPDATE lesson_slots
            SET current_capacity = current_capacity + 1,
                status = CASE WHEN current_capacity + 1 >= max_capacity THEN 'booked' ELSE status END,
                updated_at = now()
            WHERE id = $1 AND status = 'available' AND current_capacity < max_capacity
            RETURNING *
            "#,
        )
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;
        Ok(slot)
    }

    pub async fn release_capacity(conn: &mut PgConnection, id: Uuid) -> DatabaseResult<()> {
        sqlx::query(
            r#"
            UPDATE lesson_slots
            SET current_capacity = GREATEST(current_capacity - 1, 0),
                status = CASE WHEN status = 'booked' THEN 'available' ELSE status END,
                updated_at = now()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .execute(&mut *conn)
        .await?;
        Ok(())
    }
}
