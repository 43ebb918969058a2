use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use sqlx::prelude::FromRow;
use uuid::Uuid;

use crate::booking::ReservationStatus;
use crate::booking::matching::{MentorProfile, OpenSlot};
use crate::model::{ModelManager, error::DatabaseResult};

#[derive(Debug, FromRow)]
struct OpenSlotRow {
    mentor_id: Uuid,
    username: String,
    start_time: DateTime<Utc>,
    end_time: DateTime<Utc>,
    price: i64,
    tags: Vec<String>,
}

/// Read side of mentor search: who teaches what, and when.
pub struct MentorDirectory;

impl MentorDirectory {
    /// Profiles of mentors with a bookable slot starting in `[from, to]`, ordered by username.
    pub async fn open_profiles(
        mm: &ModelManager,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> DatabaseResult<Vec<MentorProfile>> {
        let rows: Vec<OpenSlotRow> = sqlx::query_as(
            r#"
            SELECT s.mentor_id, u.username, s.start_time, s.end_time, s.price, s.tags
            FROM lesson_slots s
            JOIN users u ON u.id = s.mentor_id
            WHERE s.status = 'available'
              AND s.current_capacity < s.max_capacity
              AND s.start_time BETWEEN $1 AND $2
            ORDER BY s.start_time
            "#,
        )
        .bind(from)
        .bind(to)
        .fetch_all(mm.executor())
        .await?;

        let completed: HashMap<Uuid, i64> = sqlx::query_as::<_, (Uuid, i64)>(
            "SELECT mentor_id, COUNT(*) FROM reservations WHERE status = $1 GROUP BY mentor_id",
        )
        .bind(ReservationStatus::Completed.as_str())
        .fetch_all(mm.executor())
        .await?
        .into_iter()
        .collect();

        let mut by_mentor: BTreeMap<(String, Uuid), Vec<OpenSlot>> = BTreeMap::new();
        for row in rows {
            by_mentor
                .entry((row.username, row.mentor_id))
                .or_default()
                .push(OpenSlot {
                    start_time: row.start_time,
                    end_time: row.end_time,
                    price: row.price,
                    tags: row.tags,
                });
        }

        let profiles = by_mentor
            .into_iter()
            .filter_map(|((username, id), slots)| {
                let lessons = completed.get(&id).copied().unwrap_or(0);
                MentorProfile::from_slots(id, username, &slots, lessons)
            })
            .collect();
        Ok(profiles)
    }

    /// Mentors who completed a lesson with `student_id`.
    pub async fn previous_mentors(mm: &ModelManager, student_id: Uuid) -> DatabaseResult<Vec<Uuid>> {
        let ids = sqlx::query_scalar(
            "SELECT DISTINCT mentor_id FROM reservations WHERE student_id = $1 AND status = $2",
        )
        .bind(student_id)
        .bind(ReservationStatus::Completed.as_str())
        .fetch_all(mm.executor())
        .await?;
        Ok(ids)
    }
}
