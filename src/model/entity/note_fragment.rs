use crate::booking::{BookingError, text_enum};
use crate::model::access::HasOwner;
use crate::model::repo::ResourceTyped;
use crate::model::{ModelManager, Page, error::DatabaseResult, repo::CrudRepository};
use crate::web::AuthenticatedUser;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::prelude::FromRow;
use uuid::Uuid;

text_enum! {
    Importance, "importance" {
        Low => "low",
        Medium => "medium",
        High => "high",
        Critical => "critical",
    }
}

text_enum! {
    FragmentStatus, "fragment status" {
        Pending => "pending",
        Processing => "processing",
        Completed => "completed",
        Failed => "failed",
        Archived => "archived",
    }
}

pub const MAX_CONTENT_LEN: usize = 10_000;
pub const DEFAULT_LIMIT: i64 = 20;
pub const MAX_LIMIT: i64 = 100;

/// A short journal entry, optionally attached to a session and a project.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, utoipa::ToSchema)]
pub struct NoteFragment {
    id: Uuid,
    user_id: Uuid,
    session_id: Option<Uuid>,
    project_id: Option<Uuid>,
    content: String,
    importance: String,
    status: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl ResourceTyped for NoteFragment {
    fn get_resource_type() -> crate::model::ResourceType {
        crate::model::ResourceType::NoteFragment
    }
}

impl NoteFragment {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn session_id(&self) -> Option<Uuid> {
        self.session_id
    }

    pub fn project_id(&self) -> Option<Uuid> {
        self.project_id
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn importance(&self) -> &str {
        &self.importance
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, utoipa::ToSchema)]
pub struct NoteFragmentCreate {
    #[serde(skip)]
    pub user_id: Uuid,
    pub session_id: Option<Uuid>,
    pub project_id: Option<Uuid>,
    pub content: String,
    pub importance: Option<Importance>,
    pub status: Option<FragmentStatus>,
}

impl NoteFragmentCreate {
    pub fn validate(&self) -> Result<(), BookingError> {
        let len = self.content.chars().count();
        if len == 0 || len > MAX_CONTENT_LEN {
            return Err(BookingError::InvalidValue(format!(
                "content must hold 1..={MAX_CONTENT_LEN} characters"
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, Deserialize, utoipa::IntoParams)]
pub struct NoteFragmentFilter {
    pub session_id: Option<Uuid>,
    pub project_id: Option<Uuid>,
    pub status: Option<FragmentStatus>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

impl NoteFragmentFilter {
    pub fn limit(&self) -> i64 {
        self.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT)
    }

    pub fn offset(&self) -> i64 {
        self.offset.unwrap_or(0).max(0)
    }
}

#[async_trait]
impl CrudRepository<NoteFragment, NoteFragmentCreate, Uuid> for NoteFragment {
    async fn create(
        mm: &ModelManager,
        _actor: &AuthenticatedUser,
        data: NoteFragmentCreate,
    ) -> DatabaseResult<Self> {
        data.validate()?;

        let fragment = sqlx::query_as(
            r#"
            INSERT INTO note_fragments (id, user_id, session_id, project_id, content, importance, status)
            VALUES ($1,$2,$3,$4,$5,$6,$7)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(data.user_id)
        .bind(data.session_id)
        .bind(data.project_id)
        .bind(&data.content)
        .bind(data.importance.unwrap_or(Importance::Medium).as_str())
        .bind(data.status.unwrap_or(FragmentStatus::Pending).as_str())
        .fetch_one(mm.executor())
        .await?;
        Ok(fragment)
    }

    async fn update(
        self,
        mm: &ModelManager,
        _actor: &AuthenticatedUser,
        data: NoteFragmentCreate,
    ) -> DatabaseResult<Self> {
        data.validate()?;

        let fragment = sqlx::query_as(
            r#"
            UPDATE note_fragments
            SET session_id = $2, project_id = $3, content = $4,
                importance = COALESCE($5, importance), status = COALESCE($6, status),
                updated_at = now()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(self.id)
        .bind(data.session_id)
        .bind(data.project_id)
        .bind(&data.content)
        .bind(data.importance.map(|i| i.as_str()))
        .bind(data.status.map(|s| s.as_str()))
        .fetch_one(mm.executor())
        .await?;
        Ok(fragment)
    }

    async fn delete(self, mm: &ModelManager, _actor: &AuthenticatedUser) -> DatabaseResult<()> {
        sqlx::query("DELETE FROM note_fragments WHERE id = $1")
            .bind(self.id)
            .execute(mm.executor())
            .await?;
        Ok(())
    }

    async fn find_by_id(
        mm: &ModelManager,
        _actor: &AuthenticatedUser,
        id: Uuid,
    ) -> DatabaseResult<Option<Self>> {
        let result = sqlx::query_as("SELECT * FROM note_fragments WHERE id = $1")
            .bind(id)
            .fetch_optional(mm.executor())
            .await?;
        Ok(result)
    }

    async fn list(
        mm: &ModelManager,
        actor: &AuthenticatedUser,
        limit: i64,
        offset: i64,
    ) -> DatabaseResult<Vec<Self>> {
        let result = sqlx::query_as(
            "SELECT * FROM note_fragments WHERE user_id = $1 ORDER BY created_at DESC LIMIT $2 OFFSET $3",
        )
        .bind(actor.user_id())
        .bind(limit)
        .bind(offset)
        .fetch_all(mm.executor())
        .await?;
        Ok(result)
    }

    async fn count(mm: &ModelManager, actor: &AuthenticatedUser) -> DatabaseResult<i64> {
        let result: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM note_fragments WHERE user_id = $1")
            .bind(actor.user_id())
            .fetch_one(mm.executor())
            .await?;
        Ok(result)
    }
}

#[async_trait]
impl HasOwner for NoteFragment {
    type OwnerId = Uuid;

    async fn get_owner_id(
        &self,
        _mm: &ModelManager,
        _actor: &AuthenticatedUser,
    ) -> DatabaseResult<Self::OwnerId> {
        Ok(self.user_id)
    }
}

impl NoteFragment {
    pub async fn search(
        mm: &ModelManager,
        actor: &AuthenticatedUser,
        filter: &NoteFragmentFilter,
    ) -> DatabaseResult<Page<Self>> {
        const WHERE: &str = r#"
            WHERE user_id = $1
              AND ($2::uuid IS NULL OR session_id = $2)
              AND ($3::uuid IS NULL OR project_id = $3)
              AND ($4::text IS NULL OR status = $4)
        "#;
        let status = filter.status.map(|s| s.as_str());
        let (limit, offset) = (filter.limit(), filter.offset());

        let items = sqlx::query_as(&format!(
            "SELECT * FROM note_fragments {WHERE} ORDER BY created_at DESC LIMIT $5 OFFSET $6"
        ))
        .bind(actor.user_id())
        .bind(filter.session_id)
        .bind(filter.project_id)
        .bind(status)
        .bind(limit)
        .bind(offset)
        .fetch_all(mm.executor())
        .await?;

        let total = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM note_fragments {WHERE}"))
            .bind(actor.user_id())
            .bind(filter.session_id)
            .bind(filter.project_id)
            .bind(status)
            .fetch_one(mm.executor())
            .await?;

        Ok(Page::new(items, total, limit, offset))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn limit_is_capped() {
        let filter = NoteFragmentFilter::default();
        assert_eq!(filter.limit(), DEFAULT_LIMIT);

        let filter = NoteFragmentFilter {
            limit: Some(500),
            offset: Some(-3),
            ..Default::default()
        };
        assert_eq!(filter.limit(), MAX_LIMIT);
        assert_eq!(filter.offset(), 0);
    }

    #[test]
    fn content_length_is_checked() {
        let mut data = NoteFragmentCreate {
            user_id: Uuid::new_v4(),
            session_id: None,
            project_id: None,
            content: String::new(),
            importance: None,
            status: None,
        };
        assert!(data.validate().is_err());

        data.content = "a".repeat(MAX_CONTENT_LEN);
        assert!(data.validate().is_ok());

        data.content.push('b');
        assert!(data.validate().is_err());
    }

    #[test]
    fn enums_use_snake_case() {
        assert_eq!("critical".parse::<Importance>().unwrap(), Importance::Critical);
        assert_eq!(
            super::super::note_session::SessionType::EarTraining.as_str(),
            "ear_training"
        );
    }
}
