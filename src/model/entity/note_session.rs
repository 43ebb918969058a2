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
    SessionType, "session type" {
        Composition => "composition",
        Practice => "practice",
        Mixing => "mixing",
        EarTraining => "ear_training",
        Listening => "listening",
        Theory => "theory",
        Other => "other",
    }
}

text_enum! {
    SessionStatus, "session status" {
        Draft => "draft",
        Analyzed => "analyzed",
        Completed => "completed",
        Archived => "archived",
    }
}

pub const MAX_TITLE_LEN: usize = 200;

/// A practice or composition session in the MUEDnote journal.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, utoipa::ToSchema)]
pub struct NoteSession {
    id: Uuid,
    user_id: Uuid,
    session_type: String,
    title: String,
    user_short_note: String,
    project_name: Option<String>,
    status: String,
    is_public: bool,
    share_with_mentor: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl ResourceTyped for NoteSession {
    fn get_resource_type() -> crate::model::ResourceType {
        crate::model::ResourceType::NoteSession
    }
}

impl NoteSession {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn user_id(&self) -> Uuid {
        self.user_id
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn session_type(&self) -> &str {
        &self.session_type
    }

    pub fn status(&self) -> &str {
        &self.status
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, utoipa::ToSchema)]
pub struct NoteSessionCreate {
    #[serde(skip)]
    pub user_id: Uuid,
    #[serde(rename = "type")]
    pub session_type: SessionType,
    pub title: String,
    #[serde(default)]
    pub user_short_note: String,
    pub project_name: Option<String>,
    pub status: Option<SessionStatus>,
    #[serde(default)]
    pub is_public: bool,
    #[serde(default)]
    pub share_with_mentor: bool,
}

impl NoteSessionCreate {
    pub fn validate(&self) -> Result<(), BookingError> {
        let len = self.title.trim().chars().count();
        if len == 0 || len > MAX_TITLE_LEN {
            return Err(BookingError::InvalidValue(format!(
                "title must hold 1..={MAX_TITLE_LEN} characters"
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, Deserialize, utoipa::IntoParams)]
pub struct NoteSessionFilter {
    #[serde(rename = "type")]
    pub session_type: Option<SessionType>,
    pub status: Option<SessionStatus>,
}

#[async_trait]
impl CrudRepository<NoteSession, NoteSessionCreate, Uuid> for NoteSession {
    async fn create(
        mm: &ModelManager,
        _actor: &AuthenticatedUser,
        data: NoteSessionCreate,
    ) -> DatabaseResult<Self> {
        data.validate()?;

        let session = sqlx::query_as(
            r#"
            INSERT INTO note_sessions
                (id, user_id, session_type, title, user_short_note, project_name, status, is_public, share_with_mentor)
            VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(data.user_id)
        .bind(data.session_type.as_str())
        .bind(data.title.trim())
        .bind(&data.user_short_note)
        .bind(&data.project_name)
        .bind(data.status.unwrap_or(SessionStatus::Draft).as_str())
        .bind(data.is_public)
        .bind(data.share_with_mentor)
        .fetch_one(mm.executor())
        .await?;
        Ok(session)
    }

    async fn update(
        self,
        mm: &ModelManager,
        _actor: &AuthenticatedUser,
        data: NoteSessionCreate,
    ) -> DatabaseResult<Self> {
        data.validate()?;

        let session = sqlx::query_as(
            r#"
            UPDATE note_sessions
            SET session_type = $2, title = $3, user_short_note = $4, project_name = $5,
                status = COALESCE($6, status), is_public = $7, share_with_mentor = $8,
                updated_at = now()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(self.id)
        .bind(data.session_type.as_str())
        .bind(data.title.trim())
        .bind(&data.user_short_note)
        .bind(&data.project_name)
        .bind(data.status.map(|s| s.as_str()))
        .bind(data.is_public)
        .bind(data.share_with_mentor)
        .fetch_one(mm.executor())
        .await?;
        Ok(session)
    }

    async fn delete(self, mm: &ModelManager, _actor: &AuthenticatedUser) -> DatabaseResult<()> {
        sqlx::query("DELETE FROM note_sessions WHERE id = $1")
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
        let result = sqlx::query_as("SELECT * FROM note_sessions WHERE id = $1")
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
            "SELECT * FROM note_sessions WHERE user_id = $1 ORDER BY created_at DESC LIMIT $2 OFFSET $3",
        )
        .bind(actor.user_id())
        .bind(limit)
        .bind(offset)
        .fetch_all(mm.executor())
        .await?;
        Ok(result)
    }

    async fn count(mm: &ModelManager, actor: &AuthenticatedUser) -> DatabaseResult<i64> {
        let result: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM note_sessions WHERE user_id = $1")
            .bind(actor.user_id())
            .fetch_one(mm.executor())
            .await?;
        Ok(result)
    }
}

#[async_trait]
impl HasOwner for NoteSession {
    type OwnerId = Uuid;

    async fn get_owner_id(
        &self,
        _mm: &ModelManager,
        _actor: &AuthenticatedUser,
    ) -> DatabaseResult<Self::OwnerId> {
        Ok(self.user_id)
    }
}

impl NoteSession {
    /// The actor's own sessions, newest first.
    pub async fn search(
        mm: &ModelManager,
        actor: &AuthenticatedUser,
        filter: &NoteSessionFilter,
        limit: i64,
        offset: i64,
    ) -> DatabaseResult<Page<Self>> {
        const WHERE: &str = r#"
            WHERE user_id = $1
              AND ($2::text IS NULL OR session_type = $2)
              AND ($3::text IS NULL OR status = $3)
        "#;
        let session_type = filter.session_type.map(|t| t.as_str());
        let status = filter.status.map(|s| s.as_str());

        let items = sqlx::query_as(&format!(
            "SELECT * FROM note_sessions {WHERE} ORDER BY created_at DESC LIMIT $4 OFFSET $5"
        ))
        .bind(actor.user_id())
        .bind(session_type)
        .bind(status)
        .bind(limit)
        .bind(offset)
        .fetch_all(mm.executor())
        .await?;

        let total = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM note_sessions {WHERE}"))
            .bind(actor.user_id())
            .bind(session_type)
            .bind(status)
            .fetch_one(mm.executor())
            .await?;

        Ok(Page::new(items, total, limit, offset))
    }
}
