use crate::booking::BookingError;
use crate::model::access::HasOwner;
use crate::model::repo::ResourceTyped;
use crate::model::{ModelManager, error::DatabaseResult, repo::CrudRepository};
use crate::web::AuthenticatedUser;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::prelude::FromRow;
use uuid::Uuid;

pub const MAX_NAME_LEN: usize = 100;
pub const DEFAULT_COLOR: &str = "#6366F1";
pub const DEFAULT_ICON: &str = "folder";

/// Groups fragments of one piece of work. Deleting only deactivates it.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, utoipa::ToSchema)]
pub struct NoteProject {
    id: Uuid,
    user_id: Uuid,
    name: String,
    description: Option<String>,
    color: String,
    icon: String,
    is_active: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl ResourceTyped for NoteProject {
    fn get_resource_type() -> crate::model::ResourceType {
        crate::model::ResourceType::NoteProject
    }
}

impl NoteProject {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_active(&self) -> bool {
        self.is_active
    }
}

#[derive(Debug, Clone, Serialize, FromRow, utoipa::ToSchema)]
pub struct NoteProjectSummary {
    #[serde(flatten)]
    #[sqlx(flatten)]
    pub project: NoteProject,
    /// Fragments that are not archived.
    pub fragment_count: i64,
}

/// Body of create and update. Update only touches the fields present.
#[derive(Debug, Clone, Default, Deserialize, Serialize, utoipa::ToSchema)]
pub struct NoteProjectData {
    #[serde(skip)]
    pub user_id: Uuid,
    pub name: Option<String>,
    pub description: Option<String>,
    pub color: Option<String>,
    pub icon: Option<String>,
    pub is_active: Option<bool>,
}

fn is_hex_color(value: &str) -> bool {
    value.len() == 7
        && value.starts_with('#')
        && value[1..].chars().all(|c| c.is_ascii_hexdigit())
}

impl NoteProjectData {
    fn validate_fields(&self) -> Result<(), BookingError> {
        if let Some(name) = &self.name {
            let len = name.trim().chars().count();
            if len == 0 || len > MAX_NAME_LEN {
                return Err(BookingError::InvalidValue(format!(
                    "name must hold 1..={MAX_NAME_LEN} characters"
                )));
            }
        }
        if let Some(color) = &self.color {
            if !is_hex_color(color) {
                return Err(BookingError::InvalidValue(format!(
                    "color `{color}`, expected #RRGGBB"
                )));
            }
        }
        Ok(())
    }

    pub fn validate_create(&self) -> Result<(), BookingError> {
        if self.name.is_none() {
            return Err(BookingError::InvalidValue(String::from("name is required")));
        }
        self.validate_fields()
    }

    pub fn validate_update(&self) -> Result<(), BookingError> {
        let empty = self.name.is_none()
            && self.description.is_none()
            && self.color.is_none()
            && self.icon.is_none()
            && self.is_active.is_none();
        if empty {
            return Err(BookingError::InvalidValue(String::from("no updates provided")));
        }
        self.validate_fields()
    }
}

#[async_trait]
impl CrudRepository<NoteProject, NoteProjectData, Uuid> for NoteProject {
    async fn create(
        mm: &ModelManager,
        _actor: &AuthenticatedUser,
        data: NoteProjectData,
    ) -> DatabaseResult<Self> {
        data.validate_create()?;

        let project = sqlx::query_as(
            r#"
            INSERT INTO note_projects (id, user_id, name, description, color, icon)
            VALUES ($1,$2,$3,$4,$5,$6)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(data.user_id)
        .bind(data.name.as_deref().map(str::trim))
        .bind(&data.description)
        .bind(data.color.as_deref().unwrap_or(DEFAULT_COLOR))
        .bind(data.icon.as_deref().unwrap_or(DEFAULT_ICON))
        .fetch_one(mm.executor())
        .await?;
        Ok(project)
    }

    async fn update(
        self,
        mm: &ModelManager,
        _actor: &AuthenticatedUser,
        data: NoteProjectData,
    ) -> DatabaseResult<Self> {
        data.validate_update()?;

        let project = sqlx::query_as(
            r#"
            UPDATE note_projects
            SET name = COALESCE($2, name), description = COALESCE($3, description),
                color = COALESCE($4, color), icon = COALESCE($5, icon),
                is_active = COALESCE($6, is_active), updated_at = now()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(self.id)
        .bind(data.name.as_deref().map(str::trim))
        .bind(&data.description)
        .bind(&data.color)
        .bind(&data.icon)
        .bind(data.is_active)
        .fetch_one(mm.executor())
        .await?;
        Ok(project)
    }

    async fn delete(self, mm: &ModelManager, _actor: &AuthenticatedUser) -> DatabaseResult<()> {
        sqlx::query("UPDATE note_projects SET is_active = FALSE, updated_at = now() WHERE id = $1")
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
        let result = sqlx::query_as("SELECT * FROM note_projects WHERE id = $1")
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
            r#"
            SELECT * FROM note_projects
            WHERE user_id = $1 AND is_active
            ORDER BY created_at DESC LIMIT $2 OFFSET $3
            "#,
        )
        .bind(actor.user_id())
        .bind(limit)
        .bind(offset)
        .fetch_all(mm.executor())
        .await?;
        Ok(result)
    }

    async fn count(mm: &ModelManager, actor: &AuthenticatedUser) -> DatabaseResult<i64> {
        let result: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM note_projects WHERE user_id = $1 AND is_active",
        )
        .bind(actor.user_id())
        .fetch_one(mm.executor())
        .await?;
        Ok(result)
    }
}

#[async_trait]
impl HasOwner for NoteProject {
    type OwnerId = Uuid;

    async fn get_owner_id(
        &self,
        _mm: &ModelManager,
        _actor: &AuthenticatedUser,
    ) -> DatabaseResult<Self::OwnerId> {
        Ok(self.user_id)
    }
}

impl NoteProject {
    /// Active projects of the actor, newest first.
    pub async fn with_fragment_counts(
        mm: &ModelManager,
        actor: &AuthenticatedUser,
    ) -> DatabaseResult<Vec<NoteProjectSummary>> {
        let result = sqlx::query_as(
            r#"
            SELECT p.*, COUNT(f.id) AS fragment_count
            FROM note_projects p
            LEFT JOIN note_fragments f ON f.project_id = p.id AND f.status <> 'archived'
            WHERE p.user_id = $1 AND p.is_active
            GROUP BY p.id
            ORDER BY p.created_at DESC
            "#,
        )
        .bind(actor.user_id())
        .fetch_all(mm.executor())
        .await?;
        Ok(result)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn named(name: &str) -> NoteProjectData {
        NoteProjectData {
            name: Some(name.to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn create_needs_a_name() {
        assert!(NoteProjectData::default().validate_create().is_err());
        assert!(named("   ").validate_create().is_err());
        assert!(named(&"x".repeat(MAX_NAME_LEN + 1)).validate_create().is_err());
        assert!(named("Album demos").validate_create().is_ok());
    }

    #[test]
    fn update_needs_a_change() {
        assert!(NoteProjectData::default().validate_update().is_err());
        let archive = NoteProjectData {
            is_active: Some(false),
            ..Default::default()
        };
        assert!(archive.validate_update().is_ok());
    }

    #[test]
    fn colors_are_hex() {
        assert!(is_hex_color(DEFAULT_COLOR));
        assert!(is_hex_color("#a1b2c3"));
        assert!(!is_hex_color("6366F1"));
        assert!(!is_hex_color("#6366F"));
        assert!(!is_hex_color("#GGGGGG"));

        let mut data = named("Mixing");
        data.color = Some(String::from("red"));
        assert!(data.validate_create().is_err());
    }
}
