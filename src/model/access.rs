use uuid::Uuid;

use crate::{
    model::{
        ModelManager,
        error::{DatabaseError, DatabaseResult},
    },
    web::{AuthenticatedUser, UserRole},
};

#[async_trait::async_trait]
pub trait HasOwner {
    type OwnerId: PartialEq + Send + Sync;
    async fn get_owner_id(
        &self,
        mm: &ModelManager,
        ctx: &AuthenticatedUser,
    ) -> DatabaseResult<Self::OwnerId>;
}

/// Resources shared by several users, e.g. a reservation between a student and a mentor.
pub trait HasParticipants {
    fn participants(&self) -> Vec<Uuid>;
}

pub async fn check_access<T: HasOwner<OwnerId = O>, O: PartialEq + Send + Sync>(
    mm: &ModelManager,
    ctx: &AuthenticatedUser,
    resource: &T,
    expected: O,
) -> DatabaseResult<()> {
    // admin can get all resources
    if ctx.user_role() == UserRole::Admin {
        return Ok(());
    }

    let actual_owner = resource.get_owner_id(mm, ctx).await?;
    if actual_owner == expected {
        Ok(())
    } else {
        Err(DatabaseError::Forbidden)
    }
}

pub fn check_participant<T: HasParticipants>(
    ctx: &AuthenticatedUser,
    resource: &T,
) -> DatabaseResult<()> {
    if ctx.user_role() == UserRole::Admin || resource.participants().contains(&ctx.user_id()) {
        Ok(())
    } else {
        Err(DatabaseError::Forbidden)
    }
}
