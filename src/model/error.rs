use thiserror::Error;

use crate::booking::BookingError;

pub type DatabaseResult<T> = std::result::Result<T, DatabaseError>;

#[derive(Debug, Error)]
pub enum DatabaseError {
    #[error("sqlx migrate error: {0}")]
    SqlxMigrateError(#[from] sqlx::migrate::MigrateError),
    #[error("sqlx error: {0}")]
    SqlxError(#[from] sqlx::Error),
    #[error("booking rule violated: {0}")]
    Booking(#[from] BookingError),
    #[error("referenced resource does not exist")]
    NotFound,
    #[error("access to this resource is forbidden")]
    Forbidden,
}
