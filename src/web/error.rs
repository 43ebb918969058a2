use axum::{Json, http::StatusCode, response::IntoResponse};
use thiserror::Error;

use crate::{
    auth::CryptError,
    booking::BookingError,
    error::log_error,
    model::{DatabaseError, ResourceType},
    payments::{GatewayError, PaymentError},
};

pub type WebResult<T> = std::result::Result<T, WebError>;

#[derive(Debug, Error)]
pub enum RegistrationError {
    #[error("RegistrationUserConflict")]
    RegistrationUserConflict,
}

#[derive(Debug, Error)]
pub enum AuthenticationError {
    #[error("AuthenticationCookieNotFound, cookie: {cookie}")]
    AuthenticationCookieNotFound { cookie: String },

    #[error("AuthenticationCookieInvalid, cookie: {cookie}. Error: {error}")]
    AuthenticationCookieInvalid {
        cookie: String,
        error: jsonwebtoken::errors::Error,
    },

    #[error("AuthenticationRequired")]
    AuthenticationRequired,

    #[error("AuthenticationInvalidCredentials")]
    AuthenticationInvalidCredentials,
}

#[derive(Debug, Error)]
pub enum ResourceError {
    #[error("ResourceNotFound: {resource_type:?}")]
    ResourceNotFound { resource_type: ResourceType },

    #[error("ResourceForbidden: {resource_type:?}")]
    ResourceForbidden { resource_type: ResourceType },

    #[error("ResourceFetchError: {resource_type:?}. Error: {error}")]
    ResourceFetchError {
        resource_type: ResourceType,
        error: DatabaseError,
    },

    #[error("ResourceBadRequest: {resource_type:?}")]
    ResourceBadRequest { resource_type: ResourceType },
}

/// A request the booking rules refuse. The message is shown to the client.
#[derive(Debug, Error)]
pub enum RequestError {
    #[error("RequestInvalid: {0}")]
    RequestInvalid(String),

    #[error("RequestConflict: {0}")]
    RequestConflict(String),

    #[error("RequestQuotaExceeded: {0}")]
    RequestQuotaExceeded(String),

    #[error("RequestUnauthorized")]
    RequestUnauthorized,
}

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("ServerCryptError: {0}")]
    ServerCryptError(#[from] crate::auth::CryptError),

    #[error("ServerGatewayError: {0}")]
    ServerGatewayError(#[from] GatewayError),

    #[error("ServerMisconfigured: {0}")]
    ServerMisconfigured(&'static str),
}

impl ServerError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::ServerGatewayError(_) => StatusCode::BAD_GATEWAY,
            Self::ServerCryptError(_) | Self::ServerMisconfigured(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    pub fn client_display(&self) -> String {
        match self {
            Self::ServerGatewayError(GatewayError::CardDeclined(reason)) => {
                format!("Payment error, {reason}")
            }
            Self::ServerGatewayError(_) => String::from("Payment provider error."),
            _ => String::from("Internal server error."),
        }
    }
}

impl RequestError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::RequestInvalid(_) => StatusCode::BAD_REQUEST,
            Self::RequestConflict(_) => StatusCode::CONFLICT,
            Self::RequestQuotaExceeded(_) => StatusCode::FORBIDDEN,
            Self::RequestUnauthorized => StatusCode::UNAUTHORIZED,
        }
    }

    pub fn client_display(&self) -> String {
        match self {
            Self::RequestInvalid(m) | Self::RequestConflict(m) | Self::RequestQuotaExceeded(m) => {
                m.clone()
            }
            Self::RequestUnauthorized => String::from("Unauthorized."),
        }
    }
}

impl RegistrationError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::RegistrationUserConflict => StatusCode::CONFLICT,
        }
    }

    pub fn client_display(&self) -> String {
        match self {
            Self::RegistrationUserConflict => {
                String::from("Registration error, user already exists.")
            }
        }
    }
}

impl AuthenticationError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::AuthenticationRequired => StatusCode::UNAUTHORIZED,
            Self::AuthenticationCookieNotFound { .. } => StatusCode::NOT_FOUND,
            Self::AuthenticationInvalidCredentials => StatusCode::UNAUTHORIZED,
            Self::AuthenticationCookieInvalid { .. } => StatusCode::BAD_REQUEST,
        }
    }

    pub fn client_display(&self) -> String {
        match self {
            Self::AuthenticationCookieInvalid { .. } => {
                String::from("Authentication error, cookie invalid.")
            }
            Self::AuthenticationCookieNotFound { .. } => {
                String::from("Authentication error, cookie not found.")
            }
            Self::AuthenticationRequired => String::from("Authentication required."),
            Self::AuthenticationInvalidCredentials => {
                String::from("Authentication error, user not found or password is invalid.")
            }
        }
    }
}

impl ResourceError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::ResourceNotFound { .. } => StatusCode::NOT_FOUND,
            Self::ResourceForbidden { .. } => StatusCode::FORBIDDEN,
            Self::ResourceFetchError { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            Self::ResourceBadRequest { .. } => StatusCode::BAD_REQUEST,
        }
    }

    pub fn client_display(&self) -> String {
        match self {
            Self::ResourceNotFound { .. } => String::from("Resource error, resource not found."),
            Self::ResourceForbidden { .. } => String::from("Resource error, resource forbidden."),
            Self::ResourceFetchError { .. } => {
                String::from("Resource error, unable to fetch resource.")
            }
            Self::ResourceBadRequest { .. } => String::from("Resource error, bad request."),
        }
    }
}

#[derive(Debug, Error)]
pub enum WebError {
    #[error("ResourceError - {0}")]
    ResourceError(#[from] ResourceError),
    #[error("AuthenticationError - {0}")]
    AuthenticationError(#[from] AuthenticationError),
    #[error("RegistrationError - {0}")]
    RegistrationError(#[from] RegistrationError),
    #[error("RequestError - {0}")]
    RequestError(#[from] RequestError),
    #[error("ServerError - {0}")]
    ServerError(#[from] ServerError),
}

impl From<BookingError> for WebError {
    fn from(value: BookingError) -> Self {
        use BookingError::*;

        let message = value.to_string();
        let error = match value {
            InvalidTimeRange
            | OutsideSlot
            | InvalidValue(_)
            | UnknownValue { .. }
            | ReasonNotAllowed(_)
            | DeadlinePassed { .. } => RequestError::RequestInvalid(message),
            QuotaExceeded => RequestError::RequestQuotaExceeded(message),
            SlotConflict
            | SlotUnavailable
            | SlotInUse
            | OverlappingReservation
            | InvalidTransition { .. }
            | NotPayable(_)
            | SetupAlreadyCompleted
            | NothingToRefund
            | ChargeInProgress => RequestError::RequestConflict(message),
        };
        Self::RequestError(error)
    }
}

impl WebError {
    pub fn resource_not_found(r#type: ResourceType) -> Self {
        Self::ResourceError(ResourceError::ResourceNotFound {
            resource_type: r#type,
        })
    }

    pub fn resource_forbidden(r#type: ResourceType) -> Self {
        Self::ResourceError(ResourceError::ResourceForbidden {
            resource_type: r#type,
        })
    }

    pub fn resource_fetch_error(r#type: ResourceType, error: DatabaseError) -> Self {
        Self::ResourceError(ResourceError::ResourceFetchError {
            resource_type: r#type,
            error,
        })
    }

    pub fn resource_bad_request(r#type: ResourceType) -> Self {
        Self::ResourceError(ResourceError::ResourceBadRequest {
            resource_type: r#type,
        })
    }

    pub fn auth_cookie_not_found<S: Into<String>>(cookie: S) -> Self {
        Self::AuthenticationError(AuthenticationError::AuthenticationCookieNotFound {
            cookie: cookie.into(),
        })
    }

    pub fn auth_cookie_invalid<S: Into<String>>(
        cookie: S,
        error: jsonwebtoken::errors::Error,
    ) -> Self {
        Self::AuthenticationError(AuthenticationError::AuthenticationCookieInvalid {
            cookie: cookie.into(),
            error,
        })
    }

    pub fn auth_required() -> Self {
        Self::AuthenticationError(AuthenticationError::AuthenticationRequired)
    }

    pub fn auth_invalid_credentials() -> Self {
        Self::AuthenticationError(AuthenticationError::AuthenticationInvalidCredentials)
    }

    pub fn registration_conflict() -> Self {
        Self::RegistrationError(RegistrationError::RegistrationUserConflict)
    }

    pub fn server_crypt_error(e: CryptError) -> Self {
        Self::ServerError(ServerError::ServerCryptError(e))
    }

    pub fn bad_request<S: Into<String>>(message: S) -> Self {
        Self::RequestError(RequestError::RequestInvalid(message.into()))
    }

    pub fn conflict<S: Into<String>>(message: S) -> Self {
        Self::RequestError(RequestError::RequestConflict(message.into()))
    }

    pub fn unauthorized() -> Self {
        Self::RequestError(RequestError::RequestUnauthorized)
    }

    /// Maps a model error of `r#type` onto its response category.
    pub fn database(r#type: ResourceType, error: DatabaseError) -> Self {
        match error {
            DatabaseError::NotFound => Self::resource_not_found(r#type),
            DatabaseError::Forbidden => Self::resource_forbidden(r#type),
            DatabaseError::Booking(e) => e.into(),
            e => Self::resource_fetch_error(r#type, e),
        }
    }

    pub fn payment(r#type: ResourceType, error: PaymentError) -> Self {
        match error {
            PaymentError::Database(e) => Self::database(r#type, e),
            PaymentError::Gateway(e) => Self::ServerError(ServerError::ServerGatewayError(e)),
            PaymentError::WebhookSecretMissing => {
                Self::ServerError(ServerError::ServerMisconfigured("stripe.webhook_secret"))
            }
            e @ (PaymentError::Signature(_)
            | PaymentError::InvalidPayload(_)
            | PaymentError::SetupIncomplete(_)) => Self::bad_request(e.to_string()),
        }
    }

    pub fn status_code(&self) -> axum::http::StatusCode {
        match self {
            Self::ResourceError(e) => e.status_code(),
            Self::RegistrationError(e) => e.status_code(),
            Self::AuthenticationError(e) => e.status_code(),
            Self::RequestError(e) => e.status_code(),
            Self::ServerError(e) => e.status_code(),
        }
    }

    pub fn client_display(&self) -> String {
        match self {
            Self::ResourceError(e) => e.client_display(),
            Self::RegistrationError(e) => e.client_display(),
            Self::AuthenticationError(e) => e.client_display(),
            Self::RequestError(e) => e.client_display(),
            Self::ServerError(e) => e.client_display(),
        }
    }
}

#[derive(serde::Serialize, utoipa::ToSchema)]
pub struct ErrorResponse {
    /// Human-readable message for the client
    pub message: String,
    /// HTTP status code (stringified)
    pub status_code: String,
    /// Optional debug details (only in debug mode)
    pub details: Option<String>,
}

impl IntoResponse for WebError {
    fn into_response(self) -> axum::response::Response {
        log_error(&self);

        let status_code = self.status_code();
        let display = self.client_display();

        let body = ErrorResponse {
            message: display,
            status_code: status_code.as_str().to_string(),
            details: if cfg!(debug_assertions) {
                Some(self.to_string())
            } else {
                None
            },
        };

        (status_code, Json(body)).into_response()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::booking::ReservationStatus;

    #[test]
    fn booking_errors_map_to_client_statuses() {
        let status = |e: BookingError| WebError::from(e).status_code();

        assert_eq!(status(BookingError::InvalidTimeRange), StatusCode::BAD_REQUEST);
        assert_eq!(
            status(BookingError::DeadlinePassed { hours_until_start: 3 }),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(status(BookingError::QuotaExceeded), StatusCode::FORBIDDEN);
        assert_eq!(status(BookingError::SlotConflict), StatusCode::CONFLICT);
        assert_eq!(
            status(BookingError::InvalidTransition {
                from: ReservationStatus::Completed,
                to: ReservationStatus::Canceled,
            }),
            StatusCode::CONFLICT
        );
    }

    #[test]
    fn transition_conflicts_name_the_current_state() {
        let err = WebError::from(BookingError::InvalidTransition {
            from: ReservationStatus::Rejected,
            to: ReservationStatus::Approved,
        });
        assert!(err.client_display().contains("REJECTED"));
    }

    #[test]
    fn database_errors_keep_their_category() {
        let not_found = WebError::database(ResourceType::Reservation, DatabaseError::NotFound);
        assert_eq!(not_found.status_code(), StatusCode::NOT_FOUND);

        let forbidden = WebError::database(ResourceType::Reservation, DatabaseError::Forbidden);
        assert_eq!(forbidden.status_code(), StatusCode::FORBIDDEN);

        let gateway = WebError::payment(
            ResourceType::Payment,
            PaymentError::Gateway(GatewayError::Network("timeout".into())),
        );
        assert_eq!(gateway.status_code(), StatusCode::BAD_GATEWAY);

        let missing = WebError::payment(ResourceType::Payment, PaymentError::WebhookSecretMissing);
        assert_eq!(missing.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
