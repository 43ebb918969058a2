use thiserror::Error;

pub type GatewayResult<T> = std::result::Result<T, GatewayError>;
pub type PaymentResult<T> = std::result::Result<T, PaymentError>;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("network error: {0}")]
    Network(String),

    #[error("payment provider error {status}: {message}")]
    Api {
        status: u16,
        code: Option<String>,
        message: String,
    },

    #[error("card declined: {0}")]
    CardDeclined(String),

    #[error("unexpected provider response: {0}")]
    InvalidResponse(String),

    #[error("payment gateway not configured: {0}")]
    NotConfigured(&'static str),
}

impl GatewayError {
    /// Network failures, rate limiting and provider-side 5xx may succeed on a later try.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Network(_) => true,
            Self::Api { status, .. } => *status == 429 || *status >= 500,
            Self::CardDeclined(_) | Self::InvalidResponse(_) | Self::NotConfigured(_) => false,
        }
    }
}

/// Failures of payment workflows that span the database and the provider.
#[derive(Debug, Error)]
pub enum PaymentError {
    #[error("gateway error: {0}")]
    Gateway(#[from] GatewayError),

    #[error("database error: {0}")]
    Database(#[from] crate::model::DatabaseError),

    #[error("webhook signature error: {0}")]
    Signature(#[from] super::webhook::SignatureError),

    #[error("webhook secret not configured")]
    WebhookSecretMissing,

    #[error("invalid webhook payload: {0}")]
    InvalidPayload(String),

    #[error("payment setup not finished: {0}")]
    SetupIncomplete(&'static str),
}

impl From<crate::booking::BookingError> for PaymentError {
    fn from(value: crate::booking::BookingError) -> Self {
        Self::Database(value.into())
    }
}

impl From<sqlx::Error> for PaymentError {
    fn from(value: sqlx::Error) -> Self {
        Self::Database(value.into())
    }
}

impl From<reqwest::Error> for GatewayError {
    fn from(value: reqwest::Error) -> Self {
        if value.is_decode() {
            Self::InvalidResponse(value.to_string())
        } else {
            Self::Network(value.to_string())
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn retryable_errors() {
        assert!(GatewayError::Network("reset".into()).is_retryable());
        assert!(
            GatewayError::Api {
                status: 503,
                code: None,
                message: "unavailable".into()
            }
            .is_retryable()
        );
        assert!(
            GatewayError::Api {
                status: 429,
                code: Some("rate_limit".into()),
                message: "slow down".into()
            }
            .is_retryable()
        );
        assert!(
            !GatewayError::Api {
                status: 400,
                code: Some("parameter_missing".into()),
                message: "missing".into()
            }
            .is_retryable()
        );
        assert!(!GatewayError::CardDeclined("insufficient_funds".into()).is_retryable());
    }

    #[test]
    fn transaction_errors_surface_as_database_errors() {
        let error = PaymentError::from(sqlx::Error::PoolTimedOut);
        assert!(matches!(error, PaymentError::Database(_)));
    }
}
