use axum::{
    Json, Router,
    extract::State,
    http::{HeaderMap, StatusCode, header::AUTHORIZATION},
    response::IntoResponse,
    routing::get,
};
use chrono::Utc;
use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::{
    model::{ResourceTyped, entity::Payment},
    payments::ExecutionReport,
    web::{AppState, WebError, WebResult, error::ErrorResponse},
};

pub fn routes<S>(state: AppState) -> Router<S> {
    Router::new()
        .route(
            "/execute-payments",
            get(execute_payments_handler).post(execute_payments_handler),
        )
        .with_state(state)
}

/// `Authorization: Bearer <secret>`. An empty secret locks the endpoint.
fn authorized(headers: &HeaderMap, secret: &str) -> bool {
    let Some(token) = headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
    else {
        return false;
    };
    !secret.is_empty() && constant_time_eq(token, secret)
}

/// Equality over secret-keyed MACs.
fn constant_time_eq(token: &str, secret: &str) -> bool {
    let keyed = |value: &str| {
        let mut mac =
            Hmac::<Sha256>::new_from_slice(secret.as_bytes()).expect("HMAC can take key of any size");
        mac.update(value.as_bytes());
        mac
    };
    let expected = keyed(secret).finalize().into_bytes();
    keyed(token).verify_slice(&expected).is_ok()
}

#[utoipa::path(
    post,
    path = "/api/v1/cron/execute-payments",
    params(("Authorization" = String, Header, description = "Bearer <cron secret>")),
    responses(
        (status = 200, description = "Execution pass finished", body = ExecutionReport),
        (status = 401, description = "Missing or wrong cron secret", body = ErrorResponse),
    ),
    tag = "cron"
)]
pub async fn execute_payments_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> WebResult<impl IntoResponse> {
    if !authorized(&headers, state.config().cron().secret()) {
        tracing::warn!("cron call without a valid secret");
        return Err(WebError::unauthorized());
    }

    let report = state
        .executor()
        .execute_due(Utc::now())
        .await
        .map_err(|e| WebError::database(Payment::get_resource_type(), e))?;

    Ok((StatusCode::OK, Json(report)))
}

#[cfg(test)]
mod test {
    use axum::http::HeaderValue;

    use super::*;

    fn bearer(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_str(value).unwrap());
        headers
    }

    #[test]
    fn only_the_configured_bearer_passes() {
        assert!(authorized(&bearer("Bearer s3cret"), "s3cret"));
        assert!(!authorized(&bearer("Bearer wrong"), "s3cret"));
        assert!(!authorized(&bearer("s3cret"), "s3cret"));
        assert!(!authorized(&HeaderMap::new(), "s3cret"));
        assert!(!authorized(&bearer("Bearer "), ""));
    }

    #[test]
    fn secret_comparison_needs_the_exact_value() {
        assert!(constant_time_eq("s3cret", "s3cret"));
        assert!(!constant_time_eq("s3cre", "s3cret"));
        assert!(!constant_time_eq("s3cret ", "s3cret"));
        assert!(!constant_time_eq("", "s3cret"));
    }
}
