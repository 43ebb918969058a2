use axum::{
    Json, Router,
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::post,
};
use chrono::Utc;
use serde::Serialize;

use crate::{
    model::{ResourceTyped, entity::WebhookEvent},
    payments::webhook::{self, WebhookOutcome},
    web::{AppState, WebError, WebResult, error::ErrorResponse},
};

pub const SIGNATURE_HEADER: &str = "stripe-signature";

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct WebhookAck {
    pub received: bool,
    pub outcome: WebhookOutcome,
}

/// Stripe authenticates itself through the signature, no session cookie here.
pub fn routes<S>(state: AppState) -> Router<S> {
    Router::new()
        .route("/stripe", post(stripe_webhook_handler))
        .with_state(state)
}

#[utoipa::path(
    post,
    path = "/api/v1/webhooks/stripe",
    request_body(content = String, description = "Raw Stripe event payload", content_type = "application/json"),
    params(("Stripe-Signature" = String, Header, description = "t=<timestamp>,v1=<hmac>")),
    responses(
        (status = 200, description = "Event acknowledged", body = WebhookAck),
        (status = 400, description = "Missing or invalid signature", body = ErrorResponse),
        (status = 500, description = "Webhook secret not configured", body = ErrorResponse),
    ),
    tag = "webhooks"
)]
pub async fn stripe_webhook_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> WebResult<impl IntoResponse> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|value| value.to_str().ok());

    let outcome = webhook::handle(
        state.pool(),
        state.gateway(),
        state.config().stripe(),
        &body,
        signature,
        Utc::now().timestamp(),
    )
    .await
    .map_err(|e| WebError::payment(WebhookEvent::get_resource_type(), e))?;

    Ok((
        StatusCode::OK,
        Json(WebhookAck {
            received: true,
            outcome,
        }),
    ))
}
