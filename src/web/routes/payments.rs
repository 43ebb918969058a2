use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    middleware,
    response::IntoResponse,
    routing::{get, post},
};
use serde::Deserialize;
use uuid::Uuid;

use crate::{
    model::{
        ResourceTyped, check_participant,
        entity::{Payment, Reservation},
    },
    payments::refund::{self, RefundReport},
    web::{AppState, RequestContext, WebError, WebResult, error::ErrorResponse, middlewares},
};

#[derive(Debug, Deserialize, utoipa::ToSchema)]
pub struct RefundBody {
    /// Minor units; defaults to everything still refundable.
    pub amount: Option<i64>,
    pub reason: String,
}

pub fn routes<S>(state: AppState) -> Router<S> {
    Router::new()
        .route("/reservations/{id}", get(payment_get_handler))
        .route("/reservations/{id}/refund", post(payment_refund_handler))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            middlewares::extract_context_fn,
        ))
        .with_state(state)
}

#[utoipa::path(
    get,
    path = "/api/v1/payments/reservations/{id}",
    responses(
        (status = 200, description = "Payment of the reservation", body = Payment),
        (status = 403, description = "Not a participant", body = ErrorResponse),
        (status = 404, description = "No payment for this reservation", body = ErrorResponse),
    ),
    tag = "payments",
    security(("cookie" = []))
)]
pub async fn payment_get_handler(
    ctx: RequestContext,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> WebResult<impl IntoResponse> {
    let user = ctx.user()?;
    let reservation = Reservation::find_by_id(state.pool(), id)
        .await
        .map_err(|e| WebError::database(Reservation::get_resource_type(), e))?
        .ok_or_else(|| WebError::resource_not_found(Reservation::get_resource_type()))?;
    check_participant(user, &reservation)
        .map_err(|e| WebError::database(Payment::get_resource_type(), e))?;

    let payment = Payment::find_by_reservation(state.pool(), id)
        .await
        .map_err(|e| WebError::database(Payment::get_resource_type(), e))?
        .ok_or_else(|| WebError::resource_not_found(Payment::get_resource_type()))?;

    Ok((StatusCode::OK, Json(payment)))
}

#[utoipa::path(
    post,
    path = "/api/v1/payments/reservations/{id}/refund",
    request_body = RefundBody,
    responses(
        (status = 200, description = "Refunded, reservation canceled", body = RefundReport),
        (status = 403, description = "Admins only", body = ErrorResponse),
        (status = 404, description = "No payment for this reservation", body = ErrorResponse),
        (status = 409, description = "Nothing left to refund", body = ErrorResponse),
        (status = 502, description = "Payment provider error", body = ErrorResponse),
    ),
    tag = "payments",
    security(("cookie" = []))
)]
pub async fn payment_refund_handler(
    ctx: RequestContext,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<RefundBody>,
) -> WebResult<impl IntoResponse> {
    let user = ctx.user()?;
    user.require_admin(Payment::get_resource_type())?;
    if payload.reason.trim().is_empty() {
        return Err(WebError::bad_request("A refund needs a reason."));
    }

    let report = refund::refund_reservation(
        state.pool(),
        state.gateway(),
        id,
        payload.amount,
        &payload.reason,
        user.user_id(),
    )
    .await
    .map_err(|e| WebError::payment(Payment::get_resource_type(), e))?;

    Ok((StatusCode::OK, Json(report)))
}
