use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    middleware,
    response::IntoResponse,
    routing::{get, post},
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    booking::{
        CancelActor, CancelReason, CancellationPreview, PaymentStatus, ReservationStatus,
        cancellation,
    },
    error::log_error,
    model::{
        CrudRepository, DatabaseError, ResourceTyped, check_participant,
        entity::{Payment, Reservation, ReservationCreate, ReservationFilter, UserEntity},
    },
    payments::{ApprovalCharge, CheckoutSession, PaymentError, setup},
    web::{
        AppState, AuthenticatedUser, RequestContext, WebError, WebResult, error::ErrorResponse,
        middlewares, routes::PaginationQuery,
    },
};

#[derive(Debug, Deserialize, utoipa::ToSchema)]
pub struct RejectBody {
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize, utoipa::ToSchema)]
pub struct CancelBody {
    pub reason: CancelReason,
    pub notes: Option<String>,
}

#[derive(Debug, Deserialize, utoipa::ToSchema)]
pub struct CompleteSetupBody {
    pub session_id: String,
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct ApproveResponse {
    pub reservation: Reservation,
    /// Absent when the charge attempt itself failed; the approval stands.
    pub payment: Option<ApprovalCharge>,
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct RefundInfo {
    pub payment_id: Uuid,
    pub cancellation_fee: i64,
    pub refundable_amount: i64,
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct CancelResponse {
    pub reservation: Reservation,
    pub cancellation_fee: i64,
    /// Present when the lesson was already paid; an admin issues the refund.
    pub refund: Option<RefundInfo>,
}

pub fn routes<S>(state: AppState) -> Router<S> {
    Router::new()
        .route(
            "/",
            get(reservation_list_handler).post(reservation_create_handler),
        )
        .route("/complete-setup", post(reservation_complete_setup_handler))
        .route("/{id}", get(reservation_get_handler))
        .route("/{id}/approve", post(reservation_approve_handler))
        .route("/{id}/reject", post(reservation_reject_handler))
        .route("/{id}/cancel", post(reservation_cancel_handler))
        .route("/{id}/complete", post(reservation_complete_handler))
        .route(
            "/{id}/cancellation-policy",
            get(reservation_policy_handler),
        )
        .route("/{id}/setup-payment", post(reservation_setup_payment_handler))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            middlewares::extract_context_fn,
        ))
        .with_state(state)
}

fn reservation_error(e: DatabaseError) -> WebError {
    WebError::database(Reservation::get_resource_type(), e)
}

fn payment_error(e: PaymentError) -> WebError {
    WebError::payment(Payment::get_resource_type(), e)
}

async fn find_reservation(state: &AppState, id: Uuid) -> WebResult<Reservation> {
    Reservation::find_by_id(state.pool(), id)
        .await
        .map_err(reservation_error)?
        .ok_or_else(|| WebError::resource_not_found(Reservation::get_resource_type()))
}

/// The slot's mentor or an admin.
fn require_slot_mentor(user: &AuthenticatedUser, reservation: &Reservation) -> WebResult<()> {
    if user.is_admin() || reservation.mentor_id() == user.user_id() {
        Ok(())
    } else {
        Err(WebError::resource_forbidden(Reservation::get_resource_type()))
    }
}

fn cancel_actor(user: &AuthenticatedUser, reservation: &Reservation) -> WebResult<CancelActor> {
    CancelActor::resolve(
        user.is_admin(),
        reservation.mentor_id() == user.user_id(),
        reservation.student_id() == user.user_id(),
    )
    .ok_or_else(|| WebError::resource_forbidden(Reservation::get_resource_type()))
}

#[utoipa::path(
    post,
    path = "/api/v1/reservations",
    request_body = ReservationCreate,
    responses(
        (status = 201, description = "Reservation pending approval", body = Reservation),
        (status = 400, description = "Booked range outside the slot", body = ErrorResponse),
        (status = 403, description = "Own slot or reservation quota exhausted", body = ErrorResponse),
        (status = 404, description = "Unknown slot", body = ErrorResponse),
        (status = 409, description = "Slot unavailable or overlapping reservation", body = ErrorResponse),
    ),
    tag = "reservations",
    security(("cookie" = []))
)]
pub async fn reservation_create_handler(
    ctx: RequestContext,
    State(state): State<AppState>,
    Json(payload): Json<ReservationCreate>,
) -> WebResult<impl IntoResponse> {
    let user = ctx.user()?;
    let reservation = Reservation::create(state.pool(), user.user_id(), payload)
        .await
        .map_err(reservation_error)?;

    Ok((StatusCode::CREATED, Json(reservation)))
}

#[utoipa::path(
    get,
    path = "/api/v1/reservations",
    params(ReservationFilter, PaginationQuery),
    responses(
        (status = 200, description = "Reservations visible to the caller", body = crate::model::Page<Reservation>),
    ),
    tag = "reservations",
    security(("cookie" = []))
)]
pub async fn reservation_list_handler(
    ctx: RequestContext,
    State(state): State<AppState>,
    Query(filter): Query<ReservationFilter>,
    Query(page): Query<PaginationQuery>,
) -> WebResult<impl IntoResponse> {
    let user = ctx.user()?;
    let reservations =
        Reservation::search(state.pool(), user, &filter, page.limit(), page.offset())
            .await
            .map_err(reservation_error)?;

    Ok((StatusCode::OK, Json(reservations)))
}

#[utoipa::path(
    get,
    path = "/api/v1/reservations/{id}",
    responses(
        (status = 200, description = "Reservation", body = Reservation),
        (status = 403, description = "Not a participant", body = ErrorResponse),
        (status = 404, description = "Unknown reservation", body = ErrorResponse),
    ),
    tag = "reservations",
    security(("cookie" = []))
)]
pub async fn reservation_get_handler(
    ctx: RequestContext,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> WebResult<impl IntoResponse> {
    let user = ctx.user()?;
    let reservation = find_reservation(&state, id).await?;
    check_participant(user, &reservation).map_err(reservation_error)?;

    Ok((StatusCode::OK, Json(reservation)))
}

#[utoipa::path(
    post,
    path = "/api/v1/reservations/{id}/approve",
    responses(
        (status = 200, description = "Approved, with what happened to the payment", body = ApproveResponse),
        (status = 403, description = "Not the slot's mentor", body = ErrorResponse),
        (status = 409, description = "Not pending or overlapping an approved reservation", body = ErrorResponse),
    ),
    tag = "reservations",
    security(("cookie" = []))
)]
pub async fn reservation_approve_handler(
    ctx: RequestContext,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> WebResult<impl IntoResponse> {
    let user = ctx.user()?;
    let reservation = find_reservation(&state, id).await?;
    require_slot_mentor(user, &reservation)?;

    let approved = Reservation::approve(state.pool(), id, user.user_id())
        .await
        .map_err(reservation_error)?;

    let payment = match state.executor().after_approval(&approved, Utc::now()).await {
        Ok(charge) => Some(charge),
        Err(e) => {
            log_error(&e);
            None
        }
    };

    // the charge may have confirmed the reservation already
    let reservation = match payment {
        Some(ApprovalCharge::Executed { .. }) => find_reservation(&state, id).await?,
        _ => approved,
    };

    Ok((
        StatusCode::OK,
        Json(ApproveResponse {
            reservation,
            payment,
        }),
    ))
}

#[utoipa::path(
    post,
    path = "/api/v1/reservations/{id}/reject",
    request_body = RejectBody,
    responses(
        (status = 200, description = "Rejected, seat released", body = Reservation),
        (status = 409, description = "Not pending", body = ErrorResponse),
    ),
    tag = "reservations",
    security(("cookie" = []))
)]
pub async fn reservation_reject_handler(
    ctx: RequestContext,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<RejectBody>,
) -> WebResult<impl IntoResponse> {
    let user = ctx.user()?;
    let reservation = find_reservation(&state, id).await?;
    require_slot_mentor(user, &reservation)?;

    let rejected = Reservation::reject(state.pool(), id, payload.reason.as_deref())
        .await
        .map_err(reservation_error)?;

    Ok((StatusCode::OK, Json(rejected)))
}

#[utoipa::path(
    post,
    path = "/api/v1/reservations/{id}/cancel",
    request_body = CancelBody,
    responses(
        (status = 200, description = "Canceled", body = CancelResponse),
        (status = 400, description = "Reason not allowed or deadline passed", body = ErrorResponse),
        (status = 403, description = "Not a participant", body = ErrorResponse),
        (status = 409, description = "Already in a terminal state", body = ErrorResponse),
    ),
    tag = "reservations",
    security(("cookie" = []))
)]
pub async fn reservation_cancel_handler(
    ctx: RequestContext,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<CancelBody>,
) -> WebResult<impl IntoResponse> {
    let user = ctx.user()?;
    let reservation = find_reservation(&state, id).await?;
    let actor = cancel_actor(user, &reservation)?;

    reservation.status().transition(ReservationStatus::Canceled)?;
    let decision = cancellation::evaluate(
        actor,
        payload.reason,
        reservation.booked_start_time(),
        Utc::now(),
        reservation.total_amount(),
    )?;

    let canceled = Reservation::cancel(
        state.pool(),
        id,
        user.user_id(),
        payload.reason,
        payload.notes.as_deref(),
    )
    .await
    .map_err(reservation_error)?;

    let refund = Payment::find_by_reservation(state.pool(), id)
        .await
        .map_err(reservation_error)?
        .filter(|p| p.status() == PaymentStatus::Succeeded)
        .map(|p| RefundInfo {
            payment_id: p.id(),
            cancellation_fee: decision.fee,
            refundable_amount: decision.refundable(p.amount()),
        });

    Ok((
        StatusCode::OK,
        Json(CancelResponse {
            reservation: canceled,
            cancellation_fee: decision.fee,
            refund,
        }),
    ))
}

#[utoipa::path(
    post,
    path = "/api/v1/reservations/{id}/complete",
    responses(
        (status = 200, description = "Lesson completed", body = Reservation),
        (status = 409, description = "Not confirmed", body = ErrorResponse),
    ),
    tag = "reservations",
    security(("cookie" = []))
)]
pub async fn reservation_complete_handler(
    ctx: RequestContext,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> WebResult<impl IntoResponse> {
    let user = ctx.user()?;
    let reservation = find_reservation(&state, id).await?;
    require_slot_mentor(user, &reservation)?;

    let completed = Reservation::complete(state.pool(), id)
        .await
        .map_err(reservation_error)?;

    Ok((StatusCode::OK, Json(completed)))
}

#[utoipa::path(
    get,
    path = "/api/v1/reservations/{id}/cancellation-policy",
    responses(
        (status = 200, description = "What canceling now would mean for the caller", body = CancellationPreview),
        (status = 403, description = "Not a participant", body = ErrorResponse),
    ),
    tag = "reservations",
    security(("cookie" = []))
)]
pub async fn reservation_policy_handler(
    ctx: RequestContext,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> WebResult<impl IntoResponse> {
    let user = ctx.user()?;
    let reservation = find_reservation(&state, id).await?;
    let actor = cancel_actor(user, &reservation)?;

    let preview = cancellation::preview(
        actor,
        reservation.booked_start_time(),
        Utc::now(),
        reservation.total_amount(),
    );

    Ok((StatusCode::OK, Json(preview)))
}

#[utoipa::path(
    post,
    path = "/api/v1/reservations/{id}/setup-payment",
    responses(
        (status = 200, description = "Checkout session for saving a card", body = CheckoutSession),
        (status = 403, description = "Not the booking student", body = ErrorResponse),
        (status = 409, description = "Setup already completed or reservation not payable", body = ErrorResponse),
        (status = 502, description = "Payment provider error", body = ErrorResponse),
    ),
    tag = "reservations",
    security(("cookie" = []))
)]
pub async fn reservation_setup_payment_handler(
    ctx: RequestContext,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> WebResult<impl IntoResponse> {
    let user = ctx.user()?;
    let reservation = find_reservation(&state, id).await?;
    if reservation.student_id() != user.user_id() {
        return Err(WebError::resource_forbidden(Reservation::get_resource_type()));
    }

    let student = UserEntity::find_by_id(state.pool(), user, user.user_id())
        .await
        .map_err(reservation_error)?
        .ok_or_else(|| WebError::resource_not_found(UserEntity::get_resource_type()))?;

    let session = setup::start_setup(
        state.pool(),
        state.gateway(),
        state.config().stripe().currency(),
        &reservation,
        &student,
    )
    .await
    .map_err(payment_error)?;

    Ok((StatusCode::OK, Json(session)))
}

#[utoipa::path(
    post,
    path = "/api/v1/reservations/complete-setup",
    request_body = CompleteSetupBody,
    responses(
        (status = 200, description = "Payment method stored", body = Payment),
        (status = 403, description = "Session belongs to someone else", body = ErrorResponse),
        (status = 404, description = "Unknown session", body = ErrorResponse),
    ),
    tag = "reservations",
    security(("cookie" = []))
)]
pub async fn reservation_complete_setup_handler(
    ctx: RequestContext,
    State(state): State<AppState>,
    Json(payload): Json<CompleteSetupBody>,
) -> WebResult<impl IntoResponse> {
    let user = ctx.user()?;
    let student = (!user.is_admin()).then(|| user.user_id());

    let payment = setup::complete_setup(state.pool(), state.gateway(), &payload.session_id, student)
        .await
        .map_err(payment_error)?;

    Ok((StatusCode::OK, Json(payment)))
}
