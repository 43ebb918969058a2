use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    middleware,
    response::IntoResponse,
    routing::{get, post},
};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    booking::{WeeklyPattern, recurring::parse_time},
    model::{
        CrudRepository, DatabaseError, ResourceTyped, check_access,
        entity::{LessonSlot, LessonSlotCreate, SlotFilter},
    },
    web::{
        AppState, AuthenticatedUser, RequestContext, WebError, WebResult, error::ErrorResponse,
        middlewares, routes::PaginationQuery,
    },
};

#[derive(Debug, Deserialize, utoipa::ToSchema)]
pub struct SlotBody {
    /// Only admins may publish on behalf of another mentor.
    pub mentor_id: Option<Uuid>,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub price: i64,
    pub max_capacity: Option<i32>,
    #[serde(default)]
    pub tags: Vec<String>,
}

#[derive(Debug, Deserialize, utoipa::ToSchema)]
pub struct RecurringSlotBody {
    pub mentor_id: Option<Uuid>,
    /// `HH:MM`, UTC
    pub start_time: String,
    /// `HH:MM`, UTC
    pub end_time: String,
    /// 0 = Sunday .. 6 = Saturday
    pub days_of_week: Vec<u8>,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub price: i64,
    pub max_capacity: Option<i32>,
    #[serde(default)]
    pub tags: Vec<String>,
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct RecurringSlotsResponse {
    pub recurring_id: Uuid,
    pub slots: Vec<LessonSlot>,
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct SeriesCancelResponse {
    pub recurring_id: Uuid,
    pub cancelled: u64,
}

pub fn routes<S>(state: AppState) -> Router<S> {
    Router::new()
        .route("/", get(slot_list_handler).post(slot_create_handler))
        .route("/recurring", post(slot_recurring_handler))
        .route(
            "/recurring/{recurring_id}/cancel",
            post(slot_series_cancel_handler),
        )
        .route(
            "/{id}",
            get(slot_get_handler)
                .put(slot_update_handler)
                .delete(slot_delete_handler),
        )
        .route("/{id}/cancel", post(slot_cancel_handler))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            middlewares::extract_context_fn,
        ))
        .with_state(state)
}

fn slot_error(e: DatabaseError) -> WebError {
    WebError::database(LessonSlot::get_resource_type(), e)
}

/// Mentors publish for themselves, admins for whoever they name.
fn slot_mentor(user: &AuthenticatedUser, requested: Option<Uuid>) -> WebResult<Uuid> {
    user.require_mentor(LessonSlot::get_resource_type())?;
    match requested {
        Some(id) if user.is_admin() => Ok(id),
        Some(id) if id != user.user_id() => {
            Err(WebError::resource_forbidden(LessonSlot::get_resource_type()))
        }
        _ => Ok(user.user_id()),
    }
}

async fn owned_slot(state: &AppState, user: &AuthenticatedUser, id: Uuid) -> WebResult<LessonSlot> {
    let slot = LessonSlot::find_by_id(state.pool(), user, id)
        .await
        .map_err(slot_error)?
        .ok_or_else(|| WebError::resource_not_found(LessonSlot::get_resource_type()))?;
    check_access(state.pool(), user, &slot, user.user_id())
        .await
        .map_err(slot_error)?;
    Ok(slot)
}

#[utoipa::path(
    post,
    path = "/api/v1/slots",
    request_body = SlotBody,
    responses(
        (status = 201, description = "Slot published", body = LessonSlot),
        (status = 400, description = "Invalid time range, price or capacity", body = ErrorResponse),
        (status = 403, description = "Only mentors publish slots", body = ErrorResponse),
        (status = 409, description = "Overlaps another slot of the mentor", body = ErrorResponse),
    ),
    tag = "slots",
    security(("cookie" = []))
)]
pub async fn slot_create_handler(
    ctx: RequestContext,
    State(state): State<AppState>,
    Json(payload): Json<SlotBody>,
) -> WebResult<impl IntoResponse> {
    let user = ctx.user()?;
    let mentor_id = slot_mentor(user, payload.mentor_id)?;

    let data = LessonSlotCreate {
        mentor_id,
        start_time: payload.start_time,
        end_time: payload.end_time,
        price: payload.price,
        max_capacity: payload.max_capacity.unwrap_or(1),
        tags: payload.tags,
        recurring_id: None,
    };
    let slot = LessonSlot::create(state.pool(), user, data)
        .await
        .map_err(slot_error)?;

    Ok((StatusCode::CREATED, Json(slot)))
}

#[utoipa::path(
    post,
    path = "/api/v1/slots/recurring",
    request_body = RecurringSlotBody,
    responses(
        (status = 201, description = "Series published", body = RecurringSlotsResponse),
        (status = 400, description = "Invalid pattern", body = ErrorResponse),
        (status = 409, description = "An occurrence overlaps an existing slot", body = ErrorResponse),
    ),
    tag = "slots",
    security(("cookie" = []))
)]
pub async fn slot_recurring_handler(
    ctx: RequestContext,
    State(state): State<AppState>,
    Json(payload): Json<RecurringSlotBody>,
) -> WebResult<impl IntoResponse> {
    let user = ctx.user()?;
    let mentor_id = slot_mentor(user, payload.mentor_id)?;

    let pattern = WeeklyPattern {
        start_time: parse_time(&payload.start_time)?,
        end_time: parse_time(&payload.end_time)?,
        days_of_week: payload.days_of_week,
        start_date: payload.start_date,
        end_date: payload.end_date,
    };
    let ranges = pattern.expand()?;
    let first = ranges
        .first()
        .ok_or_else(|| WebError::bad_request("Pattern produces no slots."))?;

    let recurring_id = Uuid::new_v4();
    let template = LessonSlotCreate {
        mentor_id,
        start_time: first.start(),
        end_time: first.end(),
        price: payload.price,
        max_capacity: payload.max_capacity.unwrap_or(1),
        tags: payload.tags,
        recurring_id: Some(recurring_id),
    };
    let slots = LessonSlot::create_series(state.pool(), template, &ranges)
        .await
        .map_err(slot_error)?;

    Ok((
        StatusCode::CREATED,
        Json(RecurringSlotsResponse {
            recurring_id,
            slots,
        }),
    ))
}

#[utoipa::path(
    get,
    path = "/api/v1/slots",
    params(SlotFilter, PaginationQuery),
    responses(
        (status = 200, description = "Slots ordered by start time", body = crate::model::Page<LessonSlot>),
    ),
    tag = "slots",
    security(("cookie" = []))
)]
pub async fn slot_list_handler(
    ctx: RequestContext,
    State(state): State<AppState>,
    Query(filter): Query<SlotFilter>,
    Query(page): Query<PaginationQuery>,
) -> WebResult<impl IntoResponse> {
    ctx.user()?;
    let slots = LessonSlot::search(state.pool(), &filter, page.limit(), page.offset())
        .await
        .map_err(slot_error)?;

    Ok((StatusCode::OK, Json(slots)))
}

#[utoipa::path(
    get,
    path = "/api/v1/slots/{id}",
    responses(
        (status = 200, description = "Slot", body = LessonSlot),
        (status = 404, description = "Unknown slot", body = ErrorResponse),
    ),
    tag = "slots",
    security(("cookie" = []))
)]
pub async fn slot_get_handler(
    ctx: RequestContext,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> WebResult<impl IntoResponse> {
    let user = ctx.user()?;
    let slot = LessonSlot::find_by_id(state.pool(), user, id)
        .await
        .map_err(slot_error)?
        .ok_or_else(|| WebError::resource_not_found(LessonSlot::get_resource_type()))?;

    Ok((StatusCode::OK, Json(slot)))
}

#[utoipa::path(
    put,
    path = "/api/v1/slots/{id}",
    request_body = SlotBody,
    responses(
        (status = 200, description = "Slot updated", body = LessonSlot),
        (status = 403, description = "Not the slot's mentor", body = ErrorResponse),
        (status = 409, description = "Booked slots keep their times", body = ErrorResponse),
    ),
    tag = "slots",
    security(("cookie" = []))
)]
pub async fn slot_update_handler(
    ctx: RequestContext,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<SlotBody>,
) -> WebResult<impl IntoResponse> {
    let user = ctx.user()?;
    let slot = owned_slot(&state, user, id).await?;

    let data = LessonSlotCreate {
        mentor_id: slot.mentor_id(),
        start_time: payload.start_time,
        end_time: payload.end_time,
        price: payload.price,
        max_capacity: payload.max_capacity.unwrap_or(slot.max_capacity()),
        tags: payload.tags,
        recurring_id: slot.recurring_id(),
    };
    let updated = slot
        .update(state.pool(), user, data)
        .await
        .map_err(slot_error)?;

    Ok((StatusCode::OK, Json(updated)))
}

#[utoipa::path(
    post,
    path = "/api/v1/slots/{id}/cancel",
    responses(
        (status = 200, description = "Slot cancelled", body = LessonSlot),
        (status = 409, description = "Slot still has active reservations", body = ErrorResponse),
    ),
    tag = "slots",
    security(("cookie" = []))
)]
pub async fn slot_cancel_handler(
    ctx: RequestContext,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> WebResult<impl IntoResponse> {
    let user = ctx.user()?;
    let slot = owned_slot(&state, user, id).await?;
    let cancelled = slot.cancel(state.pool()).await.map_err(slot_error)?;

    Ok((StatusCode::OK, Json(cancelled)))
}

#[utoipa::path(
    delete,
    path = "/api/v1/slots/{id}",
    responses(
        (status = 200, description = "Slot deleted"),
        (status = 409, description = "Slot has reservations", body = ErrorResponse),
    ),
    tag = "slots",
    security(("cookie" = []))
)]
pub async fn slot_delete_handler(
    ctx: RequestContext,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> WebResult<impl IntoResponse> {
    let user = ctx.user()?;
    let slot = owned_slot(&state, user, id).await?;
    slot.delete(state.pool(), user).await.map_err(slot_error)?;

    Ok(StatusCode::OK)
}

#[utoipa::path(
    post,
    path = "/api/v1/slots/recurring/{recurring_id}/cancel",
    responses(
        (status = 200, description = "Future unbooked slots of the series cancelled", body = SeriesCancelResponse),
        (status = 403, description = "Not the series' mentor", body = ErrorResponse),
        (status = 404, description = "Unknown series", body = ErrorResponse),
    ),
    tag = "slots",
    security(("cookie" = []))
)]
pub async fn slot_series_cancel_handler(
    ctx: RequestContext,
    State(state): State<AppState>,
    Path(recurring_id): Path<Uuid>,
) -> WebResult<impl IntoResponse> {
    let user = ctx.user()?;
    let owner = LessonSlot::series_owner(state.pool(), recurring_id)
        .await
        .map_err(slot_error)?
        .ok_or_else(|| WebError::resource_not_found(LessonSlot::get_resource_type()))?;
    if !user.is_admin() && owner != user.user_id() {
        return Err(WebError::resource_forbidden(LessonSlot::get_resource_type()));
    }

    let cancelled = LessonSlot::cancel_series(state.pool(), recurring_id, Utc::now())
        .await
        .map_err(slot_error)?;
    tracing::info!(%recurring_id, cancelled, "slot series cancelled");

    Ok((
        StatusCode::OK,
        Json(SeriesCancelResponse {
            recurring_id,
            cancelled,
        }),
    ))
}
