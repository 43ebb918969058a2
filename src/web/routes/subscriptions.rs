use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    middleware,
    response::IntoResponse,
    routing::{get, post},
};
use serde::{Deserialize, Serialize};

use crate::{
    booking::{SubscriptionTier, UsageLimits},
    model::{
        CrudRepository, ResourceTyped,
        entity::{Subscription, UserEntity},
    },
    payments::{CheckoutSession, setup},
    web::{AppState, RequestContext, WebError, WebResult, error::ErrorResponse, middlewares},
};

#[derive(Debug, Deserialize, utoipa::ToSchema)]
pub struct CheckoutBody {
    /// `starter`, `basic` or `premium`
    pub tier: String,
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct SubscriptionOverview {
    /// Absent for users that never subscribed; they count as freemium.
    pub subscription: Option<Subscription>,
    pub limits: UsageLimits,
}

pub fn routes<S>(state: AppState) -> Router<S> {
    Router::new()
        .route("/me", get(subscription_me_handler))
        .route("/checkout", post(subscription_checkout_handler))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            middlewares::extract_context_fn,
        ))
        .with_state(state)
}

#[utoipa::path(
    get,
    path = "/api/v1/subscriptions/me",
    responses(
        (status = 200, description = "Subscription and reservation quota", body = SubscriptionOverview),
        (status = 401, description = "Not signed in", body = ErrorResponse),
    ),
    tag = "subscriptions",
    security(("cookie" = []))
)]
pub async fn subscription_me_handler(
    ctx: RequestContext,
    State(state): State<AppState>,
) -> WebResult<impl IntoResponse> {
    let user = ctx.user()?;
    let subscription = Subscription::find_by_user(state.pool(), user.user_id())
        .await
        .map_err(|e| WebError::database(Subscription::get_resource_type(), e))?;

    let limits = subscription
        .as_ref()
        .map(Subscription::limits)
        .unwrap_or_else(|| UsageLimits::new(SubscriptionTier::Freemium, 0));

    Ok((
        StatusCode::OK,
        Json(SubscriptionOverview {
            subscription,
            limits,
        }),
    ))
}

#[utoipa::path(
    post,
    path = "/api/v1/subscriptions/checkout",
    request_body = CheckoutBody,
    responses(
        (status = 200, description = "Subscription checkout session", body = CheckoutSession),
        (status = 400, description = "Tier cannot be purchased", body = ErrorResponse),
        (status = 502, description = "Payment provider error", body = ErrorResponse),
    ),
    tag = "subscriptions",
    security(("cookie" = []))
)]
pub async fn subscription_checkout_handler(
    ctx: RequestContext,
    State(state): State<AppState>,
    Json(payload): Json<CheckoutBody>,
) -> WebResult<impl IntoResponse> {
    let user = ctx.user()?;
    let tier: SubscriptionTier = payload.tier.parse()?;
    let account = UserEntity::find_by_id(state.pool(), user, user.user_id())
        .await
        .map_err(|e| WebError::database(UserEntity::get_resource_type(), e))?
        .ok_or_else(|| WebError::resource_not_found(UserEntity::get_resource_type()))?;

    let session = setup::start_subscription_checkout(
        state.pool(),
        state.gateway(),
        state.config().stripe(),
        &account,
        tier,
    )
    .await
    .map_err(|e| WebError::payment(Subscription::get_resource_type(), e))?;

    tracing::info!(user_id = %account.id(), %tier, "subscription checkout started");
    Ok((StatusCode::OK, Json(session)))
}
