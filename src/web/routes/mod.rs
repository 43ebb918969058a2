use crate::web::{AppState, doc::ApiDoc};
use axum::Router;
use serde::Deserialize;
use tower_cookies::CookieManagerLayer;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

pub mod cron;
pub mod mentors;
pub mod notes;
pub mod payments;
pub mod reservations;
pub mod slots;
pub mod subscriptions;
pub mod user;
pub mod webhooks;

pub const DEFAULT_PAGE_LIMIT: i64 = 20;
pub const MAX_PAGE_LIMIT: i64 = 100;

#[derive(Debug, Clone, Default, Deserialize, utoipa::IntoParams)]
pub struct PaginationQuery {
    limit: Option<i64>,
    offset: Option<i64>,
}

impl PaginationQuery {
    pub fn limit(&self) -> i64 {
        self.limit.unwrap_or(DEFAULT_PAGE_LIMIT).clamp(1, MAX_PAGE_LIMIT)
    }

    pub fn offset(&self) -> i64 {
        self.offset.unwrap_or(0).max(0)
    }
}

pub fn build_app<S: Send + Sync + Clone + 'static>(state: AppState) -> Router<S> {
    let docs = state.config().app().docs();

    let mut router = Router::new()
        .nest("/api/v1/account", user::routes(state.clone()))
        .nest("/api/v1/slots", slots::routes(state.clone()))
        .nest("/api/v1/reservations", reservations::routes(state.clone()))
        .nest("/api/v1/payments", payments::routes(state.clone()))
        .nest("/api/v1/subscriptions", subscriptions::routes(state.clone()))
        .nest("/api/v1/webhooks", webhooks::routes(state.clone()))
        .nest("/api/v1/cron", cron::routes(state.clone()))
        .nest("/api/v1/muednote", notes::routes(state.clone()))
        .nest("/api/v1/mentors", mentors::routes(state.clone()))
        .layer(CookieManagerLayer::default())
        .layer(CorsLayer::very_permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    if docs {
        router = router.merge(SwaggerUi::new("/api/v1/docs").url("/api-doc/openapi.json", ApiDoc::openapi()));
    }

    router
}
