use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use tower_cookies::Cookies;

use crate::{
    auth,
    model::{CrudRepository, ResourceTyped, entity::UserEntity},
    web::{AppState, RequestContext, context::AuthenticatedUser, error::WebError},
};

pub static AUTH_TOKEN: &str = "SID";

/// Resolves the session cookie into a [`RequestContext`]. A cookie whose user
/// no longer exists yields an anonymous context.
pub async fn extract_context_fn(
    State(state): State<AppState>,
    cookies: Cookies,
    mut req: Request,
    next: Next,
) -> Result<Response, WebError> {
    let Some(token) = cookies.get(AUTH_TOKEN) else {
        req.extensions_mut().insert(RequestContext::new(None));
        return Ok(next.run(req).await);
    };

    let claims = auth::process_token(token.value(), state.config().app().jwt())
        .map_err(|e| WebError::auth_cookie_invalid(AUTH_TOKEN, e))?
        .claims;

    let user = match claims.user_id() {
        Some(id) => UserEntity::find_by_id(state.pool(), &AuthenticatedUser::admin(), id)
            .await
            .map_err(|e| WebError::resource_fetch_error(UserEntity::get_resource_type(), e))?,
        None => None,
    };

    let ctx = user.map(|u| AuthenticatedUser::new(u.id(), u.role()));
    req.extensions_mut().insert(RequestContext::new(ctx));
    Ok(next.run(req).await)
}
