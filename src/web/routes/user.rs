use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    middleware,
    response::IntoResponse,
    routing::{get, post, put},
};
use serde::Deserialize;
use tower_cookies::{Cookie, Cookies, cookie::SameSite};
use uuid::Uuid;

use crate::{
    auth::{self, SESSION_DAYS, UserClaims, hash_password, verify_password},
    model::{
        CrudRepository, PaginatableRepository, ResourceTyped, check_access,
        entity::{UserEntity, UserEntityCreateUpdate},
    },
    web::{
        AppState, AuthenticatedUser, RequestContext, UserRole, WebError, WebResult,
        error::ErrorResponse,
        middlewares::{self, AUTH_TOKEN},
        routes::PaginationQuery,
    },
};

#[derive(Debug, Deserialize, utoipa::ToSchema)]
pub struct SignupBody {
    pub username: String,
    pub password: String,
    pub email: Option<String>,
    /// `student` (default) or `mentor`.
    pub role: Option<UserRole>,
}

#[derive(Debug, Deserialize, utoipa::ToSchema)]
pub struct UserCreateUpdateBody {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Deserialize, utoipa::ToSchema)]
pub struct RoleBody {
    pub role: UserRole,
}

pub fn routes<S>(state: AppState) -> Router<S> {
    let protected = Router::new()
        .route("/page", get(user_list_handler))
        .route("/verify", get(user_verify_handler))
        .route("/me", get(user_me_handler))
        .route(
            "/{id}",
            put(user_update_handler).delete(user_delete_handler),
        )
        .route("/{id}/role", put(user_role_handler))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            middlewares::extract_context_fn,
        ));

    Router::new()
        .route("/signup", post(user_signup_handler))
        .route("/signin", post(user_signin_handler))
        .merge(protected)
        .with_state(state)
}

fn user_error(e: crate::model::DatabaseError) -> WebError {
    WebError::database(UserEntity::get_resource_type(), e)
}

fn set_session_cookie(cookies: &Cookies, state: &AppState, user_id: Uuid) -> WebResult<()> {
    let token = auth::generate_token(UserClaims::for_user(user_id), state.config().app().jwt())
        .map_err(|e| WebError::server_crypt_error(e.into()))?;

    let mut cookie = Cookie::new(AUTH_TOKEN, token);
    cookie.set_same_site(SameSite::Lax);
    cookie.set_http_only(true);
    cookie.set_path("/");
    cookie.set_max_age(tower_cookies::cookie::time::Duration::days(SESSION_DAYS));
    cookies.add(cookie);
    Ok(())
}

#[utoipa::path(
    post,
    path = "/api/v1/account/signup",
    request_body = SignupBody,
    description = "Creates a student or mentor account and signs it in",
    responses(
        (status = 200, description = "User created successfully", body = UserEntity),
        (status = 400, description = "Role not allowed", body = ErrorResponse),
        (status = 409, description = "User already exists", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse),
    ),
    tag = "account"
)]
pub async fn user_signup_handler(
    State(state): State<AppState>,
    cookies: Cookies,
    Json(payload): Json<SignupBody>,
) -> WebResult<impl IntoResponse> {
    let role = payload.role.unwrap_or(UserRole::Student);
    if role == UserRole::Admin {
        return Err(WebError::bad_request("Admin accounts cannot sign up."));
    }
    if payload.username.trim().is_empty() || payload.password.is_empty() {
        return Err(WebError::bad_request("Username and password are required."));
    }

    let system = AuthenticatedUser::admin();
    let found = UserEntity::find_by_username(state.pool(), &system, &payload.username)
        .await
        .map_err(user_error)?;
    if found.is_some() {
        return Err(WebError::registration_conflict());
    }

    let hash = hash_password(&payload.password).map_err(WebError::server_crypt_error)?;
    let data = UserEntityCreateUpdate {
        username: payload.username,
        password_hash: hash,
        email: payload.email,
        role,
    };

    let created = UserEntity::create(state.pool(), &system, data)
        .await
        .map_err(user_error)?;
    set_session_cookie(&cookies, &state, created.id())?;

    tracing::info!(user_id = %created.id(), %role, "account created");
    Ok((StatusCode::OK, Json(created)))
}

#[utoipa::path(
    post,
    path = "/api/v1/account/signin",
    description = "Authorizes user in the system",
    request_body = UserCreateUpdateBody,
    responses(
        (status = 200, description = "User signed in", body = UserEntity),
        (status = 401, description = "Credentials invalid", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse),
    ),
    tag = "account",
)]
pub async fn user_signin_handler(
    State(state): State<AppState>,
    cookies: Cookies,
    Json(payload): Json<UserCreateUpdateBody>,
) -> WebResult<impl IntoResponse> {
    let found = UserEntity::find_by_username(state.pool(), &AuthenticatedUser::admin(), &payload.username)
        .await
        .map_err(user_error)?
        .ok_or_else(WebError::auth_invalid_credentials)?;

    let is_verified =
        verify_password(found.hash(), &payload.password).map_err(WebError::server_crypt_error)?;
    if !is_verified {
        return Err(WebError::auth_invalid_credentials());
    }

    set_session_cookie(&cookies, &state, found.id())?;
    Ok((StatusCode::OK, Json(found)))
}

async fn user_verify_handler(ctx: RequestContext) -> WebResult<impl IntoResponse> {
    ctx.user()?;
    Ok(StatusCode::OK)
}

#[utoipa::path(
    get,
    path = "/api/v1/account/me",
    responses(
        (status = 200, description = "Current user", body = UserEntity),
        (status = 401, description = "Not signed in", body = ErrorResponse),
    ),
    tag = "account",
    security(("cookie" = []))
)]
pub async fn user_me_handler(
    ctx: RequestContext,
    State(state): State<AppState>,
) -> WebResult<impl IntoResponse> {
    let user = ctx.user()?;
    let found = UserEntity::find_by_id(state.pool(), user, user.user_id())
        .await
        .map_err(user_error)?
        .ok_or_else(|| WebError::resource_not_found(UserEntity::get_resource_type()))?;

    Ok((StatusCode::OK, Json(found)))
}

#[utoipa::path(
    get,
    path = "/api/v1/account/page",
    params(PaginationQuery),
    responses(
        (status = 200, description = "Returns requested page", body = crate::model::Page<UserEntity>),
        (status = 403, description = "You're not an admin to do this", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse),
    ),
    tag = "account",
    security(("cookie" = []))
)]
pub async fn user_list_handler(
    ctx: RequestContext,
    Query(page): Query<PaginationQuery>,
    State(state): State<AppState>,
) -> WebResult<impl IntoResponse> {
    let user = ctx.user()?;
    user.require_admin(UserEntity::get_resource_type())?;

    let users = UserEntity::page(state.pool(), user, page.limit(), page.offset())
        .await
        .map_err(user_error)?;

    Ok((StatusCode::OK, Json(users)))
}

#[utoipa::path(
    put,
    path = "/api/v1/account/{id}",
    request_body = UserCreateUpdateBody,
    responses(
        (status = 200, description = "User updated successfully", body = UserEntity),
        (status = 401, description = "You're not authorized to do this", body = ErrorResponse),
        (status = 403, description = "You don't have enough permissions to do this", body = ErrorResponse),
        (status = 409, description = "Username taken", body = ErrorResponse),
    ),
    tag = "account",
    security(("cookie" = []))
)]
pub async fn user_update_handler(
    ctx: RequestContext,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<UserCreateUpdateBody>,
) -> WebResult<impl IntoResponse> {
    let user = ctx.user()?;

    let found = UserEntity::find_by_id(state.pool(), user, id)
        .await
        .map_err(user_error)?
        .ok_or_else(|| WebError::resource_not_found(UserEntity::get_resource_type()))?;
    check_access(state.pool(), user, &found, user.user_id())
        .await
        .map_err(user_error)?;

    let conflict = UserEntity::find_by_username(state.pool(), user, &payload.username)
        .await
        .map_err(user_error)?;
    if conflict.is_some_and(|other| other.id() != found.id()) {
        return Err(WebError::registration_conflict());
    }

    let password_hash = if payload.password.is_empty() {
        String::new()
    } else {
        hash_password(&payload.password).map_err(WebError::server_crypt_error)?
    };
    let role = found.role();
    let data = UserEntityCreateUpdate {
        username: payload.username,
        password_hash,
        email: None,
        role,
    };

    let updated = found
        .update(state.pool(), user, data)
        .await
        .map_err(user_error)?;

    Ok((StatusCode::OK, Json(updated)))
}

#[utoipa::path(
    put,
    path = "/api/v1/account/{id}/role",
    request_body = RoleBody,
    responses(
        (status = 200, description = "Role changed", body = UserEntity),
        (status = 403, description = "Admins only", body = ErrorResponse),
        (status = 404, description = "Unknown user", body = ErrorResponse),
    ),
    tag = "account",
    security(("cookie" = []))
)]
pub async fn user_role_handler(
    ctx: RequestContext,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<RoleBody>,
) -> WebResult<impl IntoResponse> {
    let user = ctx.user()?;
    user.require_admin(UserEntity::get_resource_type())?;

    let found = UserEntity::find_by_id(state.pool(), user, id)
        .await
        .map_err(user_error)?
        .ok_or_else(|| WebError::resource_not_found(UserEntity::get_resource_type()))?;

    let updated = found
        .set_role(state.pool(), payload.role)
        .await
        .map_err(user_error)?;

    tracing::info!(user_id = %id, role = %payload.role, "role changed");
    Ok((StatusCode::OK, Json(updated)))
}

#[utoipa::path(
    delete,
    path = "/api/v1/account/{id}",
    description = "Deletes specified user",
    responses(
        (status = 200, description = "User deleted successfully"),
        (status = 401, description = "You're not authorized", body = ErrorResponse),
        (status = 403, description = "You're not allowed to do this", body = ErrorResponse),
        (status = 404, description = "Unknown user", body = ErrorResponse),
    ),
    tag = "account",
    security(("cookie" = []))
)]
pub async fn user_delete_handler(
    ctx: RequestContext,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> WebResult<impl IntoResponse> {
    let user = ctx.user()?;

    let found = UserEntity::find_by_id(state.pool(), user, id)
        .await
        .map_err(user_error)?
        .ok_or_else(|| WebError::resource_not_found(UserEntity::get_resource_type()))?;
    check_access(state.pool(), user, &found, user.user_id())
        .await
        .map_err(user_error)?;

    found.delete(state.pool(), user).await.map_err(user_error)?;

    Ok(StatusCode::OK)
}
