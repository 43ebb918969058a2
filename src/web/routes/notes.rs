//! MUEDnote: practice sessions, the fragments jotted down during them and the projects grouping them.

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    middleware,
    response::IntoResponse,
    routing::get,
};
use uuid::Uuid;

use crate::{
    model::{
        CrudRepository, DatabaseError, ResourceTyped, check_access,
        entity::{
            NoteFragment, NoteFragmentCreate, NoteFragmentFilter, NoteProject, NoteProjectData,
            NoteProjectSummary, NoteSession, NoteSessionCreate, NoteSessionFilter,
        },
    },
    web::{
        AppState, AuthenticatedUser, RequestContext, WebError, WebResult, error::ErrorResponse,
        middlewares, routes::PaginationQuery,
    },
};

pub fn routes<S>(state: AppState) -> Router<S> {
    Router::new()
        .route(
            "/sessions",
            get(session_list_handler).post(session_create_handler),
        )
        .route(
            "/sessions/{id}",
            get(session_get_handler)
                .put(session_update_handler)
                .delete(session_delete_handler),
        )
        .route(
            "/fragments",
            get(fragment_list_handler).post(fragment_create_handler),
        )
        .route(
            "/fragments/{id}",
            axum::routing::put(fragment_update_handler).delete(fragment_delete_handler),
        )
        .route(
            "/projects",
            get(project_list_handler).post(project_create_handler),
        )
        .route(
            "/projects/{id}",
            axum::routing::put(project_update_handler).delete(project_delete_handler),
        )
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            middlewares::extract_context_fn,
        ))
        .with_state(state)
}

fn session_error(e: DatabaseError) -> WebError {
    WebError::database(NoteSession::get_resource_type(), e)
}

fn fragment_error(e: DatabaseError) -> WebError {
    WebError::database(NoteFragment::get_resource_type(), e)
}

async fn owned_session(
    state: &AppState,
    user: &AuthenticatedUser,
    id: Uuid,
) -> WebResult<NoteSession> {
    let session = NoteSession::find_by_id(state.pool(), user, id)
        .await
        .map_err(session_error)?
        .ok_or_else(|| WebError::resource_not_found(NoteSession::get_resource_type()))?;
    check_access(state.pool(), user, &session, user.user_id())
        .await
        .map_err(session_error)?;
    Ok(session)
}

fn project_error(e: DatabaseError) -> WebError {
    WebError::database(NoteProject::get_resource_type(), e)
}

async fn owned_project(
    state: &AppState,
    user: &AuthenticatedUser,
    id: Uuid,
) -> WebResult<NoteProject> {
    let project = NoteProject::find_by_id(state.pool(), user, id)
        .await
        .map_err(project_error)?
        .ok_or_else(|| WebError::resource_not_found(NoteProject::get_resource_type()))?;
    check_access(state.pool(), user, &project, user.user_id())
        .await
        .map_err(project_error)?;
    Ok(project)
}

/// Session and project a fragment points at must belong to the same user.
async fn check_fragment_links(
    state: &AppState,
    user: &AuthenticatedUser,
    payload: &NoteFragmentCreate,
) -> WebResult<()> {
    if let Some(session_id) = payload.session_id {
        owned_session(state, user, session_id).await?;
    }
    if let Some(project_id) = payload.project_id {
        owned_project(state, user, project_id).await?;
    }
    Ok(())
}

async fn owned_fragment(
    state: &AppState,
    user: &AuthenticatedUser,
    id: Uuid,
) -> WebResult<NoteFragment> {
    let fragment = NoteFragment::find_by_id(state.pool(), user, id)
        .await
        .map_err(fragment_error)?
        .ok_or_else(|| WebError::resource_not_found(NoteFragment::get_resource_type()))?;
    check_access(state.pool(), user, &fragment, user.user_id())
        .await
        .map_err(fragment_error)?;
    Ok(fragment)
}

#[utoipa::path(
    post,
    path = "/api/v1/muednote/sessions",
    request_body = NoteSessionCreate,
    responses(
        (status = 201, description = "Session created", body = NoteSession),
        (status = 400, description = "Invalid title", body = ErrorResponse),
    ),
    tag = "muednote",
    security(("cookie" = []))
)]
pub async fn session_create_handler(
    ctx: RequestContext,
    State(state): State<AppState>,
    Json(mut payload): Json<NoteSessionCreate>,
) -> WebResult<impl IntoResponse> {
    let user = ctx.user()?;
    payload.user_id = user.user_id();

    let session = NoteSession::create(state.pool(), user, payload)
        .await
        .map_err(session_error)?;

    Ok((StatusCode::CREATED, Json(session)))
}

#[utoipa::path(
    get,
    path = "/api/v1/muednote/sessions",
    params(NoteSessionFilter, PaginationQuery),
    responses(
        (status = 200, description = "Own sessions, newest first", body = crate::model::Page<NoteSession>),
    ),
    tag = "muednote",
    security(("cookie" = []))
)]
pub async fn session_list_handler(
    ctx: RequestContext,
    State(state): State<AppState>,
    Query(filter): Query<NoteSessionFilter>,
    Query(page): Query<PaginationQuery>,
) -> WebResult<impl IntoResponse> {
    let user = ctx.user()?;
    let sessions = NoteSession::search(state.pool(), user, &filter, page.limit(), page.offset())
        .await
        .map_err(session_error)?;

    Ok((StatusCode::OK, Json(sessions)))
}

#[utoipa::path(
    get,
    path = "/api/v1/muednote/sessions/{id}",
    responses(
        (status = 200, description = "Session", body = NoteSession),
        (status = 403, description = "Someone else's session", body = ErrorResponse),
        (status = 404, description = "Unknown session", body = ErrorResponse),
    ),
    tag = "muednote",
    security(("cookie" = []))
)]
pub async fn session_get_handler(
    ctx: RequestContext,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> WebResult<impl IntoResponse> {
    let user = ctx.user()?;
    let session = owned_session(&state, user, id).await?;

    Ok((StatusCode::OK, Json(session)))
}

#[utoipa::path(
    put,
    path = "/api/v1/muednote/sessions/{id}",
    request_body = NoteSessionCreate,
    responses(
        (status = 200, description = "Session updated", body = NoteSession),
        (status = 403, description = "Someone else's session", body = ErrorResponse),
    ),
    tag = "muednote",
    security(("cookie" = []))
)]
pub async fn session_update_handler(
    ctx: RequestContext,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(mut payload): Json<NoteSessionCreate>,
) -> WebResult<impl IntoResponse> {
    let user = ctx.user()?;
    let session = owned_session(&state, user, id).await?;
    payload.user_id = session.user_id();

    let updated = session
        .update(state.pool(), user, payload)
        .await
        .map_err(session_error)?;

    Ok((StatusCode::OK, Json(updated)))
}

#[utoipa::path(
    delete,
    path = "/api/v1/muednote/sessions/{id}",
    responses(
        (status = 200, description = "Session deleted"),
        (status = 403, description = "Someone else's session", body = ErrorResponse),
    ),
    tag = "muednote",
    security(("cookie" = []))
)]
pub async fn session_delete_handler(
    ctx: RequestContext,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> WebResult<impl IntoResponse> {
    let user = ctx.user()?;
    let session = owned_session(&state, user, id).await?;
    session
        .delete(state.pool(), user)
        .await
        .map_err(session_error)?;

    Ok(StatusCode::OK)
}

#[utoipa::path(
    post,
    path = "/api/v1/muednote/fragments",
    request_body = NoteFragmentCreate,
    responses(
        (status = 201, description = "Fragment stored", body = NoteFragment),
        (status = 400, description = "Empty or oversized content", body = ErrorResponse),
        (status = 403, description = "Session or project belongs to someone else", body = ErrorResponse),
    ),
    tag = "muednote",
    security(("cookie" = []))
)]
pub async fn fragment_create_handler(
    ctx: RequestContext,
    State(state): State<AppState>,
    Json(mut payload): Json<NoteFragmentCreate>,
) -> WebResult<impl IntoResponse> {
    let user = ctx.user()?;
    check_fragment_links(&state, user, &payload).await?;
    payload.user_id = user.user_id();

    let fragment = NoteFragment::create(state.pool(), user, payload)
        .await
        .map_err(fragment_error)?;

    Ok((StatusCode::CREATED, Json(fragment)))
}

#[utoipa::path(
    get,
    path = "/api/v1/muednote/fragments",
    params(NoteFragmentFilter),
    responses(
        (status = 200, description = "Own fragments, newest first", body = crate::model::Page<NoteFragment>),
    ),
    tag = "muednote",
    security(("cookie" = []))
)]
pub async fn fragment_list_handler(
    ctx: RequestContext,
    State(state): State<AppState>,
    Query(filter): Query<NoteFragmentFilter>,
) -> WebResult<impl IntoResponse> {
    let user = ctx.user()?;
    let fragments = NoteFragment::search(state.pool(), user, &filter)
        .await
        .map_err(fragment_error)?;

    Ok((StatusCode::OK, Json(fragments)))
}

#[utoipa::path(
    put,
    path = "/api/v1/muednote/fragments/{id}",
    request_body = NoteFragmentCreate,
    responses(
        (status = 200, description = "Fragment updated", body = NoteFragment),
        (status = 403, description = "Someone else's fragment", body = ErrorResponse),
    ),
    tag = "muednote",
    security(("cookie" = []))
)]
pub async fn fragment_update_handler(
    ctx: RequestContext,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(mut payload): Json<NoteFragmentCreate>,
) -> WebResult<impl IntoResponse> {
    let user = ctx.user()?;
    let fragment = owned_fragment(&state, user, id).await?;
    check_fragment_links(&state, user, &payload).await?;
    payload.user_id = user.user_id();

    let updated = fragment
        .update(state.pool(), user, payload)
        .await
        .map_err(fragment_error)?;

    Ok((StatusCode::OK, Json(updated)))
}

#[utoipa::path(
    delete,
    path = "/api/v1/muednote/fragments/{id}",
    responses(
        (status = 200, description = "Fragment deleted"),
        (status = 403, description = "Someone else's fragment", body = ErrorResponse),
    ),
    tag = "muednote",
    security(("cookie" = []))
)]
pub async fn fragment_delete_handler(
    ctx: RequestContext,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> WebResult<impl IntoResponse> {
    let user = ctx.user()?;
    let fragment = owned_fragment(&state, user, id).await?;
    fragment
        .delete(state.pool(), user)
        .await
        .map_err(fragment_error)?;

    Ok(StatusCode::OK)
}

#[utoipa::path(
    post,
    path = "/api/v1/muednote/projects",
    request_body = NoteProjectData,
    responses(
        (status = 201, description = "Project created", body = NoteProject),
        (status = 400, description = "Missing name or invalid color", body = ErrorResponse),
    ),
    tag = "muednote",
    security(("cookie" = []))
)]
pub async fn project_create_handler(
    ctx: RequestContext,
    State(state): State<AppState>,
    Json(mut payload): Json<NoteProjectData>,
) -> WebResult<impl IntoResponse> {
    let user = ctx.user()?;
    payload.user_id = user.user_id();

    let project = NoteProject::create(state.pool(), user, payload)
        .await
        .map_err(project_error)?;

    Ok((StatusCode::CREATED, Json(project)))
}

#[utoipa::path(
    get,
    path = "/api/v1/muednote/projects",
    responses(
        (status = 200, description = "Own active projects with fragment counts, newest first", body = Vec<NoteProjectSummary>),
    ),
    tag = "muednote",
    security(("cookie" = []))
)]
pub async fn project_list_handler(
    ctx: RequestContext,
    State(state): State<AppState>,
) -> WebResult<impl IntoResponse> {
    let user = ctx.user()?;
    let projects = NoteProject::with_fragment_counts(state.pool(), user)
        .await
        .map_err(project_error)?;

    Ok((StatusCode::OK, Json(projects)))
}

#[utoipa::path(
    put,
    path = "/api/v1/muednote/projects/{id}",
    request_body = NoteProjectData,
    responses(
        (status = 200, description = "Project updated", body = NoteProject),
        (status = 400, description = "Nothing to update", body = ErrorResponse),
        (status = 403, description = "Someone else's project", body = ErrorResponse),
        (status = 404, description = "Unknown project", body = ErrorResponse),
    ),
    tag = "muednote",
    security(("cookie" = []))
)]
pub async fn project_update_handler(
    ctx: RequestContext,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<NoteProjectData>,
) -> WebResult<impl IntoResponse> {
    let user = ctx.user()?;
    let project = owned_project(&state, user, id).await?;

    let updated = project
        .update(state.pool(), user, payload)
        .await
        .map_err(project_error)?;

    Ok((StatusCode::OK, Json(updated)))
}

#[utoipa::path(
    delete,
    path = "/api/v1/muednote/projects/{id}",
    responses(
        (status = 200, description = "Project deactivated"),
        (status = 403, description = "Someone else's project", body = ErrorResponse),
        (status = 404, description = "Unknown project", body = ErrorResponse),
    ),
    tag = "muednote",
    security(("cookie" = []))
)]
pub async fn project_delete_handler(
    ctx: RequestContext,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> WebResult<impl IntoResponse> {
    let user = ctx.user()?;
    let project = owned_project(&state, user, id).await?;
    project
        .delete(state.pool(), user)
        .await
        .map_err(project_error)?;

    Ok(StatusCode::OK)
}
