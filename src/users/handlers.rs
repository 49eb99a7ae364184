use axum::{
    extract::{Path, State},
    routing::{get, put},
    Router,
};
use time::{Duration, OffsetDateTime};
use tracing::{info, instrument, warn};

use super::dto::{ListUsersQuery, Pagination, RoleQuery, StatsEnvelope, StatusQuery, UserList};
use crate::{
    auth::{dto::UserEnvelope, AdminUser, CurrentUser},
    error::{AppError, AppResult},
    response::ApiResponse,
    state::AppState,
    validation::{parse_user_id, AppQuery},
};

/// Accounts created within this window count as recent in the stats overview.
const RECENT_WINDOW: Duration = Duration::days(30);

pub fn user_routes() -> Router<AppState> {
    Router::new()
        .route("/users", get(list_users))
        .route("/users/stats/overview", get(get_stats))
        .route("/users/:id", get(get_user).delete(delete_user))
        .route("/users/:id/status", put(set_user_status))
        .route("/users/:id/role", put(set_user_role))
}

fn not_found() -> AppError {
    AppError::NotFound("User not found".into())
}

#[instrument(skip_all, fields(admin_id = %admin.id))]
pub async fn list_users(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
    AppQuery(query): AppQuery<ListUsersQuery>,
) -> AppResult<ApiResponse<UserList>> {
    let params = query.validate()?;
    // Pages past the end saturate to an empty slice.
    let offset = (params.page - 1).saturating_mul(params.limit);

    let (users, total) = state
        .users
        .list(&params.filter, params.limit, offset)
        .await?;

    Ok(ApiResponse::ok(UserList {
        users,
        pagination: Pagination::new(params.page, params.limit, total),
    }))
}

#[instrument(skip_all, fields(caller_id = %caller.id, target_id = %id))]
pub async fn get_user(
    State(state): State<AppState>,
    CurrentUser(caller): CurrentUser,
    Path(id): Path<String>,
) -> AppResult<ApiResponse<UserEnvelope>> {
    let id = parse_user_id(&id)?;
    let user = state.users.find_by_id(id).await?.ok_or_else(not_found)?;

    if caller.id != user.id && !caller.is_admin() {
        warn!("user lookup outside own record");
        return Err(AppError::Forbidden("Access denied".into()));
    }

    Ok(ApiResponse::ok(UserEnvelope { user }))
}

#[instrument(skip_all, fields(admin_id = %admin.id, target_id = %id))]
pub async fn set_user_status(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
    Path(id): Path<String>,
    AppQuery(query): AppQuery<StatusQuery>,
) -> AppResult<ApiResponse<UserEnvelope>> {
    let id = parse_user_id(&id)?;
    let is_active = query.validate()?;

    if id == admin.id && !is_active {
        return Err(AppError::InvalidOperation(
            "Cannot deactivate your own account".into(),
        ));
    }

    let user = state
        .users
        .set_status(id, is_active)
        .await?
        .ok_or_else(not_found)?;

    let verb = if is_active { "activated" } else { "deactivated" };
    info!(is_active, "user status changed");
    Ok(ApiResponse::ok(UserEnvelope { user }).with_message(format!("User {verb} successfully")))
}

#[instrument(skip_all, fields(admin_id = %admin.id, target_id = %id))]
pub async fn set_user_role(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
    Path(id): Path<String>,
    AppQuery(query): AppQuery<RoleQuery>,
) -> AppResult<ApiResponse<UserEnvelope>> {
    let id = parse_user_id(&id)?;
    let role = query.validate()?;

    if id == admin.id {
        return Err(AppError::InvalidOperation("Cannot change your own role".into()));
    }

    let user = state.users.set_role(id, role).await?.ok_or_else(not_found)?;

    info!(%role, "user role changed");
    Ok(ApiResponse::ok(UserEnvelope { user })
        .with_message(format!("User role updated to {role} successfully")))
}

#[instrument(skip_all, fields(admin_id = %admin.id, target_id = %id))]
pub async fn delete_user(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
    Path(id): Path<String>,
) -> AppResult<ApiResponse<()>> {
    let id = parse_user_id(&id)?;

    if id == admin.id {
        return Err(AppError::InvalidOperation("Cannot delete your own account".into()));
    }

    if !state.users.delete(id).await? {
        return Err(not_found());
    }

    info!("user deleted");
    Ok(ApiResponse::message("User deleted successfully"))
}

#[instrument(skip_all, fields(admin_id = %admin.id))]
pub async fn get_stats(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
) -> AppResult<ApiResponse<StatsEnvelope>> {
    let since = OffsetDateTime::now_utc() - RECENT_WINDOW;
    let stats = state.users.stats(since).await?;
    Ok(ApiResponse::ok(StatsEnvelope { stats }))
}
