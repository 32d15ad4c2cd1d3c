use super::{ApiJson, ApiPath, ApiQuery};
use crate::auth::AuthUser;
use crate::error::ApiResult;
use crate::services::users::{self, AdminUserUpdate, Page};
use crate::state::AppState;
use axum::extract::State;
use axum::Json;
use gym_core::User;
use uuid::Uuid;

pub async fn list_users(
    State(state): State<AppState>,
    caller: AuthUser,
    ApiQuery(page): ApiQuery<Page>,
) -> ApiResult<Json<Vec<User>>> {
    caller.require_admin()?;
    Ok(Json(users::list_users(&state, page).await?))
}

pub async fn update_user(
    State(state): State<AppState>,
    caller: AuthUser,
    ApiPath(user_id): ApiPath<Uuid>,
    ApiJson(update): ApiJson<AdminUserUpdate>,
) -> ApiResult<Json<User>> {
    caller.require_admin()?;
    Ok(Json(users::update_user(&state, caller.user(), user_id, update).await?))
}
