use crate::error::{ApiError, ApiResult};
use crate::state::AppState;
use gym_core::{Role, User};
use serde::Deserialize;
use tracing::info;
use uuid::Uuid;

const DEFAULT_PAGE_SIZE: usize = 50;
const MAX_PAGE_SIZE: usize = 200;

#[derive(Debug, Deserialize, Default)]
pub struct Page {
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

#[derive(Debug, Deserialize, Default)]
pub struct AdminUserUpdate {
    pub role: Option<Role>,
    pub active: Option<bool>,
}

pub async fn list_users(state: &AppState, page: Page) -> ApiResult<Vec<User>> {
    let limit = page.limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE);
    Ok(state
        .storage
        .list_users(limit, page.offset.unwrap_or(0))
        .await?)
}

/// Changes role or active flag. Deactivation also ends every session of the user.
pub async fn update_user(
    state: &AppState,
    admin: &User,
    user_id: Uuid,
    update: AdminUserUpdate,
) -> ApiResult<User> {
    if admin.id == user_id
        && (update.active == Some(false) || update.role.is_some_and(|r| r != Role::Admin))
    {
        return Err(ApiError::validation(
            "administrators cannot demote or deactivate themselves",
        ));
    }

    let mut user = state
        .storage
        .get_user_by_id(user_id)
        .await?
        .ok_or_else(|| ApiError::not_found("user not found"))?;

    let now = state.clock.now();
    if let Some(role) = update.role {
        user.role = role;
    }
    if let Some(active) = update.active {
        user.active = active;
    }
    user.updated_at = now;
    state.storage.update_user(&user).await?;

    if update.active == Some(false) {
        let revoked = state.storage.revoke_user_refresh_tokens(user.id, now).await?;
        info!("Deactivated user {} ({} sessions revoked)", user.id, revoked);
    }
    Ok(user)
}

/// Creates an already verified administrator (used by the `create-admin` command).
pub async fn create_admin(
    state: &AppState,
    email: &str,
    password: &str,
    full_name: &str,
) -> ApiResult<User> {
    if !crate::auth::password::is_valid_email(email) {
        return Err(ApiError::validation("email address is not valid"));
    }
    crate::auth::password::validate_password(password).map_err(ApiError::Validation)?;

    let mut user = User::new(email, full_name, Role::Admin, state.clock.now());
    user.email_verified = true;
    user.password_hash = Some(crate::services::auth::hash_password(state, password).await?);
    state.storage.create_user(&user).await?;
    info!("Created administrator {}", user.id);
    Ok(user)
}
