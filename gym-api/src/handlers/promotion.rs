use super::{ApiJson, ApiPath};
use crate::auth::AuthUser;
use crate::error::ApiResult;
use crate::services::promotion::{self, NewPromotion, PromotionQuote, PromotionUpdate, ValidateRequest};
use crate::state::AppState;
use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use gym_core::Promotion;
use uuid::Uuid;

pub async fn create(
    State(state): State<AppState>,
    caller: AuthUser,
    ApiJson(new_promotion): ApiJson<NewPromotion>,
) -> ApiResult<(StatusCode, Json<Promotion>)> {
    caller.require_admin()?;
    let created = promotion::create(&state, new_promotion).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

pub async fn list(State(state): State<AppState>, caller: AuthUser) -> ApiResult<Json<Vec<Promotion>>> {
    caller.require_admin()?;
    Ok(Json(promotion::list(&state).await?))
}

pub async fn update(
    State(state): State<AppState>,
    caller: AuthUser,
    ApiPath(promotion_id): ApiPath<Uuid>,
    ApiJson(update): ApiJson<PromotionUpdate>,
) -> ApiResult<Json<Promotion>> {
    caller.require_admin()?;
    Ok(Json(promotion::update(&state, promotion_id, update).await?))
}

pub async fn validate(
    State(state): State<AppState>,
    _caller: AuthUser,
    ApiJson(request): ApiJson<ValidateRequest>,
) -> ApiResult<Json<PromotionQuote>> {
    Ok(Json(promotion::quote(&state, request).await?))
}
