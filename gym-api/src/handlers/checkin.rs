use super::{ApiJson, ApiQuery};
use crate::auth::AuthUser;
use crate::error::ApiResult;
use crate::services::checkin::{self, CheckInValidation};
use crate::state::AppState;
use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use chrono::NaiveDate;
use gym_core::CheckIn;
use serde::Deserialize;
use uuid::Uuid;

#[derive(Debug, Deserialize, Default)]
pub struct CheckInRequest {
    pub member_id: Option<Uuid>,
}

#[derive(Debug, Deserialize)]
pub struct ValidateRequest {
    pub member_id: Uuid,
}

#[derive(Debug, Deserialize, Default)]
pub struct DayQuery {
    pub date: Option<NaiveDate>,
}

pub async fn check_in(
    State(state): State<AppState>,
    caller: AuthUser,
    ApiJson(request): ApiJson<CheckInRequest>,
) -> ApiResult<(StatusCode, Json<CheckIn>)> {
    let record = checkin::check_in(&state, caller.user(), request.member_id).await?;
    Ok((StatusCode::CREATED, Json(record)))
}

pub async fn validate(
    State(state): State<AppState>,
    caller: AuthUser,
    ApiJson(request): ApiJson<ValidateRequest>,
) -> ApiResult<Json<CheckInValidation>> {
    caller.require_staff()?;
    Ok(Json(checkin::validate(&state, request.member_id).await?))
}

pub async fn my_history(
    State(state): State<AppState>,
    caller: AuthUser,
) -> ApiResult<Json<Vec<CheckIn>>> {
    Ok(Json(checkin::my_history(&state, caller.user()).await?))
}

pub async fn list_for_day(
    State(state): State<AppState>,
    caller: AuthUser,
    ApiQuery(query): ApiQuery<DayQuery>,
) -> ApiResult<Json<Vec<CheckIn>>> {
    caller.require_staff()?;
    Ok(Json(checkin::list_for_day(&state, query.date).await?))
}
