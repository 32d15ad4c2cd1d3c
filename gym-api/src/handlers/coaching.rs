use super::{ApiJson, ApiPath};
use crate::auth::AuthUser;
use crate::error::ApiResult;
use crate::services::coaching::{self, BookingRequest, CoachRequest, CoachView};
use crate::state::AppState;
use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use gym_core::Booking;
use uuid::Uuid;

pub async fn list_coaches(State(state): State<AppState>) -> ApiResult<Json<Vec<CoachView>>> {
    Ok(Json(coaching::list_coaches(&state).await?))
}

pub async fn upsert_coach(
    State(state): State<AppState>,
    caller: AuthUser,
    ApiJson(request): ApiJson<CoachRequest>,
) -> ApiResult<Json<CoachView>> {
    caller.require_admin()?;
    Ok(Json(coaching::upsert_coach(&state, request).await?))
}

pub async fn book(
    State(state): State<AppState>,
    caller: AuthUser,
    ApiJson(request): ApiJson<BookingRequest>,
) -> ApiResult<(StatusCode, Json<Booking>)> {
    let booking = coaching::book(&state, caller.user(), request).await?;
    Ok((StatusCode::CREATED, Json(booking)))
}

pub async fn my_bookings(
    State(state): State<AppState>,
    caller: AuthUser,
) -> ApiResult<Json<Vec<Booking>>> {
    Ok(Json(coaching::my_bookings(&state, caller.user()).await?))
}

pub async fn coach_bookings(
    State(state): State<AppState>,
    caller: AuthUser,
) -> ApiResult<Json<Vec<Booking>>> {
    Ok(Json(coaching::coach_bookings(&state, caller.user()).await?))
}

pub async fn cancel(
    State(state): State<AppState>,
    caller: AuthUser,
    ApiPath(booking_id): ApiPath<Uuid>,
) -> ApiResult<Json<Booking>> {
    Ok(Json(coaching::cancel(&state, caller.user(), booking_id).await?))
}

pub async fn complete(
    State(state): State<AppState>,
    caller: AuthUser,
    ApiPath(booking_id): ApiPath<Uuid>,
) -> ApiResult<Json<Booking>> {
    Ok(Json(coaching::complete(&state, caller.user(), booking_id).await?))
}
