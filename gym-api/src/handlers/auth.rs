use super::ApiJson;
use crate::auth::AuthUser;
use crate::error::ApiResult;
use crate::services::auth::{self, ProfileUpdate, RegisterRequest, TokenPair};
use crate::state::AppState;
use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use gym_core::{OtpPurpose, User};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Serialize)]
pub struct Registered {
    pub user_id: Uuid,
    pub email: String,
    pub email_verified: bool,
}

#[derive(Debug, Deserialize)]
pub struct VerifyEmailRequest {
    pub email: String,
    pub code: String,
}

#[derive(Debug, Deserialize)]
pub struct ResendRequest {
    pub email: String,
    pub purpose: OtpPurpose,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct GoogleLoginRequest {
    pub id_token: String,
}

#[derive(Debug, Deserialize)]
pub struct RefreshRequest {
    pub refresh_token: String,
}

#[derive(Debug, Deserialize)]
pub struct ForgotPasswordRequest {
    pub email: String,
}

#[derive(Debug, Deserialize)]
pub struct ResetPasswordRequest {
    pub email: String,
    pub code: String,
    pub new_password: String,
}

#[derive(Debug, Deserialize)]
pub struct ChangePasswordRequest {
    pub current_password: String,
    pub new_password: String,
}

pub async fn register(
    State(state): State<AppState>,
    ApiJson(request): ApiJson<RegisterRequest>,
) -> ApiResult<(StatusCode, Json<Registered>)> {
    let user = auth::register(&state, request).await?;
    Ok((
        StatusCode::CREATED,
        Json(Registered {
            user_id: user.id,
            email: user.email,
            email_verified: user.email_verified,
        }),
    ))
}

pub async fn verify_email(
    State(state): State<AppState>,
    ApiJson(request): ApiJson<VerifyEmailRequest>,
) -> ApiResult<Json<TokenPair>> {
    Ok(Json(auth::verify_email(&state, &request.email, &request.code).await?))
}

pub async fn resend_otp(
    State(state): State<AppState>,
    ApiJson(request): ApiJson<ResendRequest>,
) -> ApiResult<StatusCode> {
    auth::resend_otp(&state, &request.email, request.purpose).await?;
    Ok(StatusCode::ACCEPTED)
}

pub async fn login(
    State(state): State<AppState>,
    ApiJson(request): ApiJson<LoginRequest>,
) -> ApiResult<Json<TokenPair>> {
    Ok(Json(auth::login(&state, &request.email, &request.password).await?))
}

pub async fn google_login(
    State(state): State<AppState>,
    ApiJson(request): ApiJson<GoogleLoginRequest>,
) -> ApiResult<Json<TokenPair>> {
    Ok(Json(auth::google_login(&state, &request.id_token).await?))
}

pub async fn refresh(
    State(state): State<AppState>,
    ApiJson(request): ApiJson<RefreshRequest>,
) -> ApiResult<Json<TokenPair>> {
    Ok(Json(auth::refresh(&state, &request.refresh_token).await?))
}

pub async fn logout(
    State(state): State<AppState>,
    ApiJson(request): ApiJson<RefreshRequest>,
) -> ApiResult<StatusCode> {
    auth::logout(&state, &request.refresh_token).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn forgot_password(
    State(state): State<AppState>,
    ApiJson(request): ApiJson<ForgotPasswordRequest>,
) -> ApiResult<StatusCode> {
    auth::forgot_password(&state, &request.email).await?;
    Ok(StatusCode::ACCEPTED)
}

pub async fn reset_password(
    State(state): State<AppState>,
    ApiJson(request): ApiJson<ResetPasswordRequest>,
) -> ApiResult<StatusCode> {
    auth::reset_password(&state, &request.email, &request.code, &request.new_password).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn change_password(
    State(state): State<AppState>,
    caller: AuthUser,
    ApiJson(request): ApiJson<ChangePasswordRequest>,
) -> ApiResult<StatusCode> {
    auth::change_password(
        &state,
        caller.user(),
        &request.current_password,
        &request.new_password,
    )
    .await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn me(AuthUser(user): AuthUser) -> Json<User> {
    Json(user)
}

pub async fn update_me(
    State(state): State<AppState>,
    caller: AuthUser,
    ApiJson(update): ApiJson<ProfileUpdate>,
) -> ApiResult<Json<User>> {
    Ok(Json(auth::update_profile(&state, caller.user(), update).await?))
}
