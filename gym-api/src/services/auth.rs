use crate::auth::google::GoogleError;
use crate::auth::password::{is_valid_email, validate_password};
use crate::auth::secrets::{generate_otp_code, generate_refresh_token, sha256_hex};
use crate::error::{ApiError, ApiResult};
use crate::mail::MailMessage;
use crate::metrics::{increment, MetricName};
use crate::state::AppState;
use chrono::Duration;
use gym_core::{normalize_email, OtpCode, OtpPurpose, RefreshToken, Role, User};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, Serialize, Deserialize)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
    pub expires_in: i64,
}

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
    pub full_name: String,
    pub phone: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
pub struct ProfileUpdate {
    pub full_name: Option<String>,
    pub phone: Option<String>,
}

const INVALID_CODE: &str = "invalid or expired code";
const INVALID_CREDENTIALS: &str = "invalid email or password";

fn otp_mail(purpose: OtpPurpose, to: &str, code: &str, ttl_secs: i64) -> MailMessage {
    let minutes = (ttl_secs / 60).max(1);
    let (subject, action) = match purpose {
        OtpPurpose::EmailVerification => ("Verify your email", "verify your email address"),
        OtpPurpose::PasswordReset => ("Reset your password", "reset your password"),
    };
    MailMessage {
        to: to.to_string(),
        subject: subject.to_string(),
        text_body: format!(
            "Use the code {code} to {action}. It expires in {minutes} minutes.\n\
             If you did not request this, you can ignore this email."
        ),
    }
}

/// Stores a fresh code for `(user, purpose)`, replacing any previous one, and mails it.
///
/// Fails with 429 while the previous code is inside its resend cooldown.
pub async fn issue_otp(state: &AppState, user: &User, purpose: OtpPurpose) -> ApiResult<()> {
    let now = state.clock.now();
    let settings = &state.settings.otp;

    if let Some(existing) = state.storage.get_otp(user.id, purpose).await? {
        let ready_at = existing.last_sent_at + Duration::seconds(settings.resend_cooldown_secs);
        if now < ready_at {
            let wait = (ready_at - now).num_seconds().max(1);
            return Err(ApiError::TooManyRequests {
                message: format!("please wait {wait} seconds before requesting another code"),
                retry_after_secs: wait as u64,
            });
        }
    }

    let code = generate_otp_code(settings.length);
    let otp = OtpCode {
        id: Uuid::new_v4(),
        user_id: user.id,
        purpose,
        code_hash: sha256_hex(&code),
        expires_at: now + Duration::seconds(settings.ttl_secs),
        attempts: 0,
        last_sent_at: now,
        created_at: now,
    };
    state.storage.save_otp(&otp).await?;
    increment(MetricName::OtpIssued);

    let message = otp_mail(purpose, &user.email, &code, settings.ttl_secs);
    state.mailer.send(&message).await.map_err(|e| {
        warn!("Failed to send {} code to user {}: {}", purpose, user.id, e);
        ApiError::Gateway("could not deliver the verification email".to_string())
    })?;
    Ok(())
}

/// Consumes a code. Wrong guesses count against `max_attempts`; the last allowed miss deletes the code.
pub async fn verify_otp(
    state: &AppState,
    user: &User,
    purpose: OtpPurpose,
    code: &str,
) -> ApiResult<()> {
    let now = state.clock.now();
    let Some(mut otp) = state.storage.get_otp(user.id, purpose).await? else {
        return Err(ApiError::validation(INVALID_CODE));
    };

    if now >= otp.expires_at {
        state.storage.delete_otp(otp.id).await?;
        return Err(ApiError::validation(INVALID_CODE));
    }

    if sha256_hex(code.trim()) == otp.code_hash {
        state.storage.delete_otp(otp.id).await?;
        return Ok(());
    }

    increment(MetricName::OtpFailed);
    otp.attempts += 1;
    if otp.attempts >= state.settings.otp.max_attempts {
        state.storage.delete_otp(otp.id).await?;
        return Err(ApiError::TooManyRequests {
            message: "too many incorrect attempts, request a new code".to_string(),
            retry_after_secs: 0,
        });
    }
    state.storage.update_otp(&otp).await?;
    Err(ApiError::validation(INVALID_CODE))
}

/// Signs an access token and stores the hash of a new refresh token in `family_id`.
pub async fn issue_tokens(
    state: &AppState,
    user: &User,
    family_id: Option<Uuid>,
) -> ApiResult<TokenPair> {
    let now = state.clock.now();
    let access_token = state
        .jwt
        .issue(user, now)
        .map_err(|e| ApiError::Internal(e.into()))?;

    let refresh_token = generate_refresh_token();
    let record = RefreshToken {
        id: Uuid::new_v4(),
        user_id: user.id,
        token_hash: sha256_hex(&refresh_token),
        family_id: family_id.unwrap_or_else(Uuid::new_v4),
        expires_at: now + Duration::days(state.settings.auth.refresh_token_ttl_days),
        revoked_at: None,
        created_at: now,
    };
    state.storage.create_refresh_token(&record).await?;

    Ok(TokenPair {
        access_token,
        refresh_token,
        token_type: "Bearer".to_string(),
        expires_in: state.jwt.ttl_secs(),
    })
}

pub(crate) async fn hash_password(state: &AppState, password: &str) -> ApiResult<String> {
    state
        .passwords
        .hash(password)
        .await
        .map_err(|e| ApiError::Internal(e.into()))
}

/// Accounts created through Google have no password and never match.
async fn password_matches(state: &AppState, user: &User, password: &str) -> bool {
    match user.password_hash.as_deref() {
        Some(hash) => state.passwords.verify(password, hash).await,
        None => false,
    }
}

pub async fn register(state: &AppState, request: RegisterRequest) -> ApiResult<User> {
    if !is_valid_email(&request.email) {
        return Err(ApiError::validation("email address is not valid"));
    }
    validate_password(&request.password).map_err(ApiError::Validation)?;
    if request.full_name.trim().is_empty() {
        return Err(ApiError::validation("full_name is required"));
    }

    if state
        .storage
        .get_user_by_email(&request.email)
        .await?
        .is_some()
    {
        return Err(ApiError::conflict("an account with this email already exists"));
    }

    let now = state.clock.now();
    let mut user = User::new(&request.email, &request.full_name, Role::Member, now);
    user.phone = request.phone.map(|p| p.trim().to_string()).filter(|p| !p.is_empty());
    user.password_hash = Some(hash_password(state, &request.password).await?);
    state.storage.create_user(&user).await?;
    increment(MetricName::Registrations);
    info!("Registered user {}", user.id);

    issue_otp(state, &user, OtpPurpose::EmailVerification).await?;
    Ok(user)
}

pub async fn verify_email(state: &AppState, email: &str, code: &str) -> ApiResult<TokenPair> {
    let mut user = state
        .storage
        .get_user_by_email(email)
        .await?
        .ok_or_else(|| ApiError::validation(INVALID_CODE))?;

    verify_otp(state, &user, OtpPurpose::EmailVerification, code).await?;

    user.email_verified = true;
    user.updated_at = state.clock.now();
    state.storage.update_user(&user).await?;
    info!("Verified email for user {}", user.id);
    issue_tokens(state, &user, None).await
}

/// Resends a code. Unknown emails and already verified accounts succeed silently.
pub async fn resend_otp(state: &AppState, email: &str, purpose: OtpPurpose) -> ApiResult<()> {
    let Some(user) = state.storage.get_user_by_email(email).await? else {
        return Ok(());
    };
    if !user.active || (purpose == OtpPurpose::EmailVerification && user.email_verified) {
        return Ok(());
    }
    issue_otp(state, &user, purpose).await
}

pub async fn login(state: &AppState, email: &str, password: &str) -> ApiResult<TokenPair> {
    let user = state.storage.get_user_by_email(email).await?;
    let verified = match &user {
        Some(user) => password_matches(state, user, password).await,
        None => false,
    };

    let user = match (user, verified) {
        (Some(user), true) => user,
        _ => {
            increment(MetricName::LoginsFailed);
            return Err(ApiError::unauthorized(INVALID_CREDENTIALS));
        }
    };

    if !user.active {
        return Err(ApiError::forbidden("account is disabled"));
    }
    if !user.email_verified {
        return Err(ApiError::forbidden("email address is not verified"));
    }

    increment(MetricName::LoginsSucceeded);
    issue_tokens(state, &user, None).await
}

/// Signs in with a Google ID token: by Google subject, else by verified email, else a new member.
pub async fn google_login(state: &AppState, id_token: &str) -> ApiResult<TokenPair> {
    let identity = state.google.verify(id_token).await.map_err(|e| match e {
        GoogleError::Rejected(reason) => ApiError::Unauthorized(reason),
        GoogleError::Http(e) => {
            warn!("Google tokeninfo unavailable: {}", e);
            ApiError::Gateway("Google sign-in is temporarily unavailable".to_string())
        }
    })?;
    if !identity.email_verified {
        return Err(ApiError::unauthorized("Google account email is not verified"));
    }

    let now = state.clock.now();
    let user = match state.storage.get_user_by_google_sub(&identity.sub).await? {
        Some(user) => user,
        None => match state.storage.get_user_by_email(&identity.email).await? {
            Some(mut user) => {
                user.google_sub = Some(identity.sub.clone());
                user.email_verified = true;
                user.updated_at = now;
                state.storage.update_user(&user).await?;
                info!("Linked Google account to user {}", user.id);
                user
            }
            None => {
                let email = normalize_email(&identity.email);
                let name = identity
                    .name
                    .clone()
                    .filter(|n| !n.trim().is_empty())
                    .unwrap_or_else(|| email.split('@').next().unwrap_or_default().to_string());
                let mut user = User::new(&email, &name, Role::Member, now);
                user.google_sub = Some(identity.sub.clone());
                user.email_verified = true;
                state.storage.create_user(&user).await?;
                increment(MetricName::Registrations);
                info!("Registered user {} through Google", user.id);
                user
            }
        },
    };

    if !user.active {
        return Err(ApiError::forbidden("account is disabled"));
    }
    increment(MetricName::LoginsSucceeded);
    issue_tokens(state, &user, None).await
}

/// Rotates a refresh token. Presenting a token that was already rotated revokes every session of its owner.
pub async fn refresh(state: &AppState, raw_token: &str) -> ApiResult<TokenPair> {
    let now = state.clock.now();
    let hash = sha256_hex(raw_token.trim());
    let token = state
        .storage
        .get_refresh_token(&hash)
        .await?
        .ok_or_else(|| ApiError::unauthorized("invalid refresh token"))?;

    if token.revoked_at.is_some() {
        return Err(refresh_reuse(state, &token).await);
    }
    if now >= token.expires_at {
        return Err(ApiError::unauthorized("refresh token expired"));
    }

    // Lost the compare-and-set: a concurrent request rotated the same token
    let Some(revoked) = state.storage.revoke_refresh_token(&hash, now).await? else {
        return Err(refresh_reuse(state, &token).await);
    };

    let user = state
        .storage
        .get_user_by_id(revoked.user_id)
        .await?
        .filter(|u| u.active)
        .ok_or_else(|| ApiError::unauthorized("account is unavailable"))?;

    issue_tokens(state, &user, Some(revoked.family_id)).await
}

async fn refresh_reuse(state: &AppState, token: &RefreshToken) -> ApiError {
    increment(MetricName::RefreshReuseDetected);
    warn!(
        "Refresh token reuse detected for user {} (family {}), revoking all sessions",
        token.user_id, token.family_id
    );
    if let Err(e) = state
        .storage
        .revoke_user_refresh_tokens(token.user_id, state.clock.now())
        .await
    {
        return e.into();
    }
    ApiError::unauthorized("refresh token has already been used")
}

pub async fn logout(state: &AppState, raw_token: &str) -> ApiResult<()> {
    state
        .storage
        .revoke_refresh_token(&sha256_hex(raw_token.trim()), state.clock.now())
        .await?;
    Ok(())
}

/// Always succeeds from the caller's point of view so account existence is not revealed.
pub async fn forgot_password(state: &AppState, email: &str) -> ApiResult<()> {
    let Some(user) = state.storage.get_user_by_email(email).await? else {
        return Ok(());
    };
    if !user.active {
        return Ok(());
    }
    match issue_otp(state, &user, OtpPurpose::PasswordReset).await {
        Ok(()) => Ok(()),
        Err(e @ ApiError::Internal(_)) => Err(e),
        Err(e) => {
            warn!("Password reset code not sent for user {}: {}", user.id, e);
            Ok(())
        }
    }
}

pub async fn reset_password(
    state: &AppState,
    email: &str,
    code: &str,
    new_password: &str,
) -> ApiResult<()> {
    validate_password(new_password).map_err(ApiError::Validation)?;
    let mut user = state
        .storage
        .get_user_by_email(email)
        .await?
        .ok_or_else(|| ApiError::validation(INVALID_CODE))?;

    verify_otp(state, &user, OtpPurpose::PasswordReset, code).await?;

    let now = state.clock.now();
    user.password_hash = Some(hash_password(state, new_password).await?);
    // The code arrived by email, so the address is proven
    user.email_verified = true;
    user.updated_at = now;
    state.storage.update_user(&user).await?;
    let revoked = state.storage.revoke_user_refresh_tokens(user.id, now).await?;
    info!("Password reset for user {} ({} sessions revoked)", user.id, revoked);
    Ok(())
}

pub async fn change_password(
    state: &AppState,
    user: &User,
    current_password: &str,
    new_password: &str,
) -> ApiResult<()> {
    if !password_matches(state, user, current_password).await {
        return Err(ApiError::unauthorized("current password is incorrect"));
    }
    validate_password(new_password).map_err(ApiError::Validation)?;

    let mut user = user.clone();
    user.password_hash = Some(hash_password(state, new_password).await?);
    user.updated_at = state.clock.now();
    state.storage.update_user(&user).await?;
    Ok(())
}

pub async fn update_profile(state: &AppState, user: &User, update: ProfileUpdate) -> ApiResult<User> {
    let mut user = user.clone();
    if let Some(name) = update.full_name {
        let name = name.trim();
        if name.is_empty() {
            return Err(ApiError::validation("full_name cannot be empty"));
        }
        user.full_name = name.to_string();
    }
    if let Some(phone) = update.phone {
        let phone = phone.trim();
        user.phone = (!phone.is_empty()).then(|| phone.to_string());
    }
    user.updated_at = state.clock.now();
    state.storage.update_user(&user).await?;
    Ok(user)
}
