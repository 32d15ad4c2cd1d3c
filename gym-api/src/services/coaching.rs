use crate::error::{ApiError, ApiResult};
use crate::metrics::{increment, MetricName};
use crate::services::membership::current_membership;
use crate::state::AppState;
use chrono::{DateTime, Duration, Utc};
use gym_core::common::error::CoreError;
use gym_core::{Booking, BookingStatus, CoachProfile, Role, User};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

const SLOT_MINUTES: i64 = 15;
const MAX_DAYS_AHEAD: i64 = 365;

#[derive(Debug, Serialize)]
pub struct CoachView {
    pub user_id: Uuid,
    pub full_name: String,
    pub specialty: String,
    pub bio: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CoachRequest {
    pub user_id: Uuid,
    pub specialty: String,
    pub bio: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct BookingRequest {
    pub coach_id: Uuid,
    pub starts_at: DateTime<Utc>,
    pub duration_minutes: i64,
    pub note: Option<String>,
}

/// Coaches with an active account, in profile creation order.
pub async fn list_coaches(state: &AppState) -> ApiResult<Vec<CoachView>> {
    let mut coaches = Vec::new();
    for profile in state.storage.list_coach_profiles().await? {
        if let Some(user) = state.storage.get_user_by_id(profile.user_id).await? {
            if user.active {
                coaches.push(CoachView {
                    user_id: profile.user_id,
                    full_name: user.full_name,
                    specialty: profile.specialty,
                    bio: profile.bio,
                });
            }
        }
    }
    Ok(coaches)
}

/// Creates or updates a coach profile, promoting the user to `Coach` unless they are an admin.
pub async fn upsert_coach(state: &AppState, request: CoachRequest) -> ApiResult<CoachView> {
    let specialty = request.specialty.trim();
    if specialty.is_empty() {
        return Err(ApiError::validation("specialty is required"));
    }

    let mut user = state
        .storage
        .get_user_by_id(request.user_id)
        .await?
        .ok_or_else(|| ApiError::not_found("user not found"))?;
    let now = state.clock.now();

    if user.role != Role::Admin && user.role != Role::Coach {
        user.role = Role::Coach;
        user.updated_at = now;
        state.storage.update_user(&user).await?;
        info!("Promoted user {} to coach", user.id);
    }

    let created_at = state
        .storage
        .get_coach_profile(user.id)
        .await?
        .map(|existing| existing.created_at)
        .unwrap_or(now);
    let profile = CoachProfile {
        user_id: user.id,
        specialty: specialty.to_string(),
        bio: request.bio,
        created_at,
    };
    state.storage.upsert_coach_profile(&profile).await?;

    Ok(CoachView {
        user_id: user.id,
        full_name: user.full_name,
        specialty: profile.specialty,
        bio: profile.bio,
    })
}

fn validate_slot(state: &AppState, request: &BookingRequest, now: DateTime<Utc>) -> ApiResult<()> {
    let bounds = &state.settings.booking;
    if request.starts_at <= now {
        return Err(ApiError::validation("bookings must start in the future"));
    }
    if request.starts_at - now > Duration::days(MAX_DAYS_AHEAD) {
        return Err(ApiError::validation(format!(
            "bookings can be made at most {MAX_DAYS_AHEAD} days ahead"
        )));
    }
    if request.duration_minutes < bounds.min_duration_minutes
        || request.duration_minutes > bounds.max_duration_minutes
    {
        return Err(ApiError::validation(format!(
            "duration_minutes must be between {} and {}",
            bounds.min_duration_minutes, bounds.max_duration_minutes
        )));
    }
    if request.duration_minutes % SLOT_MINUTES != 0 {
        return Err(ApiError::validation(format!(
            "duration_minutes must be a multiple of {SLOT_MINUTES}"
        )));
    }
    Ok(())
}

pub async fn book(state: &AppState, member: &User, request: BookingRequest) -> ApiResult<Booking> {
    let now = state.clock.now();
    validate_slot(state, &request, now)?;
    if request.coach_id == member.id {
        return Err(ApiError::validation("you cannot book a session with yourself"));
    }

    let coach_available = state.storage.get_coach_profile(request.coach_id).await?.is_some()
        && state
            .storage
            .get_user_by_id(request.coach_id)
            .await?
            .is_some_and(|coach| coach.active);
    if !coach_available {
        return Err(ApiError::not_found("coach not found"));
    }

    if current_membership(state, member.id, request.starts_at)
        .await?
        .is_none()
    {
        return Err(ApiError::forbidden(
            "an active membership is required for the booked time",
        ));
    }

    let booking = Booking {
        id: Uuid::new_v4(),
        coach_id: request.coach_id,
        member_id: member.id,
        starts_at: request.starts_at,
        ends_at: request.starts_at + Duration::minutes(request.duration_minutes),
        status: BookingStatus::Booked,
        note: request.note.filter(|n| !n.trim().is_empty()),
        created_at: now,
        cancelled_at: None,
    };
    match state.storage.create_booking(&booking).await {
        Ok(()) => {}
        Err(CoreError::Conflict(_)) => {
            return Err(ApiError::conflict("the coach or you already have a session at that time"))
        }
        Err(e) => return Err(e.into()),
    }

    increment(MetricName::BookingsCreated);
    info!(
        "Booking {} created: coach {} with member {} at {}",
        booking.id, booking.coach_id, booking.member_id, booking.starts_at
    );
    Ok(booking)
}

pub async fn my_bookings(state: &AppState, member: &User) -> ApiResult<Vec<Booking>> {
    Ok(state.storage.list_bookings_for_member(member.id).await?)
}

pub async fn coach_bookings(state: &AppState, coach: &User) -> ApiResult<Vec<Booking>> {
    if coach.role != Role::Coach && state.storage.get_coach_profile(coach.id).await?.is_none() {
        return Err(ApiError::forbidden("only coaches have a schedule"));
    }
    Ok(state.storage.list_bookings_for_coach(coach.id).await?)
}

async fn load_booking(state: &AppState, booking_id: Uuid) -> ApiResult<Booking> {
    state
        .storage
        .get_booking(booking_id)
        .await?
        .ok_or_else(|| ApiError::not_found("booking not found"))
}

/// Members must cancel ahead of the cutoff; the coach and admins may cancel any time before completion.
pub async fn cancel(state: &AppState, actor: &User, booking_id: Uuid) -> ApiResult<Booking> {
    let now = state.clock.now();
    let mut booking = load_booking(state, booking_id).await?;

    let is_member = booking.member_id == actor.id;
    let is_privileged = booking.coach_id == actor.id || actor.role == Role::Admin;
    if !is_member && !is_privileged {
        return Err(ApiError::forbidden("not your booking"));
    }
    if booking.status != BookingStatus::Booked {
        return Err(ApiError::conflict("booking is not active"));
    }

    let cutoff_hours = state.settings.booking.member_cancel_cutoff_hours;
    if !is_privileged && booking.starts_at - now < Duration::hours(cutoff_hours) {
        return Err(ApiError::conflict(format!(
            "bookings can only be cancelled at least {cutoff_hours} hours before the start"
        )));
    }

    booking.status = BookingStatus::Cancelled;
    booking.cancelled_at = Some(now);
    state.storage.update_booking(&booking).await?;
    increment(MetricName::BookingsCancelled);
    info!("Booking {} cancelled by {}", booking.id, actor.id);
    Ok(booking)
}

pub async fn complete(state: &AppState, actor: &User, booking_id: Uuid) -> ApiResult<Booking> {
    let now = state.clock.now();
    let mut booking = load_booking(state, booking_id).await?;

    if booking.coach_id != actor.id && actor.role != Role::Admin {
        return Err(ApiError::forbidden("only the coach can complete a booking"));
    }
    if booking.status != BookingStatus::Booked {
        return Err(ApiError::conflict("booking is not active"));
    }
    if now < booking.starts_at {
        return Err(ApiError::conflict("booking has not started yet"));
    }

    booking.status = BookingStatus::Completed;
    state.storage.update_booking(&booking).await?;
    info!("Booking {} completed", booking.id);
    Ok(booking)
}
