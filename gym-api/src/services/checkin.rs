use crate::error::{ApiError, ApiResult};
use crate::metrics::{increment, MetricName};
use crate::services::membership::current_membership;
use crate::state::AppState;
use chrono::{DateTime, NaiveDate, Utc};
use gym_core::common::error::CoreError;
use gym_core::{CheckIn, User};
use serde::Serialize;
use tracing::info;
use uuid::Uuid;

/// Front-desk answer to "may this member come in?".
#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct CheckInValidation {
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub membership_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ends_at: Option<DateTime<Utc>>,
}

impl CheckInValidation {
    fn rejected(reason: &'static str) -> Self {
        Self {
            valid: false,
            reason: Some(reason),
            membership_id: None,
            ends_at: None,
        }
    }
}

async fn load_member(state: &AppState, member_id: Uuid) -> ApiResult<User> {
    state
        .storage
        .get_user_by_id(member_id)
        .await?
        .ok_or_else(|| ApiError::not_found("member not found"))
}

/// Records today's visit. Staff may check anyone in; members only themselves.
pub async fn check_in(state: &AppState, actor: &User, member_id: Option<Uuid>) -> ApiResult<CheckIn> {
    let now = state.clock.now();
    let member = match member_id {
        Some(id) if id != actor.id => {
            if !actor.role.is_staff() {
                return Err(ApiError::forbidden("only staff can check other members in"));
            }
            load_member(state, id).await?
        }
        _ => actor.clone(),
    };

    if !member.active {
        increment(MetricName::CheckInsRejected);
        return Err(ApiError::forbidden("member account is disabled"));
    }

    let Some(membership) = current_membership(state, member.id, now).await? else {
        increment(MetricName::CheckInsRejected);
        return Err(ApiError::forbidden("no active membership"));
    };

    let record = CheckIn::new(member.id, membership.id, actor.id, now);
    match state.storage.create_check_in(&record).await {
        Ok(()) => {}
        Err(CoreError::Conflict(_)) => {
            increment(MetricName::CheckInsRejected);
            return Err(ApiError::conflict("already checked in today"));
        }
        Err(e) => return Err(e.into()),
    }

    increment(MetricName::CheckInsAccepted);
    info!("User {} checked in (by {})", member.id, actor.id);
    Ok(record)
}

/// Same rules as [`check_in`] without recording anything.
pub async fn validate(state: &AppState, member_id: Uuid) -> ApiResult<CheckInValidation> {
    let now = state.clock.now();
    let member = load_member(state, member_id).await?;
    if !member.active {
        return Ok(CheckInValidation::rejected("account_disabled"));
    }

    let Some(membership) = current_membership(state, member.id, now).await? else {
        return Ok(CheckInValidation::rejected("no_active_membership"));
    };

    let today = now.date_naive();
    let already_in = state
        .storage
        .list_check_ins_for_user(member.id)
        .await?
        .iter()
        .any(|c| c.check_in_date == today);
    if already_in {
        return Ok(CheckInValidation {
            membership_id: Some(membership.id),
            ends_at: membership.ends_at,
            ..CheckInValidation::rejected("already_checked_in")
        });
    }

    Ok(CheckInValidation {
        valid: true,
        reason: None,
        membership_id: Some(membership.id),
        ends_at: membership.ends_at,
    })
}

pub async fn my_history(state: &AppState, user: &User) -> ApiResult<Vec<CheckIn>> {
    Ok(state.storage.list_check_ins_for_user(user.id).await?)
}

pub async fn list_for_day(state: &AppState, date: Option<NaiveDate>) -> ApiResult<Vec<CheckIn>> {
    let date = date.unwrap_or_else(|| state.clock.now().date_naive());
    Ok(state.storage.list_check_ins_on(date).await?)
}
