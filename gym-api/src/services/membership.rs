use crate::error::{ApiError, ApiResult};
use crate::services::payment;
use crate::state::AppState;
use chrono::{DateTime, Utc};
use gym_core::{
    Membership, MembershipPlan, MembershipStatus, Payment, PaymentKind, PromotionScope, User,
    MAX_AMOUNT_CENTS,
};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

const MAX_PLAN_DAYS: u32 = 3_660;

fn check_price(price_cents: i64) -> ApiResult<()> {
    if !(0..=MAX_AMOUNT_CENTS).contains(&price_cents) {
        return Err(ApiError::validation(format!(
            "price_cents must be between 0 and {MAX_AMOUNT_CENTS}"
        )));
    }
    Ok(())
}

#[derive(Debug, Deserialize)]
pub struct NewPlan {
    pub name: String,
    pub description: Option<String>,
    pub duration_days: u32,
    pub price_cents: i64,
}

#[derive(Debug, Deserialize, Default)]
pub struct PlanUpdate {
    pub name: Option<String>,
    pub description: Option<String>,
    pub price_cents: Option<i64>,
    pub active: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct PurchaseRequest {
    pub plan_id: Uuid,
    pub promo_code: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
pub struct RenewRequest {
    pub plan_id: Option<Uuid>,
    pub promo_code: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct PurchaseOutcome {
    pub membership: Membership,
    pub payment: Payment,
    pub checkout_url: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct MyMemberships {
    pub active: Option<Membership>,
    pub memberships: Vec<Membership>,
}

pub async fn list_plans(state: &AppState) -> ApiResult<Vec<MembershipPlan>> {
    Ok(state.storage.list_plans(false).await?)
}

pub async fn create_plan(state: &AppState, new_plan: NewPlan) -> ApiResult<MembershipPlan> {
    let name = new_plan.name.trim();
    if name.is_empty() {
        return Err(ApiError::validation("name is required"));
    }
    if !(1..=MAX_PLAN_DAYS).contains(&new_plan.duration_days) {
        return Err(ApiError::validation(format!(
            "duration_days must be between 1 and {MAX_PLAN_DAYS}"
        )));
    }
    check_price(new_plan.price_cents)?;

    let plan = MembershipPlan {
        id: Uuid::new_v4(),
        name: name.to_string(),
        description: new_plan.description,
        duration_days: new_plan.duration_days,
        price_cents: new_plan.price_cents,
        active: true,
        created_at: state.clock.now(),
    };
    state.storage.create_plan(&plan).await?;
    info!("Created membership plan {} ({})", plan.id, plan.name);
    Ok(plan)
}

pub async fn update_plan(state: &AppState, plan_id: Uuid, update: PlanUpdate) -> ApiResult<MembershipPlan> {
    let mut plan = state
        .storage
        .get_plan(plan_id)
        .await?
        .ok_or_else(|| ApiError::not_found("membership plan not found"))?;

    if let Some(name) = update.name {
        let name = name.trim();
        if name.is_empty() {
            return Err(ApiError::validation("name cannot be empty"));
        }
        plan.name = name.to_string();
    }
    if let Some(description) = update.description {
        plan.description = Some(description);
    }
    if let Some(price) = update.price_cents {
        check_price(price)?;
        plan.price_cents = price;
    }
    if let Some(active) = update.active {
        plan.active = active;
    }
    state.storage.update_plan(&plan).await?;
    Ok(plan)
}

/// The membership covering `at`, if any.
pub async fn current_membership(
    state: &AppState,
    user_id: Uuid,
    at: DateTime<Utc>,
) -> ApiResult<Option<Membership>> {
    Ok(state
        .storage
        .list_memberships_for_user(user_id)
        .await?
        .into_iter()
        .find(|m| m.is_active_at(at)))
}

pub async fn purchase(
    state: &AppState,
    buyer: &User,
    plan_id: Uuid,
    promo_code: Option<&str>,
) -> ApiResult<PurchaseOutcome> {
    let now = state.clock.now();
    let plan = state
        .storage
        .get_plan(plan_id)
        .await?
        .ok_or_else(|| ApiError::not_found("membership plan not found"))?;
    if !plan.active {
        return Err(ApiError::validation("membership plan is no longer offered"));
    }

    let discount =
        payment::reserve_promotion(state, promo_code, PromotionScope::Memberships, plan.price_cents)
            .await?;
    let total = plan.price_cents - discount.discount_cents;

    let mut membership = Membership::pending(buyer.id, plan.id, now);
    let mut pending = Payment::pending(
        buyer.id,
        PaymentKind::Membership,
        membership.id,
        total,
        &state.settings.payment.currency,
        now,
    );
    pending.promotion_id = discount.promotion_id();
    membership.payment_id = Some(pending.id);

    if let Err(e) = store_pending(state, &membership, &pending).await {
        payment::release_promotion(state, pending.promotion_id).await;
        return Err(e);
    }
    info!(
        "Membership {} pending for user {} on plan {} ({} cents)",
        membership.id, buyer.id, plan.id, total
    );

    let checkout_url =
        payment::start_checkout(state, buyer, &pending, format!("{} membership", plan.name))
            .await?;

    let membership = state
        .storage
        .get_membership(membership.id)
        .await?
        .unwrap_or(membership);
    let payment = payment::reload_payment(state, pending.id).await?;
    Ok(PurchaseOutcome {
        membership,
        payment,
        checkout_url,
    })
}

async fn store_pending(state: &AppState, membership: &Membership, pending: &Payment) -> ApiResult<()> {
    state.storage.create_membership(membership).await?;
    state.storage.create_payment(pending).await?;
    Ok(())
}

/// Buys another period; without `plan_id` the plan of the latest activated membership is reused.
pub async fn renew(state: &AppState, buyer: &User, request: RenewRequest) -> ApiResult<PurchaseOutcome> {
    let plan_id = match request.plan_id {
        Some(id) => id,
        None => state
            .storage
            .list_memberships_for_user(buyer.id)
            .await?
            .into_iter()
            .find(|m| m.starts_at.is_some())
            .map(|m| m.plan_id)
            .ok_or_else(|| ApiError::not_found("no previous membership to renew"))?,
    };
    purchase(state, buyer, plan_id, request.promo_code.as_deref()).await
}

pub async fn my_memberships(state: &AppState, user: &User) -> ApiResult<MyMemberships> {
    let now = state.clock.now();
    let memberships = state.storage.list_memberships_for_user(user.id).await?;
    let active = memberships.iter().find(|m| m.is_active_at(now)).cloned();
    Ok(MyMemberships {
        active,
        memberships,
    })
}

/// Starts the paid period right away, or right after the latest period already paid for.
///
/// Returns `false` when the membership was not awaiting payment.
pub(crate) async fn activate(state: &AppState, membership_id: Uuid, now: DateTime<Utc>) -> ApiResult<bool> {
    let mut membership = state
        .storage
        .get_membership(membership_id)
        .await?
        .ok_or_else(|| ApiError::Internal(anyhow::anyhow!("membership {membership_id} not found")))?;
    if membership.status != MembershipStatus::PendingPayment {
        return Ok(false);
    }

    let plan = state
        .storage
        .get_plan(membership.plan_id)
        .await?
        .ok_or_else(|| ApiError::Internal(anyhow::anyhow!("plan {} not found", membership.plan_id)))?;

    let others = state
        .storage
        .list_memberships_for_user(membership.user_id)
        .await?;
    let starts_at =
        Membership::next_period_start(others.iter().filter(|m| m.id != membership.id), now);

    membership.status = MembershipStatus::Active;
    membership.starts_at = Some(starts_at);
    membership.ends_at = Some(starts_at + plan.duration());
    state.storage.update_membership(&membership).await?;
    info!(
        "Membership {} active from {} to {}",
        membership.id,
        starts_at,
        starts_at + plan.duration()
    );
    Ok(true)
}

pub(crate) async fn cancel_pending(state: &AppState, membership_id: Uuid) -> ApiResult<bool> {
    match state.storage.get_membership(membership_id).await? {
        Some(mut membership) if membership.status == MembershipStatus::PendingPayment => {
            membership.status = MembershipStatus::Cancelled;
            state.storage.update_membership(&membership).await?;
            info!("Membership {} cancelled after failed payment", membership.id);
            Ok(true)
        }
        _ => Ok(false),
    }
}
