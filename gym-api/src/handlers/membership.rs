use super::{ApiJson, ApiPath};
use crate::auth::AuthUser;
use crate::error::ApiResult;
use crate::services::membership::{
    self, MyMemberships, NewPlan, PlanUpdate, PurchaseOutcome, PurchaseRequest, RenewRequest,
};
use crate::state::AppState;
use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use gym_core::MembershipPlan;
use uuid::Uuid;

pub async fn list_plans(State(state): State<AppState>) -> ApiResult<Json<Vec<MembershipPlan>>> {
    Ok(Json(membership::list_plans(&state).await?))
}

pub async fn create_plan(
    State(state): State<AppState>,
    caller: AuthUser,
    ApiJson(new_plan): ApiJson<NewPlan>,
) -> ApiResult<(StatusCode, Json<MembershipPlan>)> {
    caller.require_admin()?;
    let plan = membership::create_plan(&state, new_plan).await?;
    Ok((StatusCode::CREATED, Json(plan)))
}

pub async fn update_plan(
    State(state): State<AppState>,
    caller: AuthUser,
    ApiPath(plan_id): ApiPath<Uuid>,
    ApiJson(update): ApiJson<PlanUpdate>,
) -> ApiResult<Json<MembershipPlan>> {
    caller.require_admin()?;
    Ok(Json(membership::update_plan(&state, plan_id, update).await?))
}

pub async fn purchase(
    State(state): State<AppState>,
    caller: AuthUser,
    ApiJson(request): ApiJson<PurchaseRequest>,
) -> ApiResult<(StatusCode, Json<PurchaseOutcome>)> {
    let outcome = membership::purchase(
        &state,
        caller.user(),
        request.plan_id,
        request.promo_code.as_deref(),
    )
    .await?;
    Ok((StatusCode::CREATED, Json(outcome)))
}

pub async fn renew(
    State(state): State<AppState>,
    caller: AuthUser,
    ApiJson(request): ApiJson<RenewRequest>,
) -> ApiResult<(StatusCode, Json<PurchaseOutcome>)> {
    let outcome = membership::renew(&state, caller.user(), request).await?;
    Ok((StatusCode::CREATED, Json(outcome)))
}

pub async fn my_memberships(
    State(state): State<AppState>,
    caller: AuthUser,
) -> ApiResult<Json<MyMemberships>> {
    Ok(Json(membership::my_memberships(&state, caller.user()).await?))
}
