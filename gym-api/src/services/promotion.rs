use crate::error::{ApiError, ApiResult};
use crate::state::AppState;
use chrono::{DateTime, Utc};
use gym_core::{
    normalize_promo_code, DiscountKind, Promotion, PromotionScope, MAX_AMOUNT_CENTS,
};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

static CODE_SHAPE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Z0-9_-]{3,32}$").expect("promotion code pattern compiles"));

fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize)]
pub struct NewPromotion {
    pub code: String,
    pub description: Option<String>,
    pub discount: DiscountKind,
    pub scope: PromotionScope,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    pub max_redemptions: Option<u32>,
    #[serde(default)]
    pub min_amount_cents: i64,
    #[serde(default = "default_true")]
    pub active: bool,
}

#[derive(Debug, Deserialize, Default)]
pub struct PromotionUpdate {
    pub active: Option<bool>,
    pub ends_at: Option<DateTime<Utc>>,
    pub max_redemptions: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct ValidateRequest {
    pub code: String,
    pub scope: PromotionScope,
    pub amount_cents: i64,
}

#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct PromotionQuote {
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub discount_cents: i64,
    pub total_cents: i64,
}

pub async fn create(state: &AppState, new_promotion: NewPromotion) -> ApiResult<Promotion> {
    let code = normalize_promo_code(&new_promotion.code);
    if !CODE_SHAPE.is_match(&code) {
        return Err(ApiError::validation(
            "code must be 3 to 32 characters of A-Z, 0-9, '_' or '-'",
        ));
    }
    if new_promotion.ends_at <= new_promotion.starts_at {
        return Err(ApiError::validation("ends_at must be after starts_at"));
    }
    if !new_promotion.discount.is_valid() {
        return Err(ApiError::validation(
            "percent discounts must be 1 to 100, fixed discounts positive",
        ));
    }
    if new_promotion.max_redemptions == Some(0) {
        return Err(ApiError::validation("max_redemptions must be positive"));
    }
    if !(0..=MAX_AMOUNT_CENTS).contains(&new_promotion.min_amount_cents) {
        return Err(ApiError::validation(format!(
            "min_amount_cents must be between 0 and {MAX_AMOUNT_CENTS}"
        )));
    }

    let promotion = Promotion {
        id: Uuid::new_v4(),
        code,
        description: new_promotion.description,
        discount: new_promotion.discount,
        scope: new_promotion.scope,
        starts_at: new_promotion.starts_at,
        ends_at: new_promotion.ends_at,
        max_redemptions: new_promotion.max_redemptions,
        redemptions: 0,
        min_amount_cents: new_promotion.min_amount_cents,
        active: new_promotion.active,
        created_at: state.clock.now(),
    };
    state.storage.create_promotion(&promotion).await.map_err(|e| match e {
        gym_core::common::error::CoreError::Conflict(_) => {
            ApiError::conflict("a promotion with this code already exists")
        }
        other => other.into(),
    })?;
    info!("Created promotion {} ({})", promotion.code, promotion.id);
    Ok(promotion)
}

pub async fn list(state: &AppState) -> ApiResult<Vec<Promotion>> {
    Ok(state.storage.list_promotions().await?)
}

pub async fn update(state: &AppState, promotion_id: Uuid, update: PromotionUpdate) -> ApiResult<Promotion> {
    let mut promotion = state
        .storage
        .get_promotion(promotion_id)
        .await?
        .ok_or_else(|| ApiError::not_found("promotion not found"))?;

    if let Some(ends_at) = update.ends_at {
        if ends_at <= promotion.starts_at {
            return Err(ApiError::validation("ends_at must be after starts_at"));
        }
        promotion.ends_at = ends_at;
    }
    if let Some(max) = update.max_redemptions {
        if max == 0 || max < promotion.redemptions {
            return Err(ApiError::validation(format!(
                "max_redemptions must be positive and at least the {} redemptions so far",
                promotion.redemptions
            )));
        }
        promotion.max_redemptions = Some(max);
    }
    if let Some(active) = update.active {
        promotion.active = active;
    }
    state.storage.update_promotion(&promotion).await?;
    Ok(promotion)
}

/// Quotes a code against an amount without redeeming it.
pub async fn quote(state: &AppState, request: ValidateRequest) -> ApiResult<PromotionQuote> {
    if !(0..=MAX_AMOUNT_CENTS).contains(&request.amount_cents) {
        return Err(ApiError::validation(format!(
            "amount_cents must be between 0 and {MAX_AMOUNT_CENTS}"
        )));
    }
    let no_discount = |reason: &str| PromotionQuote {
        valid: false,
        reason: Some(reason.to_string()),
        discount_cents: 0,
        total_cents: request.amount_cents,
    };

    let Some(promotion) = state.storage.get_promotion_by_code(&request.code).await? else {
        return Ok(no_discount("not_found"));
    };
    if let Err(reason) = promotion.check(request.scope, request.amount_cents, state.clock.now()) {
        return Ok(no_discount(reason.as_str()));
    }

    let discount_cents = promotion.discount_for(request.amount_cents);
    Ok(PromotionQuote {
        valid: true,
        reason: None,
        discount_cents,
        total_cents: request.amount_cents - discount_cents,
    })
}
