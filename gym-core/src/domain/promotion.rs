use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum DiscountKind {
    /// Whole percent, 1..=100.
    Percent(u8),
    /// Fixed amount in cents.
    Fixed(i64),
}

impl DiscountKind {
    pub fn kind_str(&self) -> &'static str {
        match self {
            DiscountKind::Percent(_) => "percent",
            DiscountKind::Fixed(_) => "fixed",
        }
    }

    pub fn value(&self) -> i64 {
        match self {
            DiscountKind::Percent(p) => i64::from(*p),
            DiscountKind::Fixed(c) => *c,
        }
    }

    pub fn from_parts(kind: &str, value: i64) -> Option<Self> {
        match kind {
            "percent" => u8::try_from(value).ok().map(DiscountKind::Percent),
            "fixed" => Some(DiscountKind::Fixed(value)),
            _ => None,
        }
    }

    pub fn is_valid(&self) -> bool {
        match self {
            DiscountKind::Percent(p) => (1..=100).contains(p),
            DiscountKind::Fixed(c) => *c > 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PromotionScope {
    All,
    Memberships,
    Products,
}

string_enum!(PromotionScope, "promotion scope", {
    All => "all",
    Memberships => "memberships",
    Products => "products",
});

impl PromotionScope {
    pub fn covers(&self, purchase: PromotionScope) -> bool {
        *self == PromotionScope::All || *self == purchase
    }
}

/// Why a promotion code cannot be applied to a purchase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PromotionRejection {
    Inactive,
    NotStarted,
    Expired,
    Exhausted,
    WrongScope,
    BelowMinimum,
}

impl PromotionRejection {
    pub fn as_str(&self) -> &'static str {
        match self {
            PromotionRejection::Inactive => "inactive",
            PromotionRejection::NotStarted => "not_started",
            PromotionRejection::Expired => "expired",
            PromotionRejection::Exhausted => "exhausted",
            PromotionRejection::WrongScope => "wrong_scope",
            PromotionRejection::BelowMinimum => "below_minimum",
        }
    }
}

impl std::fmt::Display for PromotionRejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Promotion {
    pub id: Uuid,
    pub code: String,
    pub description: Option<String>,
    pub discount: DiscountKind,
    pub scope: PromotionScope,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    pub max_redemptions: Option<u32>,
    pub redemptions: u32,
    pub min_amount_cents: i64,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

impl Promotion {
    /// Discount for `amount_cents`, never more than the amount itself.
    pub fn discount_for(&self, amount_cents: i64) -> i64 {
        if amount_cents <= 0 {
            return 0;
        }
        let discount = match self.discount {
            DiscountKind::Percent(p) => {
                let scaled = i128::from(amount_cents) * i128::from(p) / 100;
                i64::try_from(scaled).unwrap_or(amount_cents)
            }
            DiscountKind::Fixed(c) => c,
        };
        discount.clamp(0, amount_cents)
    }

    pub fn check(
        &self,
        purchase: PromotionScope,
        amount_cents: i64,
        now: DateTime<Utc>,
    ) -> Result<(), PromotionRejection> {
        if !self.active {
            return Err(PromotionRejection::Inactive);
        }
        if now < self.starts_at {
            return Err(PromotionRejection::NotStarted);
        }
        if now >= self.ends_at {
            return Err(PromotionRejection::Expired);
        }
        if self
            .max_redemptions
            .is_some_and(|max| self.redemptions >= max)
        {
            return Err(PromotionRejection::Exhausted);
        }
        if !self.scope.covers(purchase) {
            return Err(PromotionRejection::WrongScope);
        }
        if amount_cents < self.min_amount_cents {
            return Err(PromotionRejection::BelowMinimum);
        }
        Ok(())
    }
}

/// Promotion codes are stored uppercase.
pub fn normalize_promo_code(code: &str) -> String {
    code.trim().to_uppercase()
}
