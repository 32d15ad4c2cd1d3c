use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MembershipPlan {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub duration_days: u32,
    pub price_cents: i64,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

impl MembershipPlan {
    pub fn duration(&self) -> Duration {
        Duration::days(i64::from(self.duration_days))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MembershipStatus {
    PendingPayment,
    Active,
    Cancelled,
}

string_enum!(MembershipStatus, "membership status", {
    PendingPayment => "pending_payment",
    Active => "active",
    Cancelled => "cancelled",
});

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Membership {
    pub id: Uuid,
    pub user_id: Uuid,
    pub plan_id: Uuid,
    pub status: MembershipStatus,
    pub starts_at: Option<DateTime<Utc>>,
    pub ends_at: Option<DateTime<Utc>>,
    pub payment_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

impl Membership {
    pub fn pending(user_id: Uuid, plan_id: Uuid, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            plan_id,
            status: MembershipStatus::PendingPayment,
            starts_at: None,
            ends_at: None,
            payment_id: None,
            created_at: now,
        }
    }

    /// Active memberships cover `[starts_at, ends_at)`; expiry is derived, never stored.
    pub fn is_active_at(&self, at: DateTime<Utc>) -> bool {
        match (self.status, self.starts_at, self.ends_at) {
            (MembershipStatus::Active, Some(start), Some(end)) => start <= at && at < end,
            _ => false,
        }
    }

    /// Start of the next period: right away, or queued after the latest paid period.
    pub fn next_period_start<'a>(
        memberships: impl IntoIterator<Item = &'a Membership>,
        now: DateTime<Utc>,
    ) -> DateTime<Utc> {
        memberships
            .into_iter()
            .filter(|m| m.status == MembershipStatus::Active)
            .filter_map(|m| m.ends_at)
            .fold(now, |latest, end| latest.max(end))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentKind {
    Membership,
    Order,
}

string_enum!(PaymentKind, "payment kind", {
    Membership => "membership",
    Order => "order",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Paid,
    Failed,
}

string_enum!(PaymentStatus, "payment status", {
    Pending => "pending",
    Paid => "paid",
    Failed => "failed",
});

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Payment {
    pub id: Uuid,
    pub user_id: Uuid,
    pub kind: PaymentKind,
    /// Membership or order id, depending on `kind`.
    pub target_id: Uuid,
    pub amount_cents: i64,
    pub currency: String,
    pub status: PaymentStatus,
    /// Merchant reference shared with the gateway; webhooks look payments up by it.
    pub reference: String,
    pub provider_txn_id: Option<String>,
    pub promotion_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Payment {
    pub fn pending(
        user_id: Uuid,
        kind: PaymentKind,
        target_id: Uuid,
        amount_cents: i64,
        currency: &str,
        now: DateTime<Utc>,
    ) -> Self {
        let id = Uuid::new_v4();
        Self {
            id,
            user_id,
            kind,
            target_id,
            amount_cents,
            currency: currency.to_string(),
            status: PaymentStatus::Pending,
            reference: format!("GYM-{}", id.simple()),
            provider_txn_id: None,
            promotion_id: None,
            created_at: now,
            completed_at: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn active(start: DateTime<Utc>, days: i64) -> Membership {
        let mut m = Membership::pending(Uuid::new_v4(), Uuid::new_v4(), start);
        m.status = MembershipStatus::Active;
        m.starts_at = Some(start);
        m.ends_at = Some(start + Duration::days(days));
        m
    }

    #[test]
    fn test_active_window_is_half_open() {
        let now = Utc::now();
        let m = active(now, 30);
        assert!(m.is_active_at(now));
        assert!(m.is_active_at(now + Duration::days(29)));
        assert!(!m.is_active_at(now + Duration::days(30)));
        assert!(!m.is_active_at(now - Duration::seconds(1)));
    }

    #[test]
    fn test_pending_membership_is_never_active() {
        let now = Utc::now();
        let m = Membership::pending(Uuid::new_v4(), Uuid::new_v4(), now);
        assert!(!m.is_active_at(now));
    }

    #[test]
    fn test_next_period_start_queues_after_latest_end() {
        let now = Utc::now();
        let current = active(now - Duration::days(10), 30);
        let queued = active(now + Duration::days(20), 30);
        let start = Membership::next_period_start([&current, &queued], now);
        assert_eq!(start, now + Duration::days(50));
    }

    #[test]
    fn test_next_period_start_ignores_expired_and_cancelled() {
        let now = Utc::now();
        let expired = active(now - Duration::days(60), 30);
        let mut cancelled = active(now, 30);
        cancelled.status = MembershipStatus::Cancelled;
        assert_eq!(Membership::next_period_start([&expired, &cancelled], now), now);
    }

    #[test]
    fn test_payment_reference_is_derived_from_id() {
        let p = Payment::pending(Uuid::new_v4(), PaymentKind::Order, Uuid::new_v4(), 1000, "USD", Utc::now());
        assert_eq!(p.reference, format!("GYM-{}", p.id.simple()));
        assert_eq!(p.status, PaymentStatus::Pending);
    }
}
