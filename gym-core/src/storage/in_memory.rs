use super::traits::Storage;
use crate::common::error::{CoreError, Result};
use crate::domain::*;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use tracing::debug;
use uuid::Uuid;

#[derive(Default)]
struct Tables {
    users: HashMap<Uuid, User>,
    refresh_tokens: HashMap<String, RefreshToken>,
    otps: HashMap<Uuid, OtpCode>,
    plans: HashMap<Uuid, MembershipPlan>,
    memberships: HashMap<Uuid, Membership>,
    payments: HashMap<Uuid, Payment>,
    check_ins: HashMap<Uuid, CheckIn>,
    coaches: HashMap<Uuid, CoachProfile>,
    bookings: HashMap<Uuid, Booking>,
    products: HashMap<Uuid, Product>,
    carts: HashMap<Uuid, Vec<CartItem>>,
    orders: HashMap<Uuid, Order>,
    promotions: HashMap<Uuid, Promotion>,
}

/// In-memory storage implementation for development/testing.
///
/// All tables sit behind one mutex so multi-table operations such as
/// `place_order` are atomic, like their SQL transaction counterparts.
#[derive(Default)]
pub struct InMemoryStorage {
    tables: Mutex<Tables>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn tables(&self) -> MutexGuard<'_, Tables> {
        // A panic while holding the lock cannot leave a table half-written here.
        self.tables.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn sorted_newest_first<T, F>(mut items: Vec<T>, key: F) -> Vec<T>
where
    F: Fn(&T) -> DateTime<Utc>,
{
    items.sort_by_key(|item| std::cmp::Reverse(key(item)));
    items
}

#[async_trait]
impl Storage for InMemoryStorage {
    async fn create_user(&self, user: &User) -> Result<()> {
        let mut t = self.tables();
        if t.users.values().any(|u| u.email == user.email) {
            return Err(CoreError::Conflict(format!("email {} already registered", user.email)));
        }
        if let Some(sub) = &user.google_sub {
            if t.users.values().any(|u| u.google_sub.as_deref() == Some(sub.as_str())) {
                return Err(CoreError::Conflict("google account already linked".into()));
            }
        }
        t.users.insert(user.id, user.clone());
        debug!("Created user {}", user.id);
        Ok(())
    }

    async fn get_user_by_id(&self, user_id: Uuid) -> Result<Option<User>> {
        Ok(self.tables().users.get(&user_id).cloned())
    }

    async fn get_user_by_email(&self, email: &str) -> Result<Option<User>> {
        let email = normalize_email(email);
        Ok(self.tables().users.values().find(|u| u.email == email).cloned())
    }

    async fn get_user_by_google_sub(&self, google_sub: &str) -> Result<Option<User>> {
        Ok(self
            .tables()
            .users
            .values()
            .find(|u| u.google_sub.as_deref() == Some(google_sub))
            .cloned())
    }

    async fn update_user(&self, user: &User) -> Result<()> {
        let mut t = self.tables();
        if let Some(sub) = &user.google_sub {
            if t.users
                .values()
                .any(|u| u.id != user.id && u.google_sub.as_deref() == Some(sub.as_str()))
            {
                return Err(CoreError::Conflict("google account already linked".into()));
            }
        }
        t.users.insert(user.id, user.clone());
        Ok(())
    }

    async fn list_users(&self, limit: usize, offset: usize) -> Result<Vec<User>> {
        let mut users: Vec<User> = self.tables().users.values().cloned().collect();
        users.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.email.cmp(&b.email)));
        Ok(users.into_iter().skip(offset).take(limit).collect())
    }

    async fn create_refresh_token(&self, token: &RefreshToken) -> Result<()> {
        self.tables()
            .refresh_tokens
            .insert(token.token_hash.clone(), token.clone());
        Ok(())
    }

    async fn get_refresh_token(&self, token_hash: &str) -> Result<Option<RefreshToken>> {
        Ok(self.tables().refresh_tokens.get(token_hash).cloned())
    }

    async fn revoke_refresh_token(
        &self,
        token_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<RefreshToken>> {
        let mut t = self.tables();
        match t.refresh_tokens.get_mut(token_hash) {
            Some(token) if token.revoked_at.is_none() => {
                token.revoked_at = Some(now);
                Ok(Some(token.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn revoke_user_refresh_tokens(&self, user_id: Uuid, now: DateTime<Utc>) -> Result<u64> {
        let mut t = self.tables();
        let mut revoked = 0;
        for token in t.refresh_tokens.values_mut() {
            if token.user_id == user_id && token.revoked_at.is_none() {
                token.revoked_at = Some(now);
                revoked += 1;
            }
        }
        Ok(revoked)
    }

    async fn save_otp(&self, otp: &OtpCode) -> Result<()> {
        let mut t = self.tables();
        t.otps
            .retain(|_, o| !(o.user_id == otp.user_id && o.purpose == otp.purpose));
        t.otps.insert(otp.id, otp.clone());
        Ok(())
    }

    async fn get_otp(&self, user_id: Uuid, purpose: OtpPurpose) -> Result<Option<OtpCode>> {
        Ok(self
            .tables()
            .otps
            .values()
            .find(|o| o.user_id == user_id && o.purpose == purpose)
            .cloned())
    }

    async fn update_otp(&self, otp: &OtpCode) -> Result<()> {
        let mut t = self.tables();
        if let Some(existing) = t.otps.get_mut(&otp.id) {
            *existing = otp.clone();
        }
        Ok(())
    }

    async fn delete_otp(&self, otp_id: Uuid) -> Result<()> {
        self.tables().otps.remove(&otp_id);
        Ok(())
    }

    async fn create_plan(&self, plan: &MembershipPlan) -> Result<()> {
        self.tables().plans.insert(plan.id, plan.clone());
        Ok(())
    }

    async fn get_plan(&self, plan_id: Uuid) -> Result<Option<MembershipPlan>> {
        Ok(self.tables().plans.get(&plan_id).cloned())
    }

    async fn list_plans(&self, include_inactive: bool) -> Result<Vec<MembershipPlan>> {
        let mut plans: Vec<MembershipPlan> = self
            .tables()
            .plans
            .values()
            .filter(|p| include_inactive || p.active)
            .cloned()
            .collect();
        plans.sort_by(|a, b| a.price_cents.cmp(&b.price_cents).then(a.name.cmp(&b.name)));
        Ok(plans)
    }

    async fn update_plan(&self, plan: &MembershipPlan) -> Result<()> {
        self.tables().plans.insert(plan.id, plan.clone());
        Ok(())
    }

    async fn create_membership(&self, membership: &Membership) -> Result<()> {
        self.tables()
            .memberships
            .insert(membership.id, membership.clone());
        Ok(())
    }

    async fn get_membership(&self, membership_id: Uuid) -> Result<Option<Membership>> {
        Ok(self.tables().memberships.get(&membership_id).cloned())
    }

    async fn list_memberships_for_user(&self, user_id: Uuid) -> Result<Vec<Membership>> {
        let memberships: Vec<Membership> = self
            .tables()
            .memberships
            .values()
            .filter(|m| m.user_id == user_id)
            .cloned()
            .collect();
        Ok(sorted_newest_first(memberships, |m| m.created_at))
    }

    async fn update_membership(&self, membership: &Membership) -> Result<()> {
        self.tables()
            .memberships
            .insert(membership.id, membership.clone());
        Ok(())
    }

    async fn create_payment(&self, payment: &Payment) -> Result<()> {
        let mut t = self.tables();
        if t.payments.values().any(|p| p.reference == payment.reference) {
            return Err(CoreError::Conflict(format!(
                "payment reference {} already exists",
                payment.reference
            )));
        }
        t.payments.insert(payment.id, payment.clone());
        Ok(())
    }

    async fn get_payment(&self, payment_id: Uuid) -> Result<Option<Payment>> {
        Ok(self.tables().payments.get(&payment_id).cloned())
    }

    async fn get_payment_by_reference(&self, reference: &str) -> Result<Option<Payment>> {
        Ok(self
            .tables()
            .payments
            .values()
            .find(|p| p.reference == reference)
            .cloned())
    }

    async fn complete_payment(
        &self,
        payment_id: Uuid,
        status: PaymentStatus,
        provider_txn_id: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let mut t = self.tables();
        match t.payments.get_mut(&payment_id) {
            Some(payment) if payment.status == PaymentStatus::Pending => {
                payment.status = status;
                payment.provider_txn_id = provider_txn_id.map(str::to_string);
                payment.completed_at = Some(now);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn create_check_in(&self, check_in: &CheckIn) -> Result<()> {
        let mut t = self.tables();
        if t.check_ins.values().any(|c| {
            c.user_id == check_in.user_id && c.check_in_date == check_in.check_in_date
        }) {
            return Err(CoreError::Conflict(format!(
                "member already checked in on {}",
                check_in.check_in_date
            )));
        }
        t.check_ins.insert(check_in.id, check_in.clone());
        Ok(())
    }

    async fn list_check_ins_for_user(&self, user_id: Uuid) -> Result<Vec<CheckIn>> {
        let check_ins: Vec<CheckIn> = self
            .tables()
            .check_ins
            .values()
            .filter(|c| c.user_id == user_id)
            .cloned()
            .collect();
        Ok(sorted_newest_first(check_ins, |c| c.checked_in_at))
    }

    async fn list_check_ins_on(&self, date: NaiveDate) -> Result<Vec<CheckIn>> {
        let mut check_ins: Vec<CheckIn> = self
            .tables()
            .check_ins
            .values()
            .filter(|c| c.check_in_date == date)
            .cloned()
            .collect();
        check_ins.sort_by_key(|c| c.checked_in_at);
        Ok(check_ins)
    }

    async fn upsert_coach_profile(&self, profile: &CoachProfile) -> Result<()> {
        self.tables()
            .coaches
            .insert(profile.user_id, profile.clone());
        Ok(())
    }

    async fn get_coach_profile(&self, user_id: Uuid) -> Result<Option<CoachProfile>> {
        Ok(self.tables().coaches.get(&user_id).cloned())
    }

    async fn list_coach_profiles(&self) -> Result<Vec<CoachProfile>> {
        let mut coaches: Vec<CoachProfile> = self.tables().coaches.values().cloned().collect();
        coaches.sort_by_key(|c| c.created_at);
        Ok(coaches)
    }

    async fn create_booking(&self, booking: &Booking) -> Result<()> {
        let mut t = self.tables();
        if t.bookings.values().any(|b| b.conflicts_with(booking)) {
            return Err(CoreError::Conflict("time slot is already booked".into()));
        }
        t.bookings.insert(booking.id, booking.clone());
        Ok(())
    }

    async fn get_booking(&self, booking_id: Uuid) -> Result<Option<Booking>> {
        Ok(self.tables().bookings.get(&booking_id).cloned())
    }

    async fn update_booking(&self, booking: &Booking) -> Result<()> {
        self.tables().bookings.insert(booking.id, booking.clone());
        Ok(())
    }

    async fn list_bookings_for_member(&self, member_id: Uuid) -> Result<Vec<Booking>> {
        let mut bookings: Vec<Booking> = self
            .tables()
            .bookings
            .values()
            .filter(|b| b.member_id == member_id)
            .cloned()
            .collect();
        bookings.sort_by_key(|b| b.starts_at);
        Ok(bookings)
    }

    async fn list_bookings_for_coach(&self, coach_id: Uuid) -> Result<Vec<Booking>> {
        let mut bookings: Vec<Booking> = self
            .tables()
            .bookings
            .values()
            .filter(|b| b.coach_id == coach_id)
            .cloned()
            .collect();
        bookings.sort_by_key(|b| b.starts_at);
        Ok(bookings)
    }

    async fn create_product(&self, product: &Product) -> Result<()> {
        self.tables().products.insert(product.id, product.clone());
        Ok(())
    }

    async fn get_product(&self, product_id: Uuid) -> Result<Option<Product>> {
        Ok(self.tables().products.get(&product_id).cloned())
    }

    async fn list_products(
        &self,
        category: Option<&str>,
        include_inactive: bool,
    ) -> Result<Vec<Product>> {
        let mut products: Vec<Product> = self
            .tables()
            .products
            .values()
            .filter(|p| include_inactive || p.active)
            .filter(|p| category.map_or(true, |c| p.category.eq_ignore_ascii_case(c)))
            .cloned()
            .collect();
        products.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(products)
    }

    async fn update_product(&self, product: &Product) -> Result<()> {
        self.tables().products.insert(product.id, product.clone());
        Ok(())
    }

    async fn list_cart_items(&self, user_id: Uuid) -> Result<Vec<CartItem>> {
        Ok(self.tables().carts.get(&user_id).cloned().unwrap_or_default())
    }

    async fn set_cart_item(&self, item: &CartItem) -> Result<()> {
        let mut t = self.tables();
        let cart = t.carts.entry(item.user_id).or_default();
        cart.retain(|line| line.product_id != item.product_id);
        if item.quantity > 0 {
            cart.push(item.clone());
            cart.sort_by_key(|line| line.added_at);
        }
        Ok(())
    }

    async fn remove_cart_item(&self, user_id: Uuid, product_id: Uuid) -> Result<()> {
        if let Some(cart) = self.tables().carts.get_mut(&user_id) {
            cart.retain(|line| line.product_id != product_id);
        }
        Ok(())
    }

    async fn clear_cart(&self, user_id: Uuid) -> Result<()> {
        self.tables().carts.remove(&user_id);
        Ok(())
    }

    async fn place_order(&self, order: &Order) -> Result<()> {
        let mut t = self.tables();
        for item in &order.items {
            let available = t.products.get(&item.product_id).map_or(0, |p| p.stock);
            if available < item.quantity {
                return Err(CoreError::InsufficientStock {
                    product_id: item.product_id,
                });
            }
        }
        for item in &order.items {
            if let Some(product) = t.products.get_mut(&item.product_id) {
                product.stock -= item.quantity;
            }
        }
        t.orders.insert(order.id, order.clone());
        t.carts.remove(&order.user_id);
        debug!("Placed order {} with {} lines", order.id, order.items.len());
        Ok(())
    }

    async fn get_order(&self, order_id: Uuid) -> Result<Option<Order>> {
        Ok(self.tables().orders.get(&order_id).cloned())
    }

    async fn list_orders_for_user(&self, user_id: Uuid) -> Result<Vec<Order>> {
        let orders: Vec<Order> = self
            .tables()
            .orders
            .values()
            .filter(|o| o.user_id == user_id)
            .cloned()
            .collect();
        Ok(sorted_newest_first(orders, |o| o.created_at))
    }

    async fn mark_order_paid(&self, order_id: Uuid) -> Result<bool> {
        let mut t = self.tables();
        match t.orders.get_mut(&order_id) {
            Some(order) if order.status == OrderStatus::PendingPayment => {
                order.status = OrderStatus::Paid;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn cancel_order(&self, order_id: Uuid) -> Result<bool> {
        let mut t = self.tables();
        let items = match t.orders.get_mut(&order_id) {
            Some(order) if order.status == OrderStatus::PendingPayment => {
                order.status = OrderStatus::Cancelled;
                order.items.clone()
            }
            _ => return Ok(false),
        };
        for item in items {
            if let Some(product) = t.products.get_mut(&item.product_id) {
                product.stock += item.quantity;
            }
        }
        Ok(true)
    }

    async fn create_promotion(&self, promotion: &Promotion) -> Result<()> {
        let mut t = self.tables();
        if t.promotions.values().any(|p| p.code == promotion.code) {
            return Err(CoreError::Conflict(format!(
                "promotion code {} already exists",
                promotion.code
            )));
        }
        t.promotions.insert(promotion.id, promotion.clone());
        Ok(())
    }

    async fn get_promotion(&self, promotion_id: Uuid) -> Result<Option<Promotion>> {
        Ok(self.tables().promotions.get(&promotion_id).cloned())
    }

    async fn get_promotion_by_code(&self, code: &str) -> Result<Option<Promotion>> {
        let code = normalize_promo_code(code);
        Ok(self
            .tables()
            .promotions
            .values()
            .find(|p| p.code == code)
            .cloned())
    }

    async fn list_promotions(&self) -> Result<Vec<Promotion>> {
        let promotions: Vec<Promotion> = self.tables().promotions.values().cloned().collect();
        Ok(sorted_newest_first(promotions, |p| p.created_at))
    }

    async fn update_promotion(&self, promotion: &Promotion) -> Result<()> {
        self.tables()
            .promotions
            .insert(promotion.id, promotion.clone());
        Ok(())
    }

    async fn redeem_promotion(&self, promotion_id: Uuid) -> Result<bool> {
        let mut t = self.tables();
        match t.promotions.get_mut(&promotion_id) {
            Some(promo) if promo.max_redemptions.map_or(true, |max| promo.redemptions < max) => {
                promo.redemptions += 1;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn release_promotion(&self, promotion_id: Uuid) -> Result<()> {
        if let Some(promo) = self.tables().promotions.get_mut(&promotion_id) {
            promo.redemptions = promo.redemptions.saturating_sub(1);
        }
        Ok(())
    }
}
