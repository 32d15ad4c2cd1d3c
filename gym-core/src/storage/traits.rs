use crate::common::error::Result;
use crate::domain::*;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use uuid::Uuid;

/// Storage trait for persisting gym data (accounts, memberships, payments, visits, bookings and sales)
#[async_trait]
pub trait Storage: Send + Sync {
    // User operations
    /// Fails with `CoreError::Conflict` when the email or Google subject is taken.
    async fn create_user(&self, user: &User) -> Result<()>;
    async fn get_user_by_id(&self, user_id: Uuid) -> Result<Option<User>>;
    async fn get_user_by_email(&self, email: &str) -> Result<Option<User>>;
    async fn get_user_by_google_sub(&self, google_sub: &str) -> Result<Option<User>>;
    async fn update_user(&self, user: &User) -> Result<()>;
    async fn list_users(&self, limit: usize, offset: usize) -> Result<Vec<User>>;

    // Refresh token operations
    async fn create_refresh_token(&self, token: &RefreshToken) -> Result<()>;
    async fn get_refresh_token(&self, token_hash: &str) -> Result<Option<RefreshToken>>;
    /// Revokes the token only if it is not revoked yet and returns the revoked row; `None` otherwise.
    async fn revoke_refresh_token(
        &self,
        token_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<RefreshToken>>;
    async fn revoke_user_refresh_tokens(&self, user_id: Uuid, now: DateTime<Utc>) -> Result<u64>;

    // OTP operations (one live code per user and purpose)
    async fn save_otp(&self, otp: &OtpCode) -> Result<()>;
    async fn get_otp(&self, user_id: Uuid, purpose: OtpPurpose) -> Result<Option<OtpCode>>;
    async fn update_otp(&self, otp: &OtpCode) -> Result<()>;
    async fn delete_otp(&self, otp_id: Uuid) -> Result<()>;

    // Membership plan operations
    async fn create_plan(&self, plan: &MembershipPlan) -> Result<()>;
    async fn get_plan(&self, plan_id: Uuid) -> Result<Option<MembershipPlan>>;
    async fn list_plans(&self, include_inactive: bool) -> Result<Vec<MembershipPlan>>;
    async fn update_plan(&self, plan: &MembershipPlan) -> Result<()>;

    // Membership operations
    async fn create_membership(&self, membership: &Membership) -> Result<()>;
    async fn get_membership(&self, membership_id: Uuid) -> Result<Option<Membership>>;
    /// Newest first.
    async fn list_memberships_for_user(&self, user_id: Uuid) -> Result<Vec<Membership>>;
    async fn update_membership(&self, membership: &Membership) -> Result<()>;

    // Payment operations
    async fn create_payment(&self, payment: &Payment) -> Result<()>;
    async fn get_payment(&self, payment_id: Uuid) -> Result<Option<Payment>>;
    async fn get_payment_by_reference(&self, reference: &str) -> Result<Option<Payment>>;
    /// Moves a `Pending` payment to `status` exactly once; returns whether this call did it.
    async fn complete_payment(
        &self,
        payment_id: Uuid,
        status: PaymentStatus,
        provider_txn_id: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<bool>;

    // Check-in operations
    /// Fails with `CoreError::Conflict` when the member already checked in that day.
    async fn create_check_in(&self, check_in: &CheckIn) -> Result<()>;
    /// Newest first.
    async fn list_check_ins_for_user(&self, user_id: Uuid) -> Result<Vec<CheckIn>>;
    async fn list_check_ins_on(&self, date: NaiveDate) -> Result<Vec<CheckIn>>;

    // Coach operations
    async fn upsert_coach_profile(&self, profile: &CoachProfile) -> Result<()>;
    async fn get_coach_profile(&self, user_id: Uuid) -> Result<Option<CoachProfile>>;
    async fn list_coach_profiles(&self) -> Result<Vec<CoachProfile>>;

    // Booking operations
    /// Fails with `CoreError::Conflict` when coach or member already has an overlapping booking.
    async fn create_booking(&self, booking: &Booking) -> Result<()>;
    async fn get_booking(&self, booking_id: Uuid) -> Result<Option<Booking>>;
    async fn update_booking(&self, booking: &Booking) -> Result<()>;
    /// Ordered by start time.
    async fn list_bookings_for_member(&self, member_id: Uuid) -> Result<Vec<Booking>>;
    /// Ordered by start time.
    async fn list_bookings_for_coach(&self, coach_id: Uuid) -> Result<Vec<Booking>>;

    // Product operations
    async fn create_product(&self, product: &Product) -> Result<()>;
    async fn get_product(&self, product_id: Uuid) -> Result<Option<Product>>;
    async fn list_products(
        &self,
        category: Option<&str>,
        include_inactive: bool,
    ) -> Result<Vec<Product>>;
    async fn update_product(&self, product: &Product) -> Result<()>;

    // Cart operations
    async fn list_cart_items(&self, user_id: Uuid) -> Result<Vec<CartItem>>;
    /// Inserts or replaces the line; a quantity of zero or less removes it.
    async fn set_cart_item(&self, item: &CartItem) -> Result<()>;
    async fn remove_cart_item(&self, user_id: Uuid, product_id: Uuid) -> Result<()>;
    async fn clear_cart(&self, user_id: Uuid) -> Result<()>;

    // Order operations
    /// Reserves stock for every item, stores the order and empties the buyer's cart, all or nothing.
    async fn place_order(&self, order: &Order) -> Result<()>;
    async fn get_order(&self, order_id: Uuid) -> Result<Option<Order>>;
    /// Newest first.
    async fn list_orders_for_user(&self, user_id: Uuid) -> Result<Vec<Order>>;
    /// `PendingPayment` -> `Paid`; returns whether this call did it.
    async fn mark_order_paid(&self, order_id: Uuid) -> Result<bool>;
    /// `PendingPayment` -> `Cancelled` with stock returned; returns whether this call did it.
    async fn cancel_order(&self, order_id: Uuid) -> Result<bool>;

    // Promotion operations
    /// Fails with `CoreError::Conflict` on a duplicate code.
    async fn create_promotion(&self, promotion: &Promotion) -> Result<()>;
    async fn get_promotion(&self, promotion_id: Uuid) -> Result<Option<Promotion>>;
    async fn get_promotion_by_code(&self, code: &str) -> Result<Option<Promotion>>;
    async fn list_promotions(&self) -> Result<Vec<Promotion>>;
    async fn update_promotion(&self, promotion: &Promotion) -> Result<()>;
    /// Counts one use while under `max_redemptions`; returns whether it was counted.
    async fn redeem_promotion(&self, promotion_id: Uuid) -> Result<bool>;
    async fn release_promotion(&self, promotion_id: Uuid) -> Result<()>;
}
