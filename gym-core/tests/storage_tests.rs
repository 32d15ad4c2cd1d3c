//! One behavioural suite for every `Storage` backend. The in-memory backend
//! always runs; the libSQL backend runs against a temporary local file when
//! the `db` feature is enabled.

use chrono::{DateTime, Duration, TimeZone, Utc};
use gym_core::common::error::CoreError;
use gym_core::storage::{InMemoryStorage, Storage};
use gym_core::*;
use uuid::Uuid;

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap()
}

async fn user(storage: &dyn Storage, email: &str) -> User {
    let user = User::new(email, "Test User", Role::Member, t0());
    storage.create_user(&user).await.unwrap();
    user
}

async fn product(storage: &dyn Storage, name: &str, price_cents: i64, stock: i64) -> Product {
    let product = Product {
        id: Uuid::new_v4(),
        name: name.to_string(),
        description: None,
        category: "supplements".to_string(),
        price_cents,
        stock,
        active: true,
        created_at: t0(),
        updated_at: t0(),
    };
    storage.create_product(&product).await.unwrap();
    product
}

fn order_for(buyer: &User, lines: &[(&Product, i64)]) -> Order {
    let items: Vec<OrderItem> = lines
        .iter()
        .map(|(p, qty)| OrderItem {
            product_id: p.id,
            product_name: p.name.clone(),
            unit_price_cents: p.price_cents,
            quantity: *qty,
        })
        .collect();
    let subtotal = Order::subtotal(&items);
    Order {
        id: Uuid::new_v4(),
        user_id: buyer.id,
        status: OrderStatus::PendingPayment,
        subtotal_cents: subtotal,
        discount_cents: 0,
        total_cents: subtotal,
        promotion_id: None,
        payment_id: None,
        items,
        created_at: t0(),
    }
}

async fn active_membership(storage: &dyn Storage, member: &User) -> Membership {
    let plan = MembershipPlan {
        id: Uuid::new_v4(),
        name: "Monthly".to_string(),
        description: None,
        duration_days: 30,
        price_cents: 4_900,
        active: true,
        created_at: t0(),
    };
    storage.create_plan(&plan).await.unwrap();
    let mut membership = Membership::pending(member.id, plan.id, t0());
    membership.status = MembershipStatus::Active;
    membership.starts_at = Some(t0());
    membership.ends_at = Some(t0() + plan.duration());
    storage.create_membership(&membership).await.unwrap();
    membership
}

fn booking(coach: &User, member: &User, starts_at: DateTime<Utc>, minutes: i64) -> Booking {
    Booking {
        id: Uuid::new_v4(),
        coach_id: coach.id,
        member_id: member.id,
        starts_at,
        ends_at: starts_at + Duration::minutes(minutes),
        status: BookingStatus::Booked,
        note: None,
        created_at: t0(),
        cancelled_at: None,
    }
}

async fn users_are_unique_by_email(storage: &dyn Storage) {
    let first = user(storage, "ana@example.com").await;
    let duplicate = User::new("ANA@example.com", "Other", Role::Member, t0());
    let err = storage.create_user(&duplicate).await.unwrap_err();
    assert!(matches!(err, CoreError::Conflict(_)), "got {err:?}");

    let found = storage
        .get_user_by_email("ana@example.com")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(found.id, first.id);
    assert!(found.password_hash.is_none());
}

async fn refresh_token_is_revoked_once(storage: &dyn Storage) {
    let owner = user(storage, "rt@example.com").await;
    let token = RefreshToken {
        id: Uuid::new_v4(),
        user_id: owner.id,
        token_hash: "a".repeat(64),
        family_id: Uuid::new_v4(),
        expires_at: t0() + Duration::days(30),
        revoked_at: None,
        created_at: t0(),
    };
    storage.create_refresh_token(&token).await.unwrap();

    let later = t0() + Duration::minutes(5);
    let revoked = storage
        .revoke_refresh_token(&token.token_hash, later)
        .await
        .unwrap()
        .expect("first revocation wins");
    assert_eq!(revoked.revoked_at, Some(later));
    assert!(storage
        .revoke_refresh_token(&token.token_hash, later)
        .await
        .unwrap()
        .is_none());
}

async fn otp_is_replaced_per_purpose(storage: &dyn Storage) {
    let owner = user(storage, "otp@example.com").await;
    let mut otp = OtpCode {
        id: Uuid::new_v4(),
        user_id: owner.id,
        purpose: OtpPurpose::EmailVerification,
        code_hash: "first".to_string(),
        expires_at: t0() + Duration::minutes(5),
        attempts: 0,
        last_sent_at: t0(),
        created_at: t0(),
    };
    storage.save_otp(&otp).await.unwrap();

    otp.id = Uuid::new_v4();
    otp.code_hash = "second".to_string();
    storage.save_otp(&otp).await.unwrap();

    let live = storage
        .get_otp(owner.id, OtpPurpose::EmailVerification)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(live.code_hash, "second");
    assert!(storage
        .get_otp(owner.id, OtpPurpose::PasswordReset)
        .await
        .unwrap()
        .is_none());

    storage.delete_otp(live.id).await.unwrap();
    assert!(storage
        .get_otp(owner.id, OtpPurpose::EmailVerification)
        .await
        .unwrap()
        .is_none());
}

async fn payment_completes_exactly_once(storage: &dyn Storage) {
    let buyer = user(storage, "pay@example.com").await;
    let payment = Payment::pending(buyer.id, PaymentKind::Order, Uuid::new_v4(), 2_500, "USD", t0());
    storage.create_payment(&payment).await.unwrap();

    assert!(storage
        .complete_payment(payment.id, PaymentStatus::Paid, Some("txn_1"), t0())
        .await
        .unwrap());
    assert!(!storage
        .complete_payment(payment.id, PaymentStatus::Failed, None, t0())
        .await
        .unwrap());

    let stored = storage
        .get_payment_by_reference(&payment.reference)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.status, PaymentStatus::Paid);
    assert_eq!(stored.provider_txn_id.as_deref(), Some("txn_1"));
    assert_eq!(stored.completed_at, Some(t0()));
}

async fn one_check_in_per_day(storage: &dyn Storage) {
    let member = user(storage, "gym@example.com").await;
    let membership = active_membership(storage, &member).await;

    let morning = CheckIn::new(member.id, membership.id, member.id, t0());
    storage.create_check_in(&morning).await.unwrap();

    let evening = CheckIn::new(member.id, membership.id, member.id, t0() + Duration::hours(8));
    let err = storage.create_check_in(&evening).await.unwrap_err();
    assert!(matches!(err, CoreError::Conflict(_)), "got {err:?}");

    let tomorrow = CheckIn::new(member.id, membership.id, member.id, t0() + Duration::days(1));
    storage.create_check_in(&tomorrow).await.unwrap();

    let history = storage.list_check_ins_for_user(member.id).await.unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].id, tomorrow.id);
    assert_eq!(
        storage.list_check_ins_on(t0().date_naive()).await.unwrap().len(),
        1
    );
}

async fn overlapping_bookings_conflict(storage: &dyn Storage) {
    let coach = user(storage, "coach@example.com").await;
    let member = user(storage, "member@example.com").await;
    let other = user(storage, "other@example.com").await;
    let start = t0() + Duration::days(1);

    let mut first = booking(&coach, &member, start, 60);
    storage.create_booking(&first).await.unwrap();

    let clash = booking(&coach, &other, start + Duration::minutes(15), 30);
    let err = storage.create_booking(&clash).await.unwrap_err();
    assert!(matches!(err, CoreError::Conflict(_)), "got {err:?}");

    // Half-open intervals: back to back is fine
    let back_to_back = booking(&coach, &other, start + Duration::minutes(60), 30);
    storage.create_booking(&back_to_back).await.unwrap();

    // A cancelled booking frees its slot
    first.status = BookingStatus::Cancelled;
    first.cancelled_at = Some(t0());
    storage.update_booking(&first).await.unwrap();
    storage.create_booking(&clash).await.unwrap();

    let schedule = storage.list_bookings_for_coach(coach.id).await.unwrap();
    assert_eq!(schedule.len(), 3);
    assert!(schedule.windows(2).all(|w| w[0].starts_at <= w[1].starts_at));
}

async fn place_order_is_all_or_nothing(storage: &dyn Storage) {
    let buyer = user(storage, "shop@example.com").await;
    let shaker = product(storage, "Shaker", 900, 5).await;
    let whey = product(storage, "Whey", 3_500, 1).await;
    storage
        .set_cart_item(&CartItem {
            user_id: buyer.id,
            product_id: shaker.id,
            quantity: 2,
            added_at: t0(),
        })
        .await
        .unwrap();

    let too_much = order_for(&buyer, &[(&shaker, 2), (&whey, 2)]);
    let err = storage.place_order(&too_much).await.unwrap_err();
    assert!(
        matches!(err, CoreError::InsufficientStock { product_id } if product_id == whey.id),
        "got {err:?}"
    );
    assert_eq!(storage.get_product(shaker.id).await.unwrap().unwrap().stock, 5);
    assert!(storage.get_order(too_much.id).await.unwrap().is_none());
    assert_eq!(storage.list_cart_items(buyer.id).await.unwrap().len(), 1);

    let order = order_for(&buyer, &[(&shaker, 2), (&whey, 1)]);
    storage.place_order(&order).await.unwrap();
    assert_eq!(storage.get_product(shaker.id).await.unwrap().unwrap().stock, 3);
    assert_eq!(storage.get_product(whey.id).await.unwrap().unwrap().stock, 0);
    assert!(storage.list_cart_items(buyer.id).await.unwrap().is_empty());

    let stored = storage.get_order(order.id).await.unwrap().unwrap();
    assert_eq!(stored.items, order.items);
    assert_eq!(stored.total_cents, 2 * 900 + 3_500);
}

async fn cancel_order_restocks_once(storage: &dyn Storage) {
    let buyer = user(storage, "cancel@example.com").await;
    let towel = product(storage, "Towel", 1_200, 4).await;
    let order = order_for(&buyer, &[(&towel, 3)]);
    storage.place_order(&order).await.unwrap();

    assert!(storage.cancel_order(order.id).await.unwrap());
    assert!(!storage.cancel_order(order.id).await.unwrap());
    assert!(!storage.mark_order_paid(order.id).await.unwrap());
    assert_eq!(storage.get_product(towel.id).await.unwrap().unwrap().stock, 4);
    assert_eq!(
        storage.get_order(order.id).await.unwrap().unwrap().status,
        OrderStatus::Cancelled
    );
}

async fn promotion_redemptions_are_capped(storage: &dyn Storage) {
    let promo = Promotion {
        id: Uuid::new_v4(),
        code: "SPRING10".to_string(),
        description: None,
        discount: DiscountKind::Percent(10),
        scope: PromotionScope::All,
        starts_at: t0(),
        ends_at: t0() + Duration::days(30),
        max_redemptions: Some(1),
        redemptions: 0,
        min_amount_cents: 0,
        active: true,
        created_at: t0(),
    };
    storage.create_promotion(&promo).await.unwrap();
    let err = storage.create_promotion(&Promotion { id: Uuid::new_v4(), ..promo.clone() }).await.unwrap_err();
    assert!(matches!(err, CoreError::Conflict(_)), "got {err:?}");

    let found = storage.get_promotion_by_code(" spring10 ").await.unwrap().unwrap();
    assert_eq!(found.discount, DiscountKind::Percent(10));

    assert!(storage.redeem_promotion(promo.id).await.unwrap());
    assert!(!storage.redeem_promotion(promo.id).await.unwrap());

    storage.release_promotion(promo.id).await.unwrap();
    storage.release_promotion(promo.id).await.unwrap();
    let released = storage.get_promotion(promo.id).await.unwrap().unwrap();
    assert_eq!(released.redemptions, 0);
}

async fn cart_quantity_zero_removes_line(storage: &dyn Storage) {
    let buyer = user(storage, "cart@example.com").await;
    let bar = product(storage, "Protein bar", 300, 50).await;
    let line = CartItem {
        user_id: buyer.id,
        product_id: bar.id,
        quantity: 3,
        added_at: t0(),
    };
    storage.set_cart_item(&line).await.unwrap();
    storage.set_cart_item(&CartItem { quantity: 5, ..line.clone() }).await.unwrap();
    let cart = storage.list_cart_items(buyer.id).await.unwrap();
    assert_eq!(cart.len(), 1);
    assert_eq!(cart[0].quantity, 5);

    storage.set_cart_item(&CartItem { quantity: 0, ..line }).await.unwrap();
    assert!(storage.list_cart_items(buyer.id).await.unwrap().is_empty());
}

async fn run_suite(storage: &dyn Storage) {
    users_are_unique_by_email(storage).await;
    refresh_token_is_revoked_once(storage).await;
    otp_is_replaced_per_purpose(storage).await;
    payment_completes_exactly_once(storage).await;
    one_check_in_per_day(storage).await;
    overlapping_bookings_conflict(storage).await;
    place_order_is_all_or_nothing(storage).await;
    cancel_order_restocks_once(storage).await;
    promotion_redemptions_are_capped(storage).await;
    cart_quantity_zero_removes_line(storage).await;
}

#[tokio::test]
async fn test_in_memory_storage() {
    let storage = InMemoryStorage::new();
    run_suite(&storage).await;
}

#[cfg(feature = "db")]
mod libsql_backend {
    use super::*;
    use gym_core::storage::DatabaseStorage;

    #[tokio::test]
    async fn test_database_storage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gym-test.db");
        let storage = DatabaseStorage::connect(path.to_str().unwrap(), None)
            .await
            .unwrap();
        run_suite(&storage).await;
    }

    #[tokio::test]
    async fn test_migrations_are_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gym-migrate.db");
        let url = path.to_str().unwrap();
        DatabaseStorage::connect(url, None).await.unwrap();
        let storage = DatabaseStorage::connect(url, None).await.unwrap();
        assert!(storage.list_promotions().await.unwrap().is_empty());
    }
}
