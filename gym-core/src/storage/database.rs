use super::traits::Storage;
use crate::common::error::{CoreError, Result};
use crate::database::DatabaseManager;
use crate::domain::*;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use libsql::{params, Connection, Row, Value};
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

const USER_COLUMNS: &str = "id, email, full_name, phone, password_hash, google_sub, role, email_verified, active, created_at, updated_at";
const REFRESH_COLUMNS: &str = "id, user_id, token_hash, family_id, expires_at, revoked_at, created_at";
const OTP_COLUMNS: &str = "id, user_id, purpose, code_hash, expires_at, attempts, last_sent_at, created_at";
const PLAN_COLUMNS: &str = "id, name, description, duration_days, price_cents, active, created_at";
const MEMBERSHIP_COLUMNS: &str = "id, user_id, plan_id, status, starts_at, ends_at, payment_id, created_at";
const PAYMENT_COLUMNS: &str = "id, user_id, kind, target_id, amount_cents, currency, status, reference, provider_txn_id, promotion_id, created_at, completed_at";
const CHECK_IN_COLUMNS: &str = "id, user_id, membership_id, checked_in_by, checked_in_at, check_in_date";
const COACH_COLUMNS: &str = "user_id, specialty, bio, created_at";
const BOOKING_COLUMNS: &str = "id, coach_id, member_id, starts_at, ends_at, status, note, created_at, cancelled_at";
const PRODUCT_COLUMNS: &str = "id, name, description, category, price_cents, stock, active, created_at, updated_at";
const CART_COLUMNS: &str = "user_id, product_id, quantity, added_at";
const ORDER_COLUMNS: &str = "id, user_id, status, subtotal_cents, discount_cents, total_cents, promotion_id, payment_id, created_at";
const PROMOTION_COLUMNS: &str = "id, code, description, discount_type, discount_value, scope, starts_at, ends_at, max_redemptions, redemptions, min_amount_cents, active, created_at";

/// Database storage implementation using Turso/libSQL with one table per entity
pub struct DatabaseStorage {
    db: Arc<DatabaseManager>,
}

impl DatabaseStorage {
    pub fn new(db: Arc<DatabaseManager>) -> Self {
        Self { db }
    }

    /// Connect, migrate and wrap in one step.
    pub async fn connect(url: &str, auth_token: Option<&str>) -> Result<Self> {
        let db_manager = DatabaseManager::new(url, auth_token).await?;
        db_manager.run_migrations().await?;
        info!("Database storage ready");
        Ok(Self::new(Arc::new(db_manager)))
    }

    async fn conn(&self) -> Result<Connection> {
        self.db.get_connection().await
    }

    async fn query_all<T, F>(&self, sql: &str, params: impl libsql::params::IntoParams, map: F) -> Result<Vec<T>>
    where
        F: Fn(&Row) -> Result<T>,
    {
        let conn = self.conn().await?;
        collect_rows(&conn, sql, params, map).await
    }

    async fn query_one<T, F>(&self, sql: &str, params: impl libsql::params::IntoParams, map: F) -> Result<Option<T>>
    where
        F: Fn(&Row) -> Result<T>,
    {
        Ok(self.query_all(sql, params, map).await?.into_iter().next())
    }

    async fn execute(&self, sql: &str, params: impl libsql::params::IntoParams) -> Result<u64> {
        let conn = self.conn().await?;
        conn.execute(sql, params)
            .await
            .map_err(|e| write_error(e, "write"))
    }
}

async fn collect_rows<T, F>(
    conn: &Connection,
    sql: &str,
    params: impl libsql::params::IntoParams,
    map: F,
) -> Result<Vec<T>>
where
    F: Fn(&Row) -> Result<T>,
{
    let mut rows = conn
        .query(sql, params)
        .await
        .map_err(|e| CoreError::database(format!("Failed to run query: {e}")))?;

    let mut results = Vec::new();
    while let Some(row) = rows
        .next()
        .await
        .map_err(|e| CoreError::database(format!("Failed to read row: {e}")))?
    {
        results.push(map(&row)?);
    }
    Ok(results)
}

/// Unique-constraint failures surface as `Conflict`; everything else is a database error.
fn write_error(e: libsql::Error, what: &str) -> CoreError {
    let message = e.to_string();
    if message.contains("UNIQUE constraint failed") {
        CoreError::Conflict(format!("{what} violates a uniqueness constraint"))
    } else {
        CoreError::database(format!("Failed to {what}: {message}"))
    }
}

// Column encoding

fn ts(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn opt_ts(at: Option<DateTime<Utc>>) -> Option<String> {
    at.map(ts)
}

fn opt_id(id: Option<Uuid>) -> Option<String> {
    id.map(|id| id.to_string())
}

fn flag(value: bool) -> i64 {
    i64::from(value)
}

// Column decoding

fn value(row: &Row, idx: i32) -> Result<Value> {
    row.get_value(idx)
        .map_err(|e| CoreError::database(format!("Failed to read column {idx}: {e}")))
}

fn opt_text(row: &Row, idx: i32) -> Result<Option<String>> {
    match value(row, idx)? {
        Value::Null => Ok(None),
        Value::Text(s) => Ok(Some(s)),
        other => Err(CoreError::database(format!("Column {idx}: expected text, got {other:?}"))),
    }
}

fn text(row: &Row, idx: i32) -> Result<String> {
    opt_text(row, idx)?.ok_or_else(|| CoreError::database(format!("Column {idx} is unexpectedly NULL")))
}

fn opt_int(row: &Row, idx: i32) -> Result<Option<i64>> {
    match value(row, idx)? {
        Value::Null => Ok(None),
        Value::Integer(i) => Ok(Some(i)),
        other => Err(CoreError::database(format!("Column {idx}: expected integer, got {other:?}"))),
    }
}

fn int(row: &Row, idx: i32) -> Result<i64> {
    opt_int(row, idx)?.ok_or_else(|| CoreError::database(format!("Column {idx} is unexpectedly NULL")))
}

fn boolean(row: &Row, idx: i32) -> Result<bool> {
    Ok(int(row, idx)? != 0)
}

fn small(row: &Row, idx: i32) -> Result<u32> {
    u32::try_from(int(row, idx)?).map_err(|e| CoreError::database(format!("Column {idx}: {e}")))
}

fn parse_uuid(raw: &str) -> Result<Uuid> {
    Uuid::parse_str(raw).map_err(|e| CoreError::database(format!("Invalid UUID `{raw}`: {e}")))
}

fn uuid(row: &Row, idx: i32) -> Result<Uuid> {
    parse_uuid(&text(row, idx)?)
}

fn opt_uuid(row: &Row, idx: i32) -> Result<Option<Uuid>> {
    opt_text(row, idx)?.as_deref().map(parse_uuid).transpose()
}

fn parse_ts(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|at| at.with_timezone(&Utc))
        .map_err(|e| CoreError::database(format!("Invalid timestamp `{raw}`: {e}")))
}

fn timestamp(row: &Row, idx: i32) -> Result<DateTime<Utc>> {
    parse_ts(&text(row, idx)?)
}

fn opt_timestamp(row: &Row, idx: i32) -> Result<Option<DateTime<Utc>>> {
    opt_text(row, idx)?.as_deref().map(parse_ts).transpose()
}

fn label<T>(row: &Row, idx: i32) -> Result<T>
where
    T: FromStr<Err = UnknownVariant>,
{
    text(row, idx)?
        .parse()
        .map_err(|e: UnknownVariant| CoreError::database(e.to_string()))
}

// Row mappers, column order matches the *_COLUMNS constants

fn user_from_row(row: &Row) -> Result<User> {
    Ok(User {
        id: uuid(row, 0)?,
        email: text(row, 1)?,
        full_name: text(row, 2)?,
        phone: opt_text(row, 3)?,
        password_hash: opt_text(row, 4)?,
        google_sub: opt_text(row, 5)?,
        role: label(row, 6)?,
        email_verified: boolean(row, 7)?,
        active: boolean(row, 8)?,
        created_at: timestamp(row, 9)?,
        updated_at: timestamp(row, 10)?,
    })
}

fn refresh_token_from_row(row: &Row) -> Result<RefreshToken> {
    Ok(RefreshToken {
        id: uuid(row, 0)?,
        user_id: uuid(row, 1)?,
        token_hash: text(row, 2)?,
        family_id: uuid(row, 3)?,
        expires_at: timestamp(row, 4)?,
        revoked_at: opt_timestamp(row, 5)?,
        created_at: timestamp(row, 6)?,
    })
}

fn otp_from_row(row: &Row) -> Result<OtpCode> {
    Ok(OtpCode {
        id: uuid(row, 0)?,
        user_id: uuid(row, 1)?,
        purpose: label(row, 2)?,
        code_hash: text(row, 3)?,
        expires_at: timestamp(row, 4)?,
        attempts: small(row, 5)?,
        last_sent_at: timestamp(row, 6)?,
        created_at: timestamp(row, 7)?,
    })
}

fn plan_from_row(row: &Row) -> Result<MembershipPlan> {
    Ok(MembershipPlan {
        id: uuid(row, 0)?,
        name: text(row, 1)?,
        description: opt_text(row, 2)?,
        duration_days: small(row, 3)?,
        price_cents: int(row, 4)?,
        active: boolean(row, 5)?,
        created_at: timestamp(row, 6)?,
    })
}

fn membership_from_row(row: &Row) -> Result<Membership> {
    Ok(Membership {
        id: uuid(row, 0)?,
        user_id: uuid(row, 1)?,
        plan_id: uuid(row, 2)?,
        status: label(row, 3)?,
        starts_at: opt_timestamp(row, 4)?,
        ends_at: opt_timestamp(row, 5)?,
        payment_id: opt_uuid(row, 6)?,
        created_at: timestamp(row, 7)?,
    })
}

fn payment_from_row(row: &Row) -> Result<Payment> {
    Ok(Payment {
        id: uuid(row, 0)?,
        user_id: uuid(row, 1)?,
        kind: label(row, 2)?,
        target_id: uuid(row, 3)?,
        amount_cents: int(row, 4)?,
        currency: text(row, 5)?,
        status: label(row, 6)?,
        reference: text(row, 7)?,
        provider_txn_id: opt_text(row, 8)?,
        promotion_id: opt_uuid(row, 9)?,
        created_at: timestamp(row, 10)?,
        completed_at: opt_timestamp(row, 11)?,
    })
}

fn check_in_from_row(row: &Row) -> Result<CheckIn> {
    let raw_date = text(row, 5)?;
    let check_in_date = NaiveDate::parse_from_str(&raw_date, "%Y-%m-%d")
        .map_err(|e| CoreError::database(format!("Invalid date `{raw_date}`: {e}")))?;
    Ok(CheckIn {
        id: uuid(row, 0)?,
        user_id: uuid(row, 1)?,
        membership_id: uuid(row, 2)?,
        checked_in_by: uuid(row, 3)?,
        checked_in_at: timestamp(row, 4)?,
        check_in_date,
    })
}

fn coach_from_row(row: &Row) -> Result<CoachProfile> {
    Ok(CoachProfile {
        user_id: uuid(row, 0)?,
        specialty: text(row, 1)?,
        bio: opt_text(row, 2)?,
        created_at: timestamp(row, 3)?,
    })
}

fn booking_from_row(row: &Row) -> Result<Booking> {
    Ok(Booking {
        id: uuid(row, 0)?,
        coach_id: uuid(row, 1)?,
        member_id: uuid(row, 2)?,
        starts_at: timestamp(row, 3)?,
        ends_at: timestamp(row, 4)?,
        status: label(row, 5)?,
        note: opt_text(row, 6)?,
        created_at: timestamp(row, 7)?,
        cancelled_at: opt_timestamp(row, 8)?,
    })
}

fn product_from_row(row: &Row) -> Result<Product> {
    Ok(Product {
        id: uuid(row, 0)?,
        name: text(row, 1)?,
        description: opt_text(row, 2)?,
        category: text(row, 3)?,
        price_cents: int(row, 4)?,
        stock: int(row, 5)?,
        active: boolean(row, 6)?,
        created_at: timestamp(row, 7)?,
        updated_at: timestamp(row, 8)?,
    })
}

fn cart_item_from_row(row: &Row) -> Result<CartItem> {
    Ok(CartItem {
        user_id: uuid(row, 0)?,
        product_id: uuid(row, 1)?,
        quantity: int(row, 2)?,
        added_at: timestamp(row, 3)?,
    })
}

/// Orders come back without items; `load_order_items` fills them in.
fn order_from_row(row: &Row) -> Result<Order> {
    Ok(Order {
        id: uuid(row, 0)?,
        user_id: uuid(row, 1)?,
        status: label(row, 2)?,
        subtotal_cents: int(row, 3)?,
        discount_cents: int(row, 4)?,
        total_cents: int(row, 5)?,
        promotion_id: opt_uuid(row, 6)?,
        payment_id: opt_uuid(row, 7)?,
        items: Vec::new(),
        created_at: timestamp(row, 8)?,
    })
}

fn order_item_from_row(row: &Row) -> Result<OrderItem> {
    Ok(OrderItem {
        product_id: uuid(row, 0)?,
        product_name: text(row, 1)?,
        unit_price_cents: int(row, 2)?,
        quantity: int(row, 3)?,
    })
}

fn promotion_from_row(row: &Row) -> Result<Promotion> {
    let kind = text(row, 3)?;
    let amount = int(row, 4)?;
    let discount = DiscountKind::from_parts(&kind, amount)
        .ok_or_else(|| CoreError::database(format!("Invalid discount {kind}={amount}")))?;
    Ok(Promotion {
        id: uuid(row, 0)?,
        code: text(row, 1)?,
        description: opt_text(row, 2)?,
        discount,
        scope: label(row, 5)?,
        starts_at: timestamp(row, 6)?,
        ends_at: timestamp(row, 7)?,
        max_redemptions: opt_int(row, 8)?
            .map(u32::try_from)
            .transpose()
            .map_err(|e| CoreError::database(format!("Invalid max_redemptions: {e}")))?,
        redemptions: small(row, 9)?,
        min_amount_cents: int(row, 10)?,
        active: boolean(row, 11)?,
        created_at: timestamp(row, 12)?,
    })
}

impl DatabaseStorage {
    async fn load_order_items(&self, order: &mut Order) -> Result<()> {
        order.items = self
            .query_all(
                "SELECT product_id, product_name, unit_price_cents, quantity FROM order_items WHERE order_id = ?1 ORDER BY line_no",
                params![order.id.to_string()],
                order_item_from_row,
            )
            .await?;
        Ok(())
    }

    async fn with_items(&self, mut orders: Vec<Order>) -> Result<Vec<Order>> {
        for order in orders.iter_mut() {
            self.load_order_items(order).await?;
        }
        Ok(orders)
    }
}

#[async_trait]
impl Storage for DatabaseStorage {
    async fn create_user(&self, user: &User) -> Result<()> {
        let sql = format!("INSERT INTO users ({USER_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)");
        let conn = self.conn().await?;
        conn.execute(
            &sql,
            params![
                user.id.to_string(),
                user.email.clone(),
                user.full_name.clone(),
                user.phone.clone(),
                user.password_hash.clone(),
                user.google_sub.clone(),
                user.role.as_str(),
                flag(user.email_verified),
                flag(user.active),
                ts(user.created_at),
                ts(user.updated_at)
            ],
        )
        .await
        .map_err(|e| write_error(e, "create user"))?;
        debug!("Inserted user {}", user.id);
        Ok(())
    }

    async fn get_user_by_id(&self, user_id: Uuid) -> Result<Option<User>> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1");
        self.query_one(&sql, params![user_id.to_string()], user_from_row).await
    }

    async fn get_user_by_email(&self, email: &str) -> Result<Option<User>> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE email = ?1");
        self.query_one(&sql, params![normalize_email(email)], user_from_row).await
    }

    async fn get_user_by_google_sub(&self, google_sub: &str) -> Result<Option<User>> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE google_sub = ?1");
        self.query_one(&sql, params![google_sub], user_from_row).await
    }

    async fn update_user(&self, user: &User) -> Result<()> {
        let conn = self.conn().await?;
        conn.execute(
            "UPDATE users SET email = ?2, full_name = ?3, phone = ?4, password_hash = ?5, google_sub = ?6,
                 role = ?7, email_verified = ?8, active = ?9, updated_at = ?10
             WHERE id = ?1",
            params![
                user.id.to_string(),
                user.email.clone(),
                user.full_name.clone(),
                user.phone.clone(),
                user.password_hash.clone(),
                user.google_sub.clone(),
                user.role.as_str(),
                flag(user.email_verified),
                flag(user.active),
                ts(user.updated_at)
            ],
        )
        .await
        .map_err(|e| write_error(e, "update user"))?;
        Ok(())
    }

    async fn list_users(&self, limit: usize, offset: usize) -> Result<Vec<User>> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users ORDER BY created_at, email LIMIT ?1 OFFSET ?2");
        self.query_all(&sql, params![limit as i64, offset as i64], user_from_row).await
    }

    async fn create_refresh_token(&self, token: &RefreshToken) -> Result<()> {
        let sql = format!("INSERT INTO refresh_tokens ({REFRESH_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)");
        self.execute(
            &sql,
            params![
                token.id.to_string(),
                token.user_id.to_string(),
                token.token_hash.clone(),
                token.family_id.to_string(),
                ts(token.expires_at),
                opt_ts(token.revoked_at),
                ts(token.created_at)
            ],
        )
        .await?;
        Ok(())
    }

    async fn get_refresh_token(&self, token_hash: &str) -> Result<Option<RefreshToken>> {
        let sql = format!("SELECT {REFRESH_COLUMNS} FROM refresh_tokens WHERE token_hash = ?1");
        self.query_one(&sql, params![token_hash], refresh_token_from_row).await
    }

    async fn revoke_refresh_token(
        &self,
        token_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<RefreshToken>> {
        let changed = self
            .execute(
                "UPDATE refresh_tokens SET revoked_at = ?2 WHERE token_hash = ?1 AND revoked_at IS NULL",
                params![token_hash, ts(now)],
            )
            .await?;
        if changed == 0 {
            return Ok(None);
        }
        self.get_refresh_token(token_hash).await
    }

    async fn revoke_user_refresh_tokens(&self, user_id: Uuid, now: DateTime<Utc>) -> Result<u64> {
        self.execute(
            "UPDATE refresh_tokens SET revoked_at = ?2 WHERE user_id = ?1 AND revoked_at IS NULL",
            params![user_id.to_string(), ts(now)],
        )
        .await
    }

    async fn save_otp(&self, otp: &OtpCode) -> Result<()> {
        let sql = format!(
            "INSERT INTO otp_codes ({OTP_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT(user_id, purpose) DO UPDATE SET
               id = excluded.id,
               code_hash = excluded.code_hash,
               expires_at = excluded.expires_at,
               attempts = excluded.attempts,
               last_sent_at = excluded.last_sent_at,
               created_at = excluded.created_at"
        );
        self.execute(
            &sql,
            params![
                otp.id.to_string(),
                otp.user_id.to_string(),
                otp.purpose.as_str(),
                otp.code_hash.clone(),
                ts(otp.expires_at),
                i64::from(otp.attempts),
                ts(otp.last_sent_at),
                ts(otp.created_at)
            ],
        )
        .await?;
        Ok(())
    }

    async fn get_otp(&self, user_id: Uuid, purpose: OtpPurpose) -> Result<Option<OtpCode>> {
        let sql = format!("SELECT {OTP_COLUMNS} FROM otp_codes WHERE user_id = ?1 AND purpose = ?2");
        self.query_one(&sql, params![user_id.to_string(), purpose.as_str()], otp_from_row)
            .await
    }

    async fn update_otp(&self, otp: &OtpCode) -> Result<()> {
        self.execute(
            "UPDATE otp_codes SET code_hash = ?2, expires_at = ?3, attempts = ?4, last_sent_at = ?5 WHERE id = ?1",
            params![
                otp.id.to_string(),
                otp.code_hash.clone(),
                ts(otp.expires_at),
                i64::from(otp.attempts),
                ts(otp.last_sent_at)
            ],
        )
        .await?;
        Ok(())
    }

    async fn delete_otp(&self, otp_id: Uuid) -> Result<()> {
        self.execute("DELETE FROM otp_codes WHERE id = ?1", params![otp_id.to_string()])
            .await?;
        Ok(())
    }

    async fn create_plan(&self, plan: &MembershipPlan) -> Result<()> {
        let sql = format!("INSERT INTO membership_plans ({PLAN_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)");
        self.execute(
            &sql,
            params![
                plan.id.to_string(),
                plan.name.clone(),
                plan.description.clone(),
                i64::from(plan.duration_days),
                plan.price_cents,
                flag(plan.active),
                ts(plan.created_at)
            ],
        )
        .await?;
        Ok(())
    }

    async fn get_plan(&self, plan_id: Uuid) -> Result<Option<MembershipPlan>> {
        let sql = format!("SELECT {PLAN_COLUMNS} FROM membership_plans WHERE id = ?1");
        self.query_one(&sql, params![plan_id.to_string()], plan_from_row).await
    }

    async fn list_plans(&self, include_inactive: bool) -> Result<Vec<MembershipPlan>> {
        let sql = format!(
            "SELECT {PLAN_COLUMNS} FROM membership_plans WHERE active = 1 OR ?1 = 1 ORDER BY price_cents, name"
        );
        self.query_all(&sql, params![flag(include_inactive)], plan_from_row).await
    }

    async fn update_plan(&self, plan: &MembershipPlan) -> Result<()> {
        self.execute(
            "UPDATE membership_plans SET name = ?2, description = ?3, duration_days = ?4, price_cents = ?5, active = ?6 WHERE id = ?1",
            params![
                plan.id.to_string(),
                plan.name.clone(),
                plan.description.clone(),
                i64::from(plan.duration_days),
                plan.price_cents,
                flag(plan.active)
            ],
        )
        .await?;
        Ok(())
    }

    async fn create_membership(&self, membership: &Membership) -> Result<()> {
        let sql = format!("INSERT INTO memberships ({MEMBERSHIP_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)");
        self.execute(
            &sql,
            params![
                membership.id.to_string(),
                membership.user_id.to_string(),
                membership.plan_id.to_string(),
                membership.status.as_str(),
                opt_ts(membership.starts_at),
                opt_ts(membership.ends_at),
                opt_id(membership.payment_id),
                ts(membership.created_at)
            ],
        )
        .await?;
        Ok(())
    }

    async fn get_membership(&self, membership_id: Uuid) -> Result<Option<Membership>> {
        let sql = format!("SELECT {MEMBERSHIP_COLUMNS} FROM memberships WHERE id = ?1");
        self.query_one(&sql, params![membership_id.to_string()], membership_from_row)
            .await
    }

    async fn list_memberships_for_user(&self, user_id: Uuid) -> Result<Vec<Membership>> {
        let sql = format!(
            "SELECT {MEMBERSHIP_COLUMNS} FROM memberships WHERE user_id = ?1 ORDER BY created_at DESC"
        );
        self.query_all(&sql, params![user_id.to_string()], membership_from_row)
            .await
    }

    async fn update_membership(&self, membership: &Membership) -> Result<()> {
        self.execute(
            "UPDATE memberships SET status = ?2, starts_at = ?3, ends_at = ?4, payment_id = ?5 WHERE id = ?1",
            params![
                membership.id.to_string(),
                membership.status.as_str(),
                opt_ts(membership.starts_at),
                opt_ts(membership.ends_at),
                opt_id(membership.payment_id)
            ],
        )
        .await?;
        Ok(())
    }

    async fn create_payment(&self, payment: &Payment) -> Result<()> {
        let sql = format!(
            "INSERT INTO payments ({PAYMENT_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)"
        );
        let conn = self.conn().await?;
        conn.execute(
            &sql,
            params![
                payment.id.to_string(),
                payment.user_id.to_string(),
                payment.kind.as_str(),
                payment.target_id.to_string(),
                payment.amount_cents,
                payment.currency.clone(),
                payment.status.as_str(),
                payment.reference.clone(),
                payment.provider_txn_id.clone(),
                opt_id(payment.promotion_id),
                ts(payment.created_at),
                opt_ts(payment.completed_at)
            ],
        )
        .await
        .map_err(|e| write_error(e, "create payment"))?;
        Ok(())
    }

    async fn get_payment(&self, payment_id: Uuid) -> Result<Option<Payment>> {
        let sql = format!("SELECT {PAYMENT_COLUMNS} FROM payments WHERE id = ?1");
        self.query_one(&sql, params![payment_id.to_string()], payment_from_row)
            .await
    }

    async fn get_payment_by_reference(&self, reference: &str) -> Result<Option<Payment>> {
        let sql = format!("SELECT {PAYMENT_COLUMNS} FROM payments WHERE reference = ?1");
        self.query_one(&sql, params![reference], payment_from_row).await
    }

    async fn complete_payment(
        &self,
        payment_id: Uuid,
        status: PaymentStatus,
        provider_txn_id: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let changed = self
            .execute(
                "UPDATE payments SET status = ?2, provider_txn_id = ?3, completed_at = ?4
                 WHERE id = ?1 AND status = 'pending'",
                params![
                    payment_id.to_string(),
                    status.as_str(),
                    provider_txn_id.map(str::to_string),
                    ts(now)
                ],
            )
            .await?;
        Ok(changed == 1)
    }

    async fn create_check_in(&self, check_in: &CheckIn) -> Result<()> {
        let sql = format!("INSERT INTO check_ins ({CHECK_IN_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6)");
        let conn = self.conn().await?;
        conn.execute(
            &sql,
            params![
                check_in.id.to_string(),
                check_in.user_id.to_string(),
                check_in.membership_id.to_string(),
                check_in.checked_in_by.to_string(),
                ts(check_in.checked_in_at),
                check_in.check_in_date.format("%Y-%m-%d").to_string()
            ],
        )
        .await
        .map_err(|e| write_error(e, "check in"))?;
        Ok(())
    }

    async fn list_check_ins_for_user(&self, user_id: Uuid) -> Result<Vec<CheckIn>> {
        let sql = format!(
            "SELECT {CHECK_IN_COLUMNS} FROM check_ins WHERE user_id = ?1 ORDER BY checked_in_at DESC"
        );
        self.query_all(&sql, params![user_id.to_string()], check_in_from_row)
            .await
    }

    async fn list_check_ins_on(&self, date: NaiveDate) -> Result<Vec<CheckIn>> {
        let sql = format!(
            "SELECT {CHECK_IN_COLUMNS} FROM check_ins WHERE check_in_date = ?1 ORDER BY checked_in_at"
        );
        self.query_all(&sql, params![date.format("%Y-%m-%d").to_string()], check_in_from_row)
            .await
    }

    async fn upsert_coach_profile(&self, profile: &CoachProfile) -> Result<()> {
        let sql = format!(
            "INSERT INTO coach_profiles ({COACH_COLUMNS}) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(user_id) DO UPDATE SET specialty = excluded.specialty, bio = excluded.bio"
        );
        self.execute(
            &sql,
            params![
                profile.user_id.to_string(),
                profile.specialty.clone(),
                profile.bio.clone(),
                ts(profile.created_at)
            ],
        )
        .await?;
        Ok(())
    }

    async fn get_coach_profile(&self, user_id: Uuid) -> Result<Option<CoachProfile>> {
        let sql = format!("SELECT {COACH_COLUMNS} FROM coach_profiles WHERE user_id = ?1");
        self.query_one(&sql, params![user_id.to_string()], coach_from_row).await
    }

    async fn list_coach_profiles(&self) -> Result<Vec<CoachProfile>> {
        let sql = format!("SELECT {COACH_COLUMNS} FROM coach_profiles ORDER BY created_at");
        self.query_all(&sql, (), coach_from_row).await
    }

    async fn create_booking(&self, booking: &Booking) -> Result<()> {
        let conn = self.conn().await?;
        let tx = conn
            .transaction()
            .await
            .map_err(|e| CoreError::database(format!("Failed to begin transaction: {e}")))?;

        // Same rule as `Booking::conflicts_with`: either party busy in an overlapping live slot.
        let overlapping = collect_rows(
            &tx,
            "SELECT COUNT(*) FROM bookings
             WHERE status = 'booked' AND starts_at < ?2 AND ?1 < ends_at
               AND (coach_id IN (?3, ?4) OR member_id IN (?3, ?4))",
            params![
                ts(booking.starts_at),
                ts(booking.ends_at),
                booking.coach_id.to_string(),
                booking.member_id.to_string()
            ],
            |row| int(row, 0),
        )
        .await?
        .into_iter()
        .next()
        .unwrap_or(0);

        if overlapping > 0 {
            tx.rollback()
                .await
                .map_err(|e| CoreError::database(format!("Failed to roll back: {e}")))?;
            return Err(CoreError::Conflict("time slot is already booked".into()));
        }

        let sql = format!("INSERT INTO bookings ({BOOKING_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)");
        tx.execute(
            &sql,
            params![
                booking.id.to_string(),
                booking.coach_id.to_string(),
                booking.member_id.to_string(),
                ts(booking.starts_at),
                ts(booking.ends_at),
                booking.status.as_str(),
                booking.note.clone(),
                ts(booking.created_at),
                opt_ts(booking.cancelled_at)
            ],
        )
        .await
        .map_err(|e| write_error(e, "create booking"))?;

        tx.commit()
            .await
            .map_err(|e| CoreError::database(format!("Failed to commit booking: {e}")))?;
        Ok(())
    }

    async fn get_booking(&self, booking_id: Uuid) -> Result<Option<Booking>> {
        let sql = format!("SELECT {BOOKING_COLUMNS} FROM bookings WHERE id = ?1");
        self.query_one(&sql, params![booking_id.to_string()], booking_from_row)
            .await
    }

    async fn update_booking(&self, booking: &Booking) -> Result<()> {
        self.execute(
            "UPDATE bookings SET starts_at = ?2, ends_at = ?3, status = ?4, note = ?5, cancelled_at = ?6 WHERE id = ?1",
            params![
                booking.id.to_string(),
                ts(booking.starts_at),
                ts(booking.ends_at),
                booking.status.as_str(),
                booking.note.clone(),
                opt_ts(booking.cancelled_at)
            ],
        )
        .await?;
        Ok(())
    }

    async fn list_bookings_for_member(&self, member_id: Uuid) -> Result<Vec<Booking>> {
        let sql = format!("SELECT {BOOKING_COLUMNS} FROM bookings WHERE member_id = ?1 ORDER BY starts_at");
        self.query_all(&sql, params![member_id.to_string()], booking_from_row)
            .await
    }

    async fn list_bookings_for_coach(&self, coach_id: Uuid) -> Result<Vec<Booking>> {
        let sql = format!("SELECT {BOOKING_COLUMNS} FROM bookings WHERE coach_id = ?1 ORDER BY starts_at");
        self.query_all(&sql, params![coach_id.to_string()], booking_from_row)
            .await
    }

    async fn create_product(&self, product: &Product) -> Result<()> {
        let sql = format!("INSERT INTO products ({PRODUCT_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)");
        self.execute(
            &sql,
            params![
                product.id.to_string(),
                product.name.clone(),
                product.description.clone(),
                product.category.clone(),
                product.price_cents,
                product.stock,
                flag(product.active),
                ts(product.created_at),
                ts(product.updated_at)
            ],
        )
        .await?;
        Ok(())
    }

    async fn get_product(&self, product_id: Uuid) -> Result<Option<Product>> {
        let sql = format!("SELECT {PRODUCT_COLUMNS} FROM products WHERE id = ?1");
        self.query_one(&sql, params![product_id.to_string()], product_from_row)
            .await
    }

    async fn list_products(
        &self,
        category: Option<&str>,
        include_inactive: bool,
    ) -> Result<Vec<Product>> {
        let sql = format!(
            "SELECT {PRODUCT_COLUMNS} FROM products
             WHERE (active = 1 OR ?1 = 1) AND (?2 IS NULL OR lower(category) = lower(?2))
             ORDER BY name"
        );
        self.query_all(
            &sql,
            params![flag(include_inactive), category.map(str::to_string)],
            product_from_row,
        )
        .await
    }

    async fn update_product(&self, product: &Product) -> Result<()> {
        self.execute(
            "UPDATE products SET name = ?2, description = ?3, category = ?4, price_cents = ?5, stock = ?6,
                 active = ?7, updated_at = ?8
             WHERE id = ?1",
            params![
                product.id.to_string(),
                product.name.clone(),
                product.description.clone(),
                product.category.clone(),
                product.price_cents,
                product.stock,
                flag(product.active),
                ts(product.updated_at)
            ],
        )
        .await?;
        Ok(())
    }

    async fn list_cart_items(&self, user_id: Uuid) -> Result<Vec<CartItem>> {
        let sql = format!("SELECT {CART_COLUMNS} FROM cart_items WHERE user_id = ?1 ORDER BY added_at");
        self.query_all(&sql, params![user_id.to_string()], cart_item_from_row)
            .await
    }

    async fn set_cart_item(&self, item: &CartItem) -> Result<()> {
        if item.quantity <= 0 {
            return self.remove_cart_item(item.user_id, item.product_id).await;
        }
        let sql = format!(
            "INSERT INTO cart_items ({CART_COLUMNS}) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(user_id, product_id) DO UPDATE SET quantity = excluded.quantity"
        );
        self.execute(
            &sql,
            params![
                item.user_id.to_string(),
                item.product_id.to_string(),
                item.quantity,
                ts(item.added_at)
            ],
        )
        .await?;
        Ok(())
    }

    async fn remove_cart_item(&self, user_id: Uuid, product_id: Uuid) -> Result<()> {
        self.execute(
            "DELETE FROM cart_items WHERE user_id = ?1 AND product_id = ?2",
            params![user_id.to_string(), product_id.to_string()],
        )
        .await?;
        Ok(())
    }

    async fn clear_cart(&self, user_id: Uuid) -> Result<()> {
        self.execute("DELETE FROM cart_items WHERE user_id = ?1", params![user_id.to_string()])
            .await?;
        Ok(())
    }

    async fn place_order(&self, order: &Order) -> Result<()> {
        let conn = self.conn().await?;
        let tx = conn
            .transaction()
            .await
            .map_err(|e| CoreError::database(format!("Failed to begin transaction: {e}")))?;
        let now = ts(order.created_at);

        for item in &order.items {
            let reserved = tx
                .execute(
                    "UPDATE products SET stock = stock - ?2, updated_at = ?3 WHERE id = ?1 AND stock >= ?2",
                    params![item.product_id.to_string(), item.quantity, now.clone()],
                )
                .await
                .map_err(|e| write_error(e, "reserve stock"))?;
            if reserved == 0 {
                tx.rollback()
                    .await
                    .map_err(|e| CoreError::database(format!("Failed to roll back: {e}")))?;
                return Err(CoreError::InsufficientStock {
                    product_id: item.product_id,
                });
            }
        }

        let sql = format!("INSERT INTO orders ({ORDER_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)");
        tx.execute(
            &sql,
            params![
                order.id.to_string(),
                order.user_id.to_string(),
                order.status.as_str(),
                order.subtotal_cents,
                order.discount_cents,
                order.total_cents,
                opt_id(order.promotion_id),
                opt_id(order.payment_id),
                now.clone()
            ],
        )
        .await
        .map_err(|e| write_error(e, "create order"))?;

        for (line_no, item) in order.items.iter().enumerate() {
            tx.execute(
                "INSERT INTO order_items (order_id, line_no, product_id, product_name, unit_price_cents, quantity)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    order.id.to_string(),
                    line_no as i64,
                    item.product_id.to_string(),
                    item.product_name.clone(),
                    item.unit_price_cents,
                    item.quantity
                ],
            )
            .await
            .map_err(|e| write_error(e, "create order item"))?;
        }

        tx.execute("DELETE FROM cart_items WHERE user_id = ?1", params![order.user_id.to_string()])
            .await
            .map_err(|e| write_error(e, "clear cart"))?;

        tx.commit()
            .await
            .map_err(|e| CoreError::database(format!("Failed to commit order: {e}")))?;
        debug!("Placed order {} with {} lines", order.id, order.items.len());
        Ok(())
    }

    async fn get_order(&self, order_id: Uuid) -> Result<Option<Order>> {
        let sql = format!("SELECT {ORDER_COLUMNS} FROM orders WHERE id = ?1");
        match self
            .query_one(&sql, params![order_id.to_string()], order_from_row)
            .await?
        {
            Some(mut order) => {
                self.load_order_items(&mut order).await?;
                Ok(Some(order))
            }
            None => Ok(None),
        }
    }

    async fn list_orders_for_user(&self, user_id: Uuid) -> Result<Vec<Order>> {
        let sql = format!("SELECT {ORDER_COLUMNS} FROM orders WHERE user_id = ?1 ORDER BY created_at DESC");
        let orders = self
            .query_all(&sql, params![user_id.to_string()], order_from_row)
            .await?;
        self.with_items(orders).await
    }

    async fn mark_order_paid(&self, order_id: Uuid) -> Result<bool> {
        let changed = self
            .execute(
                "UPDATE orders SET status = 'paid' WHERE id = ?1 AND status = 'pending_payment'",
                params![order_id.to_string()],
            )
            .await?;
        Ok(changed == 1)
    }

    async fn cancel_order(&self, order_id: Uuid) -> Result<bool> {
        let conn = self.conn().await?;
        let tx = conn
            .transaction()
            .await
            .map_err(|e| CoreError::database(format!("Failed to begin transaction: {e}")))?;

        let changed = tx
            .execute(
                "UPDATE orders SET status = 'cancelled' WHERE id = ?1 AND status = 'pending_payment'",
                params![order_id.to_string()],
            )
            .await
            .map_err(|e| write_error(e, "cancel order"))?;
        if changed == 0 {
            tx.rollback()
                .await
                .map_err(|e| CoreError::database(format!("Failed to roll back: {e}")))?;
            return Ok(false);
        }

        tx.execute(
            "UPDATE products SET stock = stock + (
                 SELECT SUM(quantity) FROM order_items
                 WHERE order_items.order_id = ?1 AND order_items.product_id = products.id)
             WHERE id IN (SELECT product_id FROM order_items WHERE order_id = ?1)",
            params![order_id.to_string()],
        )
        .await
        .map_err(|e| write_error(e, "restock order"))?;

        tx.commit()
            .await
            .map_err(|e| CoreError::database(format!("Failed to commit cancellation: {e}")))?;
        Ok(true)
    }

    async fn create_promotion(&self, promotion: &Promotion) -> Result<()> {
        let sql = format!(
            "INSERT INTO promotions ({PROMOTION_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)"
        );
        let conn = self.conn().await?;
        conn.execute(
            &sql,
            params![
                promotion.id.to_string(),
                promotion.code.clone(),
                promotion.description.clone(),
                promotion.discount.kind_str(),
                promotion.discount.value(),
                promotion.scope.as_str(),
                ts(promotion.starts_at),
                ts(promotion.ends_at),
                promotion.max_redemptions.map(i64::from),
                i64::from(promotion.redemptions),
                promotion.min_amount_cents,
                flag(promotion.active),
                ts(promotion.created_at)
            ],
        )
        .await
        .map_err(|e| write_error(e, "create promotion"))?;
        Ok(())
    }

    async fn get_promotion(&self, promotion_id: Uuid) -> Result<Option<Promotion>> {
        let sql = format!("SELECT {PROMOTION_COLUMNS} FROM promotions WHERE id = ?1");
        self.query_one(&sql, params![promotion_id.to_string()], promotion_from_row)
            .await
    }

    async fn get_promotion_by_code(&self, code: &str) -> Result<Option<Promotion>> {
        let sql = format!("SELECT {PROMOTION_COLUMNS} FROM promotions WHERE code = ?1");
        self.query_one(&sql, params![normalize_promo_code(code)], promotion_from_row)
            .await
    }

    async fn list_promotions(&self) -> Result<Vec<Promotion>> {
        let sql = format!("SELECT {PROMOTION_COLUMNS} FROM promotions ORDER BY created_at DESC");
        self.query_all(&sql, (), promotion_from_row).await
    }

    async fn update_promotion(&self, promotion: &Promotion) -> Result<()> {
        self.execute(
            "UPDATE promotions SET description = ?2, discount_type = ?3, discount_value = ?4, scope = ?5,
                 starts_at = ?6, ends_at = ?7, max_redemptions = ?8, min_amount_cents = ?9, active = ?10
             WHERE id = ?1",
            params![
                promotion.id.to_string(),
                promotion.description.clone(),
                promotion.discount.kind_str(),
                promotion.discount.value(),
                promotion.scope.as_str(),
                ts(promotion.starts_at),
                ts(promotion.ends_at),
                promotion.max_redemptions.map(i64::from),
                promotion.min_amount_cents,
                flag(promotion.active)
            ],
        )
        .await?;
        Ok(())
    }

    async fn redeem_promotion(&self, promotion_id: Uuid) -> Result<bool> {
        let changed = self
            .execute(
                "UPDATE promotions SET redemptions = redemptions + 1
                 WHERE id = ?1 AND (max_redemptions IS NULL OR redemptions < max_redemptions)",
                params![promotion_id.to_string()],
            )
            .await?;
        Ok(changed == 1)
    }

    async fn release_promotion(&self, promotion_id: Uuid) -> Result<()> {
        self.execute(
            "UPDATE promotions SET redemptions = redemptions - 1 WHERE id = ?1 AND redemptions > 0",
            params![promotion_id.to_string()],
        )
        .await?;
        Ok(())
    }
}
