use crate::error::{ApiError, ApiResult};
use crate::metrics::{increment, MetricName};
use crate::payment::webhook::{self, WebhookEvent, WebhookStatus};
use crate::payment::CheckoutRequest;
use crate::services::membership;
use crate::state::AppState;
use chrono::{DateTime, Utc};
use gym_core::{Payment, PaymentKind, PaymentStatus, Promotion, PromotionScope, Role, User};
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

/// Promotion reserved for a purchase, plus the discount it grants.
#[derive(Debug, Default)]
pub struct ReservedDiscount {
    pub discount_cents: i64,
    pub promotion: Option<Promotion>,
}

impl ReservedDiscount {
    pub fn promotion_id(&self) -> Option<Uuid> {
        self.promotion.as_ref().map(|p| p.id)
    }
}

/// Checks `code` against a purchase and counts one redemption.
///
/// Callers must hand the reservation back with [`release_promotion`] if the purchase does not go through.
pub async fn reserve_promotion(
    state: &AppState,
    code: Option<&str>,
    scope: PromotionScope,
    amount_cents: i64,
) -> ApiResult<ReservedDiscount> {
    let Some(code) = code.map(str::trim).filter(|c| !c.is_empty()) else {
        return Ok(ReservedDiscount::default());
    };

    let promotion = state
        .storage
        .get_promotion_by_code(code)
        .await?
        .ok_or_else(|| ApiError::validation("unknown promotion code"))?;
    promotion
        .check(scope, amount_cents, state.clock.now())
        .map_err(|reason| {
            ApiError::validation(format!("promotion code cannot be applied: {reason}"))
        })?;

    if !state.storage.redeem_promotion(promotion.id).await? {
        return Err(ApiError::conflict("promotion code has been fully redeemed"));
    }

    Ok(ReservedDiscount {
        discount_cents: promotion.discount_for(amount_cents),
        promotion: Some(promotion),
    })
}

/// Best effort: runs on failure paths that already carry the error worth reporting.
pub async fn release_promotion(state: &AppState, promotion_id: Option<Uuid>) {
    if let Some(id) = promotion_id {
        if let Err(e) = state.storage.release_promotion(id).await {
            warn!("Failed to release promotion {}: {}", id, e);
        }
    }
}

/// Hands a stored pending payment to the gateway and returns the checkout URL.
///
/// Free purchases settle immediately without a checkout. A gateway failure fails
/// the payment (cancelling its target) and surfaces as 502.
pub async fn start_checkout(
    state: &AppState,
    buyer: &User,
    payment: &Payment,
    description: String,
) -> ApiResult<Option<String>> {
    if payment.amount_cents == 0 {
        settle(state, payment, PaymentStatus::Paid, None).await?;
        return Ok(None);
    }

    let request = CheckoutRequest {
        reference: payment.reference.clone(),
        amount_cents: payment.amount_cents,
        currency: payment.currency.clone(),
        description,
        customer_email: buyer.email.clone(),
        return_url: format!(
            "{}/payments/{}",
            state.settings.server.public_base_url.trim_end_matches('/'),
            payment.id
        ),
    };

    match state.gateway.create_checkout(&request).await {
        Ok(session) => {
            info!(
                "Checkout {} opened for payment {} ({} cents)",
                session.provider_reference, payment.id, payment.amount_cents
            );
            Ok(Some(session.checkout_url))
        }
        Err(e) => {
            warn!("Checkout for payment {} failed: {}", payment.id, e);
            settle(state, payment, PaymentStatus::Failed, None).await?;
            Err(ApiError::Gateway(
                "payment provider is unavailable, please try again".to_string(),
            ))
        }
    }
}

/// Moves `payment` out of `Pending` and applies the side effects.
///
/// A payment already settled with the same `status` gets its side effects re-applied, so a
/// delivery that failed halfway can be retried; they only touch targets still awaiting payment.
/// Returns `false` when neither the payment nor its target changed.
pub async fn settle(
    state: &AppState,
    payment: &Payment,
    status: PaymentStatus,
    provider_txn_id: Option<&str>,
) -> ApiResult<bool> {
    let now = state.clock.now();
    let transitioned = state
        .storage
        .complete_payment(payment.id, status, provider_txn_id, now)
        .await?;
    if !transitioned && reload_payment(state, payment.id).await?.status != status {
        return Ok(false);
    }

    let applied = match status {
        PaymentStatus::Paid => on_paid(state, payment, now).await?,
        PaymentStatus::Failed => on_failed(state, payment).await?,
        PaymentStatus::Pending => false,
    };
    if transitioned {
        info!("Payment {} settled as {}", payment.id, status);
    } else if applied {
        info!("Payment {} was already {}; finished applying it", payment.id, status);
    }
    Ok(transitioned || applied)
}

async fn on_paid(state: &AppState, payment: &Payment, now: DateTime<Utc>) -> ApiResult<bool> {
    let applied = match payment.kind {
        PaymentKind::Membership => membership::activate(state, payment.target_id, now).await?,
        PaymentKind::Order => state.storage.mark_order_paid(payment.target_id).await?,
    };
    if applied {
        increment(MetricName::PaymentsConfirmed);
    }
    Ok(applied)
}

async fn on_failed(state: &AppState, payment: &Payment) -> ApiResult<bool> {
    let applied = match payment.kind {
        PaymentKind::Membership => membership::cancel_pending(state, payment.target_id).await?,
        PaymentKind::Order => state.storage.cancel_order(payment.target_id).await?,
    };
    // The reservation goes back with the target, never twice.
    if applied {
        release_promotion(state, payment.promotion_id).await;
        increment(MetricName::PaymentsFailed);
    }
    Ok(applied)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WebhookOutcome {
    Processed,
    AlreadyProcessed,
}

/// Authenticates and applies one gateway notification.
pub async fn handle_webhook(
    state: &AppState,
    timestamp: Option<&str>,
    signature: Option<&str>,
    body: &[u8],
) -> ApiResult<WebhookOutcome> {
    let settings = &state.settings.payment;
    if let Err(e) = webhook::verify(
        &settings.webhook_secret,
        timestamp,
        signature,
        body,
        state.clock.now(),
        settings.webhook_tolerance_secs,
    ) {
        increment(MetricName::WebhooksRejected);
        warn!("Rejected payment webhook: {}", e);
        return Err(ApiError::unauthorized("invalid webhook signature"));
    }

    let event: WebhookEvent = serde_json::from_slice(body)
        .map_err(|e| ApiError::validation(format!("malformed webhook payload: {e}")))?;

    let payment = state
        .storage
        .get_payment_by_reference(&event.reference)
        .await?
        .ok_or_else(|| ApiError::not_found("unknown payment reference"))?;

    if event.status == WebhookStatus::Paid && event.amount_cents != payment.amount_cents {
        warn!(
            "Webhook amount {} does not match payment {} amount {}",
            event.amount_cents, payment.id, payment.amount_cents
        );
        return Err(ApiError::Unprocessable(
            "amount does not match the payment".to_string(),
        ));
    }

    let status = match event.status {
        WebhookStatus::Paid => PaymentStatus::Paid,
        WebhookStatus::Failed => PaymentStatus::Failed,
    };

    if settle(state, &payment, status, event.transaction_id.as_deref()).await? {
        Ok(WebhookOutcome::Processed)
    } else {
        info!("Webhook for payment {} already processed", payment.id);
        Ok(WebhookOutcome::AlreadyProcessed)
    }
}

/// Payments are visible to their owner and to admins; anyone else gets 404.
pub async fn get_payment(state: &AppState, viewer: &User, payment_id: Uuid) -> ApiResult<Payment> {
    state
        .storage
        .get_payment(payment_id)
        .await?
        .filter(|p| p.user_id == viewer.id || viewer.role == Role::Admin)
        .ok_or_else(|| ApiError::not_found("payment not found"))
}

pub async fn reload_payment(state: &AppState, payment_id: Uuid) -> ApiResult<Payment> {
    state
        .storage
        .get_payment(payment_id)
        .await?
        .ok_or_else(|| ApiError::Internal(anyhow::anyhow!("payment {payment_id} vanished")))
}
