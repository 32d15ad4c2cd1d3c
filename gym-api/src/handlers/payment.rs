use super::ApiPath;
use crate::auth::AuthUser;
use crate::error::ApiResult;
use crate::payment::webhook::{SIGNATURE_HEADER, TIMESTAMP_HEADER};
use crate::services::payment::{self, WebhookOutcome};
use crate::state::AppState;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use gym_core::Payment;
use serde::Serialize;
use uuid::Uuid;

#[derive(Debug, Serialize)]
pub struct WebhookAck {
    pub status: WebhookOutcome,
}

/// Takes the raw body so the signature is checked over the exact bytes sent.
pub async fn webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Json<WebhookAck>> {
    let header = |name: &str| headers.get(name).and_then(|v| v.to_str().ok());
    let status = payment::handle_webhook(
        &state,
        header(TIMESTAMP_HEADER),
        header(SIGNATURE_HEADER),
        &body,
    )
    .await?;
    Ok(Json(WebhookAck { status }))
}

pub async fn get_payment(
    State(state): State<AppState>,
    caller: AuthUser,
    ApiPath(payment_id): ApiPath<Uuid>,
) -> ApiResult<Json<Payment>> {
    Ok(Json(payment::get_payment(&state, caller.user(), payment_id).await?))
}
