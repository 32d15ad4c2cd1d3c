use crate::config::PaymentSettings;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("Payment gateway request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Payment gateway rejected the checkout: {0}")]
    Rejected(String),
}

#[derive(Debug, Clone, Serialize)]
pub struct CheckoutRequest {
    /// Our payment reference; the gateway echoes it back in webhooks.
    pub reference: String,
    pub amount_cents: i64,
    pub currency: String,
    pub description: String,
    pub customer_email: String,
    pub return_url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CheckoutSession {
    pub checkout_url: String,
    pub provider_reference: String,
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn create_checkout(&self, request: &CheckoutRequest) -> Result<CheckoutSession, GatewayError>;
}

/// JSON client for the hosted checkout API: `POST {api_base_url}/checkouts`.
pub struct HttpPaymentGateway {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
}

impl HttpPaymentGateway {
    pub fn new(settings: &PaymentSettings) -> Result<Self, GatewayError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()?;
        Ok(Self {
            client,
            endpoint: format!("{}/checkouts", settings.api_base_url.trim_end_matches('/')),
            api_key: settings.api_key.clone(),
        })
    }
}

#[async_trait]
impl PaymentGateway for HttpPaymentGateway {
    async fn create_checkout(&self, request: &CheckoutRequest) -> Result<CheckoutSession, GatewayError> {
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GatewayError::Rejected(format!("{status}: {body}")));
        }
        Ok(response.json().await?)
    }
}
