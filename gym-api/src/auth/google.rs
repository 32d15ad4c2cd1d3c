use crate::config::GoogleSettings;
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum GoogleError {
    #[error("Google token rejected: {0}")]
    Rejected(String),

    #[error("Google tokeninfo request failed: {0}")]
    Http(#[from] reqwest::Error),
}

/// Identity asserted by a verified Google ID token.
#[derive(Debug, Clone)]
pub struct GoogleIdentity {
    pub sub: String,
    pub email: String,
    pub email_verified: bool,
    pub name: Option<String>,
}

#[async_trait]
pub trait GoogleVerifier: Send + Sync {
    /// Verifies the ID token was issued for this application and returns its identity.
    async fn verify(&self, id_token: &str) -> Result<GoogleIdentity, GoogleError>;
}

/// Verifies ID tokens through Google's `tokeninfo` endpoint.
pub struct TokenInfoVerifier {
    client: reqwest::Client,
    tokeninfo_url: String,
    client_id: String,
}

#[derive(Debug, Deserialize)]
struct TokenInfo {
    aud: String,
    sub: String,
    email: Option<String>,
    /// Google sends this as the string "true" or "false".
    #[serde(default)]
    email_verified: serde_json::Value,
    name: Option<String>,
}

impl TokenInfoVerifier {
    pub fn new(settings: &GoogleSettings) -> Result<Self, GoogleError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            client,
            tokeninfo_url: settings.tokeninfo_url.clone(),
            client_id: settings.client_id.clone(),
        })
    }
}

fn truthy(value: &serde_json::Value) -> bool {
    match value {
        serde_json::Value::Bool(b) => *b,
        serde_json::Value::String(s) => s.eq_ignore_ascii_case("true"),
        _ => false,
    }
}

#[async_trait]
impl GoogleVerifier for TokenInfoVerifier {
    async fn verify(&self, id_token: &str) -> Result<GoogleIdentity, GoogleError> {
        if self.client_id.is_empty() {
            return Err(GoogleError::Rejected(
                "Google sign-in is not configured".to_string(),
            ));
        }

        let response = self
            .client
            .get(&self.tokeninfo_url)
            .query(&[("id_token", id_token)])
            .send()
            .await?;

        if !response.status().is_success() {
            debug!("tokeninfo returned {}", response.status());
            return Err(GoogleError::Rejected("invalid ID token".to_string()));
        }

        let info: TokenInfo = response.json().await?;
        if info.aud != self.client_id {
            return Err(GoogleError::Rejected(
                "ID token was issued for another client".to_string(),
            ));
        }
        let email = info
            .email
            .ok_or_else(|| GoogleError::Rejected("ID token carries no email".to_string()))?;

        Ok(GoogleIdentity {
            sub: info.sub,
            email,
            email_verified: truthy(&info.email_verified),
            name: info.name,
        })
    }
}
