use crate::config::AuthSettings;
use chrono::{DateTime, Duration, Utc};
use gym_core::{Role, User};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    pub sub: String, // User id
    pub role: Role,
    pub iat: i64,
    pub exp: i64,
    pub iss: String,
    pub aud: String,
    pub jti: String,
}

#[derive(Debug, Error)]
pub enum JwtError {
    #[error("Token creation failed: {0}")]
    Creation(String),

    #[error("Token verification failed: {0}")]
    Verification(String),

    #[error("Token expired")]
    Expired,
}

/// Issues and verifies HS256 access tokens.
pub struct JwtService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    issuer: String,
    audience: String,
    ttl: Duration,
}

impl JwtService {
    pub fn new(settings: &AuthSettings) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(settings.jwt_secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(settings.jwt_secret.as_bytes()),
            issuer: settings.issuer.clone(),
            audience: settings.audience.clone(),
            ttl: Duration::seconds(settings.access_token_ttl_secs),
        }
    }

    pub fn ttl_secs(&self) -> i64 {
        self.ttl.num_seconds()
    }

    pub fn issue(&self, user: &User, now: DateTime<Utc>) -> Result<String, JwtError> {
        let claims = Claims {
            sub: user.id.to_string(),
            role: user.role,
            iat: now.timestamp(),
            exp: (now + self.ttl).timestamp(),
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
            jti: Uuid::new_v4().to_string(),
        };

        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| JwtError::Creation(e.to_string()))
    }

    /// Checks signature, issuer and audience, then expiry against `now`.
    pub fn verify(&self, token: &str, now: DateTime<Utc>) -> Result<Claims, JwtError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[&self.issuer]);
        validation.set_audience(&[&self.audience]);
        // Expiry is compared with the injected clock below
        validation.validate_exp = false;

        let claims = decode::<Claims>(token, &self.decoding_key, &validation)
            .map_err(|e| JwtError::Verification(e.to_string()))?
            .claims;

        if claims.exp <= now.timestamp() {
            return Err(JwtError::Expired);
        }
        Ok(claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(secret: &str) -> AuthSettings {
        AuthSettings {
            jwt_secret: secret.to_string(),
            ..AuthSettings::default()
        }
    }

    fn user() -> User {
        User::new("coach@gym.example", "Coach", Role::Coach, Utc::now())
    }

    #[test]
    fn test_issue_and_verify() {
        let service = JwtService::new(&settings(&"s".repeat(32)));
        let now = Utc::now();
        let user = user();
        let token = service.issue(&user, now).unwrap();
        let claims = service.verify(&token, now).unwrap();
        assert_eq!(claims.sub, user.id.to_string());
        assert_eq!(claims.role, Role::Coach);
        assert_eq!(claims.exp - claims.iat, 900);
    }

    #[test]
    fn test_expired_token_is_rejected() {
        let service = JwtService::new(&settings(&"s".repeat(32)));
        let now = Utc::now();
        let token = service.issue(&user(), now).unwrap();
        assert!(matches!(
            service.verify(&token, now + Duration::seconds(900)),
            Err(JwtError::Expired)
        ));
    }

    #[test]
    fn test_wrong_secret_is_rejected() {
        let issuer = JwtService::new(&settings(&"a".repeat(32)));
        let verifier = JwtService::new(&settings(&"b".repeat(32)));
        let now = Utc::now();
        let token = issuer.issue(&user(), now).unwrap();
        assert!(matches!(
            verifier.verify(&token, now),
            Err(JwtError::Verification(_))
        ));
    }

    #[test]
    fn test_wrong_audience_is_rejected() {
        let issuer = JwtService::new(&settings(&"a".repeat(32)));
        let mut other = settings(&"a".repeat(32));
        other.audience = "someone-else".to_string();
        let verifier = JwtService::new(&other);
        let now = Utc::now();
        let token = issuer.issue(&user(), now).unwrap();
        assert!(verifier.verify(&token, now).is_err());
    }
}
