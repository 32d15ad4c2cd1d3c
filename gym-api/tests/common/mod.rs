//! Test harness: the real router over in-memory storage, with a manual clock
//! and recording fakes for mail, the payment gateway and Google sign-in.
#![allow(dead_code)]

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use chrono::{DateTime, TimeZone, Utc};
use gym_api::auth::google::{GoogleError, GoogleIdentity, GoogleVerifier};
use gym_api::auth::jwt::JwtService;
use gym_api::auth::password::PasswordService;
use gym_api::clock::ManualClock;
use gym_api::config::{PasswordHashSettings, Settings};
use gym_api::mail::{MailError, MailMessage, Mailer};
use gym_api::payment::webhook::{self, SIGNATURE_HEADER, TIMESTAMP_HEADER};
use gym_api::payment::{CheckoutRequest, CheckoutSession, GatewayError, PaymentGateway};
use gym_api::services::users::create_admin;
use gym_api::{create_router, AppState};
use gym_core::storage::InMemoryStorage;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tower::ServiceExt;

pub const JWT_SECRET: &str = "integration-test-secret-0123456789abcdef";
pub const WEBHOOK_SECRET: &str = "whsec_integration";
pub const PASSWORD: &str = "Sup3rSecret!";

pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap()
}

#[derive(Default)]
pub struct RecordingMailer {
    pub sent: Mutex<Vec<MailMessage>>,
    pub fail: AtomicBool,
}

impl RecordingMailer {
    /// The numeric code in the last mail sent to `to`.
    pub fn last_code_for(&self, to: &str) -> String {
        let sent = self.sent.lock().unwrap();
        let mail = sent
            .iter()
            .rev()
            .find(|m| m.to == to)
            .unwrap_or_else(|| panic!("no mail sent to {to}"));
        mail.text_body
            .split_whitespace()
            .find(|word| !word.is_empty() && word.chars().all(|c| c.is_ascii_digit()))
            .map(str::to_string)
            .expect("mail contains a code")
    }

    pub fn count_for(&self, to: &str) -> usize {
        self.sent.lock().unwrap().iter().filter(|m| m.to == to).count()
    }
}

#[async_trait]
impl Mailer for RecordingMailer {
    async fn send(&self, message: &MailMessage) -> Result<(), MailError> {
        if self.fail.load(Ordering::SeqCst) {
            // Any reqwest error will do; an unparsable URL fails before any I/O.
            let err = reqwest::Client::new().get("not a url").build().unwrap_err();
            return Err(MailError::Http(err));
        }
        self.sent.lock().unwrap().push(message.clone());
        Ok(())
    }
}

#[derive(Default)]
pub struct MockGateway {
    pub requests: Mutex<Vec<CheckoutRequest>>,
    pub fail: AtomicBool,
}

#[async_trait]
impl PaymentGateway for MockGateway {
    async fn create_checkout(&self, request: &CheckoutRequest) -> Result<CheckoutSession, GatewayError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(GatewayError::Rejected("gateway down".to_string()));
        }
        self.requests.lock().unwrap().push(request.clone());
        Ok(CheckoutSession {
            checkout_url: format!("https://pay.test/checkout/{}", request.reference),
            provider_reference: format!("prov_{}", request.reference),
        })
    }
}

/// Accepts the tokens registered with [`MockGoogle::allow`], rejects everything else.
#[derive(Default)]
pub struct MockGoogle {
    identities: Mutex<HashMap<String, GoogleIdentity>>,
}

impl MockGoogle {
    pub fn allow(&self, id_token: &str, sub: &str, email: &str, name: &str) {
        self.register(id_token, sub, email, name, true);
    }

    /// Like [`MockGoogle::allow`], but Google reports the email as unverified.
    pub fn allow_unverified(&self, id_token: &str, sub: &str, email: &str, name: &str) {
        self.register(id_token, sub, email, name, false);
    }

    fn register(&self, id_token: &str, sub: &str, email: &str, name: &str, email_verified: bool) {
        self.identities.lock().unwrap().insert(
            id_token.to_string(),
            GoogleIdentity {
                sub: sub.to_string(),
                email: email.to_string(),
                email_verified,
                name: Some(name.to_string()),
            },
        );
    }
}

#[async_trait]
impl GoogleVerifier for MockGoogle {
    async fn verify(&self, id_token: &str) -> Result<GoogleIdentity, GoogleError> {
        self.identities
            .lock()
            .unwrap()
            .get(id_token)
            .cloned()
            .ok_or_else(|| GoogleError::Rejected("unknown token".to_string()))
    }
}

pub fn test_settings() -> Settings {
    let mut settings = Settings::default();
    settings.auth.jwt_secret = JWT_SECRET.to_string();
    settings.auth.password_hash = PasswordHashSettings {
        memory_kib: 1024,
        iterations: 1,
        parallelism: 1,
    };
    settings.payment.webhook_secret = WEBHOOK_SECRET.to_string();
    settings.google.client_id = "test-client".to_string();
    settings.validate().unwrap();
    settings
}

pub struct TestApp {
    pub router: Router,
    pub state: AppState,
    pub clock: Arc<ManualClock>,
    pub mailer: Arc<RecordingMailer>,
    pub gateway: Arc<MockGateway>,
    pub google: Arc<MockGoogle>,
}

pub struct Response {
    pub status: StatusCode,
    pub body: Value,
}

impl TestApp {
    /// Access tokens outlive every clock jump the tests make.
    pub fn new() -> Self {
        let mut settings = test_settings();
        settings.auth.access_token_ttl_secs = 90 * 24 * 3600;
        Self::with_settings(settings)
    }

    pub fn with_settings(settings: Settings) -> Self {
        let clock = Arc::new(ManualClock::new(t0()));
        let mailer = Arc::new(RecordingMailer::default());
        let gateway = Arc::new(MockGateway::default());
        let google = Arc::new(MockGoogle::default());

        let state = AppState {
            jwt: Arc::new(JwtService::new(&settings.auth)),
            passwords: Arc::new(PasswordService::new(&settings.auth.password_hash).unwrap()),
            settings: Arc::new(settings),
            storage: Arc::new(InMemoryStorage::new()),
            mailer: mailer.clone(),
            gateway: gateway.clone(),
            google: google.clone(),
            clock: clock.clone(),
            metrics: None,
        };

        Self {
            router: create_router(state.clone()),
            state,
            clock,
            mailer,
            gateway,
            google,
        }
    }

    pub async fn send(&self, request: Request<Body>) -> Response {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes)
                .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()))
        };
        Response { status, body }
    }

    pub async fn call(&self, method: Method, uri: &str, token: Option<&str>, body: Option<Value>) -> Response {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        let request = match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string())),
            None => builder.body(Body::empty()),
        }
        .unwrap();
        self.send(request).await
    }

    pub async fn get(&self, uri: &str, token: Option<&str>) -> Response {
        self.call(Method::GET, uri, token, None).await
    }

    pub async fn post(&self, uri: &str, token: Option<&str>, body: Value) -> Response {
        self.call(Method::POST, uri, token, Some(body)).await
    }

    pub async fn patch(&self, uri: &str, token: Option<&str>, body: Value) -> Response {
        self.call(Method::PATCH, uri, token, Some(body)).await
    }

    pub async fn delete(&self, uri: &str, token: Option<&str>) -> Response {
        self.call(Method::DELETE, uri, token, None).await
    }

    /// Registers, verifies the email with the mailed code and returns the access token.
    pub async fn member(&self, email: &str) -> String {
        let registered = self
            .post(
                "/auth/register",
                None,
                json!({"email": email, "password": PASSWORD, "full_name": "Test Member"}),
            )
            .await;
        assert_eq!(registered.status, StatusCode::CREATED, "{:?}", registered.body);

        let code = self.mailer.last_code_for(email);
        let verified = self
            .post("/auth/verify-email", None, json!({"email": email, "code": code}))
            .await;
        assert_eq!(verified.status, StatusCode::OK, "{:?}", verified.body);
        verified.body["access_token"].as_str().unwrap().to_string()
    }

    pub async fn user_id(&self, token: &str) -> String {
        let me = self.get("/me", Some(token)).await;
        assert_eq!(me.status, StatusCode::OK, "{:?}", me.body);
        me.body["id"].as_str().unwrap().to_string()
    }

    pub async fn admin(&self) -> String {
        let email = "admin@gym.test";
        create_admin(&self.state, email, PASSWORD, "Head Admin")
            .await
            .unwrap();
        self.login(email).await
    }

    pub async fn login(&self, email: &str) -> String {
        let login = self
            .post("/auth/login", None, json!({"email": email, "password": PASSWORD}))
            .await;
        assert_eq!(login.status, StatusCode::OK, "{:?}", login.body);
        login.body["access_token"].as_str().unwrap().to_string()
    }

    /// Creates a plan as `admin_token` and returns its id.
    pub async fn plan(&self, admin_token: &str, name: &str, days: u32, price_cents: i64) -> String {
        let created = self
            .post(
                "/membership-plans",
                Some(admin_token),
                json!({"name": name, "duration_days": days, "price_cents": price_cents}),
            )
            .await;
        assert_eq!(created.status, StatusCode::CREATED, "{:?}", created.body);
        created.body["id"].as_str().unwrap().to_string()
    }

    /// Delivers a correctly signed webhook stamped with the current clock.
    pub async fn webhook(&self, event: Value) -> Response {
        let body = event.to_string();
        let timestamp = self.clock_now().timestamp();
        let signature = webhook::sign(WEBHOOK_SECRET, timestamp, body.as_bytes());
        let request = Request::builder()
            .method(Method::POST)
            .uri("/payments/webhook")
            .header(header::CONTENT_TYPE, "application/json")
            .header(TIMESTAMP_HEADER, timestamp.to_string())
            .header(SIGNATURE_HEADER, signature)
            .body(Body::from(body))
            .unwrap();
        self.send(request).await
    }

    /// Buys `plan_id` and confirms the payment through the webhook; returns the purchase body.
    pub async fn paid_membership(&self, token: &str, plan_id: &str) -> Value {
        let purchase = self
            .post("/memberships/purchase", Some(token), json!({"plan_id": plan_id}))
            .await;
        assert_eq!(purchase.status, StatusCode::CREATED, "{:?}", purchase.body);
        let payment = &purchase.body["payment"];
        let paid = self
            .webhook(json!({
                "reference": payment["reference"],
                "status": "paid",
                "transaction_id": "txn_test",
                "amount_cents": payment["amount_cents"],
            }))
            .await;
        assert_eq!(paid.status, StatusCode::OK, "{:?}", paid.body);
        purchase.body
    }

    pub fn clock_now(&self) -> DateTime<Utc> {
        use gym_api::clock::Clock;
        self.clock.now()
    }
}
