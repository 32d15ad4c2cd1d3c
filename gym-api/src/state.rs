use crate::auth::google::{GoogleVerifier, TokenInfoVerifier};
use crate::auth::jwt::JwtService;
use crate::auth::password::PasswordService;
use crate::clock::{Clock, SystemClock};
use crate::config::Settings;
use crate::mail::{self, Mailer};
use crate::payment::gateway::{HttpPaymentGateway, PaymentGateway};
use gym_core::storage::Storage;
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;

/// Shared handles every request handler needs.
#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub storage: Arc<dyn Storage>,
    pub jwt: Arc<JwtService>,
    pub passwords: Arc<PasswordService>,
    pub mailer: Arc<dyn Mailer>,
    pub gateway: Arc<dyn PaymentGateway>,
    pub google: Arc<dyn GoogleVerifier>,
    pub clock: Arc<dyn Clock>,
    pub metrics: Option<PrometheusHandle>,
}

impl AppState {
    /// Production wiring: HTTP gateway, Google tokeninfo, configured mailer and the system clock.
    pub fn from_settings(
        settings: Settings,
        storage: Arc<dyn Storage>,
        metrics: Option<PrometheusHandle>,
    ) -> anyhow::Result<Self> {
        Ok(Self {
            jwt: Arc::new(JwtService::new(&settings.auth)),
            passwords: Arc::new(PasswordService::new(&settings.auth.password_hash)?),
            mailer: mail::build_mailer(&settings.mail)?,
            gateway: Arc::new(HttpPaymentGateway::new(&settings.payment)?),
            google: Arc::new(TokenInfoVerifier::new(&settings.google)?),
            clock: Arc::new(SystemClock),
            settings: Arc::new(settings),
            storage,
            metrics,
        })
    }
}
