//! Counters for the business events worth alerting on.
//!
//! Names follow the Prometheus conventions; `/metrics` renders the recorder
//! installed by [`init_metrics`].

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;
use std::fmt;
use tracing::{info, warn};

static PROMETHEUS: OnceCell<PrometheusHandle> = OnceCell::new();

/// Enum representing all metric names used by the API
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetricName {
    // Accounts
    LoginsSucceeded,
    LoginsFailed,
    Registrations,
    OtpIssued,
    OtpFailed,
    RefreshReuseDetected,

    // Payments
    PaymentsConfirmed,
    PaymentsFailed,
    WebhooksRejected,

    // Front desk
    CheckInsAccepted,
    CheckInsRejected,

    // Coaching
    BookingsCreated,
    BookingsCancelled,

    // Shop
    OrdersPlaced,
}

impl MetricName {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricName::LoginsSucceeded => "gym_auth_logins_succeeded_total",
            MetricName::LoginsFailed => "gym_auth_logins_failed_total",
            MetricName::Registrations => "gym_auth_registrations_total",
            MetricName::OtpIssued => "gym_auth_otp_issued_total",
            MetricName::OtpFailed => "gym_auth_otp_failed_total",
            MetricName::RefreshReuseDetected => "gym_auth_refresh_reuse_detected_total",
            MetricName::PaymentsConfirmed => "gym_payments_confirmed_total",
            MetricName::PaymentsFailed => "gym_payments_failed_total",
            MetricName::WebhooksRejected => "gym_payments_webhooks_rejected_total",
            MetricName::CheckInsAccepted => "gym_checkins_accepted_total",
            MetricName::CheckInsRejected => "gym_checkins_rejected_total",
            MetricName::BookingsCreated => "gym_bookings_created_total",
            MetricName::BookingsCancelled => "gym_bookings_cancelled_total",
            MetricName::OrdersPlaced => "gym_shop_orders_placed_total",
        }
    }

    pub fn all_metrics() -> impl Iterator<Item = MetricName> {
        use MetricName::*;
        [
            LoginsSucceeded,
            LoginsFailed,
            Registrations,
            OtpIssued,
            OtpFailed,
            RefreshReuseDetected,
            PaymentsConfirmed,
            PaymentsFailed,
            WebhooksRejected,
            CheckInsAccepted,
            CheckInsRejected,
            BookingsCreated,
            BookingsCancelled,
            OrdersPlaced,
        ]
        .into_iter()
    }
}

impl fmt::Display for MetricName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Installs the Prometheus recorder once per process and returns its handle.
///
/// Later calls hand back the same handle. `None` means another recorder
/// already owns the process (metrics are then silently dropped).
pub fn init_metrics() -> Option<PrometheusHandle> {
    PROMETHEUS
        .get_or_try_init(|| {
            let handle = PrometheusBuilder::new().install_recorder()?;
            info!("Prometheus recorder installed");
            Ok::<_, metrics_exporter_prometheus::BuildError>(handle)
        })
        .map_err(|e| warn!("Prometheus recorder install failed: {}", e))
        .ok()
        .cloned()
}

pub fn increment(name: MetricName) {
    metrics::counter!(name.as_str()).increment(1);
}
