pub mod gateway;
pub mod webhook;

pub use gateway::{CheckoutRequest, CheckoutSession, GatewayError, HttpPaymentGateway, PaymentGateway};
