//! Business rules behind the HTTP handlers. Each function takes the shared
//! [`AppState`](crate::state::AppState) and returns an [`ApiError`](crate::error::ApiError)
//! ready to be rendered.

pub mod auth;
pub mod checkin;
pub mod coaching;
pub mod membership;
pub mod payment;
pub mod promotion;
pub mod shop;
pub mod users;
