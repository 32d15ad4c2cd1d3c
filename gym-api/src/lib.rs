pub mod auth;
pub mod clock;
pub mod config;
pub mod error;
pub mod handlers;
pub mod logging;
pub mod mail;
pub mod metrics;
pub mod payment;
pub mod server;
pub mod services;
pub mod state;

pub use config::Settings;
pub use error::{ApiError, ApiResult};
pub use server::create_router;
pub use state::AppState;
