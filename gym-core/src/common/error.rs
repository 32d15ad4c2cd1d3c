use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Insufficient stock for product {product_id}")]
    InsufficientStock { product_id: Uuid },

    #[error("JSON serialization failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Database error: {message}")]
    Database { message: String },
}

impl CoreError {
    pub fn database(message: impl Into<String>) -> Self {
        CoreError::Database {
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;
