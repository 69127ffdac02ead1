use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum GantryError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Unauthenticated: {0}")]
    Unauthenticated(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Provider error: {0}")]
    Provider(String),

    #[error("Store error: {0}")]
    Store(#[from] sqlx::Error),

    #[error("Upstream request error: {0}")]
    Upstream(#[from] reqwest::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl GantryError {
    /// HTTP status code this error maps to on the RPC surface.
    pub fn status_code(&self) -> StatusCode {
        match self {
            GantryError::InvalidArgument(_) => StatusCode::BAD_REQUEST,
            GantryError::Unauthenticated(_) => StatusCode::UNAUTHORIZED,
            GantryError::NotFound(_) => StatusCode::NOT_FOUND,
            GantryError::Provider(_) | GantryError::Upstream(_) => StatusCode::BAD_GATEWAY,
            GantryError::Store(_) | GantryError::Serialization(_) | GantryError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for GantryError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = Json(serde_json::json!({ "error": self.to_string() }));
        (status, body).into_response()
    }
}

pub type Result<T> = std::result::Result<T, GantryError>;
