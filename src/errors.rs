use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

pub type SecResult<T> = Result<T, SecError>;

#[derive(thiserror::Error, Debug)]
pub enum SecError {
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("unknown model: {0}")]
    UnknownModel(String),
    #[error("policy store error: {0}")]
    Store(String),
    #[error("data source error: {0}")]
    DataSource(String),
    #[error("database error")]
    Database(#[from] sqlx::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("internal error: {0}")]
    Internal(String),
}

impl SecError {
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    pub fn unknown_model(name: impl Into<String>) -> Self {
        Self::UnknownModel(name.into())
    }

    pub fn store(message: impl Into<String>) -> Self {
        Self::Store(message.into())
    }

    pub fn data_source(message: impl Into<String>) -> Self {
        Self::DataSource(message.into())
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// True for errors caused by the declared settings or model metadata
    /// rather than by infrastructure.
    pub fn is_configuration(&self) -> bool {
        matches!(self, SecError::Configuration(_) | SecError::UnknownModel(_))
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    message: String,
}

impl IntoResponse for SecError {
    fn into_response(self) -> Response {
        let error = match &self {
            SecError::Configuration(_) => "configuration",
            SecError::UnknownModel(_) => "unknown_model",
            SecError::Store(_) => "store",
            SecError::DataSource(_) => "data_source",
            SecError::Database(_) => "database",
            SecError::Serialization(_) => "serialization",
            SecError::Internal(_) => "internal",
        };

        let payload = ErrorResponse {
            error: error.to_string(),
            message: self.to_string(),
        };

        // None of these are access refusals: the decision could not be evaluated.
        (StatusCode::INTERNAL_SERVER_ERROR, Json(payload)).into_response()
    }
}

impl From<anyhow::Error> for SecError {
    fn from(value: anyhow::Error) -> Self {
        Self::Internal(value.to_string())
    }
}
