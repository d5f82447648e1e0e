// src/error.rs
use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use serde_json::json;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("MANDATORY_IE_MISSING:{field}:{selector}")]
    MandatoryFieldMissing { field: String, selector: String },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Rater unavailable: {0}")]
    RaterUnavailable(String),

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl EngineError {
    pub fn mandatory_field_missing(field: &str, selector: &str) -> Self {
        EngineError::MandatoryFieldMissing {
            field: field.to_string(),
            selector: selector.to_string(),
        }
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            EngineError::MandatoryFieldMissing { .. } => "mandatory_field_missing",
            EngineError::NotFound(_) => "not_found",
            EngineError::RaterUnavailable(_) => "rater_unavailable",
            EngineError::Decode(_) => "decode_error",
            EngineError::Transport(_) => "transport_error",
            EngineError::Storage(_) => "storage_error",
            EngineError::Config(_) => "config_error",
            EngineError::Internal(_) => "internal_error",
        }
    }
}

impl ResponseError for EngineError {
    fn status_code(&self) -> StatusCode {
        match self {
            EngineError::MandatoryFieldMissing { .. } | EngineError::Decode(_) => {
                StatusCode::BAD_REQUEST
            }
            EngineError::NotFound(_) => StatusCode::NOT_FOUND,
            EngineError::RaterUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(json!({
            "error": self.error_code(),
            "message": self.to_string(),
        }))
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        EngineError::Decode(err.to_string())
    }
}

impl From<std::io::Error> for EngineError {
    fn from(err: std::io::Error) -> Self {
        EngineError::Transport(err.to_string())
    }
}

impl From<reqwest::Error> for EngineError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() || err.is_connect() {
            EngineError::RaterUnavailable(err.to_string())
        } else {
            EngineError::Transport(err.to_string())
        }
    }
}
