use axum::{
    http::{header, StatusCode},
    response::{Html, IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use serde_json::json;
use thiserror::Error;

use crate::{config::ConfigError, token::TokenError};

pub const INVALID_LINK_PAGE: &str = "<!doctype html><html><head><title>Aurum</title></head>\
<body><p>This link is invalid or has expired.</p></body></html>";

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Token(#[from] TokenError),

    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error("unauthorized")]
    Unauthorized,

    #[error("invalid or expired link")]
    InvalidLink,

    #[error("not found")]
    NotFound,

    #[error("{0}")]
    BadRequest(String),

    #[error("rate limited until {reset_at}")]
    RateLimited {
        reset_at: DateTime<Utc>,
        retry_after_secs: i64,
    },
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message) = match self {
            AppError::Config(e) => {
                tracing::error!("Configuration error: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Server misconfigured".to_string(),
                )
            }
            AppError::Token(e) => {
                tracing::error!("Link signing error: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Server misconfigured".to_string(),
                )
            }
            AppError::Sqlx(e) => {
                tracing::error!("Database error: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Database error".to_string(),
                )
            }
            AppError::Unauthorized => (StatusCode::UNAUTHORIZED, "Unauthorized".to_string()),
            AppError::InvalidLink => {
                return (StatusCode::UNAUTHORIZED, Html(INVALID_LINK_PAGE)).into_response();
            }
            AppError::NotFound => (StatusCode::NOT_FOUND, "Not found".to_string()),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::RateLimited {
                reset_at,
                retry_after_secs,
            } => {
                let body = Json(json!({
                    "error": "Too many requests, try again later",
                    "remaining": 0,
                    "resetAt": reset_at,
                }));
                return (
                    StatusCode::TOO_MANY_REQUESTS,
                    [(header::RETRY_AFTER, retry_after_secs.max(0).to_string())],
                    body,
                )
                    .into_response();
            }
        };

        let body = Json(json!({
            "error": error_message,
        }));

        (status, body).into_response()
    }
}
