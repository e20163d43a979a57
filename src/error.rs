// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Application error types with consistent API responses.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use serde_json::{json, Value};

use crate::config::ConfigError;

/// Application error type that converts to HTTP responses.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Invalid or expired OAuth state")]
    InvalidState,

    #[error("Authentication required")]
    Unauthorized,

    /// The user (or Spotify) refused the authorization request.
    #[error("Spotify authorization was not granted: {error}")]
    AuthorizationDenied { error: String, description: String },

    /// Spotify rejected an authorization code or refresh token.
    #[error("Spotify authentication failed: {error}")]
    ProviderAuth {
        status: u16,
        error: String,
        description: String,
    },

    /// Spotify rejected an authenticated API call.
    #[error("Spotify API error (HTTP {status})")]
    ProviderApi { status: u16, body: Value },

    #[error("Network error reaching Spotify: {message}")]
    Network { message: String, timed_out: bool },

    #[error("No Spotify tokens found for user {0}")]
    NotAuthenticated(String),

    #[error("Spotify token has expired for user {0}. Please re-authenticate.")]
    TokenExpired(String),

    /// `/tokens` found no usable record. Same code as the wrapped error, served as 500.
    #[error("{0}")]
    StoredTokensUnavailable(Box<AppError>),

    #[error("Database error: {0}")]
    Persistence(String),

    /// Tokens were issued by Spotify but could not be stored.
    #[error("Spotify tokens were issued but could not be saved: {reason}")]
    TokensNotPersisted { reason: String, issued: Box<Value> },

    #[error("Internal server error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    /// Map a transport-level reqwest failure.
    pub fn network(err: reqwest::Error) -> Self {
        AppError::Network {
            timed_out: err.is_timeout(),
            message: err.to_string(),
        }
    }

    /// Machine-readable error code used in the JSON body.
    pub fn code(&self) -> &'static str {
        match self {
            AppError::Configuration(_) => "configuration_error",
            AppError::InvalidRequest(_) => "invalid_request",
            AppError::InvalidState => "invalid_state",
            AppError::Unauthorized => "unauthorized",
            AppError::AuthorizationDenied { .. } => "authorization_denied",
            AppError::ProviderAuth { .. } => "provider_auth_error",
            AppError::ProviderApi { .. } => "provider_api_error",
            AppError::Network { .. } => "network_error",
            AppError::NotAuthenticated(_) => "not_authenticated",
            AppError::TokenExpired(_) => "token_expired",
            AppError::StoredTokensUnavailable(inner) => inner.code(),
            AppError::Persistence(_) => "persistence_error",
            AppError::TokensNotPersisted { .. } => "tokens_not_persisted",
            AppError::Internal(_) => "internal_error",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AppError::InvalidRequest(_)
            | AppError::InvalidState
            | AppError::AuthorizationDenied { .. } => StatusCode::BAD_REQUEST,
            AppError::Unauthorized
            | AppError::NotAuthenticated(_)
            | AppError::TokenExpired(_) => StatusCode::UNAUTHORIZED,
            AppError::ProviderAuth { .. } | AppError::ProviderApi { .. } => {
                StatusCode::BAD_GATEWAY
            }
            AppError::Network { timed_out: true, .. } => StatusCode::GATEWAY_TIMEOUT,
            AppError::Network { .. } => StatusCode::BAD_GATEWAY,
            AppError::Configuration(_)
            | AppError::StoredTokensUnavailable(_)
            | AppError::Persistence(_)
            | AppError::TokensNotPersisted { .. }
            | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn details(&self) -> Option<Value> {
        match self {
            AppError::ProviderAuth {
                status,
                error,
                description,
            } => Some(json!({
                "error": error,
                "error_description": description,
                "status": status,
            })),
            AppError::AuthorizationDenied { error, description } => Some(json!({
                "error": error,
                "error_description": description,
            })),
            AppError::ProviderApi { status, body } => Some(json!({
                "status": status,
                "body": body,
            })),
            AppError::Network { timed_out, .. } => Some(json!({ "timedOut": timed_out })),
            AppError::StoredTokensUnavailable(inner) => inner.details(),
            AppError::TokensNotPersisted { issued, .. } => Some(json!({
                "saved": false,
                "issued": issued,
            })),
            _ => None,
        }
    }
}

impl From<ConfigError> for AppError {
    fn from(err: ConfigError) -> Self {
        AppError::Configuration(err.to_string())
    }
}

/// JSON error response body
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    code: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<Value>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();

        match &self {
            AppError::Persistence(msg) => tracing::error!(error = %msg, "Database error"),
            AppError::TokensNotPersisted { reason, .. } => {
                tracing::error!(error = %reason, "Tokens issued but not persisted")
            }
            AppError::Configuration(msg) => tracing::error!(error = %msg, "Configuration error"),
            AppError::Internal(err) => tracing::error!(error = %err, "Internal server error"),
            AppError::ProviderAuth { status, error, .. } => {
                tracing::warn!(status, error = %error, "Spotify rejected credentials")
            }
            AppError::ProviderApi { status, .. } => {
                tracing::warn!(status, "Spotify API call failed")
            }
            AppError::Network { message, .. } => {
                tracing::warn!(error = %message, "Network error reaching Spotify")
            }
            _ => {}
        }

        // Internal failures do not echo their cause to the caller.
        let error = match &self {
            AppError::Internal(_) => "Internal server error".to_string(),
            AppError::Persistence(_) => "Database error".to_string(),
            other => other.to_string(),
        };

        let body = ErrorResponse {
            error,
            code: self.code(),
            details: self.details(),
        };

        (status, Json(body)).into_response()
    }
}

/// Result type alias for handlers
pub type Result<T> = std::result::Result<T, AppError>;
