// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::{json, Value};
use spotit::error::AppError;

async fn body_of(err: AppError) -> (StatusCode, Value) {
    let response = err.into_response();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), 1024 * 1024)
        .await
        .unwrap();
    (status, serde_json::from_slice(&bytes).unwrap())
}

#[test]
fn test_status_mapping() {
    let cases = [
        (AppError::Configuration("x".into()), StatusCode::INTERNAL_SERVER_ERROR),
        (AppError::InvalidRequest("x".into()), StatusCode::BAD_REQUEST),
        (AppError::InvalidState, StatusCode::BAD_REQUEST),
        (AppError::Unauthorized, StatusCode::UNAUTHORIZED),
        (AppError::NotAuthenticated("u1".into()), StatusCode::UNAUTHORIZED),
        (AppError::TokenExpired("u1".into()), StatusCode::UNAUTHORIZED),
        (
            AppError::Network {
                message: "timeout".into(),
                timed_out: true,
            },
            StatusCode::GATEWAY_TIMEOUT,
        ),
        (
            AppError::Network {
                message: "refused".into(),
                timed_out: false,
            },
            StatusCode::BAD_GATEWAY,
        ),
        (
            AppError::ProviderApi {
                status: 429,
                body: json!({}),
            },
            StatusCode::BAD_GATEWAY,
        ),
        (AppError::Persistence("x".into()), StatusCode::INTERNAL_SERVER_ERROR),
        (
            AppError::StoredTokensUnavailable(Box::new(AppError::TokenExpired("u1".into()))),
            StatusCode::INTERNAL_SERVER_ERROR,
        ),
    ];

    for (err, expected) in cases {
        assert_eq!(err.status(), expected, "{err:?}");
    }
}

#[tokio::test]
async fn test_internal_errors_do_not_leak_cause() {
    let (status, body) =
        body_of(AppError::Persistence("connection string with password".into())).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["error"], "Database error");
    assert_eq!(body["code"], "persistence_error");

    let (_, body) = body_of(AppError::Internal(anyhow::anyhow!("secret detail"))).await;
    assert_eq!(body["error"], "Internal server error");
}

#[tokio::test]
async fn test_provider_auth_details_are_preserved() {
    let (status, body) = body_of(AppError::ProviderAuth {
        status: 400,
        error: "invalid_client".into(),
        description: "Invalid client secret".into(),
    })
    .await;

    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(
        body["details"],
        json!({
            "error": "invalid_client",
            "error_description": "Invalid client secret",
            "status": 400
        })
    );
}

#[tokio::test]
async fn test_plain_errors_have_no_details() {
    let (_, body) = body_of(AppError::TokenExpired("u1".into())).await;
    assert_eq!(
        body["error"],
        "Spotify token has expired for user u1. Please re-authenticate."
    );
    assert!(body.get("details").is_none());
}

#[tokio::test]
async fn test_stored_tokens_unavailable_keeps_inner_code() {
    let (status, body) = body_of(AppError::StoredTokensUnavailable(Box::new(
        AppError::NotAuthenticated("u1".into()),
    )))
    .await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["code"], "not_authenticated");
    assert_eq!(
        body["error"],
        AppError::NotAuthenticated("u1".into()).to_string()
    );
}
