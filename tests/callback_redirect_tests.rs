// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Browser redirect (`GET /api/spotify/callback`) tests.
//!
//! The redirect is public and never exchanges the code itself.

use axum::http::StatusCode;
use wiremock::matchers::method;
use wiremock::{Mock, ResponseTemplate};

mod common;
use common::create_test_app;

#[tokio::test]
async fn test_redirect_hands_code_back() {
    let app = create_test_app().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&app.spotify)
        .await;

    let state = app.valid_state();
    let (status, body) = app
        .get(&format!("/api/spotify/callback?code=abc&state={}", state))
        .await;

    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["success"], true);
    assert_eq!(body["code"], "abc");
    assert_eq!(body["state"], state);
    assert_eq!(body["next"]["method"], "POST");
    assert_eq!(body["next"]["path"], "/api/spotify/callback");
}

#[tokio::test]
async fn test_redirect_with_provider_error() {
    let app = create_test_app().await;

    let (status, body) = app
        .get("/api/spotify/callback?error=access_denied&error_description=User%20declined&state=x")
        .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "authorization_denied");
    assert_eq!(body["details"]["error"], "access_denied");
    assert_eq!(body["details"]["error_description"], "User declined");
}

#[tokio::test]
async fn test_redirect_without_code() {
    let app = create_test_app().await;

    let (status, body) = app.get("/api/spotify/callback").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "invalid_request");
}

#[tokio::test]
async fn test_redirect_with_unsigned_state() {
    let app = create_test_app().await;

    let (status, body) = app
        .get("/api/spotify/callback?code=abc&state=9f86d081884c7d659a2feaa0c55ad015")
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "invalid_state");
}
