// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    Router,
};
use chrono::{DateTime, Utc};
use serde_json::Value;
use spotit::config::Config;
use spotit::db::FirestoreDb;
use spotit::middleware::auth::create_jwt;
use spotit::models::SpotifyCredentials;
use spotit::routes::create_router;
use spotit::services::SpotifyService;
use spotit::AppState;
use std::sync::Arc;
use tower::ServiceExt;
use wiremock::MockServer;

/// `test_client_id:test_secret`, as sent in the Basic auth header.
#[allow(dead_code)]
pub const BASIC_AUTH: &str = "Basic dGVzdF9jbGllbnRfaWQ6dGVzdF9zZWNyZXQ=";

/// Check if emulator is available via environment variable.
#[allow(dead_code)]
pub fn emulator_available() -> bool {
    std::env::var("FIRESTORE_EMULATOR_HOST").is_ok()
}

/// Skip test with message if emulator not available.
#[macro_export]
macro_rules! require_emulator {
    () => {
        if !crate::common::emulator_available() {
            eprintln!("⚠️  Skipping: FIRESTORE_EMULATOR_HOST not set");
            return;
        }
    };
}

/// Create a test database connection.
#[allow(dead_code)]
pub async fn test_db() -> FirestoreDb {
    FirestoreDb::new("test-project")
        .await
        .expect("Failed to connect to Firestore emulator")
}

/// App wired to a mock Spotify server.
#[allow(dead_code)]
pub struct TestApp {
    pub router: Router,
    pub state: Arc<AppState>,
    pub spotify: MockServer,
}

/// Config pointing both Spotify hosts at the mock server.
#[allow(dead_code)]
pub fn config_for(spotify: &MockServer) -> Config {
    Config {
        spotify_accounts_url: spotify.uri(),
        spotify_api_url: format!("{}/v1", spotify.uri()),
        ..Config::test_default()
    }
}

/// Create a test app with an in-memory store.
#[allow(dead_code)]
pub async fn create_test_app() -> TestApp {
    create_test_app_with(FirestoreDb::new_in_memory(), |_| {}).await
}

/// Create a test app with a given store and config tweaks.
#[allow(dead_code)]
pub async fn create_test_app_with(db: FirestoreDb, tweak: impl FnOnce(&mut Config)) -> TestApp {
    let spotify = MockServer::start().await;
    let mut config = config_for(&spotify);
    tweak(&mut config);

    let spotify_service = SpotifyService::new(&config, db.clone()).unwrap();
    let state = Arc::new(AppState {
        config,
        db,
        spotify_service,
    });

    TestApp {
        router: create_router(state.clone()),
        state,
        spotify,
    }
}

impl TestApp {
    /// Caller JWT signed with the app's key.
    #[allow(dead_code)]
    pub fn bearer(&self) -> String {
        let token = create_jwt("backend", &self.state.config.jwt_signing_key).unwrap();
        format!("Bearer {}", token)
    }

    /// A state token the app will accept.
    #[allow(dead_code)]
    pub fn valid_state(&self) -> String {
        spotit::services::oauth_state::issue_state(&self.state.config.oauth_state_key, Utc::now())
            .unwrap()
    }

    #[allow(dead_code)]
    pub async fn post_json(&self, path: &str, body: Value) -> (StatusCode, Value) {
        let request = Request::builder()
            .method("POST")
            .uri(path)
            .header(header::AUTHORIZATION, self.bearer())
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        send(&self.router, request).await
    }

    #[allow(dead_code)]
    pub async fn get(&self, path: &str) -> (StatusCode, Value) {
        let request = Request::builder().uri(path).body(Body::empty()).unwrap();
        send(&self.router, request).await
    }

    /// Store credentials directly, bypassing the exchange.
    #[allow(dead_code)]
    pub async fn seed_credentials(
        &self,
        user_id: &str,
        access_token: &str,
        refresh_token: &str,
        expires_at: DateTime<Utc>,
    ) -> SpotifyCredentials {
        let now = Utc::now();
        let credentials = SpotifyCredentials {
            user_id: user_id.to_string(),
            access_token: access_token.to_string(),
            refresh_token: refresh_token.to_string(),
            token_type: "Bearer".to_string(),
            expires_in: 3600,
            expires_at,
            scope: "user-read-private user-read-email".to_string(),
            spotify_user_id: "sp1".to_string(),
            display_name: "Listener".to_string(),
            email: "listener@example.com".to_string(),
            country: "US".to_string(),
            profile_image_url: String::new(),
            created_at: now,
            updated_at: now,
        };
        self.state.db.upsert_credentials(&credentials).await.unwrap()
    }
}

/// Run one request and decode the JSON body (Null if empty).
#[allow(dead_code)]
pub async fn send(router: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), 1024 * 1024)
        .await
        .unwrap();
    let json = serde_json::from_slice(&body).unwrap_or(Value::Null);
    (status, json)
}
