// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Router assembly.

pub mod spotify;

use crate::config::Config;
use crate::AppState;
use axum::http::{header, HeaderValue, Method};
use axum::{middleware, routing::get, Json, Router};
use reqwest::Url;
use serde::Serialize;
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tower_http::LatencyUnit;
use tracing::Level;
#[cfg(feature = "binding-generation")]
use ts_rs::TS;

const BUILD_ID: &str = match option_env!("BUILD_ID") {
    Some(id) => id,
    None => "unknown",
};

#[derive(Serialize)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(feature = "binding-generation", ts(export))]
pub struct HealthResponse {
    pub status: &'static str,
    pub build_id: &'static str,
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        build_id: BUILD_ID,
    })
}

/// True for the configured frontend origin, or any port on a loopback host.
fn is_allowed_origin(origin: &str, frontend_url: &str) -> bool {
    if origin == frontend_url.trim_end_matches('/') {
        return true;
    }
    let Ok(url) = Url::parse(origin) else {
        return false;
    };
    matches!(url.scheme(), "http" | "https")
        && matches!(url.host_str(), Some("localhost" | "127.0.0.1"))
}

fn cors_layer(config: &Config) -> CorsLayer {
    let frontend_url = config.frontend_url.clone();
    CorsLayer::new()
        .allow_origin(AllowOrigin::predicate(
            move |origin: &HeaderValue, _parts: &axum::http::request::Parts| {
                origin
                    .to_str()
                    .is_ok_and(|o| is_allowed_origin(o, &frontend_url))
            },
        ))
        .allow_credentials(true)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION, header::ACCEPT])
}

/// `/health` plus the Spotify API under [`spotify::PREFIX`].
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .nest(spotify::PREFIX, spotify::router(state.clone()))
        .layer(middleware::from_fn(
            crate::middleware::security::add_security_headers,
        ))
        .layer(cors_layer(&state.config))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(
                    DefaultOnResponse::new()
                        .level(Level::INFO)
                        .latency_unit(LatencyUnit::Millis),
                ),
        )
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;

    const FRONTEND: &str = "https://app.example.com";

    #[test]
    fn test_frontend_origin_allowed() {
        assert!(is_allowed_origin("https://app.example.com", FRONTEND));
        assert!(is_allowed_origin(
            "https://app.example.com",
            "https://app.example.com/"
        ));
        assert!(!is_allowed_origin("https://app.example.com.evil.io", FRONTEND));
    }

    #[test]
    fn test_loopback_any_port() {
        assert!(is_allowed_origin("http://localhost:5173", FRONTEND));
        assert!(is_allowed_origin("http://localhost", FRONTEND));
        assert!(is_allowed_origin("http://127.0.0.1:8080", FRONTEND));
    }

    #[test]
    fn test_loopback_lookalikes_rejected() {
        assert!(!is_allowed_origin("http://localhost.evil.com", FRONTEND));
        assert!(!is_allowed_origin("http://127.0.0.1.nip.io", FRONTEND));
        assert!(!is_allowed_origin("http://localhost@evil.com", FRONTEND));
        assert!(!is_allowed_origin("null", FRONTEND));
    }

    #[cfg(feature = "binding-generation")]
    #[test]
    fn test_bindings_export_inside_crate() {
        use std::path::PathBuf;
        assert_eq!(
            HealthResponse::output_path().map(|p| p.to_path_buf()),
            Some(PathBuf::from("HealthResponse.ts"))
        );
    }
}
