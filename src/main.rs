// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Spotit API Server
//!
//! Links internal users to their Spotify accounts and proxies Spotify Web
//! API calls with the stored tokens.

use spotit::{config::Config, db::FirestoreDb, services::SpotifyService, AppState};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize structured JSON logging for GCP
    init_logging()?;

    // Load and validate configuration from environment
    let config = Config::from_env()?;
    config.validate()?;
    tracing::info!(
        port = config.port,
        redirect_uri = %config.spotify_redirect_uri,
        "Starting Spotit API"
    );

    // Initialize Firestore database
    let db = FirestoreDb::new(&config.gcp_project_id).await?;

    // Initialize Spotify service (owns the per-user refresh locks)
    let spotify_service = SpotifyService::new(&config, db.clone())?;

    // Build shared state
    let state = Arc::new(AppState {
        config: config.clone(),
        db,
        spotify_service,
    });

    // Build router
    let app = spotit::routes::create_router(state);

    // Start server
    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(address = %addr, "Server listening");

    axum::serve(listener, app).await?;
    Ok(())
}

/// Initialize structured JSON logging (GCP-compliant).
fn init_logging() -> Result<(), Box<dyn std::error::Error>> {
    let format = tracing_subscriber::fmt::layer()
        .json()
        .with_target(false)
        .with_current_span(true)
        .flatten_event(true);

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("spotit=debug".parse()?)
                .add_directive("info".parse()?),
        )
        .with(format)
        .init();
    Ok(())
}
