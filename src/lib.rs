// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@kernel.org>

//! Spotit: Spotify account linking for the recipes/music backend
//!
//! This crate provides the OAuth authorization-code (+ PKCE) flow against
//! Spotify, persists the issued tokens per internal user, and proxies
//! authenticated Spotify Web API calls on the user's behalf.

pub mod config;
pub mod db;
pub mod error;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod services;
pub mod time_utils;

use config::Config;
use db::FirestoreDb;
use services::SpotifyService;

/// Shared application state.
pub struct AppState {
    pub config: Config,
    pub db: FirestoreDb,
    pub spotify_service: SpotifyService,
}
