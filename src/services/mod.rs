// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Services module - business logic layer.

pub mod oauth_state;
pub mod spotify;

pub use oauth_state::PkcePair;
pub use spotify::{AccessSource, CodeExchange, ExchangeOutcome, SpotifyClient, SpotifyService};
