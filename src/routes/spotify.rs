// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Spotify account-linking routes.
//!
//! Mounted at [`PREFIX`]. `GET /callback` is the browser redirect target and
//! is public. Everything else is called by the backend on a user's behalf and
//! sits behind the JWT middleware.

use crate::error::{AppError, Result};
use crate::middleware::auth::{require_auth, AuthUser};
use crate::services::spotify::{SearchQuery, SpotifyProfile, TokenResponse};
use crate::services::{AccessSource, CodeExchange, PkcePair};
use crate::time_utils::format_utc_rfc3339;
use crate::AppState;
use axum::{
    extract::{Query, State},
    middleware,
    routing::{get, post},
    Extension, Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use validator::{Validate, ValidationError};
#[cfg(feature = "binding-generation")]
use ts_rs::TS;

/// Where [`router`] is nested.
pub const PREFIX: &str = "/api/spotify";
const CALLBACK_PATH: &str = "/api/spotify/callback";

/// Item types accepted by `/v1/search`.
const SEARCH_TYPES: &[&str] = &[
    "album",
    "artist",
    "playlist",
    "track",
    "show",
    "episode",
    "audiobook",
];
const DEFAULT_SEARCH_TYPE: &str = "track";
const DEFAULT_SEARCH_LIMIT: u32 = 20;

/// Spotify routes, relative to [`PREFIX`].
///
/// `/callback` carries both methods: the GET handler is outside the auth
/// layer, the POST handler inside it.
pub fn router(state: Arc<AppState>) -> Router<Arc<AppState>> {
    let authenticated = Router::new()
        .route("/login", post(login))
        .route("/callback", post(callback_exchange))
        .route("/token", post(token_exchange))
        .route("/profile", post(profile))
        .route("/search", post(search))
        .route("/tokens", post(stored_tokens))
        .route("/disconnect", post(disconnect))
        .route("/debug", get(debug))
        .route_layer(middleware::from_fn_with_state(state, require_auth));

    Router::new()
        .route("/callback", get(callback_redirect))
        .merge(authenticated)
}

/// Pull a required, non-empty string field out of a request body.
fn required<'a>(value: &'a Option<String>, message: &str) -> Result<&'a str> {
    match value.as_deref() {
        Some(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(AppError::InvalidRequest(message.to_string())),
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

/// `userId` wins over a caller-supplied token.
fn access_source(user_id: Option<String>, access_token: Option<String>) -> Result<AccessSource> {
    match (non_empty(user_id), non_empty(access_token)) {
        (Some(user_id), _) => Ok(AccessSource::User(user_id)),
        (None, Some(token)) => Ok(AccessSource::Token(token)),
        (None, None) => Err(AppError::InvalidRequest(
            "userId or accessToken is required".to_string(),
        )),
    }
}

// ─── Login ───────────────────────────────────────────────────

#[derive(Deserialize)]
struct LoginParams {
    #[serde(default)]
    pkce: bool,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(feature = "binding-generation", ts(export))]
pub struct LoginResponse {
    pub auth_url: String,
    pub state: String,
    pub redirect_uri: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code_verifier: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code_challenge: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code_challenge_method: Option<String>,
}

/// Build the Spotify authorization URL.
async fn login(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<AuthUser>,
    Query(params): Query<LoginParams>,
) -> Result<Json<LoginResponse>> {
    let login = state.spotify_service.login_url(params.pkce)?;

    tracing::info!(caller = %caller.subject, pkce = params.pkce, "Issued Spotify login URL");

    let (code_verifier, code_challenge) = match login.pkce {
        Some(PkcePair {
            code_verifier,
            code_challenge,
        }) => (Some(code_verifier), Some(code_challenge)),
        None => (None, None),
    };

    Ok(Json(LoginResponse {
        auth_url: login.auth_url,
        state: login.state,
        redirect_uri: login.redirect_uri,
        code_challenge_method: code_challenge.as_ref().map(|_| PkcePair::METHOD.to_string()),
        code_verifier,
        code_challenge,
    }))
}

// ─── Callback (browser redirect) ─────────────────────────────

#[derive(Deserialize)]
struct CallbackParams {
    code: Option<String>,
    state: Option<String>,
    error: Option<String>,
    error_description: Option<String>,
}

#[derive(Serialize)]
pub struct NextStep {
    pub method: &'static str,
    pub path: &'static str,
}

#[derive(Serialize)]
pub struct CallbackHandoff {
    pub success: bool,
    pub message: String,
    pub code: String,
    pub state: String,
    pub next: NextStep,
}

/// Receive Spotify's redirect and hand the code back to the caller.
///
/// The exchange itself happens on `POST /api/spotify/callback`.
async fn callback_redirect(
    State(state): State<Arc<AppState>>,
    Query(params): Query<CallbackParams>,
) -> Result<Json<CallbackHandoff>> {
    if let Some(error) = non_empty(params.error) {
        tracing::warn!(error = %error, "Spotify authorization denied");
        return Err(AppError::AuthorizationDenied {
            error,
            description: params
                .error_description
                .unwrap_or_else(|| "No description provided".to_string()),
        });
    }

    let code = required(&params.code, "Authorization code not received")?.to_string();
    let oauth_state = params.state.unwrap_or_default();
    state.spotify_service.verify_state(&oauth_state)?;

    Ok(Json(CallbackHandoff {
        success: true,
        message: "Authorization code received. Complete the exchange with a POST to the callback endpoint."
            .to_string(),
        code,
        state: oauth_state,
        next: NextStep {
            method: "POST",
            path: CALLBACK_PATH,
        },
    }))
}

// ─── Callback (exchange) ─────────────────────────────────────

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CallbackRequest {
    code: Option<String>,
    state: Option<String>,
    user_id: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(feature = "binding-generation", ts(export))]
pub struct LinkedUser {
    pub id: String,
    pub spotify_user_id: String,
    pub display_name: String,
    pub email: String,
    pub profile_image_url: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(feature = "binding-generation", ts(export))]
pub struct TokenSummary {
    pub id: String,
    pub expires_at: String,
    pub scope: String,
}

#[derive(Serialize)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(feature = "binding-generation", ts(export))]
pub struct CallbackResponse {
    pub success: bool,
    pub message: String,
    pub user: Option<LinkedUser>,
    pub tokens: TokenSummary,
}

/// Exchange the authorization code (confidential client) and link the account.
async fn callback_exchange(
    State(state): State<Arc<AppState>>,
    Json(body): Json<CallbackRequest>,
) -> Result<Json<CallbackResponse>> {
    let code = required(&body.code, "Authorization code is required")?;
    let user_id = required(&body.user_id, "userId is required")?;
    state
        .spotify_service
        .verify_state(body.state.as_deref().unwrap_or_default())?;

    let outcome = state
        .spotify_service
        .exchange_and_store(CodeExchange {
            code,
            code_verifier: None,
            user_id,
        })
        .await?;

    let user = outcome.user.map(|u| LinkedUser {
        id: u.spotify_user_id.clone(),
        spotify_user_id: u.spotify_user_id,
        display_name: u.display_name,
        email: u.email,
        profile_image_url: u.profile_image_url,
    });

    Ok(Json(CallbackResponse {
        success: true,
        message: "Spotify authentication completed successfully".to_string(),
        user,
        tokens: TokenSummary {
            id: outcome.credentials.user_id,
            expires_at: format_utc_rfc3339(outcome.expires_at),
            scope: outcome.tokens.scope,
        },
    }))
}

// ─── Token (PKCE exchange) ───────────────────────────────────

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct TokenRequest {
    code: Option<String>,
    #[serde(alias = "codeVerifier")]
    verifier: Option<String>,
    user_id: Option<String>,
    state: Option<String>,
}

/// Provider token fields (snake_case) merged with the persisted result.
#[derive(Serialize)]
pub struct TokenExchangeResponse {
    #[serde(flatten)]
    pub tokens: TokenResponse,
    pub profile: SpotifyProfile,
    #[serde(rename = "expiresAt")]
    pub expires_at: String,
    pub saved: bool,
    #[serde(rename = "tokenId")]
    pub token_id: String,
}

/// Exchange an authorization code with a PKCE verifier.
async fn token_exchange(
    State(state): State<Arc<AppState>>,
    Json(body): Json<TokenRequest>,
) -> Result<Json<TokenExchangeResponse>> {
    let code = required(&body.code, "Authorization code is required")?;
    let verifier = required(&body.verifier, "Code verifier is required")?;
    let user_id = required(&body.user_id, "userId is required")?;
    if let Some(oauth_state) = body.state.as_deref().filter(|s| !s.is_empty()) {
        state.spotify_service.verify_state(oauth_state)?;
    }

    let outcome = state
        .spotify_service
        .exchange_and_store(CodeExchange {
            code,
            code_verifier: Some(verifier),
            user_id,
        })
        .await?;

    Ok(Json(TokenExchangeResponse {
        tokens: outcome.tokens,
        profile: outcome.profile,
        expires_at: format_utc_rfc3339(outcome.expires_at),
        saved: true,
        token_id: outcome.credentials.user_id,
    }))
}

// ─── Proxy: profile ──────────────────────────────────────────

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProfileRequest {
    user_id: Option<String>,
    access_token: Option<String>,
}

/// Fetch the Spotify profile (raw provider JSON).
async fn profile(
    State(state): State<Arc<AppState>>,
    Json(body): Json<ProfileRequest>,
) -> Result<Json<Value>> {
    let source = access_source(body.user_id, body.access_token)?;
    let profile = state.spotify_service.get_profile(&source).await?;
    Ok(Json(profile))
}

// ─── Proxy: search ───────────────────────────────────────────

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
struct SearchRequest {
    q: Option<String>,
    #[serde(rename = "type")]
    #[validate(custom(function = "validate_search_type"))]
    search_type: Option<String>,
    #[validate(range(min = 1, max = 50, message = "limit must be between 1 and 50"))]
    limit: Option<u32>,
    #[validate(length(equal = 2, message = "market must be an ISO 3166-1 alpha-2 code"))]
    market: Option<String>,
    user_id: Option<String>,
    access_token: Option<String>,
}

fn validate_search_type(value: &str) -> std::result::Result<(), ValidationError> {
    let valid = !value.is_empty() && value.split(',').all(|t| SEARCH_TYPES.contains(&t.trim()));
    if valid {
        Ok(())
    } else {
        let mut err = ValidationError::new("search_type");
        err.message = Some(
            format!(
                "type must be a comma-separated subset of: {}",
                SEARCH_TYPES.join(", ")
            )
            .into(),
        );
        Err(err)
    }
}

/// Search Spotify (raw provider JSON).
async fn search(
    State(state): State<Arc<AppState>>,
    Json(body): Json<SearchRequest>,
) -> Result<Json<Value>> {
    let q = required(&body.q, "Search query (q) is required")?.to_string();
    body.validate()
        .map_err(|e| AppError::InvalidRequest(e.to_string()))?;

    let query = SearchQuery {
        q,
        search_type: body
            .search_type
            .as_deref()
            .map(|t| t.split(',').map(str::trim).collect::<Vec<_>>().join(","))
            .unwrap_or_else(|| DEFAULT_SEARCH_TYPE.to_string()),
        limit: body.limit.unwrap_or(DEFAULT_SEARCH_LIMIT),
        market: body
            .market
            .unwrap_or_else(|| state.config.spotify_market.clone()),
    };
    let source = access_source(body.user_id, body.access_token)?;

    let results = state.spotify_service.search(&source, &query).await?;
    Ok(Json(results))
}

// ─── Stored tokens ───────────────────────────────────────────

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UserRequest {
    user_id: Option<String>,
}

/// Profile snippet in the key shape existing `/tokens` clients read.
#[derive(Serialize)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(feature = "binding-generation", ts(export))]
pub struct StoredProfile {
    pub id: String,
    pub display_name: String,
    pub email: String,
    pub country: String,
    #[serde(rename = "profileImageUrl")]
    pub profile_image_url: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(feature = "binding-generation", ts(export))]
pub struct StoredTokensResponse {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
    pub expires_at: String,
    pub scope: String,
    pub spotify_profile: StoredProfile,
}

/// Return the stored credential bundle (no refresh).
///
/// A missing or expired record is a 500 here, unlike the proxy routes.
async fn stored_tokens(
    State(state): State<Arc<AppState>>,
    Json(body): Json<UserRequest>,
) -> Result<Json<StoredTokensResponse>> {
    let user_id = required(&body.user_id, "userId is required")?;
    let creds = state
        .spotify_service
        .get_stored_tokens(user_id)
        .await
        .map_err(|e| match e {
            AppError::NotAuthenticated(_) | AppError::TokenExpired(_) => {
                AppError::StoredTokensUnavailable(Box::new(e))
            }
            other => other,
        })?;

    Ok(Json(StoredTokensResponse {
        access_token: creds.access_token,
        refresh_token: creds.refresh_token,
        token_type: creds.token_type,
        expires_at: format_utc_rfc3339(creds.expires_at),
        scope: creds.scope,
        spotify_profile: StoredProfile {
            id: creds.spotify_user_id,
            display_name: creds.display_name,
            email: creds.email,
            country: creds.country,
            profile_image_url: creds.profile_image_url,
        },
    }))
}

// ─── Disconnect ──────────────────────────────────────────────

#[derive(Serialize)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(feature = "binding-generation", ts(export))]
pub struct DisconnectResponse {
    pub success: bool,
    pub removed: bool,
}

/// Forget a user's Spotify tokens.
async fn disconnect(
    State(state): State<Arc<AppState>>,
    Json(body): Json<UserRequest>,
) -> Result<Json<DisconnectResponse>> {
    let user_id = required(&body.user_id, "userId is required")?;
    let removed = state.spotify_service.disconnect(user_id).await?;
    Ok(Json(DisconnectResponse {
        success: true,
        removed,
    }))
}

// ─── Debug ───────────────────────────────────────────────────

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DebugResponse {
    pub client_id: String,
    pub has_client_id: bool,
    pub has_client_secret: bool,
    pub redirect_uri: String,
}

/// Report which Spotify settings are present, without revealing secrets.
async fn debug(State(state): State<Arc<AppState>>) -> Json<DebugResponse> {
    let client_id = &state.config.spotify_client_id;
    let prefix: String = client_id.chars().take(8).collect();

    Json(DebugResponse {
        client_id: if client_id.is_empty() {
            String::new()
        } else {
            format!("{}...", prefix)
        },
        has_client_id: !client_id.is_empty(),
        has_client_secret: !state.config.spotify_client_secret.is_empty(),
        redirect_uri: state.config.spotify_redirect_uri.clone(),
    })
}
