// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Spotify accounts + Web API client.
//!
//! Handles:
//! - Authorization URL construction (optionally with PKCE)
//! - Authorization-code exchange and profile capture
//! - Token refresh when expired
//! - Authenticated proxy calls (profile, search)

use crate::config::Config;
use crate::error::AppError;
use crate::services::oauth_state::PkcePair;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Scopes requested at login.
pub const SCOPES: &[&str] = &[
    "user-read-private",
    "user-read-email",
    "playlist-read-private",
    "user-top-read",
    "user-read-recently-played",
    "user-library-read",
];

/// Spotify API client.
#[derive(Clone)]
pub struct SpotifyClient {
    http: reqwest::Client,
    accounts_url: String,
    api_url: String,
    client_id: String,
    client_secret: String,
    redirect_uri: String,
}

impl SpotifyClient {
    /// Create a new Spotify client from configuration.
    ///
    /// Every request made by this client is bounded by `config.provider_timeout`.
    pub fn new(config: &Config) -> Result<Self, AppError> {
        let http = reqwest::Client::builder()
            .timeout(config.provider_timeout)
            .build()
            .map_err(|e| AppError::Internal(anyhow::anyhow!("HTTP client init failed: {}", e)))?;

        Ok(Self {
            http,
            accounts_url: config.spotify_accounts_url.trim_end_matches('/').to_string(),
            api_url: config.spotify_api_url.trim_end_matches('/').to_string(),
            client_id: config.spotify_client_id.clone(),
            client_secret: config.spotify_client_secret.clone(),
            redirect_uri: config.spotify_redirect_uri.clone(),
        })
    }

    pub fn redirect_uri(&self) -> &str {
        &self.redirect_uri
    }

    fn require_client_id(&self) -> Result<(), AppError> {
        if self.client_id.is_empty() {
            return Err(AppError::Configuration(
                "Missing SPOTIFY_CLIENT_ID".to_string(),
            ));
        }
        Ok(())
    }

    fn require_client_credentials(&self) -> Result<(), AppError> {
        self.require_client_id()?;
        if self.client_secret.is_empty() {
            return Err(AppError::Configuration(
                "Missing SPOTIFY_CLIENT_SECRET".to_string(),
            ));
        }
        Ok(())
    }

    /// Build the authorize URL the browser is sent to.
    pub fn authorize_url(&self, state: &str, pkce: Option<&PkcePair>) -> Result<String, AppError> {
        self.require_client_id()?;

        let scope = SCOPES.join(" ");
        let mut params = vec![
            ("client_id", self.client_id.as_str()),
            ("response_type", "code"),
            ("redirect_uri", self.redirect_uri.as_str()),
            ("scope", scope.as_str()),
            ("state", state),
            // Force the consent dialog even if the user approved before.
            ("show_dialog", "true"),
        ];
        if let Some(pair) = pkce {
            params.push(("code_challenge_method", PkcePair::METHOD));
            params.push(("code_challenge", pair.code_challenge.as_str()));
        }

        let query = params
            .iter()
            .map(|(k, v)| format!("{}={}", k, urlencoding::encode(v)))
            .collect::<Vec<_>>()
            .join("&");

        Ok(format!("{}/authorize?{}", self.accounts_url, query))
    }

    /// Exchange an authorization code for tokens.
    ///
    /// With a `code_verifier` this is the PKCE variant; the client is always
    /// authenticated with HTTP Basic.
    pub async fn exchange_code(
        &self,
        code: &str,
        code_verifier: Option<&str>,
    ) -> Result<TokenResponse, AppError> {
        self.require_client_credentials()?;

        let mut form = vec![
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", self.redirect_uri.as_str()),
        ];
        if let Some(verifier) = code_verifier {
            form.push(("client_id", self.client_id.as_str()));
            form.push(("code_verifier", verifier));
        }

        self.post_token_form(&form).await
    }

    /// Refresh an expired access token.
    pub async fn refresh_token(&self, refresh_token: &str) -> Result<TokenResponse, AppError> {
        self.require_client_credentials()?;

        self.post_token_form(&[
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
        ])
        .await
    }

    /// Get the current user's profile (raw JSON).
    pub async fn get_current_user(&self, access_token: &str) -> Result<Value, AppError> {
        let url = format!("{}/me", self.api_url);
        self.get_json(&url, access_token, &[]).await
    }

    /// Keyword search (raw JSON).
    pub async fn search(&self, access_token: &str, query: &SearchQuery) -> Result<Value, AppError> {
        let url = format!("{}/search", self.api_url);
        let limit = query.limit.to_string();
        self.get_json(
            &url,
            access_token,
            &[
                ("q", query.q.as_str()),
                ("type", query.search_type.as_str()),
                ("limit", limit.as_str()),
                ("market", query.market.as_str()),
            ],
        )
        .await
    }

    async fn post_token_form(&self, form: &[(&str, &str)]) -> Result<TokenResponse, AppError> {
        let url = format!("{}/api/token", self.accounts_url);

        let response = self
            .http
            .post(&url)
            .basic_auth(&self.client_id, Some(&self.client_secret))
            .form(form)
            .send()
            .await
            .map_err(AppError::network)?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(provider_auth_error(status, &body));
        }

        response.json().await.map_err(|e| {
            AppError::Internal(anyhow::anyhow!("Failed to parse token response: {}", e))
        })
    }

    /// Generic GET request with JSON response.
    async fn get_json(
        &self,
        url: &str,
        access_token: &str,
        query: &[(&str, &str)],
    ) -> Result<Value, AppError> {
        let response = self
            .http
            .get(url)
            .bearer_auth(access_token)
            .query(query)
            .send()
            .await
            .map_err(AppError::network)?;

        let status = response.status();
        let body = response.text().await.map_err(AppError::network)?;
        let json = serde_json::from_str::<Value>(&body).unwrap_or(Value::String(body));

        if !status.is_success() {
            if status.as_u16() == 429 {
                tracing::warn!("Spotify rate limit hit (429)");
            }
            return Err(AppError::ProviderApi {
                status: status.as_u16(),
                body: json,
            });
        }

        Ok(json)
    }
}

/// Turn a token-endpoint failure body into `ProviderAuth`, keeping Spotify's wording.
fn provider_auth_error(status: u16, body: &str) -> AppError {
    #[derive(Deserialize)]
    struct OAuthErrorBody {
        error: Option<String>,
        error_description: Option<String>,
    }

    let parsed = serde_json::from_str::<OAuthErrorBody>(body).ok();
    let error = parsed
        .as_ref()
        .and_then(|b| b.error.clone())
        .unwrap_or_else(|| "unknown_error".to_string());
    let description = parsed
        .and_then(|b| b.error_description)
        .unwrap_or_else(|| {
            if body.is_empty() {
                "No description provided".to_string()
            } else {
                body.to_string()
            }
        });

    AppError::ProviderAuth {
        status,
        error,
        description,
    }
}

/// Token endpoint response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default = "default_token_type")]
    pub token_type: String,
    pub expires_in: i64,
    /// Absent on refresh when Spotify does not rotate the refresh token
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub scope: String,
}

fn default_token_type() -> String {
    "Bearer".to_string()
}

/// Search parameters forwarded to `/v1/search`.
#[derive(Debug, Clone)]
pub struct SearchQuery {
    pub q: String,
    /// Comma-separated item types
    pub search_type: String,
    pub limit: u32,
    pub market: String,
}

/// Current-user profile (`/v1/me`), the subset we persist.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SpotifyProfile {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub country: Option<String>,
    #[serde(default)]
    pub images: Vec<SpotifyImage>,
    #[serde(default)]
    pub followers: Option<SpotifyFollowers>,
    #[serde(default)]
    pub product: Option<String>,
    #[serde(default)]
    pub explicit_content: Option<SpotifyExplicitContent>,
    #[serde(default)]
    pub href: Option<String>,
    #[serde(default)]
    pub uri: Option<String>,
    #[serde(default)]
    pub external_urls: Option<ExternalUrls>,
}

impl SpotifyProfile {
    pub fn image_url(&self) -> Option<&str> {
        self.images.first().map(|i| i.url.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpotifyImage {
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpotifyFollowers {
    #[serde(default)]
    pub total: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpotifyExplicitContent {
    #[serde(default)]
    pub filter_enabled: bool,
}

// ─────────────────────────────────────────────────────────────────────────────
// SpotifyService - High-level service with token management
// ─────────────────────────────────────────────────────────────────────────────

use crate::db::FirestoreDb;
use crate::models::{ExternalUrls, SpotifyCredentials, SpotifyUser};
use crate::services::oauth_state;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Margin before token expiration when proxy calls proactively refresh.
const TOKEN_REFRESH_MARGIN_SECS: i64 = 60;

/// Shared refresh locks type.
pub type RefreshLocks = Arc<DashMap<String, Arc<Mutex<()>>>>;

/// Output of the authorization URL builder.
#[derive(Debug, Clone)]
pub struct LoginUrl {
    pub auth_url: String,
    pub state: String,
    pub redirect_uri: String,
    pub pkce: Option<PkcePair>,
}

/// Input of the token exchange.
#[derive(Debug, Clone, Copy)]
pub struct CodeExchange<'a> {
    pub code: &'a str,
    /// Present for the PKCE variant
    pub code_verifier: Option<&'a str>,
    pub user_id: &'a str,
}

/// Result of a successful exchange + persist.
#[derive(Debug, Clone)]
pub struct ExchangeOutcome {
    pub tokens: TokenResponse,
    /// Empty when the profile fetch failed
    pub profile: SpotifyProfile,
    pub expires_at: DateTime<Utc>,
    pub credentials: SpotifyCredentials,
    /// `None` when no profile id was available or the profile write failed
    pub user: Option<SpotifyUser>,
}

/// Where a proxy call gets its access token from.
#[derive(Debug, Clone)]
pub enum AccessSource {
    /// Stored credentials for an internal user (preferred)
    User(String),
    /// Caller-supplied token (legacy); no expiry check is possible
    Token(String),
}

/// High-level Spotify service that manages the token lifecycle and API calls.
///
/// This service encapsulates:
/// - Login URL generation with signed state
/// - Code exchange, profile capture and persistence
/// - Token retrieval with refresh on expiry
/// - Per-user locking to prevent duplicate refresh calls
/// - Proxy calls to the Web API
#[derive(Clone)]
pub struct SpotifyService {
    client: SpotifyClient,
    db: FirestoreDb,
    state_key: Arc<[u8]>,
    /// Per-user mutex to serialize token refresh operations. Entries live
    /// only while a refresh for that user is in flight.
    refresh_locks: RefreshLocks,
}

impl SpotifyService {
    pub fn new(config: &Config, db: FirestoreDb) -> Result<Self, AppError> {
        Ok(Self {
            client: SpotifyClient::new(config)?,
            db,
            state_key: Arc::from(config.oauth_state_key.as_slice()),
            refresh_locks: Arc::new(DashMap::new()),
        })
    }

    // ─── Authorization URL ───────────────────────────────────────────────────

    /// Build the authorization redirect with a fresh signed state.
    pub fn login_url(&self, with_pkce: bool) -> Result<LoginUrl, AppError> {
        let state = oauth_state::issue_state(&self.state_key, Utc::now())?;
        let pkce = if with_pkce {
            Some(PkcePair::generate()?)
        } else {
            None
        };
        let auth_url = self.client.authorize_url(&state, pkce.as_ref())?;

        Ok(LoginUrl {
            auth_url,
            state,
            redirect_uri: self.client.redirect_uri().to_string(),
            pkce,
        })
    }

    /// Check a `state` echoed back by the browser or client.
    pub fn verify_state(&self, state: &str) -> Result<(), AppError> {
        if oauth_state::verify_state(state, &self.state_key, Utc::now()) {
            Ok(())
        } else {
            Err(AppError::InvalidState)
        }
    }

    // ─── Code Exchange ───────────────────────────────────────────────────────

    /// Exchange an authorization code, capture the profile, and persist
    /// both the credentials and the Spotify user.
    ///
    /// A failed profile fetch does not abort the flow. A failed credential
    /// write after a successful exchange is reported as `TokensNotPersisted`.
    pub async fn exchange_and_store(
        &self,
        request: CodeExchange<'_>,
    ) -> Result<ExchangeOutcome, AppError> {
        if request.code.is_empty() {
            return Err(AppError::InvalidRequest(
                "Authorization code is required".to_string(),
            ));
        }
        if request.user_id.is_empty() {
            return Err(AppError::InvalidRequest(
                "userId is required to store tokens".to_string(),
            ));
        }
        if request.code_verifier.is_some_and(str::is_empty) {
            return Err(AppError::InvalidRequest(
                "Code verifier is required".to_string(),
            ));
        }

        tracing::info!(
            user_id = %request.user_id,
            pkce = request.code_verifier.is_some(),
            code_len = request.code.len(),
            "Exchanging authorization code for tokens"
        );

        let tokens = self
            .client
            .exchange_code(request.code, request.code_verifier)
            .await?;

        let profile = match self.fetch_profile(&tokens.access_token).await {
            Ok(profile) => profile,
            Err(e) => {
                tracing::warn!(
                    user_id = %request.user_id,
                    error = %e,
                    "Could not fetch Spotify profile, continuing with empty profile"
                );
                SpotifyProfile::default()
            }
        };

        let now = Utc::now();
        let expires_at = token_expiry(now, tokens.expires_in)?;
        let credentials = build_credentials(request.user_id, &tokens, &profile, expires_at, now);

        let credentials = match self.db.upsert_credentials(&credentials).await {
            Ok(written) => written,
            Err(e) => {
                return Err(AppError::TokensNotPersisted {
                    reason: e.to_string(),
                    issued: Box::new(serde_json::json!({
                        "access_token": tokens.access_token,
                        "token_type": tokens.token_type,
                        "expires_in": tokens.expires_in,
                        "refresh_token": tokens.refresh_token,
                        "scope": tokens.scope,
                        "expiresAt": crate::time_utils::format_utc_rfc3339(expires_at),
                    })),
                });
            }
        };

        let user = if profile.id.is_empty() {
            tracing::warn!(
                user_id = %request.user_id,
                "No Spotify user id available, skipping user record"
            );
            None
        } else {
            match self.db.upsert_spotify_user(&build_user(&profile, now)).await {
                Ok(user) => Some(user),
                Err(e) => {
                    tracing::warn!(
                        error = %e,
                        spotify_user_id = %profile.id,
                        "Failed to store Spotify user profile, continuing anyway"
                    );
                    None
                }
            }
        };

        tracing::info!(
            user_id = %request.user_id,
            spotify_user_id = %profile.id,
            expires_at = %expires_at,
            "Spotify tokens stored"
        );

        Ok(ExchangeOutcome {
            tokens,
            profile,
            expires_at,
            credentials,
            user,
        })
    }

    async fn fetch_profile(&self, access_token: &str) -> Result<SpotifyProfile, AppError> {
        let raw = self.client.get_current_user(access_token).await?;
        serde_json::from_value(raw)
            .map_err(|e| AppError::Internal(anyhow::anyhow!("Unexpected profile shape: {}", e)))
    }

    // ─── Token Management ────────────────────────────────────────────────────

    /// Read the stored credentials without refreshing.
    pub async fn get_stored_tokens(&self, user_id: &str) -> Result<SpotifyCredentials, AppError> {
        if user_id.is_empty() {
            return Err(AppError::InvalidRequest("userId is required".to_string()));
        }

        let credentials = self
            .db
            .get_credentials(user_id)
            .await?
            .ok_or_else(|| AppError::NotAuthenticated(user_id.to_string()))?;

        if credentials.is_expired_at(Utc::now()) {
            return Err(AppError::TokenExpired(user_id.to_string()));
        }

        Ok(credentials)
    }

    /// Get a usable access token for the given user, refreshing if needed.
    ///
    /// 1. No stored credentials: `NotAuthenticated`
    /// 2. Token valid beyond the refresh margin: return it
    /// 3. Otherwise take the per-user lock, re-read, and refresh with Spotify
    pub async fn get_valid_access_token(&self, user_id: &str) -> Result<String, AppError> {
        let margin = Duration::seconds(TOKEN_REFRESH_MARGIN_SECS);

        let credentials = self
            .db
            .get_credentials(user_id)
            .await?
            .ok_or_else(|| AppError::NotAuthenticated(user_id.to_string()))?;

        if !credentials.expires_within(Utc::now(), margin) {
            return Ok(credentials.access_token);
        }

        // Only one task per user performs the refresh; others wait here.
        let lock = self
            .refresh_locks
            .entry(user_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();

        let result = {
            let _guard = lock.lock().await;
            self.refresh_if_stale(user_id, margin).await
        };

        // Evict the entry once no other task holds or waits on it. New
        // waiters go through `entry()`, which serializes with this check.
        drop(lock);
        self.refresh_locks
            .remove_if(user_id, |_, entry| Arc::strong_count(entry) == 1);

        result
    }

    async fn refresh_if_stale(&self, user_id: &str, margin: Duration) -> Result<String, AppError> {
        // Another task may have refreshed while we were waiting.
        let credentials = self
            .db
            .get_credentials(user_id)
            .await?
            .ok_or_else(|| AppError::NotAuthenticated(user_id.to_string()))?;

        if !credentials.expires_within(Utc::now(), margin) {
            return Ok(credentials.access_token);
        }

        self.refresh_stored(credentials).await
    }

    async fn refresh_stored(&self, credentials: SpotifyCredentials) -> Result<String, AppError> {
        let user_id = credentials.user_id.clone();

        if credentials.refresh_token.is_empty() {
            return Err(AppError::TokenExpired(user_id));
        }

        tracing::info!(user_id = %user_id, "Access token expired, refreshing");

        let refreshed = match self.client.refresh_token(&credentials.refresh_token).await {
            Ok(t) => t,
            Err(AppError::ProviderAuth { error, status, .. }) => {
                tracing::warn!(
                    user_id = %user_id,
                    status,
                    error = %error,
                    "Refresh token rejected by Spotify"
                );
                return Err(AppError::TokenExpired(user_id));
            }
            Err(e) => return Err(e),
        };

        let now = Utc::now();
        let expires_at = token_expiry(now, refreshed.expires_in)?;
        let updated = SpotifyCredentials {
            access_token: refreshed.access_token.clone(),
            refresh_token: refreshed
                .refresh_token
                .clone()
                .unwrap_or(credentials.refresh_token.clone()),
            token_type: refreshed.token_type.clone(),
            expires_in: refreshed.expires_in,
            expires_at,
            scope: if refreshed.scope.is_empty() {
                credentials.scope.clone()
            } else {
                refreshed.scope.clone()
            },
            ..credentials
        };

        self.db.upsert_credentials(&updated).await?;

        tracing::info!(user_id = %user_id, "Token refreshed and stored");
        Ok(refreshed.access_token)
    }

    /// Remove a user's stored credentials.
    pub async fn disconnect(&self, user_id: &str) -> Result<bool, AppError> {
        if user_id.is_empty() {
            return Err(AppError::InvalidRequest("userId is required".to_string()));
        }
        let removed = self.db.delete_credentials(user_id).await?;
        tracing::info!(user_id = %user_id, removed, "Spotify credentials removed");
        Ok(removed)
    }

    // ─── API Wrappers ────────────────────────────────────────────────────────

    async fn resolve_token(&self, source: &AccessSource) -> Result<String, AppError> {
        match source {
            AccessSource::User(user_id) if !user_id.is_empty() => {
                self.get_valid_access_token(user_id).await
            }
            AccessSource::Token(token) if !token.is_empty() => Ok(token.clone()),
            _ => Err(AppError::InvalidRequest(
                "userId or access token is required".to_string(),
            )),
        }
    }

    /// Get the Spotify profile for a user or a supplied token.
    pub async fn get_profile(&self, source: &AccessSource) -> Result<Value, AppError> {
        let access_token = self.resolve_token(source).await?;
        self.client.get_current_user(&access_token).await
    }

    /// Search Spotify for a user or a supplied token.
    pub async fn search(&self, source: &AccessSource, query: &SearchQuery) -> Result<Value, AppError> {
        if query.q.trim().is_empty() {
            return Err(AppError::InvalidRequest(
                "Search query (q) is required".to_string(),
            ));
        }
        let access_token = self.resolve_token(source).await?;
        self.client.search(&access_token, query).await
    }
}

fn token_expiry(now: DateTime<Utc>, expires_in: i64) -> Result<DateTime<Utc>, AppError> {
    crate::time_utils::expiry_from(now, expires_in).ok_or_else(|| {
        AppError::Internal(anyhow::anyhow!(
            "Spotify returned an out-of-range expires_in: {}",
            expires_in
        ))
    })
}

fn build_credentials(
    user_id: &str,
    tokens: &TokenResponse,
    profile: &SpotifyProfile,
    expires_at: DateTime<Utc>,
    now: DateTime<Utc>,
) -> SpotifyCredentials {
    SpotifyCredentials {
        user_id: user_id.to_string(),
        access_token: tokens.access_token.clone(),
        refresh_token: tokens.refresh_token.clone().unwrap_or_default(),
        token_type: tokens.token_type.clone(),
        expires_in: tokens.expires_in,
        expires_at,
        scope: tokens.scope.clone(),
        spotify_user_id: profile.id.clone(),
        display_name: profile.display_name.clone().unwrap_or_default(),
        email: profile.email.clone().unwrap_or_default(),
        country: profile.country.clone().unwrap_or_default(),
        profile_image_url: profile.image_url().unwrap_or_default().to_string(),
        created_at: now,
        updated_at: now,
    }
}

fn build_user(profile: &SpotifyProfile, now: DateTime<Utc>) -> SpotifyUser {
    SpotifyUser {
        spotify_user_id: profile.id.clone(),
        display_name: profile.display_name.clone().unwrap_or_default(),
        email: profile.email.clone().unwrap_or_default(),
        country: profile.country.clone().unwrap_or_default(),
        profile_image_url: profile.image_url().unwrap_or_default().to_string(),
        followers: profile.followers.as_ref().map_or(0, |f| f.total),
        product: profile.product.clone().unwrap_or_default(),
        explicit_content_enabled: profile
            .explicit_content
            .as_ref()
            .is_some_and(|e| e.filter_enabled),
        href: profile.href.clone().unwrap_or_default(),
        uri: profile.uri.clone().unwrap_or_default(),
        external_urls: profile.external_urls.clone().unwrap_or_default(),
        last_login_at: now,
        created_at: now,
        updated_at: now,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> SpotifyClient {
        SpotifyClient::new(&Config::test_default()).unwrap()
    }

    #[test]
    fn test_authorize_url_contains_required_params() {
        let url = client().authorize_url("st", None).unwrap();
        let parsed = reqwest::Url::parse(&url).unwrap();
        let params: std::collections::HashMap<_, _> = parsed.query_pairs().into_owned().collect();

        assert_eq!(parsed.path(), "/authorize");
        assert_eq!(params["client_id"], "test_client_id");
        assert_eq!(params["response_type"], "code");
        assert_eq!(params["redirect_uri"], crate::config::DEFAULT_REDIRECT_URI);
        assert_eq!(params["scope"], SCOPES.join(" "));
        assert_eq!(params["state"], "st");
        assert_eq!(params["show_dialog"], "true");
        assert!(!params.contains_key("code_challenge"));
    }

    #[test]
    fn test_authorize_url_with_pkce() {
        let pair = PkcePair::generate().unwrap();
        let url = client().authorize_url("st", Some(&pair)).unwrap();
        let parsed = reqwest::Url::parse(&url).unwrap();
        let params: std::collections::HashMap<_, _> = parsed.query_pairs().into_owned().collect();

        assert_eq!(params["code_challenge"], pair.code_challenge);
        assert_eq!(params["code_challenge_method"], "S256");
    }

    #[test]
    fn test_authorize_url_requires_client_id() {
        let config = Config {
            spotify_client_id: String::new(),
            ..Config::test_default()
        };
        let client = SpotifyClient::new(&config).unwrap();
        assert!(matches!(
            client.authorize_url("st", None),
            Err(AppError::Configuration(_))
        ));
    }

    #[test]
    fn test_provider_auth_error_keeps_spotify_wording() {
        let err = provider_auth_error(
            400,
            r#"{"error":"invalid_grant","error_description":"Invalid authorization code"}"#,
        );
        match err {
            AppError::ProviderAuth {
                status,
                error,
                description,
            } => {
                assert_eq!(status, 400);
                assert_eq!(error, "invalid_grant");
                assert_eq!(description, "Invalid authorization code");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_provider_auth_error_non_json_body() {
        match provider_auth_error(503, "") {
            AppError::ProviderAuth {
                error, description, ..
            } => {
                assert_eq!(error, "unknown_error");
                assert_eq!(description, "No description provided");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_token_response_defaults() {
        let tokens: TokenResponse = serde_json::from_value(serde_json::json!({
            "access_token": "T",
            "expires_in": 3600,
            "refresh_token": "R",
            "scope": "s1 s2"
        }))
        .unwrap();
        assert_eq!(tokens.token_type, "Bearer");
        assert_eq!(tokens.refresh_token.as_deref(), Some("R"));
    }

    #[test]
    fn test_build_user_normalizes_profile() {
        let profile: SpotifyProfile = serde_json::from_value(serde_json::json!({
            "id": "sp1",
            "display_name": "Listener",
            "country": "IL",
            "images": [{"url": "https://i.scdn.co/a.jpg"}, {"url": "https://i.scdn.co/b.jpg"}],
            "followers": {"href": null, "total": 12},
            "product": "premium",
            "explicit_content": {"filter_enabled": true, "filter_locked": false},
            "uri": "spotify:user:sp1",
            "external_urls": {"spotify": "https://open.spotify.com/user/sp1"}
        }))
        .unwrap();

        let user = build_user(&profile, Utc::now());
        assert_eq!(user.spotify_user_id, "sp1");
        assert_eq!(user.email, "");
        assert_eq!(user.profile_image_url, "https://i.scdn.co/a.jpg");
        assert_eq!(user.followers, 12);
        assert!(user.explicit_content_enabled);
        assert_eq!(
            user.external_urls.spotify,
            "https://open.spotify.com/user/sp1"
        );
    }

    #[tokio::test]
    async fn test_refresh_lock_is_released_after_refresh() {
        use wiremock::matchers::{body_string_contains, method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let spotify = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/token"))
            .and(body_string_contains("grant_type=refresh_token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "T2",
                "token_type": "Bearer",
                "expires_in": 3600
            })))
            .expect(1)
            .mount(&spotify)
            .await;

        let config = Config {
            spotify_accounts_url: spotify.uri(),
            spotify_api_url: format!("{}/v1", spotify.uri()),
            ..Config::test_default()
        };
        let db = FirestoreDb::new_in_memory();
        let now = Utc::now();
        for (user_id, refresh_token) in [("u1", "R"), ("u2", "")] {
            db.upsert_credentials(&SpotifyCredentials {
                user_id: user_id.to_string(),
                access_token: "T".to_string(),
                refresh_token: refresh_token.to_string(),
                token_type: "Bearer".to_string(),
                expires_in: 3600,
                expires_at: now - Duration::minutes(5),
                scope: String::new(),
                spotify_user_id: "sp1".to_string(),
                display_name: String::new(),
                email: String::new(),
                country: String::new(),
                profile_image_url: String::new(),
                created_at: now,
                updated_at: now,
            })
            .await
            .unwrap();
        }
        let service = SpotifyService::new(&config, db).unwrap();

        let (a, b) = tokio::join!(
            service.get_valid_access_token("u1"),
            service.get_valid_access_token("u1")
        );
        assert_eq!(a.unwrap(), "T2");
        assert_eq!(b.unwrap(), "T2");
        assert!(service.refresh_locks.is_empty());

        // A refresh that fails under the lock releases the entry too.
        let expired = service.get_valid_access_token("u2").await;
        assert!(matches!(expired, Err(AppError::TokenExpired(_))));
        assert!(service.refresh_locks.is_empty());
    }
}
