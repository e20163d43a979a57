// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Application configuration loaded from environment variables.
//!
//! Loaded and validated once at startup, then passed by reference to every
//! component through `AppState`.

use hkdf::Hkdf;
use sha2::Sha256;
use std::env;
use std::time::Duration;

/// Default redirect URI registered with the Spotify dashboard for local dev.
pub const DEFAULT_REDIRECT_URI: &str = "http://localhost:5000/api/spotify/callback";

/// Application configuration, loaded once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    // --- Environment Variables (non-sensitive) ---
    /// Spotify OAuth client ID (public)
    pub spotify_client_id: String,
    /// Redirect URI registered with Spotify
    pub spotify_redirect_uri: String,
    /// Accounts host (authorize + token endpoints)
    pub spotify_accounts_url: String,
    /// Web API base URL
    pub spotify_api_url: String,
    /// Market used for searches when the caller does not pass one
    pub spotify_market: String,
    /// Frontend URL allowed by CORS
    pub frontend_url: String,
    /// GCP project ID (Firestore)
    pub gcp_project_id: String,
    /// Timeout applied to every Spotify request
    pub provider_timeout: Duration,
    /// Server port
    pub port: u16,

    // --- Secrets ---
    /// Spotify OAuth client secret
    pub spotify_client_secret: String,
    /// JWT signing key for caller bearer tokens (raw bytes)
    pub jwt_signing_key: Vec<u8>,
    /// HMAC key for the OAuth `state` parameter
    pub oauth_state_key: Vec<u8>,
}

impl Config {
    /// Config for tests only.
    pub fn test_default() -> Self {
        Self {
            spotify_client_id: "test_client_id".to_string(),
            spotify_redirect_uri: DEFAULT_REDIRECT_URI.to_string(),
            spotify_accounts_url: "https://accounts.spotify.com".to_string(),
            spotify_api_url: "https://api.spotify.com/v1".to_string(),
            spotify_market: "US".to_string(),
            frontend_url: "http://localhost:5173".to_string(),
            gcp_project_id: "test-project".to_string(),
            provider_timeout: Duration::from_secs(5),
            port: 5000,
            spotify_client_secret: "test_secret".to_string(),
            jwt_signing_key: b"test_jwt_key_32_bytes_minimum!!".to_vec(),
            oauth_state_key: b"test_state_key_32_bytes_minimum!".to_vec(),
        }
    }

    /// Load configuration from environment variables.
    ///
    /// A `.env` file in the working directory is honored for local development.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok(); // Load .env file if present

        let spotify_client_secret = env::var("SPOTIFY_CLIENT_SECRET")
            .map(|v| v.trim().to_string())
            .map_err(|_| ConfigError::Missing("SPOTIFY_CLIENT_SECRET"))?;

        let oauth_state_key = match env::var("OAUTH_STATE_KEY") {
            Ok(key) if !key.trim().is_empty() => key.trim().as_bytes().to_vec(),
            _ => derive_state_key(&spotify_client_secret),
        };

        let provider_timeout_secs = match env::var("PROVIDER_TIMEOUT_SECS") {
            Ok(raw) => raw
                .trim()
                .parse::<u64>()
                .map_err(|_| ConfigError::Invalid("PROVIDER_TIMEOUT_SECS", raw))?,
            Err(_) => 10,
        };

        Ok(Self {
            spotify_client_id: env::var("SPOTIFY_CLIENT_ID")
                .map(|v| v.trim().to_string())
                .map_err(|_| ConfigError::Missing("SPOTIFY_CLIENT_ID"))?,
            spotify_redirect_uri: env::var("SPOTIFY_REDIRECT_URI")
                .unwrap_or_else(|_| DEFAULT_REDIRECT_URI.to_string()),
            spotify_accounts_url: env::var("SPOTIFY_ACCOUNTS_URL")
                .unwrap_or_else(|_| "https://accounts.spotify.com".to_string()),
            spotify_api_url: env::var("SPOTIFY_API_URL")
                .unwrap_or_else(|_| "https://api.spotify.com/v1".to_string()),
            spotify_market: env::var("SPOTIFY_MARKET").unwrap_or_else(|_| "US".to_string()),
            frontend_url: env::var("FRONTEND_URL")
                .unwrap_or_else(|_| "http://localhost:5173".to_string()),
            gcp_project_id: env::var("GCP_PROJECT_ID").unwrap_or_else(|_| "local-dev".to_string()),
            provider_timeout: Duration::from_secs(provider_timeout_secs),
            port: env::var("PORT")
                .unwrap_or_else(|_| "5000".to_string())
                .parse()
                .unwrap_or(5000),

            spotify_client_secret,
            jwt_signing_key: env::var("JWT_SIGNING_KEY")
                .map_err(|_| ConfigError::Missing("JWT_SIGNING_KEY"))?
                .into_bytes(),
            oauth_state_key,
        })
    }

    /// Reject configurations that would only fail later, deep inside a request.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.spotify_client_id.is_empty() {
            return Err(ConfigError::Missing("SPOTIFY_CLIENT_ID"));
        }
        if self.spotify_client_secret.is_empty() {
            return Err(ConfigError::Missing("SPOTIFY_CLIENT_SECRET"));
        }
        if self.jwt_signing_key.is_empty() {
            return Err(ConfigError::Missing("JWT_SIGNING_KEY"));
        }

        let redirect = reqwest::Url::parse(&self.spotify_redirect_uri).map_err(|_| {
            ConfigError::Invalid("SPOTIFY_REDIRECT_URI", self.spotify_redirect_uri.clone())
        })?;
        if !matches!(redirect.scheme(), "http" | "https") {
            return Err(ConfigError::Invalid(
                "SPOTIFY_REDIRECT_URI",
                self.spotify_redirect_uri.clone(),
            ));
        }

        if self.provider_timeout.is_zero() {
            return Err(ConfigError::Invalid(
                "PROVIDER_TIMEOUT_SECS",
                "0".to_string(),
            ));
        }

        Ok(())
    }
}

/// Derive the state HMAC key from the client secret when none is configured.
fn derive_state_key(client_secret: &str) -> Vec<u8> {
    let hk = Hkdf::<Sha256>::new(None, client_secret.as_bytes());
    let mut okm = [0u8; 32];
    // 32 bytes is far below the HKDF-SHA256 output limit, so expand cannot fail.
    if hk.expand(b"spotit oauth state v1", &mut okm).is_err() {
        return client_secret.as_bytes().to_vec();
    }
    okm.to_vec()
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    Missing(&'static str),

    #[error("Invalid value for {0}: {1:?}")]
    Invalid(&'static str, String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_from_env() {
        // Set required env vars for test
        env::set_var("SPOTIFY_CLIENT_ID", "test_id");
        env::set_var("SPOTIFY_CLIENT_SECRET", " test_secret \n");
        env::set_var("JWT_SIGNING_KEY", "test_jwt_key_32_bytes_minimum!!");
        env::remove_var("OAUTH_STATE_KEY");
        env::remove_var("PROVIDER_TIMEOUT_SECS");

        let config = Config::from_env().expect("Config should load");

        assert_eq!(config.spotify_client_id, "test_id");
        assert_eq!(config.spotify_client_secret, "test_secret");
        assert_eq!(config.provider_timeout, Duration::from_secs(10));
        assert_eq!(config.oauth_state_key, derive_state_key("test_secret"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_empty_client_id() {
        let config = Config {
            spotify_client_id: String::new(),
            ..Config::test_default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Missing("SPOTIFY_CLIENT_ID"))
        ));
    }

    #[test]
    fn test_validate_rejects_relative_redirect_uri() {
        let config = Config {
            spotify_redirect_uri: "/api/spotify/callback".to_string(),
            ..Config::test_default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid("SPOTIFY_REDIRECT_URI", _))
        ));
    }

    #[test]
    fn test_validate_rejects_zero_timeout() {
        let config = Config {
            provider_timeout: Duration::ZERO,
            ..Config::test_default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_derived_state_key_is_stable_and_secret_dependent() {
        assert_eq!(derive_state_key("a"), derive_state_key("a"));
        assert_ne!(derive_state_key("a"), derive_state_key("b"));
        assert_eq!(derive_state_key("a").len(), 32);
    }
}
