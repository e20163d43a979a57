//! Spotify user and credential models for storage.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// External links for a Spotify profile.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExternalUrls {
    #[serde(default)]
    pub spotify: String,
}

/// Spotify account profile stored in Firestore (one per Spotify user).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpotifyUser {
    /// Spotify user ID (also used as document ID)
    pub spotify_user_id: String,
    pub display_name: String,
    /// Email address (empty if not shared)
    pub email: String,
    pub country: String,
    /// First profile image URL, if any
    pub profile_image_url: String,
    pub followers: u64,
    /// Subscription tier ("free", "premium", ...)
    pub product: String,
    pub explicit_content_enabled: bool,
    pub href: String,
    pub uri: String,
    pub external_urls: ExternalUrls,
    /// Most recent successful authentication
    pub last_login_at: DateTime<Utc>,
    /// When the account was first linked
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A user's Spotify OAuth tokens plus a denormalized profile snippet.
///
/// Keyed by the internal `user_id`; there is at most one per user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpotifyCredentials {
    /// Internal user ID (also used as document ID)
    pub user_id: String,
    pub access_token: String,
    pub refresh_token: String,
    /// Usually "Bearer"
    pub token_type: String,
    /// Lifetime in seconds as returned by Spotify
    pub expires_in: i64,
    /// When the access token expires
    pub expires_at: DateTime<Utc>,
    /// Space-delimited granted scopes
    pub scope: String,

    pub spotify_user_id: String,
    pub display_name: String,
    pub email: String,
    pub country: String,
    pub profile_image_url: String,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SpotifyCredentials {
    /// Whether the access token is no longer usable at `now`.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// Whether the access token expires within `margin` of `now`.
    pub fn expires_within(&self, now: DateTime<Utc>, margin: chrono::Duration) -> bool {
        now + margin >= self.expires_at
    }
}
