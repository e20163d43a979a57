//! Database layer (Firestore).

pub mod firestore;

pub use firestore::FirestoreDb;

/// Collection names as constants.
pub mod collections {
    /// OAuth credentials (keyed by internal user id)
    pub const TOKENS: &str = "spotify_tokens";
    /// Spotify account profiles (keyed by Spotify user id)
    pub const USERS: &str = "spotify_users";
}
