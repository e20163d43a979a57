// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Firestore client wrapper with typed operations.
//!
//! Provides high-level operations for:
//! - Tokens (Spotify OAuth credentials, one document per internal user)
//! - Users (Spotify account profiles, one document per Spotify user)
//!
//! Writes are upserts keyed on the document ID. `created_at` survives an
//! overwrite; `updated_at` is stamped on every write.

use crate::db::collections;
use crate::error::AppError;
use crate::models::{SpotifyCredentials, SpotifyUser};
use chrono::Utc;
use dashmap::DashMap;
use std::sync::Arc;

/// Storage backend behind [`FirestoreDb`].
#[derive(Clone)]
enum Backend {
    Firestore(firestore::FirestoreDb),
    /// Process-local maps, for tests and local runs without Firestore.
    Memory(Arc<MemoryCollections>),
    /// Every operation fails.
    Offline,
}

#[derive(Default)]
struct MemoryCollections {
    tokens: DashMap<String, SpotifyCredentials>,
    users: DashMap<String, SpotifyUser>,
}

/// Firestore database client.
#[derive(Clone)]
pub struct FirestoreDb {
    backend: Backend,
}

impl FirestoreDb {
    /// Create a new Firestore client.
    ///
    /// For local development with emulator, set FIRESTORE_EMULATOR_HOST.
    pub async fn new(project_id: &str) -> Result<Self, AppError> {
        // If the emulator environment variable is set, use unauthenticated connection
        // to avoid local credential warnings and leakage.
        if std::env::var("FIRESTORE_EMULATOR_HOST").is_ok() {
            return Self::create_emulator_client(project_id).await;
        }

        let client = firestore::FirestoreDb::new(project_id).await.map_err(|e| {
            AppError::Persistence(format!("Failed to connect to Firestore: {}", e))
        })?;

        tracing::info!(project = project_id, "Connected to Firestore");

        Ok(Self {
            backend: Backend::Firestore(client),
        })
    }

    /// Create a Firestore client for the emulator with unauthenticated access.
    async fn create_emulator_client(project_id: &str) -> Result<Self, AppError> {
        tracing::info!("Using unauthenticated connection for Firestore Emulator");

        let token_source = gcloud_sdk::ExternalJwtFunctionSource::new(|| async {
            Ok(gcloud_sdk::Token {
                token_type: "Bearer".to_string(),
                token: gcloud_sdk::SecretValue::new(
                    "eyJhbGciOiJub25lIn0.eyJ1aWQiOiJ0ZXN0In0."
                        .to_string()
                        .into(),
                ),
                expiry: chrono::Utc::now() + chrono::Duration::hours(1),
            })
        });

        let options = firestore::FirestoreDbOptions::new(project_id.to_string());

        let client = firestore::FirestoreDb::with_options_token_source(
            options,
            gcloud_sdk::GCP_DEFAULT_SCOPES.clone(),
            gcloud_sdk::TokenSourceType::ExternalSource(Box::new(token_source)),
        )
        .await
        .map_err(|e| {
            AppError::Persistence(format!("Failed to connect to Firestore Emulator: {}", e))
        })?;

        tracing::info!(
            project = project_id,
            "Connected to Firestore (Emulator/Unauthenticated)"
        );

        Ok(Self {
            backend: Backend::Firestore(client),
        })
    }

    /// Create an in-memory store (tests and local development).
    pub fn new_in_memory() -> Self {
        Self {
            backend: Backend::Memory(Arc::new(MemoryCollections::default())),
        }
    }

    /// Create an offline store for testing.
    ///
    /// All database operations will return an error if called.
    pub fn new_offline() -> Self {
        Self {
            backend: Backend::Offline,
        }
    }

    fn offline_error() -> AppError {
        AppError::Persistence("Database not connected (offline mode)".to_string())
    }

    // ─── Token Operations ────────────────────────────────────────

    /// Get stored Spotify credentials for an internal user.
    pub async fn get_credentials(
        &self,
        user_id: &str,
    ) -> Result<Option<SpotifyCredentials>, AppError> {
        match &self.backend {
            Backend::Firestore(client) => client
                .fluent()
                .select()
                .by_id_in(collections::TOKENS)
                .obj()
                .one(user_id)
                .await
                .map_err(|e| AppError::Persistence(e.to_string())),
            Backend::Memory(mem) => Ok(mem.tokens.get(user_id).map(|c| c.clone())),
            Backend::Offline => Err(Self::offline_error()),
        }
    }

    /// Create or replace the credentials for `credentials.user_id`.
    ///
    /// Returns the record as written (with `created_at`/`updated_at` resolved).
    pub async fn upsert_credentials(
        &self,
        credentials: &SpotifyCredentials,
    ) -> Result<SpotifyCredentials, AppError> {
        let mut record = credentials.clone();
        record.updated_at = Utc::now();

        match &self.backend {
            Backend::Firestore(client) => {
                if let Some(existing) = self.get_credentials(&record.user_id).await? {
                    record.created_at = existing.created_at;
                }

                let _: () = client
                    .fluent()
                    .update()
                    .in_col(collections::TOKENS)
                    .document_id(&record.user_id)
                    .object(&record)
                    .execute()
                    .await
                    .map_err(|e| AppError::Persistence(e.to_string()))?;
            }
            Backend::Memory(mem) => {
                mem.tokens
                    .entry(record.user_id.clone())
                    .and_modify(|existing| {
                        record.created_at = existing.created_at;
                        *existing = record.clone();
                    })
                    .or_insert_with(|| record.clone());
            }
            Backend::Offline => return Err(Self::offline_error()),
        }

        Ok(record)
    }

    /// Delete credentials (local disconnect).
    ///
    /// Returns `true` if a record existed.
    pub async fn delete_credentials(&self, user_id: &str) -> Result<bool, AppError> {
        match &self.backend {
            Backend::Firestore(client) => {
                let existed = self.get_credentials(user_id).await?.is_some();
                client
                    .fluent()
                    .delete()
                    .from(collections::TOKENS)
                    .document_id(user_id)
                    .execute()
                    .await
                    .map_err(|e| AppError::Persistence(e.to_string()))?;
                Ok(existed)
            }
            Backend::Memory(mem) => Ok(mem.tokens.remove(user_id).is_some()),
            Backend::Offline => Err(Self::offline_error()),
        }
    }

    // ─── Spotify User Operations ─────────────────────────────────

    /// Get a Spotify account profile by Spotify user ID.
    pub async fn get_spotify_user(
        &self,
        spotify_user_id: &str,
    ) -> Result<Option<SpotifyUser>, AppError> {
        match &self.backend {
            Backend::Firestore(client) => client
                .fluent()
                .select()
                .by_id_in(collections::USERS)
                .obj()
                .one(spotify_user_id)
                .await
                .map_err(|e| AppError::Persistence(e.to_string())),
            Backend::Memory(mem) => Ok(mem.users.get(spotify_user_id).map(|u| u.clone())),
            Backend::Offline => Err(Self::offline_error()),
        }
    }

    /// Create or update a Spotify account profile.
    pub async fn upsert_spotify_user(&self, user: &SpotifyUser) -> Result<SpotifyUser, AppError> {
        let mut record = user.clone();
        record.updated_at = Utc::now();

        match &self.backend {
            Backend::Firestore(client) => {
                if let Some(existing) = self.get_spotify_user(&record.spotify_user_id).await? {
                    record.created_at = existing.created_at;
                }

                let _: () = client
                    .fluent()
                    .update()
                    .in_col(collections::USERS)
                    .document_id(&record.spotify_user_id)
                    .object(&record)
                    .execute()
                    .await
                    .map_err(|e| AppError::Persistence(e.to_string()))?;
            }
            Backend::Memory(mem) => {
                mem.users
                    .entry(record.spotify_user_id.clone())
                    .and_modify(|existing| {
                        record.created_at = existing.created_at;
                        *existing = record.clone();
                    })
                    .or_insert_with(|| record.clone());
            }
            Backend::Offline => return Err(Self::offline_error()),
        }

        Ok(record)
    }

    /// Number of stored credential records (in-memory backend only).
    pub fn credential_count(&self) -> Option<usize> {
        match &self.backend {
            Backend::Memory(mem) => Some(mem.tokens.len()),
            _ => None,
        }
    }
}
