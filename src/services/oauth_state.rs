// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! OAuth `state` signing and PKCE (RFC 7636) helpers.
//!
//! The state parameter is stateless on the server: a random nonce and an
//! issue timestamp, HMAC-signed with the configured state key. A callback
//! is accepted only if the signature verifies and the state is younger than
//! the authorization-code lifetime.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::{DateTime, Duration, Utc};
use hmac::{Hmac, Mac};
use ring::rand::{SecureRandom, SystemRandom};
use sha2::{Digest, Sha256};

use crate::error::AppError;

// Type alias for HMAC-SHA256
type HmacSha256 = Hmac<Sha256>;

/// Spotify authorization codes are valid for ten minutes.
pub const STATE_MAX_AGE_SECS: i64 = 10 * 60;

const NONCE_BYTES: usize = 16;
const VERIFIER_BYTES: usize = 32;

fn random_bytes<const N: usize>() -> Result<[u8; N], AppError> {
    let mut buf = [0u8; N];
    SystemRandom::new()
        .fill(&mut buf)
        .map_err(|_| AppError::Internal(anyhow::anyhow!("System RNG unavailable")))?;
    Ok(buf)
}

fn sign(payload: &str, key: &[u8]) -> Result<HmacSha256, AppError> {
    let mut mac = HmacSha256::new_from_slice(key)
        .map_err(|e| AppError::Internal(anyhow::anyhow!("HMAC init failed: {}", e)))?;
    mac.update(payload.as_bytes());
    Ok(mac)
}

/// Issue a fresh signed state token.
pub fn issue_state(key: &[u8], now: DateTime<Utc>) -> Result<String, AppError> {
    let nonce = hex::encode(random_bytes::<NONCE_BYTES>()?);

    // Create the data payload: "nonce_hex|timestamp_hex"
    let payload = format!("{}|{:x}", nonce, now.timestamp_millis());
    let signature = sign(&payload, key)?.finalize().into_bytes();

    let signed = format!("{}|{}", payload, hex::encode(signature));
    Ok(URL_SAFE_NO_PAD.encode(signed.as_bytes()))
}

/// Verify a state token previously produced by [`issue_state`].
///
/// Returns `false` for malformed, tampered, future-dated or stale tokens.
pub fn verify_state(state: &str, key: &[u8], now: DateTime<Utc>) -> bool {
    let Some(issued_at) = decode_and_check(state, key) else {
        return false;
    };

    let age = now.signed_duration_since(issued_at);
    // A little skew tolerance for states minted by another instance.
    age >= Duration::seconds(-30) && age <= Duration::seconds(STATE_MAX_AGE_SECS)
}

fn decode_and_check(state: &str, key: &[u8]) -> Option<DateTime<Utc>> {
    let bytes = URL_SAFE_NO_PAD.decode(state).ok()?;
    let state_str = String::from_utf8(bytes).ok()?;

    // Format is "nonce_hex|timestamp_hex|signature_hex"
    let parts: Vec<&str> = state_str.splitn(3, '|').collect();
    if parts.len() != 3 {
        return None;
    }

    let (nonce, timestamp_hex, signature_hex) = (parts[0], parts[1], parts[2]);
    if nonce.len() != NONCE_BYTES * 2 {
        return None;
    }

    let signature = hex::decode(signature_hex).ok()?;
    let payload = format!("{}|{}", nonce, timestamp_hex);

    if sign(&payload, key).ok()?.verify_slice(&signature).is_err() {
        tracing::warn!("OAuth state signature mismatch");
        return None;
    }

    let millis = i64::from_str_radix(timestamp_hex, 16).ok()?;
    DateTime::<Utc>::from_timestamp_millis(millis)
}

/// PKCE verifier/challenge pair.
#[derive(Debug, Clone)]
pub struct PkcePair {
    /// 43-char base64url secret, kept by the client until token exchange
    pub code_verifier: String,
    /// BASE64URL(SHA256(code_verifier))
    pub code_challenge: String,
}

impl PkcePair {
    pub const METHOD: &'static str = "S256";

    pub fn generate() -> Result<Self, AppError> {
        let code_verifier = URL_SAFE_NO_PAD.encode(random_bytes::<VERIFIER_BYTES>()?);
        let code_challenge = code_challenge(&code_verifier);
        Ok(Self {
            code_verifier,
            code_challenge,
        })
    }
}

/// Compute the S256 code challenge for a verifier.
pub fn code_challenge(verifier: &str) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()))
}
