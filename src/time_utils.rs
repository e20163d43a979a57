// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Shared helpers for date/time formatting and token expiry math.

use chrono::{DateTime, Duration, SecondsFormat, Utc};

/// Format a UTC timestamp as RFC3339 using a `Z` suffix.
pub fn format_utc_rfc3339(date: DateTime<Utc>) -> String {
    date.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Absolute expiry for a token issued at `issued_at` with a lifetime of `expires_in` seconds.
///
/// `None` when the result is outside chrono's representable range.
pub fn expiry_from(issued_at: DateTime<Utc>, expires_in: i64) -> Option<DateTime<Utc>> {
    Duration::try_seconds(expires_in.max(0)).and_then(|d| issued_at.checked_add_signed(d))
}
