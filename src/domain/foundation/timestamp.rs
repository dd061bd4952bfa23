//! UTC timestamps for state records.

use chrono::{DateTime, SecondsFormat, Utc};

/// Returns the current UTC time formatted as an ISO 8601 string with
/// second precision (`2026-01-05T12:00:00Z`).
///
/// Stored on the conversation state record so persisted snapshots can be
/// ordered and aged without caring about sub-second noise.
pub fn utc_now() -> String {
    format_timestamp(Utc::now())
}

fn format_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Secs, true)
}
