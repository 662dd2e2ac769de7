//! `xs:dateTime` formatting and parsing.
//!
//! SAML instants are UTC. Outbound timestamps are emitted with seconds
//! precision and a trailing `Z`; inbound values may carry fractional
//! seconds or an explicit offset.

use chrono::{DateTime, SecondsFormat, Utc};
use sp_core::{ErrorKind, SpError, SpResult};

/// Formats an instant as a SAML `xs:dateTime`.
#[must_use]
pub fn format_instant(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Parses a SAML `xs:dateTime`.
///
/// # Errors
///
/// Returns `InvalidXml` when the value is not a valid timestamp.
pub fn parse_instant(value: &str) -> SpResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| SpError::new(ErrorKind::InvalidXml, format!("bad xs:dateTime {value:?}: {e}")))
}
