//! The per-transaction session result.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Session state produced by a successful `process_response`.
///
/// `last_assertion_id` and `last_assertion_not_on_or_after` are the replay
/// hooks: the core does not persist seen assertion IDs, so multi-process
/// deployments enforce one-time use in their own shared store.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionData {
    /// Whether the last processed response authenticated the subject.
    pub authenticated: bool,
    /// Subject NameID value.
    pub name_id: Option<String>,
    /// Subject NameID format.
    pub name_id_format: Option<String>,
    /// Subject NameID NameQualifier.
    pub name_id_name_qualifier: Option<String>,
    /// Subject NameID SPNameQualifier.
    pub name_id_sp_name_qualifier: Option<String>,
    /// Attributes keyed by `Name`.
    pub attributes: HashMap<String, Vec<String>>,
    /// Attributes keyed by `FriendlyName`.
    pub attributes_with_friendly_name: HashMap<String, Vec<String>>,
    /// Session index reported by the IdP.
    pub session_index: Option<String>,
    /// SessionNotOnOrAfter reported by the IdP.
    pub session_expiration: Option<DateTime<Utc>>,
    /// ID of the last processed Response message.
    pub last_message_id: Option<String>,
    /// ID of the consumed Assertion.
    pub last_assertion_id: Option<String>,
    /// Smallest valid bearer NotOnOrAfter of the consumed Assertion.
    pub last_assertion_not_on_or_after: Option<DateTime<Utc>>,
}
