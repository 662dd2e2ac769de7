//! Inbound LogoutRequest and LogoutResponse validation.
//!
//! Redirect-binding signatures are detached query signatures and are
//! checked by the orchestrator against the raw query string; these
//! pipelines cover the message content.

use chrono::Duration;
use sp_core::{Clock, ErrorKind, Settings, SpError};

use crate::messages::{LogoutRequest, LogoutResponse, ParsedLogoutRequest, ParsedLogoutResponse};
use crate::validate::{url_eq, Collector};
use crate::xml::dom::Document;
use crate::xml::schema;

/// Validator for IdP-initiated `<samlp:LogoutRequest>` messages.
pub struct LogoutRequestValidator<'a> {
    settings: &'a Settings,
    clock: &'a dyn Clock,
}

impl<'a> LogoutRequestValidator<'a> {
    /// Creates a validator over frozen settings and an injected clock.
    pub fn new(settings: &'a Settings, clock: &'a dyn Clock) -> Self {
        Self { settings, clock }
    }

    /// Validates a decoded LogoutRequest.
    pub fn validate(&self, xml: &str) -> Result<ParsedLogoutRequest, Vec<SpError>> {
        let mut col = Collector::new(self.settings.strict);

        if self.settings.security.want_xml_validation {
            match Document::parse(xml) {
                Ok(doc) => {
                    if col.check(schema::validate_logout_request(&doc)) {
                        return Err(col.into_errors());
                    }
                }
                Err(e) => return Err(vec![e]),
            }
        }

        let key = if self.settings.sp.private_key.is_some() {
            match self.settings.sp_private_key() {
                Ok(key) => Some(key),
                Err(e) => return Err(vec![e]),
            }
        } else {
            None
        };
        let parsed = match LogoutRequest::parse(
            xml,
            key.as_ref(),
            self.settings.security.reject_deprecated_algorithm,
        ) {
            Ok(parsed) => parsed,
            Err(e) => return Err(vec![e]),
        };

        if let Some(destination) = parsed.destination.as_deref().filter(|d| !d.is_empty()) {
            if let Some(slo_url) = self.settings.sp.slo_url.as_deref() {
                if !url_eq(destination, slo_url)
                    && col.push(SpError::new(
                        ErrorKind::InvalidDestination,
                        format!("LogoutRequest destination {destination:?}, expected {slo_url:?}"),
                    ))
                {
                    return Err(col.into_errors());
                }
            }
        }

        match parsed.issuer.as_deref() {
            Some(issuer) if issuer == self.settings.idp.entity_id => {}
            issuer => {
                if col.push(SpError::new(
                    ErrorKind::InvalidIssuer,
                    format!(
                        "LogoutRequest issuer {issuer:?}, expected {:?}",
                        self.settings.idp.entity_id
                    ),
                )) {
                    return Err(col.into_errors());
                }
            }
        }

        if let Some(not_on_or_after) = parsed.not_on_or_after {
            let skew = Duration::seconds(self.settings.security.allowed_clock_drift_secs);
            if not_on_or_after <= self.clock.now() - skew
                && col.push(SpError::new(
                    ErrorKind::AssertionExpired,
                    format!("LogoutRequest expired at {not_on_or_after}"),
                ))
            {
                return Err(col.into_errors());
            }
        }

        if parsed.name_id.is_none()
            && col.push(SpError::new(
                ErrorKind::InvalidNameId,
                "LogoutRequest carries no NameID",
            ))
        {
            return Err(col.into_errors());
        }

        if col.is_clean() {
            Ok(parsed)
        } else {
            Err(col.into_errors())
        }
    }
}

/// Validator for `<samlp:LogoutResponse>` messages completing SP-initiated
/// logout.
pub struct LogoutResponseValidator<'a> {
    settings: &'a Settings,
}

impl<'a> LogoutResponseValidator<'a> {
    /// Creates a validator over frozen settings.
    pub fn new(settings: &'a Settings) -> Self {
        Self { settings }
    }

    /// Validates a decoded LogoutResponse. `expected_in_response_to` is the
    /// ID of the LogoutRequest this SP sent, when one is known.
    pub fn validate(
        &self,
        xml: &str,
        expected_in_response_to: Option<&str>,
    ) -> Result<ParsedLogoutResponse, Vec<SpError>> {
        let mut col = Collector::new(self.settings.strict);

        if self.settings.security.want_xml_validation {
            match Document::parse(xml) {
                Ok(doc) => {
                    if col.check(schema::validate_logout_response(&doc)) {
                        return Err(col.into_errors());
                    }
                }
                Err(e) => return Err(vec![e]),
            }
        }

        let parsed = match LogoutResponse::parse(xml) {
            Ok(parsed) => parsed,
            Err(e) => return Err(vec![e]),
        };

        match parsed.issuer.as_deref() {
            Some(issuer) if issuer == self.settings.idp.entity_id => {}
            issuer => {
                if col.push(SpError::new(
                    ErrorKind::InvalidIssuer,
                    format!(
                        "LogoutResponse issuer {issuer:?}, expected {:?}",
                        self.settings.idp.entity_id
                    ),
                )) {
                    return Err(col.into_errors());
                }
            }
        }

        if let Some(destination) = parsed.destination.as_deref().filter(|d| !d.is_empty()) {
            if let Some(slo_url) = self.settings.sp.slo_url.as_deref() {
                if !url_eq(destination, slo_url)
                    && col.push(SpError::new(
                        ErrorKind::InvalidDestination,
                        format!("LogoutResponse destination {destination:?}, expected {slo_url:?}"),
                    ))
                {
                    return Err(col.into_errors());
                }
            }
        }

        if let Some(expected) = expected_in_response_to {
            if parsed.in_response_to.as_deref() != Some(expected)
                && col.push(SpError::new(
                    ErrorKind::InvalidInResponseTo,
                    format!(
                        "LogoutResponse InResponseTo {:?}, expected {expected:?}",
                        parsed.in_response_to
                    ),
                ))
            {
                return Err(col.into_errors());
            }
        }

        if !parsed.is_success()
            && col.push(SpError::new(
                ErrorKind::ResponseStatusError,
                format!(
                    "logout status {:?}{}",
                    parsed.status_code.as_deref().unwrap_or("missing"),
                    parsed
                        .sub_status_code
                        .as_deref()
                        .map(|s| format!(", sub-status {s}"))
                        .unwrap_or_default()
                ),
            ))
        {
            return Err(col.into_errors());
        }

        if col.is_clean() {
            Ok(parsed)
        } else {
            Err(col.into_errors())
        }
    }
}
