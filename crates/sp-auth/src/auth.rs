//! The SP orchestrator.
//!
//! One [`Auth`] instance handles one browser transaction:
//!
//! | From            | Event                          | To              |
//! |-----------------|--------------------------------|-----------------|
//! | initial         | `login`                        | requested       |
//! | requested       | `process_response` (valid)     | authenticated   |
//! | requested       | `process_response` (invalid)   | failed          |
//! | authenticated   | `logout`                       | logout pending  |
//! | any             | `process_slo` with SAMLRequest | logged out      |
//! | logout pending  | `process_slo` with SAMLResponse| logged out      |
//!
//! `process_response` accepts only the POST binding; `process_slo` only the
//! Redirect binding. Local session destruction is the caller's business and
//! happens exclusively through the injected callback.

use sp_core::{Clock, ErrorKind, Settings, SpError, SpResult, SystemClock};
use sp_protocol_saml::bindings::{HttpRedirectBinding, SamlMessageType};
use sp_protocol_saml::messages::{
    AuthnRequest, AuthnRequestOptions, LogoutRequest, LogoutRequestOptions, LogoutResponse, NameId,
};
use sp_protocol_saml::sign::query::{
    build_signed_query, percent_encode, sign_query, signed_query_from_raw, verify_query,
};
use sp_protocol_saml::validate::{
    LogoutRequestValidator, LogoutResponseValidator, ResponseValidator,
};

use crate::http::HttpParams;
use crate::session::SessionData;

/// Options for `login`.
#[derive(Debug, Clone)]
pub struct LoginOptions {
    /// RelayState round-tripped through the IdP; typically the URL the
    /// user wanted.
    pub return_to: Option<String>,
    /// Ask the IdP to re-authenticate even with a live session.
    pub force_authn: bool,
    /// Forbid IdP interaction with the user.
    pub is_passive: bool,
    /// Emit a NameIDPolicy element.
    pub set_name_id_policy: bool,
    /// Request authentication for a specific subject.
    pub name_id_value_req: Option<String>,
    /// Extra query parameters appended to the redirect URL.
    pub extra_params: Vec<(String, String)>,
}

impl Default for LoginOptions {
    fn default() -> Self {
        Self {
            return_to: None,
            force_authn: false,
            is_passive: false,
            set_name_id_policy: true,
            name_id_value_req: None,
            extra_params: Vec::new(),
        }
    }
}

/// Options for `logout`.
#[derive(Debug, Clone, Default)]
pub struct LogoutOptions {
    /// RelayState round-tripped through the IdP.
    pub return_to: Option<String>,
    /// Subject to log out; defaults to the authenticated session's NameID.
    pub name_id: Option<String>,
    /// NameID format override.
    pub name_id_format: Option<String>,
    /// NameID NameQualifier override.
    pub name_id_name_qualifier: Option<String>,
    /// NameID SPNameQualifier override.
    pub name_id_sp_name_qualifier: Option<String>,
    /// Session index to terminate; defaults to the session's.
    pub session_index: Option<String>,
    /// Extra query parameters appended to the redirect URL.
    pub extra_params: Vec<(String, String)>,
}

/// Options for `process_slo`.
#[derive(Debug, Clone, Default)]
pub struct SloOptions {
    /// Skip the session-deletion callback.
    pub keep_local_session: bool,
    /// Reconstruct the signed octet string from the raw query string
    /// instead of re-encoding parsed values.
    pub retrieve_parameters_from_server: bool,
}

/// The per-transaction SP state machine.
pub struct Auth {
    settings: Settings,
    clock: Box<dyn Clock>,
    session: SessionData,
    errors: Vec<ErrorKind>,
    last_error: Option<String>,
    last_error_source: Option<SpError>,
    last_request_id: Option<String>,
    last_request_xml: Option<String>,
    last_response_xml: Option<String>,
}

impl Auth {
    /// Creates an orchestrator over validated settings with the system
    /// clock.
    pub fn new(settings: Settings) -> SpResult<Self> {
        Self::with_clock(settings, Box::new(SystemClock))
    }

    /// Creates an orchestrator with an injected clock.
    pub fn with_clock(settings: Settings, clock: Box<dyn Clock>) -> SpResult<Self> {
        settings.validate()?;
        Ok(Self {
            settings,
            clock,
            session: SessionData::default(),
            errors: Vec::new(),
            last_error: None,
            last_error_source: None,
            last_request_id: None,
            last_request_xml: None,
            last_response_xml: None,
        })
    }

    /// The frozen settings.
    #[must_use]
    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Toggles strict mode.
    pub fn set_strict(&mut self, strict: bool) {
        self.settings.set_strict(strict);
    }

    // ------------------------------------------------------------------
    // Outbound
    // ------------------------------------------------------------------

    /// Builds an AuthnRequest and returns the redirect URL to the IdP SSO
    /// endpoint. The request is query-signed when `authn_requests_signed`
    /// is enabled.
    pub fn login(&mut self, options: &LoginOptions) -> SpResult<String> {
        let request = AuthnRequest::new(
            &self.settings,
            self.clock.as_ref(),
            &AuthnRequestOptions {
                force_authn: options.force_authn,
                is_passive: options.is_passive,
                set_name_id_policy: options.set_name_id_policy,
                name_id_value_req: options.name_id_value_req.clone(),
            },
        );
        self.last_request_id = Some(request.id().to_string());
        self.last_request_xml = Some(request.xml().to_string());
        tracing::debug!(id = request.id(), "built AuthnRequest");

        let payload = request.redirect_payload(self.settings.compression.requests)?;
        self.redirect_url(
            &self.settings.idp.sso_url.clone(),
            SamlMessageType::Request,
            &payload,
            options.return_to.as_deref(),
            self.settings.security.authn_requests_signed,
            &options.extra_params,
        )
    }

    /// Builds a LogoutRequest and returns the redirect URL to the IdP SLO
    /// endpoint.
    ///
    /// # Errors
    ///
    /// `SingleLogoutNotSupported` when the IdP exposes no SLO endpoint.
    pub fn logout(&mut self, options: &LogoutOptions) -> SpResult<String> {
        let slo_url = self.settings.idp.slo_url.clone().ok_or_else(|| {
            SpError::new(
                ErrorKind::SingleLogoutNotSupported,
                "the IdP does not expose a Single Logout Service",
            )
        })?;

        let name_id_value = options
            .name_id
            .clone()
            .or_else(|| self.session.name_id.clone());
        let name_id = name_id_value.map(|value| {
            let mut name_id = NameId::new(value);
            name_id.format = options
                .name_id_format
                .clone()
                .or_else(|| self.session.name_id_format.clone());
            name_id.name_qualifier = options
                .name_id_name_qualifier
                .clone()
                .or_else(|| self.session.name_id_name_qualifier.clone());
            name_id.sp_name_qualifier = options
                .name_id_sp_name_qualifier
                .clone()
                .or_else(|| self.session.name_id_sp_name_qualifier.clone());
            name_id
        });
        let session_indexes = options
            .session_index
            .clone()
            .or_else(|| self.session.session_index.clone())
            .into_iter()
            .collect();

        let request = LogoutRequest::new(
            &self.settings,
            self.clock.as_ref(),
            &LogoutRequestOptions {
                name_id,
                session_indexes,
            },
        )?;
        self.last_request_id = Some(request.id().to_string());
        self.last_request_xml = Some(request.xml().to_string());
        tracing::debug!(id = request.id(), "built LogoutRequest");

        let payload = request.redirect_payload(self.settings.compression.requests)?;
        self.redirect_url(
            &slo_url,
            SamlMessageType::Request,
            &payload,
            options.return_to.as_deref(),
            self.settings.security.logout_request_signed,
            &options.extra_params,
        )
    }

    // ------------------------------------------------------------------
    // Inbound
    // ------------------------------------------------------------------

    /// Processes the SAML Response posted to the ACS.
    ///
    /// Validation failures do not raise: they populate `errors()` and
    /// leave the session unauthenticated. A missing `SAMLResponse`
    /// parameter raises, since that is a routing bug rather than a
    /// validation outcome.
    pub fn process_response(
        &mut self,
        post_params: &HttpParams,
        request_id: Option<&str>,
    ) -> SpResult<()> {
        self.reset_diagnostics();
        self.session = SessionData::default();

        let response = post_params.get("SAMLResponse").ok_or_else(|| {
            SpError::new(
                ErrorKind::SamlResponseNotFound,
                "SAMLResponse not found; only the HTTP-POST binding is supported on the ACS",
            )
        })?;

        let validator = ResponseValidator::new(&self.settings, self.clock.as_ref());
        match validator.validate(response, request_id) {
            Ok(data) => {
                self.last_response_xml = Some(data.response_xml.clone());
                self.session = SessionData {
                    authenticated: true,
                    name_id: data.name_id,
                    name_id_format: data.name_id_format,
                    name_id_name_qualifier: data.name_id_name_qualifier,
                    name_id_sp_name_qualifier: data.name_id_sp_name_qualifier,
                    attributes: data.attributes,
                    attributes_with_friendly_name: data.attributes_with_friendly_name,
                    session_index: data.session_index,
                    session_expiration: data.session_expiration,
                    last_message_id: Some(data.response_id),
                    last_assertion_id: Some(data.assertion_id),
                    last_assertion_not_on_or_after: data.assertion_not_on_or_after,
                };
                tracing::debug!("response accepted; session authenticated");
            }
            Err(errors) => self.record_errors(errors),
        }
        Ok(())
    }

    /// Processes the Single Logout Service query.
    ///
    /// For an IdP-initiated LogoutRequest, returns the redirect URL
    /// carrying the SP's LogoutResponse. For a LogoutResponse completing an
    /// SP-initiated logout, returns `None`. Session deletion goes through
    /// `delete_session` (no-op when absent) unless `keep_local_session`.
    pub fn process_slo(
        &mut self,
        query_params: &HttpParams,
        options: &SloOptions,
        mut delete_session: Option<&mut dyn FnMut()>,
    ) -> SpResult<Option<String>> {
        self.reset_diagnostics();
        let relay_state = query_params.get("RelayState").map(str::to_string);

        if let Some(response_param) = query_params.get("SAMLResponse") {
            let xml = match HttpRedirectBinding::decode(response_param) {
                Ok(xml) => xml,
                Err(e) => {
                    self.record_errors(vec![e]);
                    return Ok(None);
                }
            };
            if let Err(e) =
                self.verify_slo_signature(query_params, options, SamlMessageType::Response)
            {
                self.record_errors(vec![e]);
                return Ok(None);
            }

            let validator = LogoutResponseValidator::new(&self.settings);
            match validator.validate(&xml, self.last_request_id.as_deref()) {
                Ok(_) => {
                    self.last_response_xml = Some(xml);
                    if !options.keep_local_session {
                        if let Some(cb) = delete_session.as_mut() {
                            cb();
                        }
                    }
                    tracing::debug!("logout response accepted");
                    Ok(None)
                }
                Err(errors) => {
                    self.record_errors(errors);
                    Ok(None)
                }
            }
        } else if let Some(request_param) = query_params.get("SAMLRequest") {
            let xml = match HttpRedirectBinding::decode(request_param) {
                Ok(xml) => xml,
                Err(e) => {
                    self.record_errors(vec![e]);
                    return Ok(None);
                }
            };
            if let Err(e) =
                self.verify_slo_signature(query_params, options, SamlMessageType::Request)
            {
                self.record_errors(vec![e]);
                return Ok(None);
            }

            let validator = LogoutRequestValidator::new(&self.settings, self.clock.as_ref());
            let parsed = match validator.validate(&xml) {
                Ok(parsed) => parsed,
                Err(errors) => {
                    self.record_errors(errors);
                    return Ok(None);
                }
            };
            self.last_request_xml = Some(xml);

            if !options.keep_local_session {
                if let Some(cb) = delete_session.as_mut() {
                    cb();
                }
            }

            let destination = self
                .settings
                .idp
                .slo_response_url()
                .map(str::to_string)
                .ok_or_else(|| {
                    SpError::new(
                        ErrorKind::SingleLogoutNotSupported,
                        "the IdP does not expose a Single Logout Service",
                    )
                })?;
            let response =
                LogoutResponse::new(&self.settings, self.clock.as_ref(), parsed.id.as_deref())?;
            self.last_response_xml = Some(response.xml().to_string());
            tracing::debug!(in_response_to = ?parsed.id, "answering IdP-initiated logout");

            let payload = response.redirect_payload(self.settings.compression.responses)?;
            let url = self.redirect_url(
                &destination,
                SamlMessageType::Response,
                &payload,
                relay_state.as_deref(),
                self.settings.security.logout_response_signed,
                &[],
            )?;
            Ok(Some(url))
        } else {
            Err(SpError::new(
                ErrorKind::SamlLogoutMessageNotFound,
                "neither SAMLRequest nor SAMLResponse in the query; only the HTTP-Redirect \
                 binding is supported on the SLS",
            ))
        }
    }

    // ------------------------------------------------------------------
    // Diagnostics and session accessors
    // ------------------------------------------------------------------

    /// Whether the last processed response authenticated the subject.
    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.session.authenticated
    }

    /// The session result.
    #[must_use]
    pub fn session(&self) -> &SessionData {
        &self.session
    }

    /// Attribute values by `Name`.
    #[must_use]
    pub fn attribute(&self, name: &str) -> Option<&[String]> {
        self.session.attributes.get(name).map(Vec::as_slice)
    }

    /// Error kinds accumulated by the last `process_*` call.
    #[must_use]
    pub fn errors(&self) -> &[ErrorKind] {
        &self.errors
    }

    /// Detail string of the most recent error.
    #[must_use]
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Structured form of the most recent error.
    #[must_use]
    pub fn last_error_source(&self) -> Option<&SpError> {
        self.last_error_source.as_ref()
    }

    /// ID of the most recently built AuthnRequest or LogoutRequest.
    #[must_use]
    pub fn last_request_id(&self) -> Option<&str> {
        self.last_request_id.as_deref()
    }

    /// XML of the most recently built or received request.
    #[must_use]
    pub fn last_request_xml(&self) -> Option<&str> {
        self.last_request_xml.as_deref()
    }

    /// XML of the most recently processed or built response (decrypted form
    /// when decryption happened).
    #[must_use]
    pub fn last_response_xml(&self) -> Option<&str> {
        self.last_response_xml.as_deref()
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    fn reset_diagnostics(&mut self) {
        self.errors.clear();
        self.last_error = None;
        self.last_error_source = None;
    }

    fn record_errors(&mut self, errors: Vec<SpError>) {
        debug_assert!(!errors.is_empty());
        if let Some(last) = errors.last() {
            self.last_error = Some(last.to_string());
            self.last_error_source = Some(last.clone());
        }
        for err in &errors {
            tracing::warn!(kind = %err.kind, detail = %err.detail, "message rejected");
        }
        self.errors = errors.into_iter().map(|e| e.kind).collect();
    }

    fn verify_slo_signature(
        &self,
        params: &HttpParams,
        options: &SloOptions,
        kind: SamlMessageType,
    ) -> SpResult<()> {
        if !self.settings.security.want_messages_signed {
            return Ok(());
        }

        let signature = params.get("Signature").ok_or_else(|| {
            SpError::new(
                ErrorKind::NoSignedElement,
                "the logout message is required to be signed",
            )
        })?;
        let sig_alg = params.get("SigAlg").ok_or_else(|| {
            SpError::new(ErrorKind::InvalidSignature, "Signature without SigAlg")
        })?;

        let signed_query = if options.retrieve_parameters_from_server {
            let raw = params.raw_query().ok_or_else(|| {
                SpError::new(
                    ErrorKind::InvalidSignature,
                    "raw query string was not provided to process_slo",
                )
            })?;
            signed_query_from_raw(raw)?
        } else {
            let payload = params.get(kind.form_param()).ok_or_else(|| {
                SpError::new(ErrorKind::SamlLogoutMessageNotFound, "logout payload vanished")
            })?;
            build_signed_query(
                kind,
                payload,
                params.get("RelayState"),
                sig_alg,
                self.settings.security.lowercase_urlencoding,
            )
        };

        let certificates = self.settings.idp_certificates()?;
        if certificates.is_empty() {
            return Err(SpError::new(
                ErrorKind::InvalidSignature,
                "query signatures require a configured IdP certificate",
            ));
        }
        verify_query(
            &signed_query,
            signature,
            sig_alg,
            &certificates,
            self.settings.security.reject_deprecated_algorithm,
        )
    }

    fn redirect_url(
        &self,
        destination: &str,
        kind: SamlMessageType,
        payload: &str,
        relay_state: Option<&str>,
        sign: bool,
        extra_params: &[(String, String)],
    ) -> SpResult<String> {
        let lowercase = self.settings.security.lowercase_urlencoding;

        let mut query = if sign {
            let key = self.settings.sp_private_key()?;
            let (signed_query, signature) = sign_query(
                &key,
                kind,
                payload,
                relay_state,
                self.settings.security.signature_algorithm,
                lowercase,
            )?;
            format!(
                "{signed_query}&Signature={}",
                percent_encode(&signature, lowercase)
            )
        } else {
            let mut query = format!("{}={}", kind.form_param(), percent_encode(payload, lowercase));
            if let Some(rs) = relay_state {
                query.push_str("&RelayState=");
                query.push_str(&percent_encode(rs, lowercase));
            }
            query
        };

        for (name, value) in extra_params {
            query.push('&');
            query.push_str(&percent_encode(name, lowercase));
            query.push('=');
            query.push_str(&percent_encode(value, lowercase));
        }

        let separator = if destination.contains('?') { '&' } else { '?' };
        Ok(format!("{destination}{separator}{query}"))
    }
}
