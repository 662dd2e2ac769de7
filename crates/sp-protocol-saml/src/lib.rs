//! # sp-protocol-saml
//!
//! SAML 2.0 Web Browser SSO protocol support for the service-provider side:
//!
//! - **Message builders** - AuthnRequest, LogoutRequest, LogoutResponse
//! - **Bindings** - HTTP-Redirect (DEFLATE + base64) and HTTP-POST (base64)
//! - **Signature engine** - detached query-string signatures for the
//!   Redirect binding and enveloped XML-DSig for the POST binding, with
//!   signature-wrapping defenses
//! - **XML Encryption** - EncryptedAssertion / EncryptedID handling
//! - **Validators** - the Response pipeline and the inbound logout pair
//!
//! The crate never touches HTTP: inputs are decoded parameter values and
//! outputs are XML strings or query-string fragments.
//!
//! # Specifications
//!
//! - [SAML 2.0 Core](https://docs.oasis-open.org/security/saml/v2.0/saml-core-2.0-os.pdf)
//! - [SAML 2.0 Bindings](https://docs.oasis-open.org/security/saml/v2.0/saml-bindings-2.0-os.pdf)
//! - [XML Signature](https://www.w3.org/TR/xmldsig-core1/)
//! - [XML Encryption](https://www.w3.org/TR/xmlenc-core1/)

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod bindings;
pub mod constants;
pub mod crypt;
pub mod instant;
pub mod messages;
pub mod sign;
pub mod validate;
pub mod xml;

pub use bindings::{HttpPostBinding, HttpRedirectBinding, SamlMessageType};
pub use constants::{NameIdFormat, SamlBinding};
pub use messages::{AuthnRequest, LogoutRequest, LogoutResponse, NameId};
pub use validate::{
    LogoutRequestValidator, LogoutResponseValidator, ResponseData, ResponseValidator,
};
