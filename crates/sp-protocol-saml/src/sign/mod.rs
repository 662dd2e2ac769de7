//! Signature engine.
//!
//! Two disjoint schemes, per the SAML 2.0 bindings:
//!
//! - [`query`] - detached signatures over the Redirect-binding query string
//! - [`xmldsig`] - enveloped XML-DSig signatures for POST-carried messages
//!
//! A query signature never vouches for an embedded one or vice versa; the
//! validators request exactly the scheme the binding mandates.

pub mod query;
pub mod xmldsig;

pub use query::{build_signed_query, percent_encode, sign_query, verify_query};
pub use xmldsig::{sign_xml, verify_enveloped, TrustAnchors, VerifiedSignature};
