//! Hardened XML support: a small DOM, exclusive canonicalization, and the
//! structural schema pass.
//!
//! SAML validation needs to walk real element trees (signature-wrapping
//! defenses reason about *where* an element sits, not just that it exists),
//! so inbound messages are parsed into an owned DOM built on quick-xml
//! events. The parser refuses DTDs and undeclared entities outright.

pub mod c14n;
pub mod dom;
pub mod schema;

pub use dom::{Attribute, Document, Element, XmlNode};
