//! # sp-core
//!
//! Shared foundation for the SAML 2.0 service-provider toolkit: the frozen
//! [`Settings`] view consumed by every other crate, the stable error
//! vocabulary ([`ErrorKind`] / [`SpError`]), and the injectable [`Clock`]
//! used by all temporal checks.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod clock;
pub mod error;
pub mod settings;

pub use clock::{Clock, FixedClock, SystemClock};
pub use error::{ErrorKind, SpError, SpResult};
pub use settings::{
    CompressionSettings, ContactPerson, IdpSettings, Organization, SecuritySettings, Settings,
    SpSettings,
};
