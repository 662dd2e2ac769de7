//! # sp-auth
//!
//! The SP-side session orchestrator: one [`Auth`] instance per browser
//! transaction, driving Single Sign-On and Single Logout against a
//! configured identity provider.
//!
//! ```rust,ignore
//! use sp_auth::{Auth, HttpParams, LoginOptions};
//!
//! let mut auth = Auth::new(settings)?;
//! let redirect = auth.login(&LoginOptions::default())?;
//! // ... browser returns from the IdP ...
//! auth.process_response(&post_params, auth.last_request_id())?;
//! assert!(auth.is_authenticated());
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod auth;
mod http;
mod session;

pub use auth::{Auth, LoginOptions, LogoutOptions, SloOptions};
pub use http::HttpParams;
pub use session::SessionData;
