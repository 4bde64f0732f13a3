//! Machine credentials that authenticate as a policy type rather than a user.
//!
//! A token is valid iff it exists, belongs to the requested project and
//! `expires_at` is unset or later than now.

pub mod service;
pub mod store;

pub use service::{CredentialService, IssuedToken};
pub use store::{AuthToken, MemoryTokenStore, TokenStore};
