//! Auth session for the Altrinity sync client.
//!
//! Token issuance and validation belong to the identity provider. This crate
//! only keeps the tokens it is handed, persists them in the key-value store,
//! and decodes the access token's payload so callers can read the subject,
//! username, and realm roles.

mod claims;
mod error;
mod session;

pub use claims::{decode_claims, Claims, RealmAccess};
pub use error::{AuthError, AuthResult};
pub use session::AuthSession;
