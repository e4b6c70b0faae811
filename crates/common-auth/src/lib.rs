//! Authentication primitives shared by the infographics services.
//!
//! - [`password`]: salted SHA-256 digests (`"<salt_hex>$<digest_hex>"`).
//! - [`store`]: the read-only username to digest map.
//! - [`token`]: bearer token issuance and verification.

pub mod password;
pub mod store;
pub mod token;

pub use password::{hash_password, verify_password, DigestError};
pub use store::{AuthOutcome, CredentialStore, StoreError};
pub use token::{
    InsecureDemoTokens, IssuedToken, SignedTokens, TokenError, TokenService, MIN_SECRET_BYTES,
};
