//! Bearer token issuance and verification.
//!
//! [`SignedTokens`] is the default: an HS256 JWT carrying the username as
//! `sub` and an `exp` expiry. [`InsecureDemoTokens`] embeds the username in
//! plain text with no signature and exists only for throwaway demo deployments.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Minimum accepted length of a configured signing secret.
pub const MIN_SECRET_BYTES: usize = 32;

const DEMO_PREFIX: &str = "user_";
const DEMO_SUFFIX: &str = "_token";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TokenError {
    #[error("token is malformed")]
    Malformed,
    #[error("token signature is invalid")]
    BadSignature,
    #[error("token has expired")]
    Expired,
    #[error("username cannot be encoded in a token")]
    InvalidUsername,
    #[error("signing secret must be at least {MIN_SECRET_BYTES} bytes, got {0}")]
    WeakSecret(usize),
}

impl From<jsonwebtoken::errors::Error> for TokenError {
    fn from(error: jsonwebtoken::errors::Error) -> Self {
        match error.kind() {
            ErrorKind::ExpiredSignature => TokenError::Expired,
            ErrorKind::InvalidSignature => TokenError::BadSignature,
            _ => TokenError::Malformed,
        }
    }
}

/// A freshly issued token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuedToken {
    pub token: String,
    /// `None` for tokens that never expire.
    pub expires_in: Option<Duration>,
}

/// Turns a verified identity into a bearer credential and back.
pub trait TokenService: Send + Sync {
    fn issue(&self, username: &str) -> Result<IssuedToken, TokenError>;

    /// Recover the username a token was issued for.
    fn verify(&self, token: &str) -> Result<String, TokenError>;

    /// Short label used in logs.
    fn kind(&self) -> &'static str;
}

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    sub: String,
    iat: u64,
    exp: u64,
}

/// HS256 JWTs with `sub`, `iat` and `exp` claims.
#[derive(Clone)]
pub struct SignedTokens {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
    ttl: Duration,
}

impl std::fmt::Debug for SignedTokens {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignedTokens")
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

impl SignedTokens {
    pub fn new(secret: impl Into<Vec<u8>>, ttl: Duration) -> Result<Self, TokenError> {
        let secret = secret.into();
        if secret.len() < MIN_SECRET_BYTES {
            return Err(TokenError::WeakSecret(secret.len()));
        }
        Ok(Self::from_secret(&secret, ttl))
    }

    /// Use a random per-process secret. Tokens stop verifying on restart.
    pub fn with_random_secret(ttl: Duration) -> Self {
        let mut secret = [0u8; MIN_SECRET_BYTES];
        OsRng.fill_bytes(&mut secret);
        Self::from_secret(&secret, ttl)
    }

    fn from_secret(secret: &[u8], ttl: Duration) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp", "sub"]);
        Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
            validation,
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Issue a token as if the current time were `now` (Unix seconds).
    pub fn issue_at(&self, username: &str, now: u64) -> Result<IssuedToken, TokenError> {
        if username.is_empty() {
            return Err(TokenError::InvalidUsername);
        }

        let claims = Claims {
            sub: username.to_string(),
            iat: now,
            exp: now.saturating_add(self.ttl.as_secs()),
        };
        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|_| TokenError::InvalidUsername)?;

        Ok(IssuedToken {
            token,
            expires_in: Some(self.ttl),
        })
    }
}

impl TokenService for SignedTokens {
    fn issue(&self, username: &str) -> Result<IssuedToken, TokenError> {
        self.issue_at(username, unix_now())
    }

    fn verify(&self, token: &str) -> Result<String, TokenError> {
        let claims = decode::<Claims>(token, &self.decoding, &self.validation)?.claims;
        if claims.sub.is_empty() {
            return Err(TokenError::Malformed);
        }
        Ok(claims.sub)
    }

    fn kind(&self) -> &'static str {
        "signed"
    }
}

/// Unsigned `user_<name>_token` tokens.
///
/// Anyone can mint a token for any username by editing the string. There is
/// no expiry and nothing ties a token to this server.
#[derive(Debug, Clone, Copy, Default)]
pub struct InsecureDemoTokens;

impl TokenService for InsecureDemoTokens {
    fn issue(&self, username: &str) -> Result<IssuedToken, TokenError> {
        if username.is_empty() {
            return Err(TokenError::InvalidUsername);
        }
        Ok(IssuedToken {
            token: format!("{DEMO_PREFIX}{username}{DEMO_SUFFIX}"),
            expires_in: None,
        })
    }

    fn verify(&self, token: &str) -> Result<String, TokenError> {
        let username = token
            .strip_prefix(DEMO_PREFIX)
            .and_then(|rest| rest.strip_suffix(DEMO_SUFFIX))
            .ok_or(TokenError::Malformed)?;
        if username.is_empty() {
            return Err(TokenError::Malformed);
        }
        Ok(username.to_string())
    }

    fn kind(&self) -> &'static str {
        "insecure-demo"
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &[u8] = b"0123456789abcdef0123456789abcdef";

    fn signed() -> SignedTokens {
        SignedTokens::new(SECRET, Duration::from_secs(60)).expect("signer")
    }

    #[test]
    fn signed_token_recovers_username() {
        let tokens = signed();
        let issued = tokens.issue("alice").unwrap();
        assert_eq!(issued.expires_in, Some(Duration::from_secs(60)));
        assert_eq!(tokens.verify(&issued.token).unwrap(), "alice");
    }

    #[test]
    fn signed_token_expires() {
        let tokens = signed();
        let stale = tokens.issue_at("alice", unix_now() - 61).unwrap();
        assert_eq!(tokens.verify(&stale.token), Err(TokenError::Expired));

        let fresh = tokens.issue_at("alice", unix_now() - 30).unwrap();
        assert_eq!(tokens.verify(&fresh.token).unwrap(), "alice");
    }

    #[test]
    fn swapped_claims_fail_signature_check() {
        let tokens = signed();
        let alice = tokens.issue("alice").unwrap().token;
        let mallory = tokens.issue("mallory").unwrap().token;

        let alice_parts: Vec<&str> = alice.split('.').collect();
        let mallory_parts: Vec<&str> = mallory.split('.').collect();
        let forged = format!(
            "{}.{}.{}",
            alice_parts[0], mallory_parts[1], alice_parts[2]
        );
        assert_eq!(tokens.verify(&forged), Err(TokenError::BadSignature));
    }

    #[test]
    fn issues_standard_jwts() {
        let token = signed().issue("alice").unwrap().token;
        assert_eq!(token.split('.').count(), 3);

        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_required_spec_claims(&["exp", "sub"]);
        let decoded =
            decode::<Claims>(&token, &DecodingKey::from_secret(SECRET), &validation).unwrap();
        assert_eq!(decoded.claims.sub, "alice");
        assert_eq!(decoded.claims.exp - decoded.claims.iat, 60);
    }

    #[test]
    fn tokens_from_another_secret_are_rejected() {
        let other = SignedTokens::new(vec![7u8; 32], Duration::from_secs(60)).unwrap();
        let issued = other.issue("alice").unwrap();
        assert_eq!(signed().verify(&issued.token), Err(TokenError::BadSignature));
    }

    #[test]
    fn signed_verify_rejects_garbage() {
        let tokens = signed();
        for token in ["", "abc", "a.b.c", "!!!.???", "user_alice_token"] {
            assert!(tokens.verify(token).is_err(), "token {token:?}");
        }
    }

    #[test]
    fn short_secrets_are_refused() {
        assert_eq!(
            SignedTokens::new(b"short".to_vec(), Duration::from_secs(1)).unwrap_err(),
            TokenError::WeakSecret(5)
        );
    }

    #[test]
    fn random_secrets_differ() {
        let a = SignedTokens::with_random_secret(Duration::from_secs(60));
        let b = SignedTokens::with_random_secret(Duration::from_secs(60));
        let token = a.issue("alice").unwrap().token;
        assert!(b.verify(&token).is_err());
    }

    #[test]
    fn empty_usernames_are_not_issued() {
        assert_eq!(signed().issue(""), Err(TokenError::InvalidUsername));
        assert_eq!(InsecureDemoTokens.issue(""), Err(TokenError::InvalidUsername));
    }

    #[test]
    fn demo_token_round_trips_and_is_deterministic() {
        let first = InsecureDemoTokens.issue("alice").unwrap();
        let second = InsecureDemoTokens.issue("alice").unwrap();
        assert_eq!(first, second);
        assert_eq!(first.token, "user_alice_token");
        assert_eq!(first.expires_in, None);
        assert_eq!(InsecureDemoTokens.verify(&first.token).unwrap(), "alice");
    }

    #[test]
    fn demo_token_rejects_structural_mismatch() {
        for token in ["", "user_", "_token", "user__token", "alice", "user_alice", "alice_token"] {
            assert_eq!(
                InsecureDemoTokens.verify(token),
                Err(TokenError::Malformed),
                "token {token:?}"
            );
        }
    }

    #[test]
    fn demo_token_accepts_hand_edited_names() {
        assert_eq!(
            InsecureDemoTokens.verify("user_mallory_token").unwrap(),
            "mallory"
        );
    }
}
