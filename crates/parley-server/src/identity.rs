//! Identity resolution for incoming connections.
//!
//! The engine only needs "credential in, user id out"; how tokens are minted
//! is the account service's business. [`TokenResolver`] checks tokens signed
//! by that service's Ed25519 key.

use parley_shared::token::AccessToken;
use parley_shared::UserId;

use crate::error::AuthError;

/// Turns an opaque credential into a user identity.
pub trait IdentityResolver: Send + Sync {
    fn resolve(&self, credential: &str) -> Result<UserId, AuthError>;
}

/// Verifies [`AccessToken`]s against the issuer's public key.
#[derive(Debug, Clone)]
pub struct TokenResolver {
    issuer_pubkey: [u8; 32],
}

impl TokenResolver {
    pub fn new(issuer_pubkey: [u8; 32]) -> Self {
        Self { issuer_pubkey }
    }
}

impl IdentityResolver for TokenResolver {
    fn resolve(&self, credential: &str) -> Result<UserId, AuthError> {
        let token = AccessToken::decode(credential)?;
        Ok(token.verify_with_key(&self.issuer_pubkey)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use ed25519_dalek::SigningKey;
    use parley_shared::token::create_access_token;
    use parley_shared::TokenError;
    use rand::rngs::OsRng;

    #[test]
    fn test_resolves_signed_token() {
        let issuer = SigningKey::generate(&mut OsRng);
        let resolver = TokenResolver::new(issuer.verifying_key().to_bytes());
        let user = UserId::new();

        let token = create_access_token(user, Utc::now() + Duration::hours(1), &issuer);
        assert_eq!(resolver.resolve(&token.encode()).unwrap(), user);
    }

    #[test]
    fn test_dev_key_rejects_everything() {
        let issuer = SigningKey::generate(&mut OsRng);
        let resolver = TokenResolver::new([0u8; 32]);

        let token = create_access_token(UserId::new(), Utc::now() + Duration::hours(1), &issuer);
        assert!(resolver.resolve(&token.encode()).is_err());
    }

    #[test]
    fn test_garbage_credential() {
        let resolver = TokenResolver::new([0u8; 32]);
        assert!(matches!(
            resolver.resolve("garbage"),
            Err(AuthError::Token(TokenError::Malformed))
        ));
    }
}
