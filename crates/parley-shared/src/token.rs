//! Access tokens presented by clients when opening a connection.
//!
//! Tokens are minted by the account service (out of scope here) and signed
//! with its Ed25519 key. The server only holds the matching public key.
//! On the wire a token is `base64url(json(AccessToken))`.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Utc};
use ed25519_dalek::{Signature, Verifier, VerifyingKey};
use serde::{Deserialize, Serialize};

use crate::error::TokenError;
use crate::types::UserId;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessToken {
    pub user_id: UserId,
    pub valid_until: DateTime<Utc>,
    pub signature: Vec<u8>,
}

impl AccessToken {
    /// Encode for transport in a query string or `Authorization` header.
    pub fn encode(&self) -> String {
        // Serializing plain data into a Vec cannot fail.
        let json = serde_json::to_vec(self).unwrap_or_default();
        URL_SAFE_NO_PAD.encode(json)
    }

    pub fn decode(raw: &str) -> Result<Self, TokenError> {
        let bytes = URL_SAFE_NO_PAD
            .decode(raw.trim())
            .map_err(|_| TokenError::Malformed)?;
        serde_json::from_slice(&bytes).map_err(|_| TokenError::Malformed)
    }

    /// Check expiry and signature against the issuer key.
    pub fn verify_with_key(&self, issuer_pubkey: &[u8; 32]) -> Result<UserId, TokenError> {
        if Utc::now() > self.valid_until {
            return Err(TokenError::Expired);
        }

        let verifying_key =
            VerifyingKey::from_bytes(issuer_pubkey).map_err(|_| TokenError::InvalidIssuerKey)?;

        let signature =
            Signature::from_slice(&self.signature).map_err(|_| TokenError::BadSignature)?;

        verifying_key
            .verify(&signing_payload(&self.user_id, &self.valid_until), &signature)
            .map_err(|_| TokenError::BadSignature)?;

        Ok(self.user_id)
    }
}

// payload = user_id bytes || valid_until (rfc3339)
fn signing_payload(user_id: &UserId, valid_until: &DateTime<Utc>) -> Vec<u8> {
    let mut payload = Vec::new();
    payload.extend_from_slice(user_id.0.as_bytes());
    payload.extend_from_slice(valid_until.to_rfc3339().as_bytes());
    payload
}

pub fn create_access_token(
    user_id: UserId,
    valid_until: DateTime<Utc>,
    issuer_signing_key: &ed25519_dalek::SigningKey,
) -> AccessToken {
    use ed25519_dalek::Signer;

    let signature = issuer_signing_key.sign(&signing_payload(&user_id, &valid_until));

    AccessToken {
        user_id,
        valid_until,
        signature: signature.to_bytes().to_vec(),
    }
}

/// Parse a 64-character hex string into a 32-byte public key.
pub fn parse_hex_pubkey(hex_str: &str) -> Result<[u8; 32], TokenError> {
    let bytes = hex::decode(hex_str.trim()).map_err(|_| TokenError::InvalidIssuerKey)?;
    bytes.try_into().map_err(|_| TokenError::InvalidIssuerKey)
}
