use thiserror::Error;

#[derive(Error, Debug)]
pub enum TokenError {
    #[error("Malformed access token")]
    Malformed,

    #[error("Access token expired")]
    Expired,

    #[error("Access token signature does not verify")]
    BadSignature,

    #[error("Invalid token issuer key")]
    InvalidIssuerKey,
}

#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Malformed frame: {0}")]
    Json(#[from] serde_json::Error),
}
