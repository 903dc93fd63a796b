//! Client token decoding.
//!
//! Clients connect to `/ws/{token}` where `token` is an HS256 JWT whose
//! claims are a [`Token`]. Expiry is not required; tokens without `exp`
//! are accepted, tokens with an expired `exp` are rejected.

use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use tandem_core::Token;
use thiserror::Error;

/// Token could not be turned into an identity.
#[derive(Debug, Error)]
pub enum AuthError {
    /// Signature, encoding or claims are invalid.
    #[error("invalid token: {0}")]
    Invalid(#[from] jsonwebtoken::errors::Error),
    /// The token names no caller.
    #[error("token has an empty email")]
    EmptyEmail,
}

/// Verifies client tokens against the shared secret.
#[derive(Clone)]
pub struct TokenDecoder {
    key: DecodingKey,
    validation: Validation,
}

impl TokenDecoder {
    /// Decoder for tokens signed with `secret`.
    pub fn new(secret: &str) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.required_spec_claims.clear();
        Self {
            key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
        }
    }

    /// Verify `raw` and return the identity it carries.
    pub fn decode(&self, raw: &str) -> Result<Token, AuthError> {
        let data = jsonwebtoken::decode::<Token>(raw, &self.key, &self.validation)?;
        if data.claims.email.is_empty() {
            return Err(AuthError::EmptyEmail);
        }
        Ok(data.claims)
    }
}

impl std::fmt::Debug for TokenDecoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenDecoder").finish_non_exhaustive()
    }
}

/// Sign `token` with `secret` (HS256).
pub fn encode_token(token: &Token, secret: &str) -> Result<String, AuthError> {
    Ok(jsonwebtoken::encode(
        &Header::default(),
        token,
        &EncodingKey::from_secret(secret.as_bytes()),
    )?)
}
