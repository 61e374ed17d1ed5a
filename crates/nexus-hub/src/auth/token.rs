//! Bearer token signing and verification

use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use nexus_core::error::AuthError;
use nexus_core::time::current_time_secs;

/// Token lifetime: 12 hours
pub const TOKEN_TTL_SECS: u64 = 12 * 60 * 60;

/// Claims carried by a bearer token
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// Principal name
    pub sub: String,
    /// Administrative flag
    pub admin: bool,
    /// Issued at, epoch seconds
    pub iat: u64,
    /// Expiry, epoch seconds
    pub exp: u64,
}

/// Signs and verifies bearer tokens with the process secret
#[derive(Clone)]
pub struct TokenSigner {
    encoding: EncodingKey,
    decoding: DecodingKey,
}

impl TokenSigner {
    /// Create a signer from the configured secret
    pub fn new(secret: &str) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
        }
    }

    /// Issue a token for the given principal
    pub fn issue(&self, principal: &str, admin: bool) -> Result<String, AuthError> {
        let now = current_time_secs();
        let claims = Claims {
            sub: principal.to_string(),
            admin,
            iat: now,
            exp: now + TOKEN_TTL_SECS,
        };
        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|_| AuthError::InvalidBearer)
    }

    /// Verify a token and return its claims
    pub fn verify(&self, token: &str) -> Result<Claims, AuthError> {
        let validation = Validation::new(Algorithm::HS256);
        decode::<Claims>(token, &self.decoding, &validation)
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => AuthError::ExpiredBearer,
                _ => AuthError::InvalidBearer,
            })
    }
}
