//! Participant identity from bearer tokens
//!
//! Tokens are issued by the external authentication service and signed with
//! a shared HS256 secret. This side only verifies them.

use std::sync::Arc;

use jsonwebtoken::{decode, errors::ErrorKind, Algorithm, DecodingKey, TokenData, Validation};
use serde::{Deserialize, Serialize};

use crate::{config::AuthConfig, models::ParticipantId, Error, Result};

/// JWT claims structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Participant ID
    pub sub: String,
    /// Issued at (Unix timestamp)
    pub iat: i64,
    /// Expiration time (Unix timestamp)
    pub exp: i64,
}

impl Claims {
    #[must_use]
    pub fn participant_id(&self) -> ParticipantId {
        ParticipantId::from_string(self.sub.clone())
    }
}

/// JWT validator shared by the REST extractor and the signaling upgrade
#[derive(Clone)]
pub struct JwtValidator {
    decoding_key: Arc<DecodingKey>,
    leeway: u64,
    #[cfg(any(test, feature = "test-helpers"))]
    encoding_key: Arc<jsonwebtoken::EncodingKey>,
}

impl JwtValidator {
    pub fn new(config: &AuthConfig) -> Result<Self> {
        if config.jwt_secret.is_empty() {
            return Err(Error::Internal("auth.jwt_secret is empty".to_string()));
        }

        Ok(Self {
            decoding_key: Arc::new(DecodingKey::from_secret(config.jwt_secret.as_bytes())),
            leeway: config.leeway_seconds,
            #[cfg(any(test, feature = "test-helpers"))]
            encoding_key: Arc::new(jsonwebtoken::EncodingKey::from_secret(
                config.jwt_secret.as_bytes(),
            )),
        })
    }

    /// Extract bearer token from Authorization header value
    ///
    /// Supports both "Bearer <token>" and "bearer <token>" formats.
    pub fn extract_bearer_token(auth_value: &str) -> Result<&str> {
        auth_value
            .strip_prefix("Bearer ")
            .or_else(|| auth_value.strip_prefix("bearer "))
            .map(str::trim)
            .filter(|token| !token.is_empty())
            .ok_or_else(|| {
                Error::Authentication("Authorization header must start with 'Bearer '".to_string())
            })
    }

    /// Verify signature and expiry, returning the claims
    pub fn validate_token(&self, token: &str) -> Result<Claims> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = true;
        validation.validate_nbf = false;
        validation.leeway = self.leeway;
        validation.set_required_spec_claims(&["exp", "sub"]);

        let token_data: TokenData<Claims> = decode(token, &self.decoding_key, &validation)
            .map_err(|e| match e.kind() {
                ErrorKind::ExpiredSignature => Error::Authentication("Token expired".to_string()),
                ErrorKind::InvalidToken => Error::Authentication("Invalid token".to_string()),
                ErrorKind::InvalidSignature => {
                    Error::Authentication("Invalid token signature".to_string())
                }
                _ => Error::Authentication(format!("Token verification failed: {e}")),
            })?;

        if token_data.claims.sub.is_empty() {
            return Err(Error::Authentication("Token has no subject".to_string()));
        }

        Ok(token_data.claims)
    }

    pub fn validate_and_extract_participant(&self, token: &str) -> Result<ParticipantId> {
        Ok(self.validate_token(token)?.participant_id())
    }

    /// Validate an `Authorization` header value
    pub fn validate_http(&self, auth_header: &str) -> Result<ParticipantId> {
        let token = Self::extract_bearer_token(auth_header)?;
        self.validate_and_extract_participant(token)
    }

    /// Mint a token the way the authentication service would
    #[cfg(any(test, feature = "test-helpers"))]
    pub fn sign_for_testing(&self, participant: &ParticipantId, ttl: chrono::Duration) -> String {
        let now = chrono::Utc::now();
        let claims = Claims {
            sub: participant.as_str().to_string(),
            iat: now.timestamp(),
            exp: (now + ttl).timestamp(),
        };
        jsonwebtoken::encode(
            &jsonwebtoken::Header::new(Algorithm::HS256),
            &claims,
            &self.encoding_key,
        )
        .unwrap_or_default()
    }
}

impl std::fmt::Debug for JwtValidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwtValidator")
            .field("leeway", &self.leeway)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn validator(secret: &str) -> JwtValidator {
        JwtValidator::new(&AuthConfig {
            jwt_secret: secret.to_string(),
            leeway_seconds: 0,
        })
        .unwrap()
    }

    #[test]
    fn test_valid_token_yields_participant() {
        let v = validator("secret");
        let token = v.sign_for_testing(&ParticipantId::from("alice"), Duration::hours(1));

        let participant = v.validate_http(&format!("Bearer {token}")).unwrap();
        assert_eq!(participant.as_str(), "alice");
    }

    #[test]
    fn test_expired_token_is_rejected() {
        let v = validator("secret");
        let token = v.sign_for_testing(&ParticipantId::from("alice"), Duration::hours(-1));

        let err = v.validate_token(&token).unwrap_err();
        assert!(matches!(err, Error::Authentication(msg) if msg.contains("expired")));
    }

    #[test]
    fn test_foreign_signature_is_rejected() {
        let token = validator("other").sign_for_testing(&ParticipantId::from("eve"), Duration::hours(1));
        assert!(validator("secret").validate_token(&token).is_err());
    }

    #[test]
    fn test_extract_bearer_token() {
        assert_eq!(JwtValidator::extract_bearer_token("Bearer abc").unwrap(), "abc");
        assert_eq!(JwtValidator::extract_bearer_token("bearer abc").unwrap(), "abc");
        assert!(JwtValidator::extract_bearer_token("Basic abc").is_err());
        assert!(JwtValidator::extract_bearer_token("Bearer ").is_err());
    }

    #[test]
    fn test_empty_secret_is_rejected() {
        assert!(JwtValidator::new(&AuthConfig::default()).is_err());
    }
}
