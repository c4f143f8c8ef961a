//! Participant Authentication
//!
//! The engine takes participant identity from auth; it never manages
//! credentials. Tokens are JWTs issued by an external provider and only
//! validated here. The participant id is derived from the `sub` claim, so the
//! same account always maps to the same bets and ledger entries.

use std::collections::HashSet;

use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use crate::game::state::ParticipantId;

/// Authentication configuration.
#[derive(Clone, Debug, Default)]
pub struct AuthConfig {
    /// Required `iss` claim. Any issuer if `None`.
    pub issuer: Option<String>,
    /// Required `aud` claim. Not checked if `None`.
    pub audience: Option<String>,
    /// RS256 public key (PEM). Takes precedence over `secret`.
    pub public_key_pem: Option<String>,
    /// HS256 shared secret.
    pub secret: Option<String>,
    /// Accept any non-empty token as the subject itself. Development only.
    pub insecure_dev_mode: bool,
}

impl AuthConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let flag = |key: &str| {
            std::env::var(key)
                .map(|v| v == "true" || v == "1")
                .unwrap_or(false)
        };
        Self {
            issuer: std::env::var("AUTH_ISSUER").ok(),
            audience: std::env::var("AUTH_AUDIENCE").ok(),
            public_key_pem: std::env::var("AUTH_PUBLIC_KEY_PEM").ok(),
            secret: std::env::var("AUTH_SECRET").ok(),
            insecure_dev_mode: flag("AUTH_INSECURE_DEV"),
        }
    }

    /// Whether a verification key is configured.
    pub fn is_configured(&self) -> bool {
        self.public_key_pem.is_some() || self.secret.is_some()
    }
}

/// Claims read from provider tokens.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenClaims {
    /// Account id at the provider.
    pub sub: String,
    /// Expiry (Unix seconds). Zero when absent.
    #[serde(default)]
    pub exp: u64,
    /// Issued at (Unix seconds).
    #[serde(default)]
    pub iat: u64,
    /// Issuer.
    #[serde(default)]
    pub iss: Option<String>,
    /// Audience (string or array).
    #[serde(default)]
    pub aud: Option<serde_json::Value>,
}

/// An authenticated participant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    /// Engine-side id.
    pub participant_id: ParticipantId,
    /// Provider subject it was derived from.
    pub subject: String,
}

impl Identity {
    fn from_subject(subject: String) -> Self {
        Self {
            participant_id: ParticipantId::from_subject(&subject),
            subject,
        }
    }
}

/// Authentication errors.
#[derive(Debug, Error)]
pub enum AuthError {
    /// No verification key configured and dev mode off.
    #[error("authentication not configured")]
    NotConfigured,
    /// Malformed token.
    #[error("invalid token format")]
    InvalidFormat,
    /// Signature did not verify.
    #[error("invalid signature")]
    InvalidSignature,
    /// Token past its expiry.
    #[error("token expired")]
    Expired,
    /// Wrong issuer.
    #[error("invalid issuer")]
    InvalidIssuer,
    /// Wrong audience.
    #[error("invalid audience")]
    InvalidAudience,
    /// Required claim absent.
    #[error("missing required claim: {0}")]
    MissingClaim(&'static str),
    /// Any other decoding failure.
    #[error("decode error: {0}")]
    DecodeError(String),
}

/// Validates tokens into identities.
#[derive(Clone)]
pub struct Authenticator {
    config: AuthConfig,
    validation: Validation,
    key: Option<DecodingKey>,
}

impl Authenticator {
    /// Build from config, parsing the verification key once.
    pub fn new(config: AuthConfig) -> Result<Self, AuthError> {
        let (algorithm, key) = match (&config.public_key_pem, &config.secret) {
            (Some(pem), _) => {
                let key = DecodingKey::from_rsa_pem(pem.as_bytes())
                    .map_err(|e| AuthError::DecodeError(format!("invalid public key: {}", e)))?;
                (Algorithm::RS256, Some(key))
            }
            (None, Some(secret)) => (Algorithm::HS256, Some(DecodingKey::from_secret(secret.as_bytes()))),
            (None, None) => (Algorithm::HS256, None),
        };

        let mut validation = Validation::new(algorithm);
        validation.required_spec_claims = HashSet::new();
        if let Some(issuer) = &config.issuer {
            validation.set_issuer(&[issuer]);
        }
        match &config.audience {
            Some(audience) => validation.set_audience(&[audience]),
            None => validation.validate_aud = false,
        }

        if key.is_none() && config.insecure_dev_mode {
            warn!("Insecure dev auth enabled: tokens are trusted as subjects");
        }

        Ok(Self { config, validation, key })
    }

    /// Validate a token.
    pub fn authenticate(&self, token: &str) -> Result<Identity, AuthError> {
        match &self.key {
            Some(key) => {
                let claims = decode::<TokenClaims>(token, key, &self.validation)
                    .map_err(map_jwt_error)?
                    .claims;
                if claims.sub.is_empty() {
                    return Err(AuthError::MissingClaim("sub"));
                }
                Ok(Identity::from_subject(claims.sub))
            }
            None if self.config.insecure_dev_mode && !token.trim().is_empty() => {
                Ok(Identity::from_subject(token.trim().to_string()))
            }
            None => Err(AuthError::NotConfigured),
        }
    }
}

/// Map JWT library errors to our error type.
fn map_jwt_error(err: jsonwebtoken::errors::Error) -> AuthError {
    use jsonwebtoken::errors::ErrorKind;
    match err.kind() {
        ErrorKind::ExpiredSignature => AuthError::Expired,
        ErrorKind::InvalidSignature => AuthError::InvalidSignature,
        ErrorKind::InvalidIssuer => AuthError::InvalidIssuer,
        ErrorKind::InvalidAudience => AuthError::InvalidAudience,
        ErrorKind::InvalidToken | ErrorKind::Base64(_) => AuthError::InvalidFormat,
        _ => AuthError::DecodeError(err.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};
    use std::time::{SystemTime, UNIX_EPOCH};

    const SECRET: &str = "test-secret-key-256-bits-long!!";

    fn token(sub: &str, exp: u64, iss: &str) -> String {
        let claims = TokenClaims {
            sub: sub.into(),
            exp,
            iat: 0,
            iss: Some(iss.into()),
            aud: None,
        };
        encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(SECRET.as_bytes()),
        )
        .unwrap()
    }

    fn in_an_hour() -> u64 {
        SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_secs() + 3600
    }

    fn authenticator(config: AuthConfig) -> Authenticator {
        Authenticator::new(config).unwrap()
    }

    fn hs256() -> AuthConfig {
        AuthConfig {
            secret: Some(SECRET.into()),
            ..Default::default()
        }
    }

    #[test]
    fn test_valid_token() {
        let identity = authenticator(hs256())
            .authenticate(&token("user123", in_an_hour(), "idp"))
            .unwrap();
        assert_eq!(identity.subject, "user123");
        assert_eq!(identity.participant_id, ParticipantId::from_subject("user123"));
    }

    #[test]
    fn test_expired_token_rejected() {
        let result = authenticator(hs256()).authenticate(&token("user123", 1, "idp"));
        assert!(matches!(result, Err(AuthError::Expired)));
    }

    #[test]
    fn test_invalid_signature_rejected() {
        let config = AuthConfig {
            secret: Some("some-other-secret-entirely!!!".into()),
            ..Default::default()
        };
        let result = authenticator(config).authenticate(&token("user123", in_an_hour(), "idp"));
        assert!(matches!(result, Err(AuthError::InvalidSignature)));
    }

    #[test]
    fn test_missing_sub_rejected() {
        let result = authenticator(hs256()).authenticate(&token("", in_an_hour(), "idp"));
        assert!(matches!(result, Err(AuthError::MissingClaim("sub"))));
    }

    #[test]
    fn test_issuer_checked() {
        let config = AuthConfig {
            issuer: Some("expected".into()),
            ..hs256()
        };
        let result = authenticator(config).authenticate(&token("user123", in_an_hour(), "other"));
        assert!(matches!(result, Err(AuthError::InvalidIssuer)));
    }

    #[test]
    fn test_garbage_rejected() {
        let result = authenticator(hs256()).authenticate("not-a-jwt");
        assert!(matches!(result, Err(AuthError::InvalidFormat)));
    }

    #[test]
    fn test_not_configured() {
        let result = authenticator(AuthConfig::default()).authenticate("some.jwt.token");
        assert!(matches!(result, Err(AuthError::NotConfigured)));
    }

    #[test]
    fn test_insecure_dev_mode() {
        let config = AuthConfig {
            insecure_dev_mode: true,
            ..Default::default()
        };
        let auth = authenticator(config);
        let identity = auth.authenticate(" alice ").unwrap();
        assert_eq!(identity.subject, "alice");
        assert!(matches!(auth.authenticate("  "), Err(AuthError::NotConfigured)));
    }

    #[test]
    fn test_key_wins_over_dev_mode() {
        let config = AuthConfig {
            insecure_dev_mode: true,
            ..hs256()
        };
        assert!(authenticator(config).authenticate("alice").is_err());
    }
}
