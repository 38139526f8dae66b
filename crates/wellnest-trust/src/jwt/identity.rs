//! Sign in with Apple identity token validation

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use subtle::ConstantTimeEq;
use tracing::{debug, warn};

use super::claims::{ClaimError, Claims, FromClaims};
use super::decoder::{DecodeOptions, KeyResolver, SignedPayloadDecoder, UnverifiedToken};
use super::key_store::KeyStore;
use super::keys::SigningKey;
use crate::config::IdentityTokenConfig;
use crate::error::{AuthError, AuthResult};

/// Resolves the verification key from the header `kid` through a [`KeyStore`]
#[derive(Debug, Clone)]
pub struct KeyStoreResolver {
    key_store: Arc<KeyStore>,
}

impl KeyStoreResolver {
    /// Resolve keys from `key_store`
    pub fn new(key_store: Arc<KeyStore>) -> Self {
        Self { key_store }
    }
}

#[async_trait]
impl KeyResolver for KeyStoreResolver {
    async fn resolve(&self, token: &UnverifiedToken<'_>) -> AuthResult<SigningKey> {
        let kid = token.key_id().ok_or_else(|| {
            debug!("Token header has no kid");
            AuthError::PayloadMalformed
        })?;
        self.key_store.find_key_by_id(kid).await
    }
}

/// Verified identity of a signed-in user
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityClaims {
    /// Stable, app-scoped user id (`sub`)
    pub subject: String,
    /// Email, possibly a private relay address
    pub email: Option<String>,
    /// Whether the provider verified the email
    pub email_verified: Option<bool>,
    /// Whether `email` is a private relay address
    pub is_private_email: Option<bool>,
    /// Nonce echoed from the authorization request
    pub nonce: Option<String>,
    /// Issuance time (`iat`)
    pub issued_at: DateTime<Utc>,
    /// Expiry (`exp`)
    pub expires_at: DateTime<Utc>,
    /// Issuer (`iss`)
    pub issuer: String,
    /// Audience (`aud`), the client id the token was issued for
    pub audience: String,
}

impl IdentityClaims {
    /// Map claims, reporting as `audience` the first `aud` entry among
    /// `accepted` (any entry when `accepted` is empty)
    ///
    /// # Errors
    ///
    /// Returns a [`ClaimError`] for a missing or mistyped claim, or when no
    /// `aud` entry is accepted.
    pub fn from_claims_for(claims: &Claims, accepted: &[String]) -> Result<Self, ClaimError> {
        Ok(Self {
            subject: claims.required_str("sub")?.to_string(),
            email: claims.optional_string("email")?,
            email_verified: claims.optional_bool("email_verified")?,
            is_private_email: claims.optional_bool("is_private_email")?,
            nonce: claims.optional_string("nonce")?,
            issued_at: claims.required_timestamp("iat")?,
            expires_at: claims.required_timestamp("exp")?,
            issuer: claims.required_str("iss")?.to_string(),
            audience: claims.audience_in(accepted)?.to_string(),
        })
    }
}

impl FromClaims for IdentityClaims {
    fn from_claims(claims: &Claims) -> Result<Self, ClaimError> {
        Self::from_claims_for(claims, &[])
    }
}

/// Validates identity tokens issued by the provider
///
/// Every failure other than an unreachable key set is reported as
/// [`AuthError::TokenInvalid`]; the specific reason is logged.
#[derive(Debug, Clone)]
pub struct IdentityTokenValidator {
    resolver: KeyStoreResolver,
    decoder: SignedPayloadDecoder,
    audiences: Vec<String>,
}

impl IdentityTokenValidator {
    /// Create a validator for the configured issuer and client ids
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Configuration`] if no audience or no algorithm is
    /// configured.
    pub fn new(config: &IdentityTokenConfig, key_store: Arc<KeyStore>) -> AuthResult<Self> {
        if config.audiences.is_empty() {
            return Err(AuthError::config(
                "Identity token validation requires at least one client id",
            ));
        }
        if config.algorithms.is_empty() {
            return Err(AuthError::config(
                "Identity token validation requires at least one algorithm",
            ));
        }

        let mut options = DecodeOptions::identity_token(&config.issuer, config.audiences.clone());
        options.leeway = config.leeway;
        options.algorithms = config.algorithms.clone();

        Ok(Self {
            resolver: KeyStoreResolver::new(key_store),
            decoder: SignedPayloadDecoder::new(options),
            audiences: config.audiences.clone(),
        })
    }

    /// Validate an identity token
    ///
    /// # Errors
    ///
    /// - [`AuthError::UpstreamUnavailable`] if the key set cannot be fetched
    ///   and nothing is cached
    /// - [`AuthError::TokenInvalid`] for every other failure
    pub async fn validate(&self, token: &str) -> AuthResult<IdentityClaims> {
        let verified = self
            .decoder
            .decode_claims(token, &self.resolver)
            .await
            .and_then(|claims| {
                IdentityClaims::from_claims_for(&claims, &self.audiences).map_err(|e| {
                    debug!(error = %e, "Identity token claims rejected");
                    AuthError::PayloadMalformed
                })
            });

        match verified {
            Ok(claims) => {
                debug!(subject = %claims.subject, audience = %claims.audience, "Identity token validated");
                Ok(claims)
            }
            Err(AuthError::UpstreamUnavailable(reason)) => {
                Err(AuthError::UpstreamUnavailable(reason))
            }
            Err(e) => {
                warn!(reason = e.category(), "Identity token rejected");
                Err(AuthError::TokenInvalid)
            }
        }
    }

    /// Validate an identity token and require its nonce to equal `expected_nonce`
    ///
    /// # Errors
    ///
    /// As [`IdentityTokenValidator::validate`]; a missing or different nonce
    /// is [`AuthError::TokenInvalid`].
    pub async fn validate_with_nonce(
        &self,
        token: &str,
        expected_nonce: &str,
    ) -> AuthResult<IdentityClaims> {
        let claims = self.validate(token).await?;
        let matches = claims
            .nonce
            .as_deref()
            .is_some_and(|nonce| bool::from(nonce.as_bytes().ct_eq(expected_nonce.as_bytes())));

        if !matches {
            warn!(subject = %claims.subject, "Identity token nonce mismatch");
            return Err(AuthError::TokenInvalid);
        }
        Ok(claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn claims(value: serde_json::Value) -> Claims {
        match value {
            serde_json::Value::Object(map) => Claims::new(map),
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_identity_claims_mapping() {
        let mapped = IdentityClaims::from_claims(&claims(json!({
            "iss": "https://appleid.apple.com",
            "aud": "com.wellnest.app",
            "sub": "001234.abcdef",
            "iat": 1_700_000_000,
            "exp": 1_700_003_600,
            "email": "x7k2@privaterelay.appleid.com",
            "email_verified": "true",
            "is_private_email": true,
            "nonce": "n-0S6_WzA2Mj"
        })))
        .unwrap();

        assert_eq!(mapped.subject, "001234.abcdef");
        assert_eq!(mapped.email_verified, Some(true));
        assert_eq!(mapped.is_private_email, Some(true));
        assert_eq!(mapped.nonce.as_deref(), Some("n-0S6_WzA2Mj"));
        assert_eq!(mapped.audience, "com.wellnest.app");
        assert_eq!(mapped.expires_at.timestamp(), 1_700_003_600);
    }

    #[test]
    fn test_identity_claims_require_subject() {
        let err = IdentityClaims::from_claims(&claims(json!({
            "iss": "https://appleid.apple.com",
            "aud": "com.wellnest.app",
            "iat": 1_700_000_000,
            "exp": 1_700_003_600
        })))
        .unwrap_err();
        assert_eq!(err, ClaimError::Missing("sub".to_string()));
    }

    #[test]
    fn test_audience_chosen_from_accepted_client_ids() {
        let token_claims = claims(json!({
            "iss": "https://appleid.apple.com",
            "aud": ["com.someone.else", "com.wellnest.app"],
            "sub": "001234.abcdef",
            "iat": 1_700_000_000,
            "exp": 1_700_003_600
        }));

        let mapped =
            IdentityClaims::from_claims_for(&token_claims, &["com.wellnest.app".to_string()])
                .unwrap();
        assert_eq!(mapped.audience, "com.wellnest.app");

        assert!(
            IdentityClaims::from_claims_for(&token_claims, &["com.wellnest.watch".to_string()])
                .is_err()
        );
    }

    #[test]
    fn test_validator_requires_audience() {
        let config = IdentityTokenConfig {
            audiences: Vec::new(),
            ..IdentityTokenConfig::default()
        };
        let store = Arc::new(KeyStore::new(Arc::new(
            crate::jwt::key_store::StaticKeySource::default(),
        )));
        assert!(matches!(
            IdentityTokenValidator::new(&config, store),
            Err(AuthError::Configuration(_))
        ));
    }
}
