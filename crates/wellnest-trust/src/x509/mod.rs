//! X.509 trust: pinned anchors, chain validation, and key resolution from
//! an `x5c` header

pub mod anchor;
pub mod chain;

pub use anchor::TrustAnchor;
pub use chain::{
    APPLE_INTERMEDIATE_MARKER_OID, APPLE_LEAF_MARKER_OID, CertChainValidator, ChainPolicy,
    DEFAULT_MAX_CHAIN_DEPTH, RevocationMode,
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::debug;

use crate::error::{AuthError, AuthResult};
use crate::jwt::{KeyResolver, SigningKey, UnverifiedToken};

/// Instant at which certificate validity is evaluated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ValidationTime {
    /// The wall clock at validation
    #[default]
    Now,
    /// A fixed instant
    At(DateTime<Utc>),
    /// The payload's own `signedDate` claim (milliseconds), falling back to
    /// the wall clock when absent
    SignedDate,
}

/// Resolves the verification key by validating the token's `x5c` chain
#[derive(Debug, Clone)]
pub struct X5cKeyResolver {
    validator: Arc<CertChainValidator>,
    time: ValidationTime,
}

impl X5cKeyResolver {
    /// Resolve keys through `validator`, evaluating validity at `time`
    pub fn new(validator: Arc<CertChainValidator>, time: ValidationTime) -> Self {
        Self { validator, time }
    }

    fn instant(&self, token: &UnverifiedToken<'_>) -> AuthResult<DateTime<Utc>> {
        match self.time {
            ValidationTime::Now => Ok(Utc::now()),
            ValidationTime::At(at) => Ok(at),
            ValidationTime::SignedDate => {
                let signed = token
                    .unverified_claims()?
                    .optional_millis("signedDate")
                    .map_err(|e| {
                        debug!(error = %e, "Unusable signedDate claim");
                        AuthError::PayloadMalformed
                    })?;
                Ok(signed.unwrap_or_else(Utc::now))
            }
        }
    }
}

#[async_trait]
impl KeyResolver for X5cKeyResolver {
    async fn resolve(&self, token: &UnverifiedToken<'_>) -> AuthResult<SigningKey> {
        let chain = match token.header().x5c.as_deref() {
            Some(chain) if !chain.is_empty() => chain,
            _ => {
                debug!("Token header has no x5c chain");
                return Err(AuthError::MissingCertificateChain);
            }
        };
        let at = self.instant(token)?;
        self.validator.validate_at(chain, at)
    }
}
