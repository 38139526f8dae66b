//! Signed payload decoding
//!
//! [`SignedPayloadDecoder`] is the single path every compact JWS takes:
//! parse the header, let a [`KeyResolver`] pick the verification key, check
//! the signature and registered claims with `jsonwebtoken`, then map the
//! claim set onto a fixed-shape type through [`FromClaims`].
//!
//! Failures are classified as:
//!
//! - [`AuthError::PayloadMalformed`]: not a three-segment token, undecodable
//!   header or payload, or claims that do not fit the target type
//! - [`AuthError::SignatureInvalid`]: disallowed algorithm, key/algorithm
//!   mismatch, bad signature, expired or wrong `iss`/`aud`
//! - anything the resolver returns is propagated unchanged

use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use jsonwebtoken::{Algorithm, Header, Validation, decode, decode_header, errors::ErrorKind};
use serde_json::{Map, Value};
use std::time::Duration;
use tracing::{debug, warn};

use super::claims::{Claims, FromClaims};
use super::keys::SigningKey;
use crate::error::{AuthError, AuthResult};

/// A compact JWS whose header has been parsed but whose signature has not
/// been checked yet
#[derive(Debug, Clone)]
pub struct UnverifiedToken<'a> {
    raw: &'a str,
    header: Header,
    payload: &'a str,
}

impl<'a> UnverifiedToken<'a> {
    /// Split a compact token and decode its header
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::PayloadMalformed`] if the token does not have
    /// exactly three segments or the header is not valid JSON.
    pub fn parse(raw: &'a str) -> AuthResult<Self> {
        let mut segments = raw.split('.');
        let (Some(_), Some(payload), Some(_), None) = (
            segments.next(),
            segments.next(),
            segments.next(),
            segments.next(),
        ) else {
            debug!("Token does not have three segments");
            return Err(AuthError::PayloadMalformed);
        };

        let header = decode_header(raw).map_err(|e| {
            debug!(error = %e, "Failed to decode token header");
            AuthError::PayloadMalformed
        })?;

        Ok(Self {
            raw,
            header,
            payload,
        })
    }

    /// Token as received
    pub fn as_str(&self) -> &'a str {
        self.raw
    }

    /// Decoded header
    pub fn header(&self) -> &Header {
        &self.header
    }

    /// Header `kid`
    pub fn key_id(&self) -> Option<&str> {
        self.header.kid.as_deref()
    }

    /// Header `alg`
    pub fn algorithm(&self) -> Algorithm {
        self.header.alg
    }

    /// Payload claims WITHOUT signature verification
    ///
    /// Only for deciding how to verify (e.g. picking a validation instant),
    /// never for trusting content.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::PayloadMalformed`] if the payload segment is not
    /// base64url-encoded JSON object.
    pub fn unverified_claims(&self) -> AuthResult<Claims> {
        let bytes = URL_SAFE_NO_PAD.decode(self.payload).map_err(|e| {
            debug!(error = %e, "Payload segment is not base64url");
            AuthError::PayloadMalformed
        })?;
        let map: Map<String, Value> = serde_json::from_slice(&bytes).map_err(|e| {
            debug!(error = %e, "Payload segment is not a JSON object");
            AuthError::PayloadMalformed
        })?;
        Ok(Claims::new(map))
    }
}

/// Chooses the key a token must be verified with
#[async_trait]
pub trait KeyResolver: Send + Sync {
    /// Resolve the verification key for `token`
    ///
    /// # Errors
    ///
    /// Implementation specific; errors are propagated by the decoder as-is.
    async fn resolve(&self, token: &UnverifiedToken<'_>) -> AuthResult<SigningKey>;
}

/// Verification rules applied by [`SignedPayloadDecoder`]
#[derive(Debug, Clone, PartialEq)]
pub struct DecodeOptions {
    /// Accepted `alg` values
    pub algorithms: Vec<Algorithm>,
    /// Required `iss`, if any
    pub issuer: Option<String>,
    /// Accepted `aud` values; empty disables the audience check
    pub audiences: Vec<String>,
    /// Clock skew tolerance for `exp`/`nbf`
    pub leeway: Duration,
    /// Check `exp`
    pub validate_exp: bool,
    /// Check `nbf`
    pub validate_nbf: bool,
    /// Registered claims that must be present (`exp`, `iss`, `aud`, `sub`, `nbf`)
    pub required_claims: Vec<String>,
}

impl DecodeOptions {
    /// Rules for provider identity tokens: RS256, issuer and audience pinned,
    /// `exp` enforced
    pub fn identity_token(issuer: impl Into<String>, audiences: Vec<String>) -> Self {
        Self {
            algorithms: vec![Algorithm::RS256],
            issuer: Some(issuer.into()),
            audiences,
            leeway: Duration::from_secs(60),
            validate_exp: true,
            validate_nbf: true,
            required_claims: ["exp", "iss", "aud", "sub"].map(String::from).to_vec(),
        }
    }

    /// Rules for chain-signed server payloads: ES256 only, no registered
    /// claims (freshness comes from the certificate chain)
    pub fn server_payload() -> Self {
        Self {
            algorithms: vec![Algorithm::ES256],
            issuer: None,
            audiences: Vec::new(),
            leeway: Duration::ZERO,
            validate_exp: false,
            validate_nbf: false,
            required_claims: Vec::new(),
        }
    }

    fn validation(&self, algorithm: Algorithm) -> Validation {
        let mut validation = Validation::new(algorithm);
        validation.leeway = self.leeway.as_secs();
        validation.validate_exp = self.validate_exp;
        validation.validate_nbf = self.validate_nbf;

        let required: Vec<&str> = self.required_claims.iter().map(String::as_str).collect();
        validation.set_required_spec_claims(&required);

        if let Some(issuer) = &self.issuer {
            validation.set_issuer(&[issuer]);
        }

        if self.audiences.is_empty() {
            validation.validate_aud = false;
        } else {
            validation.set_audience(&self.audiences);
        }

        validation
    }
}

/// Verifies compact JWS payloads and maps them onto typed results
#[derive(Debug, Clone)]
pub struct SignedPayloadDecoder {
    options: DecodeOptions,
}

impl SignedPayloadDecoder {
    /// Create a decoder with the given rules
    pub fn new(options: DecodeOptions) -> Self {
        Self { options }
    }

    /// Verification rules in use
    pub fn options(&self) -> &DecodeOptions {
        &self.options
    }

    /// Parse the header without verifying anything
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::PayloadMalformed`] for structurally invalid tokens.
    pub fn header(token: &str) -> AuthResult<Header> {
        UnverifiedToken::parse(token).map(|t| t.header)
    }

    /// Verify `token` and map its claims onto `T`
    ///
    /// # Errors
    ///
    /// See the module documentation for the classification.
    pub async fn decode<T: FromClaims>(
        &self,
        token: &str,
        resolver: &dyn KeyResolver,
    ) -> AuthResult<T> {
        let claims = self.decode_claims(token, resolver).await?;
        T::from_claims(&claims).map_err(|e| {
            warn!(error = %e, "Verified payload does not have the expected shape");
            AuthError::PayloadMalformed
        })
    }

    /// Verify `token` and return its raw claim set
    ///
    /// # Errors
    ///
    /// See the module documentation for the classification.
    pub async fn decode_claims(&self, token: &str, resolver: &dyn KeyResolver) -> AuthResult<Claims> {
        let parsed = UnverifiedToken::parse(token)?;
        let algorithm = parsed.algorithm();

        if !self.options.algorithms.contains(&algorithm) {
            warn!(
                algorithm = ?algorithm,
                allowed = ?self.options.algorithms,
                "Token algorithm not allowed"
            );
            return Err(AuthError::SignatureInvalid);
        }

        let key = resolver.resolve(&parsed).await?;
        if !key.permits(algorithm) {
            warn!(
                kid = %key.key_id(),
                algorithm = ?algorithm,
                "Resolved key does not permit the token algorithm"
            );
            return Err(AuthError::SignatureInvalid);
        }

        let decoding_key = key.decoding_key()?;
        let validation = self.options.validation(algorithm);

        let data = decode::<Map<String, Value>>(token, &decoding_key, &validation)
            .map_err(classify)?;

        debug!(kid = %key.key_id(), algorithm = ?algorithm, "Signed payload verified");
        Ok(Claims::new(data.claims))
    }
}

fn classify(error: jsonwebtoken::errors::Error) -> AuthError {
    match error.kind() {
        ErrorKind::InvalidToken | ErrorKind::Base64(_) | ErrorKind::Json(_) | ErrorKind::Utf8(_) => {
            debug!(error = %error, "Token could not be decoded");
            AuthError::PayloadMalformed
        }
        _ => {
            warn!(error = %error, "Signature or claim validation failed");
            AuthError::SignatureInvalid
        }
    }
}
