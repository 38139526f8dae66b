//! Error taxonomy for the trust layer
//!
//! Every cryptographic or parsing failure is collapsed into one of the coarse
//! kinds below at the verification boundary. The precise cause is logged with
//! `tracing` where it happens and is never carried in the returned error, so a
//! caller relaying these errors cannot be used as a verification oracle.

use thiserror::Error;

/// Result type for trust operations
pub type AuthResult<T> = Result<T, AuthError>;

/// Trust-layer errors
///
/// # Non-exhaustive
///
/// New variants may be added without a semver-breaking change; match
/// expressions must include a wildcard arm.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum AuthError {
    /// Identity token is malformed or could not be verified
    #[error("Identity token is invalid")]
    TokenInvalid,

    /// No signing key with this id is present in the provider's key set
    #[error("Signing key not found: {kid}")]
    KeyNotFound {
        /// The key id that was looked up
        kid: String,
    },

    /// Provider key set (or another provider endpoint) could not be reached
    #[error("Identity provider unavailable: {0}")]
    UpstreamUnavailable(String),

    /// Certificate chain is broken, expired or not rooted in a trust anchor
    #[error("Certificate chain is invalid")]
    CertificateChainInvalid,

    /// Signed payload carries no `x5c` certificate chain
    #[error("Signed payload has no certificate chain")]
    MissingCertificateChain,

    /// Signature, algorithm or registered-claim validation failed
    #[error("Signature verification failed")]
    SignatureInvalid,

    /// Token structure or claims could not be mapped onto the requested type
    #[error("Signed payload is malformed")]
    PayloadMalformed,

    /// Payload was issued for a different application
    #[error("Signed payload was issued for a different application")]
    AppIdentifierMismatch,

    /// Payload was issued for a different environment
    #[error("Signed payload was issued for a different environment")]
    EnvironmentMismatch,

    /// Identity provider answered a server-to-server call with an error
    #[error("Identity provider rejected the request ({status}): {error}")]
    ProviderRejected {
        /// HTTP status returned by the provider
        status: u16,
        /// Provider error code (e.g. `invalid_grant`)
        error: String,
    },

    /// Startup configuration is invalid (fatal)
    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl AuthError {
    /// Whether the caller may retry the surrounding request later
    pub fn is_retryable(&self) -> bool {
        match self {
            AuthError::UpstreamUnavailable(_) => true,
            AuthError::ProviderRejected { status, .. } => *status >= 500,
            _ => false,
        }
    }

    /// HTTP status a request handler should answer with
    pub fn http_status(&self) -> u16 {
        match self {
            AuthError::TokenInvalid
            | AuthError::SignatureInvalid
            | AuthError::PayloadMalformed
            | AuthError::MissingCertificateChain
            | AuthError::CertificateChainInvalid
            | AuthError::AppIdentifierMismatch
            | AuthError::EnvironmentMismatch => 400,
            AuthError::ProviderRejected { status, .. } if *status < 500 => 400,
            AuthError::UpstreamUnavailable(_) | AuthError::ProviderRejected { .. } => 503,
            AuthError::KeyNotFound { .. } | AuthError::Configuration(_) => 500,
        }
    }

    /// Error category for metrics and logging
    pub fn category(&self) -> &'static str {
        match self {
            AuthError::TokenInvalid => "token_invalid",
            AuthError::KeyNotFound { .. } => "key_not_found",
            AuthError::UpstreamUnavailable(_) => "upstream_unavailable",
            AuthError::CertificateChainInvalid => "certificate_chain_invalid",
            AuthError::MissingCertificateChain => "missing_certificate_chain",
            AuthError::SignatureInvalid => "signature_invalid",
            AuthError::PayloadMalformed => "payload_malformed",
            AuthError::AppIdentifierMismatch => "app_identifier_mismatch",
            AuthError::EnvironmentMismatch => "environment_mismatch",
            AuthError::ProviderRejected { .. } => "provider_rejected",
            AuthError::Configuration(_) => "configuration",
        }
    }

    pub(crate) fn config(message: impl Into<String>) -> Self {
        AuthError::Configuration(message.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_categorization() {
        let upstream = AuthError::UpstreamUnavailable("connect timeout".to_string());
        assert!(upstream.is_retryable());
        assert_eq!(upstream.http_status(), 503);
        assert_eq!(upstream.category(), "upstream_unavailable");

        assert!(!AuthError::TokenInvalid.is_retryable());
        assert_eq!(AuthError::TokenInvalid.http_status(), 400);

        let rejected = AuthError::ProviderRejected {
            status: 400,
            error: "invalid_grant".to_string(),
        };
        assert!(!rejected.is_retryable());
        assert_eq!(rejected.http_status(), 400);

        let outage = AuthError::ProviderRejected {
            status: 502,
            error: "bad_gateway".to_string(),
        };
        assert!(outage.is_retryable());
        assert_eq!(outage.http_status(), 503);
    }

    #[test]
    fn test_error_display_hides_detail() {
        assert_eq!(AuthError::TokenInvalid.to_string(), "Identity token is invalid");
        assert_eq!(
            AuthError::CertificateChainInvalid.to_string(),
            "Certificate chain is invalid"
        );
        let missing = AuthError::KeyNotFound {
            kid: "abc".to_string(),
        };
        assert_eq!(missing.to_string(), "Signing key not found: abc");
    }
}
