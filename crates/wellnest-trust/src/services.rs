//! Explicitly constructed trust service bundle

use std::sync::Arc;
use tracing::info;

use crate::apple_id::AppleIdClient;
use crate::config::TrustConfig;
use crate::error::AuthResult;
use crate::jwt::{ClientAssertionIssuer, IdentityTokenValidator, KeyStore};
use crate::x509::{CertChainValidator, TrustAnchor};

/// Every trust component, built once at startup and shared by `Arc`
#[derive(Debug, Clone)]
pub struct TrustServices {
    /// Provider key set cache
    pub key_store: Arc<KeyStore>,
    /// Identity token validation
    pub identity: Arc<IdentityTokenValidator>,
    /// Certificate chain validation against the pinned roots
    pub chain_validator: Arc<CertChainValidator>,
    /// Client assertion signing, when configured
    pub client_assertion: Option<Arc<ClientAssertionIssuer>>,
    /// Apple ID token endpoint client, when client assertions are configured
    pub apple_id: Option<Arc<AppleIdClient>>,
}

impl TrustServices {
    /// Build all services
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Configuration`](crate::AuthError::Configuration)
    /// if a root certificate cannot be loaded, the private key cannot be
    /// parsed, or any setting is invalid. These are fatal at startup.
    pub fn from_config(config: &TrustConfig) -> AuthResult<Self> {
        let anchors = TrustAnchor::load_all(&config.chain.root_certificates)?;
        let chain_validator = Arc::new(CertChainValidator::new(
            anchors,
            config.chain.policy.clone(),
        )?);

        let key_store = Arc::new(KeyStore::from_config(&config.key_store)?);
        let identity = Arc::new(IdentityTokenValidator::new(
            &config.identity,
            Arc::clone(&key_store),
        )?);

        let (client_assertion, apple_id) = match &config.client_assertion {
            Some(assertion_config) => {
                let issuer = Arc::new(ClientAssertionIssuer::new(assertion_config)?);
                let client = AppleIdClient::from_config(assertion_config, Arc::clone(&issuer))?;
                (Some(issuer), Some(Arc::new(client)))
            }
            None => (None, None),
        };

        info!(
            anchors = chain_validator.anchors().len(),
            audiences = ?config.identity.audiences,
            client_assertion = client_assertion.is_some(),
            "Trust services initialised"
        );

        Ok(Self {
            key_store,
            identity,
            chain_validator,
            client_assertion,
            apple_id,
        })
    }
}
