//! Verification of signed App Store data
//!
//! Every payload is a compact JWS whose `x5c` header carries the signing
//! chain. The chain is validated against the pinned anchors (at the
//! payload's `signedDate` unless configured otherwise), the signature is
//! checked with the leaf key, and the decoded payload must name the
//! configured app and environment.

use std::sync::Arc;
use tracing::{debug, warn};
use wellnest_trust::{
    AuthError, AuthResult, CertChainValidator, DecodeOptions, FromClaims, SignedPayloadDecoder,
    X5cKeyResolver,
};

use crate::config::AppStoreConfig;
use crate::models::{
    DecodedNotification, Environment, NotificationPayload, RenewalInfo, TransactionInfo,
};

/// Verifies and decodes transactions, renewal info and server notifications
#[derive(Debug, Clone)]
pub struct SignedDataVerifier {
    resolver: X5cKeyResolver,
    decoder: SignedPayloadDecoder,
    config: AppStoreConfig,
}

impl SignedDataVerifier {
    /// Create a verifier bound to one app and environment
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Configuration`] if the bundle id is empty.
    pub fn new(chain_validator: Arc<CertChainValidator>, config: AppStoreConfig) -> AuthResult<Self> {
        if config.bundle_id.trim().is_empty() {
            return Err(AuthError::Configuration(
                "App Store bundle id must not be empty".to_string(),
            ));
        }

        Ok(Self {
            resolver: X5cKeyResolver::new(chain_validator, config.validation_time()),
            decoder: SignedPayloadDecoder::new(DecodeOptions::server_payload()),
            config,
        })
    }

    /// App binding in use
    pub fn config(&self) -> &AppStoreConfig {
        &self.config
    }

    /// Verify a signed transaction
    ///
    /// # Errors
    ///
    /// Chain and signature errors from the trust layer,
    /// [`AuthError::AppIdentifierMismatch`] for another bundle id and
    /// [`AuthError::EnvironmentMismatch`] for another environment.
    pub async fn verify_transaction(&self, signed: &str) -> AuthResult<TransactionInfo> {
        let transaction: TransactionInfo = self.decode(signed).await?;
        self.check_bundle_id(&transaction.bundle_id)?;
        self.check_environment(&transaction.environment)?;

        debug!(
            transaction_id = %transaction.transaction_id,
            product_id = %transaction.product_id,
            "Transaction verified"
        );
        Ok(transaction)
    }

    /// Verify signed subscription renewal info
    ///
    /// Renewal info carries no bundle id; only the environment is checked.
    ///
    /// # Errors
    ///
    /// Chain and signature errors from the trust layer, or
    /// [`AuthError::EnvironmentMismatch`].
    pub async fn verify_renewal_info(&self, signed: &str) -> AuthResult<RenewalInfo> {
        let renewal: RenewalInfo = self.decode(signed).await?;
        self.check_environment(&renewal.environment)?;

        debug!(
            original_transaction_id = %renewal.original_transaction_id,
            "Renewal info verified"
        );
        Ok(renewal)
    }

    /// Verify a signed server notification
    ///
    /// The nested signed transaction and renewal info are left as they
    /// are; see [`SignedDataVerifier::verify_notification_contents`].
    ///
    /// # Errors
    ///
    /// Chain and signature errors from the trust layer,
    /// [`AuthError::AppIdentifierMismatch`] for another bundle id (or
    /// another app Apple id in production), [`AuthError::EnvironmentMismatch`]
    /// for another environment, and [`AuthError::PayloadMalformed`] when the
    /// notification carries neither `data` nor `summary`.
    pub async fn verify_notification(&self, signed: &str) -> AuthResult<NotificationPayload> {
        let notification: NotificationPayload = self.decode(signed).await?;

        let Some((environment, bundle_id, app_apple_id)) = notification.app_binding() else {
            warn!(
                notification_uuid = %notification.notification_uuid,
                notification_type = %notification.notification_type,
                "Notification names no app"
            );
            return Err(AuthError::PayloadMalformed);
        };

        self.check_bundle_id(bundle_id)?;
        self.check_app_apple_id(environment, app_apple_id)?;
        self.check_environment(environment)?;

        debug!(
            notification_uuid = %notification.notification_uuid,
            notification_type = %notification.notification_type,
            "Notification verified"
        );
        Ok(notification)
    }

    /// Verify a notification together with its nested signed payloads
    ///
    /// # Errors
    ///
    /// Any error of [`SignedDataVerifier::verify_notification`], or of
    /// verifying the nested transaction or renewal info.
    pub async fn verify_notification_contents(&self, signed: &str) -> AuthResult<DecodedNotification> {
        let notification = self.verify_notification(signed).await?;

        let (transaction, renewal_info) = match &notification.data {
            Some(data) => {
                let transaction = match &data.signed_transaction_info {
                    Some(signed) => Some(self.verify_transaction(signed).await?),
                    None => None,
                };
                let renewal_info = match &data.signed_renewal_info {
                    Some(signed) => Some(self.verify_renewal_info(signed).await?),
                    None => None,
                };
                (transaction, renewal_info)
            }
            None => (None, None),
        };

        Ok(DecodedNotification {
            notification,
            transaction,
            renewal_info,
        })
    }

    async fn decode<T: FromClaims>(&self, signed: &str) -> AuthResult<T> {
        self.decoder.decode(signed, &self.resolver).await
    }

    fn check_bundle_id(&self, bundle_id: &str) -> AuthResult<()> {
        if bundle_id != self.config.bundle_id {
            warn!(
                expected = %self.config.bundle_id,
                actual = %bundle_id,
                "Signed payload bundle id mismatch"
            );
            return Err(AuthError::AppIdentifierMismatch);
        }
        Ok(())
    }

    fn check_app_apple_id(&self, environment: &Environment, app_apple_id: Option<i64>) -> AuthResult<()> {
        if *environment != Environment::Production {
            return Ok(());
        }
        match self.config.app_apple_id {
            Some(expected) if app_apple_id != Some(expected) => {
                warn!(expected, actual = ?app_apple_id, "Notification app Apple id mismatch");
                Err(AuthError::AppIdentifierMismatch)
            }
            _ => Ok(()),
        }
    }

    fn check_environment(&self, environment: &Environment) -> AuthResult<()> {
        if *environment != self.config.environment {
            warn!(
                expected = %self.config.environment,
                actual = %environment,
                "Signed payload environment mismatch"
            );
            return Err(AuthError::EnvironmentMismatch);
        }
        Ok(())
    }
}
