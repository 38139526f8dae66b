//! # Wellnest App Store
//!
//! Verified App Store data for the Wellnest backend: signed transactions,
//! subscription renewal info and App Store Server Notifications (version 2).
//!
//! Each payload is checked end to end before any field is trusted:
//!
//! 1. the `x5c` certificate chain is validated against the pinned Apple
//!    root through [`wellnest_trust::CertChainValidator`];
//! 2. the ES256 signature is verified with the chain's leaf key;
//! 3. the claims are mapped onto a typed model;
//! 4. the bundle id, environment and (for production notifications) app
//!    Apple id must match [`AppStoreConfig`].
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use wellnest_appstore::{AppStoreConfig, Environment, SignedDataVerifier};
//! use wellnest_trust::{AuthResult, CertChainValidator, ChainPolicy, TrustAnchor};
//!
//! # async fn example(signed_notification: &str) -> AuthResult<()> {
//! let anchors = TrustAnchor::load_all(&["certs/AppleRootCA-G3.cer"])?;
//! let chain = Arc::new(CertChainValidator::new(anchors, ChainPolicy::apple())?);
//!
//! let verifier = SignedDataVerifier::new(
//!     chain,
//!     AppStoreConfig::new("com.wellnest.app").with_environment(Environment::Sandbox),
//! )?;
//!
//! let decoded = verifier.verify_notification_contents(signed_notification).await?;
//! if let Some(transaction) = decoded.transaction {
//!     println!("{} renewed until {:?}", transaction.product_id, transaction.expires_date);
//! }
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod models;
pub mod verifier;

#[doc(inline)]
pub use config::AppStoreConfig;
#[doc(inline)]
pub use models::{
    AutoRenewStatus, DecodedNotification, Environment, ExpirationIntent, NotificationData,
    NotificationPayload, NotificationSummary, NotificationType, OfferType, OwnershipType,
    RenewalInfo, RevocationReason, Subtype, SubscriptionStatus, TransactionInfo,
    TransactionReason, TransactionType,
};
#[doc(inline)]
pub use verifier::SignedDataVerifier;
#[doc(inline)]
pub use wellnest_trust::{AuthError, AuthResult};
