//! # Wellnest Trust - Apple identity and certificate trust
//!
//! Verification primitives for Sign in with Apple and App Store server
//! payloads, used by the Wellnest backend.
//!
//! ## Design Principles
//!
//! - **Coarse errors out, detail in logs**: every cryptographic failure maps
//!   to one [`AuthError`] kind; the cause is logged with `tracing`
//! - **No globals**: trust anchors and key caches live in explicitly
//!   constructed services shared by `Arc`
//! - **Typed payloads**: claims are mapped through [`FromClaims`], never
//!   reflectively
//!
//! ## Architecture
//!
//! - [`jwt`] - key sets, the signed payload decoder, identity tokens and
//!   client assertions
//! - [`x509`] - trust anchors, certificate chain validation, `x5c` key
//!   resolution
//! - [`apple_id`] - token exchange, refresh and revocation
//! - [`config`] - configuration structs and environment loading
//! - [`services`] - the startup bundle of all of the above
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use wellnest_trust::{TrustConfig, TrustServices};
//!
//! # async fn example(id_token: &str) -> Result<(), wellnest_trust::AuthError> {
//! let config = TrustConfig::from_env()?;
//! let services = TrustServices::from_config(&config)?;
//!
//! let claims = services.identity.validate(id_token).await?;
//! println!("signed in: {}", claims.subject);
//! # Ok(())
//! # }
//! ```

pub mod apple_id;
pub mod config;
pub mod error;
pub mod jwt;
pub mod services;
pub mod x509;

#[doc(inline)]
pub use apple_id::{AppleIdClient, TokenResponse, TokenTypeHint};
#[doc(inline)]
pub use config::{
    APPLE_ISSUER, APPLE_KEYS_URL, ChainTrustConfig, ClientAssertionConfig, IdentityTokenConfig,
    KeyStoreConfig, TrustConfig,
};
#[doc(inline)]
pub use error::{AuthError, AuthResult};
#[doc(inline)]
pub use jwt::{
    ClaimError, Claims, ClientAssertion, ClientAssertionIssuer, DecodeOptions, FromClaims,
    IdentityClaims, IdentityTokenValidator, KeyResolver, KeySource, KeyStore, KeyStoreResolver,
    SignedPayloadDecoder, SigningKey, UnverifiedToken,
};
#[doc(inline)]
pub use services::TrustServices;
#[doc(inline)]
pub use x509::{
    CertChainValidator, ChainPolicy, RevocationMode, TrustAnchor, ValidationTime, X5cKeyResolver,
};
