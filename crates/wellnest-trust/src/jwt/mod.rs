//! JWT infrastructure shared by identity tokens and chain-signed payloads
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────┐
//! │        SignedPayloadDecoder          │
//! │  - header parsing                    │
//! │  - alg allow-list                    │
//! │  - signature + exp/iss/aud checks    │
//! │  - FromClaims mapping                │
//! └──────────────────────────────────────┘
//!          ▲                   ▲
//!          │ KeyResolver       │ KeyResolver
//!   ┌──────┴───────┐    ┌──────┴────────┐
//!   │ KeyStore     │    │ x5c chain     │
//!   │ (kid lookup) │    │ (pinned roots)│
//!   └──────────────┘    └───────────────┘
//! ```
//!
//! # Modules
//!
//! - `keys` - [`SigningKey`] and its conversion from published JWKs
//! - `key_store` - key set fetching and caching
//! - `claims` - explicit claim mapping
//! - `decoder` - verification pipeline
//! - `identity` - identity token validation
//! - `assertion` - client assertion signing

pub mod assertion;
pub mod claims;
pub mod decoder;
pub mod identity;
pub mod key_store;
pub mod keys;

pub use assertion::{
    CLIENT_ASSERTION_LIFETIME, ClientAssertion, ClientAssertionIssuer, decode_private_key,
};
pub use claims::{ClaimError, Claims, FromClaims};
pub use decoder::{DecodeOptions, KeyResolver, SignedPayloadDecoder, UnverifiedToken};
pub use identity::{IdentityClaims, IdentityTokenValidator, KeyStoreResolver};
pub use key_store::{HttpKeySource, KeySource, KeyStore, StaticKeySource};
pub use keys::{EcCurve, JwkError, KeyMaterial, KeyType, SigningKey};
