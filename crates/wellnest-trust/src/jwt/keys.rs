//! Public signing key descriptors
//!
//! A [`SigningKey`] is produced either from a provider's published JWK set or
//! from the leaf certificate of a validated chain, and converted into a
//! `jsonwebtoken` [`DecodingKey`] when a signature has to be checked.

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use jsonwebtoken::jwk::{AlgorithmParameters, EllipticCurve, Jwk, KeyAlgorithm, PublicKeyUse};
use jsonwebtoken::{Algorithm, DecodingKey};
use std::str::FromStr;
use thiserror::Error;
use tracing::debug;

use crate::error::{AuthError, AuthResult};

/// Errors converting a published JWK into a [`SigningKey`]
#[derive(Debug, Error)]
pub enum JwkError {
    /// A parameter required for this key type is absent
    #[error("JWK is missing the '{0}' parameter")]
    MissingParameter(&'static str),

    /// Key type other than RSA or EC
    #[error("Unsupported key type: {0}")]
    UnsupportedKeyType(&'static str),

    /// Curve other than P-256 or P-384
    #[error("Unsupported curve: {0:?}")]
    UnsupportedCurve(EllipticCurve),

    /// Coordinate length does not match the curve
    #[error("Invalid EC coordinates for {curve}: x={x} bytes, y={y} bytes")]
    InvalidCoordinates {
        /// Curve name
        curve: &'static str,
        /// Length of x
        x: usize,
        /// Length of y
        y: usize,
    },

    /// base64url decoding of a key parameter failed
    #[error("Base64 decode error: {0}")]
    Base64(#[from] base64::DecodeError),
}

/// Key family
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyType {
    /// RSA public key
    Rsa,
    /// Elliptic-curve public key
    Ec,
}

/// Supported elliptic curves
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EcCurve {
    /// NIST P-256
    P256,
    /// NIST P-384
    P384,
}

impl EcCurve {
    /// JWK `crv` name
    pub fn name(self) -> &'static str {
        match self {
            EcCurve::P256 => "P-256",
            EcCurve::P384 => "P-384",
        }
    }

    /// Byte length of one affine coordinate
    pub fn coordinate_len(self) -> usize {
        match self {
            EcCurve::P256 => 32,
            EcCurve::P384 => 48,
        }
    }

    fn from_jwk(curve: &EllipticCurve) -> Result<Self, JwkError> {
        match curve {
            EllipticCurve::P256 => Ok(EcCurve::P256),
            EllipticCurve::P384 => Ok(EcCurve::P384),
            other => Err(JwkError::UnsupportedCurve(other.clone())),
        }
    }

    fn algorithm(self) -> Algorithm {
        match self {
            EcCurve::P256 => Algorithm::ES256,
            EcCurve::P384 => Algorithm::ES384,
        }
    }
}

/// Raw public key material
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyMaterial {
    /// RSA modulus and exponent, big-endian unsigned
    Rsa {
        /// Modulus
        modulus: Vec<u8>,
        /// Public exponent
        exponent: Vec<u8>,
    },
    /// EC affine coordinates, big-endian
    Ec {
        /// Curve
        curve: EcCurve,
        /// x coordinate
        x: Vec<u8>,
        /// y coordinate
        y: Vec<u8>,
    },
}

/// Public signing key descriptor
///
/// Immutable once constructed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SigningKey {
    key_id: String,
    usage: PublicKeyUse,
    algorithm: Option<KeyAlgorithm>,
    material: KeyMaterial,
}

impl SigningKey {
    /// RSA key from big-endian modulus and exponent
    pub fn rsa(key_id: impl Into<String>, modulus: &[u8], exponent: &[u8]) -> Self {
        Self {
            key_id: key_id.into(),
            usage: PublicKeyUse::Signature,
            algorithm: None,
            material: KeyMaterial::Rsa {
                modulus: strip_leading_zeros(modulus).to_vec(),
                exponent: strip_leading_zeros(exponent).to_vec(),
            },
        }
    }

    /// EC key from affine coordinates
    ///
    /// # Errors
    ///
    /// Returns [`JwkError::InvalidCoordinates`] when a coordinate does not
    /// have the curve's length.
    pub fn ec(
        key_id: impl Into<String>,
        curve: EcCurve,
        x: &[u8],
        y: &[u8],
    ) -> Result<Self, JwkError> {
        if x.len() != curve.coordinate_len() || y.len() != curve.coordinate_len() {
            return Err(JwkError::InvalidCoordinates {
                curve: curve.name(),
                x: x.len(),
                y: y.len(),
            });
        }
        Ok(Self {
            key_id: key_id.into(),
            usage: PublicKeyUse::Signature,
            algorithm: None,
            material: KeyMaterial::Ec {
                curve,
                x: x.to_vec(),
                y: y.to_vec(),
            },
        })
    }

    /// Build a key from a published JWK
    ///
    /// # Errors
    ///
    /// Returns a [`JwkError`] if the key has no `kid`, an unsupported type or
    /// curve, or undecodable parameters.
    pub fn from_jwk(jwk: &Jwk) -> Result<Self, JwkError> {
        let kid = jwk
            .common
            .key_id
            .as_deref()
            .ok_or(JwkError::MissingParameter("kid"))?;

        let key = match &jwk.algorithm {
            AlgorithmParameters::RSA(rsa) => Self::rsa(
                kid,
                &URL_SAFE_NO_PAD.decode(&rsa.n)?,
                &URL_SAFE_NO_PAD.decode(&rsa.e)?,
            ),
            AlgorithmParameters::EllipticCurve(ec) => Self::ec(
                kid,
                EcCurve::from_jwk(&ec.curve)?,
                &URL_SAFE_NO_PAD.decode(&ec.x)?,
                &URL_SAFE_NO_PAD.decode(&ec.y)?,
            )?,
            AlgorithmParameters::OctetKey(_) => return Err(JwkError::UnsupportedKeyType("oct")),
            AlgorithmParameters::OctetKeyPair(_) => {
                return Err(JwkError::UnsupportedKeyType("OKP"));
            }
        };

        Ok(Self {
            usage: jwk
                .common
                .public_key_use
                .clone()
                .unwrap_or(PublicKeyUse::Signature),
            algorithm: jwk.common.key_algorithm,
            ..key
        })
    }

    /// Declare the algorithm this key is published for
    pub fn with_algorithm(mut self, algorithm: KeyAlgorithm) -> Self {
        self.algorithm = Some(algorithm);
        self
    }

    /// Key id (`kid`)
    pub fn key_id(&self) -> &str {
        &self.key_id
    }

    /// Key family
    pub fn key_type(&self) -> KeyType {
        match self.material {
            KeyMaterial::Rsa { .. } => KeyType::Rsa,
            KeyMaterial::Ec { .. } => KeyType::Ec,
        }
    }

    /// Declared use
    pub fn usage(&self) -> &PublicKeyUse {
        &self.usage
    }

    /// Declared algorithm, if the publisher named one
    pub fn algorithm(&self) -> Option<KeyAlgorithm> {
        self.algorithm
    }

    /// Raw key material
    pub fn material(&self) -> &KeyMaterial {
        &self.material
    }

    /// RSA modulus, if this is an RSA key
    pub fn modulus(&self) -> Option<&[u8]> {
        match &self.material {
            KeyMaterial::Rsa { modulus, .. } => Some(modulus),
            KeyMaterial::Ec { .. } => None,
        }
    }

    /// RSA exponent, if this is an RSA key
    pub fn exponent(&self) -> Option<&[u8]> {
        match &self.material {
            KeyMaterial::Rsa { exponent, .. } => Some(exponent),
            KeyMaterial::Ec { .. } => None,
        }
    }

    /// Whether a token signed with `algorithm` may be verified by this key
    ///
    /// The algorithm must belong to the key's family (and curve), match the
    /// declared `alg` when one was published, and the key must be a
    /// signature key.
    pub fn permits(&self, algorithm: Algorithm) -> bool {
        if self.usage != PublicKeyUse::Signature {
            return false;
        }

        // Key-management algorithms (RSA-OAEP, ...) never parse as a signing one.
        if let Some(declared) = self.algorithm
            && Algorithm::from_str(&declared.to_string()).ok() != Some(algorithm)
        {
            return false;
        }

        match &self.material {
            KeyMaterial::Rsa { .. } => matches!(
                algorithm,
                Algorithm::RS256
                    | Algorithm::RS384
                    | Algorithm::RS512
                    | Algorithm::PS256
                    | Algorithm::PS384
                    | Algorithm::PS512
            ),
            KeyMaterial::Ec { curve, .. } => curve.algorithm() == algorithm,
        }
    }

    /// Native verification key
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::SignatureInvalid`] if the EC coordinates do not
    /// describe a usable key.
    pub fn decoding_key(&self) -> AuthResult<DecodingKey> {
        match &self.material {
            KeyMaterial::Rsa { modulus, exponent } => {
                Ok(DecodingKey::from_rsa_raw_components(modulus, exponent))
            }
            KeyMaterial::Ec { x, y, .. } => DecodingKey::from_ec_components(
                &URL_SAFE_NO_PAD.encode(x),
                &URL_SAFE_NO_PAD.encode(y),
            )
            .map_err(|e| {
                debug!(kid = %self.key_id, error = %e, "Failed to build EC decoding key");
                AuthError::SignatureInvalid
            }),
        }
    }
}

fn strip_leading_zeros(bytes: &[u8]) -> &[u8] {
    let start = bytes
        .iter()
        .position(|b| *b != 0)
        .unwrap_or(bytes.len().saturating_sub(1));
    &bytes[start..]
}
