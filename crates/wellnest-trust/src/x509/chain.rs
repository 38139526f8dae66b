//! Certificate chain validation against pinned roots
//!
//! A chain is ordered leaf first. Each certificate must be within its
//! validity window at the validation instant, be issued (name and signature)
//! by the next certificate, and the last certificate must either be a pinned
//! anchor (exact DER match) or be signed by one. Every issuer must be a CA
//! allowed to sign certificates, and its `pathLenConstraint` must cover the
//! CA certificates below it. On success the leaf's public key is returned
//! for verifying the payload the chain came with.

use base64::{Engine as _, engine::general_purpose::STANDARD};
use chrono::{DateTime, Utc};
use p256::elliptic_curve::sec1::ToEncodedPoint as _;
use rsa::RsaPublicKey;
use rsa::pkcs1v15;
use rsa::pkcs8::DecodePublicKey as _;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256, Sha384, Sha512};
use signature::Verifier as _;
use signature::hazmat::PrehashVerifier as _;
use tracing::{debug, warn};
use x509_parser::prelude::*;
use x509_parser::public_key::PublicKey;

use super::anchor::TrustAnchor;
use crate::error::{AuthError, AuthResult};
use crate::jwt::{EcCurve, SigningKey};

/// Marker extension carried by Apple's App Store receipt-signing leaf
pub const APPLE_LEAF_MARKER_OID: &str = "1.2.840.113635.100.6.11.1";

/// Marker extension carried by Apple's WWDR intermediate
pub const APPLE_INTERMEDIATE_MARKER_OID: &str = "1.2.840.113635.100.6.2.1";

/// Default upper bound on chain length
pub const DEFAULT_MAX_CHAIN_DEPTH: usize = 8;

const SHA256_WITH_RSA: &str = "1.2.840.113549.1.1.11";
const SHA384_WITH_RSA: &str = "1.2.840.113549.1.1.12";
const SHA512_WITH_RSA: &str = "1.2.840.113549.1.1.13";
const ECDSA_WITH_SHA256: &str = "1.2.840.10045.4.3.2";
const ECDSA_WITH_SHA384: &str = "1.2.840.10045.4.3.3";
const ECDSA_WITH_SHA512: &str = "1.2.840.10045.4.3.4";

/// Online revocation checking
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RevocationMode {
    /// No revocation checks
    #[default]
    Disabled,
    /// Revocation status must be confirmed online (not supported)
    Required,
}

/// Structural requirements on a chain beyond cryptographic validity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainPolicy {
    /// Maximum number of certificates accepted
    #[serde(default = "default_max_depth")]
    pub max_depth: usize,

    /// Exact number of certificates required, if any
    #[serde(default)]
    pub expected_length: Option<usize>,

    /// Extension OID the leaf must carry
    #[serde(default)]
    pub leaf_marker_oid: Option<String>,

    /// Extension OID the first intermediate must carry
    #[serde(default)]
    pub intermediate_marker_oid: Option<String>,

    /// Revocation checking mode
    #[serde(default)]
    pub revocation: RevocationMode,
}

fn default_max_depth() -> usize {
    DEFAULT_MAX_CHAIN_DEPTH
}

impl Default for ChainPolicy {
    fn default() -> Self {
        Self {
            max_depth: DEFAULT_MAX_CHAIN_DEPTH,
            expected_length: None,
            leaf_marker_oid: None,
            intermediate_marker_oid: None,
            revocation: RevocationMode::Disabled,
        }
    }
}

impl ChainPolicy {
    /// Apple's App Store signing chain: leaf, WWDR intermediate, root, with
    /// both marker extensions required
    pub fn apple() -> Self {
        Self {
            expected_length: Some(3),
            leaf_marker_oid: Some(APPLE_LEAF_MARKER_OID.to_string()),
            intermediate_marker_oid: Some(APPLE_INTERMEDIATE_MARKER_OID.to_string()),
            ..Self::default()
        }
    }
}

/// Validates certificate chains against a fixed set of trust anchors
#[derive(Debug, Clone)]
pub struct CertChainValidator {
    anchors: Vec<TrustAnchor>,
    policy: ChainPolicy,
}

impl CertChainValidator {
    /// Create a validator
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Configuration`] if `anchors` is empty, the policy
    /// is inconsistent, or online revocation is required (unsupported).
    pub fn new(anchors: Vec<TrustAnchor>, policy: ChainPolicy) -> AuthResult<Self> {
        if anchors.is_empty() {
            return Err(AuthError::config(
                "Certificate chain validation requires at least one trust anchor",
            ));
        }
        if policy.revocation == RevocationMode::Required {
            return Err(AuthError::config(
                "Online revocation checking is not supported",
            ));
        }
        if policy.max_depth == 0
            || policy
                .expected_length
                .is_some_and(|n| n == 0 || n > policy.max_depth)
        {
            return Err(AuthError::config(format!(
                "Inconsistent chain policy: max_depth={}, expected_length={:?}",
                policy.max_depth, policy.expected_length
            )));
        }

        Ok(Self { anchors, policy })
    }

    /// Pinned anchors
    pub fn anchors(&self) -> &[TrustAnchor] {
        &self.anchors
    }

    /// Policy in force
    pub fn policy(&self) -> &ChainPolicy {
        &self.policy
    }

    /// Validate an `x5c` chain (standard base64 DER, leaf first) at the
    /// current time
    ///
    /// # Errors
    ///
    /// See [`CertChainValidator::validate_der_at`].
    pub fn validate(&self, x5c: &[String]) -> AuthResult<SigningKey> {
        self.validate_at(x5c, Utc::now())
    }

    /// Validate an `x5c` chain at `at`
    ///
    /// # Errors
    ///
    /// [`AuthError::MissingCertificateChain`] for an empty chain,
    /// [`AuthError::CertificateChainInvalid`] for anything else wrong.
    pub fn validate_at(&self, x5c: &[String], at: DateTime<Utc>) -> AuthResult<SigningKey> {
        if x5c.is_empty() {
            return Err(AuthError::MissingCertificateChain);
        }

        let chain = x5c
            .iter()
            .enumerate()
            .map(|(i, encoded)| {
                STANDARD.decode(encoded).map_err(|e| {
                    warn!(index = i, error = %e, "x5c entry is not base64");
                    AuthError::CertificateChainInvalid
                })
            })
            .collect::<AuthResult<Vec<_>>>()?;

        self.validate_der_at(&chain, at)
    }

    /// Validate a DER chain at `at`
    ///
    /// # Errors
    ///
    /// [`AuthError::MissingCertificateChain`] for an empty chain,
    /// [`AuthError::CertificateChainInvalid`] for anything else wrong.
    pub fn validate_der_at(&self, chain: &[Vec<u8>], at: DateTime<Utc>) -> AuthResult<SigningKey> {
        if chain.is_empty() {
            return Err(AuthError::MissingCertificateChain);
        }

        match self.check_chain(chain, at.timestamp()) {
            Ok(key) => {
                debug!(chain_length = chain.len(), leaf = %key.key_id(), "Certificate chain validated");
                Ok(key)
            }
            Err(reason) => {
                warn!(reason = %reason, chain_length = chain.len(), at = %at, "Certificate chain rejected");
                Err(AuthError::CertificateChainInvalid)
            }
        }
    }

    fn check_chain(&self, chain: &[Vec<u8>], at: i64) -> Result<SigningKey, String> {
        if chain.len() > self.policy.max_depth {
            return Err(format!(
                "chain has {} certificates, more than the maximum {}",
                chain.len(),
                self.policy.max_depth
            ));
        }
        if let Some(expected) = self.policy.expected_length
            && chain.len() != expected
        {
            return Err(format!(
                "chain has {} certificates, expected {expected}",
                chain.len()
            ));
        }

        let parsed = chain
            .iter()
            .enumerate()
            .map(|(i, der)| match parse_x509_certificate(der) {
                Ok((rest, cert)) if rest.is_empty() => Ok(cert),
                Ok(_) => Err(format!("certificate {i} has trailing bytes")),
                Err(e) => Err(format!("certificate {i} is not valid DER: {e}")),
            })
            .collect::<Result<Vec<_>, _>>()?;

        for (i, cert) in parsed.iter().enumerate() {
            check_validity(cert, at).map_err(|e| format!("certificate {i} {e}"))?;
        }

        for (i, pair) in parsed.windows(2).enumerate() {
            let (child, issuer) = (&pair[0], &pair[1]);
            if child.issuer().as_raw() != issuer.subject().as_raw() {
                return Err(format!(
                    "certificate {i} issuer '{}' does not match certificate {} subject '{}'",
                    child.issuer(),
                    i + 1,
                    issuer.subject()
                ));
            }
            // Everything between the leaf and this issuer is a CA.
            check_issuer(issuer, i).map_err(|e| format!("certificate {}: {e}", i + 1))?;
            verify_cert_signature(child, issuer.public_key().raw)
                .map_err(|e| format!("certificate {i}: {e}"))?;
        }

        let (last, last_der) = match (parsed.last(), chain.last()) {
            (Some(cert), Some(der)) => (cert, der),
            _ => return Err("chain is empty".to_string()),
        };
        self.check_anchored(last, last_der, parsed.len() - 1, at)?;

        if let Some(oid) = &self.policy.leaf_marker_oid
            && !has_extension(&parsed[0], oid)
        {
            return Err(format!("leaf lacks marker extension {oid}"));
        }
        if let Some(oid) = &self.policy.intermediate_marker_oid {
            match parsed.get(1) {
                Some(intermediate) if has_extension(intermediate, oid) => {}
                Some(_) => return Err(format!("intermediate lacks marker extension {oid}")),
                None => return Err("chain has no intermediate certificate".to_string()),
            }
        }

        leaf_signing_key(&parsed[0])
    }

    fn check_anchored(
        &self,
        last: &X509Certificate<'_>,
        last_der: &[u8],
        cas_below: usize,
        at: i64,
    ) -> Result<(), String> {
        if self.anchors.iter().any(|anchor| anchor.der() == last_der) {
            return Ok(());
        }

        let issuer_raw = last.issuer().as_raw();
        for anchor in self.anchors.iter().filter(|a| a.subject_raw() == issuer_raw) {
            if !anchor.is_valid_at(at) {
                debug!(anchor = %anchor.subject(), "Candidate trust anchor outside validity window");
                continue;
            }
            if verify_cert_signature(last, anchor.spki_der()).is_err() {
                continue;
            }
            if !anchor.can_sign_certificates() {
                return Err(format!("trust anchor '{}' may not sign certificates", anchor.subject()));
            }
            if let Some(limit) = anchor.path_len_constraint()
                && (limit as usize) < cas_below
            {
                return Err(format!(
                    "trust anchor '{}' allows {limit} intermediate CAs, chain has {cas_below}",
                    anchor.subject()
                ));
            }
            return Ok(());
        }

        Err(format!(
            "chain does not terminate at a trusted root (last issuer '{}')",
            last.issuer()
        ))
    }
}

fn check_validity(cert: &X509Certificate<'_>, at: i64) -> Result<(), String> {
    let validity = cert.validity();
    if at < validity.not_before.timestamp() {
        return Err(format!("is not valid before {}", validity.not_before));
    }
    if at > validity.not_after.timestamp() {
        return Err(format!("expired at {}", validity.not_after));
    }
    Ok(())
}

/// Basic constraints and key usage of a certificate used as an issuer
/// with `cas_below` CA certificates between it and the leaf
fn check_issuer(issuer: &X509Certificate<'_>, cas_below: usize) -> Result<(), String> {
    let constraints = issuer
        .basic_constraints()
        .map_err(|e| format!("unreadable basic constraints: {e}"))?;
    let Some(constraints) = constraints.filter(|bc| bc.value.ca) else {
        return Err("is not a CA".to_string());
    };
    if let Some(limit) = constraints.value.path_len_constraint
        && (limit as usize) < cas_below
    {
        return Err(format!(
            "path length constraint {limit} exceeded by {cas_below} intermediate CAs"
        ));
    }

    let key_usage = issuer
        .key_usage()
        .map_err(|e| format!("unreadable key usage: {e}"))?;
    if key_usage.is_some_and(|ku| !ku.value.key_cert_sign()) {
        return Err("key usage does not permit certificate signing".to_string());
    }
    Ok(())
}

fn has_extension(cert: &X509Certificate<'_>, oid: &str) -> bool {
    cert.extensions()
        .iter()
        .any(|ext| ext.oid.to_id_string() == oid)
}

fn verify_cert_signature(child: &X509Certificate<'_>, issuer_spki_der: &[u8]) -> Result<(), String> {
    let tbs_der = child.tbs_certificate.as_ref();
    let signature: &[u8] = &child.signature_value.data;
    let signature_oid = child.signature_algorithm.algorithm.to_id_string();

    match signature_oid.as_str() {
        SHA256_WITH_RSA => {
            let vk = pkcs1v15::VerifyingKey::<Sha256>::new(rsa_public_key(issuer_spki_der)?);
            vk.verify(tbs_der, &rsa_signature(signature)?)
                .map_err(|_| "certificate signature verification failed".to_string())
        }
        SHA384_WITH_RSA => {
            let vk = pkcs1v15::VerifyingKey::<Sha384>::new(rsa_public_key(issuer_spki_der)?);
            vk.verify(tbs_der, &rsa_signature(signature)?)
                .map_err(|_| "certificate signature verification failed".to_string())
        }
        SHA512_WITH_RSA => {
            let vk = pkcs1v15::VerifyingKey::<Sha512>::new(rsa_public_key(issuer_spki_der)?);
            vk.verify(tbs_der, &rsa_signature(signature)?)
                .map_err(|_| "certificate signature verification failed".to_string())
        }
        ECDSA_WITH_SHA256 => verify_ecdsa_prehash(issuer_spki_der, &Sha256::digest(tbs_der), signature),
        ECDSA_WITH_SHA384 => verify_ecdsa_prehash(issuer_spki_der, &Sha384::digest(tbs_der), signature),
        ECDSA_WITH_SHA512 => verify_ecdsa_prehash(issuer_spki_der, &Sha512::digest(tbs_der), signature),
        other => Err(format!("unsupported certificate signature algorithm OID: {other}")),
    }
}

fn rsa_public_key(spki_der: &[u8]) -> Result<RsaPublicKey, String> {
    RsaPublicKey::from_public_key_der(spki_der).map_err(|e| format!("bad RSA issuer public key: {e}"))
}

fn rsa_signature(signature: &[u8]) -> Result<pkcs1v15::Signature, String> {
    pkcs1v15::Signature::try_from(signature).map_err(|e| format!("bad RSA signature bytes: {e}"))
}

// ECDSA certificates may pair either curve with any SHA-2 digest, so the
// digest is computed up front and verified as a prehash.
fn verify_ecdsa_prehash(issuer_spki_der: &[u8], prehash: &[u8], signature: &[u8]) -> Result<(), String> {
    if let Ok(pk) = p256::PublicKey::from_public_key_der(issuer_spki_der) {
        let ep = pk.to_encoded_point(false);
        let vk = p256::ecdsa::VerifyingKey::from_sec1_bytes(ep.as_bytes())
            .map_err(|e| format!("bad P-256 issuer public key: {e}"))?;
        let sig = p256::ecdsa::Signature::from_der(signature)
            .map_err(|e| format!("bad ECDSA signature bytes: {e}"))?;
        return vk
            .verify_prehash(prehash, &sig)
            .map_err(|_| "certificate signature verification failed".to_string());
    }

    if let Ok(pk) = p384::PublicKey::from_public_key_der(issuer_spki_der) {
        let ep = pk.to_encoded_point(false);
        let vk = p384::ecdsa::VerifyingKey::from_sec1_bytes(ep.as_bytes())
            .map_err(|e| format!("bad P-384 issuer public key: {e}"))?;
        let sig = p384::ecdsa::Signature::from_der(signature)
            .map_err(|e| format!("bad ECDSA signature bytes: {e}"))?;
        return vk
            .verify_prehash(prehash, &sig)
            .map_err(|_| "certificate signature verification failed".to_string());
    }

    Err("issuer key is not a supported EC key".to_string())
}

fn leaf_signing_key(leaf: &X509Certificate<'_>) -> Result<SigningKey, String> {
    let key_id = leaf.subject().to_string();
    let public_key = leaf
        .public_key()
        .parsed()
        .map_err(|e| format!("leaf public key is unreadable: {e}"))?;

    match public_key {
        PublicKey::RSA(rsa) => Ok(SigningKey::rsa(key_id, rsa.modulus, rsa.exponent)),
        PublicKey::EC(point) => {
            let data = point.data();
            let curve = match data.len() {
                65 => EcCurve::P256,
                97 => EcCurve::P384,
                n => return Err(format!("unsupported EC point length {n}")),
            };
            if data[0] != 0x04 {
                return Err("compressed EC points are not supported".to_string());
            }
            let len = curve.coordinate_len();
            SigningKey::ec(key_id, curve, &data[1..=len], &data[1 + len..])
                .map_err(|e| e.to_string())
        }
        _ => Err("unsupported leaf public key type".to_string()),
    }
}
