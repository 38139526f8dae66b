//! Pinned root certificates

use std::path::Path;
use std::sync::Arc;
use tracing::info;
use x509_parser::pem::parse_x509_pem;
use x509_parser::prelude::*;

use crate::error::{AuthError, AuthResult};

/// A pinned root certificate a chain must terminate at
///
/// Parsed once when loaded; anything that fails to parse is a startup
/// configuration error.
#[derive(Clone)]
pub struct TrustAnchor {
    inner: Arc<AnchorInner>,
}

struct AnchorInner {
    der: Vec<u8>,
    subject: String,
    subject_raw: Vec<u8>,
    spki_der: Vec<u8>,
    not_before: i64,
    not_after: i64,
    path_len_constraint: Option<u32>,
    key_cert_sign: bool,
}

impl std::fmt::Debug for TrustAnchor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrustAnchor")
            .field("subject", &self.inner.subject)
            .finish()
    }
}

impl TrustAnchor {
    /// Anchor from DER bytes
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Configuration`] if the bytes are not a single
    /// X.509 certificate.
    pub fn from_der(der: impl Into<Vec<u8>>) -> AuthResult<Self> {
        let der = der.into();
        let (rest, cert) = parse_x509_certificate(&der)
            .map_err(|e| AuthError::config(format!("Invalid trust anchor DER: {e}")))?;
        if !rest.is_empty() {
            return Err(AuthError::config(
                "Trust anchor has trailing bytes after the certificate",
            ));
        }

        let inner = AnchorInner {
            subject: cert.subject().to_string(),
            subject_raw: cert.subject().as_raw().to_vec(),
            spki_der: cert.public_key().raw.to_vec(),
            not_before: cert.validity().not_before.timestamp(),
            not_after: cert.validity().not_after.timestamp(),
            path_len_constraint: cert
                .basic_constraints()
                .ok()
                .flatten()
                .and_then(|bc| bc.value.path_len_constraint),
            key_cert_sign: match cert.key_usage() {
                Ok(Some(ku)) => ku.value.key_cert_sign(),
                Ok(None) => true,
                Err(_) => false,
            },
            der: Vec::new(),
        };

        Ok(Self {
            inner: Arc::new(AnchorInner { der, ..inner }),
        })
    }

    /// Anchor from a PEM `CERTIFICATE` block
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Configuration`] if no certificate block parses.
    pub fn from_pem(pem: &[u8]) -> AuthResult<Self> {
        let (_, pem) = parse_x509_pem(pem)
            .map_err(|e| AuthError::config(format!("Invalid trust anchor PEM: {e}")))?;
        if pem.label != "CERTIFICATE" {
            return Err(AuthError::config(format!(
                "Trust anchor PEM block is '{}', expected CERTIFICATE",
                pem.label
            )));
        }
        Self::from_der(pem.contents)
    }

    /// Anchor from PEM or DER bytes, detected by content
    ///
    /// # Errors
    ///
    /// As [`TrustAnchor::from_der`] / [`TrustAnchor::from_pem`].
    pub fn from_bytes(bytes: &[u8]) -> AuthResult<Self> {
        if bytes.trim_ascii_start().starts_with(b"-----BEGIN") {
            Self::from_pem(bytes)
        } else {
            Self::from_der(bytes)
        }
    }

    /// Load an anchor from a PEM or DER file
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Configuration`] if the file cannot be read or
    /// parsed.
    pub fn from_file(path: impl AsRef<Path>) -> AuthResult<Self> {
        let path = path.as_ref();
        let bytes = std::fs::read(path).map_err(|e| {
            AuthError::config(format!("Failed to read trust anchor {}: {e}", path.display()))
        })?;
        let anchor = Self::from_bytes(&bytes).map_err(|e| match e {
            AuthError::Configuration(msg) => {
                AuthError::config(format!("{}: {msg}", path.display()))
            }
            other => other,
        })?;
        info!(path = %path.display(), subject = %anchor.subject(), "Loaded trust anchor");
        Ok(anchor)
    }

    /// Load every anchor in `paths`
    ///
    /// # Errors
    ///
    /// Fails on the first unreadable anchor, or if `paths` is empty.
    pub fn load_all<P: AsRef<Path>>(paths: &[P]) -> AuthResult<Vec<Self>> {
        if paths.is_empty() {
            return Err(AuthError::config("No trust anchors configured"));
        }
        paths.iter().map(Self::from_file).collect()
    }

    /// Certificate DER
    pub fn der(&self) -> &[u8] {
        &self.inner.der
    }

    /// Subject distinguished name
    pub fn subject(&self) -> &str {
        &self.inner.subject
    }

    pub(crate) fn subject_raw(&self) -> &[u8] {
        &self.inner.subject_raw
    }

    pub(crate) fn spki_der(&self) -> &[u8] {
        &self.inner.spki_der
    }

    pub(crate) fn path_len_constraint(&self) -> Option<u32> {
        self.inner.path_len_constraint
    }

    pub(crate) fn can_sign_certificates(&self) -> bool {
        self.inner.key_cert_sign
    }

    pub(crate) fn is_valid_at(&self, timestamp: i64) -> bool {
        self.inner.not_before <= timestamp && timestamp <= self.inner.not_after
    }
}
