//! Client assertions for server-to-server calls to the identity provider
//!
//! The provider authenticates this service by a short-lived ES256 JWT (the
//! "client secret") signed with the team's private key. Assertions are
//! always minted with a fixed five minute lifetime.

use base64::{Engine as _, engine::general_purpose::STANDARD};
use chrono::{DateTime, TimeDelta, Timelike, Utc};
use jsonwebtoken::{Algorithm, EncodingKey, Header, encode};
use p256::SecretKey;
use p256::pkcs8::{DecodePrivateKey, EncodePrivateKey};
use secrecy::ExposeSecret;
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, error};

use crate::config::ClientAssertionConfig;
use crate::error::{AuthError, AuthResult};

/// Lifetime of every issued assertion (`exp - iat`)
pub const CLIENT_ASSERTION_LIFETIME: Duration = Duration::from_secs(300);

/// Content of a client assertion before signing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientAssertion {
    /// `iss`: developer team id
    pub issuer: String,
    /// `sub`: client id
    pub subject: String,
    /// `aud`: provider base URL
    pub audience: String,
    /// `iat`
    pub issued_at: DateTime<Utc>,
    /// `exp`
    pub expires_at: DateTime<Utc>,
    /// Header `kid`
    pub key_id: String,
}

#[derive(Serialize)]
struct AssertionClaims<'a> {
    iss: &'a str,
    sub: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

/// Mints signed client assertions
pub struct ClientAssertionIssuer {
    team_id: String,
    client_id: String,
    audience: String,
    key_id: String,
    encoding_key: EncodingKey,
}

impl std::fmt::Debug for ClientAssertionIssuer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientAssertionIssuer")
            .field("team_id", &self.team_id)
            .field("client_id", &self.client_id)
            .field("audience", &self.audience)
            .field("key_id", &self.key_id)
            .field("encoding_key", &"<redacted>")
            .finish()
    }
}

impl ClientAssertionIssuer {
    /// Load the signing key and identifiers from configuration
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Configuration`] if an identifier is empty or the
    /// private key is not a P-256 PKCS#8 key (PEM, base64 DER, or base64 PEM).
    pub fn new(config: &ClientAssertionConfig) -> AuthResult<Self> {
        for (name, value) in [
            ("team id", &config.team_id),
            ("client id", &config.client_id),
            ("key id", &config.key_id),
        ] {
            if value.trim().is_empty() {
                return Err(AuthError::config(format!("Client assertion {name} is empty")));
            }
        }

        let secret = decode_private_key(config.private_key.expose_secret())?;
        let pkcs8_der = secret
            .to_pkcs8_der()
            .map_err(|e| AuthError::config(format!("Failed to encode private key: {e}")))?;

        debug!(
            team_id = %config.team_id,
            client_id = %config.client_id,
            key_id = %config.key_id,
            "Client assertion key loaded"
        );

        Ok(Self {
            team_id: config.team_id.clone(),
            client_id: config.client_id.clone(),
            audience: config.audience.clone(),
            key_id: config.key_id.clone(),
            encoding_key: EncodingKey::from_ec_der(pkcs8_der.as_bytes()),
        })
    }

    /// Team id used as `iss`
    pub fn team_id(&self) -> &str {
        &self.team_id
    }

    /// Client id used as `sub`
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Key id placed in the header
    pub fn key_id(&self) -> &str {
        &self.key_id
    }

    /// Mint and sign an assertion valid from now
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Configuration`] if signing fails.
    pub fn issue(&self) -> AuthResult<String> {
        self.sign(&self.assertion_at(Utc::now()))
    }

    /// Unsigned assertion content for the instant `now`
    pub fn assertion_at(&self, now: DateTime<Utc>) -> ClientAssertion {
        let issued_at = now.with_nanosecond(0).unwrap_or(now);
        ClientAssertion {
            issuer: self.team_id.clone(),
            subject: self.client_id.clone(),
            audience: self.audience.clone(),
            issued_at,
            expires_at: issued_at + lifetime(),
            key_id: self.key_id.clone(),
        }
    }

    /// Sign an assertion
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Configuration`] if the assertion's lifetime is
    /// not positive or exceeds [`CLIENT_ASSERTION_LIFETIME`], or signing fails.
    pub fn sign(&self, assertion: &ClientAssertion) -> AuthResult<String> {
        let span = assertion.expires_at - assertion.issued_at;
        if span <= TimeDelta::zero() || span > lifetime() {
            return Err(AuthError::config(format!(
                "Client assertion lifetime must be within (0, {}s], got {}s",
                CLIENT_ASSERTION_LIFETIME.as_secs(),
                span.num_seconds()
            )));
        }

        let mut header = Header::new(Algorithm::ES256);
        header.kid = Some(assertion.key_id.clone());

        let claims = AssertionClaims {
            iss: &assertion.issuer,
            sub: &assertion.subject,
            aud: &assertion.audience,
            iat: assertion.issued_at.timestamp(),
            exp: assertion.expires_at.timestamp(),
        };

        encode(&header, &claims, &self.encoding_key).map_err(|e| {
            error!(key_id = %assertion.key_id, error = %e, "Failed to sign client assertion");
            AuthError::config(format!("Failed to sign client assertion: {e}"))
        })
    }
}

fn lifetime() -> TimeDelta {
    TimeDelta::seconds(CLIENT_ASSERTION_LIFETIME.as_secs() as i64)
}

/// Decode a P-256 private key supplied as PEM, base64 DER, or base64 PEM
///
/// # Errors
///
/// Returns [`AuthError::Configuration`] if none of the encodings parse.
pub fn decode_private_key(encoded: &str) -> AuthResult<SecretKey> {
    let trimmed = encoded.trim();
    if trimmed.starts_with("-----BEGIN") {
        return SecretKey::from_pkcs8_pem(trimmed)
            .map_err(|e| AuthError::config(format!("Invalid PEM private key: {e}")));
    }

    let compact: String = trimmed.chars().filter(|c| !c.is_whitespace()).collect();
    let bytes = STANDARD
        .decode(compact)
        .map_err(|e| AuthError::config(format!("Private key is neither PEM nor base64: {e}")))?;

    match std::str::from_utf8(&bytes) {
        Ok(text) if text.trim_start().starts_with("-----BEGIN") => {
            SecretKey::from_pkcs8_pem(text.trim())
                .map_err(|e| AuthError::config(format!("Invalid PEM private key: {e}")))
        }
        _ => SecretKey::from_pkcs8_der(&bytes)
            .map_err(|e| AuthError::config(format!("Invalid PKCS#8 private key: {e}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use p256::pkcs8::LineEnding;
    use secrecy::SecretString;

    fn key_pem() -> String {
        let secret = SecretKey::random(&mut rand::rngs::OsRng);
        secret.to_pkcs8_pem(LineEnding::LF).unwrap().to_string()
    }

    fn config(private_key: String) -> ClientAssertionConfig {
        ClientAssertionConfig {
            team_id: "TEAM123456".to_string(),
            client_id: "com.wellnest.app".to_string(),
            key_id: "KEY1234567".to_string(),
            private_key: SecretString::new(private_key),
            ..ClientAssertionConfig::default()
        }
    }

    #[test]
    fn test_private_key_encodings() {
        let pem = key_pem();
        let from_pem = decode_private_key(&pem).unwrap();

        let b64_pem = STANDARD.encode(pem.as_bytes());
        assert_eq!(decode_private_key(&b64_pem).unwrap(), from_pem);

        let der = from_pem.to_pkcs8_der().unwrap();
        let b64_der = STANDARD.encode(der.as_bytes());
        assert_eq!(decode_private_key(&b64_der).unwrap(), from_pem);

        assert!(matches!(
            decode_private_key("not a key"),
            Err(AuthError::Configuration(_))
        ));
    }

    #[test]
    fn test_assertion_lifetime_is_fixed() {
        let issuer = ClientAssertionIssuer::new(&config(key_pem())).unwrap();
        let now = DateTime::from_timestamp(1_700_000_000, 123_000_000).unwrap();
        let assertion = issuer.assertion_at(now);

        assert_eq!(assertion.issued_at.timestamp(), 1_700_000_000);
        assert_eq!(
            (assertion.expires_at - assertion.issued_at).num_seconds(),
            300
        );
        assert_eq!(assertion.issuer, "TEAM123456");
        assert_eq!(assertion.subject, "com.wellnest.app");
        assert_eq!(assertion.audience, "https://appleid.apple.com");
    }

    #[test]
    fn test_sign_rejects_overlong_lifetime() {
        let issuer = ClientAssertionIssuer::new(&config(key_pem())).unwrap();
        let mut assertion = issuer.assertion_at(Utc::now());
        assertion.expires_at += TimeDelta::seconds(1);
        assert!(matches!(
            issuer.sign(&assertion),
            Err(AuthError::Configuration(_))
        ));
    }

    #[test]
    fn test_empty_identifier_rejected() {
        let mut cfg = config(key_pem());
        cfg.team_id = "  ".to_string();
        assert!(matches!(
            ClientAssertionIssuer::new(&cfg),
            Err(AuthError::Configuration(_))
        ));
    }

    #[test]
    fn test_debug_redacts_key() {
        let issuer = ClientAssertionIssuer::new(&config(key_pem())).unwrap();
        let debug = format!("{issuer:?}");
        assert!(debug.contains("<redacted>"));
        assert!(!debug.contains("BEGIN"));
    }
}
