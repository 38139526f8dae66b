//! Trust configuration
//!
//! Every component takes a plain, serde-deserializable config struct.
//! [`TrustConfig::from_env`] builds the whole set from `APPLE_*` environment
//! variables; [`TrustConfig::from_lookup`] does the same over any key lookup.

use jsonwebtoken::Algorithm;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{AuthError, AuthResult};
use crate::x509::{ChainPolicy, RevocationMode};

/// Provider issuer and audience of client assertions
pub const APPLE_ISSUER: &str = "https://appleid.apple.com";

/// Provider key set endpoint
pub const APPLE_KEYS_URL: &str = "https://appleid.apple.com/auth/keys";

/// Key store configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyStoreConfig {
    /// Key set endpoint
    #[serde(default = "default_keys_url")]
    pub keys_url: String,

    /// Cache time-to-live; `None` caches until restart
    #[serde(default = "default_cache_ttl")]
    pub cache_ttl: Option<Duration>,

    /// Minimum interval between refreshes triggered by unknown key ids
    #[serde(default = "default_min_refresh_interval")]
    pub min_refresh_interval: Duration,

    /// HTTP request timeout
    #[serde(default = "default_request_timeout")]
    pub request_timeout: Duration,

    /// Refetch the key set once when a token names an unknown key id
    #[serde(default = "default_true")]
    pub refresh_on_unknown_kid: bool,
}

impl Default for KeyStoreConfig {
    fn default() -> Self {
        Self {
            keys_url: default_keys_url(),
            cache_ttl: default_cache_ttl(),
            min_refresh_interval: default_min_refresh_interval(),
            request_timeout: default_request_timeout(),
            refresh_on_unknown_kid: true,
        }
    }
}

impl KeyStoreConfig {
    /// Set the key set endpoint
    pub fn with_keys_url(mut self, keys_url: impl Into<String>) -> Self {
        self.keys_url = keys_url.into();
        self
    }

    /// Set the cache time-to-live
    pub fn with_cache_ttl(mut self, cache_ttl: Option<Duration>) -> Self {
        self.cache_ttl = cache_ttl;
        self
    }
}

/// Identity token validation rules
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdentityTokenConfig {
    /// Required `iss`
    #[serde(default = "default_issuer")]
    pub issuer: String,

    /// Accepted `aud` values (client ids)
    pub audiences: Vec<String>,

    /// Clock skew tolerance
    #[serde(default = "default_leeway")]
    pub leeway: Duration,

    /// Accepted signature algorithms
    #[serde(default = "default_identity_algorithms")]
    pub algorithms: Vec<Algorithm>,
}

impl Default for IdentityTokenConfig {
    fn default() -> Self {
        Self {
            issuer: default_issuer(),
            audiences: Vec::new(),
            leeway: default_leeway(),
            algorithms: default_identity_algorithms(),
        }
    }
}

impl IdentityTokenConfig {
    /// Rules for the given client ids with provider defaults
    pub fn new(audiences: Vec<String>) -> Self {
        Self {
            audiences,
            ..Self::default()
        }
    }

    /// Set the required issuer
    pub fn with_issuer(mut self, issuer: impl Into<String>) -> Self {
        self.issuer = issuer.into();
        self
    }
}

/// Client assertion signing material
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientAssertionConfig {
    /// Developer team id (`iss`)
    pub team_id: String,

    /// Client id (`sub`)
    pub client_id: String,

    /// Signing key id (header `kid`)
    pub key_id: String,

    /// PKCS#8 P-256 private key: PEM, base64 DER or base64 PEM
    #[serde(
        serialize_with = "serialize_secret",
        deserialize_with = "deserialize_secret"
    )]
    pub private_key: SecretString,

    /// `aud` of issued assertions
    #[serde(default = "default_issuer")]
    pub audience: String,

    /// Base URL of the provider's token and revocation endpoints
    #[serde(default = "default_issuer")]
    pub provider_url: String,

    /// HTTP request timeout for provider calls
    #[serde(default = "default_request_timeout")]
    pub request_timeout: Duration,
}

impl Default for ClientAssertionConfig {
    fn default() -> Self {
        Self {
            team_id: String::new(),
            client_id: String::new(),
            key_id: String::new(),
            private_key: SecretString::new(String::new()),
            audience: default_issuer(),
            provider_url: default_issuer(),
            request_timeout: default_request_timeout(),
        }
    }
}

/// Certificate chain trust configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainTrustConfig {
    /// Root certificate files (PEM or DER)
    pub root_certificates: Vec<PathBuf>,

    /// Structural policy
    #[serde(default = "ChainPolicy::apple")]
    pub policy: ChainPolicy,
}

/// Complete trust configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrustConfig {
    /// Key store
    #[serde(default)]
    pub key_store: KeyStoreConfig,

    /// Identity tokens
    pub identity: IdentityTokenConfig,

    /// Client assertions; absent disables server-to-server provider calls
    #[serde(default)]
    pub client_assertion: Option<ClientAssertionConfig>,

    /// Certificate chains
    pub chain: ChainTrustConfig,
}

impl TrustConfig {
    /// Load from process environment variables
    ///
    /// | Variable | Meaning |
    /// |---|---|
    /// | `APPLE_CLIENT_IDS` | comma-separated accepted audiences (required) |
    /// | `APPLE_ISSUER` | identity token issuer |
    /// | `APPLE_KEYS_URL` | key set endpoint |
    /// | `APPLE_KEY_CACHE_TTL_SECS` | key cache TTL in seconds, or `never` |
    /// | `APPLE_TEAM_ID`, `APPLE_KEY_ID`, `APPLE_PRIVATE_KEY` | client assertion material (all or none) |
    /// | `APPLE_ROOT_CERTS` | comma-separated root certificate paths (required) |
    /// | `APPLE_CHAIN_REVOCATION` | `disabled` or `required` |
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Configuration`] on missing or malformed values.
    pub fn from_env() -> AuthResult<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load from an arbitrary variable lookup
    ///
    /// # Errors
    ///
    /// As [`TrustConfig::from_env`].
    pub fn from_lookup<F>(lookup: F) -> AuthResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let audiences = split_list(&get("APPLE_CLIENT_IDS").ok_or_else(|| {
            AuthError::config("APPLE_CLIENT_IDS must list at least one client id")
        })?);
        if audiences.is_empty() {
            return Err(AuthError::config(
                "APPLE_CLIENT_IDS must list at least one client id",
            ));
        }

        let mut identity = IdentityTokenConfig::new(audiences.clone());
        if let Some(issuer) = get("APPLE_ISSUER") {
            identity.issuer = issuer;
        }

        let mut key_store = KeyStoreConfig::default();
        if let Some(url) = get("APPLE_KEYS_URL") {
            key_store.keys_url = url;
        }
        if let Some(ttl) = get("APPLE_KEY_CACHE_TTL_SECS") {
            key_store.cache_ttl = parse_cache_ttl(&ttl)?;
        }

        let client_assertion = match (
            get("APPLE_TEAM_ID"),
            get("APPLE_KEY_ID"),
            get("APPLE_PRIVATE_KEY"),
        ) {
            (Some(team_id), Some(key_id), Some(private_key)) => Some(ClientAssertionConfig {
                team_id,
                key_id,
                client_id: audiences[0].clone(),
                private_key: SecretString::new(private_key),
                ..ClientAssertionConfig::default()
            }),
            (None, None, None) => None,
            _ => {
                return Err(AuthError::config(
                    "APPLE_TEAM_ID, APPLE_KEY_ID and APPLE_PRIVATE_KEY must be set together",
                ));
            }
        };

        let root_certificates: Vec<PathBuf> = get("APPLE_ROOT_CERTS")
            .map(|v| split_list(&v).into_iter().map(PathBuf::from).collect())
            .unwrap_or_default();
        if root_certificates.is_empty() {
            return Err(AuthError::config(
                "APPLE_ROOT_CERTS must list at least one root certificate",
            ));
        }

        let mut policy = ChainPolicy::apple();
        if let Some(mode) = get("APPLE_CHAIN_REVOCATION") {
            policy.revocation = parse_revocation(&mode)?;
        }

        Ok(Self {
            key_store,
            identity,
            client_assertion,
            chain: ChainTrustConfig {
                root_certificates,
                policy,
            },
        })
    }
}

/// Split a comma-separated list, dropping empty entries
pub fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_cache_ttl(value: &str) -> AuthResult<Option<Duration>> {
    if value.trim().eq_ignore_ascii_case("never") {
        return Ok(None);
    }
    value
        .trim()
        .parse::<u64>()
        .map(|secs| Some(Duration::from_secs(secs)))
        .map_err(|_| {
            AuthError::config(format!(
                "APPLE_KEY_CACHE_TTL_SECS must be a number of seconds or 'never', got '{value}'"
            ))
        })
}

fn parse_revocation(value: &str) -> AuthResult<RevocationMode> {
    match value.trim().to_ascii_lowercase().as_str() {
        "disabled" | "off" | "none" => Ok(RevocationMode::Disabled),
        "required" => Ok(RevocationMode::Required),
        other => Err(AuthError::config(format!(
            "APPLE_CHAIN_REVOCATION must be 'disabled' or 'required', got '{other}'"
        ))),
    }
}

fn default_keys_url() -> String {
    APPLE_KEYS_URL.to_string()
}

fn default_issuer() -> String {
    APPLE_ISSUER.to_string()
}

fn default_cache_ttl() -> Option<Duration> {
    Some(Duration::from_secs(3600))
}

fn default_min_refresh_interval() -> Duration {
    Duration::from_secs(5)
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_leeway() -> Duration {
    Duration::from_secs(60)
}

fn default_identity_algorithms() -> Vec<Algorithm> {
    vec![Algorithm::RS256]
}

fn default_true() -> bool {
    true
}

// Custom serialization for SecretString
fn serialize_secret<S>(secret: &SecretString, serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    serializer.serialize_str(secret.expose_secret())
}

// Custom deserialization for SecretString
fn deserialize_secret<'de, D>(deserializer: D) -> Result<SecretString, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s: String = serde::Deserialize::deserialize(deserializer)?;
    Ok(SecretString::new(s))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name: &str| map.get(name).cloned()
    }

    const BASE: [(&str, &str); 2] = [
        ("APPLE_CLIENT_IDS", "com.wellnest.app, com.wellnest.web"),
        ("APPLE_ROOT_CERTS", "/etc/wellnest/AppleRootCA-G3.cer"),
    ];

    #[test]
    fn test_minimal_environment() {
        let config = TrustConfig::from_lookup(lookup(&BASE)).unwrap();
        assert_eq!(
            config.identity.audiences,
            vec!["com.wellnest.app".to_string(), "com.wellnest.web".to_string()]
        );
        assert_eq!(config.identity.issuer, APPLE_ISSUER);
        assert_eq!(config.key_store, KeyStoreConfig::default());
        assert_eq!(config.key_store.cache_ttl, Some(Duration::from_secs(3600)));
        assert!(config.client_assertion.is_none());
        assert_eq!(config.chain.policy, ChainPolicy::apple());
        assert_eq!(
            config.chain.root_certificates,
            vec![PathBuf::from("/etc/wellnest/AppleRootCA-G3.cer")]
        );
    }

    #[test]
    fn test_missing_required_variables() {
        assert!(matches!(
            TrustConfig::from_lookup(lookup(&[BASE[1]])),
            Err(AuthError::Configuration(_))
        ));
        assert!(matches!(
            TrustConfig::from_lookup(lookup(&[BASE[0]])),
            Err(AuthError::Configuration(_))
        ));
    }

    #[test]
    fn test_cache_ttl_values() {
        let mut vars = BASE.to_vec();
        vars.push(("APPLE_KEY_CACHE_TTL_SECS", "never"));
        let config = TrustConfig::from_lookup(lookup(&vars)).unwrap();
        assert_eq!(config.key_store.cache_ttl, None);

        let mut vars = BASE.to_vec();
        vars.push(("APPLE_KEY_CACHE_TTL_SECS", "120"));
        let config = TrustConfig::from_lookup(lookup(&vars)).unwrap();
        assert_eq!(config.key_store.cache_ttl, Some(Duration::from_secs(120)));

        let mut vars = BASE.to_vec();
        vars.push(("APPLE_KEY_CACHE_TTL_SECS", "soon"));
        assert!(TrustConfig::from_lookup(lookup(&vars)).is_err());
    }

    #[test]
    fn test_partial_client_assertion_rejected() {
        let mut vars = BASE.to_vec();
        vars.push(("APPLE_TEAM_ID", "TEAM123456"));
        assert!(matches!(
            TrustConfig::from_lookup(lookup(&vars)),
            Err(AuthError::Configuration(_))
        ));

        vars.push(("APPLE_KEY_ID", "KEY1234567"));
        vars.push(("APPLE_PRIVATE_KEY", "MIGH"));
        let config = TrustConfig::from_lookup(lookup(&vars)).unwrap();
        let assertion = config.client_assertion.unwrap();
        assert_eq!(assertion.client_id, "com.wellnest.app");
        assert_eq!(assertion.audience, APPLE_ISSUER);
    }

    #[test]
    fn test_revocation_mode_parsing() {
        let mut vars = BASE.to_vec();
        vars.push(("APPLE_CHAIN_REVOCATION", "required"));
        let config = TrustConfig::from_lookup(lookup(&vars)).unwrap();
        assert_eq!(config.chain.policy.revocation, RevocationMode::Required);

        let mut vars = BASE.to_vec();
        vars.push(("APPLE_CHAIN_REVOCATION", "sometimes"));
        assert!(TrustConfig::from_lookup(lookup(&vars)).is_err());
    }

    #[test]
    fn test_secret_round_trips_through_serde() {
        let config = ClientAssertionConfig {
            private_key: SecretString::new("pem-data".to_string()),
            ..ClientAssertionConfig::default()
        };
        let json = serde_json::to_value(&config).unwrap();
        assert_eq!(json["private_key"], "pem-data");
        assert!(!format!("{config:?}").contains("pem-data"));
    }
}
