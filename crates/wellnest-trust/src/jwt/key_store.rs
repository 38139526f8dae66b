//! Provider signing-key fetching and caching
//!
//! The [`KeyStore`] keeps the provider's whole key set under a single cache
//! entry:
//!
//! - **TTL-based caching**: default 1 hour, `None` caches until restart
//! - **Stale on error**: a failed fetch falls back to the last cached set;
//!   the network is not retried until `min_refresh_interval` has passed
//! - **Refresh on unknown kid**: one rate-limited refetch when a token names
//!   a key the cached set does not contain (provider key rotation)
//!
//! Concurrent first access may fetch more than once. The fetch is idempotent,
//! so misses are not deduplicated.

use async_trait::async_trait;
use jsonwebtoken::jwk::JwkSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};
use url::Url;

use super::keys::SigningKey;
use crate::config::KeyStoreConfig;
use crate::error::{AuthError, AuthResult};

/// Where a [`KeyStore`] gets its keys from
#[async_trait]
pub trait KeySource: Send + Sync + std::fmt::Debug {
    /// Fetch the current key set
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::UpstreamUnavailable`] when the set cannot be
    /// retrieved or parsed.
    async fn fetch_keys(&self) -> AuthResult<Vec<SigningKey>>;

    /// Human-readable location, used in logs
    fn location(&self) -> &str;
}

/// Key set published as JSON over HTTPS
#[derive(Debug, Clone)]
pub struct HttpKeySource {
    uri: Url,
    http_client: reqwest::Client,
}

impl HttpKeySource {
    /// Create a key source for a key-set endpoint
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Configuration`] if the URL is invalid, not HTTPS
    /// (plain HTTP is only accepted for loopback hosts), or the HTTP client
    /// cannot be built.
    pub fn new(uri: &str, timeout: Duration) -> AuthResult<Self> {
        let uri = Url::parse(uri)
            .map_err(|e| AuthError::config(format!("Invalid key set URL '{uri}': {e}")))?;

        if !is_secure_endpoint(&uri) {
            return Err(AuthError::config(
                "Key set endpoint must use HTTPS (HTTP only allowed for loopback hosts)",
            ));
        }

        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AuthError::config(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self { uri, http_client })
    }
}

#[async_trait]
impl KeySource for HttpKeySource {
    async fn fetch_keys(&self) -> AuthResult<Vec<SigningKey>> {
        let response = self
            .http_client
            .get(self.uri.clone())
            .send()
            .await
            .map_err(|e| {
                error!(uri = %self.uri, error = %e, "Failed to fetch key set");
                AuthError::UpstreamUnavailable(format!("Key set fetch failed: {e}"))
            })?;

        if !response.status().is_success() {
            error!(
                uri = %self.uri,
                status = %response.status(),
                "Key set endpoint returned error status"
            );
            return Err(AuthError::UpstreamUnavailable(format!(
                "Key set endpoint returned status {}",
                response.status()
            )));
        }

        let jwk_set: JwkSet = response.json().await.map_err(|e| {
            error!(uri = %self.uri, error = %e, "Failed to parse key set JSON");
            AuthError::UpstreamUnavailable(format!("Invalid key set format: {e}"))
        })?;

        let mut keys = Vec::with_capacity(jwk_set.keys.len());
        for jwk in &jwk_set.keys {
            match SigningKey::from_jwk(jwk) {
                Ok(key) => {
                    debug!(kid = %key.key_id(), alg = ?key.algorithm(), "Parsed JWK");
                    keys.push(key);
                }
                Err(e) => {
                    warn!(kid = ?jwk.common.key_id, error = %e, "Skipping unusable JWK");
                }
            }
        }

        Ok(keys)
    }

    fn location(&self) -> &str {
        self.uri.as_str()
    }
}

/// Fixed, pinned key set
#[derive(Debug, Clone, Default)]
pub struct StaticKeySource {
    keys: Vec<SigningKey>,
}

impl StaticKeySource {
    /// Serve exactly these keys
    pub fn new(keys: Vec<SigningKey>) -> Self {
        Self { keys }
    }
}

#[async_trait]
impl KeySource for StaticKeySource {
    async fn fetch_keys(&self) -> AuthResult<Vec<SigningKey>> {
        Ok(self.keys.clone())
    }

    fn location(&self) -> &str {
        "static"
    }
}

pub(crate) fn is_secure_endpoint(url: &Url) -> bool {
    match url.scheme() {
        "https" => true,
        "http" => matches!(url.host_str(), Some("localhost" | "127.0.0.1" | "[::1]")),
        _ => false,
    }
}

/// Cached key set with metadata
#[derive(Debug)]
struct CachedKeys {
    keys: Arc<[SigningKey]>,
    fetched_at: Instant,
    /// Last refresh that failed while these keys were served stale
    failed_refresh_at: Option<Instant>,
}

impl CachedKeys {
    fn is_fresh(&self, ttl: Option<Duration>) -> bool {
        ttl.is_none_or(|ttl| self.fetched_at.elapsed() < ttl)
    }

    fn in_backoff(&self, interval: Duration) -> bool {
        self.failed_refresh_at
            .is_some_and(|failed| failed.elapsed() < interval)
    }
}

/// Cached provider key set, addressable by key id
///
/// # Example
///
/// ```rust,no_run
/// # use wellnest_trust::{AuthResult, KeyStore, KeyStoreConfig};
/// # async fn example() -> AuthResult<()> {
/// let store = KeyStore::from_config(&KeyStoreConfig::default())?;
/// let key = store.find_key_by_id("W6WcOKB").await?;
/// println!("{:?}", key.key_type());
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct KeyStore {
    source: Arc<dyn KeySource>,
    cache: RwLock<Option<CachedKeys>>,
    cache_ttl: Option<Duration>,
    min_refresh_interval: Duration,
    refresh_on_unknown_kid: bool,
    last_refresh: RwLock<Option<Instant>>,
}

impl KeyStore {
    /// Create a key store over any key source with default cache settings
    pub fn new(source: Arc<dyn KeySource>) -> Self {
        let defaults = KeyStoreConfig::default();
        Self {
            source,
            cache: RwLock::new(None),
            cache_ttl: defaults.cache_ttl,
            min_refresh_interval: defaults.min_refresh_interval,
            refresh_on_unknown_kid: defaults.refresh_on_unknown_kid,
            last_refresh: RwLock::new(None),
        }
    }

    /// Create a key store fetching over HTTPS as configured
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Configuration`] if the key-set URL is unusable.
    pub fn from_config(config: &KeyStoreConfig) -> AuthResult<Self> {
        let source = HttpKeySource::new(&config.keys_url, config.request_timeout)?;
        Ok(Self::new(Arc::new(source))
            .with_cache_ttl(config.cache_ttl)
            .with_min_refresh_interval(config.min_refresh_interval)
            .with_refresh_on_unknown_kid(config.refresh_on_unknown_kid))
    }

    /// Set the cache time-to-live (`None` caches until restart)
    pub fn with_cache_ttl(mut self, cache_ttl: Option<Duration>) -> Self {
        self.cache_ttl = cache_ttl;
        self
    }

    /// Set the minimum interval between refreshes triggered by unknown kids,
    /// also the wait before retrying the network after a failed refresh
    pub fn with_min_refresh_interval(mut self, interval: Duration) -> Self {
        self.min_refresh_interval = interval;
        self
    }

    /// Enable or disable the refetch on unknown kid
    pub fn with_refresh_on_unknown_kid(mut self, enabled: bool) -> Self {
        self.refresh_on_unknown_kid = enabled;
        self
    }

    /// Configured cache time-to-live
    pub fn cache_ttl(&self) -> Option<Duration> {
        self.cache_ttl
    }

    /// Get the key set (from cache or fetch if needed)
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::UpstreamUnavailable`] if the fetch fails and no
    /// key set has been cached yet.
    pub async fn get_keys(&self) -> AuthResult<Arc<[SigningKey]>> {
        {
            let cache = self.cache.read().await;
            if let Some(cached) = cache.as_ref() {
                if cached.is_fresh(self.cache_ttl) {
                    debug!(source = self.source.location(), "Using cached signing keys");
                    return Ok(Arc::clone(&cached.keys));
                }
                if cached.in_backoff(self.min_refresh_interval) {
                    debug!(
                        source = self.source.location(),
                        "Key set endpoint failing, serving stale keys until retry"
                    );
                    return Ok(Arc::clone(&cached.keys));
                }
            }
        }

        self.fetch_and_cache().await
    }

    /// Find a key by id
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::KeyNotFound`] if no key with this id exists after
    /// the (optional) refresh, or [`AuthError::UpstreamUnavailable`] if the
    /// set cannot be obtained at all.
    pub async fn find_key_by_id(&self, kid: &str) -> AuthResult<SigningKey> {
        let keys = self.get_keys().await?;
        if let Some(key) = find(&keys, kid) {
            return Ok(key);
        }

        if self.refresh_on_unknown_kid && self.refresh_allowed().await {
            warn!(kid = kid, "Unknown key id, refreshing key set");
            let keys = self.fetch_and_cache().await?;
            if let Some(key) = find(&keys, kid) {
                return Ok(key);
            }
        }

        warn!(kid = kid, source = self.source.location(), "Key id not found in key set");
        Err(AuthError::KeyNotFound {
            kid: kid.to_string(),
        })
    }

    /// Force a refetch of the key set, ignoring the cache
    ///
    /// # Errors
    ///
    /// Same as [`KeyStore::get_keys`].
    pub async fn refresh(&self) -> AuthResult<Arc<[SigningKey]>> {
        self.fetch_and_cache().await
    }

    /// Drop the cached key set
    pub async fn invalidate(&self) {
        *self.cache.write().await = None;
        debug!(source = self.source.location(), "Signing key cache cleared");
    }

    async fn refresh_allowed(&self) -> bool {
        match *self.last_refresh.read().await {
            Some(last) => last.elapsed() >= self.min_refresh_interval,
            None => true,
        }
    }

    async fn fetch_and_cache(&self) -> AuthResult<Arc<[SigningKey]>> {
        info!(source = self.source.location(), "Fetching signing keys");
        *self.last_refresh.write().await = Some(Instant::now());

        match self.source.fetch_keys().await {
            Ok(keys) => {
                let keys: Arc<[SigningKey]> = keys.into();
                info!(
                    source = self.source.location(),
                    key_count = keys.len(),
                    "Successfully fetched signing keys"
                );
                *self.cache.write().await = Some(CachedKeys {
                    keys: Arc::clone(&keys),
                    fetched_at: Instant::now(),
                    failed_refresh_at: None,
                });
                Ok(keys)
            }
            Err(e) => {
                let mut cache = self.cache.write().await;
                if let Some(stale) = cache.as_mut() {
                    stale.failed_refresh_at = Some(Instant::now());
                    warn!(
                        source = self.source.location(),
                        error = %e,
                        age_secs = stale.fetched_at.elapsed().as_secs(),
                        retry_after_secs = self.min_refresh_interval.as_secs(),
                        "Key set fetch failed, serving stale cached keys"
                    );
                    return Ok(Arc::clone(&stale.keys));
                }

                error!(
                    source = self.source.location(),
                    error = %e,
                    "Key set fetch failed and nothing is cached"
                );
                Err(match e {
                    AuthError::UpstreamUnavailable(_) => e,
                    other => AuthError::UpstreamUnavailable(other.to_string()),
                })
            }
        }
    }
}

fn find(keys: &[SigningKey], kid: &str) -> Option<SigningKey> {
    keys.iter().find(|key| key.key_id() == kid).cloned()
}
