//! Cached fetching of the issuer's JWK set
//!
//! Verification keys come from the issuer's published key set, cached
//! for `key_cache_ttl` and refetched at most once per
//! `min_refresh_interval`. Refreshes run behind a single-flight gate,
//! so a burst of cold-start lookups produces one HTTP request. When a
//! refresh is rate-limited the stale set keeps serving; a key that
//! still cannot be found is reported as unavailable and the caller
//! decides how to surface that.

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use jsonwebtoken::jwk::JwkSet;
use jsonwebtoken::DecodingKey;
use serde::Deserialize;
use tokio::sync::{Mutex, OnceCell, RwLock};
use tracing::{debug, error, info, warn};

use crate::config::{RetryPolicy, VerifierConfig};
use crate::errors::VerifyError;

/// Where the key set comes from
#[derive(Debug, Clone)]
pub enum KeySource {
    /// Fetch this URI directly
    Direct(String),
    /// Resolve the key-set URI from the issuer's discovery document,
    /// falling back to `{issuer}/.well-known/jwks`
    Discover(String),
}

/// A fetched key set plus its cache bookkeeping
#[derive(Debug, Clone)]
struct CachedKeys {
    keys: JwkSet,
    fetched_at: SystemTime,
    ttl: Duration,
}

impl CachedKeys {
    fn is_fresh(&self) -> bool {
        match self.fetched_at.elapsed() {
            Ok(elapsed) => elapsed < self.ttl,
            // Clock went backwards; treat the entry as stale
            Err(_) => false,
        }
    }
}

/// Cached, refresh-limited view of the issuer's key set
#[derive(Debug, Clone)]
pub struct RemoteKeySet {
    source: KeySource,
    resolved_uri: Arc<OnceCell<String>>,
    cache: Arc<RwLock<Option<CachedKeys>>>,
    refresh_gate: Arc<Mutex<()>>,
    last_refresh: Arc<RwLock<Option<SystemTime>>>,
    http: reqwest::Client,
    cache_ttl: Duration,
    min_refresh_interval: Duration,
    retry: RetryPolicy,
}

impl RemoteKeySet {
    /// Key set for the source named by the configuration
    ///
    /// A direct `key_set_uri` wins over issuer discovery.
    pub fn from_config(config: &VerifierConfig) -> Self {
        let source = match (&config.key_set_uri, &config.issuer_uri) {
            (Some(uri), _) => KeySource::Direct(uri.clone()),
            (None, Some(issuer)) => KeySource::Discover(issuer.clone()),
            (None, None) => KeySource::Discover(config.expected_issuer.clone()),
        };
        Self::new(source, config)
    }

    pub fn new(source: KeySource, config: &VerifierConfig) -> Self {
        let http = reqwest::Client::builder()
            .timeout(config.fetch_timeout)
            .build()
            .expect("Failed to create HTTP client");

        Self {
            source,
            resolved_uri: Arc::new(OnceCell::new()),
            cache: Arc::new(RwLock::new(None)),
            refresh_gate: Arc::new(Mutex::new(())),
            last_refresh: Arc::new(RwLock::new(None)),
            http,
            cache_ttl: config.key_cache_ttl,
            min_refresh_interval: config.min_refresh_interval,
            retry: config.fetch_retry.clone(),
        }
    }

    /// Verification key for `kid`, fetching or refreshing as needed
    ///
    /// An unknown `kid` in a fresh set triggers one rate-limited
    /// refetch before giving up, so freshly rotated keys are picked up
    /// without a cold cache.
    pub async fn decoding_key(&self, kid: &str) -> Result<DecodingKey, VerifyError> {
        {
            let cache = self.cache.read().await;
            if let Some(cached) = cache.as_ref() {
                if cached.is_fresh() {
                    if let Some(key) = Self::find_key(&cached.keys, kid)? {
                        return Ok(key);
                    }
                }
            }
        }

        self.refresh().await?;

        let cache = self.cache.read().await;
        if let Some(cached) = cache.as_ref() {
            if let Some(key) = Self::find_key(&cached.keys, kid)? {
                return Ok(key);
            }
        }
        Err(VerifyError::KeyUnavailable {
            reason: format!("no key with kid {kid} in the issuer's key set"),
        })
    }

    fn find_key(keys: &JwkSet, kid: &str) -> Result<Option<DecodingKey>, VerifyError> {
        match keys.find(kid) {
            Some(jwk) => DecodingKey::from_jwk(jwk)
                .map(Some)
                .map_err(|e| VerifyError::KeyUnavailable {
                    reason: format!("key {kid} is unusable: {e}"),
                }),
            None => Ok(None),
        }
    }

    /// Refetch the key set, honoring the refresh rate limit
    ///
    /// Holding the gate across the whole refresh makes concurrent
    /// callers queue here; whoever enters after a completed fetch sees
    /// a recent `last_refresh` and returns without another request.
    /// Failed fetches count against the rate limit too, so a dead
    /// issuer is not hammered once per incoming token.
    async fn refresh(&self) -> Result<(), VerifyError> {
        let _flight = self.refresh_gate.lock().await;

        if let Some(last) = *self.last_refresh.read().await {
            let recently = last
                .elapsed()
                .map(|elapsed| elapsed < self.min_refresh_interval)
                .unwrap_or(false);
            if recently {
                debug!("skipping key set refresh inside the rate limit window");
                return Ok(());
            }
        }

        let uri = self
            .resolved_uri
            .get_or_init(|| self.resolve_uri())
            .await
            .clone();

        let result = self.fetch_with_retry(&uri).await;
        *self.last_refresh.write().await = Some(SystemTime::now());

        let keys = result?;
        let key_count = keys.keys.len();
        *self.cache.write().await = Some(CachedKeys {
            keys,
            fetched_at: SystemTime::now(),
            ttl: self.cache_ttl,
        });
        info!(jwks_uri = %uri, key_count, "refreshed issuer key set");
        Ok(())
    }

    async fn resolve_uri(&self) -> String {
        match &self.source {
            KeySource::Direct(uri) => uri.clone(),
            KeySource::Discover(issuer) => {
                let issuer = issuer.trim_end_matches('/');
                let discovery_uri = format!("{issuer}/.well-known/openid-configuration");
                match self.fetch_discovery(&discovery_uri).await {
                    Ok(jwks_uri) => {
                        info!(jwks_uri = %jwks_uri, "resolved key set location from discovery");
                        jwks_uri
                    }
                    Err(e) => {
                        warn!(
                            error = %e,
                            "issuer discovery failed, falling back to conventional key set path"
                        );
                        format!("{issuer}/.well-known/jwks")
                    }
                }
            }
        }
    }

    async fn fetch_discovery(&self, uri: &str) -> Result<String, VerifyError> {
        check_uri_scheme(uri)?;
        let response =
            self.http
                .get(uri)
                .send()
                .await
                .map_err(|e| VerifyError::KeyUnavailable {
                    reason: format!("discovery request failed: {e}"),
                })?;
        if !response.status().is_success() {
            return Err(VerifyError::KeyUnavailable {
                reason: format!("discovery endpoint answered {}", response.status()),
            });
        }
        let document: DiscoveryDocument =
            response.json().await.map_err(|e| VerifyError::KeyUnavailable {
                reason: format!("discovery document does not parse: {e}"),
            })?;
        Ok(document.jwks_uri)
    }

    async fn fetch_with_retry(&self, uri: &str) -> Result<JwkSet, VerifyError> {
        let mut attempt = 0;
        loop {
            match self.fetch_key_set(uri).await {
                Ok(keys) => return Ok(keys),
                Err(e) => match self.retry.delay(attempt) {
                    Some(delay) => {
                        warn!(error = %e, attempt, "key set fetch failed, retrying");
                        tokio::time::sleep(delay).await;
                        attempt += 1;
                    }
                    None => {
                        error!(jwks_uri = %uri, error = %e, "key set fetch failed, giving up");
                        return Err(e);
                    }
                },
            }
        }
    }

    async fn fetch_key_set(&self, uri: &str) -> Result<JwkSet, VerifyError> {
        check_uri_scheme(uri)?;
        debug!(jwks_uri = %uri, "fetching issuer key set");
        let response =
            self.http
                .get(uri)
                .send()
                .await
                .map_err(|e| VerifyError::KeyUnavailable {
                    reason: format!("key set request failed: {e}"),
                })?;
        if !response.status().is_success() {
            return Err(VerifyError::KeyUnavailable {
                reason: format!("key set endpoint answered {}", response.status()),
            });
        }
        response
            .json::<JwkSet>()
            .await
            .map_err(|e| VerifyError::KeyUnavailable {
                reason: format!("key set does not parse: {e}"),
            })
    }
}

/// The slice of the discovery document this crate reads
#[derive(Debug, Deserialize)]
struct DiscoveryDocument {
    jwks_uri: String,
    #[serde(flatten)]
    _additional: serde_json::Value,
}

fn check_uri_scheme(uri: &str) -> Result<(), VerifyError> {
    if uri.starts_with("https://")
        || uri.starts_with("http://localhost")
        || uri.starts_with("http://127.0.0.1")
    {
        return Ok(());
    }
    Err(VerifyError::KeyUnavailable {
        reason: format!("refusing to fetch keys over an insecure channel: {uri}"),
    })
}
