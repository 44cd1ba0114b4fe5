//! Identity token signing keys
//!
//! Apple publishes its identity token keys as a JWKS and rotates them
//! without notice. `JwksKeyStore` caches the set for a TTL and refetches
//! when a token names a key it has not seen, rate limited so a stream of
//! bogus `kid`s cannot turn into a stream of requests to Apple.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};

use jsonwebtoken::DecodingKey;
use jsonwebtoken::jwk::{Jwk, JwkSet};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::constants::PUBLIC_KEYS_URL;
use crate::error::{Error, Result};

/// Boxed future used at dyn-compatible async seams.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// How long a fetched key set is served without refetching
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(600);

/// Minimum spacing between fetches triggered by unknown key IDs
pub const DEFAULT_MIN_REFRESH_INTERVAL: Duration = Duration::from_secs(30);

/// Resolves a public key by key ID.
///
/// Returns `Error::KeyNotFound` for an unknown key and `Error::KeyStore`
/// when the key source itself is unreachable or malformed.
pub trait KeyStore: Send + Sync {
    fn signing_key<'a>(&'a self, kid: &'a str) -> BoxFuture<'a, Result<DecodingKey>>;
}

fn decoding_key(jwk: &Jwk) -> Result<DecodingKey> {
    DecodingKey::from_jwk(jwk).map_err(|e| Error::KeyStore(format!("unusable JWK: {e}")))
}

fn find<'a>(jwks: &'a JwkSet, kid: &str) -> Option<&'a Jwk> {
    jwks.keys
        .iter()
        .find(|jwk| jwk.common.key_id.as_deref() == Some(kid))
}

/// Fixed key set, for pinned deployments and tests.
pub struct StaticKeyStore {
    jwks: JwkSet,
}

impl StaticKeyStore {
    pub fn new(jwks: JwkSet) -> Self {
        Self { jwks }
    }

    /// Parse a JWKS document.
    pub fn from_json(json: &str) -> Result<Self> {
        let jwks = serde_json::from_str(json)
            .map_err(|e| Error::KeyStore(format!("invalid JWKS document: {e}")))?;
        Ok(Self::new(jwks))
    }
}

impl KeyStore for StaticKeyStore {
    fn signing_key<'a>(&'a self, kid: &'a str) -> BoxFuture<'a, Result<DecodingKey>> {
        Box::pin(async move {
            let jwk = find(&self.jwks, kid).ok_or_else(|| Error::KeyNotFound(kid.to_owned()))?;
            decoding_key(jwk)
        })
    }
}

#[derive(Debug)]
struct CachedJwks {
    jwks: Arc<JwkSet>,
    fetched_at: Instant,
}

/// Remote JWKS with TTL caching and rate limited refresh.
pub struct JwksKeyStore {
    http: reqwest::Client,
    jwks_uri: String,
    ttl: Duration,
    min_refresh_interval: Duration,
    cache: RwLock<Option<CachedJwks>>,
    /// Held for the duration of a fetch; the cache lock never is
    refreshing: Mutex<()>,
}

impl JwksKeyStore {
    /// Key store for Apple's published keys.
    pub fn new(http: reqwest::Client) -> Self {
        Self::with_uri(http, PUBLIC_KEYS_URL)
    }

    pub fn with_uri(http: reqwest::Client, jwks_uri: impl Into<String>) -> Self {
        Self {
            http,
            jwks_uri: jwks_uri.into(),
            ttl: DEFAULT_CACHE_TTL,
            min_refresh_interval: DEFAULT_MIN_REFRESH_INTERVAL,
            cache: RwLock::new(None),
            refreshing: Mutex::new(()),
        }
    }

    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn with_min_refresh_interval(mut self, interval: Duration) -> Self {
        self.min_refresh_interval = interval;
        self
    }

    /// Cached key set, fetching when empty or older than the TTL.
    async fn current(&self) -> Result<Arc<JwkSet>> {
        {
            let cache = self.cache.read().await;
            if let Some(entry) = cache.as_ref() {
                if entry.fetched_at.elapsed() < self.ttl {
                    return Ok(entry.jwks.clone());
                }
            }
        }
        self.refresh(false).await
    }

    /// Fetch the key set and replace the cache.
    ///
    /// One fetch runs at a time and readers of the cache are never blocked
    /// by it. While a TTL refresh is in flight, other TTL refreshes are
    /// served the stale set. With `rate_limited`, a cache younger than the
    /// minimum refresh interval is returned as is. A failed fetch falls back
    /// to cached keys if any.
    async fn refresh(&self, rate_limited: bool) -> Result<Arc<JwkSet>> {
        let _refreshing = match self.refreshing.try_lock() {
            Ok(guard) => guard,
            Err(_) => {
                if !rate_limited {
                    if let Some(entry) = self.cache.read().await.as_ref() {
                        return Ok(entry.jwks.clone());
                    }
                }
                self.refreshing.lock().await
            }
        };

        let cached = self
            .cache
            .read()
            .await
            .as_ref()
            .map(|entry| (entry.jwks.clone(), entry.fetched_at));

        if let Some((jwks, fetched_at)) = &cached {
            let age = fetched_at.elapsed();
            let fresh_enough = if rate_limited {
                age < self.min_refresh_interval
            } else {
                age < self.ttl
            };
            // Another task may have refreshed while we waited.
            if fresh_enough {
                return Ok(jwks.clone());
            }
        }

        match fetch_jwks(&self.http, &self.jwks_uri).await {
            Ok(jwks) => {
                info!(jwks_uri = %self.jwks_uri, keys = jwks.keys.len(), "fetched signing keys");
                let jwks = Arc::new(jwks);
                *self.cache.write().await = Some(CachedJwks {
                    jwks: jwks.clone(),
                    fetched_at: Instant::now(),
                });
                Ok(jwks)
            }
            Err(err) => match cached {
                Some((jwks, fetched_at)) => {
                    warn!(
                        jwks_uri = %self.jwks_uri,
                        error = %err,
                        cached_age_secs = fetched_at.elapsed().as_secs(),
                        "JWKS refresh failed, using cached keys"
                    );
                    Ok(jwks)
                }
                None => Err(err),
            },
        }
    }
}

impl KeyStore for JwksKeyStore {
    fn signing_key<'a>(&'a self, kid: &'a str) -> BoxFuture<'a, Result<DecodingKey>> {
        Box::pin(async move {
            let jwks = self.current().await?;
            if let Some(jwk) = find(&jwks, kid) {
                return decoding_key(jwk);
            }

            // Unknown kid: Apple may have rotated keys since the last fetch.
            debug!(kid, "key id not cached, refreshing key set");
            let jwks = self.refresh(true).await?;
            let jwk = find(&jwks, kid).ok_or_else(|| Error::KeyNotFound(kid.to_owned()))?;
            decoding_key(jwk)
        })
    }
}

async fn fetch_jwks(http: &reqwest::Client, jwks_uri: &str) -> Result<JwkSet> {
    let response = http
        .get(jwks_uri)
        .send()
        .await
        .map_err(|e| Error::KeyStore(format!("JWKS request failed: {e}")))?;

    let status = response.status();
    if !status.is_success() {
        return Err(Error::KeyStore(format!("GET {jwks_uri} returned {status}")));
    }

    response
        .json::<JwkSet>()
        .await
        .map_err(|e| Error::KeyStore(format!("invalid JWKS response: {e}")))
}
