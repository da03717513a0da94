//! Sliding-window rate limiting with interchangeable counter backends.
//!
//! Two backends share identical admission semantics: an in-process counter
//! map for single-node deployments and a remote counter service for
//! multi-node deployments (the gateway itself stays stateless).
//!
//! The algorithm blends two adjacent fixed windows: for a request at time
//! `t` the current bucket is incremented atomically and the estimated rate
//! is `count(t0) + count(t-1) * (1 - elapsed_fraction)`. The request is
//! admitted when the estimate does not exceed the rule's limit. Counters
//! expire at `window + 60s` grace.
//!
//! The local backend additionally runs a token bucket per key for rules
//! with a burst allowance; either admission failure denies the request.

use crate::models::settings::{RateLimitRule, RateLimitSettings};
use ahash::AHashMap;
use async_trait::async_trait;
use log::{debug, warn};
use std::sync::Mutex;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// TTL grace added on top of the window so a bucket survives long enough to
/// serve as the "previous" bucket of the next window.
const COUNTER_TTL_GRACE: Duration = Duration::from_secs(60);

/// Buckets whose token count is full and that have not been touched for
/// this long are dropped by the sweeper.
pub const BUCKET_IDLE_TTL: Duration = Duration::from_secs(300);

#[derive(Debug, thiserror::Error)]
pub enum CounterStoreError {
    #[error("counter store unavailable: {0}")]
    Unavailable(String),
}

/// Atomic per-(key, window-bucket) counters.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Increments the counter and returns the new value, extending its TTL.
    async fn increment(
        &self,
        key: &str,
        bucket: u64,
        ttl: Duration,
    ) -> Result<u64, CounterStoreError>;

    /// Reads a counter; absent or expired counters read as zero.
    async fn get(&self, key: &str, bucket: u64) -> Result<u64, CounterStoreError>;
}

#[derive(Debug)]
struct CounterEntry {
    count: u64,
    expires_at: Instant,
}

/// In-process counter store for single-node deployments.
#[derive(Debug, Default)]
pub struct LocalCounterStore {
    counters: Mutex<AHashMap<(String, u64), CounterEntry>>,
}

impl LocalCounterStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drops expired counters. Called by the limiter's periodic sweep.
    pub fn sweep(&self) {
        let now = Instant::now();
        let mut counters = self.counters.lock().unwrap_or_else(|e| e.into_inner());
        counters.retain(|_, entry| entry.expires_at > now);
    }
}

#[async_trait]
impl CounterStore for LocalCounterStore {
    async fn increment(
        &self,
        key: &str,
        bucket: u64,
        ttl: Duration,
    ) -> Result<u64, CounterStoreError> {
        let now = Instant::now();
        let mut counters = self.counters.lock().unwrap_or_else(|e| e.into_inner());
        let entry = counters
            .entry((key.to_string(), bucket))
            .or_insert(CounterEntry {
                count: 0,
                expires_at: now + ttl,
            });
        if entry.expires_at <= now {
            entry.count = 0;
        }
        entry.count += 1;
        entry.expires_at = now + ttl;
        Ok(entry.count)
    }

    async fn get(&self, key: &str, bucket: u64) -> Result<u64, CounterStoreError> {
        let now = Instant::now();
        let counters = self.counters.lock().unwrap_or_else(|e| e.into_inner());
        Ok(counters
            .get(&(key.to_string(), bucket))
            .filter(|entry| entry.expires_at > now)
            .map(|entry| entry.count)
            .unwrap_or(0))
    }
}

#[derive(serde::Serialize)]
struct IncrementRequest<'a> {
    key: &'a str,
    bucket: u64,
    ttl_secs: u64,
}

#[derive(serde::Deserialize)]
struct CounterValue {
    count: u64,
}

/// Counter store backed by a remote counter service; used when the gateway
/// runs with more than one replica.
pub struct RemoteCounterStore {
    client: reqwest::Client,
    base_url: String,
}

impl RemoteCounterStore {
    pub fn new(base_url: String) -> Self {
        let client = reqwest::Client::builder()
            .pool_idle_timeout(Duration::from_secs(30))
            .timeout(Duration::from_secs(2))
            .build()
            .expect("failed to create counter store client");
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl CounterStore for RemoteCounterStore {
    async fn increment(
        &self,
        key: &str,
        bucket: u64,
        ttl: Duration,
    ) -> Result<u64, CounterStoreError> {
        let body = IncrementRequest {
            key,
            bucket,
            ttl_secs: ttl.as_secs(),
        };
        let response = self
            .client
            .post(format!("{}/counters/increment", self.base_url))
            .json(&body)
            .send()
            .await
            .map_err(|e| CounterStoreError::Unavailable(e.to_string()))?;
        let value: CounterValue = response
            .error_for_status()
            .map_err(|e| CounterStoreError::Unavailable(e.to_string()))?
            .json()
            .await
            .map_err(|e| CounterStoreError::Unavailable(e.to_string()))?;
        Ok(value.count)
    }

    async fn get(&self, key: &str, bucket: u64) -> Result<u64, CounterStoreError> {
        let response = self
            .client
            .get(format!("{}/counters/{}/{}", self.base_url, key, bucket))
            .send()
            .await
            .map_err(|e| CounterStoreError::Unavailable(e.to_string()))?;
        let value: CounterValue = response
            .error_for_status()
            .map_err(|e| CounterStoreError::Unavailable(e.to_string()))?
            .json()
            .await
            .map_err(|e| CounterStoreError::Unavailable(e.to_string()))?;
        Ok(value.count)
    }
}

/// Token bucket for a key's burst allowance.
#[derive(Debug)]
struct TokenBucket {
    tokens: f64,
    capacity: f64,
    refill_per_sec: f64,
    last_refill: Instant,
    /// Last admission attempt; the sweeper keys idleness off this, never off
    /// a token probe.
    last_used: Instant,
}

impl TokenBucket {
    fn new(capacity: f64, refill_per_sec: f64) -> Self {
        let now = Instant::now();
        Self {
            tokens: capacity,
            capacity,
            refill_per_sec,
            last_refill: now,
            last_used: now,
        }
    }

    fn try_take(&mut self) -> bool {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.refill_per_sec).min(self.capacity);
        self.last_refill = now;
        self.last_used = now;
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    fn is_idle_and_full(&self, now: Instant, idle: Duration) -> bool {
        self.tokens >= self.capacity && now.duration_since(self.last_used) >= idle
    }
}

/// The outcome of one admission check, also used to populate the
/// X-RateLimit-* response headers.
#[derive(Debug, Clone)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub limit: u64,
    pub remaining: u64,
    /// Epoch seconds at which the current window rolls over.
    pub reset_epoch_secs: u64,
    pub retry_after_secs: u64,
    pub window_secs: u64,
}

/// Sliding-window limiter over a counter store, with local burst buckets.
pub struct RateLimiter {
    default_rule: RateLimitRule,
    /// Override rules sorted by pattern length, longest first.
    rules: Vec<RateLimitRule>,
    store: Box<dyn CounterStore>,
    /// Burst buckets; populated only when the store is local (the
    /// distributed deployment keeps the gateway stateless).
    buckets: Option<Mutex<AHashMap<String, TokenBucket>>>,
}

impl RateLimiter {
    /// Limiter with the in-process counter store and burst buckets.
    pub fn new_local(settings: &RateLimitSettings) -> Self {
        Self::build(settings, Box::new(LocalCounterStore::new()), true)
    }

    /// Limiter over a remote counter store; no local burst state.
    pub fn new_distributed(settings: &RateLimitSettings, store: RemoteCounterStore) -> Self {
        Self::build(settings, Box::new(store), false)
    }

    /// Builds from settings, choosing local or distributed by the presence
    /// of `counter_store_url`.
    pub fn from_settings(settings: &RateLimitSettings) -> Self {
        match &settings.counter_store_url {
            Some(url) => Self::new_distributed(settings, RemoteCounterStore::new(url.clone())),
            None => Self::new_local(settings),
        }
    }

    fn build(settings: &RateLimitSettings, store: Box<dyn CounterStore>, burst: bool) -> Self {
        let mut rules = settings.rules.clone();
        rules.sort_by(|a, b| b.pattern.len().cmp(&a.pattern.len()));
        Self {
            default_rule: settings.default.clone(),
            rules,
            store,
            buckets: burst.then(|| Mutex::new(AHashMap::new())),
        }
    }

    /// Longest-prefix rule match, default as fallback.
    pub fn rule_for(&self, path: &str) -> &RateLimitRule {
        self.rules
            .iter()
            .find(|rule| !rule.pattern.is_empty() && path.starts_with(rule.pattern.as_str()))
            .unwrap_or(&self.default_rule)
    }

    /// Runs the admission check for `key` on `path`.
    ///
    /// Counter-store failures admit the request (fail open) so that a
    /// counter outage never turns the limiter into an outage of its own.
    pub async fn check(&self, key: &str, path: &str) -> RateLimitDecision {
        let rule = self.rule_for(path);
        let window = rule.window_secs.max(1);
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or(Duration::ZERO);
        let now_ms = now.as_millis() as u64;
        let window_ms = window * 1000;
        let bucket = now_ms / window_ms;
        let elapsed_fraction = (now_ms % window_ms) as f64 / window_ms as f64;
        let reset_epoch_secs = (bucket + 1) * window;

        // Rule overrides get their own counter namespace; the default quota
        // is shared by every route the key touches.
        let counter_key = if rule.pattern.is_empty() {
            key.to_string()
        } else {
            format!("{}|{}", key, rule.pattern)
        };

        let ttl = Duration::from_secs(window) + COUNTER_TTL_GRACE;
        let current = match self.store.increment(&counter_key, bucket, ttl).await {
            Ok(count) => count,
            Err(e) => {
                warn!("rate limiter failing open: {}", e);
                return RateLimitDecision {
                    allowed: true,
                    limit: rule.limit,
                    remaining: rule.limit,
                    reset_epoch_secs,
                    retry_after_secs: 0,
                    window_secs: window,
                };
            }
        };
        let previous = self
            .store
            .get(&counter_key, bucket.wrapping_sub(1))
            .await
            .unwrap_or(0);

        let estimated = current as f64 + previous as f64 * (1.0 - elapsed_fraction);
        let mut allowed = estimated <= rule.limit as f64;

        if allowed && rule.burst > 0 {
            if let Some(buckets) = &self.buckets {
                let mut buckets = buckets.lock().unwrap_or_else(|e| e.into_inner());
                let bucket = buckets.entry(counter_key.clone()).or_insert_with(|| {
                    TokenBucket::new(rule.burst as f64, rule.limit as f64 / window as f64)
                });
                allowed = bucket.try_take();
            }
        }

        let remaining = if allowed {
            (rule.limit as f64 - estimated).max(0.0) as u64
        } else {
            0
        };
        let retry_after_secs = if allowed {
            0
        } else {
            reset_epoch_secs.saturating_sub(now.as_secs()).max(1)
        };

        debug!(
            "rate limit {} path={} estimated={:.1}/{} allowed={}",
            key, path, estimated, rule.limit, allowed
        );

        RateLimitDecision {
            allowed,
            limit: rule.limit,
            remaining,
            reset_epoch_secs,
            retry_after_secs,
            window_secs: window,
        }
    }

    /// Drops burst buckets that are full and idle, and expired local
    /// counters. Idleness is judged from the last admission timestamp, not
    /// from a token probe, so the sweep itself never consumes quota.
    pub fn sweep_idle(&self) {
        let now = Instant::now();
        if let Some(buckets) = &self.buckets {
            let mut buckets = buckets.lock().unwrap_or_else(|e| e.into_inner());
            let before = buckets.len();
            buckets.retain(|_, bucket| !bucket.is_idle_and_full(now, BUCKET_IDLE_TTL));
            let dropped = before - buckets.len();
            if dropped > 0 {
                debug!("rate limiter sweep dropped {} idle buckets", dropped);
            }
        }
    }
}

/// Spawns the periodic sweep for a shared limiter.
pub fn spawn_sweeper(limiter: std::sync::Arc<RateLimiter>, every: Duration) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        loop {
            ticker.tick().await;
            limiter.sweep_idle();
        }
    });
}
