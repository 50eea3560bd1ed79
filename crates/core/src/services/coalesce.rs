//! Request coalescing and time-bucketed result caching.
//!
//! [`RequestGroup`] makes concurrent callers with the same key share one
//! computation. [`CoalescingCache`] layers a durable per-bucket result store
//! on top, so each `(resource, bucket)` is computed at most once.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use mediarepo_common::{AppError, AppResult, ErrorCode};
use tokio::sync::broadcast;
use tracing::{debug, error, warn};

/// How far in the past a request may point before a miss is retried against
/// the current bucket.
pub const RECURSION_GRACE_MS: i64 = 60_000;

/// Start of the bucket containing `ts`. Non-positive windows yield `ts`.
#[must_use]
pub const fn bucket_ts(ts: i64, window_ms: i64) -> i64 {
    if window_ms <= 0 {
        return ts;
    }
    ts.div_euclid(window_ms) * window_ms
}

/// Source of the current time in milliseconds since the epoch.
pub trait Clock: Send + Sync {
    /// Milliseconds since the epoch.
    fn now_ms(&self) -> i64;
}

/// Wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        chrono::Utc::now().timestamp_millis()
    }
}

type Inflight<T> = Arc<Mutex<HashMap<String, broadcast::Sender<AppResult<T>>>>>;

/// Removes a registry entry when the executing task ends, even by panic.
struct InflightGuard<T> {
    inflight: Inflight<T>,
    key: String,
    sender: broadcast::Sender<AppResult<T>>,
}

impl<T> InflightGuard<T> {
    fn unregister(&self) {
        let mut map = self.inflight.lock().unwrap_or_else(PoisonError::into_inner);
        if map
            .get(&self.key)
            .is_some_and(|current| current.same_channel(&self.sender))
        {
            map.remove(&self.key);
        }
    }
}

impl<T> Drop for InflightGuard<T> {
    fn drop(&mut self) {
        self.unregister();
    }
}

/// Shares one in-flight computation among concurrent callers with the same
/// key.
///
/// The computation runs on its own task, so it finishes even if every caller
/// gives up. Its entry is removed before the result is published; a caller
/// arriving afterwards starts a fresh computation.
pub struct RequestGroup<T> {
    inflight: Inflight<T>,
}

impl<T> Default for RequestGroup<T> {
    fn default() -> Self {
        Self {
            inflight: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

impl<T> Clone for RequestGroup<T> {
    fn clone(&self) -> Self {
        Self {
            inflight: self.inflight.clone(),
        }
    }
}

impl<T: Clone + Send + 'static> RequestGroup<T> {
    /// Create an empty group.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of computations currently running.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.inflight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Run `work` for `key`, or join the run already in progress.
    ///
    /// Returns the shared result and whether this caller joined an existing
    /// run rather than starting one.
    pub async fn run<F, Fut>(&self, key: &str, work: F) -> (AppResult<T>, bool)
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = AppResult<T>> + Send + 'static,
    {
        let (mut receiver, joined) = {
            let mut map = self.inflight.lock().unwrap_or_else(PoisonError::into_inner);
            if let Some(sender) = map.get(key) {
                (sender.subscribe(), true)
            } else {
                let (sender, receiver) = broadcast::channel(1);
                map.insert(key.to_string(), sender.clone());
                drop(map);

                let guard = InflightGuard {
                    inflight: self.inflight.clone(),
                    key: key.to_string(),
                    sender,
                };
                let fut = work();
                tokio::spawn(async move {
                    let result = fut.await;
                    guard.unregister();
                    // Nobody listening is fine.
                    let _ = guard.sender.send(result);
                });
                (receiver, false)
            }
        };

        if joined {
            debug!(key = %key, "Joined in-flight request");
        }

        let result = match receiver.recv().await {
            Ok(result) => result,
            Err(e) => {
                warn!(key = %key, error = %e, "In-flight request ended without a result");
                Err(AppError::Internal(format!(
                    "request for {key} was abandoned"
                )))
            }
        };
        (result, joined)
    }
}

/// A durable cached outcome: a value or a classified failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Cached<V> {
    /// A successful result.
    Value(V),
    /// A failure worth remembering for the rest of the bucket.
    Failure(ErrorCode),
}

impl<V> Cached<V> {
    /// Turn the cached outcome back into a result.
    pub fn into_result(self) -> AppResult<V> {
        match self {
            Self::Value(value) => Ok(value),
            Self::Failure(code) => Err(code.into_error()),
        }
    }
}

/// Durable per-bucket result store.
#[async_trait]
pub trait ResultCache<V>: Send + Sync {
    /// Outcome stored for `resource` in `bucket`, if any.
    async fn lookup(&self, resource: &str, bucket: i64) -> AppResult<Option<Cached<V>>>;

    /// Store an outcome unless one exists. Returns the outcome that is stored
    /// afterwards; the first writer wins.
    async fn store(&self, resource: &str, bucket: i64, outcome: Cached<V>)
    -> AppResult<Cached<V>>;
}

/// Coalescing key of one computation: `"{bucket}_{origin}/{resource}"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    /// Bucket start.
    pub bucket: i64,
    /// Server the request is made for.
    pub origin: String,
    /// The resource, e.g. a URL.
    pub resource: String,
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}/{}", self.bucket, self.origin, self.resource)
    }
}

/// Where a resolved value came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionSource {
    /// Read from the durable store.
    Cache,
    /// Computed by this caller's run.
    Computed,
    /// Shared from another caller's run.
    Joined,
}

/// A resolved value and its source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution<V> {
    /// The value.
    pub value: V,
    /// Bucket the value belongs to.
    pub bucket: i64,
    /// Where it came from.
    pub source: ResolutionSource,
}

/// Time-bucketed cache with request coalescing.
pub struct CoalescingCache<V> {
    store: Arc<dyn ResultCache<V>>,
    group: RequestGroup<(V, ResolutionSource)>,
    clock: Arc<dyn Clock>,
    window_ms: i64,
}

impl<V> Clone for CoalescingCache<V> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            group: self.group.clone(),
            clock: self.clock.clone(),
            window_ms: self.window_ms,
        }
    }
}

impl<V: Clone + Send + Sync + 'static> CoalescingCache<V> {
    /// Create a cache with buckets of `window_ms`.
    #[must_use]
    pub fn new(store: Arc<dyn ResultCache<V>>, clock: Arc<dyn Clock>, window_ms: i64) -> Self {
        Self {
            store,
            group: RequestGroup::new(),
            clock,
            window_ms,
        }
    }

    /// Bucket width in milliseconds.
    #[must_use]
    pub const fn window_ms(&self) -> i64 {
        self.window_ms
    }

    /// Current time according to the cache's clock.
    #[must_use]
    pub fn now_ms(&self) -> i64 {
        self.clock.now_ms()
    }

    /// Resolve `resource` as of `at_ms`.
    ///
    /// A stored outcome for the bucket is returned as is. On a miss for a
    /// bucket well in the past, the lookup is retried once against the
    /// current bucket. Otherwise `compute` runs, shared with any concurrent
    /// caller for the same key. Successes and classifiable failures are
    /// stored; other failures are returned without being stored.
    pub async fn resolve<F, Fut>(
        &self,
        resource: &str,
        origin: &str,
        at_ms: i64,
        compute: F,
    ) -> AppResult<Resolution<V>>
    where
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = AppResult<V>> + Send + 'static,
    {
        let mut at_ms = at_ms;
        let mut retried = false;

        let bucket = loop {
            let bucket = bucket_ts(at_ms, self.window_ms);
            if let Some(hit) = self.store.lookup(resource, bucket).await? {
                return hit.into_result().map(|value| Resolution {
                    value,
                    bucket,
                    source: ResolutionSource::Cache,
                });
            }

            let now = self.clock.now_ms();
            if !retried
                && now - at_ms > RECURSION_GRACE_MS
                && bucket != bucket_ts(now, self.window_ms)
            {
                debug!(resource = %resource, from = at_ms, to = now, "Old bucket missed, retrying at now");
                at_ms = now;
                retried = true;
                continue;
            }
            break bucket;
        };

        let key = CacheKey {
            bucket,
            origin: origin.to_string(),
            resource: resource.to_string(),
        };
        let store = self.store.clone();
        let resource_owned = resource.to_string();

        let (result, joined) = self
            .group
            .run(&key.to_string(), move || {
                let computation = compute();
                async move { compute_and_store(store, resource_owned, bucket, computation).await }
            })
            .await;

        result.map(|(value, source)| Resolution {
            value,
            bucket,
            source: if joined {
                ResolutionSource::Joined
            } else {
                source
            },
        })
    }
}

async fn compute_and_store<V, Fut>(
    store: Arc<dyn ResultCache<V>>,
    resource: String,
    bucket: i64,
    computation: Fut,
) -> AppResult<(V, ResolutionSource)>
where
    V: Clone + Send + Sync + 'static,
    Fut: Future<Output = AppResult<V>> + Send,
{
    // Another run may have stored the outcome between our miss and now.
    if let Some(hit) = store.lookup(&resource, bucket).await? {
        return hit
            .into_result()
            .map(|value| (value, ResolutionSource::Cache));
    }

    let outcome = match computation.await {
        Ok(value) => Cached::Value(value),
        Err(e) => match e.cache_code() {
            Some(code) => Cached::Failure(code),
            None => return Err(e),
        },
    };

    let stored = match store.store(&resource, bucket, outcome.clone()).await {
        Ok(stored) => stored,
        Err(e) => {
            error!(resource = %resource, bucket, error = %e, "Failed to persist cached outcome");
            outcome
        }
    };

    stored
        .into_result()
        .map(|value| (value, ResolutionSource::Computed))
}
