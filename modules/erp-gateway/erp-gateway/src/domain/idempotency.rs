//! Deduplication of keyed gateway calls.
//!
//! Completed successes live in a moka cache bounded by TTL and capacity.
//! Computations still in flight run on their own task and are tracked as
//! shared handles, so concurrent callers with the same key wait on one
//! computation. A computation finishes even if every waiter goes away. Failures
//! are handed to every waiter but never stored.

use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use moka::future::Cache;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::Instrument;

type InFlight<V, E> = Shared<BoxFuture<'static, Result<V, Arc<E>>>>;

/// A computation ended without producing a result: it panicked, or its
/// runtime shut down first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("deduplicated computation ended without a result")]
pub struct ComputationLost;

/// Result of [`IdempotencyCache::get_or_compute`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lookup<V> {
    /// The computed or stored result.
    pub value: V,
    /// True when this call did not run the computation itself.
    pub replayed: bool,
}

/// Keyed single-flight cache.
pub struct IdempotencyCache<V, E> {
    completed: Cache<String, V>,
    in_flight: Arc<Mutex<HashMap<String, InFlight<V, E>>>>,
}

impl<V, E> Clone for IdempotencyCache<V, E> {
    fn clone(&self) -> Self {
        Self {
            completed: self.completed.clone(),
            in_flight: Arc::clone(&self.in_flight),
        }
    }
}

impl<V, E> IdempotencyCache<V, E>
where
    V: Clone + Send + Sync + 'static,
    E: From<ComputationLost> + Send + Sync + 'static,
{
    /// Create a cache retaining successes for `ttl`, at most `max_entries`.
    #[must_use]
    pub fn new(ttl: Duration, max_entries: u64) -> Self {
        let completed = Cache::builder()
            .max_capacity(max_entries)
            .time_to_live(ttl)
            .build();
        Self {
            completed,
            in_flight: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Return the stored result for `key`, join an in-flight computation for
    /// it, or run `compute`.
    ///
    /// Blank or absent keys always compute inline and are never stored. Keyed
    /// computations are spawned onto the runtime and run to completion even
    /// if the caller is dropped. Only `Ok` results are stored.
    ///
    /// # Errors
    /// Returns the computation's error, shared among every waiter.
    pub async fn get_or_compute<F>(
        &self,
        key: Option<&str>,
        compute: F,
    ) -> Result<Lookup<V>, Arc<E>>
    where
        F: Future<Output = Result<V, E>> + Send + 'static,
    {
        let Some(key) = key.map(str::trim).filter(|k| !k.is_empty()) else {
            let value = compute.await.map_err(Arc::new)?;
            return Ok(Lookup {
                value,
                replayed: false,
            });
        };

        let (shared, replayed) = {
            let mut in_flight = self.in_flight.lock().await;
            if let Some(value) = self.completed.get(key).await {
                tracing::trace!(dedup_key = key, "dedup hit");
                return Ok(Lookup {
                    value,
                    replayed: true,
                });
            }
            if let Some(existing) = in_flight.get(key) {
                tracing::trace!(dedup_key = key, "joining in-flight computation");
                (existing.clone(), true)
            } else {
                let shared = self.start(key.to_owned(), compute);
                in_flight.insert(key.to_owned(), shared.clone());
                (shared, false)
            }
        };

        shared.await.map(|value| Lookup { value, replayed })
    }

    fn start<F>(&self, key: String, compute: F) -> InFlight<V, E>
    where
        F: Future<Output = Result<V, E>> + Send + 'static,
    {
        let completed = self.completed.clone();
        let in_flight = Arc::clone(&self.in_flight);
        let task = async move {
            let result = match AssertUnwindSafe(compute).catch_unwind().await {
                Ok(result) => result.map_err(Arc::new),
                Err(_) => {
                    tracing::error!(dedup_key = %key, "deduplicated computation panicked");
                    Err(Arc::new(E::from(ComputationLost)))
                }
            };
            if let Ok(value) = &result {
                completed.insert(key.clone(), value.clone()).await;
            }
            in_flight.lock().await.remove(&key);
            result
        };

        let handle = tokio::spawn(task.in_current_span());
        async move {
            handle
                .await
                .unwrap_or_else(|_| Err(Arc::new(E::from(ComputationLost))))
        }
        .boxed()
        .shared()
    }

    /// Number of stored results.
    pub async fn len(&self) -> u64 {
        self.completed.run_pending_tasks().await;
        self.completed.entry_count()
    }

    /// True when no result is stored.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Forget the stored result for `key`.
    pub async fn invalidate(&self, key: &str) {
        self.completed.invalidate(key.trim()).await;
    }
}
