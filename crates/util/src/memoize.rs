//! Keyed single-flight memoization for expensive lookups.
//!
//! Concurrent callers asking for the same key wait on one evaluation and share
//! its result. Failed evaluations are never stored, so the next caller retries.
//! Entries live forever or expire after a time-to-live, in which case a
//! background task periodically drops stale entries.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::sync::OnceCell;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::debug;

/// Retention policy for memoized values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Policy {
    #[default]
    Forever,
    /// Values older than `ttl` are recomputed; stale entries are swept every `cleanup_interval`.
    Expiring { ttl: Duration, cleanup_interval: Duration },
}

impl Policy {
    fn ttl(&self) -> Option<Duration> {
        match self {
            Policy::Forever => None,
            Policy::Expiring { ttl, .. } => Some(*ttl),
        }
    }
}

#[derive(Debug)]
struct Stamped<V> {
    value: V,
    stored_at: Instant,
}

type Slot<V> = Arc<OnceCell<Stamped<V>>>;

#[derive(Debug)]
struct Inner<V> {
    policy: Policy,
    entries: Mutex<HashMap<String, Slot<V>>>,
}

impl<V> Inner<V> {
    fn is_stale(&self, slot: &Slot<V>) -> bool {
        match (self.policy.ttl(), slot.get()) {
            (Some(ttl), Some(stamped)) => stamped.stored_at.elapsed() >= ttl,
            _ => false,
        }
    }

    fn sweep(&self) -> usize {
        let mut entries = self.entries.lock().expect("memoizer lock poisoned");
        let before = entries.len();
        entries.retain(|_, slot| {
            let abandoned = !slot.initialized() && Arc::strong_count(slot) == 1;
            !abandoned && !self.is_stale(slot)
        });
        before - entries.len()
    }
}

/// Memoizes values of type `V` by string key.
#[derive(Debug, Clone)]
pub struct Memoizer<V> {
    inner: Arc<Inner<V>>,
}

impl<V> Memoizer<V>
where
    V: Clone + Send + Sync + 'static,
{
    /// A memoizer that keeps successful results until flushed.
    pub fn forever() -> Self {
        Self::new(Policy::Forever)
    }

    /// A memoizer whose results expire after `ttl`.
    pub fn expiring(ttl: Duration, cleanup_interval: Duration) -> Self {
        Self::new(Policy::Expiring { ttl, cleanup_interval })
    }

    /// Create a memoizer with the given policy.
    ///
    /// Periodic cleanup needs a Tokio runtime; outside of one, stale entries
    /// are only replaced when their key is requested again.
    pub fn new(policy: Policy) -> Self {
        let inner = Arc::new(Inner {
            policy,
            entries: Mutex::new(HashMap::new()),
        });

        if let Policy::Expiring { cleanup_interval, .. } = policy {
            match Handle::try_current() {
                Ok(handle) => {
                    handle.spawn(run_cleanup(Arc::downgrade(&inner), cleanup_interval));
                }
                Err(_) => debug!("no async runtime available; memoizer cleanup disabled"),
            }
        }

        Self { inner }
    }

    pub fn policy(&self) -> Policy {
        self.inner.policy
    }

    /// Return the value for `key`, computing it with `compute` when absent.
    ///
    /// The boolean is `true` when the value came from the cache. Errors go
    /// only to the caller whose `compute` failed and are not remembered;
    /// callers queued behind a failed evaluation run their own `compute`.
    pub async fn memoize<F, Fut, E>(&self, key: &str, compute: F) -> Result<(V, bool), E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        let slot = self.slot(key);
        let mut computed = false;
        let computed_flag = &mut computed;
        let stamped = slot
            .get_or_try_init(|| async move {
                *computed_flag = true;
                compute().await.map(|value| Stamped {
                    value,
                    stored_at: Instant::now(),
                })
            })
            .await?;

        if computed {
            debug!(cache_key = %key, "memoizer cache miss");
        } else {
            debug!(cache_key = %key, "memoizer cache hit");
        }
        Ok((stamped.value.clone(), !computed))
    }

    /// Cached value for `key` if one is present and fresh.
    pub fn get(&self, key: &str) -> Option<V> {
        let entries = self.inner.entries.lock().expect("memoizer lock poisoned");
        let slot = entries.get(key)?;
        if self.inner.is_stale(slot) {
            return None;
        }
        slot.get().map(|stamped| stamped.value.clone())
    }

    /// Drop the entry for `key`.
    pub fn forget(&self, key: &str) {
        self.inner.entries.lock().expect("memoizer lock poisoned").remove(key);
    }

    /// Drop every entry.
    ///
    /// Evaluations already in flight still complete and hand their result to
    /// the callers waiting on them; the result is simply not retained.
    pub fn flush(&self) {
        self.inner.entries.lock().expect("memoizer lock poisoned").clear();
    }

    /// Remove stale and abandoned entries now, returning how many were dropped.
    pub fn cleanup(&self) -> usize {
        self.inner.sweep()
    }

    pub fn len(&self) -> usize {
        self.inner.entries.lock().expect("memoizer lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn slot(&self, key: &str) -> Slot<V> {
        let mut entries = self.inner.entries.lock().expect("memoizer lock poisoned");
        if let Some(existing) = entries.get(key)
            && !self.inner.is_stale(existing)
        {
            return existing.clone();
        }
        let fresh: Slot<V> = Arc::new(OnceCell::new());
        entries.insert(key.to_string(), fresh.clone());
        fresh
    }
}

async fn run_cleanup<V>(inner: Weak<Inner<V>>, every: Duration) {
    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker.tick().await;
    loop {
        ticker.tick().await;
        let Some(inner) = inner.upgrade() else {
            break;
        };
        let removed = inner.sweep();
        if removed > 0 {
            debug!(removed, "memoizer cleanup dropped stale entries");
        }
    }
}
