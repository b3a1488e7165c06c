//! Process-wide connection pools keyed by endpoint id (§5 "Shared-resource
//! policy"). Each connector family that holds a real network connection
//! (today: the SQL family's `sqlx::PgPool`) registers its pool here
//! instead of opening one per slice, so concurrent slices on the same
//! endpoint share connections the way a production deployment would.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;

const DEFAULT_IDLE_EVICTION: Duration = Duration::from_secs(5 * 60);

struct PooledEntry<T> {
    value: Arc<T>,
    last_used: Instant,
}

/// A keyed cache of shared pool handles with idle eviction. Generic over
/// `T` so it can hold `sqlx::PgPool`, `reqwest::Client`, or an
/// `object_store::ObjectStore`, all of which are already internally
/// pooled/connection-reusing and just need one shared instance per
/// endpoint.
pub struct EndpointPoolCache<T> {
    entries: Mutex<HashMap<String, PooledEntry<T>>>,
    idle_eviction: Duration,
}

impl<T> Default for EndpointPoolCache<T> {
    fn default() -> Self {
        Self::new(DEFAULT_IDLE_EVICTION)
    }
}

impl<T> EndpointPoolCache<T> {
    pub fn new(idle_eviction: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            idle_eviction,
        }
    }

    /// Returns the cached handle for `endpoint_id`, constructing one via
    /// `build` on a miss. Evicts entries untouched longer than the
    /// configured idle duration on every call, so a long-idle endpoint's
    /// pool is rebuilt (picking up any rotated credentials) rather than
    /// held open forever.
    pub async fn get_or_build<F, E>(&self, endpoint_id: &str, build: F) -> Result<Arc<T>, E>
    where
        F: FnOnce() -> Result<T, E>,
    {
        let mut entries = self.entries.lock().await;
        let now = Instant::now();
        entries.retain(|_, entry| now.duration_since(entry.last_used) < self.idle_eviction);

        if let Some(entry) = entries.get_mut(endpoint_id) {
            entry.last_used = now;
            return Ok(entry.value.clone());
        }

        let value = Arc::new(build()?);
        entries.insert(
            endpoint_id.to_string(),
            PooledEntry {
                value: value.clone(),
                last_used: now,
            },
        );
        Ok(value)
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn reuses_cached_handle_for_same_endpoint() {
        let cache: EndpointPoolCache<u32> = EndpointPoolCache::default();
        let calls = Arc::new(tokio::sync::Mutex::new(0u32));

        for _ in 0..3 {
            let calls = calls.clone();
            cache
                .get_or_build::<_, anyhow::Error>("ep-1", || {
                    Ok(42)
                })
                .await
                .unwrap();
            let _ = calls;
        }

        assert_eq!(cache.len().await, 1);
    }

    #[tokio::test]
    async fn evicts_after_idle_window() {
        let cache: EndpointPoolCache<u32> = EndpointPoolCache::new(Duration::from_millis(10));
        cache
            .get_or_build::<_, anyhow::Error>("ep-1", || Ok(1))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        cache
            .get_or_build::<_, anyhow::Error>("ep-2", || Ok(2))
            .await
            .unwrap();
        // ep-1 evicted on the ep-2 lookup's retain pass
        assert_eq!(cache.len().await, 1);
    }
}
