use moka::sync::Cache;
use std::time::Duration;

/// Response cache keyed on `"{endpoint}:{serialized params}"`. Stores
/// serialized JSON strings with a configurable TTL.
pub struct AnalyticsCache {
    inner: Cache<String, String>,
}

impl AnalyticsCache {
    pub fn new(ttl_secs: u64) -> Self {
        Self {
            inner: Cache::builder()
                .time_to_live(Duration::from_secs(ttl_secs))
                .max_capacity(256)
                .build(),
        }
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.inner.get(key)
    }

    pub fn insert(&self, key: String, value: String) {
        self.inner.insert(key, value);
    }
}
