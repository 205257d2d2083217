pub mod cache;
pub mod cluster;
pub mod epi;
pub mod handler;
pub mod rolling;
pub mod series;
pub mod stats;

use crate::config::AnalyticsConfig;
use cache::AnalyticsCache;
use deadpool_sqlite::Pool;

/// Shared state for analytics endpoints.
pub struct AnalyticsState {
    pub pool: Pool,
    pub cache: AnalyticsCache,
    pub config: AnalyticsConfig,
}

impl AnalyticsState {
    pub fn new(pool: Pool, config: AnalyticsConfig) -> Self {
        let cache = AnalyticsCache::new(config.cache_ttl_secs);
        Self {
            pool,
            cache,
            config,
        }
    }
}
