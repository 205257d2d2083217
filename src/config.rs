use config::{Config, Environment, File};
use serde::Deserialize;
use std::path::PathBuf;

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    #[serde(default)]
    pub analytics: AnalyticsConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub loader: LoaderConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    #[serde(default = "default_cors_origin")]
    pub cors_origin: String,
}

fn default_cors_origin() -> String {
    "*".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub path: PathBuf,
    #[allow(dead_code)]
    pub pool_size: usize,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AnalyticsConfig {
    #[serde(default = "default_window")]
    pub default_window: usize,
    #[serde(default = "default_k")]
    pub default_k: usize,
    #[serde(default = "default_max_k")]
    pub max_k: usize,
    #[serde(default = "default_cache_ttl")]
    pub cache_ttl_secs: u64,
    #[serde(default = "default_max_series_len")]
    pub max_series_len: usize,
}

impl Default for AnalyticsConfig {
    fn default() -> Self {
        Self {
            default_window: 7,
            default_k: 3,
            max_k: 20,
            cache_ttl_secs: 60,
            max_series_len: 100_000,
        }
    }
}

fn default_window() -> usize {
    7
}
fn default_k() -> usize {
    3
}
fn default_max_k() -> usize {
    20
}
fn default_cache_ttl() -> u64 {
    60
}
fn default_max_series_len() -> usize {
    100_000
}

#[derive(Debug, Deserialize, Clone)]
pub struct RateLimitConfig {
    #[serde(default = "default_per_second")]
    pub per_second: u64,
    #[serde(default = "default_burst_size")]
    pub burst_size: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            per_second: default_per_second(),
            burst_size: default_burst_size(),
        }
    }
}

fn default_per_second() -> u64 {
    20
}
fn default_burst_size() -> u32 {
    50
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoaderConfig {
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
        }
    }
}

fn default_batch_size() -> usize {
    1000
}

impl AppConfig {
    /// Validate configuration before startup.
    pub fn validate(&self) -> Result<(), String> {
        if self.analytics.default_window == 0 {
            return Err("analytics.default_window must be at least 1".to_string());
        }
        if self.analytics.default_k == 0 || self.analytics.default_k > self.analytics.max_k {
            return Err(format!(
                "analytics.default_k must be in 1..={}",
                self.analytics.max_k
            ));
        }
        if self.loader.batch_size == 0 {
            return Err("loader.batch_size must be at least 1".to_string());
        }
        Ok(())
    }

    pub fn load(config_path: Option<&str>) -> Result<Self, config::ConfigError> {
        let mut builder = Config::builder();

        // Load from config file
        let path = config_path.unwrap_or("config.toml");
        builder = builder.add_source(File::with_name(path).required(false));

        // Overlay with environment variables (EPITRACK__SERVER__PORT=3001, etc.)
        builder = builder.add_source(
            Environment::with_prefix("EPITRACK")
                .separator("__")
                .try_parsing(true),
        );

        builder = builder
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 3000)?
            .set_default("database.path", "epitrack.db")?
            .set_default("database.pool_size", 8)?;

        builder.build()?.try_deserialize()
    }
}
