pub mod analytics;
pub mod config;
pub mod error;
pub mod loader;
pub mod records;
pub mod storage;
pub mod types;
