pub mod adapters;
pub mod concurrency;
pub mod config;
