//! Redis-backed storage for thronglets.
//!
//! [`RedisStorage`] implements the core [`Storage`](thronglets_core::Storage)
//! trait on a single Redis database. Agents, tasks and messages carry
//! configurable expiry so abandoned registrations and queues age out.
//!
//! # Key Types
//!
//! - [`RedisStorage`] - networked storage backend
//! - [`RedisConfig`] - connection, key prefix and TTL settings

pub mod config;
mod keys;
pub mod storage;

pub use config::RedisConfig;
pub use storage::RedisStorage;
