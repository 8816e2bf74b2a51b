//! Key-value store abstraction: typed operations over a remote key-value server
//! providing string GET/SET with TTL, sets, sorted sets (score = due time), counters,
//! and existence checks.
//!
//! Modeled as an explicit trait rather than a process-wide singleton so that
//! background tasks and handlers take it by reference, and tests substitute an
//! in-memory implementation.

pub mod memory;
pub mod redis_kvs;

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

pub use memory::InMemoryKvs;
pub use redis_kvs::RedisKvs;

#[derive(Debug, Error)]
pub enum KvsError {
    #[error("kvs connection error: {0}")]
    Connection(String),
    #[error("kvs operation error: {0}")]
    Operation(String),
}

/// A single sorted-set member with its score, ordered ascending by score.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredMember {
    pub member: String,
    pub score: f64,
}

/// Typed operations over a remote key-value server.
#[async_trait]
pub trait Kvs: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, KvsError>;
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), KvsError>;
    async fn delete(&self, key: &str) -> Result<(), KvsError>;
    async fn exists(&self, key: &str) -> Result<bool, KvsError>;
    async fn ttl(&self, key: &str) -> Result<Option<Duration>, KvsError>;
    async fn expire(&self, key: &str, ttl: Duration) -> Result<(), KvsError>;

    async fn incr(&self, key: &str) -> Result<i64, KvsError>;

    async fn set_add(&self, key: &str, member: &str) -> Result<(), KvsError>;
    async fn set_remove(&self, key: &str, member: &str) -> Result<(), KvsError>;
    async fn set_members(&self, key: &str) -> Result<Vec<String>, KvsError>;

    async fn sorted_set_add(&self, key: &str, member: &str, score: f64) -> Result<(), KvsError>;
    async fn sorted_set_remove(&self, key: &str, member: &str) -> Result<(), KvsError>;
    /// Returns the member with the smallest score, or `None` if the set is empty.
    async fn sorted_set_min(&self, key: &str) -> Result<Option<ScoredMember>, KvsError>;
    async fn sorted_set_card(&self, key: &str) -> Result<u64, KvsError>;
    /// Returns all members in ascending score order.
    async fn sorted_set_range_all(&self, key: &str) -> Result<Vec<ScoredMember>, KvsError>;
}
