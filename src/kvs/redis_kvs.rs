//! Redis-backed [`Kvs`] implementation.
//!
//! Follows the teacher's own idiom of opening a multiplexed async connection per
//! operation off a shared [`redis::Client`] rather than a connection pool.

use std::time::Duration;

use async_trait::async_trait;
use redis::AsyncCommands;

use super::{Kvs, KvsError, ScoredMember};

#[derive(Clone)]
pub struct RedisKvs {
    client: redis::Client,
}

impl RedisKvs {
    /// Opens a client for `url`. If `password` is set and the URL does not already
    /// embed one, it is attached to the parsed connection info before the client is
    /// constructed (the URL itself is never mutated, since it may have a username
    /// with no password, which `ConnectionInfo` represents distinctly from "no auth").
    pub fn new(url: &str, password: Option<&str>) -> Result<Self, KvsError> {
        use redis::IntoConnectionInfo;

        let mut info = url
            .into_connection_info()
            .map_err(|e| KvsError::Connection(e.to_string()))?;

        if let Some(password) = password {
            if info.redis.password.is_none() {
                info.redis.password = Some(password.to_string());
            }
        }

        let client = redis::Client::open(info).map_err(|e| KvsError::Connection(e.to_string()))?;
        Ok(Self { client })
    }

    async fn conn(&self) -> Result<redis::aio::MultiplexedConnection, KvsError> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| KvsError::Connection(e.to_string()))
    }

    /// Pings the server; used by the `/health` endpoint to report `kvs: connected|disconnected`.
    pub async fn ping(&self) -> bool {
        match self.conn().await {
            Ok(mut conn) => redis::cmd("PING")
                .query_async::<String>(&mut conn)
                .await
                .is_ok(),
            Err(_) => false,
        }
    }
}

#[async_trait]
impl Kvs for RedisKvs {
    async fn get(&self, key: &str) -> Result<Option<String>, KvsError> {
        let mut conn = self.conn().await?;
        conn.get(key)
            .await
            .map_err(|e| KvsError::Operation(e.to_string()))
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), KvsError> {
        let mut conn = self.conn().await?;
        match ttl {
            Some(ttl) => conn
                .set_ex::<_, _, ()>(key, value, ttl.as_secs().max(1))
                .await
                .map_err(|e| KvsError::Operation(e.to_string())),
            None => conn
                .set::<_, _, ()>(key, value)
                .await
                .map_err(|e| KvsError::Operation(e.to_string())),
        }
    }

    async fn delete(&self, key: &str) -> Result<(), KvsError> {
        let mut conn = self.conn().await?;
        conn.del::<_, ()>(key)
            .await
            .map_err(|e| KvsError::Operation(e.to_string()))
    }

    async fn exists(&self, key: &str) -> Result<bool, KvsError> {
        let mut conn = self.conn().await?;
        conn.exists(key)
            .await
            .map_err(|e| KvsError::Operation(e.to_string()))
    }

    async fn ttl(&self, key: &str) -> Result<Option<Duration>, KvsError> {
        let mut conn = self.conn().await?;
        let seconds: i64 = conn
            .ttl(key)
            .await
            .map_err(|e| KvsError::Operation(e.to_string()))?;
        Ok(if seconds >= 0 {
            Some(Duration::from_secs(seconds as u64))
        } else {
            None
        })
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<(), KvsError> {
        let mut conn = self.conn().await?;
        conn.expire::<_, ()>(key, ttl.as_secs().max(1) as i64)
            .await
            .map_err(|e| KvsError::Operation(e.to_string()))
    }

    async fn incr(&self, key: &str) -> Result<i64, KvsError> {
        let mut conn = self.conn().await?;
        conn.incr(key, 1)
            .await
            .map_err(|e| KvsError::Operation(e.to_string()))
    }

    async fn set_add(&self, key: &str, member: &str) -> Result<(), KvsError> {
        let mut conn = self.conn().await?;
        conn.sadd::<_, _, ()>(key, member)
            .await
            .map_err(|e| KvsError::Operation(e.to_string()))
    }

    async fn set_remove(&self, key: &str, member: &str) -> Result<(), KvsError> {
        let mut conn = self.conn().await?;
        conn.srem::<_, _, ()>(key, member)
            .await
            .map_err(|e| KvsError::Operation(e.to_string()))
    }

    async fn set_members(&self, key: &str) -> Result<Vec<String>, KvsError> {
        let mut conn = self.conn().await?;
        conn.smembers(key)
            .await
            .map_err(|e| KvsError::Operation(e.to_string()))
    }

    async fn sorted_set_add(&self, key: &str, member: &str, score: f64) -> Result<(), KvsError> {
        let mut conn = self.conn().await?;
        conn.zadd::<_, _, _, ()>(key, member, score)
            .await
            .map_err(|e| KvsError::Operation(e.to_string()))
    }

    async fn sorted_set_remove(&self, key: &str, member: &str) -> Result<(), KvsError> {
        let mut conn = self.conn().await?;
        conn.zrem::<_, _, ()>(key, member)
            .await
            .map_err(|e| KvsError::Operation(e.to_string()))
    }

    async fn sorted_set_min(&self, key: &str) -> Result<Option<ScoredMember>, KvsError> {
        let mut conn = self.conn().await?;
        let result: Vec<(String, f64)> = conn
            .zrange_withscores(key, 0, 0)
            .await
            .map_err(|e| KvsError::Operation(e.to_string()))?;
        Ok(result
            .into_iter()
            .next()
            .map(|(member, score)| ScoredMember { member, score }))
    }

    async fn sorted_set_card(&self, key: &str) -> Result<u64, KvsError> {
        let mut conn = self.conn().await?;
        conn.zcard(key)
            .await
            .map_err(|e| KvsError::Operation(e.to_string()))
    }

    async fn sorted_set_range_all(&self, key: &str) -> Result<Vec<ScoredMember>, KvsError> {
        let mut conn = self.conn().await?;
        let result: Vec<(String, f64)> = conn
            .zrange_withscores(key, 0, -1)
            .await
            .map_err(|e| KvsError::Operation(e.to_string()))?;
        Ok(result
            .into_iter()
            .map(|(member, score)| ScoredMember { member, score })
            .collect())
    }
}
