//! # rb-kv-redis
//!
//! Redis implementation of `KeyValueStore` and `OrderedStore`.
//! Counters map to `INCR`, ordered sets to Redis sorted sets.

use std::time::Duration;

use async_trait::async_trait;
use deadpool_redis::redis::{self, AsyncCommands};
use deadpool_redis::{Config, Connection, Pool, Runtime};
use rb_core::error::{AppError, Result};
use rb_core::traits::{KeyValueStore, OrderedStore};
use tracing::{info, warn};

/// Pause between connection attempts during bootstrap.
const RETRY_DELAY: Duration = Duration::from_secs(1);

pub struct RedisStore {
    pool: Pool,
}

fn storage_error(err: impl std::fmt::Display) -> AppError {
    AppError::storage(format!("redis: {err}"))
}

impl RedisStore {
    /// Builds a pool for `addr` (e.g. `redis://127.0.0.1:6379`) and checks it
    /// answers a `PING`.
    pub async fn connect(addr: &str) -> Result<Self> {
        let pool = Config::from_url(addr)
            .create_pool(Some(Runtime::Tokio1))
            .map_err(storage_error)?;
        let store = Self { pool };

        if !store.ping().await {
            return Err(AppError::storage(format!("redis at {addr} did not answer PING")));
        }
        Ok(store)
    }

    /// Keeps trying to connect until `timeout` runs out. `None` means the
    /// caller should fall back to another store.
    pub async fn connect_with_retry(addr: &str, timeout: Duration) -> Option<Self> {
        let attempts = async {
            loop {
                info!("trying connection to redis at {addr}");
                match Self::connect(addr).await {
                    Ok(store) => return store,
                    Err(err) => {
                        warn!("error connecting to redis: {err}");
                        tokio::time::sleep(RETRY_DELAY).await;
                    }
                }
            }
        };

        match tokio::time::timeout(timeout, attempts).await {
            Ok(store) => {
                info!("connected to redis at {addr}");
                Some(store)
            }
            Err(_) => None,
        }
    }

    async fn conn(&self) -> Result<Connection> {
        self.pool.get().await.map_err(storage_error)
    }
}

#[async_trait]
impl KeyValueStore for RedisStore {
    async fn ping(&self) -> bool {
        let Ok(mut conn) = self.conn().await else {
            return false;
        };
        let pong: redis::RedisResult<String> = redis::cmd("PING").query_async(&mut conn).await;
        pong.is_ok()
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut conn = self.conn().await?;
        conn.set::<_, _, ()>(key, value).await.map_err(storage_error)
    }

    async fn set_if_absent(&self, key: &str, value: &str) -> Result<bool> {
        let mut conn = self.conn().await?;
        conn.set_nx::<_, _, bool>(key, value).await.map_err(storage_error)
    }

    async fn get(&self, key: &str) -> Result<String> {
        let mut conn = self.conn().await?;
        conn.get::<_, Option<String>>(key)
            .await
            .map_err(storage_error)?
            .ok_or_else(|| AppError::key_not_found(key))
    }

    async fn remove(&self, key: &str) -> Result<()> {
        let mut conn = self.conn().await?;
        conn.del::<_, ()>(key).await.map_err(storage_error)
    }

    async fn increment(&self, key: &str) -> Result<i64> {
        let mut conn = self.conn().await?;
        conn.incr::<_, _, i64>(key, 1).await.map_err(storage_error)
    }
}

#[async_trait]
impl OrderedStore for RedisStore {
    async fn set_ordered(&self, key: &str, member: &str, score: i64) -> Result<()> {
        let mut conn = self.conn().await?;
        conn.zadd::<_, _, _, ()>(key, member, score)
            .await
            .map_err(storage_error)
    }

    async fn get_all_ordered_by_score(&self, key: &str) -> Result<Vec<String>> {
        let mut conn = self.conn().await?;
        conn.zrevrangebyscore::<_, _, _, Vec<String>>(key, "+inf", "-inf")
            .await
            .map_err(storage_error)
    }

    async fn remove_ordered(&self, key: &str, member: &str) -> Result<()> {
        let mut conn = self.conn().await?;
        conn.zrem::<_, _, ()>(key, member).await.map_err(storage_error)
    }
}
