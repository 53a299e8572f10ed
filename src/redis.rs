use std::sync::Arc;

use deadpool::managed::QueueMode;
use deadpool_redis::{Config as DeadpoolConfig, Pool, PoolConfig, Runtime, Timeouts};
use redis::AsyncCommands;

use crate::error::{Result, TutorError};

/// Redis connection manager
#[derive(Clone)]
pub struct RedisManager {
    pool: Arc<Pool>,
}

impl RedisManager {
    /// Create a new Redis manager with configuration
    pub async fn new_with_config(config: &crate::config::Config) -> Result<Self> {
        let redis_url = config.get_redis_url();

        tracing::info!(
            "Connecting to Redis at {}:{} (db: {})",
            config.redis.host,
            config.redis.port,
            config.redis.database
        );

        let mut cfg = DeadpoolConfig::from_url(&redis_url);
        cfg.pool = Some(PoolConfig {
            max_size: config.redis.pool.max_size,
            timeouts: Timeouts {
                wait: Some(config.get_pool_timeout()),
                create: Some(config.get_pool_create_timeout()),
                recycle: Some(config.get_pool_recycle_timeout()),
            },
            queue_mode: QueueMode::Fifo,
        });

        let pool = cfg
            .create_pool(Some(Runtime::Tokio1))
            .map_err(|e| TutorError::PoolCreation(e.to_string()))?;

        let manager = Self {
            pool: Arc::new(pool),
        };
        manager.ping().await?;
        tracing::info!("Redis connection established");

        Ok(manager)
    }

    /// Get a connection from the pool
    pub async fn get_connection(&self) -> Result<deadpool_redis::Connection> {
        Ok(self.pool.get().await?)
    }

    pub async fn ping(&self) -> Result<()> {
        let mut conn = self.get_connection().await?;
        let _: String = redis::cmd("PING").query_async(&mut *conn).await?;
        Ok(())
    }

    /// Read a JSON document stored as a plain string
    pub async fn get_json<T: serde::de::DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let mut conn = self.get_connection().await?;
        let raw: Option<String> = conn.get(key).await?;
        raw.map(|s| serde_json::from_str(&s).map_err(TutorError::from))
            .transpose()
    }

    pub async fn get_string(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.get_connection().await?;
        Ok(conn.get(key).await?)
    }

    /// `SET key value NX EX ttl`; true when the key was written
    pub async fn set_nx_ex(&self, key: &str, value: &str, ttl_seconds: u64) -> Result<bool> {
        let mut conn = self.get_connection().await?;
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("NX")
            .arg("EX")
            .arg(ttl_seconds)
            .query_async(&mut *conn)
            .await?;
        Ok(reply.is_some())
    }

    /// Add a scored member to an index set and store its payload in a hash, atomically
    pub async fn index_payload(
        &self,
        index_key: &str,
        data_key: &str,
        member: &str,
        score: i64,
        payload: &str,
    ) -> Result<()> {
        let mut conn = self.get_connection().await?;
        redis::pipe()
            .atomic()
            .zadd(index_key, member, score)
            .ignore()
            .hset(data_key, member, payload)
            .ignore()
            .query_async::<()>(&mut *conn)
            .await?;
        Ok(())
    }

    /// Payloads ordered by descending score. Members whose payload vanished are skipped.
    pub async fn payloads_newest_first(&self, index_key: &str, data_key: &str) -> Result<Vec<String>> {
        let mut conn = self.get_connection().await?;
        let members: Vec<String> = conn.zrevrange(index_key, 0, -1).await?;
        if members.is_empty() {
            return Ok(Vec::new());
        }
        let payloads: Vec<Option<String>> = redis::cmd("HMGET")
            .arg(data_key)
            .arg(&members)
            .query_async(&mut *conn)
            .await?;
        Ok(payloads.into_iter().flatten().collect())
    }

    pub async fn remove_payloads(&self, index_key: &str, data_key: &str, members: &[String]) -> Result<()> {
        if members.is_empty() {
            return Ok(());
        }
        let mut conn = self.get_connection().await?;
        redis::pipe()
            .atomic()
            .zrem(index_key, members)
            .ignore()
            .hdel(data_key, members)
            .ignore()
            .query_async::<()>(&mut *conn)
            .await?;
        Ok(())
    }

    /// Record a timestamped event and drop events older than `keep_after`
    pub async fn record_event(&self, key: &str, member: &str, score: i64, keep_after: i64) -> Result<()> {
        let mut conn = self.get_connection().await?;
        redis::pipe()
            .zadd(key, member, score)
            .ignore()
            .zrembyscore(key, "-inf", format!("({keep_after}"))
            .ignore()
            .query_async::<()>(&mut *conn)
            .await?;
        Ok(())
    }

    /// Count of events with score >= `since` and the highest score, if any
    pub async fn event_window(&self, key: &str, since: i64) -> Result<(u32, Option<i64>)> {
        let mut conn = self.get_connection().await?;
        let count: u32 = conn.zcount(key, since, "+inf").await?;
        let latest: Vec<(String, i64)> = conn.zrevrange_withscores(key, 0, 0).await?;
        Ok((count, latest.into_iter().next().map(|(_, score)| score)))
    }
}
