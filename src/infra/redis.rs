// RedisClient - Redis客户端实现
// 基于 bb8-redis 连接池

use bb8::Pool;
use bb8_redis::RedisConnectionManager;
use redis::{AsyncCommands, FromRedisValue, Script};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::config::RedisConfig;
use crate::error::{Result, ServerError};

/// Redis 客户端（基于连接池）
pub struct RedisClient {
    pool: Arc<Pool<RedisConnectionManager>>,
    /// 单条 Redis 命令的执行超时
    command_timeout: Duration,
}

impl RedisClient {
    /// 创建新的 Redis 客户端（从 RedisConfig 配置）
    pub async fn new(config: &RedisConfig) -> Result<Self> {
        let manager = RedisConnectionManager::new(config.url.clone()).map_err(|e| {
            ServerError::Configuration(format!("Failed to create Redis manager: {}", e))
        })?;

        let pool = Pool::builder()
            .max_size(config.pool_size)
            .min_idle(config.min_idle)
            .connection_timeout(config.connection_timeout())
            .idle_timeout(config.idle_timeout_secs.map(Duration::from_secs))
            .build(manager)
            .await
            .map_err(|e| ServerError::Cache(format!("Failed to create Redis pool: {}", e)))?;

        // 测试连接
        {
            let mut conn = pool
                .get()
                .await
                .map_err(|e| ServerError::Cache(format!("Failed to get Redis connection: {}", e)))?;
            let _: String = conn.ping().await?;
        }

        tracing::info!(
            "✅ Redis 连接池已创建 (pool_size={}, min_idle={:?}, conn_timeout={}s, cmd_timeout={}ms)",
            config.pool_size,
            config.min_idle,
            config.connection_timeout_secs,
            config.command_timeout_ms,
        );

        Ok(Self {
            pool: Arc::new(pool),
            command_timeout: config.command_timeout(),
        })
    }

    async fn get_conn(&self) -> Result<bb8::PooledConnection<'_, RedisConnectionManager>> {
        self.pool
            .get()
            .await
            .map_err(|e| ServerError::Cache(format!("Failed to get Redis connection: {}", e)))
    }

    /// 执行带超时的 Redis 操作
    async fn with_timeout<F, T>(&self, op: F) -> Result<T>
    where
        F: std::future::Future<Output = Result<T>>,
    {
        tokio::time::timeout(self.command_timeout, op)
            .await
            .map_err(|_| {
                ServerError::Timeout(format!(
                    "Redis command timeout ({}ms)",
                    self.command_timeout.as_millis()
                ))
            })?
    }

    /// MGET keys
    pub async fn mget(&self, keys: &[String]) -> Result<Vec<Option<String>>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        self.with_timeout(async {
            let mut conn = self.get_conn().await?;
            let values: Vec<Option<String>> = redis::cmd("MGET")
                .arg(keys)
                .query_async(&mut *conn)
                .await?;
            Ok(values)
        })
        .await
    }

    /// SET key value（ttl 为 None 时不过期）
    pub async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()> {
        self.with_timeout(async {
            let mut conn = self.get_conn().await?;
            match ttl {
                Some(ttl) => conn.set_ex::<_, _, ()>(key, value, ttl.as_secs().max(1)).await?,
                None => conn.set::<_, _, ()>(key, value).await?,
            }
            Ok(())
        })
        .await
    }

    /// DEL key，返回删除数量
    pub async fn del(&self, key: &str) -> Result<u64> {
        self.with_timeout(async {
            let mut conn = self.get_conn().await?;
            Ok(conn.del(key).await?)
        })
        .await
    }

    /// HGET key field
    pub async fn hget(&self, key: &str, field: &str) -> Result<Option<String>> {
        self.with_timeout(async {
            let mut conn = self.get_conn().await?;
            Ok(conn.hget(key, field).await?)
        })
        .await
    }

    /// HGETALL key
    pub async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>> {
        self.with_timeout(async {
            let mut conn = self.get_conn().await?;
            Ok(conn.hgetall(key).await?)
        })
        .await
    }

    /// 执行 Lua 脚本（EVALSHA，未加载时自动回退 EVAL）
    pub async fn run_script<T>(&self, script: &Script, keys: &[&str], args: &[String]) -> Result<T>
    where
        T: FromRedisValue + Send,
    {
        self.with_timeout(async {
            let mut conn = self.get_conn().await?;
            let mut invocation = script.prepare_invoke();
            for key in keys {
                invocation.key(*key);
            }
            for arg in args {
                invocation.arg(arg.as_str());
            }
            Ok(invocation.invoke_async(&mut *conn).await?)
        })
        .await
    }
}
