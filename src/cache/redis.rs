use anyhow::{Context, Result};
use deadpool_redis::{Config, Pool, Runtime};
use std::time::Duration;
use tracing::{debug, info};

const RELEASE_SCRIPT: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    return redis.call('DEL', KEYS[1])
else
    return 0
end
"#;

pub struct RedisManager {
    pool: Pool,
    key_prefix: String,
}

impl RedisManager {
    pub async fn new(url: &str, key_prefix: &str) -> Result<Self> {
        let cfg = Config::from_url(url);
        let pool = cfg
            .create_pool(Some(Runtime::Tokio1))
            .context("Failed to create Redis connection pool")?;

        // Test connection
        let mut conn = pool.get().await?;
        redis::cmd("PING").query_async::<_, String>(&mut conn).await?;

        info!("Connected to Redis successfully");

        Ok(Self {
            pool,
            key_prefix: key_prefix.to_string(),
        })
    }

    pub fn lock_key(&self, name: &str) -> String {
        format!("{}:lock:{}", self.key_prefix, name)
    }

    /// `SET key token NX EX ttl`. Returns true when this caller now holds the lock.
    pub async fn try_acquire_lock(&self, key: &str, token: &str, ttl: Duration) -> Result<bool> {
        let mut conn = self.pool.get().await?;
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(token)
            .arg("NX")
            .arg("EX")
            .arg(ttl.as_secs().max(1))
            .query_async(&mut conn)
            .await?;

        let acquired = reply.is_some();
        debug!("Lock {} acquire attempt: {}", key, acquired);
        Ok(acquired)
    }

    /// Deletes the lock only if it still carries our token.
    pub async fn release_lock(&self, key: &str, token: &str) -> Result<bool> {
        let mut conn = self.pool.get().await?;
        let removed: i32 = redis::Script::new(RELEASE_SCRIPT)
            .key(key)
            .arg(token)
            .invoke_async(&mut conn)
            .await?;
        Ok(removed == 1)
    }
}
