use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use redis::Script;

use crate::error::CacheError;
use crate::error::Result;
use crate::traits::KvBackend;

const CAS_SCRIPT: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    if tonumber(ARGV[3]) > 0 then
        redis.call('SET', KEYS[1], ARGV[2], 'PX', ARGV[3])
    else
        redis.call('SET', KEYS[1], ARGV[2])
    end
    return 1
end
return 0
"#;

const CAD_SCRIPT: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    return redis.call('DEL', KEYS[1])
end
return 0
"#;

/// Backend shared by any number of processes talking to the same Redis server.
#[derive(Clone)]
pub struct RedisBackend {
    connection: ConnectionManager,
    cas:        Script,
    cad:        Script,
}

impl std::fmt::Debug for RedisBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisBackend").finish_non_exhaustive()
    }
}

impl RedisBackend {
    /// Connect to a server by its URL, e.g. `redis://127.0.0.1:6379/0`.
    pub async fn connect(url: &str) -> Result<Self> {
        let client = redis::Client::open(url).map_err(CacheError::backend)?;
        let connection = ConnectionManager::new(client).await.map_err(CacheError::backend)?;
        Ok(Self::with_connection(connection))
    }

    pub fn with_connection(connection: ConnectionManager) -> Self {
        Self {
            connection,
            cas: Script::new(CAS_SCRIPT),
            cad: Script::new(CAD_SCRIPT),
        }
    }

    fn ttl_millis(ttl: Duration) -> u64 {
        u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX)
    }
}

#[async_trait]
impl KvBackend for RedisBackend {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let mut conn = self.connection.clone();
        conn.get(key).await.map_err(CacheError::backend)
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<bool> {
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(value);
        if !ttl.is_zero() {
            cmd.arg("PX").arg(Self::ttl_millis(ttl));
        }
        let mut conn = self.connection.clone();
        let reply: Option<String> = cmd.query_async(&mut conn).await.map_err(CacheError::backend)?;
        Ok(reply.is_some())
    }

    async fn set_if_absent(&self, key: &str, value: &[u8], ttl: Duration) -> Result<bool> {
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(value).arg("NX");
        if !ttl.is_zero() {
            cmd.arg("PX").arg(Self::ttl_millis(ttl));
        }
        let mut conn = self.connection.clone();
        // Nil reply means the key is already taken.
        let reply: Option<String> = cmd.query_async(&mut conn).await.map_err(CacheError::backend)?;
        Ok(reply.is_some())
    }

    async fn compare_and_swap(&self, key: &str, expected: &[u8], value: &[u8], ttl: Duration) -> Result<bool> {
        let mut conn = self.connection.clone();
        let swapped: i64 = self
            .cas
            .key(key)
            .arg(expected)
            .arg(value)
            .arg(Self::ttl_millis(ttl))
            .invoke_async(&mut conn)
            .await
            .map_err(CacheError::backend)?;
        Ok(swapped == 1)
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let mut conn = self.connection.clone();
        let deleted: usize = conn.del(key).await.map_err(CacheError::backend)?;
        Ok(deleted > 0)
    }

    async fn compare_and_delete(&self, key: &str, expected: &[u8]) -> Result<bool> {
        let mut conn = self.connection.clone();
        let deleted: i64 = self
            .cad
            .key(key)
            .arg(expected)
            .invoke_async(&mut conn)
            .await
            .map_err(CacheError::backend)?;
        Ok(deleted == 1)
    }

    async fn delete_multi(&self, keys: &[String]) -> Result<bool> {
        if keys.is_empty() {
            return Ok(true);
        }
        let mut conn = self.connection.clone();
        let deleted: usize = conn.del(keys).await.map_err(CacheError::backend)?;
        Ok(deleted == keys.len())
    }
}
