use redis::AsyncCommands;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::Mutex;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),
    #[error("corrupt cache entry: {0}")]
    Corrupt(#[from] serde_json::Error),
}

/// Short-lived key/value storage for pending signups and reset codes.
pub enum OtpCache {
    Redis(RedisCache),
    Memory(MemoryCache),
}

impl OtpCache {
    pub fn redis(url: &str, prefix: String) -> Result<Self, CacheError> {
        Ok(Self::Redis(RedisCache::new(url, prefix)?))
    }

    pub fn memory(prefix: String) -> Self {
        Self::Memory(MemoryCache::new(prefix))
    }

    pub async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        match self {
            Self::Redis(cache) => cache.get(key).await,
            Self::Memory(cache) => Ok(cache.get(key).await),
        }
    }

    pub async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError> {
        match self {
            Self::Redis(cache) => cache.set_ex(key, value, ttl).await,
            Self::Memory(cache) => {
                cache.set_ex(key, value, ttl).await;
                Ok(())
            }
        }
    }

    pub async fn del(&self, key: &str) -> Result<(), CacheError> {
        match self {
            Self::Redis(cache) => cache.del(key).await,
            Self::Memory(cache) => {
                cache.del(key).await;
                Ok(())
            }
        }
    }
}

pub struct RedisCache {
    client: redis::Client,
    connection: Mutex<Option<redis::aio::ConnectionManager>>,
    prefix: String,
}

impl RedisCache {
    pub fn new(url: &str, prefix: String) -> Result<Self, redis::RedisError> {
        let client = redis::Client::open(url)?;
        Ok(Self {
            client,
            connection: Mutex::new(None),
            prefix,
        })
    }

    fn key(&self, key: &str) -> String {
        format!("{}{}", self.prefix, key)
    }

    async fn ensure_connection(
        &self,
    ) -> Result<tokio::sync::MutexGuard<'_, Option<redis::aio::ConnectionManager>>, redis::RedisError>
    {
        let mut guard = self.connection.lock().await;
        if guard.is_none() {
            *guard = Some(self.client.get_connection_manager().await?);
        }
        Ok(guard)
    }

    pub async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let mut guard = self.ensure_connection().await.inspect_err(|err| {
            tracing::warn!("Redis cache connection failed: {err}");
        })?;
        let Some(conn) = guard.as_mut() else {
            return Ok(None);
        };
        let result: redis::RedisResult<Option<String>> = conn.get(self.key(key)).await;
        result.map_err(|err| {
            tracing::warn!("Redis cache get failed: {err}");
            *guard = None;
            err.into()
        })
    }

    pub async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError> {
        let mut guard = self.ensure_connection().await.inspect_err(|err| {
            tracing::warn!("Redis cache connection failed: {err}");
        })?;
        let Some(conn) = guard.as_mut() else {
            return Ok(());
        };
        let ttl = ttl.as_secs().max(1);
        let result: redis::RedisResult<()> = conn.set_ex(self.key(key), value, ttl).await;
        result.map_err(|err| {
            tracing::warn!("Redis cache set failed: {err}");
            *guard = None;
            err.into()
        })
    }

    pub async fn del(&self, key: &str) -> Result<(), CacheError> {
        let mut guard = self.ensure_connection().await.inspect_err(|err| {
            tracing::warn!("Redis cache connection failed: {err}");
        })?;
        let Some(conn) = guard.as_mut() else {
            return Ok(());
        };
        let result: redis::RedisResult<()> = conn.del(self.key(key)).await;
        result.map_err(|err| {
            tracing::warn!("Redis cache del failed: {err}");
            *guard = None;
            err.into()
        })
    }
}

/// In-process stand-in used when no Redis URL is configured.
pub struct MemoryCache {
    entries: Mutex<HashMap<String, (String, Instant)>>,
    prefix: String,
}

impl MemoryCache {
    pub fn new(prefix: String) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            prefix,
        }
    }

    fn key(&self, key: &str) -> String {
        format!("{}{}", self.prefix, key)
    }

    pub async fn get(&self, key: &str) -> Option<String> {
        let mut entries = self.entries.lock().await;
        let now = Instant::now();
        entries.retain(|_, (_, expires_at)| *expires_at > now);
        entries.get(&self.key(key)).map(|(value, _)| value.clone())
    }

    pub async fn set_ex(&self, key: &str, value: &str, ttl: Duration) {
        let expires_at = Instant::now() + ttl.max(Duration::from_secs(1));
        self.entries
            .lock()
            .await
            .insert(self.key(key), (value.to_string(), expires_at));
    }

    pub async fn del(&self, key: &str) {
        self.entries.lock().await.remove(&self.key(key));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_cache_roundtrip() {
        let cache = OtpCache::memory("test:".to_string());
        cache
            .set_ex("otp:a@example.com", "payload", Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(
            cache.get("otp:a@example.com").await.unwrap().as_deref(),
            Some("payload")
        );
        cache.del("otp:a@example.com").await.unwrap();
        assert_eq!(cache.get("otp:a@example.com").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_memory_cache_expires() {
        let cache = MemoryCache::new(String::new());
        cache.set_ex("k", "v", Duration::from_secs(1)).await;
        {
            let mut entries = cache.entries.lock().await;
            if let Some((_, expires_at)) = entries.get_mut("k") {
                *expires_at = Instant::now() - Duration::from_millis(1);
            }
        }
        assert_eq!(cache.get("k").await, None);
    }
}
