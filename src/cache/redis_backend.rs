//! Redis-protocol backend built on a multiplexed connection manager.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{Client, ErrorKind, RedisError};

use crate::cache::backend::{BackendError, CacheBackend};

impl From<RedisError> for BackendError {
    fn from(e: RedisError) -> Self {
        let transient = e.is_io_error()
            || e.is_timeout()
            || e.is_connection_dropped()
            || e.is_connection_refusal()
            || matches!(e.kind(), ErrorKind::TryAgain | ErrorKind::BusyLoadingError);

        if transient {
            BackendError::Transient(e.to_string())
        } else {
            BackendError::Command(e.to_string())
        }
    }
}

/// Cache backend talking to Redis (or any server speaking its protocol).
pub struct RedisBackend {
    connection_manager: ConnectionManager,
}

impl RedisBackend {
    /// Open a managed connection to `url`.
    ///
    /// The manager reconnects on its own after dropped connections, so a
    /// single instance lives for the whole process.
    pub async fn connect(url: &str) -> Result<Self, BackendError> {
        let client = Client::open(url).map_err(|e| {
            BackendError::Unavailable(format!("invalid cache url: {}", e))
        })?;

        let connection_manager = ConnectionManager::new(client)
            .await
            .map_err(|e| BackendError::Unavailable(e.to_string()))?;

        Ok(Self { connection_manager })
    }

    fn conn(&self) -> ConnectionManager {
        self.connection_manager.clone()
    }
}

#[async_trait]
impl CacheBackend for RedisBackend {
    async fn ping(&self) -> Result<(), BackendError> {
        let mut conn = self.conn();
        redis::cmd("PING").query_async::<String>(&mut conn).await?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, BackendError> {
        let mut conn = self.conn();
        let value = redis::cmd("GET")
            .arg(key)
            .query_async::<Option<String>>(&mut conn)
            .await?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: &str, ttl_secs: Option<u64>) -> Result<(), BackendError> {
        let mut conn = self.conn();
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(value);
        if let Some(ttl) = ttl_secs {
            cmd.arg("EX").arg(ttl.max(1));
        }
        cmd.query_async::<()>(&mut conn).await?;
        Ok(())
    }

    async fn delete(&self, keys: &[String]) -> Result<u64, BackendError> {
        if keys.is_empty() {
            return Ok(0);
        }
        let mut conn = self.conn();
        let deleted = redis::cmd("DEL")
            .arg(keys)
            .query_async::<u64>(&mut conn)
            .await?;
        Ok(deleted)
    }

    async fn exists(&self, key: &str) -> Result<bool, BackendError> {
        let mut conn = self.conn();
        let count = redis::cmd("EXISTS")
            .arg(key)
            .query_async::<i64>(&mut conn)
            .await?;
        Ok(count > 0)
    }

    async fn expire(&self, key: &str, seconds: u64) -> Result<bool, BackendError> {
        let mut conn = self.conn();
        let applied = redis::cmd("EXPIRE")
            .arg(key)
            .arg(seconds)
            .query_async::<i64>(&mut conn)
            .await?;
        Ok(applied == 1)
    }

    async fn incr_by(&self, key: &str, by: i64) -> Result<i64, BackendError> {
        let mut conn = self.conn();
        let value = redis::cmd("INCRBY")
            .arg(key)
            .arg(by)
            .query_async::<i64>(&mut conn)
            .await?;
        Ok(value)
    }

    async fn decr_by(&self, key: &str, by: i64) -> Result<i64, BackendError> {
        let mut conn = self.conn();
        let value = redis::cmd("DECRBY")
            .arg(key)
            .arg(by)
            .query_async::<i64>(&mut conn)
            .await?;
        Ok(value)
    }

    async fn scan(
        &self,
        cursor: u64,
        pattern: &str,
        count: usize,
    ) -> Result<(u64, Vec<String>), BackendError> {
        let mut conn = self.conn();
        let page = redis::cmd("SCAN")
            .arg(cursor)
            .arg("MATCH")
            .arg(pattern)
            .arg("COUNT")
            .arg(count)
            .query_async::<(u64, Vec<String>)>(&mut conn)
            .await?;
        Ok(page)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // These tests require a running Redis-compatible server.

    #[tokio::test]
    #[ignore]
    async fn test_redis_backend_roundtrip() {
        let backend = RedisBackend::connect("redis://127.0.0.1:6379")
            .await
            .expect("Failed to connect");
        backend.ping().await.expect("ping failed");

        backend
            .set("edge-guard:test:roundtrip", "\"v\"", Some(30))
            .await
            .expect("set failed");
        let value = backend.get("edge-guard:test:roundtrip").await.unwrap();
        assert_eq!(value.as_deref(), Some("\"v\""));

        let deleted = backend
            .delete(&["edge-guard:test:roundtrip".to_string()])
            .await
            .unwrap();
        assert_eq!(deleted, 1);
    }

    #[test]
    fn test_error_classification() {
        let io: RedisError = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset").into();
        assert!(BackendError::from(io).is_transient());

        let typed: RedisError = (ErrorKind::TypeError, "WRONGTYPE").into();
        assert!(!BackendError::from(typed).is_transient());
    }
}
