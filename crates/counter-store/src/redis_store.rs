use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, RedisError};

use crate::{
    CounterStoreError, Result,
    store::{CounterBatch, CounterStore},
};

/// Redis-backed counter store.
///
/// Every call is bounded by a fixed response timeout and is never retried.
/// Batches are sent as a plain pipeline: one round trip, evaluated key by key,
/// without MULTI/EXEC. A command error part way through (for example
/// WRONGTYPE on one key) does not undo the marker or the increments before
/// it, so a reconciliation check will see that batch as landed.
#[derive(Clone)]
pub struct RedisCounterStore {
    conn: ConnectionManager,
    response_timeout: Duration,
}

impl RedisCounterStore {
    /// Creates a store over an existing connection manager.
    pub fn new(conn: ConnectionManager, response_timeout: Duration) -> Self {
        Self {
            conn,
            response_timeout,
        }
    }

    /// Connects to Redis at the given URL.
    pub async fn connect(url: &str, response_timeout: Duration) -> Result<Self> {
        let client = redis::Client::open(url).map_err(classify)?;
        let conn = ConnectionManager::new(client).await.map_err(classify)?;
        Ok(Self::new(conn, response_timeout))
    }

    async fn bounded<T, F>(&self, call: F) -> Result<T>
    where
        F: Future<Output = redis::RedisResult<T>>,
    {
        match tokio::time::timeout(self.response_timeout, call).await {
            Ok(result) => result.map_err(classify),
            Err(_) => Err(CounterStoreError::Uncertain(format!(
                "no response within {:?}",
                self.response_timeout
            ))),
        }
    }
}

/// Maps a client error onto what it says about the command's fate.
///
/// Only a refused connection proves the command never left; a dropped
/// connection or any other I/O failure may have happened after the write.
fn classify(err: RedisError) -> CounterStoreError {
    if err.is_connection_refusal() {
        CounterStoreError::Unavailable(err.to_string())
    } else if err.is_timeout() || err.is_connection_dropped() || err.is_io_error() {
        CounterStoreError::Uncertain(err.to_string())
    } else {
        CounterStoreError::Command(err.to_string())
    }
}

#[async_trait]
impl CounterStore for RedisCounterStore {
    async fn execute(&self, batch: &CounterBatch) -> Result<Vec<i64>> {
        let mut pipe = redis::pipe();
        pipe.cmd("SET")
            .arg(&batch.marker_key)
            .arg("1")
            .arg("EX")
            .arg(batch.marker_ttl.as_secs().max(1))
            .ignore();
        for increment in &batch.increments {
            pipe.cmd("INCRBY").arg(&increment.key).arg(increment.delta);
        }

        let mut conn = self.conn.clone();
        self.bounded(async move {
            let values: Vec<i64> = pipe.query_async(&mut conn).await?;
            Ok::<_, RedisError>(values)
        })
        .await
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let mut conn = self.conn.clone();
        self.bounded(async move {
            let exists: bool = conn.exists(key).await?;
            Ok::<_, RedisError>(exists)
        })
        .await
    }

    async fn set_if_absent(&self, key: &str, value: i64) -> Result<bool> {
        let mut conn = self.conn.clone();
        self.bounded(async move {
            let set: bool = conn.set_nx(key, value).await?;
            Ok::<_, RedisError>(set)
        })
        .await
    }

    async fn get(&self, key: &str) -> Result<Option<i64>> {
        let mut conn = self.conn.clone();
        self.bounded(async move {
            let value: Option<i64> = conn.get(key).await?;
            Ok::<_, RedisError>(value)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_refused_connection_is_unavailable() {
        let err = RedisError::from(std::io::Error::new(
            std::io::ErrorKind::ConnectionRefused,
            "refused",
        ));
        assert!(matches!(classify(err), CounterStoreError::Unavailable(_)));
    }

    #[test]
    fn test_dropped_connection_is_uncertain() {
        let err = RedisError::from(std::io::Error::new(
            std::io::ErrorKind::BrokenPipe,
            "broken pipe",
        ));
        assert!(matches!(classify(err), CounterStoreError::Uncertain(_)));
    }

    #[test]
    fn test_server_error_is_command_failure() {
        let err = RedisError::from((redis::ErrorKind::TypeError, "not an integer"));
        assert!(matches!(classify(err), CounterStoreError::Command(_)));
    }
}
