//! Redis-backed broker

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{BoxStream, StreamExt};
use redis::aio::MultiplexedConnection;
use redis::RedisResult;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::broker::Broker;
use crate::errors::BrokerError;

/// Slack added on top of a blocking pop's server-side timeout before the
/// connection is considered dead
const BLOCKING_SLACK: Duration = Duration::from_secs(5);

/// Broker backed by a Redis server
///
/// Holds one multiplexed connection, re-established lazily after any failed
/// command so a restarted server is picked up on the next call.
pub struct RedisBroker {
    client: redis::Client,
    connection: Mutex<Option<MultiplexedConnection>>,
}

impl RedisBroker {
    /// Create a broker for `url` (e.g. `redis://localhost:6379/0`)
    ///
    /// No connection is made until the first command.
    pub fn open(url: &str) -> Result<Self, BrokerError> {
        let client = redis::Client::open(url)?;
        Ok(Self {
            client,
            connection: Mutex::new(None),
        })
    }

    async fn connection(&self) -> Result<MultiplexedConnection, BrokerError> {
        let mut cached = self.connection.lock().await;
        if let Some(con) = cached.as_ref() {
            return Ok(con.clone());
        }

        debug!("Connecting to Redis...");
        let con = self.client.get_multiplexed_async_connection().await?;
        *cached = Some(con.clone());
        Ok(con)
    }

    async fn reset(&self) {
        let mut cached = self.connection.lock().await;
        *cached = None;
    }

    async fn run<T, F, Fut>(&self, op: F) -> Result<T, BrokerError>
    where
        F: FnOnce(MultiplexedConnection) -> Fut,
        Fut: Future<Output = RedisResult<T>>,
    {
        let con = self.connection().await?;
        match op(con).await {
            Ok(value) => Ok(value),
            Err(e) => {
                warn!("Redis command failed, dropping connection: {}", e);
                self.reset().await;
                Err(e.into())
            }
        }
    }
}

#[async_trait]
impl Broker for RedisBroker {
    async fn push(&self, list: &str, value: &str, ttl: Duration) -> Result<(), BrokerError> {
        self.run(|mut con| async move {
            redis::pipe()
                .atomic()
                .cmd("RPUSH")
                .arg(list)
                .arg(value)
                .ignore()
                .cmd("EXPIRE")
                .arg(list)
                .arg(ttl.as_secs().max(1))
                .ignore()
                .query_async::<()>(&mut con)
                .await
        })
        .await
    }

    async fn pop(&self, list: &str, timeout: Duration) -> Result<Option<String>, BrokerError> {
        let blocking = self.run(|mut con| async move {
            redis::cmd("BLPOP")
                .arg(list)
                .arg(timeout.as_secs().max(1))
                .query_async::<Option<(String, String)>>(&mut con)
                .await
        });

        match tokio::time::timeout(timeout + BLOCKING_SLACK, blocking).await {
            Ok(popped) => Ok(popped?.map(|(_, value)| value)),
            Err(_) => {
                warn!("BLPOP on {} did not return, dropping connection", list);
                self.reset().await;
                Err(BrokerError::Timeout(timeout + BLOCKING_SLACK))
            }
        }
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), BrokerError> {
        self.run(|mut con| async move {
            let mut cmd = redis::cmd("SET");
            cmd.arg(key).arg(value);
            if let Some(ttl) = ttl {
                cmd.arg("EX").arg(ttl.as_secs().max(1));
            }
            cmd.query_async::<()>(&mut con).await
        })
        .await
    }

    async fn get(&self, key: &str) -> Result<Option<String>, BrokerError> {
        self.run(|mut con| async move {
            redis::cmd("GET")
                .arg(key)
                .query_async::<Option<String>>(&mut con)
                .await
        })
        .await
    }

    async fn delete(&self, key: &str) -> Result<bool, BrokerError> {
        let removed: i64 = self
            .run(|mut con| async move { redis::cmd("DEL").arg(key).query_async(&mut con).await })
            .await?;
        Ok(removed > 0)
    }

    async fn scan(&self, pattern: &str) -> Result<Vec<String>, BrokerError> {
        self.run(|mut con| async move {
            let mut keys = Vec::new();
            let mut cursor: u64 = 0;
            loop {
                let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                    .arg(cursor)
                    .arg("MATCH")
                    .arg(pattern)
                    .arg("COUNT")
                    .arg(100)
                    .query_async(&mut con)
                    .await?;
                keys.extend(batch);
                if next == 0 {
                    break;
                }
                cursor = next;
            }
            keys.sort();
            keys.dedup();
            Ok::<_, redis::RedisError>(keys)
        })
        .await
    }

    async fn publish(&self, channel: &str, message: &str) -> Result<(), BrokerError> {
        let receivers: i64 = self
            .run(|mut con| async move {
                redis::cmd("PUBLISH")
                    .arg(channel)
                    .arg(message)
                    .query_async(&mut con)
                    .await
            })
            .await?;
        debug!("Published to {} ({} subscribers)", channel, receivers);
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> Result<BoxStream<'static, String>, BrokerError> {
        let mut pubsub = self.client.get_async_pubsub().await?;
        pubsub.subscribe(channel).await?;

        let stream = pubsub
            .into_on_message()
            .filter_map(|msg| async move { msg.get_payload::<String>().ok() });
        Ok(stream.boxed())
    }
}
