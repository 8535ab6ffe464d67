//! In-process broker
//!
//! Mirrors the Redis semantics the protocol relies on (FIFO lists with a
//! blocking pop, expiring keys, fire-and-forget pub/sub) inside one process.
//! Expiry is measured with `tokio::time`, so tests can pause and advance time.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use tokio::sync::{broadcast, Notify};
use tokio::time::Instant;

use crate::broker::{glob_match, Broker};
use crate::errors::BrokerError;

const CHANNEL_CAPACITY: usize = 64;

#[derive(Default)]
struct Entries {
    lists: HashMap<String, (VecDeque<String>, Option<Instant>)>,
    values: HashMap<String, (String, Option<Instant>)>,
}

impl Entries {
    fn purge_expired(&mut self) {
        let now = Instant::now();
        self.lists
            .retain(|_, (items, expires)| !items.is_empty() && expires.map_or(true, |at| at > now));
        self.values
            .retain(|_, (_, expires)| expires.map_or(true, |at| at > now));
    }
}

/// In-memory broker
pub struct MemoryBroker {
    entries: Mutex<Entries>,
    pushed: Notify,
    channels: Mutex<HashMap<String, broadcast::Sender<String>>>,
    available: AtomicBool,
}

impl MemoryBroker {
    /// Create an empty broker
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(Entries::default()),
            pushed: Notify::new(),
            channels: Mutex::new(HashMap::new()),
            available: AtomicBool::new(true),
        }
    }

    /// Simulate the broker going away (`false`) or coming back (`true`)
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Number of entries currently queued on `list`
    pub fn queued(&self, list: &str) -> usize {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.purge_expired();
        entries.lists.get(list).map_or(0, |(items, _)| items.len())
    }

    fn ensure_available(&self) -> Result<(), BrokerError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(BrokerError::Closed("broker unavailable".to_string()))
        }
    }

    fn try_pop(&self, list: &str) -> Option<String> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.purge_expired();
        entries
            .lists
            .get_mut(list)
            .and_then(|(items, _)| items.pop_front())
    }
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Broker for MemoryBroker {
    async fn push(&self, list: &str, value: &str, ttl: Duration) -> Result<(), BrokerError> {
        self.ensure_available()?;
        {
            let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
            entries.purge_expired();
            let (items, expires) = entries
                .lists
                .entry(list.to_string())
                .or_insert_with(|| (VecDeque::new(), None));
            items.push_back(value.to_string());
            *expires = Some(Instant::now() + ttl);
        }
        self.pushed.notify_waiters();
        Ok(())
    }

    async fn pop(&self, list: &str, timeout: Duration) -> Result<Option<String>, BrokerError> {
        self.ensure_available()?;
        let deadline = Instant::now() + timeout;

        loop {
            let notified = self.pushed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(value) = self.try_pop(list) {
                return Ok(Some(value));
            }

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Ok(None);
            }
            self.ensure_available()?;
        }
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), BrokerError> {
        self.ensure_available()?;
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let expires = ttl.map(|ttl| Instant::now() + ttl);
        entries
            .values
            .insert(key.to_string(), (value.to_string(), expires));
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, BrokerError> {
        self.ensure_available()?;
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.purge_expired();
        Ok(entries.values.get(key).map(|(value, _)| value.clone()))
    }

    async fn delete(&self, key: &str) -> Result<bool, BrokerError> {
        self.ensure_available()?;
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.purge_expired();
        let removed_value = entries.values.remove(key).is_some();
        let removed_list = entries.lists.remove(key).is_some();
        Ok(removed_value || removed_list)
    }

    async fn scan(&self, pattern: &str) -> Result<Vec<String>, BrokerError> {
        self.ensure_available()?;
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.purge_expired();
        let mut keys: Vec<String> = entries
            .values
            .keys()
            .chain(entries.lists.keys())
            .filter(|key| glob_match(pattern, key))
            .cloned()
            .collect();
        keys.sort();
        Ok(keys)
    }

    async fn publish(&self, channel: &str, message: &str) -> Result<(), BrokerError> {
        self.ensure_available()?;
        let channels = self.channels.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(sender) = channels.get(channel) {
            // No receivers is fine: a missed broadcast loses nothing
            let _ = sender.send(message.to_string());
        }
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> Result<BoxStream<'static, String>, BrokerError> {
        self.ensure_available()?;
        let receiver = {
            let mut channels = self.channels.lock().unwrap_or_else(|e| e.into_inner());
            channels
                .entry(channel.to_string())
                .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
                .subscribe()
        };

        let messages = stream::unfold(receiver, |mut receiver| async move {
            loop {
                match receiver.recv().await {
                    Ok(message) => return Some((message, receiver)),
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        });
        Ok(messages.boxed())
    }
}
