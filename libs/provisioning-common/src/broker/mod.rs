//! Broker abstraction
//!
//! The broker is the only resource shared between panel and agent. Every
//! operation here is a single atomic broker command (or an atomic pipeline),
//! so neither side needs a lock of its own.

pub mod memory;
pub mod redis_broker;

use std::time::Duration;

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::errors::BrokerError;

pub use self::memory::MemoryBroker;
pub use self::redis_broker::RedisBroker;

/// Primitive operations the queue and result protocol is built on
#[async_trait]
pub trait Broker: Send + Sync {
    /// Append `value` to the tail of `list` and reset the list's expiry
    async fn push(&self, list: &str, value: &str, ttl: Duration) -> Result<(), BrokerError>;

    /// Remove the head of `list`, waiting up to `timeout` for one to appear
    async fn pop(&self, list: &str, timeout: Duration) -> Result<Option<String>, BrokerError>;

    /// Store `value` under `key`, optionally expiring after `ttl`
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), BrokerError>;

    /// Read `key`; expired keys read as `None`
    async fn get(&self, key: &str) -> Result<Option<String>, BrokerError>;

    /// Delete `key`, returning whether it existed
    async fn delete(&self, key: &str) -> Result<bool, BrokerError>;

    /// List keys matching a glob `pattern` (only `*` is special)
    async fn scan(&self, pattern: &str) -> Result<Vec<String>, BrokerError>;

    /// Broadcast `message` to live subscribers of `channel`
    async fn publish(&self, channel: &str, message: &str) -> Result<(), BrokerError>;

    /// Receive messages published on `channel` from now on
    async fn subscribe(&self, channel: &str) -> Result<BoxStream<'static, String>, BrokerError>;
}

/// Match `key` against a glob where `*` spans any run of characters
pub(crate) fn glob_match(pattern: &str, key: &str) -> bool {
    let parts: Vec<&str> = pattern.split('*').collect();
    if parts.len() == 1 {
        return pattern == key;
    }

    let first = parts[0];
    let last = parts[parts.len() - 1];
    if !key.starts_with(first) || key.len() < first.len() + last.len() || !key.ends_with(last) {
        return false;
    }

    let mut rest = &key[first.len()..key.len() - last.len()];
    for part in &parts[1..parts.len() - 1] {
        match rest.find(part) {
            Some(idx) => rest = &rest[idx + part.len()..],
            None => return false,
        }
    }
    true
}
