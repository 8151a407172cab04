//! # Redis Tier
//!
//! Session-scoped tier. Keys live under a namespace and expire after the
//! session TTL, so a stale login cannot outlive the session it belonged to.
//!
//! Connection is opened once, up front, with short timeouts. A Redis that is
//! down at startup simply never becomes a tier.
use std::time::Duration;

use redis::{Client, Commands, Connection};

use crate::{StorageError, StorageTier, TierKind};

const CONNECT_TIMEOUT: Duration = Duration::from_millis(100);
const IO_TIMEOUT: Duration = Duration::from_millis(250);

pub struct RedisTier {
    connection: Connection,
    namespace: String,
    ttl_secs: u64,
}

impl RedisTier {
    pub fn connect(redis_url: &str, namespace: &str, ttl: Duration) -> Result<Self, StorageError> {
        let client = Client::open(redis_url)?;
        let connection = client.get_connection_with_timeout(CONNECT_TIMEOUT)?;

        connection.set_read_timeout(Some(IO_TIMEOUT))?;
        connection.set_write_timeout(Some(IO_TIMEOUT))?;

        Ok(Self {
            connection,
            namespace: namespace.to_string(),
            ttl_secs: ttl.as_secs().max(1),
        })
    }

    fn key(&self, key: &str) -> String {
        namespaced(&self.namespace, key)
    }
}

fn namespaced(namespace: &str, key: &str) -> String {
    format!("{namespace}:{key}")
}

impl StorageTier for RedisTier {
    fn kind(&self) -> TierKind {
        TierKind::Session
    }

    fn get(&mut self, key: &str) -> Result<Option<String>, StorageError> {
        let key = self.key(key);
        let value: Option<String> = self.connection.get(key)?;

        Ok(value)
    }

    fn set(&mut self, key: &str, value: &str) -> Result<(), StorageError> {
        let key = self.key(key);
        let _: () = self.connection.set_ex(key, value, self.ttl_secs)?;

        Ok(())
    }

    fn remove(&mut self, key: &str) -> Result<(), StorageError> {
        let key = self.key(key);
        let _: () = self.connection.del(key)?;

        Ok(())
    }
}
