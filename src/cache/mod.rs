//! Advisory key-value cache for entity snapshots.
//!
//! Entries live in one hash per entity type, keyed by the instance's primary
//! key. A cache failure never fails the caller: reads degrade to a miss and
//! writes are skipped, both with a warning.

pub mod memory;

pub use memory::MemoryCache;

use crate::core::{Record, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{Level, event};

/// Hash-structured key-value store.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    async fn hget(&self, hash: &str, field: &str) -> Result<Option<String>>;
    async fn hset(&self, hash: &str, field: &str, payload: String) -> Result<()>;
    /// Returns whether an entry was removed.
    async fn hdel(&self, hash: &str, field: &str) -> Result<bool>;
}

/// Serialized form of an entity's column values.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheSnapshot {
    pub expires_at: DateTime<Utc>,
    pub fields: Record,
}

impl CacheSnapshot {
    pub fn new(fields: Record, ttl: Duration) -> Self {
        Self {
            expires_at: Utc::now()
                .checked_add_signed(ttl)
                .unwrap_or(DateTime::<Utc>::MAX_UTC),
            fields,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

#[derive(Clone)]
pub struct CacheAdapter {
    backend: Arc<dyn CacheBackend>,
    ttl: Duration,
}

impl CacheAdapter {
    pub fn new(backend: Arc<dyn CacheBackend>, ttl: Duration) -> Self {
        Self { backend, ttl }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Returns the cached fields for `(entity_type, key)` unless missing or expired.
    /// Expired and unreadable snapshots are deleted.
    pub async fn load(&self, entity_type: &str, key: &str) -> Option<Record> {
        let payload = match self.backend.hget(entity_type, key).await {
            Ok(Some(payload)) => payload,
            Ok(None) => {
                event!(Level::DEBUG, entity_type, key, "cache miss");
                return None;
            }
            Err(err) => {
                event!(Level::WARN, entity_type, key, error = %err, "cache read failed, treating as miss");
                return None;
            }
        };

        let snapshot = match serde_json::from_str::<CacheSnapshot>(&payload) {
            Ok(snapshot) => snapshot,
            Err(err) => {
                event!(Level::WARN, entity_type, key, error = %err, "dropping unreadable cache snapshot");
                self.purge(entity_type, key).await;
                return None;
            }
        };

        if snapshot.is_expired(Utc::now()) {
            event!(Level::DEBUG, entity_type, key, "cache snapshot expired");
            self.purge(entity_type, key).await;
            return None;
        }

        event!(Level::DEBUG, entity_type, key, "cache hit");
        Some(snapshot.fields)
    }

    pub async fn store(&self, entity_type: &str, key: &str, fields: &Record) {
        let snapshot = CacheSnapshot::new(fields.clone(), self.ttl);
        let payload = match serde_json::to_string(&snapshot) {
            Ok(payload) => payload,
            Err(err) => {
                event!(Level::WARN, entity_type, key, error = %err, "cache snapshot not serializable");
                return;
            }
        };
        if let Err(err) = self.backend.hset(entity_type, key, payload).await {
            event!(Level::WARN, entity_type, key, error = %err, "cache write failed");
        }
    }

    pub async fn purge(&self, entity_type: &str, key: &str) {
        if let Err(err) = self.backend.hdel(entity_type, key).await {
            event!(Level::WARN, entity_type, key, error = %err, "cache delete failed");
        }
    }
}
