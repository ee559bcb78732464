/// Session Store
///
/// Maps token identifiers to the identity they were issued to, with a
/// per-entry expiry equal to the token's own. An entry that is absent or
/// past its expiry is indistinguishable from one that never existed.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::aio::ConnectionManager;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::auth::clock::Clock;
use crate::auth::jwt::TokenPair;
use crate::error::AuthError;

#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Record `uuid -> user_id` until `expires_at`.
    async fn insert(&self, uuid: &Uuid, user_id: i64, expires_at: DateTime<Utc>) -> Result<(), AuthError>;

    /// Remove one entry. Returns how many entries were removed (0 or 1).
    async fn delete(&self, uuid: &Uuid) -> Result<u64, AuthError>;

    /// Resolve an entry to its identity, `AuthError::NotFound` if absent or expired.
    async fn lookup(&self, uuid: &Uuid) -> Result<i64, AuthError>;

    /// Record both halves of a freshly issued pair.
    async fn save(&self, user_id: i64, pair: &TokenPair) -> Result<(), AuthError> {
        self.insert(&pair.access_uuid, user_id, pair.access_expires).await?;
        self.insert(&pair.refresh_uuid, user_id, pair.refresh_expires).await?;
        Ok(())
    }
}

struct Entry {
    user_id: i64,
    expires_at: DateTime<Utc>,
}

/// Sweep interval for expired entries, measured on the store's clock.
const PURGE_INTERVAL_SECONDS: i64 = 5 * 60;

/// Entry count that forces a sweep regardless of the interval.
const MAX_ENTRIES_BEFORE_PURGE: usize = 10_000;

/// Process-local store, suitable for a single instance and for tests.
///
/// Expired entries are swept on insert once the purge interval has passed,
/// and `spawn_purge_task` sweeps on a timer for idle periods.
pub struct MemorySessionStore {
    entries: RwLock<HashMap<Uuid, Entry>>,
    last_purge: Mutex<DateTime<Utc>>,
    clock: Arc<dyn Clock>,
}

impl MemorySessionStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            last_purge: Mutex::new(clock.now()),
            clock,
        }
    }

    /// Drop every entry whose expiry has passed. Returns the number removed.
    pub async fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let mut entries = self.entries.write().await;
        self.mark_purged(now);
        Self::retain_live(&mut entries, now)
    }

    /// Run `purge_expired` every `every` until the store is dropped.
    pub fn spawn_purge_task(self: &Arc<Self>, every: std::time::Duration) -> JoinHandle<()> {
        let store = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(store) = store.upgrade() else { break };
                let purged = store.purge_expired().await;
                if purged > 0 {
                    tracing::debug!(purged = purged, "Purged expired session entries");
                }
            }
        })
    }

    fn retain_live(entries: &mut HashMap<Uuid, Entry>, now: DateTime<Utc>) -> usize {
        let before = entries.len();
        entries.retain(|_, entry| entry.expires_at > now);
        before - entries.len()
    }

    fn mark_purged(&self, now: DateTime<Utc>) {
        *self.last_purge.lock().unwrap_or_else(|poisoned| poisoned.into_inner()) = now;
    }

    fn purge_due(&self, now: DateTime<Utc>, len: usize) -> bool {
        let last = *self.last_purge.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        len >= MAX_ENTRIES_BEFORE_PURGE || now - last >= chrono::Duration::seconds(PURGE_INTERVAL_SECONDS)
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn insert(&self, uuid: &Uuid, user_id: i64, expires_at: DateTime<Utc>) -> Result<(), AuthError> {
        if expires_at <= self.clock.now() {
            tracing::debug!(uuid = %uuid, "Skipping session entry that is already expired");
            return Ok(());
        }

        let now = self.clock.now();
        let mut entries = self.entries.write().await;
        if self.purge_due(now, entries.len()) {
            self.mark_purged(now);
            let purged = Self::retain_live(&mut entries, now);
            tracing::debug!(purged = purged, "Purged expired session entries");
        }
        entries.insert(*uuid, Entry { user_id, expires_at });
        Ok(())
    }

    async fn delete(&self, uuid: &Uuid) -> Result<u64, AuthError> {
        let now = self.clock.now();
        match self.entries.write().await.remove(uuid) {
            Some(entry) if entry.expires_at > now => Ok(1),
            _ => Ok(0),
        }
    }

    async fn lookup(&self, uuid: &Uuid) -> Result<i64, AuthError> {
        let now = self.clock.now();
        {
            let entries = self.entries.read().await;
            match entries.get(uuid) {
                None => return Err(AuthError::NotFound),
                Some(entry) if entry.expires_at > now => return Ok(entry.user_id),
                Some(_) => {}
            }
        }

        // Expired: evict so the map does not grow with dead sessions.
        self.entries.write().await.remove(uuid);
        Err(AuthError::NotFound)
    }
}

/// Redis-backed store using native key expiry.
#[derive(Clone)]
pub struct RedisSessionStore {
    connection: ConnectionManager,
    clock: Arc<dyn Clock>,
}

impl RedisSessionStore {
    const KEY_PREFIX: &'static str = "session:";

    pub async fn connect(redis_url: &str, clock: Arc<dyn Clock>) -> Result<Self, AuthError> {
        let client = redis::Client::open(redis_url)?;
        let connection = client.get_connection_manager().await?;
        Ok(Self { connection, clock })
    }

    fn key(uuid: &Uuid) -> String {
        format!("{}{}", Self::KEY_PREFIX, uuid)
    }
}

#[async_trait]
impl SessionStore for RedisSessionStore {
    async fn insert(&self, uuid: &Uuid, user_id: i64, expires_at: DateTime<Utc>) -> Result<(), AuthError> {
        let ttl_ms = (expires_at - self.clock.now()).num_milliseconds();
        if ttl_ms <= 0 {
            tracing::debug!(uuid = %uuid, "Skipping session entry that is already expired");
            return Ok(());
        }

        let mut connection = self.connection.clone();
        redis::cmd("SET")
            .arg(Self::key(uuid))
            .arg(user_id)
            .arg("PX")
            .arg(ttl_ms)
            .query_async::<_, ()>(&mut connection)
            .await?;
        Ok(())
    }

    async fn delete(&self, uuid: &Uuid) -> Result<u64, AuthError> {
        let mut connection = self.connection.clone();
        let deleted: u64 = redis::cmd("DEL")
            .arg(Self::key(uuid))
            .query_async(&mut connection)
            .await?;
        Ok(deleted)
    }

    async fn lookup(&self, uuid: &Uuid) -> Result<i64, AuthError> {
        let mut connection = self.connection.clone();
        let user_id: Option<i64> = redis::cmd("GET")
            .arg(Self::key(uuid))
            .query_async(&mut connection)
            .await?;
        user_id.ok_or(AuthError::NotFound)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::clock::ManualClock;
    use chrono::Duration;

    fn store() -> (Arc<ManualClock>, MemorySessionStore) {
        let clock = Arc::new(ManualClock::default());
        let store = MemorySessionStore::new(clock.clone());
        (clock, store)
    }

    #[tokio::test]
    async fn test_insert_and_lookup() {
        let (clock, store) = store();
        let uuid = Uuid::new_v4();

        store.insert(&uuid, 42, clock.now() + Duration::minutes(15)).await.unwrap();
        assert_eq!(store.lookup(&uuid).await, Ok(42));
    }

    #[tokio::test]
    async fn test_lookup_unknown_uuid() {
        let (_, store) = store();
        assert_eq!(store.lookup(&Uuid::new_v4()).await, Err(AuthError::NotFound));
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let (clock, store) = store();
        let uuid = Uuid::new_v4();
        store.insert(&uuid, 42, clock.now() + Duration::minutes(15)).await.unwrap();

        assert_eq!(store.delete(&uuid).await, Ok(1));
        assert_eq!(store.delete(&uuid).await, Ok(0));
        assert_eq!(store.delete(&Uuid::new_v4()).await, Ok(0));
        assert_eq!(store.lookup(&uuid).await, Err(AuthError::NotFound));
    }

    #[tokio::test]
    async fn test_entry_expires_with_clock() {
        let (clock, store) = store();
        let uuid = Uuid::new_v4();
        store.insert(&uuid, 42, clock.now() + Duration::minutes(15)).await.unwrap();

        clock.advance(Duration::minutes(16));
        assert_eq!(store.lookup(&uuid).await, Err(AuthError::NotFound));
        assert!(store.is_empty().await, "expired entry should be evicted on lookup");
    }

    #[tokio::test]
    async fn test_delete_of_expired_entry_counts_zero() {
        let (clock, store) = store();
        let uuid = Uuid::new_v4();
        store.insert(&uuid, 42, clock.now() + Duration::seconds(30)).await.unwrap();

        clock.advance(Duration::minutes(1));
        assert_eq!(store.delete(&uuid).await, Ok(0));
    }

    #[tokio::test]
    async fn test_already_expired_entry_is_not_written() {
        let (clock, store) = store();
        let uuid = Uuid::new_v4();

        store.insert(&uuid, 42, clock.now() - Duration::seconds(1)).await.unwrap();
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_purge_expired() {
        let (clock, store) = store();
        let short = Uuid::new_v4();
        let long = Uuid::new_v4();
        store.insert(&short, 1, clock.now() + Duration::minutes(15)).await.unwrap();
        store.insert(&long, 1, clock.now() + Duration::days(7)).await.unwrap();

        clock.advance(Duration::hours(1));
        assert_eq!(store.purge_expired().await, 1);
        assert_eq!(store.len().await, 1);
        assert_eq!(store.lookup(&long).await, Ok(1));
    }

    #[tokio::test]
    async fn test_insert_sweeps_entries_nobody_looks_up() {
        let (clock, store) = store();
        for user_id in 0..100 {
            store.insert(&Uuid::new_v4(), user_id, clock.now() + Duration::minutes(15)).await.unwrap();
            store.insert(&Uuid::new_v4(), user_id, clock.now() + Duration::days(7)).await.unwrap();
        }

        clock.advance(Duration::days(8));
        for user_id in 0..100 {
            store.insert(&Uuid::new_v4(), user_id, clock.now() + Duration::minutes(15)).await.unwrap();
            store.insert(&Uuid::new_v4(), user_id, clock.now() + Duration::days(7)).await.unwrap();
        }

        assert_eq!(store.len().await, 200);
    }

    #[tokio::test]
    async fn test_insert_does_not_sweep_before_interval() {
        let (clock, store) = store();
        store.insert(&Uuid::new_v4(), 1, clock.now() + Duration::seconds(30)).await.unwrap();

        clock.advance(Duration::minutes(1));
        store.insert(&Uuid::new_v4(), 2, clock.now() + Duration::minutes(15)).await.unwrap();
        assert_eq!(store.len().await, 2);
        assert_eq!(store.purge_expired().await, 1);
    }

    #[tokio::test]
    async fn test_purge_task_sweeps_idle_store() {
        let (clock, store) = store();
        let store = Arc::new(store);
        store.insert(&Uuid::new_v4(), 1, clock.now() + Duration::minutes(15)).await.unwrap();
        clock.advance(Duration::minutes(16));

        let task = store.spawn_purge_task(std::time::Duration::from_millis(10));
        for _ in 0..50 {
            if store.is_empty().await {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert!(store.is_empty().await);

        drop(store);
        tokio::time::timeout(std::time::Duration::from_secs(1), task)
            .await
            .expect("purge task should stop once the store is dropped")
            .unwrap();
    }

    #[tokio::test]
    async fn test_repeated_insert_overwrites() {
        let (clock, store) = store();
        let uuid = Uuid::new_v4();
        store.insert(&uuid, 1, clock.now() + Duration::minutes(1)).await.unwrap();
        store.insert(&uuid, 2, clock.now() + Duration::minutes(1)).await.unwrap();

        assert_eq!(store.lookup(&uuid).await, Ok(2));
        assert_eq!(store.len().await, 1);
    }

    #[test]
    fn test_redis_key_format() {
        let uuid = Uuid::nil();
        assert_eq!(
            RedisSessionStore::key(&uuid),
            "session:00000000-0000-0000-0000-000000000000"
        );
    }
}
