//! Subscriber registry
//!
//! Tracks which (subscriber, feed) pairs are currently receiving broadcasts
//! and which license each subscription rides on. All operations work against
//! memory; persistence happens on a dedicated writer task fed through a
//! channel, so nothing here ever waits on the database.

use crate::db;
use crate::error::Result;
use crate::licensing::LicenseStore;
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, warn};

#[derive(Debug, Clone, Default)]
pub struct Subscription {
    pub active: bool,
    pub license_id: Option<String>,
}

type SubscriptionKey = (i64, String);

/// Registry of per-feed subscriptions, backed by the subscriptions table.
pub struct SubscriberRegistry {
    licenses: Arc<LicenseStore>,
    entries: Arc<RwLock<HashMap<SubscriptionKey, Subscription>>>,
    persist_tx: mpsc::UnboundedSender<SubscriptionKey>,
}

impl SubscriberRegistry {
    /// Load subscriptions from the database and start the writer task.
    pub async fn load(pool: SqlitePool, licenses: Arc<LicenseStore>) -> Result<Self> {
        let rows = db::subscriptions::load_all(&pool).await?;

        let mut map = HashMap::with_capacity(rows.len());
        for row in rows {
            map.insert(
                (row.subscriber_id, row.feed),
                Subscription {
                    active: row.active,
                    license_id: row.license_id,
                },
            );
        }

        let entries = Arc::new(RwLock::new(map));
        let (persist_tx, persist_rx) = mpsc::unbounded_channel();
        tokio::spawn(persist_writer(pool, Arc::clone(&entries), persist_rx));

        Ok(Self {
            licenses,
            entries,
            persist_tx,
        })
    }

    pub async fn set_active(&self, subscriber: i64, feed: &str, active: bool) {
        let key = (subscriber, feed.to_string());
        {
            let mut entries = self.entries.write().await;
            entries.entry(key.clone()).or_default().active = active;
        }
        self.persist(key);
    }

    pub async fn attach_license(&self, subscriber: i64, feed: &str, license_id: &str) {
        let key = (subscriber, feed.to_string());
        {
            let mut entries = self.entries.write().await;
            entries.entry(key.clone()).or_default().license_id = Some(license_id.to_string());
        }
        self.persist(key);
    }

    pub async fn is_active(&self, subscriber: i64, feed: &str) -> bool {
        let entries = self.entries.read().await;
        entries
            .get(&(subscriber, feed.to_string()))
            .map_or(false, |s| s.active)
    }

    pub async fn license_of(&self, subscriber: i64, feed: &str) -> Option<String> {
        let entries = self.entries.read().await;
        entries
            .get(&(subscriber, feed.to_string()))
            .and_then(|s| s.license_id.clone())
    }

    /// Snapshot of subscribers currently active on `feed`, in ascending id
    /// order. Later registry changes do not affect the returned list.
    pub async fn list_active(&self, feed: &str) -> Vec<i64> {
        let entries = self.entries.read().await;
        let mut active: Vec<i64> = entries
            .iter()
            .filter(|((_, f), s)| f == feed && s.active)
            .map(|((subscriber, _), _)| *subscriber)
            .collect();
        active.sort_unstable();
        active
    }

    /// Flip the subscription inactive when its license no longer permits the
    /// subscriber. Returns whether a deactivation occurred, so callers can
    /// send an access-ended notice exactly once. Invoked deliberately before
    /// every broadcast send and at the top of every supervisor tick; license
    /// reads themselves never deactivate anyone.
    pub async fn deactivate_if_license_invalid(&self, subscriber: i64, feed: &str) -> bool {
        let license_id = {
            let entries = self.entries.read().await;
            match entries.get(&(subscriber, feed.to_string())) {
                Some(s) if s.active => s.license_id.clone(),
                _ => return false,
            }
        };

        let valid = match license_id {
            Some(id) => self.licenses.is_valid(&id, subscriber).await,
            None => false,
        };
        if valid {
            return false;
        }

        let key = (subscriber, feed.to_string());
        {
            let mut entries = self.entries.write().await;
            match entries.get_mut(&key) {
                // Someone else may have flipped it between our two looks.
                Some(s) if s.active => s.active = false,
                _ => return false,
            }
        }
        debug!("Deactivated subscriber {} on feed '{}'", subscriber, feed);
        self.persist(key);
        true
    }

    fn persist(&self, key: SubscriptionKey) {
        // Writer gone only during shutdown; dropping the write is fine then.
        let _ = self.persist_tx.send(key);
    }
}

/// Drains persistence requests and writes the current state of each key.
/// Writes are serialized here, so the latest in-memory state always lands
/// last in the database.
async fn persist_writer(
    pool: SqlitePool,
    entries: Arc<RwLock<HashMap<SubscriptionKey, Subscription>>>,
    mut rx: mpsc::UnboundedReceiver<SubscriptionKey>,
) {
    while let Some((subscriber, feed)) = rx.recv().await {
        let snapshot = {
            let entries = entries.read().await;
            entries.get(&(subscriber, feed.clone())).cloned()
        };
        let Some(sub) = snapshot else { continue };

        let row = db::subscriptions::SubscriptionRow {
            subscriber_id: subscriber,
            feed,
            active: sub.active,
            license_id: sub.license_id,
        };
        if let Err(e) = db::subscriptions::upsert(&pool, &row).await {
            warn!(
                "Failed to persist subscription ({}, '{}'): {}",
                row.subscriber_id, row.feed, e
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init::init_schema;
    use sqlx::sqlite::SqlitePoolOptions;
    use std::time::Duration;

    async fn test_pool() -> SqlitePool {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .expect("Failed to create in-memory pool");
        init_schema(&pool).await.expect("Schema init failed");
        pool
    }

    async fn test_registry(pool: SqlitePool) -> (SubscriberRegistry, Arc<LicenseStore>) {
        let licenses = Arc::new(
            LicenseStore::load(pool.clone())
                .await
                .expect("Store load failed"),
        );
        let registry = SubscriberRegistry::load(pool, Arc::clone(&licenses))
            .await
            .expect("Registry load failed");
        (registry, licenses)
    }

    async fn wait_for_persisted(
        pool: &SqlitePool,
        pred: impl Fn(&[db::subscriptions::SubscriptionRow]) -> bool,
    ) {
        for _ in 0..100 {
            let rows = db::subscriptions::load_all(pool).await.expect("Load failed");
            if pred(&rows) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("Timed out waiting for subscription write");
    }

    #[tokio::test]
    async fn test_set_active_and_is_active() {
        let (registry, _) = test_registry(test_pool().await).await;

        assert!(!registry.is_active(42, "sicbo-a").await);

        registry.set_active(42, "sicbo-a", true).await;
        assert!(registry.is_active(42, "sicbo-a").await);

        registry.set_active(42, "sicbo-a", false).await;
        assert!(!registry.is_active(42, "sicbo-a").await);
    }

    #[tokio::test]
    async fn test_list_active_filters_and_sorts() {
        let (registry, _) = test_registry(test_pool().await).await;

        registry.set_active(9, "sicbo-a", true).await;
        registry.set_active(3, "sicbo-a", true).await;
        registry.set_active(5, "sicbo-a", false).await;
        registry.set_active(7, "sicbo-b", true).await;

        assert_eq!(registry.list_active("sicbo-a").await, vec![3, 9]);
        assert_eq!(registry.list_active("sicbo-b").await, vec![7]);
    }

    #[tokio::test]
    async fn test_deactivate_with_valid_license_is_noop() {
        let pool = test_pool().await;
        let (registry, licenses) = test_registry(pool).await;

        licenses.create("GOLD-1", 2, None).await.expect("Create failed");
        licenses.redeem("GOLD-1", 42).await.expect("Redeem failed");
        registry.attach_license(42, "sicbo-a", "GOLD-1").await;
        registry.set_active(42, "sicbo-a", true).await;

        assert!(!registry.deactivate_if_license_invalid(42, "sicbo-a").await);
        assert!(registry.is_active(42, "sicbo-a").await);
    }

    #[tokio::test]
    async fn test_deactivate_after_revocation() {
        let pool = test_pool().await;
        let (registry, licenses) = test_registry(pool).await;

        licenses.create("GOLD-1", 2, None).await.expect("Create failed");
        licenses.redeem("GOLD-1", 42).await.expect("Redeem failed");
        registry.attach_license(42, "sicbo-a", "GOLD-1").await;
        registry.set_active(42, "sicbo-a", true).await;

        licenses.revoke("GOLD-1").await.expect("Revoke failed");

        // First check deactivates and reports it; the second finds nothing
        // left to do, so the access-ended notice cannot be sent twice.
        assert!(registry.deactivate_if_license_invalid(42, "sicbo-a").await);
        assert!(!registry.is_active(42, "sicbo-a").await);
        assert!(!registry.deactivate_if_license_invalid(42, "sicbo-a").await);
    }

    #[tokio::test]
    async fn test_deactivate_without_attached_license() {
        let (registry, _) = test_registry(test_pool().await).await;

        registry.set_active(42, "sicbo-a", true).await;

        assert!(registry.deactivate_if_license_invalid(42, "sicbo-a").await);
        assert!(!registry.is_active(42, "sicbo-a").await);
    }

    #[tokio::test]
    async fn test_inactive_subscription_never_deactivates() {
        let (registry, _) = test_registry(test_pool().await).await;

        registry.set_active(42, "sicbo-a", false).await;
        assert!(!registry.deactivate_if_license_invalid(42, "sicbo-a").await);
    }

    #[tokio::test]
    async fn test_subscriptions_persist_and_reload() {
        let pool = test_pool().await;
        let (registry, licenses) = test_registry(pool.clone()).await;

        licenses.create("GOLD-1", 2, None).await.expect("Create failed");
        registry.attach_license(42, "sicbo-a", "GOLD-1").await;
        registry.set_active(42, "sicbo-a", true).await;

        wait_for_persisted(&pool, |rows| {
            rows.iter().any(|r| {
                r.subscriber_id == 42
                    && r.feed == "sicbo-a"
                    && r.active
                    && r.license_id.as_deref() == Some("GOLD-1")
            })
        })
        .await;

        let reloaded = SubscriberRegistry::load(pool, licenses)
            .await
            .expect("Registry reload failed");
        assert!(reloaded.is_active(42, "sicbo-a").await);
        assert_eq!(
            reloaded.license_of(42, "sicbo-a").await.as_deref(),
            Some("GOLD-1")
        );
    }
}
