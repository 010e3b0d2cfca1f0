//! License store
//!
//! Licenses gate access to prediction broadcasts. Each license carries a
//! redemption budget (`max_uses`) and an optional expiry. The full set is
//! loaded at startup and held in memory; every mutation writes to the
//! database before touching the in-memory copy, under a single write lock
//! so concurrent redeem/revoke on the same id cannot interleave.
//!
//! Expiry is evaluated lazily at check time. There is no background sweep;
//! an expired license is only acted on when something asks about it.

use crate::db;
use crate::error::Result;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use sqlx::SqlitePool;
use thiserror::Error;
use tokio::sync::RwLock;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LicenseError {
    #[error("License '{0}' already exists")]
    AlreadyExists(String),
    #[error("License '{0}' not found")]
    NotFound(String),
    #[error("License '{0}' has been revoked")]
    Inactive(String),
    #[error("License '{0}' has expired")]
    Expired(String),
    #[error("License '{0}' has no redemptions remaining")]
    LimitReached(String),
    #[error("License '{0}' was already redeemed by subscriber {1}")]
    AlreadyRedeemed(String, i64),
}

#[derive(Debug, Clone, Serialize)]
pub struct License {
    pub id: String,
    pub max_uses: u32,
    /// Subscribers that redeemed this license, in redemption order.
    pub used_by: Vec<i64>,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub active: bool,
}

impl License {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map_or(false, |t| now >= t)
    }

    pub fn has_room(&self) -> bool {
        self.used_by.len() < self.max_uses as usize
    }

    /// True when the license is active, unexpired, and either already covers
    /// `subscriber` or still has room for another redemption.
    pub fn permits(&self, subscriber: i64, now: DateTime<Utc>) -> bool {
        self.active
            && !self.is_expired_at(now)
            && (self.used_by.contains(&subscriber) || self.has_room())
    }
}

/// In-memory license set backed by the licenses and license_uses tables.
pub struct LicenseStore {
    pool: SqlitePool,
    // Vec rather than a map: List() must report insertion order.
    licenses: RwLock<Vec<License>>,
}

impl LicenseStore {
    /// Load every license and recorded redemption from the database.
    pub async fn load(pool: SqlitePool) -> Result<Self> {
        let (rows, uses) = db::licenses::load_all(&pool).await?;

        let mut licenses = Vec::with_capacity(rows.len());
        for row in rows {
            let used_by = uses
                .iter()
                .filter(|u| u.license_id == row.id)
                .map(|u| u.subscriber_id)
                .collect();
            licenses.push(License {
                id: row.id,
                max_uses: row.max_uses as u32,
                used_by,
                created_at: row.created_at,
                expires_at: row.expires_at,
                active: row.active,
            });
        }

        Ok(Self {
            pool,
            licenses: RwLock::new(licenses),
        })
    }

    /// Create a license with a redemption budget and optional time-to-live.
    pub async fn create(
        &self,
        id: &str,
        max_uses: u32,
        ttl: Option<Duration>,
    ) -> Result<License> {
        if max_uses == 0 {
            return Err(crate::error::Error::BadRequest(
                "max_uses must be at least 1".to_string(),
            ));
        }

        let mut licenses = self.licenses.write().await;
        if licenses.iter().any(|l| l.id == id) {
            return Err(LicenseError::AlreadyExists(id.to_string()).into());
        }

        let now = Utc::now();
        let license = License {
            id: id.to_string(),
            max_uses,
            used_by: Vec::new(),
            created_at: now,
            expires_at: ttl.map(|t| now + t),
            active: true,
        };

        db::licenses::insert(
            &self.pool,
            &db::licenses::LicenseRow {
                id: license.id.clone(),
                max_uses: license.max_uses as i64,
                created_at: license.created_at,
                expires_at: license.expires_at,
                active: license.active,
            },
        )
        .await?;

        licenses.push(license.clone());
        Ok(license)
    }

    /// Record a redemption by `subscriber`. Checks run in a fixed order so
    /// callers see the most specific failure first.
    pub async fn redeem(&self, id: &str, subscriber: i64) -> Result<License> {
        let mut licenses = self.licenses.write().await;
        let license = licenses
            .iter_mut()
            .find(|l| l.id == id)
            .ok_or_else(|| LicenseError::NotFound(id.to_string()))?;

        if !license.active {
            return Err(LicenseError::Inactive(id.to_string()).into());
        }
        let now = Utc::now();
        if license.is_expired_at(now) {
            return Err(LicenseError::Expired(id.to_string()).into());
        }
        if license.used_by.contains(&subscriber) {
            return Err(LicenseError::AlreadyRedeemed(id.to_string(), subscriber).into());
        }
        if !license.has_room() {
            return Err(LicenseError::LimitReached(id.to_string()).into());
        }

        db::licenses::insert_use(&self.pool, id, subscriber, now).await?;
        license.used_by.push(subscriber);
        Ok(license.clone())
    }

    /// True when the license permits `subscriber` right now. Pure read; the
    /// deactivation that follows an expired license is the registry's
    /// explicit `deactivate_if_license_invalid`, never a side effect here.
    pub async fn is_valid(&self, id: &str, subscriber: i64) -> bool {
        let licenses = self.licenses.read().await;
        licenses
            .iter()
            .find(|l| l.id == id)
            .map_or(false, |l| l.permits(subscriber, Utc::now()))
    }

    /// Mark a license inactive. Recorded redemptions are kept.
    pub async fn revoke(&self, id: &str) -> Result<()> {
        let mut licenses = self.licenses.write().await;
        let license = licenses
            .iter_mut()
            .find(|l| l.id == id)
            .ok_or_else(|| LicenseError::NotFound(id.to_string()))?;

        db::licenses::set_active(&self.pool, id, false).await?;
        license.active = false;
        Ok(())
    }

    /// Delete a license and its recorded redemptions.
    pub async fn remove(&self, id: &str) -> Result<()> {
        let mut licenses = self.licenses.write().await;
        let index = licenses
            .iter()
            .position(|l| l.id == id)
            .ok_or_else(|| LicenseError::NotFound(id.to_string()))?;

        db::licenses::delete(&self.pool, id).await?;
        licenses.remove(index);
        Ok(())
    }

    /// Delete every license. Returns the number removed.
    pub async fn purge_all(&self) -> Result<u64> {
        let mut licenses = self.licenses.write().await;
        let removed = db::licenses::purge_all(&self.pool).await?;
        licenses.clear();
        Ok(removed)
    }

    pub async fn get(&self, id: &str) -> Option<License> {
        let licenses = self.licenses.read().await;
        licenses.iter().find(|l| l.id == id).cloned()
    }

    /// All licenses in creation order.
    pub async fn list(&self) -> Vec<License> {
        self.licenses.read().await.clone()
    }
}
