//! Per-asset aggregated-trade stores.
//!
//! Each asset gets its own SQLite file (lowercase basename) under a sibling
//! directory of the primary store, so cross-asset historical pulls never
//! contend on one writer.

use std::collections::HashMap;
use std::path::PathBuf;

use anyhow::Result;
use tokio::sync::Mutex;

use crate::db::Database;

/// Opens and caches per-asset stores.
#[derive(Debug)]
pub struct AssetStoreManager {
    dir: PathBuf,
    stores: Mutex<HashMap<String, Database>>,
}

impl AssetStoreManager {
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            stores: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the store for `asset`, opening (and migrating) it on first
    /// use. Asset names are case-insensitive; files are lowercase.
    ///
    /// # Errors
    /// Returns an error when the store cannot be opened.
    pub async fn store_for(&self, asset: &str) -> Result<Database> {
        let key = asset.to_lowercase();
        let mut stores = self.stores.lock().await;
        if let Some(db) = stores.get(&key) {
            return Ok(db.clone());
        }

        let path = self.dir.join(format!("{key}.sqlite"));
        let db = Database::open_asset_store(&path).await?;
        stores.insert(key, db.clone());
        Ok(db)
    }

    /// Closes every opened store.
    pub async fn close_all(&self) {
        let mut stores = self.stores.lock().await;
        for (_, db) in stores.drain() {
            db.close().await;
        }
    }
}
