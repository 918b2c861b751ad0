//! MySQL-backed persistent store for the replica inventory (section 4.1).
//!
//! [`Store`] wraps a connection pool; [`load::load_data`] and
//! [`save::save_data`] do the actual work and are also exposed directly for
//! callers that already hold a `Conn` (the full-save swap needs exclusive
//! use of one connection for its temporary tables and transaction).

pub mod filters;
pub mod id_cache;
pub mod load;
pub mod save;
pub mod schema;
mod temp_table;

use dynamo_errors::{DynamoError, DynamoResult};
use dynamo_model::Inventory;
use mysql_async::prelude::*;
use mysql_async::{Opts, Pool};
use tracing::warn;

pub use filters::LoadFilters;
pub use id_cache::IdCache;

/// A connection pool to the inventory database, plus the id cache kept
/// alongside it for incremental saves.
pub struct Store {
    pool: Pool,
    pub ids: IdCache,
}

impl Store {
    pub fn new(url: &str) -> DynamoResult<Store> {
        let opts = Opts::from_url(url).map_err(|e| DynamoError::config(format!("invalid database url: {e}")))?;
        Ok(Store {
            pool: Pool::new(opts),
            ids: IdCache::new(),
        })
    }

    /// `true` if a connection can be established and a trivial query
    /// answered. Never returns an error itself; used by startup health
    /// checks that want a boolean rather than a propagated failure.
    pub async fn check_connection(&self) -> bool {
        match self.pool.get_conn().await {
            Ok(mut conn) => match conn.query_drop("SELECT 1").await {
                Ok(()) => true,
                Err(err) => {
                    warn!(%err, "store health check query failed");
                    false
                }
            },
            Err(err) => {
                warn!(%err, "store health check failed to acquire a connection");
                false
            }
        }
    }

    pub async fn load(&self, inventory: &mut Inventory, filters: &LoadFilters) -> DynamoResult<()> {
        let mut conn = self.pool.get_conn().await.map_err(|e| DynamoError::store("acquire connection", e))?;
        load::load_data(&mut conn, inventory, filters).await
    }

    /// Full swap-table save (section 4.1). Clears [`Store::ids`] afterward
    /// since a full save renumbers every persisted id.
    pub async fn save_full(&mut self, inventory: &mut Inventory) -> DynamoResult<()> {
        let mut conn = self.pool.get_conn().await.map_err(|e| DynamoError::store("acquire connection", e))?;
        save::save_data(&mut conn, inventory).await?;
        self.ids.clear();
        Ok(())
    }

    pub async fn get_conn(&self) -> DynamoResult<mysql_async::Conn> {
        self.pool.get_conn().await.map_err(|e| DynamoError::store("acquire connection", e))
    }

    pub async fn close(self) -> DynamoResult<()> {
        self.pool.disconnect().await.map_err(|e| DynamoError::store("close pool", e))
    }
}
