//! Store facade: open a database, hand out collections, scope transactions.

use std::future::Future;
use std::sync::Arc;

use tracing::info;

use doclite_core::{DocError, Result, StoreConfig, METADATA_COLLECTION};

use crate::catalog::Catalog;
use crate::collection::Collection;
use crate::sqlite::{Db, Savepoint};

/// An open document store.
pub struct Store {
    db: Arc<Db>,
    catalog: Arc<Catalog>,
}

impl Store {
    /// Open or create a store with the given configuration.
    pub async fn open(config: StoreConfig) -> Result<Self> {
        let db = Arc::new(Db::open(&config)?);
        let catalog = Arc::new(Catalog::open(Arc::clone(&db)).await?);
        info!("Store opened at {:?}", config.path);
        Ok(Self { db, catalog })
    }

    /// Open an in-memory store (for testing).
    pub async fn open_memory() -> Result<Self> {
        let db = Arc::new(Db::open_memory()?);
        let catalog = Arc::new(Catalog::open(Arc::clone(&db)).await?);
        Ok(Self { db, catalog })
    }

    /// Get a collection handle, initializing it on first open.
    ///
    /// `id_field` overrides the persisted identifier field for this
    /// collection; pass `None` to keep the stored (or default `_id`) one.
    pub async fn collection(&self, name: &str, id_field: Option<&str>) -> Result<Collection> {
        if name == METADATA_COLLECTION {
            return Err(DocError::InvalidName {
                name: name.to_string(),
            });
        }

        Collection::open(
            Arc::clone(&self.db),
            Arc::clone(&self.catalog),
            name,
            id_field,
        )
        .await
    }

    /// Run a future inside a savepoint-scoped transaction: commit on
    /// success, roll back and re-raise on failure. Nests freely.
    pub async fn within_transaction<T, Fut>(&self, f: impl FnOnce() -> Fut) -> Result<T>
    where
        Fut: Future<Output = Result<T>>,
    {
        let sp = Savepoint::begin(Arc::clone(&self.db))?;
        match f().await {
            Ok(value) => {
                sp.commit()?;
                Ok(value)
            }
            Err(e) => {
                sp.rollback();
                Err(e)
            }
        }
    }

    /// Close the store, dropping the underlying connection.
    pub fn close(self) {}
}
