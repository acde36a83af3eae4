//! Metadata Catalog.
//!
//! One record per user collection, stored in the reserved `_metadata`
//! collection. The catalog is itself a [`Collection`], so identifier-field
//! changes and array-index registrations persist through the normal update
//! path rather than a second code path.

use std::sync::Arc;

use serde_json::json;

use doclite_core::{ArrayIndexMeta, CollectionMeta, Result, UpdateOptions};

use crate::collection::Collection;
use crate::sqlite::Db;

#[derive(Debug)]
pub(crate) struct Catalog {
    collection: Collection,
}

impl Catalog {
    pub async fn open(db: Arc<Db>) -> Result<Self> {
        let collection = Collection::open_catalog(db).await?;
        Ok(Self { collection })
    }

    /// Load the metadata record for a collection.
    pub async fn load(&self, name: &str) -> Result<Option<CollectionMeta>> {
        match self.collection.find_one(&json!({ "_id": name })).await? {
            Some(doc) => Ok(Some(serde_json::from_value(doc)?)),
            None => Ok(None),
        }
    }

    /// Load the record for a collection, creating a default one on first
    /// open.
    pub async fn ensure(&self, name: &str, id_field: &str) -> Result<CollectionMeta> {
        if let Some(meta) = self.load(name).await? {
            return Ok(meta);
        }

        let meta = CollectionMeta::new(name, id_field);
        self.collection.insert(&serde_json::to_value(&meta)?).await?;
        Ok(meta)
    }

    /// Append an array-index registration to a collection's record.
    pub async fn add_array_index(&self, name: &str, index: &ArrayIndexMeta) -> Result<()> {
        self.collection
            .update(
                &json!({ "_id": name }),
                &json!({ "$push": { "arrayIndexes": serde_json::to_value(index)? } }),
                UpdateOptions::default(),
            )
            .await
    }

    /// Persist a changed identifier field.
    pub async fn set_id_field(&self, name: &str, id_field: &str) -> Result<()> {
        self.collection
            .update(
                &json!({ "_id": name }),
                &json!({ "$set": { "idField": id_field } }),
                UpdateOptions::default(),
            )
            .await
    }
}
