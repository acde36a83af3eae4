//! Lazy find builder.
//!
//! Each modifier consumes the cursor and returns a new plan; nothing is
//! executed until a terminal call (`to_vec`, `first`, `count`). Clone the
//! cursor to branch plans.

use serde_json::Value;

use doclite_core::{Result, SortOrder};

use crate::collection::Collection;

/// A query plan over one collection.
#[derive(Clone)]
pub struct Cursor<'a> {
    collection: &'a Collection,
    filter: Value,
    order: Vec<(String, SortOrder)>,
    limit: Option<u64>,
}

impl<'a> Cursor<'a> {
    pub(crate) fn new(collection: &'a Collection, filter: Value) -> Self {
        Self {
            collection,
            filter,
            order: Vec::new(),
            limit: None,
        }
    }

    /// Add a sort term. Later terms break ties of earlier ones.
    pub fn sort(mut self, path: &str, order: SortOrder) -> Self {
        self.order.push((path.to_string(), order));
        self
    }

    /// Cap the number of returned documents.
    pub fn limit(mut self, n: u64) -> Self {
        self.limit = Some(n);
        self
    }

    /// Alias for [`limit`](Self::limit).
    pub fn take(self, n: u64) -> Self {
        self.limit(n)
    }

    /// Execute and collect all matching documents.
    pub async fn to_vec(self) -> Result<Vec<Value>> {
        self.collection
            .run_find(&self.filter, &self.order, self.limit)
            .await
    }

    /// Execute and return the first document, if any.
    pub async fn first(self) -> Result<Option<Value>> {
        Ok(self
            .collection
            .run_find(&self.filter, &self.order, Some(1))
            .await?
            .pop())
    }

    /// Count matching documents. The limit does not apply.
    pub async fn count(self) -> Result<u64> {
        self.collection.count(&self.filter).await
    }
}

#[cfg(test)]
mod tests {
    use crate::store::Store;
    use doclite_core::SortOrder;
    use serde_json::json;

    async fn seeded() -> Store {
        let store = Store::open_memory().await.unwrap();
        let col = store.collection("nums", None).await.unwrap();
        col.insert_many(&[
            json!({"n": 3, "tag": "odd"}),
            json!({"n": 1, "tag": "odd"}),
            json!({"n": 2, "tag": "even"}),
        ])
        .await
        .unwrap();
        store
    }

    #[tokio::test]
    async fn test_sort_and_limit() {
        let store = seeded().await;
        let col = store.collection("nums", None).await.unwrap();

        let docs = col
            .query(json!({}))
            .sort("n", SortOrder::Ascending)
            .limit(2)
            .to_vec()
            .await
            .unwrap();
        let ns: Vec<i64> = docs.iter().map(|d| d["n"].as_i64().unwrap()).collect();
        assert_eq!(ns, vec![1, 2]);
    }

    #[tokio::test]
    async fn test_first_and_count() {
        let store = seeded().await;
        let col = store.collection("nums", None).await.unwrap();

        let first = col
            .query(json!({"tag": "odd"}))
            .sort("n", SortOrder::Descending)
            .first()
            .await
            .unwrap()
            .unwrap();
        assert_eq!(first["n"], json!(3));

        assert_eq!(col.query(json!({"tag": "odd"})).count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_modifiers_build_new_plans() {
        let store = seeded().await;
        let col = store.collection("nums", None).await.unwrap();

        let base = col.query(json!({})).sort("n", SortOrder::Ascending);
        let limited = base.clone().limit(1);

        assert_eq!(base.to_vec().await.unwrap().len(), 3);
        assert_eq!(limited.to_vec().await.unwrap().len(), 1);
    }
}
