//! Collection Orchestrator.
//!
//! Binds the query and update compilers to concrete operations against one
//! primary table. Multi-statement operations run inside savepoint-scoped
//! transactions; upsert follows the Mongo seeding rules (insert a
//! replacement verbatim, or a `$`-stripped clone of the query followed by
//! the operator update).

use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, RwLock};

use serde_json::{Map, Value};
use tracing::{debug, info};

use doclite_core::{
    generate_id, inject_id, take_id, ArrayIndexMeta, DeleteOptions, DocError, Result, SortOrder,
    UpdateOptions, DEFAULT_ID_FIELD, METADATA_COLLECTION,
};
use doclite_query::sql::{json_path, quote_ident};
use doclite_query::{
    compile, compile_update, normalize, parse, CompiledQuery, QueryContext, UpdateOp, UpdatePlan,
    UpdateStatement,
};

use crate::array_index;
use crate::catalog::Catalog;
use crate::cursor::Cursor;
use crate::sqlite::{Db, Savepoint};

/// A named collection of documents.
///
/// Immutable after open, except for the identifier field and the
/// array-index map, which are snapshot-read at the start of every operation
/// and swapped only on successful mutation.
#[derive(Debug)]
pub struct Collection {
    name: String,
    db: Arc<Db>,
    catalog: Option<Arc<Catalog>>,
    id_field: RwLock<String>,
    array_indexes: RwLock<BTreeMap<String, String>>,
}

fn create_primary_table(db: &Db, name: &str) -> Result<()> {
    let table = quote_ident(name)?;
    db.execute_batch(&format!(
        "CREATE TABLE IF NOT EXISTS {} (_id TEXT PRIMARY KEY, document JSON)",
        table
    ))
}

/// Parse a stored row back into a document, injecting the identifier.
fn hydrate(id: &str, body: &str, id_field: &str) -> Result<Value> {
    let map: Map<String, Value> = serde_json::from_str(body)?;
    Ok(Value::Object(inject_id(map, id_field, id)))
}

fn single_entry(key: &str, value: Value) -> Value {
    let mut map = Map::new();
    map.insert(key.to_string(), value);
    Value::Object(map)
}

/// Conjoin `{key: {$nin: [value]}}` onto a query.
fn augment_with_nin(query: &Value, key: &str, value: &Value) -> Value {
    let guard = single_entry(key, single_entry("$nin", Value::Array(vec![value.clone()])));
    match query.as_object() {
        Some(obj) if !obj.is_empty() => {
            single_entry("$and", Value::Array(vec![query.clone(), guard]))
        }
        _ => guard,
    }
}

/// Upsert seed: the query with every `$`-prefixed key stripped. A field
/// whose value object held only operators carries no seedable value and is
/// dropped entirely.
fn strip_operators(query: &Value) -> Value {
    match query.as_object() {
        Some(obj) => {
            let mut out = Map::new();
            for (key, value) in obj {
                if key.starts_with('$') {
                    continue;
                }
                match value {
                    Value::Object(inner) => {
                        let had_operators = inner.keys().any(|k| k.starts_with('$'));
                        let stripped = strip_operators(value);
                        let empty = stripped.as_object().map(Map::is_empty).unwrap_or(true);
                        if empty && had_operators {
                            continue;
                        }
                        out.insert(key.clone(), stripped);
                    }
                    other => {
                        out.insert(key.clone(), other.clone());
                    }
                }
            }
            Value::Object(out)
        }
        None => Value::Object(Map::new()),
    }
}

impl Collection {
    /// Open a user collection: create its primary table, load (or create)
    /// its metadata record, and populate the array-index map.
    pub(crate) async fn open(
        db: Arc<Db>,
        catalog: Arc<Catalog>,
        name: &str,
        id_field: Option<&str>,
    ) -> Result<Self> {
        create_primary_table(&db, name)?;

        let mut meta = catalog
            .ensure(name, id_field.unwrap_or(DEFAULT_ID_FIELD))
            .await?;

        // An explicitly requested identifier field wins over the stored one.
        if let Some(requested) = id_field {
            if requested != meta.id_field {
                catalog.set_id_field(name, requested).await?;
                meta.id_field = requested.to_string();
            }
        }

        let array_indexes: BTreeMap<String, String> = meta
            .array_indexes
            .iter()
            .map(|ai| (ai.keypath.clone(), ai.index_table.clone()))
            .collect();

        info!(
            "Opened collection {} (idField {}, {} array indexes)",
            name,
            meta.id_field,
            array_indexes.len()
        );

        Ok(Self {
            name: name.to_string(),
            db,
            catalog: Some(catalog),
            id_field: RwLock::new(meta.id_field),
            array_indexes: RwLock::new(array_indexes),
        })
    }

    /// Open the reserved metadata collection. It bootstraps itself with the
    /// defaults rather than consulting a catalog.
    pub(crate) async fn open_catalog(db: Arc<Db>) -> Result<Self> {
        create_primary_table(&db, METADATA_COLLECTION)?;
        Ok(Self {
            name: METADATA_COLLECTION.to_string(),
            db,
            catalog: None,
            id_field: RwLock::new(DEFAULT_ID_FIELD.to_string()),
            array_indexes: RwLock::new(BTreeMap::new()),
        })
    }

    /// Collection name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The user-facing identifier field.
    pub fn id_field(&self) -> Result<String> {
        self.id_field_snapshot()
    }

    /// Change the identifier field, persisting through the catalog.
    pub async fn set_id_field(&self, id_field: &str) -> Result<()> {
        if let Some(catalog) = &self.catalog {
            catalog.set_id_field(&self.name, id_field).await?;
        }
        *self
            .id_field
            .write()
            .map_err(|e| DocError::internal(e.to_string()))? = id_field.to_string();
        Ok(())
    }

    fn id_field_snapshot(&self) -> Result<String> {
        Ok(self
            .id_field
            .read()
            .map_err(|e| DocError::internal(e.to_string()))?
            .clone())
    }

    fn array_index_snapshot(&self) -> Result<BTreeMap<String, String>> {
        Ok(self
            .array_indexes
            .read()
            .map_err(|e| DocError::internal(e.to_string()))?
            .clone())
    }

    fn compile_query(
        &self,
        query: &Value,
    ) -> Result<(CompiledQuery, Vec<(String, SortOrder)>, String)> {
        let id_field = self.id_field_snapshot()?;
        let array_indexes = self.array_index_snapshot()?;
        let parsed = parse(query)?;
        let compiled = compile(
            &parsed,
            &QueryContext {
                collection: &self.name,
                id_field: &id_field,
                array_indexes: &array_indexes,
            },
        )?;
        Ok((compiled, parsed.order, id_field))
    }

    /// Insert a document, assigning an identifier when absent. Returns the
    /// document with its identifier injected.
    pub async fn insert(&self, document: &Value) -> Result<Value> {
        let id_field = self.id_field_snapshot()?;
        let mut body = document
            .as_object()
            .cloned()
            .ok_or_else(|| DocError::malformed_update("document must be a JSON object"))?;

        let id = take_id(&mut body, &id_field)?.unwrap_or_else(generate_id);
        let serialized = Value::Object(body.clone()).to_string();

        let table = quote_ident(&self.name)?;
        let result = self.db.execute(
            &format!("INSERT INTO {} (_id, document) VALUES (?, json(?))", table),
            &[Value::String(id.clone()), Value::String(serialized)],
        );

        match result {
            Ok(_) => {
                debug!("Inserted document {} into {}", id, self.name);
                Ok(Value::Object(inject_id(body, &id_field, &id)))
            }
            Err(DocError::Database { message }) if message.contains("UNIQUE constraint") => {
                Err(DocError::DuplicateIdentifier { id })
            }
            Err(e) => Err(e),
        }
    }

    /// Insert several documents atomically.
    pub async fn insert_many(&self, documents: &[Value]) -> Result<Vec<Value>> {
        let sp = Savepoint::begin(Arc::clone(&self.db))?;
        let mut inserted = Vec::with_capacity(documents.len());

        for document in documents {
            match self.insert(document).await {
                Ok(doc) => inserted.push(doc),
                Err(e) => {
                    sp.rollback();
                    return Err(e);
                }
            }
        }

        sp.commit()?;
        Ok(inserted)
    }

    /// Insert-or-update keyed on the document's identifier.
    pub async fn save(&self, document: &Value) -> Result<Value> {
        let id_field = self.id_field_snapshot()?;
        let obj = document
            .as_object()
            .ok_or_else(|| DocError::malformed_update("document must be a JSON object"))?;

        let id_value = match obj.get(&id_field) {
            Some(v) => v.clone(),
            None => return self.insert(document).await,
        };

        let query = single_entry(&id_field, id_value);
        let sp = Savepoint::begin(Arc::clone(&self.db))?;
        match self
            .update_inner(
                &query,
                document,
                UpdateOptions {
                    multi: false,
                    upsert: true,
                },
            )
            .await
        {
            Ok(()) => sp.commit()?,
            Err(e) => {
                sp.rollback();
                return Err(e);
            }
        }

        self.find_one(&query)
            .await?
            .ok_or_else(|| DocError::internal("saved document not found"))
    }

    /// Find all documents matching a query.
    pub async fn find(&self, query: &Value) -> Result<Vec<Value>> {
        self.run_find(query, &[], None).await
    }

    /// Find the first matching document.
    pub async fn find_one(&self, query: &Value) -> Result<Option<Value>> {
        Ok(self.run_find(query, &[], Some(1)).await?.pop())
    }

    /// Lazy find builder; modifiers return a new plan.
    pub fn query(&self, filter: Value) -> Cursor<'_> {
        Cursor::new(self, filter)
    }

    pub(crate) async fn run_find(
        &self,
        query: &Value,
        order_override: &[(String, SortOrder)],
        limit: Option<u64>,
    ) -> Result<Vec<Value>> {
        let (compiled, envelope_order, id_field) = self.compile_query(query)?;
        let order: &[(String, SortOrder)] = if order_override.is_empty() {
            &envelope_order
        } else {
            order_override
        };

        let sql = compiled.select_sql(order, limit);
        let rows = self.db.query_rows(&sql, &compiled.params, |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;

        let mut documents = Vec::with_capacity(rows.len());
        for (id, body) in rows {
            documents.push(hydrate(&id, &body, &id_field)?);
        }
        Ok(documents)
    }

    /// Count matching documents.
    pub async fn count(&self, query: &Value) -> Result<u64> {
        let (compiled, _, _) = self.compile_query(query)?;
        Ok(self.db.query_scalar(&compiled.count_sql(), &compiled.params)? as u64)
    }

    /// Apply an update document to matching rows.
    pub async fn update(
        &self,
        query: &Value,
        update: &Value,
        options: UpdateOptions,
    ) -> Result<()> {
        let sp = Savepoint::begin(Arc::clone(&self.db))?;
        match self.update_inner(query, update, options).await {
            Ok(()) => sp.commit(),
            Err(e) => {
                sp.rollback();
                Err(e)
            }
        }
    }

    async fn update_inner(
        &self,
        query: &Value,
        update: &Value,
        options: UpdateOptions,
    ) -> Result<()> {
        let plan = normalize(update)?;
        let (compiled, _, id_field) = self.compile_query(query)?;

        if options.upsert {
            let probe = self
                .db
                .query_rows(&compiled.probe_sql(), &compiled.params, |row| {
                    row.get::<_, String>(0)
                })?;
            if probe.is_empty() {
                return self.upsert_insert(query, update, &plan, &id_field).await;
            }
        }

        let plain_query = query.get("$query").unwrap_or(query);

        match plan {
            UpdatePlan::Replace(_) => {
                let statements = compile_update(&plan, &compiled, &id_field, options.multi)?;
                self.execute_updates(&statements)
            }
            UpdatePlan::Apply(ops) => {
                let (direct, deferred): (Vec<_>, Vec<_>) = ops
                    .into_iter()
                    .partition(|op| !matches!(op, UpdateOp::AddToSet { .. }));

                if !direct.is_empty() {
                    let statements = compile_update(
                        &UpdatePlan::Apply(direct),
                        &compiled,
                        &id_field,
                        options.multi,
                    )?;
                    self.execute_updates(&statements)?;
                }

                // $addToSet re-expressed: push only where the value is not
                // already contained.
                for op in deferred {
                    if let UpdateOp::AddToSet { key, value } = op {
                        let guarded = augment_with_nin(plain_query, &key, &value);
                        let push = single_entry("$push", single_entry(&key, value));
                        let recurse: Pin<Box<dyn Future<Output = Result<()>> + '_>> =
                            Box::pin(self.update_inner(
                                &guarded,
                                &push,
                                UpdateOptions {
                                    multi: options.multi,
                                    upsert: false,
                                },
                            ));
                        recurse.await?;
                    }
                }
                Ok(())
            }
        }
    }

    /// Upsert with no matching row: insert a replacement verbatim, or seed
    /// from the `$`-stripped query and re-run the operator update against
    /// the seeded document.
    async fn upsert_insert(
        &self,
        query: &Value,
        update: &Value,
        plan: &UpdatePlan,
        id_field: &str,
    ) -> Result<()> {
        let plain_query = query.get("$query").unwrap_or(query);

        match plan {
            UpdatePlan::Replace(body) => {
                let mut body = body.clone();
                let id = match take_id(&mut body, id_field)? {
                    Some(id) => id,
                    None => match plain_query.get(id_field).and_then(Value::as_str) {
                        Some(id) => id.to_string(),
                        None => generate_id(),
                    },
                };
                let doc = Value::Object(inject_id(body, id_field, &id));
                self.insert(&doc).await?;
                Ok(())
            }
            UpdatePlan::Apply(_) => {
                let seed = strip_operators(plain_query);
                let seeded = self.insert(&seed).await?;
                let recurse: Pin<Box<dyn Future<Output = Result<()>> + '_>> =
                    Box::pin(self.update_inner(&seeded, update, UpdateOptions::default()));
                recurse.await
            }
        }
    }

    fn execute_updates(&self, statements: &[UpdateStatement]) -> Result<()> {
        for statement in statements {
            let affected = self.db.execute(&statement.sql, &statement.params)?;
            debug!("Updated {} rows in {}", affected, self.name);
        }
        Ok(())
    }

    /// Delete matching documents, returning the number removed.
    pub async fn delete(&self, query: &Value, options: DeleteOptions) -> Result<u64> {
        let (compiled, _, _) = self.compile_query(query)?;

        let sp = Savepoint::begin(Arc::clone(&self.db))?;
        match self
            .db
            .execute(&compiled.delete_sql(options.just_one), &compiled.params)
        {
            Ok(affected) => {
                sp.commit()?;
                debug!("Deleted {} documents from {}", affected, self.name);
                Ok(affected as u64)
            }
            Err(e) => {
                sp.rollback();
                Err(e)
            }
        }
    }

    /// Create a path-based B-tree index on the primary table.
    pub async fn ensure_index(&self, keys: &[(&str, SortOrder)], unique: bool) -> Result<()> {
        if keys.is_empty() {
            return Err(DocError::invalid_operand(
                "ensureIndex",
                "expected at least one keypath",
            ));
        }

        let id_field = self.id_field_snapshot()?;
        let table = quote_ident(&self.name)?;
        let index_name = format!(
            "idx_{}_{}",
            self.name,
            keys.iter().map(|(p, _)| *p).collect::<Vec<_>>().join("_")
        );
        let index = quote_ident(&index_name)?;

        let columns: Vec<String> = keys
            .iter()
            .map(|(path, dir)| {
                let expr = if *path == id_field {
                    "_id".to_string()
                } else {
                    format!("json_extract(document,{})", json_path(path))
                };
                format!("{} {}", expr, dir.as_sql())
            })
            .collect();

        let uniqueness = if unique { "UNIQUE " } else { "" };
        self.db.execute_batch(&format!(
            "CREATE {}INDEX IF NOT EXISTS {} ON {}({})",
            uniqueness,
            index,
            table,
            columns.join(", ")
        ))
    }

    /// Materialize an array index on `path`, registering it in the catalog
    /// and the in-memory map. No-op when the path is already indexed.
    pub async fn ensure_array_index(&self, path: &str, order: SortOrder) -> Result<()> {
        if self
            .array_indexes
            .read()
            .map_err(|e| DocError::internal(e.to_string()))?
            .contains_key(path)
        {
            return Ok(());
        }

        let sp = Savepoint::begin(Arc::clone(&self.db))?;
        let result: Result<String> = async {
            let side = array_index::create(&self.db, &self.name, path, order)?;
            if let Some(catalog) = &self.catalog {
                catalog
                    .add_array_index(
                        &self.name,
                        &ArrayIndexMeta {
                            keypath: path.to_string(),
                            index_table: side.clone(),
                        },
                    )
                    .await?;
            }
            Ok(side)
        }
        .await;

        match result {
            Ok(side) => {
                sp.commit()?;
                self.array_indexes
                    .write()
                    .map_err(|e| DocError::internal(e.to_string()))?
                    .insert(path.to_string(), side);
                info!("Created array index on {}.{}", self.name, path);
                Ok(())
            }
            Err(e) => {
                sp.rollback();
                Err(e)
            }
        }
    }
}
