//! Array-Index Manager.
//!
//! Materializes a JSON array path into a side table, one row per element
//! across all documents, and installs `AFTER INSERT/UPDATE/DELETE` triggers
//! on the primary table so the expansion stays consistent. The side table's
//! columns are the `json_each` shape (`key`, `value`, `type`, `atom`, ...)
//! prefixed by the owning document's `_id`, so containment queries can join
//! on `_id` and filter on the indexed `value` column.

use doclite_core::{Result, SortOrder};
use doclite_query::sql::{index_table_name, json_path, quote_ident, value_index_name};

use crate::sqlite::Db;

/// Create the side table, its value index, and the sync triggers for `path`
/// on `collection`. Runs inside the caller's transaction scope; returns the
/// side table's (unquoted) name.
pub(crate) fn create(db: &Db, collection: &str, path: &str, order: SortOrder) -> Result<String> {
    let table = quote_ident(collection)?;
    let side_name = index_table_name(collection, path);
    let side = quote_ident(&side_name)?;
    let path_lit = json_path(path);

    db.execute_batch(&format!("DROP TABLE IF EXISTS {}", side))?;
    db.execute_batch(&format!(
        "CREATE TABLE {side} AS SELECT _id, json_each.* FROM {table}, \
         json_each(document,{path})",
        side = side,
        table = table,
        path = path_lit
    ))?;

    let value_index = quote_ident(&value_index_name(&side_name))?;
    db.execute_batch(&format!(
        "CREATE INDEX {} ON {}(value {})",
        value_index,
        side,
        order.as_sql()
    ))?;

    for (suffix, body) in [
        (
            "insert",
            format!(
                "AFTER INSERT ON {table} BEGIN \
                 INSERT INTO {side} SELECT NEW._id, json_each.* \
                 FROM json_each(NEW.document,{path}); \
                 END",
                table = table,
                side = side,
                path = path_lit
            ),
        ),
        (
            "update",
            format!(
                "AFTER UPDATE ON {table} BEGIN \
                 DELETE FROM {side} WHERE _id = OLD._id; \
                 INSERT INTO {side} SELECT NEW._id, json_each.* \
                 FROM json_each(NEW.document,{path}); \
                 END",
                table = table,
                side = side,
                path = path_lit
            ),
        ),
        (
            "delete",
            format!(
                "AFTER DELETE ON {table} BEGIN \
                 DELETE FROM {side} WHERE _id = OLD._id; \
                 END",
                table = table,
                side = side
            ),
        ),
    ] {
        let trigger = quote_ident(&format!("{}_{}", side_name, suffix))?;
        db.execute_batch(&format!("DROP TRIGGER IF EXISTS {}", trigger))?;
        db.execute_batch(&format!("CREATE TRIGGER {} {}", trigger, body))?;
    }

    Ok(side_name)
}
