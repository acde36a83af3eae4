//! SQL identifier quoting and JSON path formatting.
//!
//! Collection and index names may contain arbitrary characters (`-`, `%`,
//! `.`), so every identifier is double-quoted on emission. Names containing a
//! literal double quote cannot be quoted safely and are rejected.

use doclite_core::{DocError, Result};

/// Double-quote an identifier for embedding in SQL.
pub fn quote_ident(name: &str) -> Result<String> {
    if name.contains('"') {
        return Err(DocError::InvalidName {
            name: name.to_string(),
        });
    }
    Ok(format!("\"{}\"", name))
}

/// JSON path text for a dot-path field, without surrounding quotes.
///
/// Single quotes are doubled so the result can be spliced into a SQL string
/// literal.
pub fn json_path_text(field: &str) -> String {
    format!("$.{}", field.replace('\'', "''"))
}

/// JSON path as a SQL string literal, e.g. `'$.address.city'`.
pub fn json_path(field: &str) -> String {
    format!("'{}'", json_path_text(field))
}

/// `json_extract` expression for a field of a quoted table.
pub fn extract_expr(table: &str, field: &str) -> String {
    format!("json_extract({}.document,{})", table, json_path(field))
}

/// Name of the array-index side table for a collection path.
pub fn index_table_name(collection: &str, path: &str) -> String {
    format!("{}_{}", collection, path)
}

/// Name of the value index on an array-index side table.
pub fn value_index_name(table: &str) -> String {
    format!("idx_{}_value", table)
}
