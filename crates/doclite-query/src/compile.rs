//! Query Compiler: walks the AST and emits parameterized SQL fragments.
//!
//! The product is a [`CompiledQuery`] triple `(where, join, params)` that the
//! orchestrator embeds into `SELECT`, `UPDATE`, and `DELETE` statements.
//! Parameters align with `?` placeholders in join-then-where order. The
//! compiler is pure; it never touches the database.

use std::collections::BTreeMap;

use doclite_core::{DocError, Result, SortOrder};
use serde_json::Value;

use crate::ast::{CompareOp, ParsedQuery, QueryNode};
use crate::sql::{extract_expr, json_path, quote_ident};

/// Everything the compiler needs to know about the target collection.
#[derive(Debug, Clone)]
pub struct QueryContext<'a> {
    /// Collection name (unquoted).
    pub collection: &'a str,

    /// User-facing identifier field; rewritten to the `_id` column.
    pub id_field: &'a str,

    /// Snapshot of the path → side-table map for indexed array paths.
    pub array_indexes: &'a BTreeMap<String, String>,
}

/// A compiled query: SQL fragments plus their positional parameters.
#[derive(Debug, Clone)]
pub struct CompiledQuery {
    table: String,
    id_field: String,

    /// Boolean expression over the primary table and any joined tables.
    pub where_sql: String,

    /// Join clauses introduced by array-containment predicates. Starts with
    /// a space or comma so it splices directly after the table name.
    pub join_sql: String,

    /// Positional parameters, join-then-where, left to right.
    pub params: Vec<Value>,
}

/// Compile a parsed query against a collection context.
pub fn compile(query: &ParsedQuery, ctx: &QueryContext<'_>) -> Result<CompiledQuery> {
    let table = quote_ident(ctx.collection)?;
    let mut compiler = Compiler {
        ctx,
        table: table.clone(),
        alias_seq: 0,
    };

    let frag = match &query.root {
        Some(node) => compiler.node(node)?,
        None => Fragment::always(),
    };

    Ok(CompiledQuery {
        table,
        id_field: ctx.id_field.to_string(),
        where_sql: frag.where_sql,
        join_sql: frag.join_sql,
        params: frag.params,
    })
}

struct Fragment {
    where_sql: String,
    join_sql: String,
    params: Vec<Value>,
}

impl Fragment {
    /// The always-true predicate, for empty queries.
    fn always() -> Self {
        Self {
            where_sql: "1".to_string(),
            join_sql: String::new(),
            params: Vec::new(),
        }
    }

    fn constant(truth: bool) -> Self {
        Self {
            where_sql: if truth { "1" } else { "0" }.to_string(),
            join_sql: String::new(),
            params: Vec::new(),
        }
    }
}

struct Compiler<'a> {
    ctx: &'a QueryContext<'a>,
    table: String,
    alias_seq: u32,
}

impl Compiler<'_> {
    fn node(&mut self, node: &QueryNode) -> Result<Fragment> {
        match node {
            QueryNode::Logical { op, parts } => {
                let mut clauses = Vec::with_capacity(parts.len());
                let mut join_sql = String::new();
                let mut params = Vec::new();

                for part in parts {
                    let frag = self.node(part)?;
                    clauses.push(format!("({})", frag.where_sql));
                    join_sql.push_str(&frag.join_sql);
                    params.extend(frag.params);
                }

                Ok(Fragment {
                    where_sql: clauses.join(&format!(" {} ", op.as_sql())),
                    join_sql,
                    params,
                })
            }
            QueryNode::Predicate {
                field,
                op,
                operand,
                negated,
            } => self.predicate(field, *op, operand, *negated),
        }
    }

    fn predicate(
        &mut self,
        field: &str,
        op: CompareOp,
        operand: &Value,
        negated: bool,
    ) -> Result<Fragment> {
        match op {
            CompareOp::In => self.containment(field, operand, false),
            CompareOp::Nin => self.containment(field, operand, true),
            _ => {
                let expr = self.field_expr(field);
                let where_sql = if negated {
                    // $not flips the single leaf comparator.
                    if op == CompareOp::Eq {
                        format!("{} IS NOT ?", expr)
                    } else {
                        format!("NOT ({} {} ?)", expr, op.as_sql())
                    }
                } else {
                    format!("{} {} ?", expr, op.as_sql())
                };

                Ok(Fragment {
                    where_sql,
                    join_sql: String::new(),
                    params: vec![operand.clone()],
                })
            }
        }
    }

    /// Column expression for a field: the `_id` column for the identifier
    /// field, a `json_extract` otherwise.
    fn field_expr(&self, field: &str) -> String {
        if field == self.ctx.id_field {
            format!("{}._id", self.table)
        } else {
            extract_expr(&self.table, field)
        }
    }

    /// `$in`/`$nin`: containment over a JSON array path, or a plain list
    /// membership test when the field is the identifier.
    fn containment(&mut self, field: &str, operand: &Value, negate: bool) -> Result<Fragment> {
        let values = operand.as_array().ok_or_else(|| {
            DocError::invalid_operand(if negate { "NOT IN" } else { "IN" }, "expected a list")
        })?;

        // An empty list matches nothing ($in) or everything ($nin).
        if values.is_empty() {
            return Ok(Fragment::constant(negate));
        }

        let placeholders = vec!["?"; values.len()].join(",");

        if field == self.ctx.id_field {
            let token = if negate { "NOT IN" } else { "IN" };
            return Ok(Fragment {
                where_sql: format!("{}._id {} ({})", self.table, token, placeholders),
                join_sql: String::new(),
                params: values.clone(),
            });
        }

        let (join_sql, value_expr) = match self.ctx.array_indexes.get(field) {
            Some(index_table) => {
                let t = quote_ident(index_table)?;
                (
                    format!(" INNER JOIN {t} ON {t}._id = {table}._id", t = t, table = self.table),
                    format!("{}.value", t),
                )
            }
            None => {
                let alias = quote_ident(&format!("j{}", self.alias_seq))?;
                self.alias_seq += 1;
                (
                    format!(
                        ", json_each(json_extract({table}.document,{path})) AS {alias}",
                        table = self.table,
                        path = json_path(field),
                        alias = alias
                    ),
                    format!("{}.value", alias),
                )
            }
        };

        let in_where = format!("{} IN ({})", value_expr, placeholders);

        if negate {
            // Negation via subquery: the inner join stays inside so missing
            // paths do not drop rows from the outer query.
            Ok(Fragment {
                where_sql: format!(
                    "{table}._id NOT IN (SELECT {table}._id FROM {table}{join} WHERE {pred})",
                    table = self.table,
                    join = join_sql,
                    pred = in_where
                ),
                join_sql: String::new(),
                params: values.clone(),
            })
        } else {
            Ok(Fragment {
                where_sql: in_where,
                join_sql,
                params: values.clone(),
            })
        }
    }
}

impl CompiledQuery {
    /// The quoted primary-table name.
    pub fn table(&self) -> &str {
        &self.table
    }

    /// Whether any array-containment join was introduced.
    pub fn has_join(&self) -> bool {
        !self.join_sql.is_empty()
    }

    fn order_by(&self, order: &[(String, SortOrder)]) -> String {
        let terms: Vec<String> = order
            .iter()
            .map(|(path, dir)| {
                let expr = if path == &self.id_field {
                    format!("{}._id", self.table)
                } else {
                    extract_expr(&self.table, path)
                };
                format!("{} {}", expr, dir.as_sql())
            })
            .collect();
        terms.join(", ")
    }

    /// Full `SELECT` returning `(_id, document)` rows.
    ///
    /// With a join present the row set is deduplicated through an `IN
    /// (SELECT DISTINCT ...)` subquery, since the join multiplies rows by
    /// array length.
    pub fn select_sql(&self, order: &[(String, SortOrder)], limit: Option<u64>) -> String {
        let mut sql = if self.has_join() {
            format!(
                "SELECT {t}._id, {t}.document FROM {t} WHERE _id IN \
                 (SELECT DISTINCT {t}._id FROM {t}{j} WHERE {w})",
                t = self.table,
                j = self.join_sql,
                w = self.where_sql
            )
        } else {
            format!(
                "SELECT {t}._id, {t}.document FROM {t} WHERE {w}",
                t = self.table,
                w = self.where_sql
            )
        };

        if !order.is_empty() {
            sql.push_str(" ORDER BY ");
            sql.push_str(&self.order_by(order));
        }
        if let Some(n) = limit {
            sql.push_str(&format!(" LIMIT {}", n));
        }
        sql
    }

    /// `SELECT COUNT` over the matching row set.
    pub fn count_sql(&self) -> String {
        if self.has_join() {
            format!(
                "SELECT COUNT(DISTINCT {t}._id) FROM {t}{j} WHERE {w}",
                t = self.table,
                j = self.join_sql,
                w = self.where_sql
            )
        } else {
            format!(
                "SELECT COUNT(*) FROM {t} WHERE {w}",
                t = self.table,
                w = self.where_sql
            )
        }
    }

    /// Cheap existence probe used by upsert.
    pub fn probe_sql(&self) -> String {
        format!(
            "SELECT {t}._id FROM {t}{j} WHERE {w} LIMIT 1",
            t = self.table,
            j = self.join_sql,
            w = self.where_sql
        )
    }

    /// Full `DELETE` statement.
    pub fn delete_sql(&self, just_one: bool) -> String {
        if self.has_join() || just_one {
            let limit = if just_one { " LIMIT 1" } else { "" };
            format!(
                "DELETE FROM {t} WHERE _id IN \
                 (SELECT DISTINCT {t}._id FROM {t}{j} WHERE {w}{l})",
                t = self.table,
                j = self.join_sql,
                w = self.where_sql,
                l = limit
            )
        } else {
            format!(
                "DELETE FROM {t} WHERE {w}",
                t = self.table,
                w = self.where_sql
            )
        }
    }

    /// Row-selection predicate for `UPDATE` statements.
    ///
    /// SQLite has no `LIMIT` on `UPDATE`, so single-row updates and any
    /// update involving a join wrap the predicate in an `_id IN (...)`
    /// subquery.
    pub fn update_predicate(&self, multi: bool) -> String {
        if multi && !self.has_join() {
            return self.where_sql.clone();
        }

        let limit = if multi { "" } else { " LIMIT 1" };
        format!(
            "_id IN (SELECT DISTINCT {t}._id FROM {t}{j} WHERE {w}{l})",
            t = self.table,
            j = self.join_sql,
            w = self.where_sql,
            l = limit
        )
    }
}
