//! Update Compiler: normalizes update documents and emits mutation SQL.
//!
//! Compilation is two-staged. [`normalize`] turns the heterogeneous update
//! document into typed instructions, doing all validation up front; emission
//! then renders each instruction as a parameterized `UPDATE` against the row
//! set selected by a [`CompiledQuery`]. Statements execute in order inside
//! one transaction.

use std::collections::HashSet;

use doclite_core::{is_scalar, take_id, DocError, Result};
use serde_json::{Map, Number, Value};

use crate::compile::CompiledQuery;
use crate::sql::json_path_text;

/// One typed update instruction.
#[derive(Debug, Clone, PartialEq)]
pub enum UpdateOp {
    /// `$set {k: v}`
    Set { key: String, value: Value },

    /// `$inc {k: n}`
    Inc { key: String, amount: Number },

    /// `$push {k: v}`
    Push { key: String, value: Value },

    /// `$pop {k: ±1}`; `last` removes the tail, otherwise the head.
    Pop { key: String, last: bool },

    /// `$addToSet {k: v}`; expanded by the orchestrator into a `$nin`-guarded
    /// `$push` before emission.
    AddToSet { key: String, value: Value },
}

impl UpdateOp {
    /// The document key this instruction targets.
    pub fn key(&self) -> &str {
        match self {
            Self::Set { key, .. }
            | Self::Inc { key, .. }
            | Self::Push { key, .. }
            | Self::Pop { key, .. }
            | Self::AddToSet { key, .. } => key,
        }
    }
}

/// A normalized update document.
#[derive(Debug, Clone)]
pub enum UpdatePlan {
    /// No `$`-prefixed keys: the document replaces the stored body.
    Replace(Map<String, Value>),

    /// Operator clauses, in declaration order.
    Apply(Vec<UpdateOp>),
}

/// A single parameterized mutation statement.
#[derive(Debug, Clone)]
pub struct UpdateStatement {
    pub sql: String,
    pub params: Vec<Value>,
}

/// Normalize an update document into a typed plan.
///
/// Validation happens here: operator/replacement mixing, unknown operators,
/// several operators targeting one key, `$inc` with a non-number, and `$pop`
/// with anything but ±1 are all rejected before any SQL is produced.
pub fn normalize(update: &Value) -> Result<UpdatePlan> {
    let obj = update
        .as_object()
        .ok_or_else(|| DocError::malformed_update("update must be an object"))?;

    let has_operators = obj.keys().any(|k| k.starts_with('$'));
    if !has_operators {
        return Ok(UpdatePlan::Replace(obj.clone()));
    }
    if obj.keys().any(|k| !k.starts_with('$')) {
        return Err(DocError::malformed_update(
            "cannot mix operator and plain keys at the top level",
        ));
    }

    let mut ops = Vec::new();
    let mut targeted: HashSet<&str> = HashSet::new();

    for (name, clause) in obj {
        let entries = clause.as_object().filter(|o| !o.is_empty()).ok_or_else(|| {
            DocError::malformed_update(format!("{} expects a non-empty object", name))
        })?;

        for (key, value) in entries {
            if !targeted.insert(key) {
                return Err(DocError::ConflictingUpdate { key: key.clone() });
            }

            let op = match name.as_str() {
                "$set" => UpdateOp::Set {
                    key: key.clone(),
                    value: value.clone(),
                },
                "$inc" => {
                    let amount = match value {
                        Value::Number(n) => n.clone(),
                        other => {
                            return Err(DocError::invalid_operand(
                                "$inc",
                                format!("expected a number, got {}", other),
                            ))
                        }
                    };
                    UpdateOp::Inc {
                        key: key.clone(),
                        amount,
                    }
                }
                "$push" => UpdateOp::Push {
                    key: key.clone(),
                    value: value.clone(),
                },
                "$pop" => {
                    let last = match value.as_i64() {
                        Some(1) => true,
                        Some(-1) => false,
                        _ => {
                            return Err(DocError::invalid_operand(
                                "$pop",
                                format!("expected 1 or -1, got {}", value),
                            ))
                        }
                    };
                    UpdateOp::Pop {
                        key: key.clone(),
                        last,
                    }
                }
                "$addToSet" => UpdateOp::AddToSet {
                    key: key.clone(),
                    value: value.clone(),
                },
                other => return Err(DocError::unsupported_operator(other, update)),
            };
            ops.push(op);
        }
    }

    Ok(UpdatePlan::Apply(ops))
}

/// Placeholder and parameter for a value written into the document. Scalars
/// bind directly; arrays and objects pass through `json(?)` so they land as
/// JSON rather than as an opaque string.
fn bind_value(value: &Value) -> (&'static str, Value) {
    if is_scalar(value) {
        ("?", value.clone())
    } else {
        ("json(?)", Value::String(value.to_string()))
    }
}

/// Emit the ordered statement sequence for a plan.
///
/// `AddToSet` instructions must have been expanded by the caller; finding one
/// here is an internal error.
pub fn compile_update(
    plan: &UpdatePlan,
    query: &CompiledQuery,
    id_field: &str,
    multi: bool,
) -> Result<Vec<UpdateStatement>> {
    let table = query.table();
    let predicate = query.update_predicate(multi);

    match plan {
        UpdatePlan::Replace(body) => {
            let mut body = body.clone();
            take_id(&mut body, id_field)?;
            let serialized = Value::Object(body).to_string();

            let mut params = vec![Value::String(serialized)];
            params.extend(query.params.iter().cloned());

            Ok(vec![UpdateStatement {
                sql: format!("UPDATE {} SET document = json(?) WHERE {}", table, predicate),
                params,
            }])
        }
        UpdatePlan::Apply(ops) => {
            let mut statements = Vec::with_capacity(ops.len());
            for op in ops {
                emit_op(op, table, &predicate, &query.params, &mut statements)?;
            }
            Ok(statements)
        }
    }
}

fn emit_op(
    op: &UpdateOp,
    table: &str,
    predicate: &str,
    predicate_params: &[Value],
    out: &mut Vec<UpdateStatement>,
) -> Result<()> {
    match op {
        UpdateOp::Set { key, value } => {
            let (placeholder, param) = bind_value(value);
            let path = json_path_text(key);

            let mut params = vec![param];
            params.extend(predicate_params.iter().cloned());

            out.push(UpdateStatement {
                sql: format!(
                    "UPDATE {table} SET document = json_set(document,'{path}', {placeholder}) \
                     WHERE {predicate}"
                ),
                params,
            });
        }
        UpdateOp::Inc { key, amount } => {
            let path = json_path_text(key);

            let mut params = vec![Value::Number(amount.clone())];
            params.extend(predicate_params.iter().cloned());

            out.push(UpdateStatement {
                sql: format!(
                    "UPDATE {table} SET document = json_set(document,'{path}', \
                     coalesce(json_extract(document,'{path}'),0) + ?) WHERE {predicate}"
                ),
                params,
            });
        }
        UpdateOp::Push { key, value } => {
            let path = json_path_text(key);

            // Seed an empty array where the path is absent.
            out.push(UpdateStatement {
                sql: format!(
                    "UPDATE {table} SET document = json_set(document,'{path}', json_array()) \
                     WHERE ({predicate}) AND json_extract(document,'{path}') IS NULL"
                ),
                params: predicate_params.to_vec(),
            });

            let (placeholder, param) = bind_value(value);
            let mut params = vec![param];
            params.extend(predicate_params.iter().cloned());

            out.push(UpdateStatement {
                sql: format!(
                    "UPDATE {table} SET document = json_set(document, \
                     '{path}[' || json_array_length(document,'{path}') || ']', {placeholder}) \
                     WHERE {predicate}"
                ),
                params,
            });
        }
        UpdateOp::Pop { key, last } => {
            let path = json_path_text(key);
            let element = if *last {
                format!("'{path}[' || (json_array_length(document,'{path}') - 1) || ']'")
            } else {
                format!("'{path}[0]'")
            };

            // The length guard keeps an empty or missing array a no-op
            // instead of producing a malformed JSON path.
            out.push(UpdateStatement {
                sql: format!(
                    "UPDATE {table} SET document = json_remove(document, {element}) \
                     WHERE ({predicate}) AND json_array_length(document,'{path}') > 0"
                ),
                params: predicate_params.to_vec(),
            });
        }
        UpdateOp::AddToSet { key, .. } => {
            return Err(DocError::internal(format!(
                "$addToSet on {} reached emission unexpanded",
                key
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::parse;
    use crate::compile::{compile, QueryContext};
    use serde_json::json;
    use std::collections::BTreeMap;

    fn query(q: serde_json::Value) -> CompiledQuery {
        let indexes = BTreeMap::new();
        let ctx = QueryContext {
            collection: "people",
            id_field: "_id",
            array_indexes: &indexes,
        };
        compile(&parse(&q).unwrap(), &ctx).unwrap()
    }

    #[test]
    fn test_normalize_replacement() {
        let plan = normalize(&json!({"firstname": "Ned", "lastname": "Flanders"})).unwrap();
        assert!(matches!(plan, UpdatePlan::Replace(_)));
    }

    #[test]
    fn test_normalize_operators_in_order() {
        let plan = normalize(&json!({"$set": {"a": 1}, "$inc": {"b": 2}})).unwrap();
        match plan {
            UpdatePlan::Apply(ops) => {
                assert_eq!(ops.len(), 2);
                assert_eq!(ops[0].key(), "a");
                assert_eq!(ops[1].key(), "b");
            }
            other => panic!("expected operator plan, got {:?}", other),
        }
    }

    #[test]
    fn test_normalize_rejects_mixed_keys() {
        let err = normalize(&json!({"$set": {"a": 1}, "b": 2})).unwrap_err();
        assert_eq!(err.kind(), "MALFORMED_UPDATE");
    }

    #[test]
    fn test_normalize_rejects_conflicting_keys() {
        let err = normalize(&json!({"$set": {"a": 1}, "$inc": {"a": 2}})).unwrap_err();
        assert_eq!(err.kind(), "CONFLICTING_UPDATE");
    }

    #[test]
    fn test_normalize_rejects_unknown_operator() {
        let err = normalize(&json!({"$rename": {"a": "b"}})).unwrap_err();
        assert_eq!(err.kind(), "UNSUPPORTED_OPERATOR");
    }

    #[test]
    fn test_normalize_rejects_non_numeric_inc() {
        let err = normalize(&json!({"$inc": {"age": "one"}})).unwrap_err();
        assert_eq!(err.kind(), "INVALID_OPERAND");
    }

    #[test]
    fn test_normalize_rejects_bad_pop() {
        let err = normalize(&json!({"$pop": {"hobbies": 2}})).unwrap_err();
        assert_eq!(err.kind(), "INVALID_OPERAND");
        assert!(normalize(&json!({"$pop": {"hobbies": -1}})).is_ok());
    }

    #[test]
    fn test_normalize_rejects_empty_clause() {
        let err = normalize(&json!({"$set": {}})).unwrap_err();
        assert_eq!(err.kind(), "MALFORMED_UPDATE");
    }

    #[test]
    fn test_set_scalar_statement() {
        let plan = normalize(&json!({"$set": {"age": 11}})).unwrap();
        let stmts = compile_update(&plan, &query(json!({"firstname": "Bart"})), "_id", true).unwrap();
        assert_eq!(stmts.len(), 1);
        assert_eq!(
            stmts[0].sql,
            "UPDATE \"people\" SET document = json_set(document,'$.age', ?) \
             WHERE json_extract(\"people\".document,'$.firstname') IS ?"
        );
        assert_eq!(stmts[0].params, vec![json!(11), json!("Bart")]);
    }

    #[test]
    fn test_set_object_serializes_through_json() {
        let plan = normalize(&json!({"$set": {"address": {"city": "Springfield"}}})).unwrap();
        let stmts = compile_update(&plan, &query(json!({})), "_id", true).unwrap();
        assert!(stmts[0].sql.contains("json_set(document,'$.address', json(?))"));
        assert_eq!(stmts[0].params[0], json!("{\"city\":\"Springfield\"}"));
    }

    #[test]
    fn test_inc_statement() {
        let plan = normalize(&json!({"$inc": {"age": 1}})).unwrap();
        let stmts = compile_update(&plan, &query(json!({"firstname": "Bart"})), "_id", true).unwrap();
        assert_eq!(
            stmts[0].sql,
            "UPDATE \"people\" SET document = json_set(document,'$.age', \
             coalesce(json_extract(document,'$.age'),0) + ?) \
             WHERE json_extract(\"people\".document,'$.firstname') IS ?"
        );
    }

    #[test]
    fn test_push_emits_two_statements() {
        let plan = normalize(&json!({"$push": {"hobbies": "church"}})).unwrap();
        let stmts = compile_update(&plan, &query(json!({"firstname": "Ned"})), "_id", true).unwrap();
        assert_eq!(stmts.len(), 2);
        assert!(stmts[0].sql.contains("json_set(document,'$.hobbies', json_array())"));
        assert!(stmts[0]
            .sql
            .contains("AND json_extract(document,'$.hobbies') IS NULL"));
        assert!(stmts[1]
            .sql
            .contains("'$.hobbies[' || json_array_length(document,'$.hobbies') || ']'"));
    }

    #[test]
    fn test_pop_statements() {
        let plan = normalize(&json!({"$pop": {"hobbies": 1}})).unwrap();
        let stmts = compile_update(&plan, &query(json!({})), "_id", true).unwrap();
        assert!(stmts[0]
            .sql
            .contains("json_remove(document, '$.hobbies[' || (json_array_length(document,'$.hobbies') - 1) || ']')"));
        assert!(stmts[0].sql.contains("json_array_length(document,'$.hobbies') > 0"));

        let plan = normalize(&json!({"$pop": {"hobbies": -1}})).unwrap();
        let stmts = compile_update(&plan, &query(json!({})), "_id", true).unwrap();
        assert!(stmts[0].sql.contains("json_remove(document, '$.hobbies[0]')"));
    }

    #[test]
    fn test_replacement_strips_identifier() {
        let plan = normalize(&json!({"_id": "x1", "firstname": "Ned"})).unwrap();
        let stmts = compile_update(&plan, &query(json!({"_id": "x1"})), "_id", true).unwrap();
        assert_eq!(
            stmts[0].sql,
            "UPDATE \"people\" SET document = json(?) WHERE \"people\"._id IS ?"
        );
        assert_eq!(stmts[0].params[0], json!("{\"firstname\":\"Ned\"}"));
    }

    #[test]
    fn test_single_row_update_wraps_predicate() {
        let plan = normalize(&json!({"$set": {"age": 1}})).unwrap();
        let stmts =
            compile_update(&plan, &query(json!({"lastname": "Simpson"})), "_id", false).unwrap();
        assert!(stmts[0].sql.contains(
            "WHERE _id IN (SELECT DISTINCT \"people\"._id FROM \"people\" \
             WHERE json_extract(\"people\".document,'$.lastname') IS ? LIMIT 1)"
        ));
    }

    #[test]
    fn test_add_to_set_must_be_expanded() {
        let plan = UpdatePlan::Apply(vec![UpdateOp::AddToSet {
            key: "hobbies".to_string(),
            value: json!("x"),
        }]);
        let err = compile_update(&plan, &query(json!({})), "_id", true).unwrap_err();
        assert_eq!(err.kind(), "INTERNAL_ERROR");
    }
}
