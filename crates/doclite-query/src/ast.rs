//! Query AST and the Mongo-style query document parser.
//!
//! A query document normalizes into a tree of [`QueryNode`]s: leaves are
//! (field, operator, operand) predicates, inner nodes are logical
//! connectives. The top level of a document is an implicit `$and` of its
//! entries. The `{$query: .., $order: ..}` envelope is recognized and yields
//! ordering hints alongside the tree.

use doclite_core::{DocError, Result, SortOrder};
use serde_json::Value;

/// Logical connective.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicalOp {
    And,
    Or,
}

impl LogicalOp {
    /// The `$`-prefixed operator name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::And => "$and",
            Self::Or => "$or",
        }
    }

    /// SQL keyword joining compiled child clauses.
    pub fn as_sql(&self) -> &'static str {
        match self {
            Self::And => "AND",
            Self::Or => "OR",
        }
    }
}

/// Leaf comparison operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
    Like,
    In,
    Nin,
}

impl CompareOp {
    /// Look up an operator by its `$`-prefixed name.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "$eq" => Some(Self::Eq),
            "$ne" => Some(Self::Ne),
            "$gt" => Some(Self::Gt),
            "$gte" => Some(Self::Gte),
            "$lt" => Some(Self::Lt),
            "$lte" => Some(Self::Lte),
            "$like" => Some(Self::Like),
            "$in" => Some(Self::In),
            "$nin" => Some(Self::Nin),
            _ => None,
        }
    }

    /// SQL comparison token. `Eq` uses `IS` so NULL compares equal to NULL.
    pub fn as_sql(&self) -> &'static str {
        match self {
            Self::Eq => "IS",
            Self::Ne => "!=",
            Self::Gt => ">",
            Self::Gte => ">=",
            Self::Lt => "<",
            Self::Lte => "<=",
            Self::Like => "LIKE",
            Self::In => "IN",
            Self::Nin => "NOT IN",
        }
    }
}

/// A node of the normalized query tree.
#[derive(Debug, Clone)]
pub enum QueryNode {
    /// Logical connective over child nodes.
    Logical {
        op: LogicalOp,
        parts: Vec<QueryNode>,
    },

    /// Leaf comparison. `negated` is set by `$not`, which applies shallowly
    /// to a single comparator.
    Predicate {
        field: String,
        op: CompareOp,
        operand: Value,
        negated: bool,
    },
}

/// A parsed query document: the predicate tree plus ordering hints.
#[derive(Debug, Clone, Default)]
pub struct ParsedQuery {
    /// Root of the predicate tree.
    pub root: Option<QueryNode>,

    /// Ordering hints from a `$order` envelope, in declaration order.
    pub order: Vec<(String, SortOrder)>,
}

/// Parse a Mongo-style query document.
pub fn parse(query: &Value) -> Result<ParsedQuery> {
    let obj = query
        .as_object()
        .ok_or_else(|| DocError::malformed_query("query must be an object", query))?;

    // {$query: Q, $order: O} envelope
    if obj.contains_key("$query") || obj.contains_key("$order") {
        for key in obj.keys() {
            if key != "$query" && key != "$order" {
                return Err(DocError::malformed_query(
                    format!("unexpected key {} beside $query/$order", key),
                    query,
                ));
            }
        }

        let root = match obj.get("$query") {
            Some(inner) => parse_node(inner)?,
            None => None,
        };
        let order = match obj.get("$order") {
            Some(spec) => parse_order(spec)?,
            None => Vec::new(),
        };

        return Ok(ParsedQuery { root, order });
    }

    Ok(ParsedQuery {
        root: parse_node(query)?,
        order: Vec::new(),
    })
}

/// Parse a query object into a tree. An empty object matches everything and
/// yields `None`.
fn parse_node(value: &Value) -> Result<Option<QueryNode>> {
    let obj = value
        .as_object()
        .ok_or_else(|| DocError::malformed_query("query node must be an object", value))?;

    let mut parts = Vec::new();

    for (key, operand) in obj {
        match key.as_str() {
            "$and" => parts.push(parse_logical(LogicalOp::And, operand, value)?),
            "$or" => parts.push(parse_logical(LogicalOp::Or, operand, value)?),
            _ if key.starts_with('$') => {
                return Err(DocError::unsupported_operator(key, value));
            }
            field => parse_field(field, operand, &mut parts)?,
        }
    }

    Ok(match parts.len() {
        0 => None,
        1 => Some(parts.into_iter().next().unwrap()),
        _ => Some(QueryNode::Logical {
            op: LogicalOp::And,
            parts,
        }),
    })
}

fn parse_logical(op: LogicalOp, operand: &Value, node: &Value) -> Result<QueryNode> {
    let arr = operand.as_array().ok_or_else(|| {
        DocError::malformed_query(format!("{} expects an array", op.name()), node)
    })?;

    if arr.is_empty() {
        return Err(DocError::malformed_query(
            format!("{} expects a non-empty array", op.name()),
            node,
        ));
    }

    let mut parts = Vec::with_capacity(arr.len());
    for item in arr {
        // An empty clause matches everything; it would make the connective
        // trivially true for $or, so reject it rather than guess.
        match parse_node(item)? {
            Some(child) => parts.push(child),
            None => {
                return Err(DocError::malformed_query("empty clause in connective", item));
            }
        }
    }

    Ok(QueryNode::Logical { op, parts })
}

/// Parse one `field: operand` entry, pushing one predicate per operator.
fn parse_field(field: &str, operand: &Value, out: &mut Vec<QueryNode>) -> Result<()> {
    match operand {
        Value::Object(ops) => {
            if ops.is_empty() {
                return Err(DocError::malformed_query("empty operator object", operand));
            }
            if ops.keys().any(|k| !k.starts_with('$')) {
                return Err(DocError::malformed_query(
                    "expected operator object or scalar operand",
                    operand,
                ));
            }

            for (name, op_operand) in ops {
                if name == "$not" {
                    out.push(parse_not(field, op_operand)?);
                } else {
                    let op = CompareOp::from_name(name)
                        .ok_or_else(|| DocError::unsupported_operator(name, operand))?;
                    validate_operand(op, op_operand)?;
                    out.push(QueryNode::Predicate {
                        field: field.to_string(),
                        op,
                        operand: op_operand.clone(),
                        negated: false,
                    });
                }
            }
            Ok(())
        }
        Value::Array(_) => Err(DocError::malformed_query(
            "array operand requires $in or $nin",
            operand,
        )),
        scalar => {
            out.push(QueryNode::Predicate {
                field: field.to_string(),
                op: CompareOp::Eq,
                operand: scalar.clone(),
                negated: false,
            });
            Ok(())
        }
    }
}

/// `$not` wraps exactly one leaf comparator; composition is shallow.
fn parse_not(field: &str, operand: &Value) -> Result<QueryNode> {
    let inner = operand
        .as_object()
        .filter(|o| o.len() == 1)
        .ok_or_else(|| {
            DocError::malformed_query("$not expects a single-operator object", operand)
        })?;

    let (name, op_operand) = inner.iter().next().unwrap();
    let op = CompareOp::from_name(name)
        .ok_or_else(|| DocError::unsupported_operator(name.as_str(), operand))?;

    if matches!(op, CompareOp::In | CompareOp::Nin) {
        return Err(DocError::malformed_query(
            "$not cannot wrap $in or $nin",
            operand,
        ));
    }

    validate_operand(op, op_operand)?;
    Ok(QueryNode::Predicate {
        field: field.to_string(),
        op,
        operand: op_operand.clone(),
        negated: true,
    })
}

fn validate_operand(op: CompareOp, operand: &Value) -> Result<()> {
    match op {
        CompareOp::In | CompareOp::Nin => {
            let arr = operand.as_array().ok_or_else(|| {
                DocError::invalid_operand(op.as_sql(), "expected a list of scalars")
            })?;
            for item in arr {
                if !doclite_core::is_scalar(item) {
                    return Err(DocError::invalid_operand(
                        op.as_sql(),
                        format!("non-scalar list element {}", item),
                    ));
                }
            }
            Ok(())
        }
        _ => {
            if !doclite_core::is_scalar(operand) {
                return Err(DocError::invalid_operand(
                    op.as_sql(),
                    format!("expected a scalar, got {}", operand),
                ));
            }
            Ok(())
        }
    }
}

fn parse_order(spec: &Value) -> Result<Vec<(String, SortOrder)>> {
    let obj = spec
        .as_object()
        .ok_or_else(|| DocError::malformed_query("$order must be an object", spec))?;

    let mut order = Vec::with_capacity(obj.len());
    for (path, dir) in obj {
        let n = dir
            .as_i64()
            .and_then(SortOrder::from_signum)
            .ok_or_else(|| DocError::malformed_query("$order direction must be 1 or -1", spec))?;
        order.push((path.clone(), n));
    }
    Ok(order)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn leaf(node: &QueryNode) -> (&str, CompareOp, &Value, bool) {
        match node {
            QueryNode::Predicate {
                field,
                op,
                operand,
                negated,
            } => (field, *op, operand, *negated),
            other => panic!("expected predicate, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_empty_query() {
        let parsed = parse(&json!({})).unwrap();
        assert!(parsed.root.is_none());
        assert!(parsed.order.is_empty());
    }

    #[test]
    fn test_parse_implicit_eq() {
        let parsed = parse(&json!({"firstname": "Lisa"})).unwrap();
        let (field, op, operand, negated) = leaf(parsed.root.as_ref().unwrap());
        assert_eq!(field, "firstname");
        assert_eq!(op, CompareOp::Eq);
        assert_eq!(operand, &json!("Lisa"));
        assert!(!negated);
    }

    #[test]
    fn test_parse_implicit_and() {
        let parsed = parse(&json!({"firstname": "Lisa", "lastname": "Simpson"})).unwrap();
        match parsed.root.unwrap() {
            QueryNode::Logical { op, parts } => {
                assert_eq!(op, LogicalOp::And);
                assert_eq!(parts.len(), 2);
            }
            other => panic!("expected logical node, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_or() {
        let parsed =
            parse(&json!({"$or": [{"firstname": "Lisa"}, {"lastname": "Simpson"}]})).unwrap();
        match parsed.root.unwrap() {
            QueryNode::Logical { op, parts } => {
                assert_eq!(op, LogicalOp::Or);
                assert_eq!(parts.len(), 2);
            }
            other => panic!("expected logical node, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_multiple_operators_on_field() {
        let parsed = parse(&json!({"age": {"$gt": 1, "$lt": 5}})).unwrap();
        match parsed.root.unwrap() {
            QueryNode::Logical { op, parts } => {
                assert_eq!(op, LogicalOp::And);
                let (_, op0, _, _) = leaf(&parts[0]);
                let (_, op1, _, _) = leaf(&parts[1]);
                assert_eq!(op0, CompareOp::Gt);
                assert_eq!(op1, CompareOp::Lt);
            }
            other => panic!("expected logical node, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_not() {
        let parsed = parse(&json!({"firstname": {"$not": {"$like": "M%"}}})).unwrap();
        let (field, op, operand, negated) = leaf(parsed.root.as_ref().unwrap());
        assert_eq!(field, "firstname");
        assert_eq!(op, CompareOp::Like);
        assert_eq!(operand, &json!("M%"));
        assert!(negated);
    }

    #[test]
    fn test_parse_not_rejects_in() {
        let err = parse(&json!({"hobbies": {"$not": {"$in": ["x"]}}})).unwrap_err();
        assert_eq!(err.kind(), "MALFORMED_QUERY");
    }

    #[test]
    fn test_parse_envelope() {
        let parsed = parse(&json!({
            "$query": {"lastname": "Simpson"},
            "$order": {"firstname": 1, "age": -1}
        }))
        .unwrap();
        assert!(parsed.root.is_some());
        assert_eq!(
            parsed.order,
            vec![
                ("firstname".to_string(), SortOrder::Ascending),
                ("age".to_string(), SortOrder::Descending)
            ]
        );
    }

    #[test]
    fn test_parse_envelope_rejects_stray_keys() {
        let err = parse(&json!({"$query": {}, "extra": 1})).unwrap_err();
        assert_eq!(err.kind(), "MALFORMED_QUERY");
    }

    #[test]
    fn test_parse_unknown_operator() {
        let err = parse(&json!({"name": {"$regex": "^L"}})).unwrap_err();
        assert_eq!(err.kind(), "UNSUPPORTED_OPERATOR");
        assert!(err.to_string().contains("$regex"));
    }

    #[test]
    fn test_parse_in_requires_scalar_list() {
        let err = parse(&json!({"hobbies": {"$in": "skateboarding"}})).unwrap_err();
        assert_eq!(err.kind(), "INVALID_OPERAND");

        let err = parse(&json!({"hobbies": {"$in": [{"nested": true}]}})).unwrap_err();
        assert_eq!(err.kind(), "INVALID_OPERAND");
    }

    #[test]
    fn test_parse_bare_array_operand() {
        let err = parse(&json!({"hobbies": ["a", "b"]})).unwrap_err();
        assert_eq!(err.kind(), "MALFORMED_QUERY");
    }

    #[test]
    fn test_parse_null_equality() {
        let parsed = parse(&json!({"boolitem": null})).unwrap();
        let (_, op, operand, _) = leaf(parsed.root.as_ref().unwrap());
        assert_eq!(op, CompareOp::Eq);
        assert!(operand.is_null());
    }
}
